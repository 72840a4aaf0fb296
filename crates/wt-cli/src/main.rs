use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use wt_cli::commands::timer::TimerAction;
use wt_cli::commands::{daemon, project, reap, status, timer};
use wt_cli::{App, Cli, Commands, Config, ProjectAction};

/// Load config and open the tracker against the configured database.
fn open_app(config_path: Option<&Path>) -> Result<App> {
    let config = Config::load_from(config_path).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");
    App::open(&config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with verbose flag support
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // Use try_init to avoid panic if tracing is already initialized (e.g., in tests)
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    let Some(command) = cli.command else {
        // No subcommand, show help
        use clap::CommandFactory;
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let app = open_app(cli.config.as_deref())?;
    let mut stdout = io::stdout().lock();
    match command {
        Commands::Project(ProjectAction::Add { tenant, id, title }) => {
            project::add(&mut stdout, &app.store, &tenant, &id, &title, cli.json)?;
        }
        Commands::Project(ProjectAction::List { tenant }) => {
            project::list(&mut stdout, &app.store, &tenant, cli.json)?;
        }
        Commands::CheckIn { session, sub_task } => {
            let action = TimerAction::CheckIn { sub_task };
            timer::run(&mut stdout, &app.engine, &session, &action, cli.json)?;
        }
        Commands::Pause { session } => {
            timer::run(&mut stdout, &app.engine, &session, &TimerAction::Toggle, cli.json)?;
        }
        Commands::CheckOut { session } => {
            timer::run(&mut stdout, &app.engine, &session, &TimerAction::CheckOut, cli.json)?;
        }
        Commands::Elapsed { session } => {
            timer::run(&mut stdout, &app.engine, &session, &TimerAction::Elapsed, cli.json)?;
        }
        Commands::Status {
            tenant,
            actor,
            date,
        } => {
            status::run(&mut stdout, &app.engine, &tenant, &actor, date, cli.json)?;
        }
        Commands::Reap => reap::run(&mut stdout, &app.reaper, cli.json)?,
        Commands::Daemon => daemon::run(app.reaper)?,
    }

    Ok(())
}
