//! Command-line argument definitions.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use wt_core::{ActorId, ProjectId, SubTaskId, TenantId, parse_calendar_date};

/// Work-time tracker.
///
/// Records check-in, pause and check-out of actors on tenant projects and
/// reports elapsed working time.
#[derive(Debug, Parser)]
#[command(name = "wt", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Print results as JSON.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Identifies one actor's timer on one project.
#[derive(Debug, Clone, Args)]
pub struct SessionArgs {
    #[arg(long)]
    pub tenant: TenantId,

    #[arg(long)]
    pub actor: ActorId,

    #[arg(long)]
    pub project: ProjectId,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Manage the project registry.
    #[command(subcommand)]
    Project(ProjectAction),

    /// Start a timer on a project.
    CheckIn {
        #[command(flatten)]
        session: SessionArgs,

        /// Sub-task the time is booked against.
        #[arg(long)]
        sub_task: Option<SubTaskId>,
    },

    /// Pause a running timer, or resume a paused one.
    Pause {
        #[command(flatten)]
        session: SessionArgs,
    },

    /// Stop a timer and record its total.
    CheckOut {
        #[command(flatten)]
        session: SessionArgs,
    },

    /// Show the elapsed time of today's timer on a project.
    Elapsed {
        #[command(flatten)]
        session: SessionArgs,
    },

    /// List an actor's sessions for a day.
    Status {
        #[arg(long)]
        tenant: TenantId,

        #[arg(long)]
        actor: ActorId,

        /// Day to list (YYYY-MM-DD). Defaults to today.
        #[arg(long, value_parser = parse_calendar_date)]
        date: Option<NaiveDate>,
    },

    /// Finalize stale sessions once and exit.
    Reap,

    /// Run the stale session reaper until interrupted.
    Daemon,
}

/// Project registry actions.
#[derive(Debug, Subcommand)]
pub enum ProjectAction {
    /// Register a project, or rename an existing one.
    Add {
        #[arg(long)]
        tenant: TenantId,

        #[arg(long)]
        id: ProjectId,

        #[arg(long)]
        title: String,
    },

    /// List a tenant's projects.
    List {
        #[arg(long)]
        tenant: TenantId,
    },
}
