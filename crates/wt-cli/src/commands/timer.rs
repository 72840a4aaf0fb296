//! Timer commands: check-in, pause/resume, check-out and elapsed.

use std::io::Write;

use anyhow::Result;
use wt_core::{SessionSnapshot, SubTaskId, TimeEngine};

use super::util::{format_hms, write_json};
use crate::SessionArgs;

/// Which engine operation to run against a session key.
#[derive(Debug, Clone)]
pub enum TimerAction {
    CheckIn { sub_task: Option<SubTaskId> },
    Toggle,
    CheckOut,
    Elapsed,
}

pub fn run<W: Write>(
    writer: &mut W,
    engine: &TimeEngine,
    args: &SessionArgs,
    action: &TimerAction,
    json: bool,
) -> Result<()> {
    let SessionArgs {
        tenant,
        actor,
        project,
    } = args;
    let snapshot = match action {
        TimerAction::CheckIn { sub_task } => {
            engine.check_in(actor, tenant, project, sub_task.as_ref())?
        }
        TimerAction::Toggle => engine.pause_or_resume(actor, tenant, project)?,
        TimerAction::CheckOut => engine.check_out(actor, tenant, project)?,
        TimerAction::Elapsed => engine.get_elapsed(actor, tenant, project)?,
    };
    render(writer, &snapshot, json)
}

pub fn render<W: Write>(writer: &mut W, snapshot: &SessionSnapshot, json: bool) -> Result<()> {
    if json {
        return write_json(writer, snapshot);
    }

    writeln!(
        writer,
        "{} on {}: {}",
        snapshot.project_id, snapshot.calendar_date, snapshot.status
    )?;
    if snapshot.session_id.is_none() {
        return Ok(());
    }
    writeln!(writer, "elapsed: {}", format_hms(snapshot.elapsed_sec))?;
    writeln!(writer, "paused: {}", format_hms(snapshot.paused_duration_sec))?;
    if let Some(total) = snapshot.total_duration_sec {
        writeln!(writer, "total: {}", format_hms(total))?;
    }
    if let Some(warning) = &snapshot.warning {
        writeln!(writer, "warning: {warning}")?;
    }
    Ok(())
}
