//! Status command listing an actor's sessions for one day.

use std::io::Write;

use anyhow::Result;
use chrono::NaiveDate;
use wt_core::{ActorId, TenantId, TimeEngine};

use super::util::{format_hms, write_json};

pub fn run<W: Write>(
    writer: &mut W,
    engine: &TimeEngine,
    tenant: &TenantId,
    actor: &ActorId,
    date: Option<NaiveDate>,
    json: bool,
) -> Result<()> {
    let snapshots = engine.sessions_for_day(actor, tenant, date)?;
    if json {
        return write_json(writer, &snapshots);
    }

    let date = date.unwrap_or_else(|| engine.today());
    writeln!(writer, "{actor} ({tenant}) on {date}")?;
    if snapshots.is_empty() {
        writeln!(writer, "No sessions recorded.")?;
        return Ok(());
    }

    let width = snapshots
        .iter()
        .map(|s| s.project_id.as_str().len())
        .max()
        .unwrap_or(0);
    let mut worked = 0;
    for snapshot in &snapshots {
        worked += snapshot.elapsed_sec;
        writeln!(
            writer,
            "- {:<width$}  {:>8}  {}",
            snapshot.project_id.as_str(),
            format_hms(snapshot.elapsed_sec),
            snapshot.status,
        )?;
    }
    writeln!(writer, "Total: {}", format_hms(worked))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use chrono::{DateTime, Duration, Utc};
    use insta::assert_snapshot;
    use wt_core::{ManualClock, ProjectId, ProjectRef};
    use wt_db::SqliteStore;

    use crate::{App, Config};

    fn app_with_projects(clock: Arc<ManualClock>, projects: &[&str]) -> App {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        for project in projects {
            store
                .upsert_project(&ProjectRef {
                    project_id: ProjectId::new(*project).unwrap(),
                    tenant_id: TenantId::new("acme").unwrap(),
                    title: (*project).to_string(),
                })
                .unwrap();
        }
        App::with_clock(&Config::default(), store, clock).unwrap()
    }

    #[test]
    fn status_lists_sessions_with_day_total() {
        let start = DateTime::parse_from_rfc3339("2025-03-03T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let clock = Arc::new(ManualClock::new(start));
        let app = app_with_projects(clock.clone(), &["apollo", "gemini"]);
        let tenant = TenantId::new("acme").unwrap();
        let actor = ActorId::new("alice").unwrap();
        let apollo = ProjectId::new("apollo").unwrap();
        let gemini = ProjectId::new("gemini").unwrap();

        app.engine.check_in(&actor, &tenant, &apollo, None).unwrap();
        clock.advance(Duration::seconds(220));
        app.engine.check_out(&actor, &tenant, &apollo).unwrap();
        app.engine.check_in(&actor, &tenant, &gemini, None).unwrap();
        clock.advance(Duration::seconds(10));

        let mut output = Vec::new();
        run(&mut output, &app.engine, &tenant, &actor, None, false).unwrap();
        let output = String::from_utf8(output).unwrap();
        assert_snapshot!(output, @r"
        alice (acme) on 2025-03-03
        - apollo   0:03:40  checked out
        - gemini   0:00:10  running
        Total: 0:03:50
        ");
    }

    #[test]
    fn status_for_empty_day() {
        let start = DateTime::parse_from_rfc3339("2025-03-03T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let app = app_with_projects(Arc::new(ManualClock::new(start)), &[]);
        let mut output = Vec::new();
        run(
            &mut output,
            &app.engine,
            &TenantId::new("acme").unwrap(),
            &ActorId::new("alice").unwrap(),
            NaiveDate::from_ymd_opt(2025, 3, 1),
            false,
        )
        .unwrap();
        assert_snapshot!(String::from_utf8(output).unwrap(), @r"
        alice (acme) on 2025-03-01
        No sessions recorded.
        ");
    }
}
