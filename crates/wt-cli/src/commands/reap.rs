//! One-shot stale session sweep.

use std::io::Write;

use anyhow::{Context, Result};
use wt_core::{ReapReport, StaleSessionReaper};

use super::util::write_json;

pub fn run<W: Write>(writer: &mut W, reaper: &StaleSessionReaper, json: bool) -> Result<()> {
    let report = reaper.sweep().context("failed to list stale sessions")?;
    render(writer, &report, json)
}

fn render<W: Write>(writer: &mut W, report: &ReapReport, json: bool) -> Result<()> {
    if json {
        return write_json(writer, report);
    }
    writeln!(
        writer,
        "Scanned {} stale session(s): {} finalized, {} skipped, {} failed",
        report.scanned, report.finalized, report.skipped, report.failed
    )?;
    writeln!(writer, "Evicted {} project cache entries", report.cache_evicted)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use chrono::{DateTime, Duration, Utc};
    use insta::assert_snapshot;
    use wt_core::{ActorId, ManualClock, ProjectId, ProjectRef, TenantId};
    use wt_db::SqliteStore;

    use crate::{App, Config};

    #[test]
    fn reap_finalizes_session_from_two_days_ago() {
        let start = DateTime::parse_from_rfc3339("2025-03-03T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let clock = Arc::new(ManualClock::new(start));
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let tenant = TenantId::new("acme").unwrap();
        let project = ProjectId::new("apollo").unwrap();
        store
            .upsert_project(&ProjectRef {
                project_id: project.clone(),
                tenant_id: tenant.clone(),
                title: "Apollo".to_string(),
            })
            .unwrap();
        let app = App::with_clock(&Config::default(), store, clock.clone()).unwrap();
        app.engine
            .check_in(&ActorId::new("alice").unwrap(), &tenant, &project, None)
            .unwrap();
        clock.advance(Duration::days(2));

        let mut output = Vec::new();
        run(&mut output, &app.reaper, false).unwrap();
        assert_snapshot!(String::from_utf8(output).unwrap(), @r"
        Scanned 1 stale session(s): 1 finalized, 0 skipped, 0 failed
        Evicted 1 project cache entries
        ");
    }

    #[test]
    fn json_report_uses_camel_case() {
        let mut output = Vec::new();
        render(&mut output, &ReapReport::default(), true).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&output).unwrap();
        assert_eq!(value["scanned"], 0);
        assert_eq!(value["cacheEvicted"], 0);
    }
}
