//! Finalizes sessions left open past their calendar day.
//!
//! A crash or a forgotten check-out leaves a session running forever. The
//! reaper closes any running session dated before yesterday, charging it the
//! full time up to the sweep (no pause credit beyond what was recorded). The
//! result is a backstop, not a billing decision: reaped sessions are marked
//! `closed_by = reaper` so an audit process can flag them for review.
//!
//! Each sweep also evicts expired project cache entries.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, FixedOffset, NaiveDate, Offset, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::clock::{Clock, calendar_date};
use crate::error::StoreError;
use crate::events::{SessionEvent, SessionEvents};
use crate::project::ProjectCache;
use crate::store::SessionStore;
use crate::types::ClosedBy;

/// Sweep period used when none is configured.
pub const DEFAULT_REAP_INTERVAL: StdDuration = StdDuration::from_secs(60 * 60);

const MIN_REAP_INTERVAL: StdDuration = StdDuration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaperConfig {
    pub interval: StdDuration,
    /// Also finalize stale sessions that are paused, not just running ones.
    pub include_paused: bool,
    /// Offset used to decide which day is "today".
    pub utc_offset: FixedOffset,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_REAP_INTERVAL,
            include_paused: false,
            utc_offset: Utc.fix(),
        }
    }
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReapReport {
    pub scanned: usize,
    pub finalized: usize,
    /// Closed by someone else between the scan and the write.
    pub skipped: usize,
    pub failed: usize,
    pub cache_evicted: usize,
}

pub struct StaleSessionReaper {
    store: Arc<dyn SessionStore>,
    cache: Arc<ProjectCache>,
    clock: Arc<dyn Clock>,
    config: ReaperConfig,
    events: SessionEvents,
}

impl StaleSessionReaper {
    pub fn new(
        store: Arc<dyn SessionStore>,
        cache: Arc<ProjectCache>,
        clock: Arc<dyn Clock>,
        config: ReaperConfig,
    ) -> Self {
        Self {
            store,
            cache,
            clock,
            config,
            events: SessionEvents::default(),
        }
    }

    #[must_use]
    pub fn with_events(mut self, events: SessionEvents) -> Self {
        self.events = events;
        self
    }

    /// Sessions dated strictly before this day are stale.
    fn cutoff(&self) -> NaiveDate {
        let today = calendar_date(self.clock.now(), self.config.utc_offset);
        today - Duration::days(1)
    }

    /// Runs one sweep.
    ///
    /// Fails only if the stale sessions cannot be listed; a failure on a
    /// single session is logged, counted and skipped.
    pub fn sweep(&self) -> Result<ReapReport, StoreError> {
        let mut report = ReapReport {
            cache_evicted: self.cache.sweep(self.clock.now()),
            ..ReapReport::default()
        };

        let cutoff = self.cutoff();
        let stale = self.store.list_stale(cutoff, self.config.include_paused)?;
        report.scanned = stale.len();

        for mut session in stale {
            let now = self.clock.now();
            if let Err(err) = session.finalize(now, ClosedBy::Reaper) {
                tracing::warn!(session_id = %session.id, error = %err, "skipping stale session");
                report.failed += 1;
                continue;
            }
            match self.store.update_open(&session) {
                Ok(true) => {
                    tracing::info!(
                        session_id = %session.id,
                        tenant_id = %session.tenant_id,
                        actor_id = %session.actor_id,
                        project_id = %session.project_id,
                        calendar_date = %session.calendar_date,
                        total_duration_sec = session.total_duration_sec,
                        "reaped stale session"
                    );
                    report.finalized += 1;
                    self.events.publish(SessionEvent::Reaped(session));
                }
                Ok(false) => {
                    tracing::debug!(session_id = %session.id, "stale session already closed");
                    report.skipped += 1;
                }
                Err(err) => {
                    tracing::warn!(session_id = %session.id, error = %err, "failed to reap stale session");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Starts the periodic sweep on the current tokio runtime.
    ///
    /// The first sweep runs immediately. Stop it with
    /// [`ReaperHandle::shutdown`].
    pub fn spawn(self: Arc<Self>) -> ReaperHandle {
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(self.run(rx));
        ReaperHandle { shutdown: tx, task }
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = self.config.interval.max(MIN_REAP_INTERVAL);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval_secs = period.as_secs(), "stale session reaper started");

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => self.sweep_blocking().await,
            }
        }

        tracing::info!("stale session reaper stopped");
    }

    async fn sweep_blocking(self: &Arc<Self>) {
        let reaper = Arc::clone(self);
        match tokio::task::spawn_blocking(move || reaper.sweep()).await {
            Ok(Ok(report)) if report.finalized > 0 || report.failed > 0 => {
                tracing::info!(?report, "reaper sweep finished");
            }
            Ok(Ok(report)) => tracing::debug!(?report, "reaper sweep finished"),
            Ok(Err(err)) => tracing::error!(error = %err, "reaper sweep failed"),
            Err(err) => tracing::error!(error = %err, "reaper sweep task aborted"),
        }
    }
}

/// Controls a running reaper task.
#[derive(Debug)]
pub struct ReaperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    /// Signals the task to stop and waits for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            tracing::warn!(error = %err, "reaper task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
