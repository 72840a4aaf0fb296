//! Timer sessions and the elapsed-time arithmetic.
//!
//! A [`TimerSession`] is one check-in-to-check-out attempt for one actor on one
//! project on one calendar day. All elapsed values, whether computed while
//! pausing, resuming, checking out, reaping or answering a status query, come
//! from [`TimerSession::elapsed_at`] so the read sites cannot drift apart.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ActorId, ClosedBy, ProjectId, SessionId, SubTaskId, TenantId};

/// Identifies the scope an operation ran against. Carried by every error.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionKey {
    pub tenant_id: TenantId,
    pub actor_id: ActorId,
    pub project_id: ProjectId,
    pub date: NaiveDate,
}

impl SessionKey {
    pub fn new(tenant: &TenantId, actor: &ActorId, project: &ProjectId, date: NaiveDate) -> Self {
        Self {
            tenant_id: tenant.clone(),
            actor_id: actor.clone(),
            project_id: project.clone(),
            date,
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "actor {} on project {} (tenant {}, {})",
            self.actor_id, self.project_id, self.tenant_id, self.date
        )
    }
}

/// Rejected state-machine transitions on a single session.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TransitionError {
    #[error("session is already checked out")]
    AlreadyCheckedOut,
    #[error("session is not running")]
    NotRunning,
    #[error("session is not paused")]
    NotPaused,
    #[error("session is paused but has no recorded pause time")]
    MissingPauseTimestamp,
}

/// Where a session sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No open session for the requested key.
    NoActiveTimer,
    Running,
    Paused,
    CheckedOut,
}

impl SessionStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NoActiveTimer => "no active timer",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::CheckedOut => "checked out",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored timer session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSession {
    pub id: SessionId,
    pub tenant_id: TenantId,
    pub actor_id: ActorId,
    pub project_id: ProjectId,
    pub sub_task_id: Option<SubTaskId>,
    pub calendar_date: NaiveDate,
    pub check_in_at: DateTime<Utc>,
    pub is_running: bool,
    pub is_checked_out: bool,
    pub check_out_at: Option<DateTime<Utc>>,
    /// Seconds spent paused, accumulated whenever a pause window closes.
    pub paused_duration_sec: i64,
    /// Set only while paused.
    pub last_paused_at: Option<DateTime<Utc>>,
    /// Set only once checked out.
    pub total_duration_sec: Option<i64>,
    /// Elapsed value as of the last pause, resume or check-out.
    pub effective_elapsed_sec: i64,
    pub closed_by: Option<ClosedBy>,
}

/// Whole seconds from `from` to `to`. Negative if `to` is earlier.
fn whole_seconds(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to - from).num_seconds()
}

impl TimerSession {
    /// A new running session checked in at `now`.
    pub fn start(
        key: &SessionKey,
        sub_task_id: Option<SubTaskId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: SessionId::generate(),
            tenant_id: key.tenant_id.clone(),
            actor_id: key.actor_id.clone(),
            project_id: key.project_id.clone(),
            sub_task_id,
            calendar_date: key.date,
            check_in_at: now,
            is_running: true,
            is_checked_out: false,
            check_out_at: None,
            paused_duration_sec: 0,
            last_paused_at: None,
            total_duration_sec: None,
            effective_elapsed_sec: 0,
            closed_by: None,
        }
    }

    pub fn key(&self) -> SessionKey {
        SessionKey::new(
            &self.tenant_id,
            &self.actor_id,
            &self.project_id,
            self.calendar_date,
        )
    }

    pub const fn is_open(&self) -> bool {
        !self.is_checked_out
    }

    pub const fn is_paused(&self) -> bool {
        !self.is_running && !self.is_checked_out
    }

    pub const fn status(&self) -> SessionStatus {
        if self.is_checked_out {
            SessionStatus::CheckedOut
        } else if self.is_running {
            SessionStatus::Running
        } else {
            SessionStatus::Paused
        }
    }

    /// Length of the pause window that is still open at `now`, if any.
    ///
    /// A paused session without a pause timestamp contributes nothing here;
    /// the transitions reject it separately.
    pub fn open_pause_secs(&self, now: DateTime<Utc>) -> i64 {
        if !self.is_paused() {
            return 0;
        }
        self.last_paused_at
            .map_or(0, |paused_at| whole_seconds(paused_at, now).max(0))
    }

    /// Elapsed working seconds at `now`: time since check-in minus all paused
    /// time, clamped at zero. Frozen at the final total once checked out.
    pub fn elapsed_at(&self, now: DateTime<Utc>) -> i64 {
        if self.is_checked_out {
            return self.total_duration_sec.unwrap_or(self.effective_elapsed_sec);
        }
        let raw = whole_seconds(self.check_in_at, now);
        let paused = self.paused_duration_sec + self.open_pause_secs(now);
        (raw - paused).max(0)
    }

    /// Running → Paused.
    pub fn pause(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.is_checked_out {
            return Err(TransitionError::AlreadyCheckedOut);
        }
        if !self.is_running {
            return Err(TransitionError::NotRunning);
        }
        self.effective_elapsed_sec = self.elapsed_at(now);
        self.is_running = false;
        self.last_paused_at = Some(now);
        Ok(())
    }

    /// Paused → Running. Closes the pause window into `paused_duration_sec`.
    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.is_checked_out {
            return Err(TransitionError::AlreadyCheckedOut);
        }
        if self.is_running {
            return Err(TransitionError::NotPaused);
        }
        if self.last_paused_at.is_none() {
            return Err(TransitionError::MissingPauseTimestamp);
        }
        self.paused_duration_sec += self.open_pause_secs(now);
        self.last_paused_at = None;
        self.is_running = true;
        self.effective_elapsed_sec = self.elapsed_at(now);
        Ok(())
    }

    /// Running or Paused → CheckedOut.
    ///
    /// An open pause window is folded into `paused_duration_sec` first, so it
    /// never counts as worked time. Returns the length of that window.
    pub fn finalize(
        &mut self,
        now: DateTime<Utc>,
        closed_by: ClosedBy,
    ) -> Result<i64, TransitionError> {
        if self.is_checked_out {
            return Err(TransitionError::AlreadyCheckedOut);
        }
        let open_pause = self.open_pause_secs(now);
        self.paused_duration_sec += open_pause;
        self.last_paused_at = None;
        let total = (whole_seconds(self.check_in_at, now) - self.paused_duration_sec).max(0);
        self.is_running = false;
        self.is_checked_out = true;
        self.check_out_at = Some(now);
        self.total_duration_sec = Some(total);
        self.effective_elapsed_sec = total;
        self.closed_by = Some(closed_by);
        Ok(open_pause)
    }

    /// Read-only view of the session at `now`.
    pub fn snapshot(&self, now: DateTime<Utc>) -> SessionSnapshot {
        SessionSnapshot {
            session_id: Some(self.id.clone()),
            project_id: self.project_id.clone(),
            calendar_date: self.calendar_date,
            status: self.status(),
            is_running: self.is_running,
            is_checked_out: self.is_checked_out,
            elapsed_sec: self.elapsed_at(now),
            paused_duration_sec: self.paused_duration_sec + self.open_pause_secs(now),
            check_in_at: Some(self.check_in_at),
            last_paused_at: self.last_paused_at,
            check_out_at: self.check_out_at,
            total_duration_sec: self.total_duration_sec,
            warning: None,
        }
    }
}

/// Non-fatal conditions reported alongside a successful operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SnapshotWarning {
    /// The session was paused when it was checked out; the open pause window
    /// was excluded from the total.
    PausedAtCheckout {
        #[serde(rename = "openPauseSec")]
        open_pause_sec: i64,
    },
}

impl fmt::Display for SnapshotWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PausedAtCheckout { open_pause_sec } => write!(
                f,
                "session was paused at check-out; the last {open_pause_sec}s were not counted"
            ),
        }
    }
}

/// What the caller gets back from every engine operation.
///
/// `paused_duration_sec` includes a pause window that is still open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: Option<SessionId>,
    pub project_id: ProjectId,
    pub calendar_date: NaiveDate,
    pub status: SessionStatus,
    pub is_running: bool,
    pub is_checked_out: bool,
    pub elapsed_sec: i64,
    pub paused_duration_sec: i64,
    pub check_in_at: Option<DateTime<Utc>>,
    pub last_paused_at: Option<DateTime<Utc>>,
    pub check_out_at: Option<DateTime<Utc>>,
    pub total_duration_sec: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<SnapshotWarning>,
}

impl SessionSnapshot {
    /// The answer for a key with no open session.
    pub fn no_active_timer(project_id: ProjectId, calendar_date: NaiveDate) -> Self {
        Self {
            session_id: None,
            project_id,
            calendar_date,
            status: SessionStatus::NoActiveTimer,
            is_running: false,
            is_checked_out: false,
            elapsed_sec: 0,
            paused_duration_sec: 0,
            check_in_at: None,
            last_paused_at: None,
            check_out_at: None,
            total_duration_sec: None,
            warning: None,
        }
    }

    #[must_use]
    pub const fn with_warning(mut self, warning: SnapshotWarning) -> Self {
        self.warning = Some(warning);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Duration;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-03-03T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn session() -> TimerSession {
        let key = SessionKey::new(
            &TenantId::new("acme").unwrap(),
            &ActorId::new("alice").unwrap(),
            &ProjectId::new("apollo").unwrap(),
            t0().date_naive(),
        );
        TimerSession::start(&key, None, t0())
    }

    fn at(secs: i64) -> DateTime<Utc> {
        t0() + Duration::seconds(secs)
    }

    #[test]
    fn elapsed_counts_running_time() {
        let s = session();
        assert_eq!(s.elapsed_at(at(0)), 0);
        assert_eq!(s.elapsed_at(at(75)), 75);
    }

    #[test]
    fn elapsed_is_clamped_under_clock_skew() {
        let s = session();
        assert_eq!(s.elapsed_at(at(-30)), 0);

        let mut paused = session();
        paused.paused_duration_sec = 500;
        assert_eq!(paused.elapsed_at(at(100)), 0);
    }

    #[test]
    fn elapsed_truncates_to_whole_seconds() {
        let s = session();
        assert_eq!(s.elapsed_at(t0() + Duration::milliseconds(1999)), 1);
    }

    #[test]
    fn elapsed_stops_while_paused() {
        let mut s = session();
        s.pause(at(100)).unwrap();
        assert_eq!(s.effective_elapsed_sec, 100);
        assert_eq!(s.elapsed_at(at(100)), 100);
        assert_eq!(s.elapsed_at(at(400)), 100);
        assert_eq!(s.open_pause_secs(at(400)), 300);
    }

    #[test]
    fn resume_accumulates_pause_window() {
        let mut s = session();
        s.pause(at(100)).unwrap();
        s.resume(at(160)).unwrap();
        assert_eq!(s.paused_duration_sec, 60);
        assert!(s.last_paused_at.is_none());
        assert!(s.is_running);
        assert_eq!(s.elapsed_at(at(220)), 160);
    }

    #[test]
    fn resume_without_pause_timestamp_is_rejected() {
        let mut s = session();
        s.is_running = false;
        assert_eq!(
            s.resume(at(10)),
            Err(TransitionError::MissingPauseTimestamp)
        );
    }

    #[test]
    fn transitions_follow_the_state_machine() {
        let mut s = session();
        assert_eq!(s.resume(at(1)), Err(TransitionError::NotPaused));
        s.pause(at(2)).unwrap();
        assert_eq!(s.pause(at(3)), Err(TransitionError::NotRunning));
        s.finalize(at(4), ClosedBy::Actor).unwrap();
        assert_eq!(s.pause(at(5)), Err(TransitionError::AlreadyCheckedOut));
        assert_eq!(s.resume(at(5)), Err(TransitionError::AlreadyCheckedOut));
        assert_eq!(
            s.finalize(at(5), ClosedBy::Actor),
            Err(TransitionError::AlreadyCheckedOut)
        );
    }

    #[test]
    fn finalize_while_paused_folds_open_pause() {
        let mut s = session();
        s.pause(at(50)).unwrap();
        let open = s.finalize(at(90), ClosedBy::Actor).unwrap();
        assert_eq!(open, 40);
        assert_eq!(s.total_duration_sec, Some(50));
        assert_eq!(s.paused_duration_sec, 40);
        assert!(s.last_paused_at.is_none());
        assert!(!s.is_running);
        assert_eq!(s.check_out_at, Some(at(90)));
        assert_eq!(s.closed_by, Some(ClosedBy::Actor));
        assert_eq!(s.elapsed_at(at(5000)), 50);
    }

    #[test]
    fn snapshot_reports_open_pause_in_paused_total() {
        let mut s = session();
        s.pause(at(30)).unwrap();
        let snap = s.snapshot(at(45));
        assert_eq!(snap.status, SessionStatus::Paused);
        assert_eq!(snap.elapsed_sec, 30);
        assert_eq!(snap.paused_duration_sec, 15);
        assert_eq!(snap.last_paused_at, Some(at(30)));
    }

    #[test]
    fn snapshot_serializes_camel_case_with_warning() {
        let snap = SessionSnapshot::no_active_timer(
            ProjectId::new("apollo").unwrap(),
            t0().date_naive(),
        )
        .with_warning(SnapshotWarning::PausedAtCheckout { open_pause_sec: 7 });
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["status"], "no_active_timer");
        assert_eq!(json["elapsedSec"], 0);
        assert_eq!(json["warning"]["kind"], "paused_at_checkout");
        assert_eq!(json["warning"]["openPauseSec"], 7);
    }
}
