//! The check-in / pause / resume / check-out state machine.
//!
//! Operations for one tenant/actor pair are serialized through an in-process
//! lock, and the store enforces the open-session invariants on every write, so
//! two concurrent check-ins cannot both observe "no open session" and both
//! succeed. Writes are never retried; only the read-only queries retry
//! transient store failures.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration as StdDuration;

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};

use crate::clock::{Clock, calendar_date};
use crate::error::{ConflictReason, Missing, StoreError, TimeError};
use crate::events::{SessionEvent, SessionEvents};
use crate::project::ProjectValidator;
use crate::session::{SessionKey, SessionSnapshot, SnapshotWarning, TimerSession, TransitionError};
use crate::store::SessionStore;
use crate::types::{ActorId, ClosedBy, ProjectId, SubTaskId, TenantId};

/// Pause between read attempts, multiplied by the attempt number.
const READ_RETRY_BACKOFF: StdDuration = StdDuration::from_millis(25);

/// Unused lock entries are pruned once the table reaches this size.
const LOCK_PRUNE_THRESHOLD: usize = 1024;

/// Engine settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Offset used to decide which calendar day "now" belongs to.
    pub utc_offset: FixedOffset,
    /// Extra attempts for read-only queries after a transient store error.
    pub read_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            utc_offset: Utc.fix(),
            read_retries: 3,
        }
    }
}

type LockKey = (TenantId, ActorId);

/// One mutex per tenant/actor, created on demand.
#[derive(Debug, Default)]
struct KeyLocks {
    locks: Mutex<HashMap<LockKey, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    fn handle(&self, tenant: &TenantId, actor: &ActorId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.len() >= LOCK_PRUNE_THRESHOLD {
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        Arc::clone(locks.entry((tenant.clone(), actor.clone())).or_default())
    }
}

pub struct TimeEngine {
    store: Arc<dyn SessionStore>,
    validator: ProjectValidator,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    locks: KeyLocks,
    events: SessionEvents,
}

impl TimeEngine {
    pub fn new(
        store: Arc<dyn SessionStore>,
        validator: ProjectValidator,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            validator,
            clock,
            config,
            locks: KeyLocks::default(),
            events: SessionEvents::default(),
        }
    }

    /// Publishes lifecycle events on `events` instead of a private channel.
    #[must_use]
    pub fn with_events(mut self, events: SessionEvents) -> Self {
        self.events = events;
        self
    }

    pub const fn events(&self) -> &SessionEvents {
        &self.events
    }

    pub const fn validator(&self) -> &ProjectValidator {
        &self.validator
    }

    /// The calendar day the engine currently considers "today".
    pub fn today(&self) -> NaiveDate {
        calendar_date(self.clock.now(), self.config.utc_offset)
    }

    fn now_and_key(
        &self,
        tenant: &TenantId,
        actor: &ActorId,
        project: &ProjectId,
    ) -> (DateTime<Utc>, SessionKey) {
        let now = self.clock.now();
        let date = calendar_date(now, self.config.utc_offset);
        (now, SessionKey::new(tenant, actor, project, date))
    }

    /// Starts a timer for the actor on the project, today.
    pub fn check_in(
        &self,
        actor: &ActorId,
        tenant: &TenantId,
        project: &ProjectId,
        sub_task: Option<&SubTaskId>,
    ) -> Result<SessionSnapshot, TimeError> {
        let project_ref = self.validator.validate(project, tenant)?;

        let lock = self.locks.handle(tenant, actor);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (now, key) = self.now_and_key(tenant, actor, project);

        let open = self.store.list_open_for_actor(tenant, actor, key.date)?;
        if let Some(reason) = check_in_conflict(&open, project) {
            return Err(TimeError::conflict(reason, key));
        }

        let session = TimerSession::start(&key, sub_task.cloned(), now);
        match self.store.insert(&session) {
            Ok(()) => {}
            Err(StoreError::Conflict { message }) => {
                // Another process won the race; report what it created.
                tracing::debug!(%key, %message, "check-in lost race at the store");
                let open = self.store.list_open_for_actor(tenant, actor, key.date)?;
                let reason =
                    check_in_conflict(&open, project).unwrap_or(ConflictReason::DuplicateSession);
                return Err(TimeError::conflict(reason, key));
            }
            Err(err) => return Err(err.into()),
        }

        tracing::debug!(
            session_id = %session.id,
            project_title = %project_ref.title,
            %key,
            "checked in"
        );
        let snapshot = session.snapshot(now);
        self.events.publish(SessionEvent::CheckedIn(session));
        Ok(snapshot)
    }

    /// Pauses a running session or resumes a paused one.
    pub fn pause_or_resume(
        &self,
        actor: &ActorId,
        tenant: &TenantId,
        project: &ProjectId,
    ) -> Result<SessionSnapshot, TimeError> {
        let lock = self.locks.handle(tenant, actor);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (now, key) = self.now_and_key(tenant, actor, project);

        let Some(mut session) = self.store.find_open(tenant, actor, project, key.date)? else {
            return Err(TimeError::NotFound(Missing::OpenSession(key)));
        };

        let event = if session.is_running {
            session
                .pause(now)
                .map_err(|err| transition_error(err, &key))?;
            self.persist(&session, &key)?;
            tracing::debug!(session_id = %session.id, elapsed_sec = session.effective_elapsed_sec, %key, "paused");
            SessionEvent::Paused(session.clone())
        } else {
            let open = self.store.list_open_for_actor(tenant, actor, key.date)?;
            if let Some(other) = open
                .iter()
                .find(|s| s.is_running && s.project_id != *project)
            {
                return Err(TimeError::conflict(
                    ConflictReason::ActiveElsewhere {
                        running_project: other.project_id.clone(),
                    },
                    key,
                ));
            }
            session
                .resume(now)
                .map_err(|err| transition_error(err, &key))?;
            self.persist(&session, &key)?;
            tracing::debug!(
                session_id = %session.id,
                paused_duration_sec = session.paused_duration_sec,
                %key,
                "resumed"
            );
            SessionEvent::Resumed(session.clone())
        };

        let snapshot = session.snapshot(now);
        self.events.publish(event);
        Ok(snapshot)
    }

    /// Finalizes today's session for the project.
    ///
    /// Allowed while paused: the open pause window is left out of the total
    /// and the snapshot carries [`SnapshotWarning::PausedAtCheckout`].
    pub fn check_out(
        &self,
        actor: &ActorId,
        tenant: &TenantId,
        project: &ProjectId,
    ) -> Result<SessionSnapshot, TimeError> {
        let lock = self.locks.handle(tenant, actor);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (now, key) = self.now_and_key(tenant, actor, project);

        let Some(mut session) = self.store.find_open(tenant, actor, project, key.date)? else {
            let already_closed = self
                .store
                .list_for_actor_day(tenant, actor, key.date)?
                .iter()
                .any(|s| s.project_id == *project && s.is_checked_out);
            return Err(if already_closed {
                TimeError::conflict(ConflictReason::AlreadyCheckedOut, key)
            } else {
                TimeError::NotFound(Missing::OpenSession(key))
            });
        };

        let was_paused = session.is_paused();
        let open_pause_sec = session
            .finalize(now, ClosedBy::Actor)
            .map_err(|err| transition_error(err, &key))?;
        self.persist(&session, &key)?;

        let mut snapshot = session.snapshot(now);
        if was_paused {
            tracing::warn!(session_id = %session.id, open_pause_sec, %key, "checked out while paused");
            snapshot = snapshot.with_warning(SnapshotWarning::PausedAtCheckout { open_pause_sec });
        }
        tracing::info!(
            session_id = %session.id,
            total_duration_sec = session.total_duration_sec,
            %key,
            "checked out"
        );
        self.events.publish(SessionEvent::CheckedOut {
            session,
            snapshot: snapshot.clone(),
        });
        Ok(snapshot)
    }

    /// Elapsed time of today's open session, without changing it.
    pub fn get_elapsed(
        &self,
        actor: &ActorId,
        tenant: &TenantId,
        project: &ProjectId,
    ) -> Result<SessionSnapshot, TimeError> {
        let (now, key) = self.now_and_key(tenant, actor, project);
        let session = self.read_with_retry(&key, || {
            self.store.find_open(tenant, actor, project, key.date)
        })?;
        Ok(session.map_or_else(
            || SessionSnapshot::no_active_timer(project.clone(), key.date),
            |session| session.snapshot(now),
        ))
    }

    /// Every session the actor has on `date` (default today), oldest first.
    pub fn sessions_for_day(
        &self,
        actor: &ActorId,
        tenant: &TenantId,
        date: Option<NaiveDate>,
    ) -> Result<Vec<SessionSnapshot>, TimeError> {
        let now = self.clock.now();
        let date = date.unwrap_or_else(|| calendar_date(now, self.config.utc_offset));
        let sessions = self.read_with_retry(&format!("{actor}@{tenant} {date}"), || {
            self.store.list_for_actor_day(tenant, actor, date)
        })?;
        Ok(sessions.iter().map(|s| s.snapshot(now)).collect())
    }

    fn read_with_retry<T>(
        &self,
        what: &dyn std::fmt::Display,
        mut read: impl FnMut() -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut attempt = 0;
        loop {
            match read() {
                Err(err) if err.is_transient() && attempt < self.config.read_retries => {
                    attempt += 1;
                    tracing::warn!(error = %err, attempt, %what, "retrying read after transient store error");
                    std::thread::sleep(READ_RETRY_BACKOFF * attempt);
                }
                result => return result,
            }
        }
    }

    fn persist(&self, session: &TimerSession, key: &SessionKey) -> Result<(), TimeError> {
        match self.store.update_open(session) {
            Ok(true) => Ok(()),
            Ok(false) => Err(TimeError::conflict(
                ConflictReason::AlreadyCheckedOut,
                key.clone(),
            )),
            Err(StoreError::Conflict { message }) => {
                tracing::debug!(%key, %message, "store refused transition");
                let running_project = self
                    .store
                    .list_open_for_actor(&key.tenant_id, &key.actor_id, key.date)?
                    .into_iter()
                    .find(|s| s.is_running && s.id != session.id)
                    .map_or_else(|| key.project_id.clone(), |s| s.project_id);
                Err(TimeError::conflict(
                    ConflictReason::ActiveElsewhere { running_project },
                    key.clone(),
                ))
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Why a check-in for `project` cannot proceed given the actor's open sessions.
fn check_in_conflict(open: &[TimerSession], project: &ProjectId) -> Option<ConflictReason> {
    if open.iter().any(|s| s.project_id == *project) {
        return Some(ConflictReason::DuplicateSession);
    }
    open.iter()
        .find(|s| s.is_running)
        .map(|s| ConflictReason::ActiveElsewhere {
            running_project: s.project_id.clone(),
        })
}

fn transition_error(err: TransitionError, key: &SessionKey) -> TimeError {
    match err {
        TransitionError::AlreadyCheckedOut => {
            TimeError::conflict(ConflictReason::AlreadyCheckedOut, key.clone())
        }
        TransitionError::MissingPauseTimestamp
        | TransitionError::NotRunning
        | TransitionError::NotPaused => {
            tracing::error!(%key, error = %err, "session invariant violated, possible data corruption");
            TimeError::State {
                message: err.to_string(),
                key: key.clone(),
            }
        }
    }
}
