//! Session persistence contract.
//!
//! A store must enforce both open-session uniqueness invariants atomically on
//! [`SessionStore::insert`], and must only apply [`SessionStore::update_open`]
//! to a row that is still open. Those two guarantees make the engine's
//! read-then-write sequences safe even when another process shares the store.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::NaiveDate;

use crate::error::StoreError;
use crate::session::TimerSession;
use crate::types::{ActorId, ProjectId, SessionId, TenantId};

pub trait SessionStore: Send + Sync {
    /// Stores a new session.
    ///
    /// Fails with [`StoreError::Conflict`] if the tenant/actor/project/day
    /// already has an open session, or if the session is running and the
    /// actor already has a running session that day.
    fn insert(&self, session: &TimerSession) -> Result<(), StoreError>;

    /// Overwrites a session if, and only if, the stored copy is still open.
    ///
    /// Returns `false` when the stored copy is checked out or missing.
    fn update_open(&self, session: &TimerSession) -> Result<bool, StoreError>;

    fn get(&self, id: &SessionId) -> Result<Option<TimerSession>, StoreError>;

    /// The open session for one tenant/actor/project/day.
    fn find_open(
        &self,
        tenant: &TenantId,
        actor: &ActorId,
        project: &ProjectId,
        date: NaiveDate,
    ) -> Result<Option<TimerSession>, StoreError>;

    /// All open sessions for an actor on a day, across projects.
    fn list_open_for_actor(
        &self,
        tenant: &TenantId,
        actor: &ActorId,
        date: NaiveDate,
    ) -> Result<Vec<TimerSession>, StoreError>;

    /// Every session, open or closed, for an actor on a day, oldest first.
    fn list_for_actor_day(
        &self,
        tenant: &TenantId,
        actor: &ActorId,
        date: NaiveDate,
    ) -> Result<Vec<TimerSession>, StoreError>;

    /// Open sessions with `calendar_date < before`, across all tenants.
    ///
    /// Only running sessions unless `include_paused` is set.
    fn list_stale(
        &self,
        before: NaiveDate,
        include_paused: bool,
    ) -> Result<Vec<TimerSession>, StoreError>;
}

/// A `SessionStore` held in process memory.
///
/// Every call takes one lock, so the uniqueness checks in `insert` and the
/// open check in `update_open` are atomic with their writes.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<SessionId, TimerSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_sessions<T>(&self, f: impl FnOnce(&mut HashMap<SessionId, TimerSession>) -> T) -> T {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut sessions)
    }

    fn collect_sorted<'a>(iter: impl Iterator<Item = &'a TimerSession>) -> Vec<TimerSession> {
        let mut sessions: Vec<TimerSession> = iter.cloned().collect();
        sessions.sort_by(|a, b| {
            a.check_in_at
                .cmp(&b.check_in_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        sessions
    }
}

fn same_actor_day(s: &TimerSession, tenant: &TenantId, actor: &ActorId, date: NaiveDate) -> bool {
    s.tenant_id == *tenant && s.actor_id == *actor && s.calendar_date == date
}

impl SessionStore for MemorySessionStore {
    fn insert(&self, session: &TimerSession) -> Result<(), StoreError> {
        self.with_sessions(|sessions| {
            if sessions.contains_key(&session.id) {
                return Err(StoreError::Conflict {
                    message: format!("session {} already exists", session.id),
                });
            }
            let open_same_day = sessions.values().filter(|s| {
                s.is_open()
                    && same_actor_day(s, &session.tenant_id, &session.actor_id, session.calendar_date)
            });
            for existing in open_same_day {
                if existing.project_id == session.project_id && session.is_open() {
                    return Err(StoreError::Conflict {
                        message: format!(
                            "open session already exists for project {}",
                            session.project_id
                        ),
                    });
                }
                if existing.is_running && session.is_running && session.is_open() {
                    return Err(StoreError::Conflict {
                        message: format!("a session is already running on project {}", existing.project_id),
                    });
                }
            }
            sessions.insert(session.id.clone(), session.clone());
            Ok(())
        })
    }

    fn update_open(&self, session: &TimerSession) -> Result<bool, StoreError> {
        self.with_sessions(|sessions| {
            let Some(stored) = sessions.get(&session.id) else {
                return Ok(false);
            };
            if !stored.is_open() {
                return Ok(false);
            }
            if session.is_running && session.is_open() {
                let other_running = sessions.values().any(|s| {
                    s.id != session.id
                        && s.is_open()
                        && s.is_running
                        && same_actor_day(s, &session.tenant_id, &session.actor_id, session.calendar_date)
                });
                if other_running {
                    return Err(StoreError::Conflict {
                        message: "another session is already running".to_string(),
                    });
                }
            }
            sessions.insert(session.id.clone(), session.clone());
            Ok(true)
        })
    }

    fn get(&self, id: &SessionId) -> Result<Option<TimerSession>, StoreError> {
        Ok(self.with_sessions(|sessions| sessions.get(id).cloned()))
    }

    fn find_open(
        &self,
        tenant: &TenantId,
        actor: &ActorId,
        project: &ProjectId,
        date: NaiveDate,
    ) -> Result<Option<TimerSession>, StoreError> {
        Ok(self.with_sessions(|sessions| {
            sessions
                .values()
                .find(|s| s.is_open() && s.project_id == *project && same_actor_day(s, tenant, actor, date))
                .cloned()
        }))
    }

    fn list_open_for_actor(
        &self,
        tenant: &TenantId,
        actor: &ActorId,
        date: NaiveDate,
    ) -> Result<Vec<TimerSession>, StoreError> {
        Ok(self.with_sessions(|sessions| {
            Self::collect_sorted(
                sessions
                    .values()
                    .filter(|s| s.is_open() && same_actor_day(s, tenant, actor, date)),
            )
        }))
    }

    fn list_for_actor_day(
        &self,
        tenant: &TenantId,
        actor: &ActorId,
        date: NaiveDate,
    ) -> Result<Vec<TimerSession>, StoreError> {
        Ok(self.with_sessions(|sessions| {
            Self::collect_sorted(
                sessions
                    .values()
                    .filter(|s| same_actor_day(s, tenant, actor, date)),
            )
        }))
    }

    fn list_stale(
        &self,
        before: NaiveDate,
        include_paused: bool,
    ) -> Result<Vec<TimerSession>, StoreError> {
        Ok(self.with_sessions(|sessions| {
            Self::collect_sorted(sessions.values().filter(|s| {
                s.is_open() && s.calendar_date < before && (s.is_running || include_paused)
            }))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{DateTime, Duration, Utc};

    use crate::session::SessionKey;
    use crate::types::ClosedBy;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-03-03T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn new_session(actor: &str, project: &str, date: NaiveDate) -> TimerSession {
        let key = SessionKey::new(
            &TenantId::new("acme").unwrap(),
            &ActorId::new(actor).unwrap(),
            &ProjectId::new(project).unwrap(),
            date,
        );
        TimerSession::start(&key, None, t0())
    }

    fn today() -> NaiveDate {
        t0().date_naive()
    }

    #[test]
    fn insert_rejects_second_open_session_for_project() {
        let store = MemorySessionStore::new();
        let mut first = new_session("alice", "apollo", today());
        first.pause(t0()).unwrap();
        store.insert(&first).unwrap();

        let err = store
            .insert(&new_session("alice", "apollo", today()))
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[test]
    fn insert_rejects_second_running_session_for_actor() {
        let store = MemorySessionStore::new();
        store.insert(&new_session("alice", "apollo", today())).unwrap();
        assert!(store.insert(&new_session("alice", "gemini", today())).is_err());
        // Other actors and other days are independent.
        store.insert(&new_session("bob", "gemini", today())).unwrap();
        store
            .insert(&new_session("alice", "gemini", today() - Duration::days(1)))
            .unwrap();
    }

    #[test]
    fn update_open_refuses_checked_out_rows() {
        let store = MemorySessionStore::new();
        let mut session = new_session("alice", "apollo", today());
        store.insert(&session).unwrap();

        session.finalize(t0() + Duration::seconds(10), ClosedBy::Actor).unwrap();
        assert!(store.update_open(&session).unwrap());
        assert!(!store.update_open(&session).unwrap());
        assert!(store.find_open(
            &session.tenant_id,
            &session.actor_id,
            &session.project_id,
            today()
        )
        .unwrap()
        .is_none());
    }

    #[test]
    fn list_stale_filters_by_date_and_running() {
        let store = MemorySessionStore::new();
        let old_day = today() - Duration::days(3);
        store.insert(&new_session("alice", "apollo", old_day)).unwrap();
        let mut paused = new_session("bob", "apollo", old_day);
        paused.pause(t0()).unwrap();
        store.insert(&paused).unwrap();
        store.insert(&new_session("carol", "apollo", today())).unwrap();

        let running_only = store.list_stale(today() - Duration::days(1), false).unwrap();
        assert_eq!(running_only.len(), 1);
        assert_eq!(running_only[0].actor_id.as_str(), "alice");

        let with_paused = store.list_stale(today() - Duration::days(1), true).unwrap();
        assert_eq!(with_paused.len(), 2);
    }
}
