//! `SessionStore` and `ProjectRegistry` backed by one SQLite connection.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::NaiveDate;
use wt_core::{
    ActorId, Clock, ProjectId, ProjectRef, ProjectRegistry, RegistryError, SessionId,
    SessionStore, StoreError, SystemClock, TenantId, TimerSession,
};

use crate::{Database, DbError};

pub struct SqliteStore {
    db: Mutex<Database>,
    clock: Arc<dyn Clock>,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self {
            db: Mutex::new(db),
            clock: Arc::new(SystemClock),
        }
    }

    /// Stamps `created_at`/`updated_at` from `clock` instead of the wall clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Opens (or creates) the database file and applies `busy_timeout`.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self, DbError> {
        let db = Database::open(path)?;
        db.set_busy_timeout(busy_timeout)?;
        Ok(Self::new(db))
    }

    pub fn open_in_memory() -> Result<Self, DbError> {
        Database::open_in_memory().map(Self::new)
    }

    fn with_db<T>(&self, f: impl FnOnce(&Database) -> Result<T, DbError>) -> Result<T, DbError> {
        let db = self.db.lock().unwrap_or_else(PoisonError::into_inner);
        f(&db)
    }

    pub fn upsert_project(&self, project: &ProjectRef) -> Result<(), DbError> {
        let now = self.clock.now();
        self.with_db(|db| db.upsert_project(project, now))
    }

    pub fn list_projects(&self, tenant_id: &TenantId) -> Result<Vec<ProjectRef>, DbError> {
        self.with_db(|db| db.list_projects(tenant_id))
    }
}

impl SessionStore for SqliteStore {
    fn insert(&self, session: &TimerSession) -> Result<(), StoreError> {
        let now = self.clock.now();
        Ok(self.with_db(|db| db.insert_session(session, now))?)
    }

    fn update_open(&self, session: &TimerSession) -> Result<bool, StoreError> {
        let now = self.clock.now();
        Ok(self.with_db(|db| db.update_open_session(session, now))?)
    }

    fn get(&self, id: &SessionId) -> Result<Option<TimerSession>, StoreError> {
        Ok(self.with_db(|db| db.get_session(id))?)
    }

    fn find_open(
        &self,
        tenant: &TenantId,
        actor: &ActorId,
        project: &ProjectId,
        date: NaiveDate,
    ) -> Result<Option<TimerSession>, StoreError> {
        Ok(self.with_db(|db| db.find_open_session(tenant, actor, project, date))?)
    }

    fn list_open_for_actor(
        &self,
        tenant: &TenantId,
        actor: &ActorId,
        date: NaiveDate,
    ) -> Result<Vec<TimerSession>, StoreError> {
        Ok(self.with_db(|db| db.list_open_sessions_for_actor(tenant, actor, date))?)
    }

    fn list_for_actor_day(
        &self,
        tenant: &TenantId,
        actor: &ActorId,
        date: NaiveDate,
    ) -> Result<Vec<TimerSession>, StoreError> {
        Ok(self.with_db(|db| db.list_sessions_for_actor_day(tenant, actor, date))?)
    }

    fn list_stale(
        &self,
        before: NaiveDate,
        include_paused: bool,
    ) -> Result<Vec<TimerSession>, StoreError> {
        Ok(self.with_db(|db| db.list_stale_sessions(before, include_paused))?)
    }
}

impl ProjectRegistry for SqliteStore {
    fn find_project(
        &self,
        project_id: &ProjectId,
        tenant_id: &TenantId,
    ) -> Result<Option<ProjectRef>, RegistryError> {
        self.with_db(|db| db.find_project(project_id, tenant_id))
            .map_err(RegistryError::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{DateTime, Duration as ChronoDuration, Utc};
    use wt_core::{
        ConflictReason, EngineConfig, ManualClock, ProjectCache, ProjectValidator,
        ReaperConfig, SessionStatus, StaleSessionReaper, TimeEngine, TimeError,
    };

    fn start() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-03-03T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    struct Fixture {
        store: Arc<SqliteStore>,
        clock: Arc<ManualClock>,
        cache: Arc<ProjectCache>,
        engine: TimeEngine,
        actor: ActorId,
        tenant: TenantId,
        apollo: ProjectId,
    }

    impl Fixture {
        fn new() -> Self {
            let clock = Arc::new(ManualClock::new(start()));
            let store = Arc::new(
                SqliteStore::open_in_memory()
                    .unwrap()
                    .with_clock(clock.clone()),
            );
            let tenant = TenantId::new("acme").unwrap();
            let apollo = ProjectId::new("apollo").unwrap();
            store
                .upsert_project(&ProjectRef {
                    project_id: apollo.clone(),
                    tenant_id: tenant.clone(),
                    title: "Apollo".to_string(),
                })
                .unwrap();
            let cache = Arc::new(ProjectCache::default());
            let validator = ProjectValidator::new(store.clone(), cache.clone(), clock.clone());
            let engine = TimeEngine::new(
                store.clone(),
                validator,
                clock.clone(),
                EngineConfig::default(),
            );
            Self {
                store,
                clock,
                cache,
                engine,
                actor: ActorId::new("alice").unwrap(),
                tenant,
                apollo,
            }
        }

        fn advance(&self, secs: i64) {
            self.clock.advance(ChronoDuration::seconds(secs));
        }
    }

    #[test]
    fn engine_scenario_over_sqlite() {
        let fx = Fixture::new();
        let e = &fx.engine;

        e.check_in(&fx.actor, &fx.tenant, &fx.apollo, None).unwrap();
        fx.advance(100);
        let paused = e.pause_or_resume(&fx.actor, &fx.tenant, &fx.apollo).unwrap();
        assert_eq!(paused.status, SessionStatus::Paused);
        assert_eq!(paused.elapsed_sec, 100);

        fx.advance(60);
        let resumed = e.pause_or_resume(&fx.actor, &fx.tenant, &fx.apollo).unwrap();
        assert_eq!(resumed.status, SessionStatus::Running);
        assert_eq!(resumed.elapsed_sec, 100);
        assert_eq!(resumed.paused_duration_sec, 60);

        fx.advance(120);
        let done = e.check_out(&fx.actor, &fx.tenant, &fx.apollo).unwrap();
        assert_eq!(done.total_duration_sec, Some(220));

        let err = e.check_out(&fx.actor, &fx.tenant, &fx.apollo).unwrap_err();
        assert_eq!(
            err.conflict_reason(),
            Some(&ConflictReason::AlreadyCheckedOut)
        );
    }

    fn updated_at(store: &SqliteStore, id: &SessionId) -> String {
        store
            .with_db(|db| {
                Ok(db.conn.query_row(
                    "SELECT updated_at FROM timer_sessions WHERE id = ?",
                    [id.as_str()],
                    |row| row.get(0),
                )?)
            })
            .unwrap()
    }

    #[test]
    fn bookkeeping_timestamps_follow_the_injected_clock() {
        let fx = Fixture::new();
        let snap = fx
            .engine
            .check_in(&fx.actor, &fx.tenant, &fx.apollo, None)
            .unwrap();
        let id = snap.session_id.unwrap();
        assert_eq!(
            updated_at(&fx.store, &id),
            "2025-03-03T09:00:00.000000000Z"
        );

        fx.advance(90);
        fx.engine
            .check_out(&fx.actor, &fx.tenant, &fx.apollo)
            .unwrap();
        assert_eq!(
            updated_at(&fx.store, &id),
            "2025-03-03T09:01:30.000000000Z"
        );

        let created_at: String = fx
            .store
            .with_db(|db| {
                Ok(db.conn.query_row(
                    "SELECT created_at FROM projects WHERE project_id = 'apollo'",
                    [],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(created_at, "2025-03-03T09:00:00.000000000Z");
    }

    #[test]
    fn duplicate_check_in_is_a_conflict() {
        let fx = Fixture::new();
        fx.engine
            .check_in(&fx.actor, &fx.tenant, &fx.apollo, None)
            .unwrap();
        let err = fx
            .engine
            .check_in(&fx.actor, &fx.tenant, &fx.apollo, None)
            .unwrap_err();
        assert_eq!(
            err.conflict_reason(),
            Some(&ConflictReason::DuplicateSession)
        );
    }

    #[test]
    fn project_from_another_tenant_is_not_found() {
        let fx = Fixture::new();
        let globex = TenantId::new("globex").unwrap();
        let err = fx
            .engine
            .check_in(&fx.actor, &globex, &fx.apollo, None)
            .unwrap_err();
        assert!(matches!(err, TimeError::NotFound(_)));
        assert!(fx.cache.is_empty());
    }

    #[test]
    fn reaper_finalizes_stale_sqlite_sessions() {
        let fx = Fixture::new();
        fx.engine
            .check_in(&fx.actor, &fx.tenant, &fx.apollo, None)
            .unwrap();
        fx.advance(2 * 24 * 60 * 60);

        let reaper = StaleSessionReaper::new(
            fx.store.clone(),
            fx.cache.clone(),
            fx.clock.clone(),
            ReaperConfig::default(),
        );
        let report = reaper.sweep().unwrap();
        assert_eq!(report.finalized, 1);

        let stored = fx
            .store
            .list_for_actor_day(&fx.tenant, &fx.actor, start().date_naive())
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].is_checked_out);
        assert_eq!(stored[0].total_duration_sec, Some(2 * 24 * 60 * 60));
    }
}
