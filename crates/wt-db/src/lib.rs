//! Storage layer for the work-time tracker.
//!
//! Provides persistence for timer sessions and the project registry using
//! `rusqlite`.
//!
//! # Thread Safety
//!
//! The [`Database`] type wraps a `rusqlite::Connection`, which is `Send` but not `Sync`.
//! [`SqliteStore`] puts it behind a `Mutex` so the engine and the reaper can share
//! one connection; every store call holds the lock for a single statement or
//! transaction.
//!
//! # Schema
//!
//! ## Timestamp Format
//!
//! Timestamps are stored as TEXT in RFC 3339 with fixed nanosecond precision
//! (e.g., `2025-01-15T10:30:00.000000000Z`), so lexicographic ordering matches
//! chronological ordering and no sub-second precision is lost between a write
//! and the next elapsed-time computation. Calendar dates are `YYYY-MM-DD`.
//!
//! ## Open-session invariants
//!
//! Two partial unique indexes enforce, atomically with the write:
//! - at most one open session per tenant/actor/project/day
//! - at most one running session per tenant/actor/day

mod store;

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};
use thiserror::Error;
use wt_core::{
    ActorId, ClosedBy, ProjectId, ProjectRef, SessionId, StoreError, SubTaskId, TenantId,
    TimerSession,
};

pub use store::SqliteStore;

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Failed to parse a stored timestamp.
    #[error("invalid {column} for row {row_id}: {value}")]
    TimestampParse {
        row_id: String,
        column: &'static str,
        value: String,
        #[source]
        source: chrono::ParseError,
    },
    /// A stored value failed domain validation.
    #[error("invalid row {row_id}: {message}")]
    InvalidRow { row_id: String, message: String },
}

impl DbError {
    fn sqlite_code(&self) -> Option<ErrorCode> {
        match self {
            Self::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => Some(err.code),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        match err.sqlite_code() {
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => Self::Transient {
                message: err.to_string(),
            },
            Some(ErrorCode::ConstraintViolation) => Self::Conflict {
                message: err.to_string(),
            },
            _ => Self::backend(err),
        }
    }
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct Database {
    conn: Connection,
}

const SESSION_COLUMNS: &str = "
    id, tenant_id, actor_id, project_id, sub_task_id, calendar_date,
    check_in_at, is_running, is_checked_out, check_out_at,
    paused_duration_sec, last_paused_at, total_duration_sec,
    effective_elapsed_sec, closed_by
";

/// A `timer_sessions` row before domain validation.
struct SessionRow {
    id: String,
    tenant_id: String,
    actor_id: String,
    project_id: String,
    sub_task_id: Option<String>,
    calendar_date: String,
    check_in_at: String,
    is_running: bool,
    is_checked_out: bool,
    check_out_at: Option<String>,
    paused_duration_sec: i64,
    last_paused_at: Option<String>,
    total_duration_sec: Option<i64>,
    effective_elapsed_sec: i64,
    closed_by: Option<String>,
}

impl SessionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            actor_id: row.get(2)?,
            project_id: row.get(3)?,
            sub_task_id: row.get(4)?,
            calendar_date: row.get(5)?,
            check_in_at: row.get(6)?,
            is_running: row.get(7)?,
            is_checked_out: row.get(8)?,
            check_out_at: row.get(9)?,
            paused_duration_sec: row.get(10)?,
            last_paused_at: row.get(11)?,
            total_duration_sec: row.get(12)?,
            effective_elapsed_sec: row.get(13)?,
            closed_by: row.get(14)?,
        })
    }

    fn into_session(self) -> Result<TimerSession, DbError> {
        let row_id = self.id.clone();
        let invalid = |err: wt_core::ValidationError| DbError::InvalidRow {
            row_id: row_id.clone(),
            message: err.to_string(),
        };
        let calendar_date = self
            .calendar_date
            .parse::<NaiveDate>()
            .map_err(|source| DbError::TimestampParse {
                row_id: row_id.clone(),
                column: "calendar_date",
                value: self.calendar_date.clone(),
                source,
            })?;
        let parse_opt = |column: &'static str, value: Option<String>| {
            value
                .map(|v| parse_timestamp(&v, column, &row_id))
                .transpose()
        };

        Ok(TimerSession {
            id: SessionId::new(self.id.clone()).map_err(invalid)?,
            tenant_id: TenantId::new(self.tenant_id).map_err(invalid)?,
            actor_id: ActorId::new(self.actor_id).map_err(invalid)?,
            project_id: ProjectId::new(self.project_id).map_err(invalid)?,
            sub_task_id: self
                .sub_task_id
                .map(SubTaskId::new)
                .transpose()
                .map_err(invalid)?,
            calendar_date,
            check_in_at: parse_timestamp(&self.check_in_at, "check_in_at", &row_id)?,
            is_running: self.is_running,
            is_checked_out: self.is_checked_out,
            check_out_at: parse_opt("check_out_at", self.check_out_at)?,
            paused_duration_sec: self.paused_duration_sec,
            last_paused_at: parse_opt("last_paused_at", self.last_paused_at)?,
            total_duration_sec: self.total_duration_sec,
            effective_elapsed_sec: self.effective_elapsed_sec,
            closed_by: self
                .closed_by
                .map(|v| v.parse::<ClosedBy>())
                .transpose()
                .map_err(invalid)?,
        })
    }
}

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The database schema is automatically initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        let db = Self { conn };
        db.init()?;
        tracing::debug!(path = %path.display(), "opened database");
        Ok(db)
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// How long a statement waits on a locked database before failing with
    /// `SQLITE_BUSY`.
    pub fn set_busy_timeout(&self, timeout: Duration) -> Result<(), DbError> {
        self.conn.busy_timeout(timeout)?;
        Ok(())
    }

    /// Initializes the database schema.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    fn init(&self) -> Result<(), DbError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS projects (
                tenant_id TEXT NOT NULL,
                project_id TEXT NOT NULL,
                title TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (tenant_id, project_id)
            );

            -- One row per check-in attempt.
            -- calendar_date: 'YYYY-MM-DD' in the engine's configured offset
            -- *_at: RFC 3339 with nanoseconds, UTC
            CREATE TABLE IF NOT EXISTS timer_sessions (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                actor_id TEXT NOT NULL,
                project_id TEXT NOT NULL,
                sub_task_id TEXT,
                calendar_date TEXT NOT NULL,
                check_in_at TEXT NOT NULL,
                is_running INTEGER NOT NULL,
                is_checked_out INTEGER NOT NULL DEFAULT 0,
                check_out_at TEXT,
                paused_duration_sec INTEGER NOT NULL DEFAULT 0,
                last_paused_at TEXT,
                total_duration_sec INTEGER,
                effective_elapsed_sec INTEGER NOT NULL DEFAULT 0,
                closed_by TEXT,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_actor_day
                ON timer_sessions(tenant_id, actor_id, calendar_date);
            CREATE INDEX IF NOT EXISTS idx_sessions_actor_state
                ON timer_sessions(tenant_id, actor_id, is_running, is_checked_out);
            CREATE INDEX IF NOT EXISTS idx_sessions_open_date
                ON timer_sessions(is_checked_out, calendar_date);

            CREATE UNIQUE INDEX IF NOT EXISTS uq_sessions_open_project
                ON timer_sessions(tenant_id, actor_id, project_id, calendar_date)
                WHERE is_checked_out = 0;
            CREATE UNIQUE INDEX IF NOT EXISTS uq_sessions_running_actor
                ON timer_sessions(tenant_id, actor_id, calendar_date)
                WHERE is_running = 1 AND is_checked_out = 0;
            ",
        )?;
        Ok(())
    }

    /// Creates or renames a project.
    pub fn upsert_project(&self, project: &ProjectRef, now: DateTime<Utc>) -> Result<(), DbError> {
        let now = format_timestamp(now);
        self.conn.execute(
            "
            INSERT INTO projects (tenant_id, project_id, title, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(tenant_id, project_id) DO UPDATE SET
                title = excluded.title,
                updated_at = excluded.updated_at
            ",
            params![
                project.tenant_id.as_str(),
                project.project_id.as_str(),
                project.title,
                now,
                now
            ],
        )?;
        Ok(())
    }

    pub fn find_project(
        &self,
        project_id: &ProjectId,
        tenant_id: &TenantId,
    ) -> Result<Option<ProjectRef>, DbError> {
        let row = self
            .conn
            .query_row(
                "SELECT title FROM projects WHERE tenant_id = ? AND project_id = ?",
                params![tenant_id.as_str(), project_id.as_str()],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(row.map(|title| ProjectRef {
            project_id: project_id.clone(),
            tenant_id: tenant_id.clone(),
            title,
        }))
    }

    /// Lists a tenant's projects ordered by ID.
    pub fn list_projects(&self, tenant_id: &TenantId) -> Result<Vec<ProjectRef>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT project_id, title FROM projects WHERE tenant_id = ? ORDER BY project_id ASC",
        )?;
        let rows = stmt.query_map([tenant_id.as_str()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut projects = Vec::new();
        for row in rows {
            let (project_id, title) = row?;
            projects.push(ProjectRef {
                project_id: ProjectId::new(project_id.clone()).map_err(|err| {
                    DbError::InvalidRow {
                        row_id: project_id,
                        message: err.to_string(),
                    }
                })?,
                tenant_id: tenant_id.clone(),
                title,
            });
        }
        Ok(projects)
    }

    /// Inserts a new session.
    ///
    /// Violating either open-session index fails with a constraint error.
    pub fn insert_session(
        &self,
        session: &TimerSession,
        now: DateTime<Utc>,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "
            INSERT INTO timer_sessions
            (id, tenant_id, actor_id, project_id, sub_task_id, calendar_date,
             check_in_at, is_running, is_checked_out, check_out_at,
             paused_duration_sec, last_paused_at, total_duration_sec,
             effective_elapsed_sec, closed_by, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
            params![
                session.id.as_str(),
                session.tenant_id.as_str(),
                session.actor_id.as_str(),
                session.project_id.as_str(),
                session.sub_task_id.as_ref().map(SubTaskId::as_str),
                format_date(session.calendar_date),
                format_timestamp(session.check_in_at),
                session.is_running,
                session.is_checked_out,
                session.check_out_at.map(format_timestamp),
                session.paused_duration_sec,
                session.last_paused_at.map(format_timestamp),
                session.total_duration_sec,
                session.effective_elapsed_sec,
                session.closed_by.map(|c| c.as_str()),
                format_timestamp(now),
            ],
        )?;
        Ok(())
    }

    /// Writes the mutable fields of a session whose stored row is still open.
    ///
    /// Returns `false` if the row is checked out or does not exist.
    pub fn update_open_session(
        &self,
        session: &TimerSession,
        now: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let changed = self.conn.execute(
            "
            UPDATE timer_sessions SET
                is_running = ?,
                is_checked_out = ?,
                check_out_at = ?,
                paused_duration_sec = ?,
                last_paused_at = ?,
                total_duration_sec = ?,
                effective_elapsed_sec = ?,
                closed_by = ?,
                updated_at = ?
            WHERE id = ? AND is_checked_out = 0
            ",
            params![
                session.is_running,
                session.is_checked_out,
                session.check_out_at.map(format_timestamp),
                session.paused_duration_sec,
                session.last_paused_at.map(format_timestamp),
                session.total_duration_sec,
                session.effective_elapsed_sec,
                session.closed_by.map(|c| c.as_str()),
                format_timestamp(now),
                session.id.as_str(),
            ],
        )?;
        Ok(changed == 1)
    }

    pub fn get_session(&self, id: &SessionId) -> Result<Option<TimerSession>, DbError> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM timer_sessions WHERE id = ?"),
                [id.as_str()],
                SessionRow::from_row,
            )
            .optional()?;
        row.map(SessionRow::into_session).transpose()
    }

    pub fn find_open_session(
        &self,
        tenant: &TenantId,
        actor: &ActorId,
        project: &ProjectId,
        date: NaiveDate,
    ) -> Result<Option<TimerSession>, DbError> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "
                    SELECT {SESSION_COLUMNS} FROM timer_sessions
                    WHERE tenant_id = ? AND actor_id = ? AND project_id = ?
                      AND calendar_date = ? AND is_checked_out = 0
                    "
                ),
                params![
                    tenant.as_str(),
                    actor.as_str(),
                    project.as_str(),
                    format_date(date)
                ],
                SessionRow::from_row,
            )
            .optional()?;
        row.map(SessionRow::into_session).transpose()
    }

    /// Open sessions of an actor on a day, oldest check-in first.
    pub fn list_open_sessions_for_actor(
        &self,
        tenant: &TenantId,
        actor: &ActorId,
        date: NaiveDate,
    ) -> Result<Vec<TimerSession>, DbError> {
        self.query_sessions(
            "tenant_id = ? AND actor_id = ? AND calendar_date = ? AND is_checked_out = 0",
            &[tenant.as_str(), actor.as_str(), format_date(date).as_str()],
        )
    }

    /// All sessions of an actor on a day, oldest check-in first.
    pub fn list_sessions_for_actor_day(
        &self,
        tenant: &TenantId,
        actor: &ActorId,
        date: NaiveDate,
    ) -> Result<Vec<TimerSession>, DbError> {
        self.query_sessions(
            "tenant_id = ? AND actor_id = ? AND calendar_date = ?",
            &[tenant.as_str(), actor.as_str(), format_date(date).as_str()],
        )
    }

    /// Open sessions dated before `before`; running only unless `include_paused`.
    pub fn list_stale_sessions(
        &self,
        before: NaiveDate,
        include_paused: bool,
    ) -> Result<Vec<TimerSession>, DbError> {
        let filter = if include_paused {
            "is_checked_out = 0 AND calendar_date < ?"
        } else {
            "is_checked_out = 0 AND is_running = 1 AND calendar_date < ?"
        };
        self.query_sessions(filter, &[format_date(before).as_str()])
    }

    fn query_sessions(&self, filter: &str, args: &[&str]) -> Result<Vec<TimerSession>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM timer_sessions WHERE {filter} ORDER BY check_in_at ASC, id ASC"
        ))?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args), SessionRow::from_row)?;
        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?.into_session()?);
        }
        Ok(sessions)
    }
}

fn parse_timestamp(
    timestamp: &str,
    column: &'static str,
    row_id: &str,
) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|source| DbError::TimestampParse {
            row_id: row_id.to_string(),
            column,
            value: timestamp.to_string(),
            source,
        })
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}
