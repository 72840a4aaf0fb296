//! Error taxonomy for the time engine and its collaborators.

use std::fmt;

use thiserror::Error;

use crate::session::SessionKey;
use crate::types::{ProjectId, TenantId, ValidationError};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failures reported by a [`SessionStore`](crate::store::SessionStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The write would break a uniqueness invariant on open sessions.
    #[error("store rejected write: {message}")]
    Conflict { message: String },
    /// A timeout, lock contention or lost connection. Safe to retry reads.
    #[error("transient store failure: {message}")]
    Transient { message: String },
    /// Anything else from the backend.
    #[error("store failure: {0}")]
    Backend(#[source] BoxError),
}

impl StoreError {
    pub fn backend(err: impl Into<BoxError>) -> Self {
        Self::Backend(err.into())
    }

    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Failures reported by a [`ProjectRegistry`](crate::project::ProjectRegistry).
#[derive(Debug, Error)]
#[error("project registry failure: {0}")]
pub struct RegistryError(#[source] pub BoxError);

impl RegistryError {
    pub fn new(err: impl Into<BoxError>) -> Self {
        Self(err.into())
    }
}

/// What a `NotFound` error refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Missing {
    Project {
        project_id: ProjectId,
        tenant_id: TenantId,
    },
    OpenSession(SessionKey),
}

impl fmt::Display for Missing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Project {
                project_id,
                tenant_id,
            } => write!(f, "project {project_id} not found for tenant {tenant_id}"),
            Self::OpenSession(key) => write!(f, "no open session for {key}"),
        }
    }
}

/// Why a transition was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictReason {
    /// An open session already exists for the same project and day.
    DuplicateSession,
    /// Another project's timer is running for the same actor and day.
    ActiveElsewhere { running_project: ProjectId },
    /// The session was already finalized.
    AlreadyCheckedOut,
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateSession => f.write_str("duplicate session"),
            Self::ActiveElsewhere { running_project } => {
                write!(f, "active elsewhere (project {running_project} is running)")
            }
            Self::AlreadyCheckedOut => f.write_str("already checked out"),
        }
    }
}

/// Errors surfaced by [`TimeEngine`](crate::engine::TimeEngine) operations.
#[derive(Debug, Error)]
pub enum TimeError {
    #[error("invalid input: {0}")]
    Validation(#[from] ValidationError),

    #[error("not found: {0}")]
    NotFound(Missing),

    #[error("conflict for {key}: {reason}")]
    Conflict {
        reason: ConflictReason,
        key: SessionKey,
    },

    /// Stored data contradicts the session invariants.
    #[error("inconsistent session state for {key}: {message}")]
    State { message: String, key: SessionKey },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl TimeError {
    pub const fn conflict(reason: ConflictReason, key: SessionKey) -> Self {
        Self::Conflict { reason, key }
    }

    /// The conflict reason, if this is a conflict.
    pub const fn conflict_reason(&self) -> Option<&ConflictReason> {
        match self {
            Self::Conflict { reason, .. } => Some(reason),
            _ => None,
        }
    }

    /// The session key this error was raised for, when there is one.
    pub const fn key(&self) -> Option<&SessionKey> {
        match self {
            Self::NotFound(Missing::OpenSession(key))
            | Self::Conflict { key, .. }
            | Self::State { key, .. } => Some(key),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::NaiveDate;

    use crate::types::ActorId;

    fn key() -> SessionKey {
        SessionKey::new(
            &TenantId::new("acme").unwrap(),
            &ActorId::new("alice").unwrap(),
            &ProjectId::new("apollo").unwrap(),
            NaiveDate::from_ymd_opt(2025, 3, 3).unwrap(),
        )
    }

    #[test]
    fn conflict_message_names_actor_project_and_date() {
        let err = TimeError::conflict(ConflictReason::DuplicateSession, key());
        assert_eq!(
            err.to_string(),
            "conflict for actor alice on project apollo (tenant acme, 2025-03-03): duplicate session"
        );
        assert_eq!(err.key(), Some(&key()));
    }

    #[test]
    fn store_transient_is_detected() {
        let err = StoreError::Transient {
            message: "database is locked".to_string(),
        };
        assert!(err.is_transient());
        assert!(!StoreError::backend("boom").is_transient());
    }
}
