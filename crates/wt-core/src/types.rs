//! Core type definitions with validation.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for caller-supplied input.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The provided value was empty or whitespace-only.
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },

    /// The value has leading or trailing whitespace.
    #[error("{field} must not have surrounding whitespace: {value:?}")]
    Untrimmed { field: &'static str, value: String },

    /// Invalid `closed_by` value read back from storage or input.
    #[error("invalid closed-by value: {value}")]
    InvalidClosedBy { value: String },

    /// A calendar date could not be parsed.
    #[error("invalid date {value:?}, expected YYYY-MM-DD")]
    InvalidDate { value: String },
}

/// Who finalized a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClosedBy {
    /// The actor checked out.
    Actor,
    /// The stale session reaper finalized it.
    Reaper,
}

impl ClosedBy {
    /// String representation for database storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Actor => "actor",
            Self::Reaper => "reaper",
        }
    }
}

impl fmt::Display for ClosedBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ClosedBy {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "actor" => Ok(Self::Actor),
            "reaper" => Ok(Self::Reaper),
            _ => Err(ValidationError::InvalidClosedBy {
                value: s.to_string(),
            }),
        }
    }
}

/// Parses a calendar day written as `YYYY-MM-DD`.
pub fn parse_calendar_date(value: &str) -> Result<NaiveDate, ValidationError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| ValidationError::InvalidDate {
        value: value.to_string(),
    })
}

/// Generates a validated string ID newtype with common trait implementations.
macro_rules! define_string_id {
    (
        $(#[$meta:meta])*
        $name:ident, $field_name:literal
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Creates a new ID after validation.
            pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
                let id = id.into();
                if id.trim().is_empty() {
                    return Err(ValidationError::Empty { field: $field_name });
                }
                if id.trim() != id {
                    return Err(ValidationError::Untrimmed {
                        field: $field_name,
                        value: id,
                    });
                }
                Ok(Self(id))
            }

            /// Returns the ID as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::str::FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_string_id!(
    /// The authenticated worker tracking time.
    ActorId, "actor ID"
);

define_string_id!(
    /// The owning organization. Every session and project is scoped to one.
    TenantId, "tenant ID"
);

define_string_id!(
    /// A project in the external registry.
    ProjectId, "project ID"
);

define_string_id!(
    /// Optional sub-task a session is associated with. Informational only.
    SubTaskId, "sub-task ID"
);

define_string_id!(
    /// Identifier of a stored timer session.
    SessionId, "session ID"
);

impl SessionId {
    /// Generates a fresh random session ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}
