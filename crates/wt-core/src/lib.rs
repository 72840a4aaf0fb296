//! Core domain logic for the work-time tracker.
//!
//! This crate contains the time-accounting state machine and its collaborators:
//! - Sessions: the elapsed-time formula and per-session transitions
//! - Engine: check-in, pause/resume, check-out and elapsed queries
//! - Projects: tenant-scoped project validation behind a TTL cache
//! - Reaper: background finalization of sessions left open past their day

pub mod clock;
pub mod engine;
mod error;
pub mod events;
pub mod project;
pub mod reaper;
pub mod session;
pub mod store;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{EngineConfig, TimeEngine};
pub use error::{ConflictReason, Missing, RegistryError, StoreError, TimeError};
pub use events::{SessionEvent, SessionEvents};
pub use project::{ProjectCache, ProjectRef, ProjectRegistry, ProjectValidator, StaticRegistry};
pub use reaper::{ReapReport, ReaperConfig, ReaperHandle, StaleSessionReaper};
pub use session::{SessionKey, SessionSnapshot, SessionStatus, SnapshotWarning, TimerSession};
pub use store::{MemorySessionStore, SessionStore};
pub use types::{
    ActorId, ClosedBy, ProjectId, SessionId, SubTaskId, TenantId, ValidationError,
    parse_calendar_date,
};
