//! Session lifecycle events for downstream consumers (notifications, billing).

use tokio::sync::broadcast;

use crate::session::{SessionSnapshot, TimerSession};

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    CheckedIn(TimerSession),
    Paused(TimerSession),
    Resumed(TimerSession),
    CheckedOut {
        session: TimerSession,
        snapshot: SessionSnapshot,
    },
    /// Finalized by the stale session reaper rather than the actor.
    Reaped(TimerSession),
}

impl SessionEvent {
    pub const fn session(&self) -> &TimerSession {
        match self {
            Self::CheckedIn(session)
            | Self::Paused(session)
            | Self::Resumed(session)
            | Self::Reaped(session)
            | Self::CheckedOut { session, .. } => session,
        }
    }

    pub const fn kind(&self) -> &'static str {
        match self {
            Self::CheckedIn(_) => "checked_in",
            Self::Paused(_) => "paused",
            Self::Resumed(_) => "resumed",
            Self::CheckedOut { .. } => "checked_out",
            Self::Reaped(_) => "reaped",
        }
    }
}

/// Fan-out of lifecycle events. Cheap to clone; all clones share a channel.
#[derive(Debug, Clone)]
pub struct SessionEvents {
    tx: broadcast::Sender<SessionEvent>,
}

impl Default for SessionEvents {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl SessionEvents {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Publishes to current subscribers. Having none is not an error.
    pub fn publish(&self, event: SessionEvent) {
        let kind = event.kind();
        if self.tx.send(event).is_err() {
            tracing::trace!(kind, "no subscribers for session event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{NaiveDate, TimeZone, Utc};

    use crate::session::SessionKey;
    use crate::types::{ActorId, ProjectId, TenantId};

    fn session() -> TimerSession {
        let key = SessionKey::new(
            &TenantId::new("acme").unwrap(),
            &ActorId::new("alice").unwrap(),
            &ProjectId::new("apollo").unwrap(),
            NaiveDate::from_ymd_opt(2025, 3, 3).unwrap(),
        );
        TimerSession::start(&key, None, Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap())
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        let events = SessionEvents::default();
        events.publish(SessionEvent::CheckedIn(session()));
    }

    #[test]
    fn clones_share_one_channel() {
        let events = SessionEvents::new(4);
        let mut rx = events.subscribe();
        let publisher = events.clone();

        let s = session();
        publisher.publish(SessionEvent::Paused(s.clone()));

        let received = rx.try_recv().unwrap();
        assert_eq!(received.kind(), "paused");
        assert_eq!(received.session(), &s);
    }
}
