use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::session::Session;

/// Every observable state change in the core produces an Event.
/// Notification, exporters and UI subscribe to them; none of them is
/// consulted by the core itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    SessionStarted {
        session: Session,
        at: DateTime<Utc>,
    },
    SessionPaused {
        session: Session,
        at: DateTime<Utc>,
    },
    /// Countdown reached zero; carries the closed session.
    SessionCompleted {
        session: Session,
        at: DateTime<Utc>,
    },
    /// Timer forcibly returned to idle.
    TimerReset {
        closed: Option<Session>,
        at: DateTime<Utc>,
    },
    /// The session collection changed; carries the full current list.
    StoreChanged {
        sessions: Vec<Session>,
        at: DateTime<Utc>,
    },
}

const EVENT_CAPACITY: usize = 64;

/// Fan-out for [`Event`]s.
///
/// Subscribers receive every event published after they subscribed; dropping
/// the receiver unsubscribes. Publishing never blocks and never fails when
/// nobody listens.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: Event) {
        // Err only means there are no subscribers right now.
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.publish(Event::TimerReset { closed: None, at: Utc::now() });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn subscribers_see_events_and_unsubscribe_on_drop() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(Event::StoreChanged { sessions: vec![], at: Utc::now() });
        match rx.try_recv().unwrap() {
            Event::StoreChanged { sessions, .. } => assert!(sessions.is_empty()),
            other => panic!("unexpected event: {other:?}"),
        }
        drop(rx);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(Event::TimerReset { closed: None, at: Utc::now() }).unwrap();
        assert_eq!(json["type"], "TimerReset");
    }
}
