//! # Event bus for broadcasting lifecycle events.
//!
//! [`Bus`] is a thin wrapper around [`tokio::sync::broadcast`]. The supervisor
//! loop is the only publisher; a listener task forwards to the
//! [`SubscriberSet`](crate::SubscriberSet).
//!
//! ```text
//! Supervisor loop ──publish──► Bus ──► listener ──► SubscriberSet ──► LogWriter, ...
//! ```
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` never blocks, so the supervisor loop never
//!   waits on a slow subscriber.
//! - **Bounded capacity**: receivers that fall behind observe `RecvError::Lagged(n)`.
//! - **No persistence**: events are lost if there are no active receivers at send time.

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for lifecycle events.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a new bus with the given channel capacity (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<Event>(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event to all active receivers.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates a new receiver that will observe subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    #[tokio::test]
    async fn test_receivers_see_events_published_after_subscribe() {
        let bus = Bus::new(0);
        bus.publish(Event::new(EventKind::JobAdded));
        let mut rx = bus.subscribe();
        bus.publish(Event::new(EventKind::JobRemoved).with_job("7"));
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::JobRemoved);
        assert_eq!(ev.job.as_deref(), Some("7"));
    }
}
