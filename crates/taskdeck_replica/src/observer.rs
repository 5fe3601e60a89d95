//! Outbox observer: notifies subscribers when local rows turn dirty.
//!
//! The observer decouples the push path from any particular reactive-query
//! mechanism: the store counts rows with `synced = false` after each tracked
//! local commit and emits the count here. A positive count is the signal the
//! push orchestrator waits for. Replication-origin writes never reach the
//! observer (see [`crate::tracking`]).

use parking_lot::RwLock;
use std::sync::mpsc::{self, Receiver, Sender};

/// A notification that the outbox contains dirty rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboxNotification {
    /// Number of rows with `synced = false` at the time of the commit.
    pub dirty_rows: u64,
}

/// Distributes outbox notifications to subscribers.
///
/// Disconnected subscribers are dropped on the next notification, the same
/// way a change feed prunes dead receivers.
#[derive(Debug, Default)]
pub struct OutboxObserver {
    subscribers: RwLock<Vec<Sender<OutboxNotification>>>,
}

impl OutboxObserver {
    /// Creates a new observer with no subscribers.
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Subscribes to outbox notifications.
    ///
    /// Returns a receiver that will see every future notification.
    pub fn subscribe(&self) -> Receiver<OutboxNotification> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Notifies all subscribers that `dirty_rows` rows await a push.
    pub fn notify(&self, dirty_rows: u64) {
        let notification = OutboxNotification { dirty_rows };
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(notification).is_ok());
    }

    /// Returns the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn notify_and_receive() {
        let observer = OutboxObserver::new();
        let rx = observer.subscribe();

        observer.notify(3);

        let n = rx.recv_timeout(Duration::from_millis(100)).unwrap();
        assert_eq!(n.dirty_rows, 3);
    }

    #[test]
    fn multiple_subscribers() {
        let observer = OutboxObserver::new();
        let rx1 = observer.subscribe();
        let rx2 = observer.subscribe();

        observer.notify(1);

        assert_eq!(rx1.recv().unwrap().dirty_rows, 1);
        assert_eq!(rx2.recv().unwrap().dirty_rows, 1);
    }

    #[test]
    fn disconnected_subscriber_pruned() {
        let observer = OutboxObserver::new();
        let rx = observer.subscribe();
        assert_eq!(observer.subscriber_count(), 1);

        drop(rx);
        observer.notify(1);
        assert_eq!(observer.subscriber_count(), 0);
    }
}
