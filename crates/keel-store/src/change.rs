use tokio::sync::broadcast;
use tracing::debug;

use keel_types::StorageKey;

/// Default capacity of a store's change feed.
pub const DEFAULT_FEED_CAPACITY: usize = 1024;

/// A store-wide change notification.
///
/// Names the keys touched by one `set_many`. It carries no values: a
/// consumer that cares about a key refetches it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageChange {
    pub keys: Vec<StorageKey>,
}

impl StorageChange {
    pub fn new(keys: Vec<StorageKey>) -> Self {
        Self { keys }
    }

    /// Returns `true` if this change names `key`.
    pub fn touches(&self, key: &StorageKey) -> bool {
        self.keys.contains(key)
    }
}

/// A broadcast channel receiver for store changes.
pub type ChangeStream = broadcast::Receiver<StorageChange>;

/// Fan-out of [`StorageChange`] events to every subscriber of a store.
///
/// Slow subscribers that fall more than the feed capacity behind observe
/// `RecvError::Lagged` and must treat every key as changed.
#[derive(Debug)]
pub struct ChangeFeed {
    sender: broadcast::Sender<StorageChange>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> ChangeStream {
        self.sender.subscribe()
    }

    /// Publish a change. Returns the number of subscribers it reached; a
    /// store with nobody listening is not an error.
    pub fn publish(&self, change: StorageChange) -> usize {
        let keys = change.keys.len();
        let reached = self.sender.send(change).unwrap_or(0);
        debug!(keys, reached, "storage change published");
        reached
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(DEFAULT_FEED_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_subscribers() {
        let feed = ChangeFeed::default();
        assert_eq!(feed.publish(StorageChange::new(vec!["a".into()])), 0);
    }

    #[test]
    fn every_subscriber_sees_every_change() {
        let feed = ChangeFeed::default();
        let mut rx1 = feed.subscribe();
        let mut rx2 = feed.subscribe();
        assert_eq!(feed.subscriber_count(), 2);

        let change = StorageChange::new(vec!["x".into(), "y".into()]);
        assert_eq!(feed.publish(change.clone()), 2);

        assert_eq!(rx1.try_recv().unwrap(), change);
        assert_eq!(rx2.try_recv().unwrap(), change);
    }

    #[test]
    fn slow_subscriber_lags() {
        let feed = ChangeFeed::new(2);
        let mut rx = feed.subscribe();
        for i in 0..5 {
            feed.publish(StorageChange::new(vec![format!("k{i}").into()]));
        }
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Lagged(_))
        ));
    }

    #[test]
    fn touches() {
        let change = StorageChange::new(vec!["a".into()]);
        assert!(change.touches(&"a".into()));
        assert!(!change.touches(&"b".into()));
    }
}
