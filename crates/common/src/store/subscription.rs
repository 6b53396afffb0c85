//! Live query plumbing
//!
//! Every delivery is a complete snapshot of the query result. The channel
//! keeps only the latest snapshot, so a slow reader skips intermediate
//! states instead of queueing them.

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// One push from a live query
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery<T> {
    /// Full current result; replaces everything delivered before
    Snapshot(T),
    /// The query failed; the subscription stays open
    Failed(String),
}

impl<T> Delivery<T> {
    pub fn snapshot(self) -> Option<T> {
        match self {
            Delivery::Snapshot(value) => Some(value),
            Delivery::Failed(_) => None,
        }
    }
}

/// Store-side handle feeding one subscription
#[derive(Debug)]
pub struct Publisher<T> {
    tx: watch::Sender<Option<Delivery<T>>>,
}

impl<T> Clone for Publisher<T> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<T> Publisher<T> {
    /// Push a delivery. Returns false once the subscriber is gone.
    pub fn publish(&self, delivery: Delivery<T>) -> bool {
        self.tx.send(Some(delivery)).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves when the subscriber drops its handle
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

/// Client-side handle of a live query. Dropping it tears the query down.
#[derive(Debug)]
pub struct Subscription<T> {
    rx: watch::Receiver<Option<Delivery<T>>>,
    feeder: Option<JoinHandle<()>>,
}

impl<T: Clone> Subscription<T> {
    /// A connected publisher/subscription pair with nothing delivered yet
    pub fn channel() -> (Publisher<T>, Subscription<T>) {
        let (tx, rx) = watch::channel(None);
        (
            Publisher { tx },
            Subscription { rx, feeder: None },
        )
    }

    /// Tie a background task to this subscription's lifetime
    pub fn with_feeder(mut self, feeder: JoinHandle<()>) -> Self {
        self.feeder = Some(feeder);
        self
    }

    /// Wait for the next delivery. `None` once the store side has closed.
    pub async fn next(&mut self) -> Option<Delivery<T>> {
        loop {
            if self.rx.changed().await.is_err() {
                return None;
            }
            if let Some(delivery) = self.rx.borrow_and_update().clone() {
                return Some(delivery);
            }
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(feeder) = self.feeder.take() {
            feeder.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_latest_snapshot_wins() {
        let (publisher, mut sub) = Subscription::<Vec<u32>>::channel();
        assert!(publisher.publish(Delivery::Snapshot(vec![1])));
        assert!(publisher.publish(Delivery::Snapshot(vec![1, 2])));
        assert_eq!(sub.next().await, Some(Delivery::Snapshot(vec![1, 2])));
    }

    #[tokio::test]
    async fn test_drop_closes_publisher() {
        let (publisher, sub) = Subscription::<u32>::channel();
        assert!(!publisher.is_closed());
        drop(sub);
        assert!(publisher.is_closed());
        assert!(!publisher.publish(Delivery::Snapshot(1)));
    }

    #[tokio::test]
    async fn test_next_returns_none_after_publisher_drop() {
        let (publisher, mut sub) = Subscription::<u32>::channel();
        publisher.publish(Delivery::Snapshot(7));
        drop(publisher);
        assert_eq!(sub.next().await, Some(Delivery::Snapshot(7)));
        assert_eq!(sub.next().await, None);
    }
}
