//! Subscription registry and pending subscribe confirmations.

use std::collections::{HashMap, HashSet};
use std::future::Future;

use tokio::sync::{Mutex, oneshot};

use crate::types::Error;

/// Set of channels this session has joined.
///
/// A channel appears at most once. [`join`](Self::join) and
/// [`leave`](Self::leave) hold the lock from the membership check through the
/// network send to the update, so a duplicate request is rejected before any
/// I/O and concurrent callers never both reach the wire.
#[derive(Debug, Default)]
pub(crate) struct SubscriptionRegistry {
    channels: Mutex<HashSet<String>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, channel: &str) -> bool {
        self.channels.lock().await.contains(channel)
    }

    /// Record `channel` once `send` succeeds.
    ///
    /// Fails with [`Error::AlreadySubscribed`] without calling `send` if the
    /// channel is already present. A failed `send` leaves the set unchanged.
    pub async fn join<T, F, Fut>(&self, channel: &str, send: F) -> Result<T, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let mut channels = self.channels.lock().await;
        if channels.contains(channel) {
            return Err(Error::AlreadySubscribed(channel.to_string()));
        }
        let sent = send().await?;
        channels.insert(channel.to_string());
        Ok(sent)
    }

    /// Forget `channel` once `send` succeeds.
    ///
    /// Fails with [`Error::NotSubscribed`] without calling `send` if the
    /// channel is absent. A failed `send` leaves the set unchanged.
    pub async fn leave<F, Fut>(&self, channel: &str, send: F) -> Result<(), Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), Error>>,
    {
        let mut channels = self.channels.lock().await;
        if !channels.contains(channel) {
            return Err(Error::NotSubscribed(channel.to_string()));
        }
        send().await?;
        channels.remove(channel);
        Ok(())
    }

    /// Returns whether the channel was present.
    pub async fn remove(&self, channel: &str) -> bool {
        self.channels.lock().await.remove(channel)
    }

    pub async fn channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.channels.lock().await.iter().cloned().collect();
        channels.sort();
        channels
    }
}

/// Outcome reported by the dispatch loop to a confirmed subscribe.
/// `Err` carries the raw `pusher:subscription_error` payload.
pub(crate) type Confirmation = Result<(), String>;

/// Waiters for `pusher_internal:subscription_succeeded`, keyed by channel.
#[derive(Debug, Default)]
pub(crate) struct PendingSubscriptions {
    waiters: Mutex<HashMap<String, oneshot::Sender<Confirmation>>>,
}

impl PendingSubscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter. Returns `None` if one is already pending for `channel`.
    pub async fn register(&self, channel: &str) -> Option<oneshot::Receiver<Confirmation>> {
        let mut waiters = self.waiters.lock().await;
        if waiters.contains_key(channel) {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        waiters.insert(channel.to_string(), tx);
        Some(rx)
    }

    /// Wake the waiter for `channel`, if any.
    pub async fn resolve(&self, channel: &str, outcome: Confirmation) {
        if let Some(tx) = self.waiters.lock().await.remove(channel) {
            let _ = tx.send(outcome);
        }
    }

    pub async fn cancel(&self, channel: &str) {
        self.waiters.lock().await.remove(channel);
    }

    /// Drop every waiter; their receivers observe closure.
    pub async fn clear(&self) {
        self.waiters.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    async fn sent(count: &AtomicUsize) -> Result<(), Error> {
        count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    #[tokio::test]
    async fn join_rejects_duplicates_before_sending() {
        let registry = SubscriptionRegistry::new();
        let sends = AtomicUsize::new(0);
        registry.join("orders", || sent(&sends)).await.unwrap();
        assert!(registry.contains("orders").await);

        let err = registry.join("orders", || sent(&sends)).await.unwrap_err();
        assert!(matches!(err, Error::AlreadySubscribed(c) if c == "orders"));
        assert_eq!(sends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_joins_send_once() {
        let registry = SubscriptionRegistry::new();
        let counter = AtomicUsize::new(0);
        let sends = &counter;
        let slow_send = move || async move {
            sends.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok::<(), Error>(())
        };

        let (a, b) = tokio::join!(
            registry.join("orders", slow_send),
            registry.join("orders", slow_send),
        );
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(a.is_ok() != b.is_ok());
        assert!(matches!(a.err().or(b.err()), Some(Error::AlreadySubscribed(_))));
    }

    #[tokio::test]
    async fn failed_send_records_nothing() {
        let registry = SubscriptionRegistry::new();
        let err = registry
            .join("orders", || async { Err::<(), _>(Error::Closed) })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Closed));
        assert!(!registry.contains("orders").await);
    }

    #[tokio::test]
    async fn leave_requires_membership() {
        let registry = SubscriptionRegistry::new();
        let sends = AtomicUsize::new(0);
        let err = registry.leave("orders", || sent(&sends)).await.unwrap_err();
        assert!(matches!(err, Error::NotSubscribed(c) if c == "orders"));
        assert_eq!(sends.load(Ordering::SeqCst), 0);

        registry.join("orders", || sent(&sends)).await.unwrap();
        registry.leave("orders", || sent(&sends)).await.unwrap();
        assert!(!registry.contains("orders").await);
        assert_eq!(sends.load(Ordering::SeqCst), 2);

        // Re-join after leaving is allowed.
        registry.join("orders", || sent(&sends)).await.unwrap();
    }

    #[tokio::test]
    async fn remove_reports_presence() {
        let registry = SubscriptionRegistry::new();
        let sends = AtomicUsize::new(0);
        assert!(!registry.remove("orders").await);
        registry.join("orders", || sent(&sends)).await.unwrap();
        assert!(registry.remove("orders").await);
    }

    #[tokio::test]
    async fn channels_are_sorted() {
        let registry = SubscriptionRegistry::new();
        let sends = AtomicUsize::new(0);
        registry.join("b", || sent(&sends)).await.unwrap();
        registry.join("a", || sent(&sends)).await.unwrap();
        assert_eq!(registry.channels().await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn pending_resolve_wakes_waiter() {
        let pending = PendingSubscriptions::new();
        let rx = pending.register("c").await.unwrap();
        assert!(pending.register("c").await.is_none());

        pending.resolve("c", Ok(())).await;
        assert_eq!(rx.await.unwrap(), Ok(()));

        // Slot is free again.
        assert!(pending.register("c").await.is_some());
    }

    #[tokio::test]
    async fn pending_resolve_without_waiter_is_noop() {
        let pending = PendingSubscriptions::new();
        pending.resolve("nobody", Err("x".to_string())).await;
    }

    #[tokio::test]
    async fn pending_clear_closes_waiters() {
        let pending = PendingSubscriptions::new();
        let rx = pending.register("c").await.unwrap();
        pending.clear().await;
        assert!(rx.await.is_err());
    }
}
