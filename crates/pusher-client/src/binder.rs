//! Event bindings: per-event-name bounded delivery queues.

use std::collections::HashMap;

use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;

use crate::types::{Error, Event};

pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Receiving end of a bound event name.
///
/// Yields events in the order they arrived on the connection. Returns `None`
/// once the binding is removed with [`Session::unbind`](crate::Session::unbind)
/// or the session closes, after any buffered events have been drained.
#[derive(Debug)]
pub struct Binding {
    name: String,
    rx: mpsc::Receiver<Event>,
}

impl Binding {
    /// The event name this binding receives.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Receive the next event.
    pub async fn next(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Receive a buffered event without waiting.
    pub fn try_next(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }
}

/// Result of handing one event to the registry.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Delivery {
    Delivered,
    /// No binding for this event name; the event is dropped.
    Unbound,
    /// The caller dropped its [`Binding`] without unbinding.
    ReceiverGone,
    /// The transport closed while waiting for queue capacity.
    Interrupted,
}

/// Event name → delivery queue.
///
/// The dispatch loop reads under the shared lock; bind, unbind and close take
/// the exclusive lock.
#[derive(Debug)]
pub(crate) struct BinderRegistry {
    binders: RwLock<HashMap<String, mpsc::Sender<Event>>>,
    capacity: usize,
}

impl BinderRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            binders: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Fails with [`Error::Closed`] once `closed` has fired. Checked under the
    /// exclusive lock, so a binding is either refused or later closed by
    /// [`close_all`](Self::close_all).
    ///
    /// An entry whose [`Binding`] was dropped without unbinding is replaced.
    pub async fn bind(&self, name: &str, closed: &CancellationToken) -> Result<Binding, Error> {
        let mut binders = self.binders.write().await;
        if closed.is_cancelled() {
            return Err(Error::Closed);
        }
        if binders.get(name).is_some_and(|tx| !tx.is_closed()) {
            return Err(Error::AlreadyBound(name.to_string()));
        }
        let (tx, rx) = mpsc::channel(self.capacity);
        binders.insert(name.to_string(), tx);
        Ok(Binding {
            name: name.to_string(),
            rx,
        })
    }

    /// Remove the binding. Dropping the registry's sender closes the queue.
    pub async fn unbind(&self, name: &str) -> bool {
        self.binders.write().await.remove(name).is_some()
    }

    /// Whether `name` has a live binding.
    pub async fn is_bound(&self, name: &str) -> bool {
        self.binders
            .read()
            .await
            .get(name)
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Route `event` to the queue bound to its name.
    ///
    /// Holds the shared lock while waiting for queue capacity, so a full queue
    /// blocks the caller until the consumer catches up or `closed` fires.
    pub async fn deliver(&self, event: Event, closed: &CancellationToken) -> Delivery {
        let binders = self.binders.read().await;
        let Some(tx) = binders.get(event.name.as_str()) else {
            return Delivery::Unbound;
        };
        tokio::select! {
            biased;
            _ = closed.cancelled() => Delivery::Interrupted,
            res = tx.send(event) => match res {
                Ok(()) => Delivery::Delivered,
                Err(_) => Delivery::ReceiverGone,
            },
        }
    }

    /// Remove every binding, closing all outstanding queues. Returns how many
    /// were closed.
    pub async fn close_all(&self) -> usize {
        let mut binders = self.binders.write().await;
        let closed = binders.len();
        binders.clear();
        closed
    }
}
