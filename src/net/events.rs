//! net/events.rs
//!
//! Observer lists for the notifications a transport publishes. Observers run
//! synchronously on the receive loop that produced the event, before that loop
//! issues its next read. A panicking observer is logged and skipped.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::RwLock;
use smallvec::SmallVec;
use tracing::error;

use super::PeerAddress;

// -----------------------------------------------------------------------------
// ----- InboundMessage --------------------------------------------------------

/// One completed receive unit: a framed stream message or a single datagram.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub sender: Option<PeerAddress>,
    pub payload: Bytes,
}

impl InboundMessage {
    pub fn new(sender: Option<PeerAddress>, payload: Bytes) -> Self {
        Self { sender, payload }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

// -----------------------------------------------------------------------------
// ----- EventHub --------------------------------------------------------------

pub type ObserverId = u64;

type Observer<T> = Arc<dyn Fn(&T) + Send + Sync>;

pub struct EventHub<T> {
    name: &'static str,
    next_id: AtomicU64,
    observers: RwLock<SmallVec<[(ObserverId, Observer<T>); 4]>>,
}

impl<T> EventHub<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            next_id: AtomicU64::new(1),
            observers: RwLock::new(SmallVec::new()),
        }
    }
}

impl<T> fmt::Debug for EventHub<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHub")
            .field("name", &self.name)
            .field("observers", &self.observer_count())
            .finish()
    }
}

// -----------------------------------------------------------------------------
// ----- EventHub: Public Methods ----------------------------------------------

impl<T> EventHub<T> {
    pub fn subscribe<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.observers.write().push((id, Arc::new(observer)));
        id
    }

    /// Subscribe for the lifetime of the returned guard.
    pub fn subscribe_scoped<F>(&self, observer: F) -> ObserverGuard<'_, T>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = self.subscribe(observer);
        ObserverGuard { hub: self, id }
    }

    /// Returns false when `id` was not subscribed.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    pub fn clear(&self) {
        self.observers.write().clear();
    }
}

// -----------------------------------------------------------------------------
// ----- EventHub: Crate Methods -----------------------------------------------

impl<T> EventHub<T> {
    /// Run every observer once, in subscription order.
    pub(crate) fn emit(&self, event: &T) {
        // Snapshot first: observers may (un)subscribe from inside a callback.
        let snapshot: SmallVec<[Observer<T>; 4]> = self
            .observers
            .read()
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();

        for observer in snapshot {
            if catch_unwind(AssertUnwindSafe(|| observer(event))).is_err() {
                error!("{} observer panicked; continuing with the rest", self.name);
            }
        }
    }
}

// -----------------------------------------------------------------------------
// ----- ObserverGuard ---------------------------------------------------------

#[must_use = "the observer is removed as soon as the guard is dropped"]
pub struct ObserverGuard<'a, T> {
    hub: &'a EventHub<T>,
    id: ObserverId,
}

impl<T> Drop for ObserverGuard<'_, T> {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.id);
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
