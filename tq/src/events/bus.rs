//! Event - one-to-many notification channel
//!
//! Each Event wraps a tokio broadcast channel. Firing delivers the value to every
//! receiver subscribed at that moment; nothing is replayed to later subscribers.

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

/// Default channel capacity (notifications buffered per slow subscriber)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// A single kind of notification
pub struct Event<T> {
    name: &'static str,
    tx: broadcast::Sender<T>,
}

impl<T: Clone + Send + 'static> Event<T> {
    /// Create a new event with the given channel capacity
    ///
    /// Panics if `capacity` is 0; callers validate it beforehand.
    pub fn new(name: &'static str, capacity: usize) -> Self {
        debug!(name, capacity, "Event::new: called");
        let (tx, _) = broadcast::channel(capacity);
        Self { name, tx }
    }

    /// Notify all current subscribers
    ///
    /// This is fire-and-forget: with no subscribers the value is dropped.
    /// Slow subscribers lose the oldest buffered values.
    pub fn fire(&self, value: T) {
        // Ignore send errors (no subscribers is OK)
        let _ = self.tx.send(value);
    }

    /// Subscribe to every future firing
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        debug!(name = self.name, "Event::subscribe: new subscriber");
        self.tx.subscribe()
    }

    /// Resolve the next time this event fires after the call
    ///
    /// The subscription is taken eagerly, so a firing between this call and the
    /// first poll of the returned future is not missed. Yields `None` if the
    /// event source is dropped before firing again.
    pub fn once(&self) -> BoxFuture<'static, Option<T>> {
        let name = self.name;
        let mut rx = self.tx.subscribe();
        async move {
            loop {
                match rx.recv().await {
                    Ok(value) => return Some(value),
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(name, skipped, "Event::once: lagged, reading oldest retained value");
                    }
                    Err(RecvError::Closed) => {
                        debug!(name, "Event::once: source dropped");
                        return None;
                    }
                }
            }
        }
        .boxed()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Whether anybody is listening right now
    pub fn has_subscribers(&self) -> bool {
        self.tx.receiver_count() > 0
    }
}
