//! Lifecycle notifications for observers of a Scheduler
//!
//! ```text
//!        submit ──► Waiting ──admit──► Active ──complete──► caller
//!                      │                 │                    │
//!                  drained/idle       dequeued             resolved
//! ```
//!
//! - `dequeued` fires each time a task moves from waiting to active
//! - `resolved` fires with the value each time a task succeeds
//! - `drained` fires on every admission pass that finds nothing waiting
//! - `idle` fires on every admission pass that finds nothing waiting or active
//!
//! `drained` and `idle` are level-triggered: they repeat while the condition
//! holds, so subscribers must treat repeated notifications as idempotent.

mod bus;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, Event};

/// The four notification channels owned by one scheduler
pub struct SchedulerEvents<T> {
    pub dequeued: Event<()>,
    pub resolved: Event<T>,
    pub drained: Event<()>,
    pub idle: Event<()>,
}

impl<T: Clone + Send + 'static> SchedulerEvents<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            dequeued: Event::new("dequeued", capacity),
            resolved: Event::new("resolved", capacity),
            drained: Event::new("drained", capacity),
            idle: Event::new("idle", capacity),
        }
    }
}
