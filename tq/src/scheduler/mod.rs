//! Scheduler for deferred async operations
//!
//! Manages operation execution with priority queuing, concurrency limits,
//! per-task timeouts and expiry, and throughput throttling in a single component.

mod config;
mod core;
mod queue;

pub use config::{SchedulerConfig, TaskOptions};
pub use self::core::Scheduler;
pub use queue::{
    QueueEntry, QueueEntryStatus, QueueState, ScheduledRequest, SchedulerStats, TaskHandle, TaskId,
};
