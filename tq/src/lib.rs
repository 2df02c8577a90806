//! TaskQueue - in-process async task scheduler
//!
//! Callers submit deferred operations; the scheduler decides when each one
//! runs, bounding fan-out toward a rate-limited dependency.
//!
//! # Core Concepts
//!
//! - **Priorities**: higher priority runs first, FIFO among equals
//! - **Concurrency**: at most `concurrency` operations active at once
//! - **Timeouts and Expiry**: running tasks can time out, waiting tasks can go stale
//! - **Throttling**: at most `concurrency` admissions per `timespan`
//! - **Notifications**: dequeued, resolved, drained and idle events for observers
//!
//! # Modules
//!
//! - [`scheduler`] - The admission engine and task handles
//! - [`events`] - Lifecycle notification channels
//! - [`config`] - Configuration types and loading
//! - [`workload`] - Synthetic workload driver used by the `tq` binary
//! - [`cli`] - Command-line interface
//!
//! # Usage
//!
//! ```rust,ignore
//! use taskqueue::{SchedulerConfig, TaskOptions, create_scheduler};
//!
//! let scheduler = create_scheduler(SchedulerConfig { concurrency: 2, ..Default::default() })?;
//! let handle = scheduler.submit_with(|| async { Ok(42) }, TaskOptions::new().priority(5));
//! assert_eq!(handle.await?, 42);
//! scheduler.wait_idle().await;
//! ```

pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod scheduler;
pub mod workload;

// Re-export commonly used types
pub use config::Config;
pub use domain::Priority;
pub use error::{SchedulerError, TaskError, TaskResult};
pub use events::{Event, SchedulerEvents};
pub use scheduler::{
    QueueEntry, QueueEntryStatus, QueueState, Scheduler, SchedulerConfig, SchedulerStats, TaskHandle, TaskId,
    TaskOptions,
};
pub use workload::{WorkloadConfig, WorkloadReport, run_workload};

/// Build a scheduler from a (possibly partially specified) configuration
pub fn create_scheduler<T: Clone + Send + 'static>(config: SchedulerConfig) -> Result<Scheduler<T>, SchedulerError> {
    Scheduler::new(config)
}
