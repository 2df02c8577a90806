//! Scheduler error types

use std::time::Duration;
use thiserror::Error;

/// Configuration errors, reported by the constructor and the setters
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Concurrency must be at least 1, got {0}")]
    InvalidConcurrency(usize),

    #[error("Event channel capacity must be at least 1, got {0}")]
    InvalidEventCapacity(usize),
}

/// Why a submitted task did not produce a value
#[derive(Debug, Error)]
pub enum TaskError {
    /// The operation itself returned an error
    #[error("Operation failed: {0}")]
    Failed(eyre::Report),

    #[error("Operation timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Task expired after waiting {waited:?} without being started")]
    Expired { waited: Duration },

    #[error("Task was removed before it started")]
    Cancelled,

    #[error("Operation panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, TaskError::Timeout { .. })
    }

    /// Check if the task was dropped by expiry
    pub fn is_expired(&self) -> bool {
        matches!(self, TaskError::Expired { .. })
    }

    /// Check if the task was removed or cleared before running
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Cancelled)
    }

    /// Check if resubmitting the same operation could reasonably succeed
    ///
    /// The scheduler never retries on its own; this is a hint for callers.
    pub fn is_retryable(&self) -> bool {
        match self {
            TaskError::Timeout { .. } => true,
            TaskError::Expired { .. } => true,
            TaskError::Cancelled => false,
            TaskError::Failed(_) => false,
            TaskError::Panicked(_) => false,
        }
    }

    /// Borrow the operation's own error, if that is what failed
    pub fn operation_error(&self) -> Option<&eyre::Report> {
        match self {
            TaskError::Failed(report) => Some(report),
            _ => None,
        }
    }
}

/// Outcome delivered through a task handle
pub type TaskResult<T> = Result<T, TaskError>;
