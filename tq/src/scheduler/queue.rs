//! Queue types for the scheduler

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

use crate::domain::Priority;
use crate::error::{TaskError, TaskResult};

/// Identity of a submitted task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(Uuid);

impl TaskId {
    pub(crate) fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Deferred computation; invoked once, when the task is admitted
pub(crate) type Operation<T> = Box<dyn FnOnce() -> BoxFuture<'static, eyre::Result<T>> + Send>;

/// A task sitting in the waiting set
pub(crate) struct QueuedTask<T> {
    pub id: TaskId,
    pub priority: Priority,
    pub timeout: Option<Duration>,
    pub expire: Option<Duration>,
    pub inserted_at: Instant,
    pub operation: Operation<T>,
    pub outcome_tx: oneshot::Sender<TaskResult<T>>,
}

impl<T> QueuedTask<T> {
    /// Expired once it has waited at least its expiry
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expire
            .is_some_and(|expire| now.saturating_duration_since(self.inserted_at) >= expire)
    }
}

/// A task that has been admitted and is running
#[derive(Debug, Clone)]
pub struct ScheduledRequest {
    pub id: TaskId,
    pub priority: Priority,
    pub started_at: Instant,
}

/// Awaitable outcome of a submitted task
///
/// Resolves with the operation's value, or with a [`TaskError`] if it failed,
/// timed out, expired or was removed before starting. Dropping the handle does
/// not cancel the task.
#[derive(Debug)]
pub struct TaskHandle<T> {
    id: TaskId,
    rx: oneshot::Receiver<TaskResult<T>>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(id: TaskId, rx: oneshot::Receiver<TaskResult<T>>) -> Self {
        Self { id, rx }
    }

    /// Identity used with `Scheduler::has` and `Scheduler::remove`
    pub fn id(&self) -> TaskId {
        self.id
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = TaskResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // A dropped sender means the task was discarded without an explicit outcome
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(TaskError::Cancelled)))
    }
}

/// Statistics for the scheduler
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SchedulerStats {
    pub total_submitted: u64,
    pub total_dequeued: u64,
    pub total_succeeded: u64,
    pub total_failed: u64,
    pub total_timed_out: u64,
    pub total_expired: u64,
    pub total_cancelled: u64,
    pub total_throttled: u64,
    pub peak_waiting: usize,
    pub peak_active: usize,
}

/// Point-in-time view of a scheduler
#[derive(Debug, Clone)]
pub struct QueueState {
    pub waiting: usize,
    pub active: usize,
    pub concurrency: usize,
    pub running: bool,
    pub throttled: bool,
    pub stats: SchedulerStats,
}

/// Queue entry for display
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub id: TaskId,
    pub priority: Priority,
    pub status: QueueEntryStatus,
    pub age: Duration,
}

/// Status of a queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueEntryStatus {
    Running,
    Waiting,
}
