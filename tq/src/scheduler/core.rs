//! Scheduler implementation

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{SchedulerError, TaskError, TaskResult};
use crate::events::SchedulerEvents;

use super::config::{SchedulerConfig, TaskOptions};
use super::queue::{
    Operation, QueueEntry, QueueEntryStatus, QueueState, QueuedTask, ScheduledRequest, SchedulerStats, TaskHandle,
    TaskId,
};

/// Internal state protected by mutex
struct SchedulerInner<T> {
    /// Waiting tasks, sorted by priority descending, FIFO within a priority
    queue: VecDeque<QueuedTask<T>>,

    /// Currently running tasks
    running: HashMap<TaskId, ScheduledRequest>,

    /// Whether admission is enabled
    is_running: bool,

    concurrency: usize,
    timespan: Duration,

    /// Minimum gap between two admissions, derived from timespan / concurrency
    slot_spacing: Option<Duration>,

    default_timeout: Option<Duration>,
    default_expire: Option<Duration>,

    last_dequeue: Option<Instant>,

    /// Pending throttle re-check, at most one at a time
    recheck: Option<Recheck>,
    recheck_generation: u64,

    /// Statistics
    stats: SchedulerStats,
}

impl<T> SchedulerInner<T> {
    fn is_drained(&self) -> bool {
        self.queue.is_empty()
    }

    fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.running.is_empty()
    }

    fn can_admit_more(&self) -> bool {
        self.running.len() < self.concurrency
    }

    fn update_slot_spacing(&mut self) {
        self.slot_spacing = if self.timespan.is_zero() {
            None
        } else {
            let divisor = u32::try_from(self.concurrency).unwrap_or(u32::MAX);
            Some(self.timespan / divisor)
        };
        debug!(slot_spacing = ?self.slot_spacing, "SchedulerInner::update_slot_spacing: recomputed");
    }

    fn cancel_recheck(&mut self) {
        if let Some(recheck) = self.recheck.take() {
            recheck.handle.abort();
        }
    }

    fn next_recheck_generation(&mut self) -> u64 {
        self.recheck_generation += 1;
        self.recheck_generation
    }

    /// Replace any pending re-check with this one
    fn arm_recheck(&mut self, generation: u64, handle: AbortHandle) {
        self.cancel_recheck();
        self.recheck = Some(Recheck { generation, handle });
    }

    /// Called by a re-check timer when it fires; false if it has been superseded
    ///
    /// An abort cannot interrupt a timer already blocked on the lock, so the
    /// generation decides whether it is still the pending one.
    fn finish_recheck(&mut self, generation: u64) -> bool {
        if self.recheck.as_ref().is_some_and(|recheck| recheck.generation == generation) {
            self.recheck = None;
            true
        } else {
            false
        }
    }

    /// Insert keeping the queue sorted; lands after every task of equal or higher priority
    fn enqueue(&mut self, task: QueuedTask<T>) {
        let position = self.queue.partition_point(|queued| queued.priority >= task.priority);
        self.queue.insert(position, task);
        self.stats.peak_waiting = self.stats.peak_waiting.max(self.queue.len());
    }
}

struct Recheck {
    generation: u64,
    handle: AbortHandle,
}

/// A task promoted to the active set, ready to be launched
struct Admitted<T> {
    id: TaskId,
    timeout: Option<Duration>,
    operation: Operation<T>,
    outcome_tx: oneshot::Sender<TaskResult<T>>,
}

struct Shared<T> {
    inner: Mutex<SchedulerInner<T>>,
    events: SchedulerEvents<T>,
}

impl<T: Clone + Send + 'static> Shared<T> {
    /// Run the admission loop and launch whatever it promoted
    fn dequeue(self: &Arc<Self>) {
        let admitted = {
            let mut inner = self.inner.lock();
            self.admit(&mut inner)
        };

        for task in admitted {
            self.launch(task);
        }
    }

    /// Promote waiting tasks until a stopping condition holds
    ///
    /// Runs under the lock. Operations are not invoked here; the caller
    /// launches the returned tasks after releasing the lock.
    fn admit(self: &Arc<Self>, inner: &mut SchedulerInner<T>) -> Vec<Admitted<T>> {
        let mut admitted = Vec::new();

        loop {
            if inner.is_drained() {
                self.events.drained.fire(());
            }
            if inner.is_idle() {
                self.events.idle.fire(());
            }

            if !inner.is_running || inner.is_drained() || !inner.can_admit_more() {
                break;
            }

            let now = Instant::now();
            if !self.throttle_allows(inner, now) {
                break;
            }

            let Some(task) = inner.queue.pop_front() else {
                break;
            };

            if task.is_expired(now) {
                let waited = now.saturating_duration_since(task.inserted_at);
                warn!(id = %task.id, ?waited, "Scheduler::admit: task expired while waiting, dropping");
                inner.stats.total_expired += 1;
                let _ = task.outcome_tx.send(Err(TaskError::Expired { waited }));
                continue;
            }

            debug!(id = %task.id, priority = %task.priority, "Scheduler::admit: promoting to active");
            inner.running.insert(
                task.id,
                ScheduledRequest {
                    id: task.id,
                    priority: task.priority,
                    started_at: now,
                },
            );
            assert!(
                inner.running.len() <= inner.concurrency,
                "active set ({}) exceeds concurrency ({})",
                inner.running.len(),
                inner.concurrency
            );

            inner.last_dequeue = Some(now);
            inner.stats.total_dequeued += 1;
            inner.stats.peak_active = inner.stats.peak_active.max(inner.running.len());

            self.events.dequeued.fire(());

            admitted.push(Admitted {
                id: task.id,
                timeout: task.timeout,
                operation: task.operation,
                outcome_tx: task.outcome_tx,
            });
        }

        admitted
    }

    /// Check the throughput throttle, arming a re-check when it vetoes
    fn throttle_allows(self: &Arc<Self>, inner: &mut SchedulerInner<T>, now: Instant) -> bool {
        let (Some(spacing), Some(last)) = (inner.slot_spacing, inner.last_dequeue) else {
            return true;
        };

        let elapsed = now.saturating_duration_since(last);
        if elapsed >= spacing {
            return true;
        }

        let deficit = spacing - elapsed;
        debug!(?deficit, "Scheduler::throttle_allows: vetoed, scheduling re-check");
        inner.stats.total_throttled += 1;

        let generation = inner.next_recheck_generation();
        let weak: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(deficit).await;
            let Some(shared) = weak.upgrade() else {
                return;
            };
            if !shared.inner.lock().finish_recheck(generation) {
                debug!(generation, "Scheduler::recheck: superseded, skipping");
                return;
            }
            shared.dequeue();
        });
        inner.arm_recheck(generation, handle.abort_handle());

        false
    }

    /// Spawn an admitted task's operation and route its outcome back
    fn launch(self: &Arc<Self>, task: Admitted<T>) {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            let Admitted {
                id,
                timeout,
                operation,
                outcome_tx,
            } = task;

            let run = AssertUnwindSafe(async move { operation().await }).catch_unwind();
            let outcome = match timeout {
                Some(limit) => match tokio::time::timeout(limit, run).await {
                    Ok(result) => flatten(result),
                    Err(_) => Err(TaskError::Timeout { timeout: limit }),
                },
                None => flatten(run.await),
            };

            shared.complete(id, outcome_tx, outcome);
        });
    }

    /// Free the slot, deliver the outcome and run admission again
    fn complete(self: &Arc<Self>, id: TaskId, outcome_tx: oneshot::Sender<TaskResult<T>>, outcome: TaskResult<T>) {
        {
            let mut inner = self.inner.lock();
            inner.running.remove(&id);
            match &outcome {
                Ok(_) => {
                    debug!(%id, "Scheduler::complete: succeeded");
                    inner.stats.total_succeeded += 1;
                }
                Err(TaskError::Timeout { timeout }) => {
                    warn!(%id, ?timeout, "Scheduler::complete: timed out");
                    inner.stats.total_timed_out += 1;
                }
                Err(e) => {
                    debug!(%id, error = %e, "Scheduler::complete: failed");
                    inner.stats.total_failed += 1;
                }
            }
        }

        let resolved = match &outcome {
            Ok(value) if self.events.resolved.has_subscribers() => Some(value.clone()),
            _ => None,
        };

        // The caller may have dropped its handle
        let _ = outcome_tx.send(outcome);

        if let Some(value) = resolved {
            self.events.resolved.fire(value);
        }

        self.dequeue();
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        self.inner.get_mut().cancel_recheck();
    }
}

fn flatten<T>(result: std::thread::Result<eyre::Result<T>>) -> TaskResult<T> {
    match result {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(report)) => Err(TaskError::Failed(report)),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            warn!(%message, "Scheduler::launch: operation panicked");
            Err(TaskError::Panicked(message))
        }
    }
}

/// The Scheduler admits submitted operations subject to a concurrency limit,
/// per-task timeouts and expiry, priorities, and an optional throughput cap.
///
/// Cloning yields another handle to the same scheduler. Methods that may start
/// tasks (`submit`, `start`, the setters) must be called inside a Tokio runtime.
pub struct Scheduler<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Scheduler<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Clone + Send + 'static> Scheduler<T> {
    /// Create a new scheduler with the given configuration
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        debug!(?config, "Scheduler::new: called");
        config.validate()?;

        let mut inner = SchedulerInner {
            queue: VecDeque::new(),
            running: HashMap::new(),
            is_running: false,
            concurrency: config.concurrency,
            timespan: config.timespan(),
            slot_spacing: None,
            default_timeout: config.timeout(),
            default_expire: config.expire(),
            last_dequeue: None,
            recheck: None,
            recheck_generation: 0,
            stats: SchedulerStats::default(),
        };
        inner.update_slot_spacing();

        let scheduler = Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(inner),
                events: SchedulerEvents::new(config.event_capacity),
            }),
        };

        if config.auto_start {
            scheduler.start();
        }

        Ok(scheduler)
    }

    /// Submit an operation with default options
    pub fn submit<F, Fut>(&self, operation: F) -> TaskHandle<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = eyre::Result<T>> + Send + 'static,
    {
        self.submit_with(operation, TaskOptions::default())
    }

    /// Submit an operation
    ///
    /// Always accepted. The admission loop runs before this returns, so the
    /// task may already be active when the handle comes back.
    pub fn submit_with<F, Fut>(&self, operation: F, options: TaskOptions) -> TaskHandle<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = eyre::Result<T>> + Send + 'static,
    {
        let id = TaskId::new();
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let operation: Operation<T> = Box::new(move || operation().boxed());

        {
            let mut inner = self.shared.inner.lock();
            let task = QueuedTask {
                id,
                priority: options.priority,
                timeout: options.resolve_timeout(inner.default_timeout),
                expire: options.resolve_expire(inner.default_expire),
                inserted_at: Instant::now(),
                operation,
                outcome_tx,
            };
            debug!(%id, priority = %task.priority, timeout = ?task.timeout, expire = ?task.expire, "Scheduler::submit: called");
            inner.enqueue(task);
            inner.stats.total_submitted += 1;
        }

        self.shared.dequeue();
        TaskHandle::new(id, outcome_rx)
    }

    /// Drop a waiting task; running tasks are not affected
    ///
    /// The removed task's handle resolves with [`TaskError::Cancelled`].
    pub fn remove(&self, id: &TaskId) -> bool {
        debug!(%id, "Scheduler::remove: called");
        let mut inner = self.shared.inner.lock();

        let Some(position) = inner.queue.iter().position(|task| task.id == *id) else {
            debug!(%id, "Scheduler::remove: not waiting");
            return false;
        };

        if let Some(task) = inner.queue.remove(position) {
            let _ = task.outcome_tx.send(Err(TaskError::Cancelled));
            inner.stats.total_cancelled += 1;
        }
        true
    }

    /// Whether the task is still waiting
    pub fn has(&self, id: &TaskId) -> bool {
        self.shared.inner.lock().queue.iter().any(|task| task.id == *id)
    }

    /// Discard all waiting tasks, returning how many were dropped
    ///
    /// Each discarded handle resolves with [`TaskError::Cancelled`].
    pub fn clear(&self) -> usize {
        let mut inner = self.shared.inner.lock();
        let cleared: Vec<_> = inner.queue.drain(..).collect();
        inner.stats.total_cancelled += cleared.len() as u64;
        drop(inner);

        let count = cleared.len();
        info!(count, "Scheduler::clear: discarded waiting tasks");
        for task in cleared {
            let _ = task.outcome_tx.send(Err(TaskError::Cancelled));
        }
        count
    }

    /// Enable admission and immediately admit what fits
    pub fn start(&self) {
        info!("Scheduler::start: called");
        self.shared.inner.lock().is_running = true;
        self.shared.dequeue();
    }

    /// Disable admission; running tasks still complete normally
    ///
    /// Admission still runs once so drained/idle subscribers see the current state.
    pub fn stop(&self) {
        info!("Scheduler::stop: called");
        self.shared.inner.lock().is_running = false;
        self.shared.dequeue();
    }

    pub fn concurrency(&self) -> usize {
        self.shared.inner.lock().concurrency
    }

    /// Change the concurrency limit
    ///
    /// Lowering it never evicts running tasks; it only holds back promotion.
    pub fn set_concurrency(&self, concurrency: usize) -> Result<(), SchedulerError> {
        if concurrency == 0 {
            return Err(SchedulerError::InvalidConcurrency(concurrency));
        }
        info!(concurrency, "Scheduler::set_concurrency: called");
        {
            let mut inner = self.shared.inner.lock();
            inner.concurrency = concurrency;
            inner.update_slot_spacing();
        }
        self.shared.dequeue();
        Ok(())
    }

    pub fn timespan(&self) -> Duration {
        self.shared.inner.lock().timespan
    }

    /// Change the throughput window; zero disables the throttle
    pub fn set_timespan(&self, timespan: Duration) {
        info!(?timespan, "Scheduler::set_timespan: called");
        {
            let mut inner = self.shared.inner.lock();
            inner.timespan = timespan;
            inner.update_slot_spacing();
            if inner.slot_spacing.is_none() {
                inner.cancel_recheck();
            }
        }
        self.shared.dequeue();
    }

    pub fn waiting_count(&self) -> usize {
        self.shared.inner.lock().queue.len()
    }

    pub fn active_count(&self) -> usize {
        self.shared.inner.lock().running.len()
    }

    pub fn is_drained(&self) -> bool {
        self.shared.inner.lock().is_drained()
    }

    pub fn is_idle(&self) -> bool {
        self.shared.inner.lock().is_idle()
    }

    pub fn is_running(&self) -> bool {
        self.shared.inner.lock().is_running
    }

    /// Whether the active set has headroom under the concurrency limit
    pub fn can_admit_more(&self) -> bool {
        self.shared.inner.lock().can_admit_more()
    }

    /// Waiting task ids in dequeue order
    pub fn waiting_ids(&self) -> Vec<TaskId> {
        self.shared.inner.lock().queue.iter().map(|task| task.id).collect()
    }

    pub fn on_dequeue(&self) -> broadcast::Receiver<()> {
        self.shared.events.dequeued.subscribe()
    }

    pub fn on_resolved(&self) -> broadcast::Receiver<T> {
        self.shared.events.resolved.subscribe()
    }

    pub fn on_drain(&self) -> broadcast::Receiver<()> {
        self.shared.events.drained.subscribe()
    }

    pub fn on_idle(&self) -> broadcast::Receiver<()> {
        self.shared.events.idle.subscribe()
    }

    /// Resolve the next time the waiting set is observed empty
    pub fn wait_drain(&self) -> BoxFuture<'static, ()> {
        self.shared.events.drained.once().map(|_| ()).boxed()
    }

    /// Resolve the next time both sets are observed empty
    pub fn wait_idle(&self) -> BoxFuture<'static, ()> {
        self.shared.events.idle.once().map(|_| ()).boxed()
    }

    /// Get current queue state
    pub fn queue_state(&self) -> QueueState {
        let inner = self.shared.inner.lock();
        QueueState {
            waiting: inner.queue.len(),
            active: inner.running.len(),
            concurrency: inner.concurrency,
            running: inner.is_running,
            throttled: inner.recheck.is_some(),
            stats: inner.stats.clone(),
        }
    }

    /// Get running and waiting tasks, highest priority first
    pub fn queue_details(&self) -> Vec<QueueEntry> {
        let inner = self.shared.inner.lock();
        let now = Instant::now();

        let mut entries: Vec<_> = inner
            .running
            .values()
            .map(|r| QueueEntry {
                id: r.id,
                priority: r.priority,
                status: QueueEntryStatus::Running,
                age: now.saturating_duration_since(r.started_at),
            })
            .chain(inner.queue.iter().map(|t| QueueEntry {
                id: t.id,
                priority: t.priority,
                status: QueueEntryStatus::Waiting,
                age: now.saturating_duration_since(t.inserted_at),
            }))
            .collect();

        entries.sort_by(|a, b| b.priority.cmp(&a.priority));
        entries
    }

    /// Get the scheduler statistics
    pub fn stats(&self) -> SchedulerStats {
        self.shared.inner.lock().stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Priority;

    fn scheduler(concurrency: usize) -> Scheduler<u32> {
        Scheduler::new(SchedulerConfig {
            concurrency,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        let result = Scheduler::<u32>::new(SchedulerConfig {
            concurrency: 0,
            ..Default::default()
        });
        assert!(matches!(result, Err(SchedulerError::InvalidConcurrency(0))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_limit() {
        let scheduler = scheduler(2);

        let a = scheduler.submit(|| async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(1)
        });
        let b = scheduler.submit(|| async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(2)
        });
        let c = scheduler.submit(|| async { Ok(3) });

        // First two are active, third waits
        assert_eq!(scheduler.active_count(), 2);
        assert_eq!(scheduler.waiting_count(), 1);
        assert!(!scheduler.can_admit_more());
        assert!(scheduler.has(&c.id()));
        assert!(!scheduler.has(&a.id()));

        assert_eq!(a.await.unwrap(), 1);
        assert_eq!(b.await.unwrap(), 2);
        assert_eq!(c.await.unwrap(), 3);
        assert_eq!(scheduler.stats().peak_active, 2);
    }

    #[tokio::test]
    async fn test_priority_ordering() {
        let scheduler = scheduler(1);
        scheduler.stop();

        let low = scheduler.submit_with(|| async { Ok(0) }, TaskOptions::new().priority(Priority::LOW));
        let normal = scheduler.submit(|| async { Ok(1) });
        let high = scheduler.submit_with(|| async { Ok(2) }, TaskOptions::new().priority(Priority::HIGH));
        let normal2 = scheduler.submit(|| async { Ok(3) });

        assert_eq!(
            scheduler.waiting_ids(),
            vec![high.id(), normal.id(), normal2.id(), low.id()]
        );

        let details = scheduler.queue_details();
        assert_eq!(details[0].id, high.id());
        assert!(details.iter().all(|e| e.status == QueueEntryStatus::Waiting));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_waiting_only() {
        let scheduler = scheduler(1);

        let running = scheduler.submit(|| async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(1)
        });
        let queued = scheduler.submit(|| async { Ok(2) });

        // Running tasks cannot be removed
        assert!(!scheduler.remove(&running.id()));
        assert!(scheduler.remove(&queued.id()));
        assert!(!scheduler.remove(&queued.id()));
        assert!(!scheduler.has(&queued.id()));

        assert!(queued.await.unwrap_err().is_cancelled());
        assert_eq!(running.await.unwrap(), 1);

        let state = scheduler.queue_state();
        assert_eq!(state.active, 0);
        assert_eq!(state.waiting, 0);
        assert_eq!(state.stats.total_cancelled, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_cancels_waiting() {
        let scheduler = scheduler(1);

        let running = scheduler.submit(|| async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(1)
        });
        let waiting: Vec<_> = (0..3).map(|i| scheduler.submit(move || async move { Ok(i) })).collect();

        assert_eq!(scheduler.clear(), 3);
        assert_eq!(scheduler.waiting_count(), 0);
        assert_eq!(scheduler.active_count(), 1);

        for handle in waiting {
            assert!(handle.await.unwrap_err().is_cancelled());
        }
        assert_eq!(running.await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_spacing() {
        let scheduler = Scheduler::new(SchedulerConfig {
            concurrency: 2,
            timespan_ms: 1000,
            ..Default::default()
        })
        .unwrap();
        let starts = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let starts = Arc::clone(&starts);
                scheduler.submit(move || async move {
                    starts.lock().push(Instant::now());
                    Ok(i)
                })
            })
            .collect();

        // Only the first gets through immediately
        assert_eq!(scheduler.active_count(), 1);
        assert_eq!(scheduler.waiting_count(), 3);
        assert!(scheduler.queue_state().throttled);

        for handle in handles {
            handle.await.unwrap();
        }

        let mut starts = starts.lock().clone();
        starts.sort();
        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(500));
        }
        assert!(scheduler.stats().total_throttled >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabling_throttle_releases_backlog() {
        let scheduler = Scheduler::new(SchedulerConfig {
            concurrency: 3,
            timespan_ms: 60_000,
            ..Default::default()
        })
        .unwrap();

        let handles: Vec<_> = (0..3)
            .map(|i| {
                scheduler.submit(move || async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok(i)
                })
            })
            .collect();
        assert_eq!(scheduler.active_count(), 1);

        scheduler.set_timespan(Duration::ZERO);
        assert_eq!(scheduler.active_count(), 3);
        assert!(!scheduler.queue_state().throttled);

        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_task_is_skipped() {
        let scheduler = scheduler(1);
        let ran = Arc::new(Mutex::new(false));

        let blocker = scheduler.submit(|| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(1)
        });
        let ran_flag = Arc::clone(&ran);
        let stale = scheduler.submit_with(
            move || async move {
                *ran_flag.lock() = true;
                Ok(2)
            },
            TaskOptions::new().expire(Duration::from_millis(100)),
        );
        let fresh = scheduler.submit(|| async { Ok(3) });

        assert_eq!(blocker.await.unwrap(), 1);
        assert!(stale.await.unwrap_err().is_expired());
        assert_eq!(fresh.await.unwrap(), 3);
        assert!(!*ran.lock());
        assert_eq!(scheduler.stats().total_expired, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_frees_slot() {
        let scheduler = Scheduler::new(SchedulerConfig {
            concurrency: 1,
            timeout_ms: 10,
            ..Default::default()
        })
        .unwrap();

        let slow = scheduler.submit(|| async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(1)
        });
        let next = scheduler.submit(|| async { Ok(2) });

        let err = slow.await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(next.await.unwrap(), 2);

        let stats = scheduler.stats();
        assert_eq!(stats.total_timed_out, 1);
        assert_eq!(stats.total_succeeded, 1);
    }

    #[tokio::test]
    async fn test_operation_failure_propagates() {
        let scheduler = scheduler(1);

        let handle = scheduler.submit(|| async { Err(eyre::eyre!("dependency unavailable")) });
        let err = handle.await.unwrap_err();

        assert_eq!(err.operation_error().unwrap().to_string(), "dependency unavailable");
        assert_eq!(scheduler.stats().total_failed, 1);
    }

    async fn explode() -> eyre::Result<u32> {
        panic!("kaboom")
    }

    #[tokio::test]
    async fn test_panic_frees_slot() {
        let scheduler = scheduler(1);

        let boom = scheduler.submit(explode);
        let after = scheduler.submit(|| async { Ok(5) });

        match boom.await {
            Err(TaskError::Panicked(message)) => assert_eq!(message, "kaboom"),
            other => panic!("Expected panic outcome, got {:?}", other),
        }
        assert_eq!(after.await.unwrap(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_lets_active_finish() {
        let scheduler = scheduler(1);

        let active = scheduler.submit(|| async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(1)
        });
        let waiting = scheduler.submit(|| async { Ok(2) });
        scheduler.stop();

        assert_eq!(active.await.unwrap(), 1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(scheduler.waiting_count(), 1);
        assert_eq!(scheduler.active_count(), 0);

        scheduler.start();
        assert_eq!(waiting.await.unwrap(), 2);
        assert!(scheduler.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_raising_concurrency_admits_more() {
        let scheduler = scheduler(1);

        let handles: Vec<_> = (0..3)
            .map(|i| {
                scheduler.submit(move || async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok(i)
                })
            })
            .collect();
        assert_eq!(scheduler.active_count(), 1);

        assert_eq!(scheduler.set_concurrency(0), Err(SchedulerError::InvalidConcurrency(0)));
        scheduler.set_concurrency(3).unwrap();
        assert_eq!(scheduler.concurrency(), 3);
        assert_eq!(scheduler.active_count(), 3);

        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_lowering_concurrency_keeps_running_tasks() {
        let scheduler = scheduler(3);

        let handles: Vec<_> = (0..6)
            .map(|i| {
                scheduler.submit(move || async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok(i)
                })
            })
            .collect();
        assert_eq!(scheduler.active_count(), 3);
        assert_eq!(scheduler.waiting_count(), 3);

        scheduler.set_concurrency(1).unwrap();
        assert_eq!(scheduler.active_count(), 3);
        assert_eq!(scheduler.waiting_count(), 3);

        let mut handles = handles.into_iter();
        for handle in handles.by_ref().take(3) {
            handle.await.unwrap();
        }
        assert_eq!(scheduler.active_count(), 1);
        assert_eq!(scheduler.waiting_count(), 2);

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(scheduler.stats().peak_active, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_change_recomputes_spacing() {
        let scheduler = Scheduler::new(SchedulerConfig {
            concurrency: 1,
            timespan_ms: 1000,
            ..Default::default()
        })
        .unwrap();
        let starts = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let starts = Arc::clone(&starts);
                scheduler.submit(move || async move {
                    starts.lock().push(Instant::now());
                    Ok(i)
                })
            })
            .collect();
        assert_eq!(scheduler.active_count() + scheduler.waiting_count(), 4);

        scheduler.set_concurrency(4).unwrap();
        for handle in handles {
            handle.await.unwrap();
        }

        let mut starts = starts.lock().clone();
        starts.sort();
        assert_eq!(starts.len(), 4);
        for pair in starts.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= Duration::from_millis(250), "gap too short: {:?}", gap);
            assert!(gap < Duration::from_millis(300), "gap too long: {:?}", gap);
        }
    }

    #[tokio::test]
    async fn test_stale_recheck_keeps_newer_timer() {
        let scheduler = scheduler(1);
        {
            let mut inner = scheduler.shared.inner.lock();
            let first = inner.next_recheck_generation();
            inner.arm_recheck(first, tokio::spawn(std::future::pending::<()>()).abort_handle());
            let second = inner.next_recheck_generation();
            inner.arm_recheck(second, tokio::spawn(std::future::pending::<()>()).abort_handle());

            // The superseded timer must not erase the pending one
            assert!(!inner.finish_recheck(first));
            assert!(inner.recheck.is_some());
            assert!(inner.finish_recheck(second));
            assert!(inner.recheck.is_none());
        }
        assert!(!scheduler.queue_state().throttled);
    }

    #[tokio::test]
    async fn test_stop_notifies_idle_subscribers() {
        let scheduler = scheduler(1);
        let mut drained = scheduler.on_drain();
        let mut idle = scheduler.on_idle();

        scheduler.stop();

        assert!(drained.try_recv().is_ok());
        assert!(idle.try_recv().is_ok());
        assert!(!scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_age_counts_from_admission() {
        let scheduler = scheduler(1);

        let first = scheduler.submit(|| async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(1)
        });
        let second = scheduler.submit(|| async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(2)
        });

        assert_eq!(first.await.unwrap(), 1);
        tokio::time::sleep(Duration::from_millis(30)).await;

        let details = scheduler.queue_details();
        assert_eq!(details.len(), 1);
        assert_eq!(details[0].id, second.id());
        assert_eq!(details[0].status, QueueEntryStatus::Running);
        assert!(details[0].age < Duration::from_millis(100));

        assert_eq!(second.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_resolved_and_dequeue_events() {
        let scheduler = scheduler(2);
        let mut resolved = scheduler.on_resolved();
        let mut dequeued = scheduler.on_dequeue();

        let ok = scheduler.submit(|| async { Ok(10) });
        let failed = scheduler.submit(|| async { Err(eyre::eyre!("nope")) });

        assert_eq!(ok.await.unwrap(), 10);
        assert!(failed.await.is_err());

        // Only the success is announced
        assert_eq!(resolved.recv().await.unwrap(), 10);
        assert!(resolved.try_recv().is_err());

        dequeued.recv().await.unwrap();
        dequeued.recv().await.unwrap();
    }

    #[tokio::test]
    async fn test_stats_tracking() {
        let scheduler = scheduler(2);

        let a = scheduler.submit(|| async { Ok(1) });
        let b = scheduler.submit(|| async { Ok(2) });
        a.await.unwrap();
        b.await.unwrap();

        let stats = scheduler.stats();
        assert_eq!(stats.total_submitted, 2);
        assert_eq!(stats.total_dequeued, 2);
        assert_eq!(stats.total_succeeded, 2);
    }
}
