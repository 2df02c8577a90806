//! Synthetic workload driver
//!
//! Pushes a batch of simulated operations through a scheduler and tallies how
//! each one ended. Used by `tq run` to observe limits and throttling by hand.

use std::time::Duration;

use eyre::{Result, eyre};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::TaskError;
use crate::scheduler::{Scheduler, SchedulerStats, TaskOptions};

/// Shape of the simulated load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    /// Number of operations to submit
    pub tasks: usize,

    /// Shortest simulated operation in milliseconds
    #[serde(rename = "min-delay-ms")]
    pub min_delay_ms: u64,

    /// Longest simulated operation in milliseconds
    #[serde(rename = "max-delay-ms")]
    pub max_delay_ms: u64,

    /// Fraction of operations that fail (0.0 - 1.0)
    #[serde(rename = "failure-rate")]
    pub failure_rate: f64,

    /// Priorities are drawn uniformly from this inclusive range
    #[serde(rename = "min-priority")]
    pub min_priority: i32,

    #[serde(rename = "max-priority")]
    pub max_priority: i32,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            tasks: 20,
            min_delay_ms: 10,
            max_delay_ms: 100,
            failure_rate: 0.0,
            min_priority: 0,
            max_priority: 0,
        }
    }
}

impl WorkloadConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_delay_ms > self.max_delay_ms {
            return Err(eyre!(
                "min-delay-ms ({}) exceeds max-delay-ms ({})",
                self.min_delay_ms,
                self.max_delay_ms
            ));
        }
        if self.min_priority > self.max_priority {
            return Err(eyre!(
                "min-priority ({}) exceeds max-priority ({})",
                self.min_priority,
                self.max_priority
            ));
        }
        if !(0.0..=1.0).contains(&self.failure_rate) {
            return Err(eyre!("failure-rate must be within 0.0..=1.0, got {}", self.failure_rate));
        }
        Ok(())
    }
}

/// How a workload run ended
#[derive(Debug, Clone, Default)]
pub struct WorkloadReport {
    pub submitted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub expired: usize,
    pub cancelled: usize,
    pub elapsed: Duration,
    pub stats: SchedulerStats,
}

/// One simulated operation: sleep, then succeed with the elapsed time or fail
struct Job {
    index: usize,
    delay: Duration,
    fails: bool,
}

impl Job {
    async fn run(self) -> Result<u64> {
        tokio::time::sleep(self.delay).await;
        if self.fails {
            return Err(eyre!("job {} failed after {:?}", self.index, self.delay));
        }
        Ok(self.delay.as_millis() as u64)
    }
}

/// Submit the workload, wait for every task, and summarize
pub async fn run_workload(scheduler: &Scheduler<u64>, workload: &WorkloadConfig) -> Result<WorkloadReport> {
    debug!(?workload, "run_workload: called");
    workload.validate()?;

    let started = Instant::now();
    let handles: Vec<_> = {
        let mut rng = rand::rng();
        (0..workload.tasks)
            .map(|index| {
                let job = Job {
                    index,
                    delay: Duration::from_millis(rng.random_range(workload.min_delay_ms..=workload.max_delay_ms)),
                    fails: rng.random_bool(workload.failure_rate),
                };
                let priority = rng.random_range(workload.min_priority..=workload.max_priority);
                scheduler.submit_with(move || job.run(), TaskOptions::new().priority(priority))
            })
            .collect()
    };
    info!(tasks = handles.len(), "run_workload: submitted");

    let mut report = WorkloadReport {
        submitted: handles.len(),
        ..Default::default()
    };

    for outcome in futures::future::join_all(handles).await {
        match outcome {
            Ok(_) => report.succeeded += 1,
            Err(TaskError::Timeout { .. }) => report.timed_out += 1,
            Err(TaskError::Expired { .. }) => report.expired += 1,
            Err(TaskError::Cancelled) => report.cancelled += 1,
            Err(TaskError::Failed(_)) | Err(TaskError::Panicked(_)) => report.failed += 1,
        }
    }

    report.elapsed = started.elapsed();
    report.stats = scheduler.stats();
    info!(
        succeeded = report.succeeded,
        failed = report.failed,
        timed_out = report.timed_out,
        expired = report.expired,
        elapsed = ?report.elapsed,
        "run_workload: finished"
    );
    Ok(report)
}
