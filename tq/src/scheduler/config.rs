//! Scheduler configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::Priority;
use crate::error::SchedulerError;
use crate::events::DEFAULT_CHANNEL_CAPACITY;

/// Scheduler configuration
///
/// Every field is optional in a config document; missing keys take the
/// defaults below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Max tasks running at once
    pub concurrency: usize,

    /// Default per-task time limit in milliseconds (0 = unlimited)
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,

    /// Default expiry for waiting tasks in milliseconds (0 = never)
    #[serde(rename = "expire-ms")]
    pub expire_ms: u64,

    /// Throughput window in milliseconds; at most `concurrency` starts per window (0 = unthrottled)
    #[serde(rename = "timespan-ms")]
    pub timespan_ms: u64,

    /// Start admitting tasks as soon as the scheduler is built
    #[serde(rename = "auto-start")]
    pub auto_start: bool,

    /// Buffer size of each lifecycle notification channel
    #[serde(rename = "event-capacity")]
    pub event_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            timeout_ms: 0,
            expire_ms: 0,
            timespan_ms: 0,
            auto_start: true,
            event_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl SchedulerConfig {
    /// Check limits before the scheduler is built
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.concurrency == 0 {
            return Err(SchedulerError::InvalidConcurrency(self.concurrency));
        }
        if self.event_capacity == 0 {
            return Err(SchedulerError::InvalidEventCapacity(self.event_capacity));
        }
        Ok(())
    }

    /// Default per-task timeout, if any
    pub fn timeout(&self) -> Option<Duration> {
        non_zero_ms(self.timeout_ms)
    }

    /// Default expiry, if any
    pub fn expire(&self) -> Option<Duration> {
        non_zero_ms(self.expire_ms)
    }

    /// Throughput window as a Duration (zero when unthrottled)
    pub fn timespan(&self) -> Duration {
        Duration::from_millis(self.timespan_ms)
    }
}

fn non_zero_ms(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

/// Per-task scheduling options
///
/// Unset (or zero) timeout and expiry fall back to the scheduler defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskOptions {
    pub priority: Priority,
    pub timeout: Option<Duration>,
    pub expire: Option<Duration>,
}

impl TaskOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn priority(mut self, priority: impl Into<Priority>) -> Self {
        self.priority = priority.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn expire(mut self, expire: Duration) -> Self {
        self.expire = Some(expire);
        self
    }

    /// Effective timeout after falling back to the scheduler default
    pub(crate) fn resolve_timeout(&self, default: Option<Duration>) -> Option<Duration> {
        self.timeout.filter(|d| !d.is_zero()).or(default)
    }

    /// Effective expiry after falling back to the scheduler default
    pub(crate) fn resolve_expire(&self, default: Option<Duration>) -> Option<Duration> {
        self.expire.filter(|d| !d.is_zero()).or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.timeout_ms, 0);
        assert_eq!(config.expire_ms, 0);
        assert_eq!(config.timespan_ms, 0);
        assert!(config.auto_start);
        assert_eq!(config.timeout(), None);
        assert_eq!(config.expire(), None);
        assert!(config.timespan().is_zero());
    }

    #[test]
    fn test_validate() {
        assert!(SchedulerConfig::default().validate().is_ok());

        let config = SchedulerConfig {
            concurrency: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(SchedulerError::InvalidConcurrency(0)));

        let config = SchedulerConfig {
            event_capacity: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(SchedulerError::InvalidEventCapacity(0)));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
concurrency: 4
timespan-ms: 1000
"#;
        let config: SchedulerConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.concurrency, 4);
        assert_eq!(config.timespan(), Duration::from_secs(1));
        assert!(config.auto_start);
        assert_eq!(config.timeout(), None);
    }

    #[test]
    fn test_task_options_fallback() {
        let default_timeout = Some(Duration::from_millis(50));

        let options = TaskOptions::new();
        assert_eq!(options.resolve_timeout(default_timeout), default_timeout);

        let options = TaskOptions::new().timeout(Duration::from_millis(5));
        assert_eq!(options.resolve_timeout(default_timeout), Some(Duration::from_millis(5)));

        // Zero means unset
        let options = TaskOptions::new().timeout(Duration::ZERO).expire(Duration::ZERO);
        assert_eq!(options.resolve_timeout(default_timeout), default_timeout);
        assert_eq!(options.resolve_expire(None), None);
    }

    #[test]
    fn test_task_options_builder() {
        let options = TaskOptions::new().priority(3).expire(Duration::from_secs(2));
        assert_eq!(options.priority, Priority(3));
        assert_eq!(options.expire, Some(Duration::from_secs(2)));
        assert_eq!(options.timeout, None);
    }
}
