//! TaskQueue configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::scheduler::SchedulerConfig;
use crate::workload::WorkloadConfig;

/// Main configuration for the `tq` binary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level", skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Scheduler limits
    pub scheduler: SchedulerConfig,

    /// Synthetic workload shape
    pub workload: WorkloadConfig,
}

impl Config {
    /// Validate configuration before use
    pub fn validate(&self) -> Result<()> {
        self.scheduler.validate().context("Invalid scheduler configuration")?;
        self.workload.validate().context("Invalid workload configuration")?;
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .taskqueue.yml
        let local_config = PathBuf::from(".taskqueue.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/taskqueue/taskqueue.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("taskqueue").join("taskqueue.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is set up
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let path = config_path?;
        let content = fs::read_to_string(path).ok()?;
        serde_yaml::from_str::<Self>(&content).ok()?.log_level
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Render as YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.scheduler.concurrency, 1);
        assert!(config.scheduler.auto_start);
        assert!(config.log_level.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
log-level: debug

scheduler:
  concurrency: 4
  timeout-ms: 250
  expire-ms: 5000
  timespan-ms: 1000
  auto-start: false

workload:
  tasks: 50
  min-delay-ms: 5
  max-delay-ms: 20
  failure-rate: 0.1
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.scheduler.concurrency, 4);
        assert_eq!(config.scheduler.timeout_ms, 250);
        assert_eq!(config.scheduler.expire_ms, 5000);
        assert_eq!(config.scheduler.timespan_ms, 1000);
        assert!(!config.scheduler.auto_start);
        assert_eq!(config.workload.tasks, 50);
        assert_eq!(config.workload.failure_rate, 0.1);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
scheduler:
  concurrency: 3
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        // Specified value
        assert_eq!(config.scheduler.concurrency, 3);

        // Defaults for unspecified
        assert!(config.scheduler.auto_start);
        assert_eq!(config.scheduler.timespan_ms, 0);
        assert_eq!(config.workload, WorkloadConfig::default());
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut config = Config::default();
        config.scheduler.concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "log-level: warn\nscheduler:\n  concurrency: 7").unwrap();
        let path = file.path().to_path_buf();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.scheduler.concurrency, 7);
        assert_eq!(Config::load_log_level(Some(&path)).as_deref(), Some("warn"));
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let path = PathBuf::from("/nonexistent/taskqueue.yml");
        assert!(Config::load(Some(&path)).is_err());
        assert!(Config::load_log_level(Some(&path)).is_none());
    }

    #[test]
    fn test_yaml_roundtrip_keeps_kebab_keys() {
        let yaml = Config::default().to_yaml().unwrap();
        assert!(yaml.contains("timespan-ms"));
        assert!(yaml.contains("auto-start"));
    }
}
