//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Config;

/// TaskQueue - drive a synthetic workload through the scheduler
#[derive(Parser)]
#[command(
    name = "tq",
    about = "Run synthetic workloads through a priority/concurrency/throughput-limited task scheduler",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Submit a synthetic workload and report how it ran
    Run(RunArgs),

    /// Print the effective configuration as YAML
    Config,
}

/// Overrides applied on top of the loaded configuration
#[derive(Debug, Default, clap::Args)]
pub struct RunArgs {
    /// Number of tasks to submit
    #[arg(short = 'n', long)]
    pub tasks: Option<usize>,

    /// Maximum tasks running at once
    #[arg(short = 'j', long)]
    pub concurrency: Option<usize>,

    /// Per-task timeout in milliseconds (0 = unlimited)
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Expiry for waiting tasks in milliseconds (0 = never)
    #[arg(long)]
    pub expire_ms: Option<u64>,

    /// Throughput window in milliseconds (0 = unthrottled)
    #[arg(long)]
    pub timespan_ms: Option<u64>,

    /// Fraction of tasks that fail (0.0 - 1.0)
    #[arg(long)]
    pub failure_rate: Option<f64>,
}

impl RunArgs {
    /// Apply command-line overrides to a loaded config
    pub fn apply(&self, config: &mut Config) {
        if let Some(tasks) = self.tasks {
            config.workload.tasks = tasks;
        }
        if let Some(concurrency) = self.concurrency {
            config.scheduler.concurrency = concurrency;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.scheduler.timeout_ms = timeout_ms;
        }
        if let Some(expire_ms) = self.expire_ms {
            config.scheduler.expire_ms = expire_ms;
        }
        if let Some(timespan_ms) = self.timespan_ms {
            config.scheduler.timespan_ms = timespan_ms;
        }
        if let Some(failure_rate) = self.failure_rate {
            config.workload.failure_rate = failure_rate;
        }
    }
}
