//! TaskQueue - synthetic workload runner
//!
//! CLI entry point for exercising the scheduler by hand.

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tracing::{debug, info};

use taskqueue::Scheduler;
use taskqueue::cli::{Cli, Command, RunArgs};
use taskqueue::config::Config;
use taskqueue::workload::{WorkloadReport, run_workload};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level).map(str::to_uppercase).as_deref() {
        Some("TRACE") => tracing::Level::TRACE,
        Some("DEBUG") => tracing::Level::DEBUG,
        Some("INFO") | None => tracing::Level::INFO,
        Some("WARN") | Some("WARNING") => tracing::Level::WARN,
        Some("ERROR") => tracing::Level::ERROR,
        Some(other) => {
            eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", other);
            tracing::Level::INFO
        }
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .try_init()
        .map_err(|e| eyre::eyre!("Failed to initialize logging: {}", e))?;

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());

    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Run(args) => {
            debug!(?args, "main: matched Run command");
            cmd_run(config, &args).await
        }
        Command::Config => {
            debug!("main: matched Config command");
            cmd_config(&config)
        }
    }
}

/// Run the configured workload and print a summary
async fn cmd_run(mut config: Config, args: &RunArgs) -> Result<()> {
    debug!(?args, "cmd_run: called");
    args.apply(&mut config);
    config.validate()?;

    let scheduler: Scheduler<u64> = Scheduler::new(config.scheduler.clone()).context("Failed to create scheduler")?;

    println!(
        "Running {} tasks (concurrency {}, timeout {}ms, expire {}ms, timespan {}ms)",
        config.workload.tasks,
        config.scheduler.concurrency,
        config.scheduler.timeout_ms,
        config.scheduler.expire_ms,
        config.scheduler.timespan_ms,
    );

    let report = run_workload(&scheduler, &config.workload).await?;
    print_report(&report);
    Ok(())
}

/// Print the effective configuration
fn cmd_config(config: &Config) -> Result<()> {
    debug!("cmd_config: called");
    print!("{}", config.to_yaml()?);
    Ok(())
}

fn print_report(report: &WorkloadReport) {
    println!();
    println!("{}", "Workload summary".bold());
    println!("  submitted:  {}", report.submitted);
    println!("  succeeded:  {}", report.succeeded.to_string().green());
    println!("  failed:     {}", colored_count(report.failed));
    println!("  timed out:  {}", colored_count(report.timed_out));
    println!("  expired:    {}", colored_count(report.expired));
    println!("  cancelled:  {}", colored_count(report.cancelled));
    println!("  elapsed:    {:.2?}", report.elapsed);
    println!("  peak active: {}", report.stats.peak_active);
    println!("  throttle vetoes: {}", report.stats.total_throttled);
}

fn colored_count(count: usize) -> colored::ColoredString {
    if count == 0 {
        count.to_string().normal()
    } else {
        count.to_string().red()
    }
}
