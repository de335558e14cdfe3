// vardispatch driver binary
//
// Runs the synthetic workload against the scheduler and prints statistics: `batch` submits a
// seeded random batch and checks the final state, `periodic` fires named generators until a
// duration elapses or Ctrl+C is received.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;
use vardispatch::workload::{self, PeriodicConfig, WorkloadConfig};
use vardispatch::{LockingDiscipline, SchedulerConfig, StatsSnapshot};

#[derive(Debug, Parser)]
#[command(name = "vardispatch", version, about = "Variable-conflict scheduler driver")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a seeded random batch and verify the final state.
    Batch(BatchArgs),
    /// Fire periodic generators until the duration elapses or Ctrl+C.
    Periodic(PeriodicArgs),
}

/// Scheduler flags shared by every mode. Flags override the config file.
#[derive(Debug, Args)]
struct SchedulerArgs {
    /// Locking discipline: `rw` or `w`.
    #[arg(long)]
    discipline: Option<LockingDiscipline>,
    /// Worker pool size.
    #[arg(long)]
    workers: Option<usize>,
    /// Comma-separated core per worker (Linux only).
    #[arg(long, value_delimiter = ',')]
    cores: Vec<usize>,
    /// Print the report as JSON.
    #[arg(long)]
    json: bool,
}

impl SchedulerArgs {
    fn apply(&self, mut config: SchedulerConfig) -> SchedulerConfig {
        if let Some(discipline) = self.discipline {
            config.discipline = discipline;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if !self.cores.is_empty() {
            config.worker_cores = self.cores.clone();
        }
        config
    }
}

#[derive(Debug, Args)]
struct BatchArgs {
    /// JSON file holding a workload config.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    vars: Option<usize>,
    #[arg(long)]
    messages: Option<usize>,
    #[arg(long)]
    seed: Option<u64>,
    /// Probability that a message fails instead of completing.
    #[arg(long)]
    failure_rate: Option<f64>,
    /// Run once per discipline and compare.
    #[arg(long)]
    compare: bool,
    #[command(flatten)]
    scheduler: SchedulerArgs,
}

#[derive(Debug, Args)]
struct PeriodicArgs {
    /// JSON file holding variables and generators.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Stop after this many seconds; runs until Ctrl+C when absent.
    #[arg(long)]
    seconds: Option<f64>,
    #[command(flatten)]
    scheduler: SchedulerArgs,
}

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn print_stats(stats: &StatsSnapshot) {
    println!(
        "  dispatched={} merged={} failed={} conflict_requeues={} capacity_waits={} abandoned={}",
        stats.dispatched,
        stats.merges,
        stats.failed,
        stats.conflict_requeues,
        stats.capacity_waits,
        stats.abandoned
    );
    let micros = |d: Option<Duration>| d.map_or(0.0, |d| d.as_secs_f64() * 1_000_000.0);
    println!(
        "  queue wait us: p50={:.1} p95={:.1} p99={:.1} max={:.1}",
        micros(stats.queue_wait.p50),
        micros(stats.queue_wait.p95),
        micros(stats.queue_wait.p99),
        micros(stats.queue_wait.max)
    );
    println!("  jobs per worker: {:?}", stats.worker_jobs);
}

fn run_batch(args: BatchArgs) -> Result<()> {
    let mut workload: WorkloadConfig = match &args.config {
        Some(path) => load_json(path)?,
        None => WorkloadConfig::default(),
    };
    if let Some(vars) = args.vars {
        workload.vars = vars;
    }
    if let Some(messages) = args.messages {
        workload.messages = messages;
    }
    if let Some(seed) = args.seed {
        workload.seed = seed;
    }
    if let Some(rate) = args.failure_rate {
        if !(0.0..=1.0).contains(&rate) {
            bail!("--failure-rate must be within 0..=1, got {rate}");
        }
        workload.failure_rate = rate;
    }

    let base = args.scheduler.apply(SchedulerConfig::default());
    let disciplines = if args.compare {
        LockingDiscipline::ALL.to_vec()
    } else {
        vec![base.discipline]
    };

    let mut reports = Vec::with_capacity(disciplines.len());
    for discipline in disciplines {
        let config = SchedulerConfig {
            discipline,
            ..base.clone()
        };
        let report = workload::run_batch(&workload, config)
            .with_context(|| format!("batch under {discipline}"))?;
        reports.push(report);
    }

    if args.scheduler.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            println!(
                "[{}] workers={} messages={} elapsed={:.1}ms throughput={:.0}/s consistent={} violations={}",
                report.discipline,
                report.workers,
                report.messages,
                report.elapsed.as_secs_f64() * 1_000.0,
                report.throughput_per_sec,
                report.consistent,
                report.violations
            );
            print_stats(&report.stats);
        }
    }

    if let Some(bad) = reports.iter().find(|r| !r.consistent || r.violations > 0) {
        bail!(
            "{} run diverged from the sequential result ({} violations)",
            bad.discipline,
            bad.violations
        );
    }
    Ok(())
}

fn run_periodic(args: PeriodicArgs) -> Result<()> {
    let periodic: PeriodicConfig = match &args.config {
        Some(path) => load_json(path)?,
        None => PeriodicConfig::default(),
    };
    let config = args.scheduler.apply(SchedulerConfig::default());
    let duration = match args.seconds {
        Some(seconds) if seconds.is_finite() && seconds > 0.0 => {
            Some(Duration::from_secs_f64(seconds))
        }
        Some(seconds) => bail!("--seconds must be positive, got {seconds}"),
        None => None,
    };

    let running = Arc::new(AtomicBool::new(true));
    let running_handler = running.clone();
    ctrlc::set_handler(move || {
        running_handler.store(false, Ordering::Relaxed);
    })
    .context("installing Ctrl+C handler")?;

    info!(generators = periodic.generators.len(), "periodic run starting");
    let report = workload::run_periodic(&periodic, config, duration, running)?;

    if args.scheduler.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "[{}] elapsed={:.1}ms violations={}",
            report.discipline,
            report.elapsed.as_secs_f64() * 1_000.0,
            report.violations
        );
        for generator in &report.generators {
            println!("  {:<16} fired={}", generator.name, generator.fired);
        }
        for (name, value) in &report.final_state {
            println!("  {name:<16} = {value}");
        }
        print_stats(&report.stats);
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Batch(args) => run_batch(args),
        Command::Periodic(args) => run_periodic(args),
    }
}
