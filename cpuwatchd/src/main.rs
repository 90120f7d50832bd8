use anyhow::{Context, Result};
use chrono::{Local, TimeZone};
use clap::{Parser, Subcommand};
use cpuwatchd::agent::{Agent, SnapshotBuilder};
use cpuwatchd::alerts::AlertEngine;
use cpuwatchd::collectors::{HostCollector, MetricSource, VmInventory};
use cpuwatchd::config::Config;
use cpuwatchd::notify::{AlertJournal, Notifier};
use log::{error, info};
use std::path::PathBuf;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;

#[derive(Parser, Debug)]
#[command(version, about = "Host, process and VM resource alerting daemon")]
struct Args {
    /// Path to the configuration file (TOML, or JSON by extension)
    #[arg(long, short)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Run the monitoring loop (default)
    Run,
    /// Load and validate the configuration, then print it
    CheckConfig,
    /// Sample the host once and show the busiest processes
    Top {
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
    /// Show the most recent alerts from the journal
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load(args.config.as_deref());

    // logging comes up before the config error is reported
    let level = config
        .as_ref()
        .map(|c| c.logging.level.clone())
        .unwrap_or_else(|_| "info".to_string());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
    let config = config?;

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::CheckConfig => check_config(&config),
        Command::Top { limit } => top(limit).await,
        Command::History { limit } => history(&config, limit),
    }
}

async fn run(config: Config) -> Result<()> {
    let notifier = Notifier::from_config(&config)?;
    let engine = AlertEngine::new(&config, notifier);

    let mut snapshots = SnapshotBuilder::new(Box::new(HostCollector::new()));
    if let (true, Some(path)) = (
        config.hypervisor_enabled(),
        &config.hypervisor.inventory_path,
    ) {
        info!("[agent] reading VM inventory from {}", path.display());
        snapshots = snapshots.with_vms(Box::new(VmInventory::new(path.clone())));
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("[agent] received SIGTERM"),
            _ = sigint.recv() => info!("[agent] received SIGINT"),
        }
        if stop_tx.send(true).is_err() {
            error!("[agent] poll loop already gone");
        }
    });

    let agent = Agent::new(snapshots, engine, config.poll_duration());
    agent.run(stop_rx).await?;
    Ok(())
}

fn check_config(config: &Config) -> Result<()> {
    config.validate()?;
    println!("{:<16} {:>8} {:>8}", "SCOPE", "CPU%", "MEM%");
    for (scope, t) in [
        ("host", config.host_alerts),
        ("process", config.process_alerts),
        ("vm", config.vm_alerts.thresholds()),
    ] {
        println!("{:<16} {:>8.1} {:>8.1}", scope, t.cpu_percent, t.memory_percent);
    }
    println!("poll_interval          {}s", config.poll_interval);
    println!("alert_throttle_seconds {}", config.alert_throttle_seconds);
    println!("hypervisor             {}", config.hypervisor_enabled());

    let notifier = Notifier::from_config(config)?;
    let sinks = notifier.sink_names();
    if sinks.is_empty() {
        println!("sinks                  (log only)");
    } else {
        println!("sinks                  {}", sinks.join(", "));
    }
    Ok(())
}

async fn top(limit: usize) -> Result<()> {
    let mut collector = HostCollector::new();
    let sample = collector.sample().await?;

    println!(
        "Host CPU {:.1}%  Memory {:.1}%",
        sample.host.cpu_percent, sample.host.mem_percent
    );
    println!("{:<8} {:<6} {:<6} CMD", "PID", "CPU%", "MEM%");

    let mut processes = sample.processes;
    processes.sort_by(|a, b| b.cpu_percent.total_cmp(&a.cpu_percent));
    for p in processes.iter().take(limit) {
        println!(
            "{:<8} {:<6.1} {:<6.1} {}",
            p.pid, p.cpu_percent, p.mem_percent, p.name
        );
    }
    Ok(())
}

fn history(config: &Config, limit: usize) -> Result<()> {
    let Some(path) = &config.journal.path else {
        println!("No journal configured; set [journal] path to record alerts.");
        return Ok(());
    };
    if !path.exists() {
        println!("No alerts recorded yet.");
        return Ok(());
    }

    for record in AlertJournal::read_recent(path, limit)? {
        let when = Local
            .timestamp_opt(record.timestamp as i64, 0)
            .single()
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| record.timestamp.to_string());
        println!("{when}  [{}] {}", record.subject, record.body);
    }
    Ok(())
}
