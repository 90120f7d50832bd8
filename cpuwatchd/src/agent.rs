//! The poll loop.
//!
//! Each tick takes one snapshot and evaluates it to completion, sink calls
//! included, before the next tick is awaited. A stop request is only looked
//! at while waiting for a tick.

use crate::alerts::{AlertEngine, EvaluationReport};
use crate::collectors::{MetricSource, VmSource};
use crate::types::Snapshot;
use anyhow::Result;
use log::{debug, info, warn};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior, interval};

/// Assembles snapshots from the configured sources and measures the time
/// between consecutive ones.
pub struct SnapshotBuilder {
    metrics: Box<dyn MetricSource>,
    vms: Option<Box<dyn VmSource>>,
    last_taken: Option<Instant>,
}

impl SnapshotBuilder {
    pub fn new(metrics: Box<dyn MetricSource>) -> Self {
        Self {
            metrics,
            vms: None,
            last_taken: None,
        }
    }

    pub fn with_vms(mut self, vms: Box<dyn VmSource>) -> Self {
        self.vms = Some(vms);
        self
    }

    /// A failing source leaves its part of the snapshot empty.
    pub async fn next(&mut self) -> Snapshot {
        let mut snapshot = Snapshot::default();

        match self.metrics.sample().await {
            Ok(sample) => {
                snapshot.host = Some(sample.host);
                snapshot.processes = sample.processes;
            }
            Err(err) => warn!("[collector] host sample failed: {err:#}"),
        }

        if let Some(source) = &self.vms {
            match source.list_domains().await {
                Ok(domains) => snapshot.vms = domains,
                Err(err) => warn!("[collector] vm inventory unavailable: {err:#}"),
            }
        }

        let now = Instant::now();
        snapshot.interval_seconds = self
            .last_taken
            .map(|prev| now.duration_since(prev).as_secs_f64());
        self.last_taken = Some(now);
        snapshot
    }
}

pub struct Agent {
    snapshots: SnapshotBuilder,
    engine: AlertEngine,
    period: Duration,
}

impl Agent {
    pub fn new(snapshots: SnapshotBuilder, engine: AlertEngine, period: Duration) -> Self {
        Self {
            snapshots,
            engine,
            period,
        }
    }

    /// Takes and evaluates a single snapshot.
    pub async fn poll_once(&mut self) -> EvaluationReport {
        let snapshot = self.snapshots.next().await;
        let report = self
            .engine
            .evaluate_at(&snapshot, Instant::now().into_std())
            .await;
        debug!(
            "[agent] evaluated host={} processes={} vms={} alerts={} suppressed={} errors={}",
            snapshot.host.is_some(),
            snapshot.processes.len(),
            snapshot.vms.len(),
            report.alerts.len(),
            report.suppressed,
            report.errors.len()
        );
        let undelivered = report.errors.iter().filter(|e| e.is_sink_failure()).count();
        if undelivered > 0 {
            warn!("[agent] {undelivered} notification(s) not delivered this cycle");
        }
        report
    }

    /// Polls until `shutdown` turns true or its sender goes away.
    /// Returns the number of completed evaluations.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<u64> {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycles = 0u64;

        info!("[agent] polling every {:?}", self.period);
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            self.poll_once().await;
            cycles += 1;
        }

        info!("[agent] stopped after {cycles} cycles");
        Ok(cycles)
    }
}
