use super::MetricSource;
use crate::types::{HostMetrics, ProcessSample};
use anyhow::Result;
use async_trait::async_trait;
use log::debug;
use sysinfo::{MINIMUM_CPU_UPDATE_INTERVAL, ProcessesToUpdate, System};
use tokio::time::sleep;

#[derive(Debug, Clone)]
pub struct HostSample {
    pub host: HostMetrics,
    /// Ordered by pid.
    pub processes: Vec<ProcessSample>,
}

/// Reads host and process usage through `sysinfo`.
///
/// CPU usage is a difference between two refreshes, so the first sample
/// primes the counters and waits the minimum update interval before reading.
pub struct HostCollector {
    sys: System,
    primed: bool,
}

impl HostCollector {
    pub fn new() -> Self {
        Self {
            sys: System::new(),
            primed: false,
        }
    }

    fn refresh(&mut self) {
        self.sys.refresh_cpu_usage();
        self.sys.refresh_memory();
        self.sys.refresh_processes(ProcessesToUpdate::All, true);
    }

    fn read(&self) -> HostSample {
        let total_mem = self.sys.total_memory();
        let host = HostMetrics {
            cpu_percent: self.sys.global_cpu_usage() as f64,
            mem_percent: percent_of(self.sys.used_memory(), total_mem),
        };

        let mut processes: Vec<ProcessSample> = self
            .sys
            .processes()
            .iter()
            .map(|(pid, proc_)| ProcessSample {
                pid: pid.as_u32(),
                name: proc_.name().to_string_lossy().into_owned(),
                cpu_percent: proc_.cpu_usage() as f64,
                mem_percent: percent_of(proc_.memory(), total_mem),
            })
            .collect();
        processes.sort_by_key(|p| p.pid);

        HostSample { host, processes }
    }
}

impl Default for HostCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricSource for HostCollector {
    async fn sample(&mut self) -> Result<HostSample> {
        if !self.primed {
            self.refresh();
            sleep(MINIMUM_CPU_UPDATE_INTERVAL).await;
            self.primed = true;
        }
        self.refresh();
        let sample = self.read();
        debug!(
            "[collector] host cpu={:.1}% mem={:.1}% processes={}",
            sample.host.cpu_percent,
            sample.host.mem_percent,
            sample.processes.len()
        );
        Ok(sample)
    }
}

fn percent_of(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}
