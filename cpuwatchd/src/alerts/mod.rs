//! Threshold evaluation.
//!
//! One snapshot is checked in three independent phases (host, processes,
//! VMs). A malformed record is reported and skipped without affecting the
//! other phases or sibling records. Every violation goes through the
//! throttle before it is logged and handed to the notifier.

mod delta;
mod throttle;

pub use delta::DeltaEstimator;
pub use throttle::ThrottleGate;

use crate::config::{Config, ThresholdConfig};
use crate::error::EvalError;
use crate::notify::Notifier;
use crate::types::{Alert, AlertKind, HostMetrics, ProcessSample, Snapshot, VmRecord};
use log::{debug, warn};
use std::collections::HashSet;
use std::time::{Duration, Instant};

/// Only the busiest processes are checked each cycle.
pub const MAX_PROCESSES_EVALUATED: usize = 20;

/// Outcome of evaluating one snapshot.
#[derive(Debug, Default)]
pub struct EvaluationReport {
    pub alerts: Vec<Alert>,
    /// Violations held back by the throttle.
    pub suppressed: usize,
    pub errors: Vec<EvalError>,
}

impl EvaluationReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn alert_keys(&self) -> Vec<&str> {
        self.alerts.iter().map(|a| a.key.as_str()).collect()
    }
}

struct Violation {
    kind: AlertKind,
    key: String,
    body: String,
    value: f64,
    threshold: f64,
}

pub struct AlertEngine {
    host: ThresholdConfig,
    process: ThresholdConfig,
    vm: ThresholdConfig,
    throttle_window: Duration,
    fallback_interval: f64,
    baseline_retention_cycles: u32,
    throttle: ThrottleGate,
    vm_cpu: DeltaEstimator,
    notifier: Notifier,
}

impl AlertEngine {
    pub fn new(cfg: &Config, notifier: Notifier) -> Self {
        Self {
            host: cfg.host_alerts,
            process: cfg.process_alerts,
            vm: cfg.vm_alerts.thresholds(),
            throttle_window: cfg.throttle_window(),
            fallback_interval: cfg.poll_interval,
            baseline_retention_cycles: cfg.vm_alerts.baseline_retention_cycles,
            throttle: ThrottleGate::new(),
            vm_cpu: DeltaEstimator::new(),
            notifier,
        }
    }

    pub async fn evaluate(&mut self, snapshot: &Snapshot) -> EvaluationReport {
        self.evaluate_at(snapshot, Instant::now()).await
    }

    /// Evaluates `snapshot` as if observed at `now`.
    pub async fn evaluate_at(&mut self, snapshot: &Snapshot, now: Instant) -> EvaluationReport {
        let mut report = EvaluationReport::default();

        if let Some(host) = &snapshot.host {
            match self.host_violations(host) {
                Ok(violations) => self.raise_all(violations, now, &mut report).await,
                Err(err) => reject(err, &mut report),
            }
        }

        for process in self.rank_processes(&snapshot.processes, &mut report) {
            let violations = self.process_violations(process);
            self.raise_all(violations, now, &mut report).await;
        }

        let interval = snapshot.interval_seconds.or(Some(self.fallback_interval));
        let mut observed: HashSet<&str> = HashSet::new();
        for vm in &snapshot.vms {
            observed.insert(vm.name.as_str());
            match self.vm_violations(vm, interval) {
                Ok(violations) => self.raise_all(violations, now, &mut report).await,
                Err(err) => reject(err, &mut report),
            }
        }

        self.throttle.prune(now, self.throttle_window);
        self.vm_cpu.end_cycle(&observed, self.baseline_retention_cycles);

        report
    }

    /// Last cumulative CPU time recorded for a domain.
    pub fn vm_baseline(&self, name: &str) -> Option<u64> {
        self.vm_cpu.baseline(name)
    }

    pub fn throttled_keys(&self) -> usize {
        self.throttle.len()
    }

    fn host_violations(&self, host: &HostMetrics) -> Result<Vec<Violation>, EvalError> {
        if let Some(reason) = percent_problem(host.cpu_percent, false)
            .or_else(|| percent_problem(host.mem_percent, true))
        {
            return Err(EvalError::MalformedHost { reason });
        }

        let mut out = Vec::new();
        if host.cpu_percent >= self.host.cpu_percent {
            out.push(Violation {
                kind: AlertKind::HostCpu,
                key: "host_cpu".to_string(),
                body: format!("Host CPU high: {:.1}%", host.cpu_percent),
                value: host.cpu_percent,
                threshold: self.host.cpu_percent,
            });
        }
        if host.mem_percent >= self.host.memory_percent {
            out.push(Violation {
                kind: AlertKind::HostMemory,
                key: "host_mem".to_string(),
                body: format!("Host Memory high: {:.1}%", host.mem_percent),
                value: host.mem_percent,
                threshold: self.host.memory_percent,
            });
        }
        Ok(out)
    }

    /// Busiest valid processes first; equal CPU keeps input order.
    fn rank_processes<'a>(
        &self,
        processes: &'a [ProcessSample],
        report: &mut EvaluationReport,
    ) -> Vec<&'a ProcessSample> {
        let mut ranked: Vec<&ProcessSample> = Vec::with_capacity(processes.len());
        for process in processes {
            let problem = percent_problem(process.cpu_percent, false)
                .or_else(|| percent_problem(process.mem_percent, true));
            match problem {
                Some(reason) => reject(
                    EvalError::MalformedProcess {
                        pid: process.pid,
                        reason,
                    },
                    report,
                ),
                None => ranked.push(process),
            }
        }
        ranked.sort_by(|a, b| b.cpu_percent.total_cmp(&a.cpu_percent));
        ranked.truncate(MAX_PROCESSES_EVALUATED);
        ranked
    }

    fn process_violations(&self, p: &ProcessSample) -> Vec<Violation> {
        let mut out = Vec::new();
        if p.cpu_percent >= self.process.cpu_percent {
            out.push(Violation {
                kind: AlertKind::ProcessCpu,
                key: format!("proc_cpu_{}", p.pid),
                body: format!("Process {} (PID {}) CPU {:.1}%", p.name, p.pid, p.cpu_percent),
                value: p.cpu_percent,
                threshold: self.process.cpu_percent,
            });
        }
        if p.mem_percent >= self.process.memory_percent {
            out.push(Violation {
                kind: AlertKind::ProcessMemory,
                key: format!("proc_mem_{}", p.pid),
                body: format!(
                    "Process {} (PID {}) Memory {:.1}%",
                    p.name, p.pid, p.mem_percent
                ),
                value: p.mem_percent,
                threshold: self.process.memory_percent,
            });
        }
        out
    }

    fn vm_violations(
        &mut self,
        vm: &VmRecord,
        interval: Option<f64>,
    ) -> Result<Vec<Violation>, EvalError> {
        validate_vm(vm)?;

        let mut out = Vec::new();
        let cpu_time_ns = vm.cpu_time_ns as u64;
        let cpu = self.vm_cpu.estimate(&vm.name, cpu_time_ns, interval);
        if let Some(cpu) = cpu.filter(|cpu| *cpu >= self.vm.cpu_percent) {
            out.push(Violation {
                kind: AlertKind::VmCpu,
                key: format!("vm_cpu_{}", vm.name),
                body: format!("VM {} CPU high: {:.1}% (vcpus={})", vm.name, cpu, vm.vcpus),
                value: cpu,
                threshold: self.vm.cpu_percent,
            });
        }
        if let Some(mem) = vm.mem_percent().filter(|mem| *mem >= self.vm.memory_percent) {
            out.push(Violation {
                kind: AlertKind::VmMemory,
                key: format!("vm_mem_{}", vm.name),
                body: format!(
                    "VM {} Memory high: {:.1}% ({}KB/{}KB)",
                    vm.name, mem, vm.mem_kb, vm.max_mem_kb
                ),
                value: mem,
                threshold: self.vm.memory_percent,
            });
        }
        Ok(out)
    }

    async fn raise_all(
        &mut self,
        violations: Vec<Violation>,
        now: Instant,
        report: &mut EvaluationReport,
    ) {
        for violation in violations {
            self.raise(violation, now, report).await;
        }
    }

    async fn raise(&mut self, violation: Violation, now: Instant, report: &mut EvaluationReport) {
        if !self.throttle.allow(&violation.key, now, self.throttle_window) {
            debug!("[alert] {} suppressed (throttled)", violation.key);
            report.suppressed += 1;
            return;
        }

        let alert = Alert {
            kind: violation.kind,
            subject: violation.kind.subject().to_string(),
            key: violation.key,
            body: violation.body,
            value: violation.value,
            threshold: violation.threshold,
        };
        warn!("[{}] {}", alert.subject, alert.body);
        let failures = self.notifier.dispatch(&alert).await;
        report.errors.extend(failures);
        report.alerts.push(alert);
    }
}

fn reject(err: EvalError, report: &mut EvaluationReport) {
    warn!("[alert] {err}");
    report.errors.push(err);
}

fn percent_problem(value: f64, bounded: bool) -> Option<String> {
    if !value.is_finite() {
        Some(format!("non-finite percentage {value}"))
    } else if value < 0.0 {
        Some(format!("negative percentage {value}"))
    } else if bounded && value > 100.0 {
        Some(format!("percentage {value} above 100"))
    } else {
        None
    }
}

fn validate_vm(vm: &VmRecord) -> Result<(), EvalError> {
    let malformed = |reason: String| EvalError::MalformedVm {
        name: vm.name.clone(),
        reason,
    };
    if vm.name.trim().is_empty() {
        return Err(malformed("empty domain name".to_string()));
    }
    for (field, value) in [
        ("maxMemKB", vm.max_mem_kb),
        ("memKB", vm.mem_kb),
        ("vcpus", vm.vcpus),
        ("cpuTime", vm.cpu_time_ns),
    ] {
        if value < 0 {
            return Err(malformed(format!("negative {field} {value}")));
        }
    }
    Ok(())
}
