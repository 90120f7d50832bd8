use anyhow::{Context, Result, bail};
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/cpuwatch/cpuwatch.toml";
pub const CONFIG_ENV_VAR: &str = "CPUWATCH_CONFIG";

const DEFAULT_POLL_INTERVAL_SECS: f64 = 2.0;
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
const DEFAULT_THROTTLE_SECS: u64 = 60;
const DEFAULT_THRESHOLD_PERCENT: f64 = 100.0;
const DEFAULT_SINK_TIMEOUT_SECS: u64 = 10;
const DEFAULT_SMTP_PORT: u16 = 587;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Seconds between samples. Also the fallback interval for a snapshot
    /// that carries no measured interval.
    pub poll_interval: f64,
    pub alert_throttle_seconds: u64,
    /// Legacy switch, equivalent to `hypervisor.enabled`.
    pub use_hypervisor: bool,
    pub host_alerts: ThresholdConfig,
    pub process_alerts: ThresholdConfig,
    pub vm_alerts: VmAlertConfig,
    pub notify: NotifyConfig,
    pub email: EmailConfig,
    pub webhook: WebhookConfig,
    pub journal: JournalConfig,
    pub hypervisor: HypervisorConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL_SECS,
            alert_throttle_seconds: DEFAULT_THROTTLE_SECS,
            use_hypervisor: false,
            host_alerts: ThresholdConfig::default(),
            process_alerts: ThresholdConfig::default(),
            vm_alerts: VmAlertConfig::default(),
            notify: NotifyConfig::default(),
            email: EmailConfig::default(),
            webhook: WebhookConfig::default(),
            journal: JournalConfig::default(),
            hypervisor: HypervisorConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// CPU and memory limits for one dimension. 100 effectively disables a check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            cpu_percent: DEFAULT_THRESHOLD_PERCENT,
            memory_percent: DEFAULT_THRESHOLD_PERCENT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VmAlertConfig {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    /// Accepted for compatibility with older configs; has no effect.
    pub cpu_time_delta_ns: Option<u64>,
    /// Evict a domain's CPU baseline after this many polls without seeing
    /// it. Zero keeps baselines for the lifetime of the process.
    pub baseline_retention_cycles: u32,
}

impl Default for VmAlertConfig {
    fn default() -> Self {
        Self {
            cpu_percent: DEFAULT_THRESHOLD_PERCENT,
            memory_percent: DEFAULT_THRESHOLD_PERCENT,
            cpu_time_delta_ns: None,
            baseline_retention_cycles: 0,
        }
    }
}

impl VmAlertConfig {
    pub fn thresholds(&self) -> ThresholdConfig {
        ThresholdConfig {
            cpu_percent: self.cpu_percent,
            memory_percent: self.memory_percent,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub sink_timeout_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            sink_timeout_secs: DEFAULT_SINK_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub enabled: bool,
    pub smtp_server: String,
    pub smtp_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
    pub to: Vec<String>,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_server: String::new(),
            smtp_port: DEFAULT_SMTP_PORT,
            username: None,
            password: None,
            from: String::new(),
            to: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub enabled: bool,
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HypervisorConfig {
    pub enabled: bool,
    /// JSON array of domain records written by an external exporter.
    pub inventory_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Loads the configuration named on the command line, in
    /// `CPUWATCH_CONFIG`, or at the default path, in that order.
    ///
    /// Only the default path may be absent; then built-in defaults apply.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let from_env = std::env::var(CONFIG_ENV_VAR).ok();
        let (path, required) = resolve_path(explicit, from_env.as_deref());

        if !required && !path.exists() {
            warn!(
                "[config] {} not found; using built-in defaults",
                path.display()
            );
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config = Self::parse(&content, is_json(path))
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config {}", path.display()))?;
        if config.vm_alerts.cpu_time_delta_ns.is_some() {
            warn!("[config] vm_alerts.cpu_time_delta_ns is not supported and will be ignored");
        }
        Ok(config)
    }

    pub fn parse(content: &str, json: bool) -> Result<Self> {
        if json {
            Ok(serde_json::from_str(content)?)
        } else {
            Ok(toml::from_str(content)?)
        }
    }

    pub fn validate(&self) -> Result<()> {
        match Duration::try_from_secs_f64(self.poll_interval) {
            Ok(period) if !period.is_zero() && period <= MAX_POLL_INTERVAL => {}
            _ => bail!(
                "poll_interval must be between 1ns and {}s, got {}",
                MAX_POLL_INTERVAL.as_secs(),
                self.poll_interval
            ),
        }
        for (section, t) in [
            ("host_alerts", self.host_alerts),
            ("process_alerts", self.process_alerts),
            ("vm_alerts", self.vm_alerts.thresholds()),
        ] {
            for (field, value) in [
                ("cpu_percent", t.cpu_percent),
                ("memory_percent", t.memory_percent),
            ] {
                if !value.is_finite() || value < 0.0 {
                    bail!("{section}.{field} must be a non-negative number, got {value}");
                }
            }
        }
        if self.notify.sink_timeout_secs == 0 {
            bail!("notify.sink_timeout_secs must be at least 1");
        }
        if self.email.enabled {
            if self.email.smtp_server.trim().is_empty() {
                bail!("email.smtp_server is required when email is enabled");
            }
            if self.email.from.trim().is_empty() {
                bail!("email.from is required when email is enabled");
            }
            if self.email.to.is_empty() {
                bail!("email.to needs at least one recipient when email is enabled");
            }
        }
        if self.webhook.enabled && self.webhook.url.trim().is_empty() {
            bail!("webhook.url is required when the webhook is enabled");
        }
        if self.hypervisor_enabled() && self.hypervisor.inventory_path.is_none() {
            bail!("hypervisor.inventory_path is required when the hypervisor is enabled");
        }
        Ok(())
    }

    pub fn throttle_window(&self) -> Duration {
        Duration::from_secs(self.alert_throttle_seconds)
    }

    pub fn poll_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.poll_interval)
            .ok()
            .filter(|period| !period.is_zero() && *period <= MAX_POLL_INTERVAL)
            .unwrap_or(Duration::from_secs_f64(DEFAULT_POLL_INTERVAL_SECS))
    }

    pub fn sink_timeout(&self) -> Duration {
        Duration::from_secs(self.notify.sink_timeout_secs)
    }

    pub fn hypervisor_enabled(&self) -> bool {
        self.use_hypervisor || self.hypervisor.enabled
    }
}

/// Picks the config path and whether it must exist.
fn resolve_path(explicit: Option<&Path>, from_env: Option<&str>) -> (PathBuf, bool) {
    if let Some(path) = explicit {
        return (path.to_path_buf(), true);
    }
    match from_env.map(str::trim).filter(|v| !v.is_empty()) {
        Some(path) => (PathBuf::from(path), true),
        None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}
