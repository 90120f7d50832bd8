use serde::{Deserialize, Serialize};

/// Host-wide utilisation for one poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HostMetrics {
    pub cpu_percent: f64,
    pub mem_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSample {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f64,
    pub mem_percent: f64,
}

/// One domain as reported by the hypervisor.
///
/// Field names on the wire follow libvirt's `dominfo` naming so exporter
/// output can be consumed unchanged. Numeric fields are signed so that a
/// bogus negative reading is detected by the engine instead of wrapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmRecord {
    pub name: String,
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub state: i32,
    #[serde(rename = "maxMemKB", default)]
    pub max_mem_kb: i64,
    #[serde(rename = "memKB", default)]
    pub mem_kb: i64,
    #[serde(default)]
    pub vcpus: i64,
    #[serde(rename = "cpuTime", default)]
    pub cpu_time_ns: i64,
}

impl VmRecord {
    /// Memory usage as a percentage of the configured maximum.
    ///
    /// Undefined when the domain reports no maximum.
    pub fn mem_percent(&self) -> Option<f64> {
        if self.max_mem_kb > 0 {
            Some(self.mem_kb as f64 / self.max_mem_kb as f64 * 100.0)
        } else {
            None
        }
    }
}

/// Everything observed in one poll cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub host: Option<HostMetrics>,
    #[serde(default)]
    pub processes: Vec<ProcessSample>,
    #[serde(default)]
    pub vms: Vec<VmRecord>,
    /// Measured wall-clock seconds since the previous snapshot; `None` on the first.
    #[serde(default)]
    pub interval_seconds: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    HostCpu,
    HostMemory,
    ProcessCpu,
    ProcessMemory,
    VmCpu,
    VmMemory,
}

impl AlertKind {
    pub fn subject(self) -> &'static str {
        match self {
            Self::HostCpu => "Host CPU Alert",
            Self::HostMemory => "Host Memory Alert",
            Self::ProcessCpu => "Process CPU Alert",
            Self::ProcessMemory => "Process Memory Alert",
            Self::VmCpu => "VM CPU Alert",
            Self::VmMemory => "VM Memory Alert",
        }
    }
}

/// A threshold crossing that passed the throttle and was handed to the sinks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub key: String,
    pub subject: String,
    pub body: String,
    pub value: f64,
    pub threshold: f64,
}
