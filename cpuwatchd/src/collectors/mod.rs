pub mod host;
pub mod vm;

pub use host::{HostCollector, HostSample};
pub use vm::VmInventory;

use crate::types::VmRecord;
use anyhow::Result;
use async_trait::async_trait;

/// Host and per-process readings for one poll.
#[async_trait]
pub trait MetricSource: Send {
    async fn sample(&mut self) -> Result<HostSample>;
}

/// Domains known to the hypervisor at poll time.
#[async_trait]
pub trait VmSource: Send + Sync {
    async fn list_domains(&self) -> Result<Vec<VmRecord>>;
}
