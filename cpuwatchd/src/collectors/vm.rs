//! Hypervisor inventory.
//!
//! Domain enumeration is done by an external exporter that writes a JSON
//! array of `dominfo`-style records, for example:
//!
//!   [{"name":"web01","id":3,"state":1,"maxMemKB":4194304,
//!     "memKB":2097152,"vcpus":4,"cpuTime":81234000000}]
//!
//! Each entry is decoded on its own so one bad record only drops itself.

use super::VmSource;
use crate::types::VmRecord;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use log::warn;
use serde_json::Value;
use std::path::PathBuf;

pub struct VmInventory {
    path: PathBuf,
}

impl VmInventory {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl VmSource for VmInventory {
    async fn list_domains(&self) -> Result<Vec<VmRecord>> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        parse_inventory(&content)
            .with_context(|| format!("failed to parse {}", self.path.display()))
    }
}

pub fn parse_inventory(content: &str) -> Result<Vec<VmRecord>> {
    let entries = match serde_json::from_str::<Value>(content)? {
        Value::Array(entries) => entries,
        other => bail!("expected a JSON array of domains, got {}", type_name(&other)),
    };

    let mut domains = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        let label = entry
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("#{index}"));
        match serde_json::from_value::<VmRecord>(entry) {
            Ok(record) => domains.push(record),
            Err(err) => warn!("[collector] skipping malformed domain {label}: {err}"),
        }
    }
    Ok(domains)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn malformed_entry_does_not_drop_siblings() {
        let content = r#"[
            {"name":"web01","id":1,"state":1,"maxMemKB":1024,"memKB":512,"vcpus":2,"cpuTime":1000},
            {"name":"broken","id":2,"state":1,"maxMemKB":1024,"memKB":512,"vcpus":2,"cpuTime":"lots"},
            {"name":"db01","id":null,"state":5,"maxMemKB":2048,"memKB":0,"vcpus":1,"cpuTime":0}
        ]"#;
        let domains = parse_inventory(content).unwrap();
        let names: Vec<_> = domains.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["web01", "db01"]);
    }

    #[test]
    fn rejects_non_array_document() {
        let err = parse_inventory(r#"{"name":"web01"}"#).unwrap_err();
        assert!(err.to_string().contains("an object"));
    }

    #[tokio::test]
    async fn reads_inventory_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"name":"web01","id":3,"state":1,"maxMemKB":4096,"memKB":1024,"vcpus":4,"cpuTime":5}}]"#
        )
        .unwrap();
        let inventory = VmInventory::new(file.path().to_path_buf());
        let domains = inventory.list_domains().await.unwrap();
        assert_eq!(domains.len(), 1);
        assert_eq!(domains[0].vcpus, 4);
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let inventory = VmInventory::new(PathBuf::from("/nonexistent/domains.json"));
        assert!(inventory.list_domains().await.is_err());
    }
}
