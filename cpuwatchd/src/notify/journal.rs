use super::NotificationSink;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    /// Unix seconds.
    pub timestamp: u64,
    pub subject: String,
    pub body: String,
}

/// Appends every alert it receives to a JSON-lines file.
///
/// File access goes through `tokio::fs`, so a stalled filesystem (a FIFO
/// without reader, a hung mount) is cut off by the dispatcher's timeout.
pub struct AlertJournal {
    file_path: PathBuf,
}

impl AlertJournal {
    pub fn new(file_path: PathBuf) -> Self {
        Self { file_path }
    }

    pub async fn record(&self, subject: &str, body: &str) -> Result<()> {
        let record = AlertRecord {
            timestamp: Utc::now().timestamp().max(0) as u64,
            subject: subject.to_string(),
            body: body.to_string(),
        };
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        if let Some(dir) = self.file_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)
            .await
            .with_context(|| format!("failed to open {}", self.file_path.display()))?;
        file.write_all(&line)
            .await
            .with_context(|| format!("failed to append to {}", self.file_path.display()))?;
        file.flush().await?;
        Ok(())
    }

    /// Newest-first view of the last `limit` records in `path`. Lines that
    /// do not decode, including invalid UTF-8, are skipped.
    pub fn read_recent(path: &Path, limit: usize) -> Result<Vec<AlertRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let file =
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let mut tail = VecDeque::with_capacity(limit);
        for line in BufReader::new(file).split(b'\n') {
            let line = line.with_context(|| format!("failed to read {}", path.display()))?;
            let Ok(record) = serde_json::from_slice::<AlertRecord>(&line) else {
                continue;
            };
            if tail.len() == limit {
                tail.pop_front();
            }
            tail.push_back(record);
        }
        Ok(tail.into_iter().rev().collect())
    }
}

#[async_trait]
impl NotificationSink for AlertJournal {
    fn name(&self) -> &'static str {
        "journal"
    }

    async fn send(&self, subject: &str, body: &str) -> Result<()> {
        self.record(subject, body).await
    }
}
