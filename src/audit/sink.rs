//! Audit Sinks
//!
//! Where audit entries end up. A sink upserts by `(workflow_id, step_name)`.
//!
//! - [`MemoryAuditSink`]: in-process, for tests and embedding
//! - [`JsonlAuditSink`]: append-only JSON lines file; reads fold updates by key

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use log::warn;
use tokio::io::AsyncWriteExt;

use super::entry::AuditEntry;

/// Audit write/read failures. Never escalated past [`AuditLog`](super::AuditLog).
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("audit serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("audit sink unavailable: {0}")]
    Unavailable(String),
}

/// Storage contract for the audit trail.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Inserts the entry, or merges it into the existing one with the same key.
    async fn write(&self, entry: AuditEntry) -> Result<(), AuditError>;

    /// Entries of one workflow, in first-write order.
    async fn entries(&self, workflow_id: &str) -> Result<Vec<AuditEntry>, AuditError>;
}

fn upsert(entries: &mut Vec<AuditEntry>, entry: AuditEntry) {
    match entries.iter_mut().find(|e| e.same_key(&entry)) {
        Some(existing) => existing.merge(entry),
        None => entries.push(entry),
    }
}

/// Keeps the trail in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every entry of every workflow.
    pub fn all(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn write(&self, entry: AuditEntry) -> Result<(), AuditError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        upsert(&mut entries, entry);
        Ok(())
    }

    async fn entries(&self, workflow_id: &str) -> Result<Vec<AuditEntry>, AuditError> {
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.workflow_id == workflow_id)
            .cloned()
            .collect())
    }
}

/// Appends every write as one JSON line.
#[derive(Debug)]
pub struct JsonlAuditSink {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonlAuditSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    async fn write(&self, entry: AuditEntry) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    async fn entries(&self, workflow_id: &str) -> Result<Vec<AuditEntry>, AuditError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for (number, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEntry>(line) {
                Ok(entry) if entry.workflow_id == workflow_id => upsert(&mut entries, entry),
                Ok(_) => {}
                Err(e) => warn!(
                    "Skipping malformed audit line {} in {}: {}",
                    number + 1,
                    self.path.display(),
                    e
                ),
            }
        }
        Ok(entries)
    }
}
