//! Audit Log
//!
//! Best-effort recording of workflow execution. Every call swallows sink
//! failures after logging them; a disabled log does nothing.

use std::sync::Arc;

use log::{debug, error};
use serde_json::{json, Value};

use super::entry::{AuditEntry, AuditState, WORKFLOW_ENTRY};
use super::sink::{AuditSink, JsonlAuditSink};
use crate::config::Settings;

/// Longest prompt kept in the trail, in characters.
pub const MAX_PROMPT_CHARS: usize = 2_000;

#[derive(Clone)]
pub struct AuditLog {
    sink: Option<Arc<dyn AuditSink>>,
}

impl AuditLog {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink: Some(sink) }
    }

    pub fn disabled() -> Self {
        Self { sink: None }
    }

    /// JSON-lines log at `settings.audit_path()`, or disabled.
    pub fn from_settings(settings: &Settings) -> Self {
        if settings.audit_enabled {
            Self::new(Arc::new(JsonlAuditSink::new(settings.audit_path())))
        } else {
            Self::disabled()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    async fn record(&self, entry: AuditEntry) {
        let Some(sink) = &self.sink else {
            return;
        };

        let (workflow_id, step_name) = (entry.workflow_id.clone(), entry.step_name.clone());
        match sink.write(entry).await {
            Ok(()) => debug!("Audit: {} / {}", workflow_id, step_name),
            Err(e) => error!(
                "Audit write failed for {} / {}: {}",
                workflow_id, step_name, e
            ),
        }
    }

    /// Opens the workflow row.
    pub async fn log_start(
        &self,
        workflow_id: &str,
        prompt: Option<&str>,
        user_id: Option<&str>,
        metadata: Value,
    ) {
        let prompt: Option<String> = prompt.map(|p| p.chars().take(MAX_PROMPT_CHARS).collect());
        let details = json!({
            "prompt": prompt,
            "user_id": user_id,
            "metadata": metadata,
        });

        self.record(AuditEntry::new(
            workflow_id,
            WORKFLOW_ENTRY,
            AuditState::Started,
            details,
        ))
        .await;
    }

    /// Opens or updates a step row.
    pub async fn log_step(
        &self,
        workflow_id: &str,
        step_name: &str,
        state: AuditState,
        details: Value,
    ) {
        self.record(AuditEntry::new(workflow_id, step_name, state, details))
            .await;
    }

    /// Closes the workflow row. The row is marked `completed` when
    /// `result.status` is `"success"`, `error` otherwise.
    pub async fn log_complete(&self, workflow_id: &str, result: Value, duration_ms: Option<u64>) {
        let status = result
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("success")
            .to_string();
        let state = if status == "success" {
            AuditState::Completed
        } else {
            AuditState::Error
        };

        let mut entry = AuditEntry::new(
            workflow_id,
            WORKFLOW_ENTRY,
            state,
            json!({ "result": result }),
        )
        .with_status(status);
        if let Some(ms) = duration_ms {
            entry = entry.with_duration(ms);
        }

        self.record(entry).await;
    }

    /// Closes the workflow row as an error.
    pub async fn log_error(&self, workflow_id: &str, error: &str) {
        self.log_complete(
            workflow_id,
            json!({ "status": "error", "error": error }),
            None,
        )
        .await;
    }

    /// The trail of one workflow; empty when disabled or unreadable.
    pub async fn entries(&self, workflow_id: &str) -> Vec<AuditEntry> {
        let Some(sink) = &self.sink else {
            return Vec::new();
        };
        match sink.entries(workflow_id).await {
            Ok(entries) => entries,
            Err(e) => {
                error!("Audit read failed for {}: {}", workflow_id, e);
                Vec::new()
            }
        }
    }
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
