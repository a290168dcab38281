//! Audit Entry
//!
//! One row of the audit trail, identified by `(workflow_id, step_name)`.
//! Later writes with the same key update the row in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Name of the row describing the workflow as a whole.
pub const WORKFLOW_ENTRY: &str = "__workflow__";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuditState {
    Started,
    Completed,
    Error,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub workflow_id: String,
    pub step_name: String,
    pub state: AuditState,

    #[serde(default)]
    pub details: Value,

    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl AuditEntry {
    pub fn new(
        workflow_id: impl Into<String>,
        step_name: impl Into<String>,
        state: AuditState,
        details: Value,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            step_name: step_name.into(),
            state,
            details,
            timestamp: Utc::now(),
            duration_ms: None,
            status: None,
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn same_key(&self, other: &AuditEntry) -> bool {
        self.workflow_id == other.workflow_id && self.step_name == other.step_name
    }

    pub fn is_workflow_entry(&self) -> bool {
        self.step_name == WORKFLOW_ENTRY
    }

    /// Folds a newer write for the same key into this entry. Detail maps
    /// are merged key by key; every other field takes the newer value when
    /// present.
    pub fn merge(&mut self, newer: AuditEntry) {
        self.state = newer.state;
        self.timestamp = newer.timestamp;

        match (&mut self.details, newer.details) {
            (Value::Object(current), Value::Object(update)) => {
                current.extend(update);
            }
            (_, Value::Null) => {}
            (current, update) => *current = update,
        }

        if newer.duration_ms.is_some() {
            self.duration_ms = newer.duration_ms;
        }
        if newer.status.is_some() {
            self.status = newer.status;
        }
    }
}
