//! Caller-Facing Results
//!
//! What `execute`, `suggest` and `run` hand back:
//!
//! ```json
//! {"status": "success", "workflow_id": "...", "data": {"workflow_status": "partial", ...}}
//! {"status": "error", "workflow_id": "...", "error": "Step 'A' failed: ..."}
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::workflow::{Plan, StepResult, StepState, WorkflowState, WorkflowStatus};

/// Whether a request executes its plan or only returns it.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Execution,
    Suggestion,
}

/// Outcome details of a workflow that was not aborted.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub workflow_status: WorkflowStatus,
    pub mode: ExecutionMode,
    pub summary: String,
    pub plan: Plan,

    /// Results of the steps that ran
    pub results: BTreeMap<String, StepResult>,

    pub step_states: BTreeMap<String, StepState>,

    pub steps_executed: usize,
    pub steps_failed: usize,
    pub duration_ms: u64,
}

impl ExecutionReport {
    pub fn from_state(state: &WorkflowState, mode: ExecutionMode, duration_ms: u64) -> Self {
        Self {
            workflow_status: state.status,
            mode,
            summary: state.plan.summary.clone(),
            plan: state.plan.clone(),
            results: state.step_results.clone(),
            step_states: state.step_states.clone(),
            steps_executed: state.executed_count(),
            steps_failed: state.failed_count(),
            duration_ms,
        }
    }
}

/// Final answer for one workflow request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum WorkflowResponse {
    /// Completed, partial or suggested
    Success {
        workflow_id: String,
        data: ExecutionReport,
    },
    /// Aborted on a critical step, or never planned
    Error { workflow_id: String, error: String },
}

impl WorkflowResponse {
    pub fn workflow_id(&self) -> &str {
        match self {
            Self::Success { workflow_id, .. } | Self::Error { workflow_id, .. } => workflow_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn report(&self) -> Option<&ExecutionReport> {
        match self {
            Self::Success { data, .. } => Some(data),
            Self::Error { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Success { .. } => None,
            Self::Error { error, .. } => Some(error),
        }
    }
}
