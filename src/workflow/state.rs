//! Workflow State
//!
//! The record a workflow execution keeps about itself: overall status,
//! per-step results and states, and the context that references resolve
//! against. Snapshots of it are written to the
//! [`StateStore`](crate::state::StateStore) after every step so a caller
//! polling by workflow id always sees the latest progress.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::model::Plan;

/// Lifecycle status of a workflow.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    /// A plan is being produced or has just been accepted
    Planning,
    /// Steps are running
    Executing,
    /// Every executed step succeeded
    Completed,
    /// A critical step failed and the remaining steps were skipped
    Failed,
    /// At least one non-critical step failed
    Partial,
    /// Dry run: the plan was produced but not executed
    Suggested,
}

impl WorkflowStatus {
    /// Returns true for states a workflow never leaves.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Partial | Self::Suggested
        )
    }

    /// Wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Partial => "partial",
            Self::Suggested => "suggested",
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution state of a single step.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepState {
    /// Not reached yet
    Pending,
    /// Action invocation in flight
    Running,
    /// Action returned success
    Succeeded,
    /// Action returned or raised an error
    Failed,
    /// Never executed because an earlier critical step failed
    Skipped,
}

/// Outcome status stored for an executed step.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Success,
    Error,
}

/// Stored outcome of an executed step.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StepResult {
    pub status: ResultStatus,

    /// Raw action output (`null` on error)
    #[serde(default)]
    pub data: Value,

    /// Error message when `status` is `error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub timestamp: DateTime<Utc>,
}

impl StepResult {
    /// A successful result carrying the action output.
    pub fn success(data: Value) -> Self {
        Self {
            status: ResultStatus::Success,
            data,
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// A failed result carrying the error message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ResultStatus::Error,
            data: Value::Null,
            error: Some(message.into()),
            timestamp: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }
}

/// Full state of one workflow execution.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WorkflowState {
    pub workflow_id: String,

    pub status: WorkflowStatus,

    pub plan: Plan,

    /// Results keyed by step id, only for steps that ran
    #[serde(default, alias = "per_step_results")]
    pub step_results: BTreeMap<String, StepResult>,

    /// State of every step in the plan
    #[serde(default)]
    pub step_states: BTreeMap<String, StepState>,

    /// Engine constants, caller context and `save_to` bindings
    #[serde(default)]
    pub context: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Why the workflow ended in `failed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,

    pub ttl_seconds: u64,
}

impl WorkflowState {
    /// Creates a state in `planning` with every step `pending`.
    pub fn new(workflow_id: impl Into<String>, plan: Plan, ttl_seconds: u64) -> Self {
        let step_states = plan
            .steps
            .iter()
            .map(|s| (s.step_id.clone(), StepState::Pending))
            .collect();

        Self {
            workflow_id: workflow_id.into(),
            status: WorkflowStatus::Planning,
            plan,
            step_results: BTreeMap::new(),
            step_states,
            context: Map::new(),
            prompt: None,
            user_id: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
            ttl_seconds,
        }
    }

    /// Marks a step as running.
    pub fn mark_running(&mut self, step_id: &str) {
        self.step_states
            .insert(step_id.to_string(), StepState::Running);
    }

    /// Records a successful step.
    pub fn mark_completed(&mut self, step_id: &str, data: Value) {
        self.step_states
            .insert(step_id.to_string(), StepState::Succeeded);
        self.step_results
            .insert(step_id.to_string(), StepResult::success(data));
    }

    /// Records a failed step.
    pub fn mark_failed(&mut self, step_id: &str, message: impl Into<String>) {
        self.step_states
            .insert(step_id.to_string(), StepState::Failed);
        self.step_results
            .insert(step_id.to_string(), StepResult::error(message));
    }

    /// Marks every step that has not started as skipped.
    pub fn skip_pending(&mut self) {
        for state in self.step_states.values_mut() {
            if *state == StepState::Pending {
                *state = StepState::Skipped;
            }
        }
    }

    /// Moves the workflow into a terminal status.
    pub fn finish(&mut self, status: WorkflowStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
    }

    /// Returns the state of a step, if it belongs to the plan.
    pub fn step_state(&self, step_id: &str) -> Option<StepState> {
        self.step_states.get(step_id).copied()
    }

    /// Number of steps that ran (succeeded or failed).
    pub fn executed_count(&self) -> usize {
        self.step_results.len()
    }

    /// Number of steps that failed.
    pub fn failed_count(&self) -> usize {
        self.step_results
            .values()
            .filter(|r| !r.is_success())
            .count()
    }

    /// Returns true once the workflow reached a terminal status.
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}
