//! Plan Data Model
//!
//! Core data structures describing what a workflow should do: an ordered
//! list of steps, each naming an action and the parameters to call it with.
//!
//! # Example YAML Format
//!
//! ```yaml
//! summary: Upload the weekly report and share it
//! steps:
//!   - step_id: upload
//!     action: onedrive_upload_file
//!     params:
//!       name: "{{report_name}}"
//!     save_to: uploaded
//!
//!   - step_id: share
//!     action: teams_send_message
//!     params:
//!       text: "New report available"
//!       link: "{{uploaded.web_url}}"
//!     critical: false
//!     depends_on:
//!       - upload
//! ```

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::validator::PlanError;

/// A single unit of work inside a plan.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Step {
    /// Unique identifier within the plan
    #[serde(deserialize_with = "string_or_number")]
    pub step_id: String,

    /// Name of the registered action to invoke
    #[serde(alias = "action_name")]
    pub action: String,

    /// Parameters passed to the action; values may contain `{{references}}`
    #[serde(default)]
    pub params: Map<String, Value>,

    /// Context key that receives the raw action output on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_to: Option<String>,

    /// Whether a failure of this step aborts the rest of the workflow
    #[serde(default = "default_critical")]
    pub critical: bool,

    /// Declared predecessors. Recorded for documentation only; steps always
    /// run in array order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    /// Human readable description (planners usually fill this in)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_critical() -> bool {
    true
}

/// Planners emit step ids either as strings (`"1"`) or bare numbers (`1`).
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    match val {
        Value::String(s) => Ok(s.trim().to_string()),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(de::Error::custom("Expected string or number for step_id")),
    }
}

impl Step {
    /// Creates a critical step with no parameters.
    ///
    /// # Example
    ///
    /// ```
    /// use flowpilot::workflow::Step;
    /// use serde_json::json;
    ///
    /// let step = Step::new("fetch", "hubspot_get_contacts")
    ///     .with_param("limit", json!(10))
    ///     .save_to("contacts");
    /// ```
    pub fn new(step_id: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into().trim().to_string(),
            action: action.into().trim().to_string(),
            params: Map::new(),
            save_to: None,
            critical: true,
            depends_on: Vec::new(),
            description: None,
        }
    }

    /// Adds a single parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Replaces all parameters.
    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = params;
        self
    }

    /// Binds the action output into the workflow context under `key`.
    pub fn save_to(mut self, key: impl Into<String>) -> Self {
        self.save_to = Some(key.into());
        self
    }

    /// Sets whether the step is critical.
    pub fn with_critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }

    /// Marks the step as non-critical: its failure is recorded and execution continues.
    pub fn non_critical(self) -> Self {
        self.with_critical(false)
    }

    /// Declares a predecessor step.
    pub fn depends_on(mut self, step_id: impl Into<String>) -> Self {
        self.depends_on.push(step_id.into());
        self
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// An ordered sequence of steps plus a free-text summary.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Plan {
    /// Steps in execution order
    #[serde(default)]
    pub steps: Vec<Step>,

    /// What the plan is meant to achieve
    #[serde(default)]
    pub summary: String,
}

impl Plan {
    /// Creates an empty plan.
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            steps: Vec::new(),
            summary: summary.into(),
        }
    }

    /// Creates a plan from a list of steps.
    pub fn from_steps(summary: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            steps,
            summary: summary.into(),
        }
    }

    /// Appends a step, rejecting duplicate ids.
    pub fn add_step(&mut self, step: Step) -> Result<(), PlanError> {
        if self.steps.iter().any(|s| s.step_id == step.step_id) {
            return Err(PlanError::DuplicateStepId(step.step_id));
        }
        self.steps.push(step);
        Ok(())
    }

    /// Builder form of [`Plan::add_step`].
    pub fn with_step(mut self, step: Step) -> Result<Self, PlanError> {
        self.add_step(step)?;
        Ok(self)
    }

    /// Gets a step by id.
    pub fn get_step(&self, step_id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    /// Returns the step ids in execution order.
    pub fn step_ids(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.step_id.as_str()).collect()
    }

    /// Returns the distinct action names used by the plan, sorted.
    pub fn actions(&self) -> Vec<String> {
        let mut actions: Vec<String> = self.steps.iter().map(|s| s.action.clone()).collect();
        actions.sort();
        actions.dedup();
        actions
    }

    /// Returns the number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the plan has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
