//! Plan Validation
//!
//! Checks a plan before anything runs:
//! - Step field validation (non-empty id and action)
//! - Step ids usable in references (no `.`) and not reserved by the audit trail
//! - Unique step ids
//! - `depends_on` reference integrity
//!
//! A plan that passes validation may still reference steps or context keys
//! that never produce a value; those resolve to `null` at execution time.

use std::collections::HashSet;

use log::{debug, info, warn};

use super::model::{Plan, Step};
use super::resolver::RESERVED_CONTEXT_KEYS;
use crate::audit::WORKFLOW_ENTRY;

/// Reasons a plan is rejected.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("Duplicate step ID: '{0}'")]
    DuplicateStepId(String),

    #[error("Step has empty or whitespace-only ID")]
    EmptyStepId,

    #[error("Step ID '{0}' is reserved")]
    ReservedStepId(String),

    #[error("Step ID '{0}' contains '.', which cannot appear in a reference")]
    DottedStepId(String),

    #[error("Step '{0}' has no action specified")]
    EmptyAction(String),

    #[error("Step '{step}' depends on unknown step '{reference}'")]
    InvalidReference { step: String, reference: String },

    #[error("Step '{0}' depends on itself")]
    SelfDependency(String),

    #[error("{}", join_errors(.0))]
    Multiple(Vec<PlanError>),

    #[error("Failed to read plan file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse plan: {0}")]
    Parse(String),
}

fn join_errors(errors: &[PlanError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Validates a single step's fields.
fn validate_step(step: &Step) -> Vec<PlanError> {
    let mut errors = Vec::new();

    if step.step_id.trim().is_empty() {
        errors.push(PlanError::EmptyStepId);
        return errors; // Can't validate further without ID
    }

    if step.step_id == WORKFLOW_ENTRY {
        errors.push(PlanError::ReservedStepId(step.step_id.clone()));
    }

    if step.step_id.contains('.') {
        errors.push(PlanError::DottedStepId(step.step_id.clone()));
    }

    if step.action.trim().is_empty() {
        errors.push(PlanError::EmptyAction(step.step_id.clone()));
    }

    if step.depends_on.iter().any(|d| d == &step.step_id) {
        errors.push(PlanError::SelfDependency(step.step_id.clone()));
    }

    if let Some(key) = &step.save_to {
        if RESERVED_CONTEXT_KEYS.contains(&key.as_str()) {
            warn!(
                "Step '{}': save_to '{}' shadows an engine-provided context value",
                step.step_id, key
            );
        }
    }

    errors
}

/// Validates the entire plan structure.
///
/// Performs the following checks:
/// 1. No duplicate step IDs
/// 2. All steps have an id and an action
/// 3. Step ids are dot-free and not the audit trail's workflow row name
/// 4. All `depends_on` entries point to existing steps
///
/// Steps always execute in array order. A dependency on a step that comes
/// later in the array is accepted but logged, since it cannot be honoured.
pub fn validate_plan(plan: &Plan) -> Result<(), PlanError> {
    debug!("Validating plan with {} steps", plan.steps.len());

    if plan.steps.is_empty() {
        warn!("Plan has no steps");
        return Ok(());
    }

    let mut seen_ids: HashSet<&str> = HashSet::new();
    for step in &plan.steps {
        if !seen_ids.insert(step.step_id.as_str()) {
            return Err(PlanError::DuplicateStepId(step.step_id.clone()));
        }
    }

    let mut all_errors = Vec::new();
    let mut earlier: HashSet<&str> = HashSet::new();

    for step in &plan.steps {
        all_errors.extend(validate_step(step));

        for dep in &step.depends_on {
            if dep == &step.step_id {
                continue;
            }
            if !seen_ids.contains(dep.as_str()) {
                all_errors.push(PlanError::InvalidReference {
                    step: step.step_id.clone(),
                    reference: dep.clone(),
                });
            } else if !earlier.contains(dep.as_str()) {
                warn!(
                    "Step '{}' depends on '{}', which runs later; steps execute in array order",
                    step.step_id, dep
                );
            }
        }

        earlier.insert(step.step_id.as_str());
    }

    match all_errors.len() {
        0 => {
            info!(
                "Plan validated: {} steps, {} actions",
                plan.steps.len(),
                plan.actions().len()
            );
            Ok(())
        }
        1 => Err(all_errors.remove(0)),
        _ => Err(PlanError::Multiple(all_errors)),
    }
}
