//! Individual Step Execution
//!
//! Invokes the action behind one step and collapses the outcome into either
//! the action's output or an [`ActionError`]:
//! - unknown action → [`ActionError::NotFound`]
//! - `status: error` result → [`ActionError::Execution`]
//! - panic inside the action → [`ActionError::Panicked`]

use std::time::Instant;

use log::{debug, error};
use serde_json::Value;

use crate::action::{ActionError, ActionRegistry, ExecutionContext, Params};
use crate::workflow::Step;

/// Executes a single step with already-resolved parameters.
///
/// # Arguments
///
/// * `registry` - Where the step's action is looked up
/// * `step` - The step being executed
/// * `ctx` - Workflow id, step id and context snapshot handed to the action
/// * `params` - Parameters after reference resolution
///
/// # Returns
///
/// * `Ok(data)` - The action's output
/// * `Err` - Why the step failed
pub async fn execute_step(
    registry: &ActionRegistry,
    step: &Step,
    ctx: ExecutionContext,
    params: Params,
) -> Result<Value, ActionError> {
    let started = Instant::now();
    debug!(
        "Step '{}' invoking '{}' with {} param(s)",
        step.step_id,
        step.action,
        params.len()
    );

    let outcome = registry
        .invoke(&step.action, ctx, params)
        .await
        .and_then(|result| result.into_data(&step.action));

    match outcome {
        Ok(data) => {
            debug!(
                "Step '{}' completed in {:.2?}",
                step.step_id,
                started.elapsed()
            );
            Ok(data)
        }
        Err(e) => {
            error!(
                "Step '{}' failed after {:.2?}: {}",
                step.step_id,
                started.elapsed(),
                e
            );
            Err(e)
        }
    }
}
