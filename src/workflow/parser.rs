//! Plan Parser
//!
//! Loads plans from JSON or YAML files and from planner output. Every plan
//! that leaves this module has passed [`validate_plan`], so malformed plans
//! are rejected before any step runs.

use std::fs;
use std::path::Path;

use log::{debug, info};
use serde_json::Value;

use super::model::Plan;
use super::validator::{validate_plan, PlanError};

/// Loads a plan from a JSON or YAML file.
///
/// # Example
///
/// ```rust,no_run
/// use flowpilot::workflow::load_plan;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let plan = load_plan("weekly_report.yaml")?;
///     println!("Loaded {} steps", plan.len());
///     Ok(())
/// }
/// ```
pub fn load_plan(path: impl AsRef<Path>) -> Result<Plan, PlanError> {
    let path = path.as_ref();
    info!("Loading plan from: {}", path.display());

    let content = fs::read_to_string(path).map_err(|source| PlanError::Io {
        path: path.display().to_string(),
        source,
    })?;

    debug!("Plan content loaded ({} bytes)", content.len());
    parse_plan(&content)
}

/// Parses plan text. JSON objects are parsed as JSON, anything else as YAML.
pub fn parse_plan(content: &str) -> Result<Plan, PlanError> {
    let value: Value = if content.trim_start().starts_with('{') {
        serde_json::from_str(content).map_err(|e| PlanError::Parse(e.to_string()))?
    } else {
        serde_yaml::from_str(content).map_err(|e| PlanError::Parse(e.to_string()))?
    };

    plan_from_value(value)
}

/// Builds a validated plan from planner output.
///
/// Accepts either the plan object itself or an envelope of the form
/// `{"plan": {...}}`.
pub fn plan_from_value(value: Value) -> Result<Plan, PlanError> {
    let value = match value {
        Value::Object(mut map) if !map.contains_key("steps") && map.contains_key("plan") => {
            map.remove("plan").unwrap_or(Value::Null)
        }
        other => other,
    };

    let plan: Plan =
        serde_json::from_value(value).map_err(|e| PlanError::Parse(e.to_string()))?;

    info!("Parsed plan with {} steps", plan.steps.len());

    validate_plan(&plan)?;
    Ok(plan)
}
