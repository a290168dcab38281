//! Workflow Definition Module
//!
//! Provides the data structures and pure logic shared by every other part of
//! the engine.
//!
//! # Structure
//!
//! - [`model`]: Core data structures (Plan, Step)
//! - [`state`]: Workflow/step status and stored results
//! - [`parser`]: JSON/YAML plan loading
//! - [`validator`]: Validation rules and reference checking
//! - [`resolver`]: `{{reference}}` resolution against prior results
//! - [`planner`]: The planner collaborator contract

pub mod model;
pub mod parser;
pub mod planner;
pub mod resolver;
pub mod state;
pub mod validator;

pub use model::{Plan, Step};
pub use parser::{load_plan, parse_plan, plan_from_value};
pub use planner::{FallbackPlanner, Planner, PlannerError, StaticPlanner};
pub use resolver::{resolve, Reference, RESERVED_CONTEXT_KEYS};
pub use state::{ResultStatus, StepResult, StepState, WorkflowState, WorkflowStatus};
pub use validator::{validate_plan, PlanError};
