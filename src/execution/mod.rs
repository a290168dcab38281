//! Workflow Execution Module
//!
//! Runs plans against the action registry, recording state, events and the
//! audit trail along the way.
//!
//! # Architecture
//!
//! - [`engine`]: `WorkflowEngine`, the coordinator of workflow runs
//! - [`step`]: Individual step execution logic
//! - [`response`]: What callers receive back

pub mod engine;
pub mod response;
pub mod step;

pub use engine::{new_workflow_id, EngineError, WorkflowEngine, WorkflowRequest};
pub use response::{ExecutionMode, ExecutionReport, WorkflowResponse};
