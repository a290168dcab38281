//! Action Module
//!
//! The uniform contract every integration is reached through.
//!
//! # Structure
//!
//! - [`registry`]: Action trait, results, errors and the name lookup table
//! - [`builtin`]: Diagnostic actions (`echo`, `fail`, `sleep`, `register_file`)

pub mod builtin;
pub mod registry;

pub use builtin::register_builtin;
pub use registry::{
    Action, ActionError, ActionRegistry, ActionResult, ExecutionContext, Params,
};
