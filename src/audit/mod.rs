//! Audit Module
//!
//! Best-effort trail of workflow executions.
//!
//! # Structure
//!
//! - [`entry`]: `AuditEntry` rows keyed by workflow and step
//! - [`sink`]: The storage contract plus memory and JSON-lines sinks
//! - [`log`]: `AuditLog`, the error-swallowing front end used by the engine

pub mod entry;
pub mod log;
pub mod sink;

pub use self::log::{AuditLog, MAX_PROMPT_CHARS};
pub use entry::{AuditEntry, AuditState, WORKFLOW_ENTRY};
pub use sink::{AuditError, AuditSink, JsonlAuditSink, MemoryAuditSink};
