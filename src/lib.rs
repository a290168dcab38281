//! FlowPilot - Autonomous Workflow Orchestration Engine
//!
//! Turns a declarative or planner-generated plan into a sequence of executed
//! actions. Steps pass data to each other through `{{references}}`,
//! workflow state survives restarts with a TTL, every run leaves an audit
//! trail, and lifecycle events trigger follow-up work through cascades.
//!
//! # Architecture
//!
//! - [`workflow`]: Plans, steps, workflow state, validation and reference resolution
//! - [`action`]: The action contract and registry
//! - [`state`]: TTL-scoped durable state store
//! - [`events`]: Event bus with supervised subscribers and cascades
//! - [`audit`]: Best-effort audit trail
//! - [`execution`]: The workflow engine
//! - [`config`]: Runtime settings
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use flowpilot::action::{register_builtin, ActionRegistry};
//! use flowpilot::audit::AuditLog;
//! use flowpilot::config::Settings;
//! use flowpilot::events::{install_default_cascades, EventBus};
//! use flowpilot::execution::WorkflowEngine;
//! use flowpilot::state::StateStore;
//! use flowpilot::load_plan;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = Settings::load(None)?;
//!
//!     let mut registry = ActionRegistry::new();
//!     register_builtin(&mut registry);
//!     let registry = Arc::new(registry);
//!
//!     let store = Arc::new(StateStore::open(&settings).await?);
//!     store.start_sweeper(settings.sweep_interval());
//!
//!     let bus = Arc::new(EventBus::new(settings.max_event_history));
//!     install_default_cascades(&bus, Arc::clone(&store), Arc::clone(&registry));
//!
//!     let engine = WorkflowEngine::new(registry, Arc::clone(&store), bus)
//!         .with_audit(AuditLog::from_settings(&settings));
//!
//!     let plan = load_plan("plan.yaml")?;
//!     let response = engine.execute(plan, "wf-1", Default::default()).await?;
//!     println!("{}", serde_json::to_string_pretty(&response)?);
//!
//!     store.close().await?;
//!     Ok(())
//! }
//! ```

pub mod action;
pub mod audit;
pub mod config;
pub mod events;
pub mod execution;
pub mod state;
pub mod workflow;

// Re-export commonly used types
pub use action::{ActionRegistry, ActionResult};
pub use config::Settings;
pub use events::EventBus;
pub use execution::{WorkflowEngine, WorkflowResponse};
pub use state::StateStore;
pub use workflow::{load_plan, Plan, Step};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "FlowPilot";
