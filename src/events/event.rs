//! Event Record
//!
//! Immutable lifecycle notifications published on the
//! [`EventBus`](super::EventBus).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Well-known event names.
pub mod names {
    pub const FILE_CREATED: &str = "file.created";
    pub const FILE_UPLOADED: &str = "file.uploaded";
    pub const FILE_DELETED: &str = "file.deleted";
    pub const CONTACT_CREATED: &str = "contact.created";
    pub const WORKFLOW_STARTED: &str = "workflow.started";
    pub const STEP_COMPLETED: &str = "step.completed";
    pub const STEP_FAILED: &str = "step.failed";
    pub const WORKFLOW_COMPLETED: &str = "workflow.completed";
    pub const WORKFLOW_FAILED: &str = "workflow.failed";
    pub const ERROR_CRITICAL: &str = "error.critical";

    /// Events worth keeping beyond the in-memory history.
    pub const IMPORTANT: &[&str] = &[
        WORKFLOW_STARTED,
        WORKFLOW_COMPLETED,
        WORKFLOW_FAILED,
        ERROR_CRITICAL,
    ];
}

/// A published event.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Event {
    pub event_id: String,

    #[serde(rename = "event_name")]
    pub name: String,

    /// Component or workflow that emitted the event
    pub source: String,

    #[serde(default)]
    pub data: Value,

    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(name: impl Into<String>, source: impl Into<String>, data: Value) -> Self {
        Self {
            event_id: Uuid::now_v7().to_string(),
            name: name.into(),
            source: source.into(),
            data,
            timestamp: Utc::now(),
        }
    }

    /// True for events listed in [`names::IMPORTANT`].
    pub fn is_important(&self) -> bool {
        names::IMPORTANT.contains(&self.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_wire_shape() {
        let event = Event::new(names::STEP_COMPLETED, "wf-1", json!({"step_id": "a"}));
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["event_name"], json!("step.completed"));
        assert_eq!(value["source"], json!("wf-1"));
        assert_eq!(value["data"]["step_id"], json!("a"));
        assert!(value.get("name").is_none());
        assert!(value["timestamp"].is_string());

        let back: Event = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_event_ids_are_unique() {
        let a = Event::new("x", "s", Value::Null);
        let b = Event::new("x", "s", Value::Null);
        assert_ne!(a.event_id, b.event_id);
    }

    #[test]
    fn test_important_events() {
        assert!(Event::new(names::WORKFLOW_FAILED, "s", Value::Null).is_important());
        assert!(Event::new(names::ERROR_CRITICAL, "s", Value::Null).is_important());
        assert!(!Event::new(names::STEP_COMPLETED, "s", Value::Null).is_important());
    }
}
