//! Event Cascades
//!
//! Subscribers that turn one event into follow-up work:
//!
//! - [`EventArchiver`] keeps important events as `event` resources in the
//!   [`StateStore`], so they outlive the bus history.
//! - [`ActionCascade`] invokes a registered action with the event payload,
//!   e.g. `file.uploaded` → `register_file`.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info, warn};
use serde_json::{Map, Value};

use super::bus::{EventBus, EventHandler, HandlerError, SubscriptionId};
use super::event::{names, Event};
use crate::action::{ActionRegistry, ExecutionContext};
use crate::state::StateStore;

/// Resource type used for archived events.
pub const EVENT_RESOURCE_TYPE: &str = "event";

/// Stores every event it receives as a resource.
pub struct EventArchiver {
    store: Arc<StateStore>,
    ttl: Option<u64>,
}

impl EventArchiver {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self { store, ttl: None }
    }

    /// Overrides the store's default resource TTL.
    pub fn with_ttl(mut self, ttl: u64) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

#[async_trait]
impl EventHandler for EventArchiver {
    async fn handle(&self, event: Event) -> Result<(), HandlerError> {
        let metadata = serde_json::to_value(&event)?;
        self.store
            .store_resource(EVENT_RESOURCE_TYPE, &event.event_id, metadata, self.ttl)
            .await?;
        debug!("Archived event {} ({})", event.event_id, event.name);
        Ok(())
    }
}

/// Invokes an action with the event payload as parameters.
///
/// The action receives `event.source` as its workflow id and the event name
/// as its step id. Cascade targets must tolerate repeated delivery of the
/// same payload.
pub struct ActionCascade {
    registry: Arc<ActionRegistry>,
    action: String,
}

impl ActionCascade {
    pub fn new(registry: Arc<ActionRegistry>, action: impl Into<String>) -> Self {
        Self {
            registry,
            action: action.into(),
        }
    }
}

#[async_trait]
impl EventHandler for ActionCascade {
    async fn handle(&self, event: Event) -> Result<(), HandlerError> {
        let params = match event.data {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("data".to_string(), other);
                map
            }
        };

        let ctx = ExecutionContext::new(event.source, event.name.clone());
        let result = self.registry.invoke(&self.action, ctx, params).await?;
        result.into_data(&self.action)?;

        info!("Cascade '{}' -> '{}' completed", event.name, self.action);
        Ok(())
    }
}

/// Wires the standard cascades:
/// - important workflow events are archived in `store`;
/// - `file.uploaded` invokes `register_file` when that action exists.
pub fn install_default_cascades(
    bus: &EventBus,
    store: Arc<StateStore>,
    registry: Arc<ActionRegistry>,
) -> Vec<(String, SubscriptionId)> {
    let mut installed = Vec::new();

    let archiver: Arc<dyn EventHandler> = Arc::new(EventArchiver::new(store));
    for name in names::IMPORTANT {
        let id = bus.subscribe(name, Arc::clone(&archiver));
        installed.push((name.to_string(), id));
    }

    if registry.contains("register_file") {
        let cascade = Arc::new(ActionCascade::new(registry, "register_file"));
        let id = bus.subscribe(names::FILE_UPLOADED, cascade);
        installed.push((names::FILE_UPLOADED.to_string(), id));
    } else {
        warn!("Action 'register_file' not registered; file.uploaded cascade disabled");
    }

    info!("Installed {} cascade subscriptions", installed.len());
    installed
}
