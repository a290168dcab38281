//! Events Module
//!
//! Lifecycle notifications and the reactions wired to them.
//!
//! # Structure
//!
//! - [`event`]: The `Event` record and well-known event names
//! - [`bus`]: Publish/subscribe with bounded history and supervised delivery
//! - [`cascade`]: Archiving and action-invoking subscribers

pub mod bus;
pub mod cascade;
pub mod event;

pub use bus::{EventBus, EventHandler, HandlerError, SubscriptionId};
pub use cascade::{install_default_cascades, ActionCascade, EventArchiver, EVENT_RESOURCE_TYPE};
pub use event::{names, Event};
