//! State Persistence Module
//!
//! Durable, TTL-scoped storage for workflow snapshots and resources.
//!
//! # Structure
//!
//! - [`store`]: `StateStore` (hot map + warm JSON file), records and the
//!   background sweeper

pub mod store;

pub use store::{ResourceRecord, StateStore, StoreError, StoreStats};
