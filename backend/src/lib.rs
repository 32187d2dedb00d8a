// Fieldflow automation core
//
// Event-driven workflows, entity rules and tracked agent calls for the
// Fieldflow field-service platform.

pub mod agents;
pub mod config;
pub mod core;
pub mod database;
pub mod jobs;
pub mod rules;
pub mod services;
pub mod store;
pub mod workflows;

pub use crate::core::AutomationCore;
pub use config::Config;
pub use store::{MemoryStore, PgStore, RecordStore, StoreError, StoreResult};
