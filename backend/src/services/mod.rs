// Shared services used by the automation components

pub mod cache;

pub use cache::{CacheStats, DefinitionCache};
