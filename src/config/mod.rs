//! Application configuration
//!
//! `AppConfig` is stored as JSON in SQLite and cached in memory; command-line
//! flags override individual fields at startup without being persisted.

mod schema;
mod store;

pub use schema::*;
pub use store::{ConfigChange, ConfigStore};
