//! Configuration management
//!
//! The whole `AppConfig` is stored as one JSON document in SQLite and cached
//! in memory for lock-free reads.

mod schema;
mod store;

pub use schema::*;
pub use store::{ConfigChange, ConfigStore};
