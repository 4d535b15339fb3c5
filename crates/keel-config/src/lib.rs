//! # keel-config
//!
//! Configuration system for Keel. Reads from `keel.toml` and environment
//! variables, in that precedence order.
//!
//! Supports hot-reload via filesystem watcher.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::KeelConfig;
pub use schema::{
    BudgetConfig, ConfigWarning, EscalationConfig, HoldConfig, LoggingConfig, StorageBackend,
    StorageConfig, WarningSeverity,
};
