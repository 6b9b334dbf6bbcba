//! Public API for configuration

pub mod loader;
pub mod model;

// Re-export the main entrypoints:
pub use loader::{load, open_fixture};
pub use model::{Config, ConfigError, LoggingConfig, SubscriptionConfig, WatcherConfig};
