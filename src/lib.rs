// src/lib.rs
// ────────────────────────────────────────────────────────────────────────────
// Public library entry point.  Re-export everything for both `main.rs` and
// integration tests.

#[macro_use]
pub mod macros;

pub mod bridge;
pub mod comms;
pub mod config;
pub mod error;
pub mod evt;
pub mod logging;

pub use bridge::DeliverySnapshot;
pub use comms::{Event, SubscriptionError, Watcher};
pub use error::WatcherError;
