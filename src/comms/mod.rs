//! What the application sees: the `Event` record, the `Watcher` that produces
//! it and async adapters over its streams.

pub mod events;
pub mod stream;
pub mod watcher;

pub use events::{Event, SubscriptionError};
pub use watcher::Watcher;
