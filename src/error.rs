// src/error.rs

use thiserror::Error;

use crate::evt::NativeError;

/// Everything the watcher can report to the caller directly.
#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("cannot create render context: {0}")]
    ResourceCreation(#[source] NativeError),

    #[error("cannot subscribe to '{channel}' with query '{query}': {source}")]
    Subscribe {
        channel: String,
        query: String,
        #[source]
        source: NativeError,
    },

    #[error("watcher has been shut down")]
    ShutDown,
}
