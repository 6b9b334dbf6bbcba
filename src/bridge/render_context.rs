// src/bridge/render_context.rs

//! System render context owned by a watcher.

use std::sync::Arc;

use crate::error::WatcherError;
use crate::evt::{EvtApi, RenderContextHandle};

/// Native render context laid out for the system properties.
/// Released exactly once, when dropped.
pub struct RenderContext {
    api: Arc<dyn EvtApi>,
    handle: RenderContextHandle,
}

impl RenderContext {
    pub fn handle(&self) -> RenderContextHandle {
        self.handle
    }
}

impl std::fmt::Debug for RenderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("RenderContext").field(&self.handle).finish()
    }
}

impl Drop for RenderContext {
    fn drop(&mut self) {
        log::debug!("releasing render context {:?}", self.handle);
        self.api.release_render_context(self.handle);
    }
}

/// Ask the native layer for a system render context.
pub fn create_system_render_context(api: &Arc<dyn EvtApi>) -> Result<RenderContext, WatcherError> {
    let handle = api
        .create_render_context()
        .map_err(WatcherError::ResourceCreation)?;
    Ok(RenderContext {
        api: Arc::clone(api),
        handle,
    })
}
