//! Native event log collaborator.
//! -----------------------------------------------------------------------------
//! Everything the bridge needs from the Event Log service goes through
//! [`EvtApi`]. Two implementations exist:
//!   • `windows::WinEvtApi` → the real `wevtapi` calls (Windows only).
//!   • `memory::MemoryLog`  → an in‑process log used by tests and fixture
//!     replays; it counts every acquisition/release.
//!
//! Handles are plain integers on purpose: the native side owns them and they
//! are only meaningful for as long as the native contract says so.

pub mod memory;
pub mod types;
#[cfg(windows)]
pub mod windows;

use std::sync::Arc;
use thiserror::Error;

pub use types::{FormatCategory, SystemField, VariantType};

/// Render context created by `EvtCreateRenderContext`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderContextHandle(pub u64);

/// Event handle passed to the subscription callback. Valid for the callback only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventHandle(pub u64);

/// Buffer produced by rendering one event against a render context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldSetHandle(pub u64);

/// Publisher metadata handle used to resolve localized text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublisherHandle(pub u64);

/// Active subscription returned by `EvtSubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub u64);

/// Win32 error code reported by the event log service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("native event log error {code}")]
pub struct NativeError {
    pub code: u32,
}

impl NativeError {
    pub const NOT_ENOUGH_MEMORY: u32 = 8;
    pub const INVALID_HANDLE: u32 = 6;
    pub const CHANNEL_NOT_FOUND: u32 = 15007;
    pub const INVALID_QUERY: u32 = 15001;

    pub fn new(code: u32) -> Self {
        Self { code }
    }
}

/// Receiver of subscription notifications.
///
/// Called on a thread owned by the event log service, one notification at a
/// time per subscription. Implementations must not block.
pub trait CallbackSink: Send + Sync {
    fn on_event(&self, event: EventHandle);
    fn on_error(&self, code: u32);
}

/// The subset of `wevtapi` used by the bridge.
pub trait EvtApi: Send + Sync {
    fn create_render_context(&self) -> Result<RenderContextHandle, NativeError>;
    fn release_render_context(&self, ctx: RenderContextHandle);

    /// Start delivering events of `channel` matching `query` to `sink`.
    /// `from_beginning` starts at the oldest record instead of future events.
    fn subscribe(
        &self,
        channel: &str,
        query: &str,
        from_beginning: bool,
        sink: Arc<dyn CallbackSink>,
    ) -> Result<SubscriptionHandle, NativeError>;

    /// Stop a subscription. Returns only once no callback for it is running.
    fn cancel_subscription(&self, sub: SubscriptionHandle);

    /// Render the system properties of `event`; `None` when nothing was rendered.
    fn render_event(&self, ctx: RenderContextHandle, event: EventHandle) -> Option<FieldSetHandle>;
    fn release_fields(&self, fields: FieldSetHandle);

    fn field_type(&self, fields: FieldSetHandle, index: SystemField) -> VariantType;
    /// Owned copy of a string slot.
    fn string_value(&self, fields: FieldSetHandle, index: SystemField) -> Option<String>;
    /// Unsigned slot of any width, widened.
    fn unsigned_value(&self, fields: FieldSetHandle, index: SystemField) -> u64;
    /// Signed slot of any width, widened.
    fn signed_value(&self, fields: FieldSetHandle, index: SystemField) -> i64;
    /// Raw FILETIME ticks.
    fn filetime_value(&self, fields: FieldSetHandle, index: SystemField) -> u64;

    fn publisher_handle(&self, fields: FieldSetHandle) -> Option<PublisherHandle>;
    fn close_publisher(&self, publisher: PublisherHandle);

    fn format_message(
        &self,
        publisher: PublisherHandle,
        event: EventHandle,
        category: FormatCategory,
    ) -> Option<String>;

    /// Bookmark XML pointing at `event`, copied out of native memory.
    fn bookmark(&self, event: EventHandle) -> Option<String>;
}
