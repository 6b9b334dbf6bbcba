//! `wevtapi` backend
//! -----------------
//! Thin wrapper over the Windows Event Log API:
//!
//!   • `EvtCreateRenderContext(EvtRenderContextSystem)` → render context
//!   • `EvtSubscribe` with a single `extern "system"` trampoline
//!   • `EvtRender(EvtRenderEventValues)` into an owned, 8‑byte aligned buffer
//!   • `EvtOpenPublisherMetadata` + `EvtFormatMessage` for localized text
//!
//! The subscription context pointer is a `Box<Arc<dyn CallbackSink>>` that
//! stays alive until `cancel_subscription` has closed the subscription
//! (`EvtClose` waits for a running callback to return).

use std::{
    collections::HashMap,
    ffi::{OsStr, c_void},
    os::windows::prelude::OsStrExt,
    panic::{AssertUnwindSafe, catch_unwind},
    ptr,
    sync::{Arc, Mutex, PoisonError},
};
use windows_sys::Win32::{
    Foundation::{ERROR_INSUFFICIENT_BUFFER, GetLastError},
    System::EventLog::{
        EVT_HANDLE, EVT_SUBSCRIBE_NOTIFY_ACTION, EVT_VARIANT, EvtClose, EvtCreateBookmark,
        EvtCreateRenderContext, EvtFormatMessage, EvtOpenPublisherMetadata, EvtRender,
        EvtRenderBookmark, EvtRenderContextSystem, EvtRenderEventValues, EvtSubscribe,
        EvtSubscribeActionDeliver, EvtSubscribeActionError, EvtSubscribeStartAtOldestRecord,
        EvtSubscribeToFutureEvents, EvtUpdateBookmark,
    },
};

use super::{
    CallbackSink, EventHandle, EvtApi, FieldSetHandle, FormatCategory, NativeError,
    PublisherHandle, RenderContextHandle, SubscriptionHandle, SystemField, VariantType,
};

/// Rendered `EVT_VARIANT` array plus the string data it points into.
struct RenderedBuffer {
    data: Vec<u64>,
    count: u32,
}

impl RenderedBuffer {
    fn variant(&self, index: SystemField) -> Option<&EVT_VARIANT> {
        if index.index() >= self.count as usize {
            return None;
        }
        let base = self.data.as_ptr() as *const EVT_VARIANT;
        // SAFETY: EvtRender laid out `count` variants at the start of `data`.
        Some(unsafe { &*base.add(index.index()) })
    }
}

fn wide(s: &str) -> Vec<u16> {
    OsStr::new(s).encode_wide().chain(Some(0)).collect()
}

/// Copy a NUL-terminated UTF-16 string.
///
/// # Safety
/// `p` must be null or point to a NUL-terminated UTF-16 string.
unsafe fn from_wide_ptr(p: *const u16) -> Option<String> {
    if p.is_null() {
        return None;
    }
    let mut len = 0usize;
    // SAFETY: guaranteed NUL-terminated by the caller.
    unsafe {
        while *p.add(len) != 0 {
            len += 1;
        }
        Some(String::from_utf16_lossy(std::slice::from_raw_parts(p, len)))
    }
}

fn from_wide_buf(buf: &[u16]) -> String {
    let end = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
    String::from_utf16_lossy(&buf[..end])
}

fn last_error() -> NativeError {
    NativeError::new(unsafe { GetLastError() })
}

/// Entry point handed to `EvtSubscribe`. Re-enters the sink and nothing else.
unsafe extern "system" fn subscription_callback(
    action: EVT_SUBSCRIBE_NOTIFY_ACTION,
    context: *const c_void,
    event: EVT_HANDLE,
) -> u32 {
    if context.is_null() {
        return 0;
    }
    // SAFETY: `context` is the boxed sink registered in `subscribe`, kept
    // alive until the subscription handle is closed.
    let sink = unsafe { &*(context as *const Arc<dyn CallbackSink>) };
    let _ = catch_unwind(AssertUnwindSafe(|| {
        if action == EvtSubscribeActionDeliver {
            sink.on_event(EventHandle(event as u64));
        } else if action == EvtSubscribeActionError {
            // For errors the "event" argument carries the Win32 status code.
            sink.on_error(event as u32);
        }
    }));
    0
}

/// The system event log.
#[derive(Default)]
pub struct WinEvtApi {
    sinks: Mutex<HashMap<u64, usize>>,
}

impl WinEvtApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn buffer(&self, fields: FieldSetHandle) -> &RenderedBuffer {
        // SAFETY: handle produced by `render_event` and not yet released; the
        // bridge releases it only after the last read.
        unsafe { &*(fields.0 as *const RenderedBuffer) }
    }

    /// Two-call `EvtRender` into a UTF-16 buffer (used for bookmarks).
    fn render_text(handle: EVT_HANDLE, flags: u32) -> Option<String> {
        let mut used = 0u32;
        let mut count = 0u32;
        unsafe {
            EvtRender(0, handle, flags, 0, ptr::null_mut(), &mut used, &mut count);
            if GetLastError() != ERROR_INSUFFICIENT_BUFFER {
                return None;
            }
            let mut buf = vec![0u16; (used as usize).div_ceil(2)];
            let ok = EvtRender(
                0,
                handle,
                flags,
                (buf.len() * 2) as u32,
                buf.as_mut_ptr() as *mut c_void,
                &mut used,
                &mut count,
            );
            (ok != 0).then(|| from_wide_buf(&buf))
        }
    }
}

impl Drop for WinEvtApi {
    fn drop(&mut self) {
        let sinks = std::mem::take(&mut *self.sinks.lock().unwrap_or_else(PoisonError::into_inner));
        for (sub, raw) in sinks {
            unsafe {
                EvtClose(sub as EVT_HANDLE);
                drop(Box::from_raw(raw as *mut Arc<dyn CallbackSink>));
            }
        }
    }
}

impl EvtApi for WinEvtApi {
    fn create_render_context(&self) -> Result<RenderContextHandle, NativeError> {
        let ctx = unsafe { EvtCreateRenderContext(0, ptr::null(), EvtRenderContextSystem as u32) };
        if ctx == 0 {
            return Err(last_error());
        }
        Ok(RenderContextHandle(ctx as u64))
    }

    fn release_render_context(&self, ctx: RenderContextHandle) {
        unsafe { EvtClose(ctx.0 as EVT_HANDLE) };
    }

    fn subscribe(
        &self,
        channel: &str,
        query: &str,
        from_beginning: bool,
        sink: Arc<dyn CallbackSink>,
    ) -> Result<SubscriptionHandle, NativeError> {
        let channel_w = wide(channel);
        let query_w = wide(query);
        let flags = (if from_beginning {
            EvtSubscribeStartAtOldestRecord
        } else {
            EvtSubscribeToFutureEvents
        }) as u32;

        let raw = Box::into_raw(Box::new(sink));
        let sub = unsafe {
            EvtSubscribe(
                0,
                ptr::null_mut(),
                channel_w.as_ptr(),
                query_w.as_ptr(),
                0,
                raw as *const c_void,
                Some(subscription_callback),
                flags,
            )
        };
        if sub == 0 {
            let err = last_error();
            // SAFETY: the subscription never started, nobody else holds `raw`.
            drop(unsafe { Box::from_raw(raw) });
            return Err(err);
        }

        self.sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(sub as u64, raw as usize);
        Ok(SubscriptionHandle(sub as u64))
    }

    fn cancel_subscription(&self, sub: SubscriptionHandle) {
        let raw = self
            .sinks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&sub.0);
        unsafe {
            EvtClose(sub.0 as EVT_HANDLE);
            if let Some(raw) = raw {
                drop(Box::from_raw(raw as *mut Arc<dyn CallbackSink>));
            }
        }
    }

    fn render_event(&self, ctx: RenderContextHandle, event: EventHandle) -> Option<FieldSetHandle> {
        let mut used = 0u32;
        let mut count = 0u32;
        unsafe {
            EvtRender(
                ctx.0 as EVT_HANDLE,
                event.0 as EVT_HANDLE,
                EvtRenderEventValues as u32,
                0,
                ptr::null_mut(),
                &mut used,
                &mut count,
            );
            if GetLastError() != ERROR_INSUFFICIENT_BUFFER {
                return None;
            }
            let mut data = vec![0u64; (used as usize).div_ceil(8)];
            let ok = EvtRender(
                ctx.0 as EVT_HANDLE,
                event.0 as EVT_HANDLE,
                EvtRenderEventValues as u32,
                (data.len() * 8) as u32,
                data.as_mut_ptr() as *mut c_void,
                &mut used,
                &mut count,
            );
            if ok == 0 {
                return None;
            }
            let raw = Box::into_raw(Box::new(RenderedBuffer { data, count }));
            Some(FieldSetHandle(raw as u64))
        }
    }

    fn release_fields(&self, fields: FieldSetHandle) {
        // SAFETY: produced by `Box::into_raw` in `render_event`, released once.
        drop(unsafe { Box::from_raw(fields.0 as *mut RenderedBuffer) });
    }

    fn field_type(&self, fields: FieldSetHandle, index: SystemField) -> VariantType {
        self.buffer(fields)
            .variant(index)
            .map_or(VariantType::Null, |v| VariantType::from_raw(v.Type))
    }

    fn string_value(&self, fields: FieldSetHandle, index: SystemField) -> Option<String> {
        let v = self.buffer(fields).variant(index)?;
        if VariantType::from_raw(v.Type) != VariantType::String {
            return None;
        }
        unsafe { from_wide_ptr(v.Anonymous.StringVal) }
    }

    fn unsigned_value(&self, fields: FieldSetHandle, index: SystemField) -> u64 {
        let Some(v) = self.buffer(fields).variant(index) else {
            return 0;
        };
        unsafe {
            match VariantType::from_raw(v.Type) {
                VariantType::Byte => u64::from(v.Anonymous.ByteVal),
                VariantType::UInt16 => u64::from(v.Anonymous.UInt16Val),
                VariantType::UInt32 => u64::from(v.Anonymous.UInt32Val),
                VariantType::UInt64 => v.Anonymous.UInt64Val,
                _ => 0,
            }
        }
    }

    fn signed_value(&self, fields: FieldSetHandle, index: SystemField) -> i64 {
        let Some(v) = self.buffer(fields).variant(index) else {
            return 0;
        };
        unsafe {
            match VariantType::from_raw(v.Type) {
                VariantType::SByte => i64::from(v.Anonymous.SByteVal),
                VariantType::Int16 => i64::from(v.Anonymous.Int16Val),
                VariantType::Int32 => i64::from(v.Anonymous.Int32Val),
                VariantType::Int64 => v.Anonymous.Int64Val,
                _ => 0,
            }
        }
    }

    fn filetime_value(&self, fields: FieldSetHandle, index: SystemField) -> u64 {
        match self.buffer(fields).variant(index) {
            Some(v) if VariantType::from_raw(v.Type) == VariantType::FileTime => unsafe {
                v.Anonymous.FileTimeVal
            },
            _ => 0,
        }
    }

    fn publisher_handle(&self, fields: FieldSetHandle) -> Option<PublisherHandle> {
        let provider = self.string_value(fields, SystemField::ProviderName)?;
        let provider_w = wide(&provider);
        let h = unsafe { EvtOpenPublisherMetadata(0, provider_w.as_ptr(), ptr::null(), 0, 0) };
        (h != 0).then_some(PublisherHandle(h as u64))
    }

    fn close_publisher(&self, publisher: PublisherHandle) {
        unsafe { EvtClose(publisher.0 as EVT_HANDLE) };
    }

    fn format_message(
        &self,
        publisher: PublisherHandle,
        event: EventHandle,
        category: FormatCategory,
    ) -> Option<String> {
        let mut used = 0u32;
        unsafe {
            EvtFormatMessage(
                publisher.0 as EVT_HANDLE,
                event.0 as EVT_HANDLE,
                0,
                0,
                ptr::null(),
                category.raw(),
                0,
                ptr::null_mut(),
                &mut used,
            );
            if GetLastError() != ERROR_INSUFFICIENT_BUFFER || used == 0 {
                return None;
            }
            let mut buf = vec![0u16; used as usize];
            let ok = EvtFormatMessage(
                publisher.0 as EVT_HANDLE,
                event.0 as EVT_HANDLE,
                0,
                0,
                ptr::null(),
                category.raw(),
                buf.len() as u32,
                buf.as_mut_ptr(),
                &mut used,
            );
            if ok == 0 {
                return None;
            }
            Some(from_wide_buf(&buf)).filter(|s| !s.is_empty())
        }
    }

    fn bookmark(&self, event: EventHandle) -> Option<String> {
        unsafe {
            let bookmark = EvtCreateBookmark(ptr::null());
            if bookmark == 0 {
                return None;
            }
            let xml = if EvtUpdateBookmark(bookmark, event.0 as EVT_HANDLE) != 0 {
                Self::render_text(bookmark, EvtRenderBookmark as u32)
            } else {
                None
            };
            EvtClose(bookmark);
            xml
        }
    }
}
