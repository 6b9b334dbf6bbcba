//! In‑process event log
//! ====================
//! `MemoryLog` implements [`EvtApi`] without any operating‑system service.
//! It behaves like the real log where the bridge can observe it:
//!
//!   • every subscription gets its own delivery thread, so callbacks arrive on
//!     a thread the watcher does not own;
//!   • event handles are only bound while the callback runs, and the same
//!     handle value is reused for the next delivery on that subscription;
//!   • cancelling a subscription joins its delivery thread.
//!
//! Every render context, field set and publisher handle is counted on
//! acquisition and on release, and any call made with a handle that is not
//! (or no longer) live is recorded as a stale access. Tests use
//! [`MemoryLog::resources`] to check that the bridge never leaks.
//!
//! Records can be built in code or loaded from a JSON fixture:
//!
//! ```json
//! { "channels": { "Application": [
//!     { "fields": { "ProviderName": { "type": "String", "value": "MsiInstaller" },
//!                   "EventRecordId": { "type": "UInt64", "value": 1 } },
//!       "messages": { "Event": "Product installed." } } ] } }
//! ```

use crossbeam::channel::{self, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fs,
    path::Path,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};
use thiserror::Error;

use super::{
    CallbackSink, EventHandle, EvtApi, FieldSetHandle, FormatCategory, NativeError,
    PublisherHandle, RenderContextHandle, SubscriptionHandle, SystemField, VariantType,
};

/// One typed slot of a fixture record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum FixtureValue {
    Null,
    String(String),
    SByte(i8),
    Byte(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    FileTime(u64),
    HexInt64(u64),
    Guid(String),
}

impl FixtureValue {
    pub fn variant_type(&self) -> VariantType {
        match self {
            FixtureValue::Null => VariantType::Null,
            FixtureValue::String(_) => VariantType::String,
            FixtureValue::SByte(_) => VariantType::SByte,
            FixtureValue::Byte(_) => VariantType::Byte,
            FixtureValue::Int16(_) => VariantType::Int16,
            FixtureValue::UInt16(_) => VariantType::UInt16,
            FixtureValue::Int32(_) => VariantType::Int32,
            FixtureValue::UInt32(_) => VariantType::UInt32,
            FixtureValue::Int64(_) => VariantType::Int64,
            FixtureValue::UInt64(_) => VariantType::UInt64,
            FixtureValue::FileTime(_) => VariantType::FileTime,
            FixtureValue::HexInt64(_) => VariantType::HexInt64,
            FixtureValue::Guid(_) => VariantType::Guid,
        }
    }
}

fn default_true() -> bool {
    true
}

/// A stored event: its system slots, the texts its publisher can format, and
/// whether rendering / publisher lookup should succeed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureRecord {
    #[serde(default)]
    pub fields: BTreeMap<SystemField, FixtureValue>,
    #[serde(default)]
    pub messages: BTreeMap<FormatCategory, String>,
    #[serde(default = "default_true")]
    pub renderable: bool,
    #[serde(default = "default_true")]
    pub has_publisher: bool,
}

impl Default for FixtureRecord {
    fn default() -> Self {
        Self {
            fields: BTreeMap::new(),
            messages: BTreeMap::new(),
            renderable: true,
            has_publisher: true,
        }
    }
}

impl FixtureRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, index: SystemField, value: FixtureValue) -> Self {
        self.fields.insert(index, value);
        self
    }

    pub fn message(mut self, category: FormatCategory, text: impl Into<String>) -> Self {
        self.messages.insert(category, text.into());
        self
    }

    /// Rendering this record yields no buffer.
    pub fn unrenderable(mut self) -> Self {
        self.renderable = false;
        self
    }

    /// The record renders but its publisher metadata cannot be opened.
    pub fn without_publisher(mut self) -> Self {
        self.has_publisher = false;
        self
    }

    fn record_id(&self) -> Option<u64> {
        match self.fields.get(&SystemField::EventRecordId)? {
            FixtureValue::UInt64(v) | FixtureValue::HexInt64(v) => Some(*v),
            FixtureValue::UInt32(v) => Some(u64::from(*v)),
            _ => None,
        }
    }
}

/// On-disk layout of a fixture file.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub channels: BTreeMap<String, Vec<FixtureRecord>>,
}

#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Acquisition / release tallies since the log was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceCounts {
    pub contexts_created: u64,
    pub contexts_released: u64,
    pub fields_rendered: u64,
    pub fields_released: u64,
    pub publishers_opened: u64,
    pub publishers_closed: u64,
    pub subscriptions_opened: u64,
    pub subscriptions_cancelled: u64,
    /// Calls made with a handle that was never issued or already released.
    pub stale_accesses: u64,
}

impl ResourceCounts {
    /// Field sets and publisher handles: everything acquired was released.
    pub fn ephemeral_balanced(&self) -> bool {
        self.fields_rendered == self.fields_released
            && self.publishers_opened == self.publishers_closed
    }

    /// Every kind of handle is balanced, subscriptions included.
    pub fn is_balanced(&self) -> bool {
        self.ephemeral_balanced()
            && self.contexts_created == self.contexts_released
            && self.subscriptions_opened == self.subscriptions_cancelled
    }
}

enum Delivery {
    Record(Arc<FixtureRecord>),
    Error(u32),
    Barrier(Sender<()>),
}

struct Worker {
    channel: String,
    tx: Sender<Delivery>,
    cancelled: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

struct Bound {
    channel: String,
    record: Arc<FixtureRecord>,
}

#[derive(Default)]
struct State {
    next_handle: u64,
    fail_context: bool,
    channels: HashMap<String, Vec<Arc<FixtureRecord>>>,
    contexts: HashSet<u64>,
    field_sets: HashMap<u64, Arc<FixtureRecord>>,
    publishers: HashSet<u64>,
    events: HashMap<u64, Bound>,
    subscriptions: HashMap<u64, Worker>,
    counts: ResourceCounts,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn stale(&mut self) {
        self.counts.stale_accesses += 1;
    }

    fn slot(&mut self, fields: FieldSetHandle, index: SystemField) -> Option<FixtureValue> {
        match self.field_sets.get(&fields.0) {
            Some(record) => record.fields.get(&index).cloned(),
            None => {
                self.stale();
                None
            }
        }
    }
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Deterministic, resource-counting event log.
#[derive(Clone, Default)]
pub struct MemoryLog {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for MemoryLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryLog")
            .field("resources", &self.resources())
            .finish()
    }
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixture(fixture: Fixture) -> Self {
        let log = Self::new();
        for (channel, records) in fixture.channels {
            log.add_channel(&channel);
            for record in records {
                log.publish(&channel, record);
            }
        }
        log
    }

    pub fn from_json(json: &str) -> Result<Self, FixtureError> {
        let fixture: Fixture = serde_json::from_str(json)?;
        Ok(Self::from_fixture(fixture))
    }

    pub fn load(path: &Path) -> Result<Self, FixtureError> {
        let txt = fs::read_to_string(path)?;
        Self::from_json(&txt)
    }

    /// Make `channel` subscribable even before it holds any record.
    pub fn add_channel(&self, channel: &str) {
        self.inner.lock().channels.entry(channel.to_owned()).or_default();
    }

    /// Append a record to `channel` and deliver it to its live subscriptions.
    pub fn publish(&self, channel: &str, record: FixtureRecord) {
        let record = Arc::new(record);
        let mut state = self.inner.lock();
        state
            .channels
            .entry(channel.to_owned())
            .or_default()
            .push(Arc::clone(&record));
        for worker in state.subscriptions.values().filter(|w| w.channel == channel) {
            let _ = worker.tx.send(Delivery::Record(Arc::clone(&record)));
        }
    }

    /// Deliver an error notification to every subscription on `channel`.
    pub fn raise_error(&self, channel: &str, code: u32) {
        let state = self.inner.lock();
        for worker in state.subscriptions.values().filter(|w| w.channel == channel) {
            let _ = worker.tx.send(Delivery::Error(code));
        }
    }

    /// Make the next `create_render_context` calls fail with out-of-memory.
    pub fn fail_render_context(&self, fail: bool) {
        self.inner.lock().fail_context = fail;
    }

    /// Block until every notification queued so far has been handed to its
    /// sink and the sink has returned.
    pub fn settle(&self) {
        let acks: Vec<Receiver<()>> = {
            let state = self.inner.lock();
            state
                .subscriptions
                .values()
                .map(|worker| {
                    let (ack_tx, ack_rx) = channel::bounded(1);
                    let _ = worker.tx.send(Delivery::Barrier(ack_tx));
                    ack_rx
                })
                .collect()
        };
        for ack in acks {
            let _ = ack.recv_timeout(Duration::from_secs(5));
        }
    }

    pub fn resources(&self) -> ResourceCounts {
        self.inner.lock().counts
    }

    pub fn live_subscriptions(&self) -> usize {
        self.inner.lock().subscriptions.len()
    }
}

fn run_worker(
    inner: Arc<Inner>,
    channel: String,
    handle: u64,
    cancelled: Arc<AtomicBool>,
    rx: Receiver<Delivery>,
    sink: Arc<dyn CallbackSink>,
) {
    for delivery in rx.iter() {
        if cancelled.load(Ordering::Acquire) {
            break;
        }
        match delivery {
            Delivery::Record(record) => {
                inner.lock().events.insert(
                    handle,
                    Bound {
                        channel: channel.clone(),
                        record,
                    },
                );
                sink.on_event(EventHandle(handle));
                inner.lock().events.remove(&handle);
            }
            Delivery::Error(code) => sink.on_error(code),
            Delivery::Barrier(ack) => {
                let _ = ack.send(());
            }
        }
    }
}

impl EvtApi for MemoryLog {
    fn create_render_context(&self) -> Result<RenderContextHandle, NativeError> {
        let mut state = self.inner.lock();
        if state.fail_context {
            return Err(NativeError::new(NativeError::NOT_ENOUGH_MEMORY));
        }
        let id = state.next_id();
        state.contexts.insert(id);
        state.counts.contexts_created += 1;
        Ok(RenderContextHandle(id))
    }

    fn release_render_context(&self, ctx: RenderContextHandle) {
        let mut state = self.inner.lock();
        if state.contexts.remove(&ctx.0) {
            state.counts.contexts_released += 1;
        } else {
            state.stale();
        }
    }

    fn subscribe(
        &self,
        channel: &str,
        query: &str,
        from_beginning: bool,
        sink: Arc<dyn CallbackSink>,
    ) -> Result<SubscriptionHandle, NativeError> {
        if query.trim() != "*" {
            return Err(NativeError::new(NativeError::INVALID_QUERY));
        }

        let mut state = self.inner.lock();
        let backlog: Vec<Arc<FixtureRecord>> = match state.channels.get(channel) {
            Some(history) if from_beginning => history.clone(),
            Some(_) => Vec::new(),
            None => return Err(NativeError::new(NativeError::CHANNEL_NOT_FOUND)),
        };

        let (tx, rx) = channel::unbounded();
        for record in backlog {
            let _ = tx.send(Delivery::Record(record));
        }

        let id = state.next_id();
        let event_handle = state.next_id();
        let cancelled = Arc::new(AtomicBool::new(false));
        let thread = {
            let inner = Arc::clone(&self.inner);
            let channel = channel.to_owned();
            let cancelled = Arc::clone(&cancelled);
            thread::Builder::new()
                .name(format!("memlog-{channel}"))
                .spawn(move || run_worker(inner, channel, event_handle, cancelled, rx, sink))
                .map_err(|_| NativeError::new(NativeError::NOT_ENOUGH_MEMORY))?
        };

        state.subscriptions.insert(
            id,
            Worker {
                channel: channel.to_owned(),
                tx,
                cancelled,
                thread,
            },
        );
        state.counts.subscriptions_opened += 1;
        Ok(SubscriptionHandle(id))
    }

    fn cancel_subscription(&self, sub: SubscriptionHandle) {
        let worker = {
            let mut state = self.inner.lock();
            let worker = state.subscriptions.remove(&sub.0);
            match worker {
                Some(_) => state.counts.subscriptions_cancelled += 1,
                None => state.stale(),
            }
            worker
        };

        if let Some(Worker {
            tx,
            cancelled,
            thread,
            ..
        }) = worker
        {
            cancelled.store(true, Ordering::Release);
            drop(tx);
            let _ = thread.join();
        }
    }

    fn render_event(&self, ctx: RenderContextHandle, event: EventHandle) -> Option<FieldSetHandle> {
        let mut state = self.inner.lock();
        if !state.contexts.contains(&ctx.0) {
            state.stale();
            return None;
        }
        let record = match state.events.get(&event.0) {
            Some(bound) => Arc::clone(&bound.record),
            None => {
                state.stale();
                return None;
            }
        };
        if !record.renderable {
            return None;
        }
        let id = state.next_id();
        state.field_sets.insert(id, record);
        state.counts.fields_rendered += 1;
        Some(FieldSetHandle(id))
    }

    fn release_fields(&self, fields: FieldSetHandle) {
        let mut state = self.inner.lock();
        if state.field_sets.remove(&fields.0).is_some() {
            state.counts.fields_released += 1;
        } else {
            state.stale();
        }
    }

    fn field_type(&self, fields: FieldSetHandle, index: SystemField) -> VariantType {
        self.inner
            .lock()
            .slot(fields, index)
            .map_or(VariantType::Null, |v| v.variant_type())
    }

    fn string_value(&self, fields: FieldSetHandle, index: SystemField) -> Option<String> {
        match self.inner.lock().slot(fields, index)? {
            FixtureValue::String(s) => Some(s),
            _ => None,
        }
    }

    fn unsigned_value(&self, fields: FieldSetHandle, index: SystemField) -> u64 {
        match self.inner.lock().slot(fields, index) {
            Some(FixtureValue::Byte(v)) => u64::from(v),
            Some(FixtureValue::UInt16(v)) => u64::from(v),
            Some(FixtureValue::UInt32(v)) => u64::from(v),
            Some(FixtureValue::UInt64(v)) | Some(FixtureValue::HexInt64(v)) => v,
            _ => 0,
        }
    }

    fn signed_value(&self, fields: FieldSetHandle, index: SystemField) -> i64 {
        match self.inner.lock().slot(fields, index) {
            Some(FixtureValue::SByte(v)) => i64::from(v),
            Some(FixtureValue::Int16(v)) => i64::from(v),
            Some(FixtureValue::Int32(v)) => i64::from(v),
            Some(FixtureValue::Int64(v)) => v,
            _ => 0,
        }
    }

    fn filetime_value(&self, fields: FieldSetHandle, index: SystemField) -> u64 {
        match self.inner.lock().slot(fields, index) {
            Some(FixtureValue::FileTime(ticks)) => ticks,
            _ => 0,
        }
    }

    fn publisher_handle(&self, fields: FieldSetHandle) -> Option<PublisherHandle> {
        let mut state = self.inner.lock();
        let has_publisher = match state.field_sets.get(&fields.0) {
            Some(record) => record.has_publisher,
            None => {
                state.stale();
                return None;
            }
        };
        if !has_publisher {
            return None;
        }
        let id = state.next_id();
        state.publishers.insert(id);
        state.counts.publishers_opened += 1;
        Some(PublisherHandle(id))
    }

    fn close_publisher(&self, publisher: PublisherHandle) {
        let mut state = self.inner.lock();
        if state.publishers.remove(&publisher.0) {
            state.counts.publishers_closed += 1;
        } else {
            state.stale();
        }
    }

    fn format_message(
        &self,
        publisher: PublisherHandle,
        event: EventHandle,
        category: FormatCategory,
    ) -> Option<String> {
        let mut state = self.inner.lock();
        if !state.publishers.contains(&publisher.0) {
            state.stale();
            return None;
        }
        let text = match state.events.get(&event.0) {
            Some(bound) => bound.record.messages.get(&category).cloned(),
            None => {
                state.stale();
                return None;
            }
        };
        text.filter(|t| !t.is_empty())
    }

    fn bookmark(&self, event: EventHandle) -> Option<String> {
        let mut state = self.inner.lock();
        let (channel, record_id) = match state.events.get(&event.0) {
            Some(bound) => (bound.channel.clone(), bound.record.record_id()),
            None => {
                state.stale();
                return None;
            }
        };
        let record_id = record_id?;
        Some(format!(
            "<BookmarkList><Bookmark Channel='{channel}' RecordId='{record_id}' IsCurrent='true'/></BookmarkList>"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixture_json_loads_typed_slots() {
        let json = r#"{
            "channels": {
                "Application": [
                    {
                        "fields": {
                            "ProviderName": { "type": "String", "value": "MsiInstaller" },
                            "Level": { "type": "Byte", "value": 4 },
                            "TimeCreated": { "type": "FileTime", "value": 132539328000000000 }
                        },
                        "messages": { "Event": "Product installed." },
                        "has_publisher": false
                    }
                ]
            }
        }"#;
        let fixture: Fixture = serde_json::from_str(json).unwrap();
        let records = &fixture.channels["Application"];
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(
            record.fields[&SystemField::ProviderName],
            FixtureValue::String("MsiInstaller".into())
        );
        assert_eq!(record.fields[&SystemField::Level].variant_type(), VariantType::Byte);
        assert!(record.renderable);
        assert!(!record.has_publisher);
        assert_eq!(record.messages[&FormatCategory::Event], "Product installed.");
    }

    #[test]
    fn unknown_channel_and_bad_query_are_rejected() {
        struct Nop;
        impl CallbackSink for Nop {
            fn on_event(&self, _: EventHandle) {}
            fn on_error(&self, _: u32) {}
        }

        let log = MemoryLog::new();
        log.add_channel("System");
        let err = log.subscribe("Nope", "*", true, Arc::new(Nop)).unwrap_err();
        assert_eq!(err.code, NativeError::CHANNEL_NOT_FOUND);
        let err = log
            .subscribe("System", "*[System[Level=2]]", true, Arc::new(Nop))
            .unwrap_err();
        assert_eq!(err.code, NativeError::INVALID_QUERY);
        assert_eq!(log.live_subscriptions(), 0);
    }

    #[test]
    fn released_handles_count_as_stale() {
        let log = MemoryLog::new();
        let ctx = log.create_render_context().unwrap();
        log.release_render_context(ctx);
        log.release_render_context(ctx);
        let counts = log.resources();
        assert_eq!(counts.contexts_created, 1);
        assert_eq!(counts.contexts_released, 1);
        assert_eq!(counts.stale_accesses, 1);
    }
}
