// src/bridge/assembler.rs

//! Callback side of the bridge: one native notification in, one `Event` (or
//! `SubscriptionError`, or nothing) out.
//!
//! Order on the event path:
//!   1. render the event against the watcher's render context
//!   2. open the publisher metadata
//!   3. decode every system property, each on its own
//!   4. format every text category, each on its own
//!   5. copy the bookmark
//!   6. release publisher + field set
//!   7. enqueue
//!
//! Steps 1 and 2 are held by guards, so every exit path releases exactly
//! what was acquired. A failure at 1 or 2 drops the notification; nothing is
//! sent to either stream, only the drop counters move.

use std::sync::Arc;

use crate::comms::events::{Event, SubscriptionError};
use crate::evt::{
    CallbackSink, EventHandle, EvtApi, FieldSetHandle, PublisherHandle, RenderContextHandle,
    SystemField,
};

use super::Bridge;
use super::decoder::{decode_filetime, decode_string, decode_unsigned, zero_time};
use super::formatter::FormattedTexts;

/// Why a notification produced no event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dropped {
    Render,
    NoPublisher,
}

impl Dropped {
    pub fn reason(self) -> &'static str {
        match self {
            Dropped::Render => "render",
            Dropped::NoPublisher => "publisher",
        }
    }
}

/// Rendered field set, released on drop.
struct FieldSet<'a> {
    api: &'a dyn EvtApi,
    handle: FieldSetHandle,
}

impl<'a> FieldSet<'a> {
    fn render(api: &'a dyn EvtApi, ctx: RenderContextHandle, event: EventHandle) -> Option<Self> {
        let handle = api.render_event(ctx, event)?;
        Some(Self { api, handle })
    }
}

impl Drop for FieldSet<'_> {
    fn drop(&mut self) {
        self.api.release_fields(self.handle);
    }
}

/// Publisher metadata handle, closed on drop.
struct Publisher<'a> {
    api: &'a dyn EvtApi,
    handle: PublisherHandle,
}

impl<'a> Publisher<'a> {
    fn open(api: &'a dyn EvtApi, fields: &FieldSet<'_>) -> Option<Self> {
        let handle = api.publisher_handle(fields.handle)?;
        Some(Self { api, handle })
    }
}

impl Drop for Publisher<'_> {
    fn drop(&mut self) {
        self.api.close_publisher(self.handle);
    }
}

/// Build an `Event` from a native event handle.
///
/// `event` belongs to the caller and is only used for the duration of this call.
pub fn assemble(
    api: &dyn EvtApi,
    ctx: RenderContextHandle,
    event: EventHandle,
) -> Result<Event, Dropped> {
    let fields = FieldSet::render(api, ctx, event).ok_or(Dropped::Render)?;
    let publisher = Publisher::open(api, &fields).ok_or(Dropped::NoPublisher)?;

    let f = fields.handle;
    let string = |index| decode_string(api, f, index).unwrap_or_default();
    let number = |index| decode_unsigned(api, f, index).unwrap_or_default();

    let texts = FormattedTexts::collect(api, publisher.handle, event);
    let assembled = Event {
        provider_name: string(SystemField::ProviderName),
        event_id: number(SystemField::EventId),
        qualifiers: number(SystemField::Qualifiers),
        version: number(SystemField::Version),
        level: number(SystemField::Level),
        task: number(SystemField::Task),
        opcode: number(SystemField::Opcode),
        level_text: texts.level,
        task_text: texts.task,
        opcode_text: texts.opcode,
        provider_text: texts.provider,
        channel: string(SystemField::Channel),
        channel_text: texts.channel,
        computer_name: string(SystemField::Computer),
        created: decode_filetime(api, f, SystemField::TimeCreated).unwrap_or_else(zero_time),
        record_id: number(SystemField::EventRecordId),
        process_id: number(SystemField::ProcessId),
        thread_id: number(SystemField::ThreadId),
        msg: texts.msg,
        id_text: texts.id,
        bookmark: api.bookmark(event).unwrap_or_default(),
    };

    drop(publisher);
    drop(fields);
    Ok(assembled)
}

/// Event notification for a watcher.
pub(crate) fn deliver_event(bridge: &Bridge, event: EventHandle) {
    let live = bridge.live();
    let Some(live) = live.as_ref() else {
        log::trace!("event {:?} after shutdown ignored", event);
        return;
    };

    match assemble(bridge.api().as_ref(), live.context.handle(), event) {
        Ok(ev) => {
            log::trace!("event {} from '{}' assembled", ev.record_id, ev.provider_name);
            if live.events.send(ev).is_ok() {
                bridge.stats().delivered();
                metrics::counter!("winlog_events_delivered_total").increment(1);
            }
        }
        Err(reason) => {
            log::debug!("event {:?} dropped ({})", event, reason.reason());
            bridge.stats().dropped(reason);
            metrics::counter!("winlog_events_dropped_total", "reason" => reason.reason())
                .increment(1);
        }
    }
}

/// Error notification for a watcher.
pub(crate) fn deliver_error(bridge: &Bridge, channel: &str, code: u32) {
    let live = bridge.live();
    let Some(live) = live.as_ref() else {
        return;
    };
    log::warn!("subscription '{}' reported error {}", channel, code);
    let err = SubscriptionError {
        channel: channel.to_owned(),
        code,
    };
    if live.errors.send(err).is_ok() {
        bridge.stats().error();
        metrics::counter!("winlog_subscription_errors_total").increment(1);
    }
}

/// Callback target registered for one subscription.
pub(crate) struct SubscriptionSink {
    channel: String,
    bridge: Arc<Bridge>,
}

impl SubscriptionSink {
    pub fn new(channel: &str, bridge: Arc<Bridge>) -> Self {
        Self {
            channel: channel.to_owned(),
            bridge,
        }
    }
}

impl CallbackSink for SubscriptionSink {
    fn on_event(&self, event: EventHandle) {
        deliver_event(&self.bridge, event);
    }

    fn on_error(&self, code: u32) {
        deliver_error(&self.bridge, &self.channel, code);
    }
}
