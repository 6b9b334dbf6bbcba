//! Rendering and delivery bridge.
//! -----------------------------------------------------------------------------
//! State shared between a watcher and the native callback threads:
//!
//!   • `Live`   → render context + stream senders, present until shutdown.
//!   • `Bridge` → holds `Live` behind an `RwLock`. Callbacks take the read
//!     side for their whole invocation; shutdown takes the write side, so the
//!     render context can never be released while a callback is using it.
//!
//! `assembler` turns one native notification into an `Event` or a
//! `SubscriptionError`; `decoder` and `formatter` are its building blocks.

pub mod assembler;
pub mod decoder;
pub mod formatter;
pub mod render_context;

use crossbeam::channel::{self, Receiver, Sender};
use serde::Serialize;
use std::sync::{
    Arc, PoisonError, RwLock, RwLockReadGuard,
    atomic::{AtomicU64, Ordering},
};

use crate::comms::events::{Event, SubscriptionError};
use crate::error::WatcherError;
use crate::evt::EvtApi;
use render_context::{RenderContext, create_system_render_context};

/// Everything a callback needs while the watcher is running.
pub(crate) struct Live {
    pub context: RenderContext,
    pub events: Sender<Event>,
    pub errors: Sender<SubscriptionError>,
}

/// Counters for what happened to each notification.
#[derive(Debug, Default)]
pub struct DeliveryStats {
    delivered: AtomicU64,
    dropped_render: AtomicU64,
    dropped_publisher: AtomicU64,
    errors: AtomicU64,
}

/// Point-in-time copy of [`DeliveryStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliverySnapshot {
    pub delivered: u64,
    /// Rendering returned no buffer.
    pub dropped_render: u64,
    /// The publisher metadata could not be opened.
    pub dropped_publisher: u64,
    pub errors: u64,
}

impl DeliverySnapshot {
    pub fn dropped(&self) -> u64 {
        self.dropped_render + self.dropped_publisher
    }
}

impl DeliveryStats {
    pub(crate) fn delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn dropped(&self, reason: assembler::Dropped) {
        let counter = match reason {
            assembler::Dropped::Render => &self.dropped_render,
            assembler::Dropped::NoPublisher => &self.dropped_publisher,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DeliverySnapshot {
        DeliverySnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped_render: self.dropped_render.load(Ordering::Relaxed),
            dropped_publisher: self.dropped_publisher.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Shared state behind every subscription of one watcher.
pub(crate) struct Bridge {
    api: Arc<dyn EvtApi>,
    live: RwLock<Option<Live>>,
    stats: DeliveryStats,
}

impl Bridge {
    /// Create the render context and both streams.
    pub fn open(
        api: Arc<dyn EvtApi>,
    ) -> Result<(Arc<Self>, Receiver<Event>, Receiver<SubscriptionError>), WatcherError> {
        let context = create_system_render_context(&api)?;
        let (events_tx, events_rx) = channel::unbounded();
        let (errors_tx, errors_rx) = channel::unbounded();
        let bridge = Arc::new(Self {
            api,
            live: RwLock::new(Some(Live {
                context,
                events: events_tx,
                errors: errors_tx,
            })),
            stats: DeliveryStats::default(),
        });
        Ok((bridge, events_rx, errors_rx))
    }

    pub fn api(&self) -> &Arc<dyn EvtApi> {
        &self.api
    }

    pub fn stats(&self) -> &DeliveryStats {
        &self.stats
    }

    pub fn live(&self) -> RwLockReadGuard<'_, Option<Live>> {
        self.live.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_live(&self) -> bool {
        self.live().is_some()
    }

    /// Release the render context and close both streams.
    /// Waits for running callbacks; returns `false` if already closed.
    pub fn close(&self) -> bool {
        let taken = self
            .live
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        taken.is_some()
    }
}
