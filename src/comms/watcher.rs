//! Watcher: what the application holds.
//! -----------------------------------------------------------------------------
//! A `Watcher` owns one render context, any number of native subscriptions,
//! and the receiving ends of two unbounded streams:
//!
//!   • `events()` → every `Event` assembled by the subscription callbacks,
//!   • `errors()` → `SubscriptionError`s reported by the native layer.
//!
//! Both are `crossbeam` receivers, so the caller picks `try_recv`, `recv`,
//! `recv_timeout` or `select!`. Senders never block: a consumer that falls
//! behind only grows the queue, it never stalls the log service's thread.
//!
//! `shutdown()` cancels every subscription (each cancel waits for its running
//! callback), then releases the render context and closes both streams.
//! Events already queued stay readable; afterwards `recv()` reports
//! disconnection.

use crossbeam::channel::Receiver;
use log::Level;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::bridge::{Bridge, DeliverySnapshot, assembler::SubscriptionSink};
use crate::comms::events::{Event, SubscriptionError};
use crate::error::WatcherError;
use crate::evt::{CallbackSink, EvtApi, SubscriptionHandle};

struct ActiveSubscription {
    channel: String,
    handle: SubscriptionHandle,
}

pub struct Watcher {
    bridge: Arc<Bridge>,
    subscriptions: Mutex<Vec<ActiveSubscription>>,
    events: Receiver<Event>,
    errors: Receiver<SubscriptionError>,
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("running", &self.is_running())
            .field("subscriptions", &self.subscription_count())
            .field("stats", &self.stats())
            .finish()
    }
}

impl Watcher {
    /// Create a watcher over `api`. Fails if no render context can be created.
    pub fn new(api: Arc<dyn EvtApi>) -> Result<Self, WatcherError> {
        let (bridge, events, errors) = Bridge::open(api)?;
        winlog_log!(Level::Debug, "watcher", "render context created");
        Ok(Self {
            bridge,
            subscriptions: Mutex::new(Vec::new()),
            events,
            errors,
        })
    }

    /// Watcher over the local system event log.
    #[cfg(windows)]
    pub fn system() -> Result<Self, WatcherError> {
        Self::new(Arc::new(crate::evt::windows::WinEvtApi::new()))
    }

    /// Receive future events of `channel` matching `query`.
    pub fn subscribe(&self, channel: &str, query: &str) -> Result<(), WatcherError> {
        self.start(channel, query, false)
    }

    /// Receive every stored event of `channel` matching `query`, then future ones.
    pub fn subscribe_from_beginning(&self, channel: &str, query: &str) -> Result<(), WatcherError> {
        self.start(channel, query, true)
    }

    fn start(&self, channel: &str, query: &str, from_beginning: bool) -> Result<(), WatcherError> {
        let mut subs = self.lock_subscriptions();
        if !self.bridge.is_live() {
            return Err(WatcherError::ShutDown);
        }

        let sink: Arc<dyn CallbackSink> =
            Arc::new(SubscriptionSink::new(channel, Arc::clone(&self.bridge)));
        let handle = self
            .bridge
            .api()
            .subscribe(channel, query, from_beginning, sink)
            .map_err(|source| WatcherError::Subscribe {
                channel: channel.to_owned(),
                query: query.to_owned(),
                source,
            })?;

        subs.push(ActiveSubscription {
            channel: channel.to_owned(),
            handle,
        });
        winlog_log!(
            Level::Info,
            "watcher",
            "subscribed to '{}' (query={:?}, from_beginning={})",
            channel,
            query,
            from_beginning
        );
        Ok(())
    }

    pub fn events(&self) -> &Receiver<Event> {
        &self.events
    }

    pub fn errors(&self) -> &Receiver<SubscriptionError> {
        &self.errors
    }

    pub fn stats(&self) -> DeliverySnapshot {
        self.bridge.stats().snapshot()
    }

    pub fn subscription_count(&self) -> usize {
        self.lock_subscriptions().len()
    }

    pub fn is_running(&self) -> bool {
        self.bridge.is_live()
    }

    /// Cancel all subscriptions and release native resources. Idempotent.
    pub fn shutdown(&self) {
        let mut subs = self.lock_subscriptions();
        for sub in subs.drain(..) {
            log::debug!("cancelling subscription to '{}'", sub.channel);
            self.bridge.api().cancel_subscription(sub.handle);
        }
        if self.bridge.close() {
            let stats = self.stats();
            winlog_log!(
                Level::Info,
                "watcher",
                "shut down (delivered={}, dropped={}, errors={})",
                stats.delivered,
                stats.dropped(),
                stats.errors
            );
        }
    }

    fn lock_subscriptions(&self) -> MutexGuard<'_, Vec<ActiveSubscription>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
