//! Async adapters for the watcher streams.
//! -----------------------------------------------------------------------------
//! The watcher queues are blocking `crossbeam` channels. For Tokio consumers
//! this module drains one of them on a dedicated blocking thread and re‑sends
//! every item into a bounded `tokio::sync::mpsc` channel, exposed as a
//! `Stream`.
//!
//! The bounded side only ever blocks that forwarding thread; the native
//! callback keeps pushing into the unbounded queue behind it.
//!
//! A forwarded stream competes with direct `recv` calls on the same watcher
//! queue, so pick one consumer style per stream.

use crossbeam::channel::{Receiver, RecvTimeoutError};
use std::time::Duration;
use tokio::{sync::mpsc, task};
use tokio_stream::wrappers::ReceiverStream;

use crate::comms::events::{Event, SubscriptionError};
use crate::comms::watcher::Watcher;

/// Capacity of the async side of a forwarded stream.
pub const DEFAULT_CAPACITY: usize = 16_384;

/// How often an idle forwarder checks whether the stream was dropped.
const IDLE_CHECK: Duration = Duration::from_millis(100);

/// Forward `rx` into a Tokio stream. Must be called inside a Tokio runtime.
///
/// The forwarder exits when `rx` disconnects (watcher shut down) or when the
/// returned stream is dropped.
pub fn forward<T: Send + 'static>(rx: Receiver<T>, capacity: usize) -> ReceiverStream<T> {
    let (tx, out) = mpsc::channel(capacity);
    task::spawn_blocking(move || {
        loop {
            match rx.recv_timeout(IDLE_CHECK) {
                Ok(item) => {
                    // blocking_send() blocks this thread only, never a Tokio worker
                    if tx.blocking_send(item).is_err() {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) if tx.is_closed() => break,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        log::debug!("stream forwarder exited");
    });
    ReceiverStream::new(out)
}

/// The watcher's events as a Tokio stream.
pub fn forward_events(watcher: &Watcher) -> ReceiverStream<Event> {
    forward(watcher.events().clone(), DEFAULT_CAPACITY)
}

/// The watcher's subscription errors as a Tokio stream.
pub fn forward_errors(watcher: &Watcher) -> ReceiverStream<SubscriptionError> {
    forward(watcher.errors().clone(), DEFAULT_CAPACITY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evt::memory::{FixtureRecord, FixtureValue, MemoryLog};
    use crate::evt::SystemField;
    use crossbeam::channel::unbounded;
    use std::{sync::Arc, time::Duration};
    use tokio::time::timeout;
    use tokio_stream::StreamExt;

    const WAIT: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn forwards_in_order_until_disconnect() {
        let (tx, rx) = unbounded();
        let mut stream = forward(rx, 2);
        for i in 0..10u32 {
            tx.send(i).unwrap();
        }
        drop(tx);

        let mut got = Vec::new();
        while let Some(i) = stream.next().await {
            got.push(i);
        }
        assert_eq!(got, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn watcher_streams_end_after_shutdown() {
        let log = MemoryLog::new();
        for id in [11u64, 12, 13] {
            log.publish(
                "Microsoft-Windows-Sysmon/Operational",
                FixtureRecord::new()
                    .field(SystemField::ProviderName, FixtureValue::String("Sysmon".into()))
                    .field(SystemField::EventRecordId, FixtureValue::UInt64(id)),
            );
        }
        let watcher = Watcher::new(Arc::new(log.clone())).unwrap();
        let mut events = forward_events(&watcher);
        let mut errors = forward_errors(&watcher);

        watcher
            .subscribe_from_beginning("Microsoft-Windows-Sysmon/Operational", "*")
            .unwrap();
        log.raise_error("Microsoft-Windows-Sysmon/Operational", 15_008);

        let mut ids = Vec::new();
        for _ in 0..3 {
            let ev = timeout(WAIT, events.next()).await.unwrap().unwrap();
            assert_eq!(ev.provider_name, "Sysmon");
            ids.push(ev.record_id);
        }
        assert_eq!(ids, vec![11, 12, 13]);

        let err = timeout(WAIT, errors.next()).await.unwrap().unwrap();
        assert_eq!(err.code, 15_008);

        watcher.shutdown();
        assert!(timeout(WAIT, events.next()).await.unwrap().is_none());
        assert!(timeout(WAIT, errors.next()).await.unwrap().is_none());
    }
}
