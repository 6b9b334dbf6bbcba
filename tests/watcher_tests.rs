// tests/watcher_tests.rs

//! # Watcher Tests
//!
//! End-to-end behaviour of `Watcher` against the in-process `MemoryLog`:
//! replayed and live records, drops, error notifications, shutdown, and the
//! resource tallies the memory backend keeps for every native handle.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use crossbeam::channel::RecvTimeoutError;

use winlog::evt::memory::{FixtureRecord, FixtureValue, MemoryLog};
use winlog::evt::{FormatCategory, NativeError, SystemField};
use winlog::{Event, Watcher, WatcherError};

const WAIT: Duration = Duration::from_secs(2);

/// 2021-01-01T00:00:00Z as FILETIME ticks.
const NEW_YEAR_2021: u64 = 132_539_328_000_000_000;
const TICKS_PER_SECOND: u64 = 10_000_000;

fn record(record_id: u64, provider: &str, seconds: u64) -> FixtureRecord {
    FixtureRecord::new()
        .field(SystemField::ProviderName, FixtureValue::String(provider.into()))
        .field(SystemField::EventId, FixtureValue::UInt16(1000))
        .field(SystemField::Qualifiers, FixtureValue::UInt16(0x4000))
        .field(SystemField::Level, FixtureValue::Byte(4))
        .field(SystemField::Channel, FixtureValue::String("Application".into()))
        .field(SystemField::Computer, FixtureValue::String("WS-042".into()))
        .field(SystemField::EventRecordId, FixtureValue::UInt64(record_id))
        .field(
            SystemField::TimeCreated,
            FixtureValue::FileTime(NEW_YEAR_2021 + seconds * TICKS_PER_SECOND),
        )
        .field(SystemField::ProcessId, FixtureValue::UInt32(812))
        .field(SystemField::ThreadId, FixtureValue::UInt32(4410))
        .message(FormatCategory::Event, format!("record {record_id}"))
        .message(FormatCategory::Level, "Information")
}

fn watcher_over(log: &MemoryLog) -> Watcher {
    Watcher::new(Arc::new(log.clone())).unwrap()
}

fn drain(watcher: &Watcher) -> Vec<Event> {
    watcher.events().try_iter().collect()
}

fn at(seconds: u64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_609_459_200 + seconds as i64, 0).unwrap()
}

#[test]
fn replays_existing_records_from_beginning() {
    let log = MemoryLog::new();
    log.publish("Application", record(101, "MsiInstaller", 0));
    log.publish("Application", record(102, "Application Error", 5));
    log.publish("Application", record(103, "VSS", 60));

    let watcher = watcher_over(&log);
    watcher.subscribe_from_beginning("Application", "*").unwrap();
    log.settle();

    let events = drain(&watcher);
    assert_eq!(events.len(), 3);
    assert_eq!(
        events.iter().map(|e| e.record_id).collect::<Vec<_>>(),
        vec![101, 102, 103]
    );
    assert!(events.iter().all(|e| !e.provider_name.is_empty()));
    assert!(events.windows(2).all(|w| w[0].created < w[1].created));
    assert_eq!(events[0].created, at(0));
    assert_eq!(events[2].created, at(60));

    let first = &events[0];
    assert_eq!(first.event_id, 1000);
    assert_eq!(first.qualifiers, 0x4000);
    assert_eq!(first.level, 4);
    assert_eq!(first.level_text, "Information");
    assert_eq!(first.msg, "record 101");
    assert_eq!(first.computer_name, "WS-042");
    assert_eq!((first.process_id, first.thread_id), (812, 4410));
    assert!(first.bookmark.contains("RecordId='101'"));

    watcher.shutdown();
    let counts = log.resources();
    assert!(counts.is_balanced(), "{counts:?}");
    assert_eq!(counts.stale_accesses, 0);
}

#[test]
fn absent_qualifiers_default_to_zero() {
    let log = MemoryLog::new();
    let mut rec = record(7, "Wininit", 0);
    rec.fields.remove(&SystemField::Qualifiers);
    log.publish("Application", rec);

    let watcher = watcher_over(&log);
    watcher.subscribe_from_beginning("Application", "*").unwrap();
    log.settle();

    let ev = watcher.events().recv_timeout(WAIT).unwrap();
    assert_eq!(ev.qualifiers, 0);
    assert_eq!(ev.event_id, 1000);
    assert_eq!(ev.provider_name, "Wininit");
    assert_eq!(ev.record_id, 7);
    assert_eq!(ev.created, at(0));
}

#[test]
fn mismatched_types_fall_back_to_defaults() {
    let log = MemoryLog::new();
    let rec = record(8, "Kernel-General", 0)
        .field(SystemField::EventId, FixtureValue::String("not a number".into()))
        .field(SystemField::ProviderName, FixtureValue::UInt32(5))
        .field(SystemField::TimeCreated, FixtureValue::Null);
    log.publish("Application", rec);

    let watcher = watcher_over(&log);
    watcher.subscribe_from_beginning("Application", "*").unwrap();
    log.settle();

    let ev = watcher.events().recv_timeout(WAIT).unwrap();
    assert_eq!(ev.event_id, 0);
    assert_eq!(ev.provider_name, "");
    assert_eq!(ev.created, Event::default().created);
    assert_eq!(ev.record_id, 8);
    assert_eq!(ev.level, 4);
}

#[test]
fn future_only_subscription_skips_backlog() {
    let log = MemoryLog::new();
    log.publish("System", record(1, "EventLog", 0));

    let watcher = watcher_over(&log);
    watcher.subscribe("System", "*").unwrap();
    log.settle();
    assert!(drain(&watcher).is_empty());

    log.publish("System", record(2, "EventLog", 1));
    let ev = watcher.events().recv_timeout(WAIT).unwrap();
    assert_eq!(ev.record_id, 2);
}

#[test]
fn order_is_preserved_around_drops() {
    let log = MemoryLog::new();
    let watcher = watcher_over(&log);
    log.add_channel("Security");
    watcher.subscribe("Security", "*").unwrap();

    let mut expected = Vec::new();
    for id in 1..=200u64 {
        let rec = record(id, "Microsoft-Windows-Security-Auditing", id);
        let rec = match id % 10 {
            3 => rec.unrenderable(),
            7 => rec.without_publisher(),
            _ => {
                expected.push(id);
                rec
            }
        };
        log.publish("Security", rec);
    }
    log.settle();

    let got: Vec<u64> = drain(&watcher).iter().map(|e| e.record_id).collect();
    assert_eq!(got, expected);

    let stats = watcher.stats();
    assert_eq!(stats.delivered, expected.len() as u64);
    assert_eq!(stats.dropped_render, 20);
    assert_eq!(stats.dropped_publisher, 20);
    assert_eq!(stats.errors, 0);

    watcher.shutdown();
    let counts = log.resources();
    assert!(counts.is_balanced(), "{counts:?}");
    assert_eq!(counts.fields_rendered, 180);
    assert_eq!(counts.publishers_opened, 160);
    assert_eq!(counts.stale_accesses, 0);
}

#[test]
fn errors_arrive_on_their_own_stream() {
    let log = MemoryLog::new();
    log.add_channel("Setup");
    let watcher = watcher_over(&log);
    watcher.subscribe("Setup", "*").unwrap();

    log.raise_error("Setup", 15_027);
    log.publish("Setup", record(9, "Servicing", 0));
    log.settle();

    let err = watcher.errors().recv_timeout(WAIT).unwrap();
    assert_eq!(err.channel, "Setup");
    assert_eq!(err.code, 15_027);

    // the subscription keeps running after an error
    let ev = watcher.events().recv_timeout(WAIT).unwrap();
    assert_eq!(ev.record_id, 9);
    assert_eq!(watcher.stats().errors, 1);
}

#[test]
fn delivered_events_survive_handle_reuse() {
    let log = MemoryLog::new();
    log.add_channel("Application");
    let watcher = watcher_over(&log);
    watcher.subscribe("Application", "*").unwrap();

    log.publish("Application", record(1, "First", 0));
    log.settle();
    let first = watcher.events().recv_timeout(WAIT).unwrap();
    let snapshot = first.clone();

    // same native event handle, different record
    log.publish("Application", record(2, "Second", 1));
    log.settle();
    let second = watcher.events().recv_timeout(WAIT).unwrap();

    assert_eq!(first, snapshot);
    assert_eq!(first.provider_name, "First");
    assert_eq!(second.provider_name, "Second");
}

#[test]
fn subscribe_failures_are_reported() {
    let log = MemoryLog::new();
    let watcher = watcher_over(&log);

    match watcher.subscribe("NoSuchLog", "*") {
        Err(WatcherError::Subscribe { channel, source, .. }) => {
            assert_eq!(channel, "NoSuchLog");
            assert_eq!(source.code, NativeError::CHANNEL_NOT_FOUND);
        }
        other => panic!("unexpected: {other:?}"),
    }

    log.add_channel("Application");
    match watcher.subscribe("Application", "*[System[Level=2]]") {
        Err(WatcherError::Subscribe { query, source, .. }) => {
            assert_eq!(query, "*[System[Level=2]]");
            assert_eq!(source.code, NativeError::INVALID_QUERY);
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(watcher.subscription_count(), 0);
    assert!(watcher.is_running());
}

#[test]
fn render_context_failure_fails_construction() {
    let log = MemoryLog::new();
    log.fail_render_context(true);

    match Watcher::new(Arc::new(log.clone())) {
        Err(WatcherError::ResourceCreation(e)) => {
            assert_eq!(e.code, NativeError::NOT_ENOUGH_MEMORY)
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(log.resources().contexts_created, 0);
}

#[test]
fn shutdown_releases_everything_and_rejects_new_subscriptions() {
    let log = MemoryLog::new();
    log.publish("Application", record(1, "MsiInstaller", 0));
    let watcher = watcher_over(&log);
    watcher.subscribe_from_beginning("Application", "*").unwrap();
    log.settle();

    watcher.shutdown();
    assert!(!watcher.is_running());
    assert_eq!(log.live_subscriptions(), 0);

    let before = log.resources();
    assert_eq!(before.contexts_created, 1);
    assert_eq!(before.contexts_released, 1);

    assert!(matches!(
        watcher.subscribe("Application", "*"),
        Err(WatcherError::ShutDown)
    ));
    // no native call was made for the rejected subscription
    assert_eq!(log.resources(), before);
    assert_eq!(before.stale_accesses, 0);

    // already queued events stay readable, then the stream reports closure
    assert_eq!(watcher.events().recv_timeout(WAIT).unwrap().record_id, 1);
    assert_eq!(
        watcher.events().recv_timeout(Duration::from_millis(50)),
        Err(RecvTimeoutError::Disconnected)
    );
    assert!(watcher.errors().recv().is_err());
}

#[test]
fn shutdown_is_idempotent_and_runs_on_drop() {
    let log = MemoryLog::new();
    log.add_channel("System");
    {
        let watcher = watcher_over(&log);
        watcher.subscribe("System", "*").unwrap();
        watcher.shutdown();
        watcher.shutdown();
    }
    {
        let watcher = watcher_over(&log);
        watcher.subscribe("System", "*").unwrap();
    }

    let counts = log.resources();
    assert_eq!(counts.contexts_created, 2);
    assert!(counts.is_balanced(), "{counts:?}");
    assert_eq!(counts.stale_accesses, 0);
}

#[test]
fn records_published_after_shutdown_touch_nothing() {
    let log = MemoryLog::new();
    log.add_channel("System");
    let watcher = watcher_over(&log);
    watcher.subscribe("System", "*").unwrap();
    watcher.shutdown();

    log.publish("System", record(5, "EventLog", 0));
    log.settle();

    let counts = log.resources();
    assert_eq!(counts.fields_rendered, 0);
    assert_eq!(counts.stale_accesses, 0);
    assert_eq!(watcher.stats().delivered, 0);
}

#[test]
fn several_channels_share_one_watcher() {
    let log = MemoryLog::new();
    log.publish("Application", record(1, "A", 0));
    log.publish("System", record(2, "B", 0));

    let watcher = watcher_over(&log);
    watcher.subscribe_from_beginning("Application", "*").unwrap();
    watcher.subscribe_from_beginning("System", "*").unwrap();
    assert_eq!(watcher.subscription_count(), 2);
    log.settle();

    let mut ids: Vec<u64> = drain(&watcher).iter().map(|e| e.record_id).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(log.resources().contexts_created, 1);
}

#[test]
fn fixture_json_feeds_a_watcher() {
    let json = r#"{
        "channels": {
            "Application": [
                {
                    "fields": {
                        "ProviderName":  { "type": "String", "value": "MsiInstaller" },
                        "EventId":       { "type": "UInt16", "value": 11707 },
                        "EventRecordId": { "type": "UInt64", "value": 42 },
                        "TimeCreated":   { "type": "FileTime", "value": 132539328000000000 }
                    },
                    "messages": { "Event": "Product: Contoso -- Installation completed successfully." }
                },
                { "renderable": false }
            ]
        }
    }"#;
    let log = MemoryLog::from_json(json).unwrap();
    let watcher = watcher_over(&log);
    watcher.subscribe_from_beginning("Application", "*").unwrap();
    log.settle();

    let events = drain(&watcher);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_id, 11707);
    assert_eq!(events[0].record_id, 42);
    assert_eq!(events[0].created, at(0));
    assert!(events[0].msg.starts_with("Product: Contoso"));
    assert_eq!(watcher.stats().dropped_render, 1);
}

#[test]
fn shutdown_while_callbacks_are_running() {
    const PER_CHANNEL: u64 = 1000;

    for round in 0..20 {
        let log = MemoryLog::new();
        log.add_channel("A");
        log.add_channel("B");
        let watcher = watcher_over(&log);
        watcher.subscribe("A", "*").unwrap();
        watcher.subscribe("B", "*").unwrap();

        std::thread::scope(|s| {
            let publisher = log.clone();
            s.spawn(move || {
                for id in 1..=PER_CHANNEL {
                    for channel in ["A", "B"] {
                        let rec = record(id, "Publisher", id)
                            .field(SystemField::Channel, FixtureValue::String(channel.into()));
                        publisher.publish(channel, rec);
                    }
                }
            });

            std::thread::sleep(Duration::from_micros(300));
            watcher.shutdown();
        });

        let counts = log.resources();
        assert!(counts.is_balanced(), "round {round}: {counts:?}");
        assert_eq!(counts.stale_accesses, 0, "round {round}");
        assert_eq!(log.live_subscriptions(), 0);

        let events = drain(&watcher);
        for channel in ["A", "B"] {
            let ids: Vec<u64> = events
                .iter()
                .filter(|e| e.channel == channel)
                .map(|e| e.record_id)
                .collect();
            assert!(
                ids.windows(2).all(|w| w[0] < w[1]),
                "round {round}: '{channel}' out of order"
            );
        }
        assert_eq!(events.len() as u64, watcher.stats().delivered);
        assert!(watcher.stats().delivered <= 2 * PER_CHANNEL);
    }
}
