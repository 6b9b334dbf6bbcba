//! Event model delivered to application code.
//!
//! An [`Event`] is the owned, fully-decoded form of one native event record.
//! It is built inside the subscription callback while the native handles are
//! still valid and never refers back to native memory afterwards, so it can
//! be moved across threads, cloned, serialized, or kept for as long as the
//! consumer likes.
//!
//! Every field has a default for the case where the log did not provide it:
//! empty strings, zero numbers, and `1601-01-01T00:00:00Z` (FILETIME zero)
//! for `created`. The `*_text` fields are resolved independently of their
//! numeric counterparts; a level of `4` with an empty `level_text` is normal
//! for providers without a message table.
//!
//! [`SubscriptionError`] is what the error stream carries: a native error
//! notification for one subscription. It does not end the subscription.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bridge::decoder::zero_time;

/// One event from the system log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    // identity / classification
    pub provider_name: String,
    pub event_id: u64,
    pub qualifiers: u64,
    pub version: u64,

    // severity / categorization
    pub level: u64,
    pub task: u64,
    pub opcode: u64,
    pub level_text: String,
    pub task_text: String,
    pub opcode_text: String,
    pub provider_text: String,

    // origin
    pub channel: String,
    pub channel_text: String,
    pub computer_name: String,

    // timing / sequencing
    pub created: DateTime<Utc>,
    pub record_id: u64,

    // process context
    pub process_id: u64,
    pub thread_id: u64,

    // rendered text
    pub msg: String,
    pub id_text: String,

    /// Resume marker (bookmark XML) pointing at this record.
    pub bookmark: String,
}

impl Default for Event {
    fn default() -> Self {
        Self {
            provider_name: String::new(),
            event_id: 0,
            qualifiers: 0,
            version: 0,
            level: 0,
            task: 0,
            opcode: 0,
            level_text: String::new(),
            task_text: String::new(),
            opcode_text: String::new(),
            provider_text: String::new(),
            channel: String::new(),
            channel_text: String::new(),
            computer_name: String::new(),
            created: zero_time(),
            record_id: 0,
            process_id: 0,
            thread_id: 0,
            msg: String::new(),
            id_text: String::new(),
            bookmark: String::new(),
        }
    }
}

/// Native error notification received by one subscription.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("subscription to '{channel}' reported native error {code}")]
pub struct SubscriptionError {
    pub channel: String,
    pub code: u32,
}
