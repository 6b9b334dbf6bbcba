// src/bridge/decoder.rs

//! Typed reads from a rendered field set.
//!
//! Each decoder checks the slot's variant tag before touching the value. A
//! tag outside the requested family means "not present" and yields `None`;
//! absent system properties are common (qualifiers only exist for classic
//! providers, process ids are missing on forwarded events, ...).
//!
//! Decoders never acquire or release native resources; the field set belongs
//! to the assembler.

use chrono::{DateTime, Utc};

use crate::evt::{EvtApi, FieldSetHandle, SystemField, VariantType};

/// Seconds between 1601-01-01 (FILETIME epoch) and 1970-01-01.
const WINDOWS_TO_UNIX_EPOCH_SECS: i64 = 11_644_473_600;
/// FILETIME counts 100 ns ticks.
const FILETIME_TICKS_PER_SEC: u64 = 10_000_000;
const NANOS_PER_TICK: u64 = 100;

/// Convert FILETIME ticks to a UTC instant, keeping sub-second precision.
pub fn filetime_to_utc(ticks: u64) -> Option<DateTime<Utc>> {
    let secs = (ticks / FILETIME_TICKS_PER_SEC) as i64 - WINDOWS_TO_UNIX_EPOCH_SECS;
    let nanos = ((ticks % FILETIME_TICKS_PER_SEC) * NANOS_PER_TICK) as u32;
    DateTime::from_timestamp(secs, nanos)
}

/// Timestamp used when `TimeCreated` is missing: FILETIME tick zero.
pub fn zero_time() -> DateTime<Utc> {
    filetime_to_utc(0).unwrap_or_default()
}

pub fn decode_string(api: &dyn EvtApi, fields: FieldSetHandle, index: SystemField) -> Option<String> {
    if api.field_type(fields, index) != VariantType::String {
        return None;
    }
    api.string_value(fields, index)
}

/// Byte, UInt16, UInt32 and UInt64 slots, widened to `u64`.
pub fn decode_unsigned(api: &dyn EvtApi, fields: FieldSetHandle, index: SystemField) -> Option<u64> {
    api.field_type(fields, index)
        .is_unsigned()
        .then(|| api.unsigned_value(fields, index))
}

/// SByte, Int16, Int32 and Int64 slots, widened to `i64`.
pub fn decode_signed(api: &dyn EvtApi, fields: FieldSetHandle, index: SystemField) -> Option<i64> {
    api.field_type(fields, index)
        .is_signed()
        .then(|| api.signed_value(fields, index))
}

pub fn decode_filetime(
    api: &dyn EvtApi,
    fields: FieldSetHandle,
    index: SystemField,
) -> Option<DateTime<Utc>> {
    if api.field_type(fields, index) != VariantType::FileTime {
        return None;
    }
    filetime_to_utc(api.filetime_value(fields, index))
}
