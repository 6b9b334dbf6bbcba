//! Native enumerations mirrored from `winevt.h`.
//!
//! The numeric values are the ones the Event Log service uses on the wire:
//! `EVT_VARIANT_TYPE`, `EVT_SYSTEM_PROPERTY_ID` and
//! `EVT_FORMAT_MESSAGE_FLAGS`. They must stay stable because fixtures and log
//! lines refer to them.

use serde::{Deserialize, Serialize};

/// Runtime type tag of one slot in a rendered field set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariantType {
    Null,
    String,
    AnsiString,
    SByte,
    Byte,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Single,
    Double,
    Boolean,
    Binary,
    Guid,
    SizeT,
    FileTime,
    SysTime,
    Sid,
    HexInt32,
    HexInt64,
    EvtHandle,
    EvtXml,
    /// A tag this crate does not know about.
    Other(u32),
}

impl VariantType {
    /// `EVT_VARIANT_TYPE_MASK`.
    pub const TYPE_MASK: u32 = 0x7f;
    /// `EVT_VARIANT_TYPE_ARRAY`: the slot holds a pointer to an array.
    pub const ARRAY_FLAG: u32 = 0x80;

    /// Array slots map to `Other` so no scalar decoder ever accepts them.
    pub fn from_raw(raw: u32) -> Self {
        if raw & Self::ARRAY_FLAG != 0 {
            return VariantType::Other(raw);
        }
        match raw & Self::TYPE_MASK {
            0 => VariantType::Null,
            1 => VariantType::String,
            2 => VariantType::AnsiString,
            3 => VariantType::SByte,
            4 => VariantType::Byte,
            5 => VariantType::Int16,
            6 => VariantType::UInt16,
            7 => VariantType::Int32,
            8 => VariantType::UInt32,
            9 => VariantType::Int64,
            10 => VariantType::UInt64,
            11 => VariantType::Single,
            12 => VariantType::Double,
            13 => VariantType::Boolean,
            14 => VariantType::Binary,
            15 => VariantType::Guid,
            16 => VariantType::SizeT,
            17 => VariantType::FileTime,
            18 => VariantType::SysTime,
            19 => VariantType::Sid,
            20 => VariantType::HexInt32,
            21 => VariantType::HexInt64,
            32 => VariantType::EvtHandle,
            35 => VariantType::EvtXml,
            other => VariantType::Other(other),
        }
    }

    pub fn raw(self) -> u32 {
        match self {
            VariantType::Null => 0,
            VariantType::String => 1,
            VariantType::AnsiString => 2,
            VariantType::SByte => 3,
            VariantType::Byte => 4,
            VariantType::Int16 => 5,
            VariantType::UInt16 => 6,
            VariantType::Int32 => 7,
            VariantType::UInt32 => 8,
            VariantType::Int64 => 9,
            VariantType::UInt64 => 10,
            VariantType::Single => 11,
            VariantType::Double => 12,
            VariantType::Boolean => 13,
            VariantType::Binary => 14,
            VariantType::Guid => 15,
            VariantType::SizeT => 16,
            VariantType::FileTime => 17,
            VariantType::SysTime => 18,
            VariantType::Sid => 19,
            VariantType::HexInt32 => 20,
            VariantType::HexInt64 => 21,
            VariantType::EvtHandle => 32,
            VariantType::EvtXml => 35,
            VariantType::Other(raw) => raw,
        }
    }

    pub fn is_unsigned(self) -> bool {
        matches!(
            self,
            VariantType::Byte | VariantType::UInt16 | VariantType::UInt32 | VariantType::UInt64
        )
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            VariantType::SByte | VariantType::Int16 | VariantType::Int32 | VariantType::Int64
        )
    }
}

/// Index of a system property inside a system render context buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SystemField {
    ProviderName,
    ProviderGuid,
    EventId,
    Qualifiers,
    Level,
    Task,
    Opcode,
    Keywords,
    TimeCreated,
    EventRecordId,
    ActivityId,
    RelatedActivityId,
    ProcessId,
    ThreadId,
    Channel,
    Computer,
    UserId,
    Version,
}

impl SystemField {
    /// `EvtSystemPropertyIdEND`: number of slots in a system render buffer.
    pub const COUNT: usize = 18;

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Which piece of text `EvtFormatMessage` should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FormatCategory {
    Event,
    Level,
    Task,
    Opcode,
    Keyword,
    Channel,
    Provider,
    Id,
    Xml,
}

impl FormatCategory {
    pub fn raw(self) -> u32 {
        match self {
            FormatCategory::Event => 1,
            FormatCategory::Level => 2,
            FormatCategory::Task => 3,
            FormatCategory::Opcode => 4,
            FormatCategory::Keyword => 5,
            FormatCategory::Channel => 6,
            FormatCategory::Provider => 7,
            FormatCategory::Id => 8,
            FormatCategory::Xml => 9,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_tags_keep_native_numbering() {
        assert_eq!(VariantType::from_raw(1), VariantType::String);
        assert_eq!(VariantType::from_raw(17), VariantType::FileTime);
        assert_eq!(VariantType::from_raw(35), VariantType::EvtXml);
        assert_eq!(VariantType::from_raw(99), VariantType::Other(99));
        assert_eq!(VariantType::HexInt64.raw(), 21);
    }

    #[test]
    fn array_slots_are_not_scalars() {
        let uint32_array = VariantType::from_raw(VariantType::ARRAY_FLAG | 8);
        assert_eq!(uint32_array, VariantType::Other(0x88));
        assert!(!uint32_array.is_unsigned());
        assert_eq!(uint32_array.raw(), 0x88);

        let string_array = VariantType::from_raw(VariantType::ARRAY_FLAG | 1);
        assert_ne!(string_array, VariantType::String);
        assert!(!VariantType::from_raw(VariantType::ARRAY_FLAG | 3).is_signed());
    }

    #[test]
    fn system_field_indices() {
        assert_eq!(SystemField::ProviderName.index(), 0);
        assert_eq!(SystemField::TimeCreated.index(), 8);
        assert_eq!(SystemField::Computer.index(), 15);
        assert_eq!(SystemField::Version.index() + 1, SystemField::COUNT);
    }

    #[test]
    fn format_categories_start_at_one() {
        assert_eq!(FormatCategory::Event.raw(), 1);
        assert_eq!(FormatCategory::Id.raw(), 8);
    }
}
