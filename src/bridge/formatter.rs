// src/bridge/formatter.rs

//! Localized text for an event, resolved through its publisher.

use crate::evt::{EventHandle, EvtApi, FormatCategory, PublisherHandle};

/// One `EvtFormatMessage` call. Missing text is `None`, never an error:
/// third-party providers often ship without message tables.
pub fn format_message(
    api: &dyn EvtApi,
    publisher: PublisherHandle,
    event: EventHandle,
    category: FormatCategory,
) -> Option<String> {
    let text = api.format_message(publisher, event, category);
    if text.is_none() {
        log::trace!("no {:?} text for event {:?}", category, event);
    }
    text
}

/// Every text the assembler attaches to an `Event`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FormattedTexts {
    pub msg: String,
    pub level: String,
    pub task: String,
    pub opcode: String,
    pub channel: String,
    pub provider: String,
    pub id: String,
}

impl FormattedTexts {
    /// Format each category independently; a failure only blanks its own field.
    pub fn collect(api: &dyn EvtApi, publisher: PublisherHandle, event: EventHandle) -> Self {
        let text = |category| format_message(api, publisher, event, category).unwrap_or_default();
        Self {
            msg: text(FormatCategory::Event),
            level: text(FormatCategory::Level),
            task: text(FormatCategory::Task),
            opcode: text(FormatCategory::Opcode),
            channel: text(FormatCategory::Channel),
            provider: text(FormatCategory::Provider),
            id: text(FormatCategory::Id),
        }
    }
}
