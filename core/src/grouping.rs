use time::{format_description::FormatItem, macros::format_description, OffsetDateTime, UtcOffset};

use inbox_api::Message;

const SHORT_DATE: &[FormatItem<'static>] =
    format_description!("[month repr:short] [day padding:none], [year]");
const CLOCK: &[FormatItem<'static>] = format_description!("[hour]:[minute]");

/// One row of the rendered conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayEntry<'a> {
    DateSeparator(String),
    Message(&'a Message),
}

/// Interleave day separators into an oldest-first message list.
///
/// A separator is emitted before every message whose day label differs from
/// the previous message's. Labels are relative to `now`, so the same input can
/// group differently once the day rolls over.
pub fn group_by_day(messages: &[Message], now: OffsetDateTime) -> Vec<DisplayEntry<'_>> {
    let mut entries = Vec::with_capacity(messages.len() + 1);
    let mut last_label: Option<String> = None;
    for msg in messages {
        let label = day_label(msg.created_at, now);
        if last_label.as_deref() != Some(label.as_str()) {
            entries.push(DisplayEntry::DateSeparator(label.clone()));
            last_label = Some(label);
        }
        entries.push(DisplayEntry::Message(msg));
    }
    entries
}

/// `Today`, `Yesterday` or a short date such as `Mar 5, 2024`, evaluated in
/// the UTC offset of `now`.
pub fn day_label(ts: OffsetDateTime, now: OffsetDateTime) -> String {
    let day = ts.to_offset(now.offset()).date();
    let today = now.date();
    if day == today {
        "Today".into()
    } else if today.previous_day() == Some(day) {
        "Yesterday".into()
    } else {
        day.format(SHORT_DATE).unwrap_or_else(|_| day.to_string())
    }
}

/// Wall clock time of a message bubble, e.g. `09:05`.
pub fn format_time(ts: OffsetDateTime, offset: UtcOffset) -> String {
    let local = ts.to_offset(offset);
    local
        .format(CLOCK)
        .unwrap_or_else(|_| format!("{:02}:{:02}", local.hour(), local.minute()))
}
