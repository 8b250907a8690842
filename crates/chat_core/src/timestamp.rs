//! crates/chat_core/src/timestamp.rs
//!
//! Text timestamps as they appear in stored user records.
//!
//! Records written by earlier deployments use a plain wall-clock format, so
//! everything the core writes uses the same format. All values are UTC.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

/// The storage format for every timestamp on a user record.
pub const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Formats an instant for storage.
pub fn format(at: DateTime<Utc>) -> String {
    at.format(FORMAT).to_string()
}

/// Parses a stored timestamp. Accepts the storage format and RFC 3339.
///
/// Returns `None` for anything unparseable; callers decide how to repair.
pub fn parse(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, FORMAT) {
        return Some(Utc.from_utc_datetime(&naive));
    }
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|at| at.with_timezone(&Utc))
}
