//! Shared utility functions used across multiple modules.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};

/// Normalize optional text by trimming whitespace and removing empties.
///
/// Returns `None` when the input is `None` or the trimmed value is empty.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Check if a string starts with `http://` or `https://`.
pub fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Truncate text to at most 180 characters for error messages.
pub fn compact_text(value: &str) -> String {
    value.trim().chars().take(180).collect()
}

/// Convert a timestamp to the integer column format used by the local store.
pub fn to_micros(timestamp: DateTime<Utc>) -> i64 {
    timestamp.timestamp_micros()
}

/// Inverse of [`to_micros`]; out-of-range values clamp to the Unix epoch.
pub fn from_micros(micros: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(micros).unwrap_or_default()
}

/// ISO-8601 rendering used on the wire and in the settings table.
pub fn to_iso8601(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Parse an ISO-8601 / RFC 3339 timestamp into UTC, truncated to microseconds.
pub fn parse_iso8601(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|timestamp| timestamp.with_timezone(&Utc).trunc_subsecs(6))
}
