//! Trusted timestamp formatting.

use chrono::{DateTime, SecondsFormat, Utc};

/// Formats a timestamp as RFC 3339 UTC with millisecond precision.
///
/// Timestamps in this format sort lexicographically in time order.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses an RFC 3339 timestamp into UTC.
///
/// # Errors
///
/// Returns the chrono parse error for malformed input.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|at| at.with_timezone(&Utc))
}
