use chrono::{NaiveDate, NaiveDateTime};

/// Timezone suffixes sources are known to append to timestamp literals.
pub const TIMEZONE_SUFFIXES: &[&str] = &["+09:00", "+00:00", "Z", "-00:00", "+01:00", "-01:00"];

const DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Length of a `YYYY-MM-DD HH:MM:SS` prefix.
const DATE_TIME_LEN: usize = 19;

const NANOS_DIGITS: usize = 9;

/// Strips a known timezone suffix and the `T` date/time separator from a timestamp literal.
pub fn normalize_timestamp_literal(value: &str) -> String {
    let trimmed = value.trim();
    let without_suffix = TIMEZONE_SUFFIXES
        .iter()
        .find_map(|suffix| trimmed.strip_suffix(suffix))
        .unwrap_or(trimmed);

    without_suffix.replacen('T', " ", 1).trim().to_owned()
}

/// Parses a timestamp literal in any of the encodings sources produce.
///
/// Accepts an ISO `T` separator, a known timezone suffix (discarded), an optional fraction, or a
/// bare date.
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let normalized = normalize_timestamp_literal(value);

    NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(&normalized, DATE_TIME_FORMAT))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(&normalized, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

/// Renders a timestamp as `YYYY-MM-DD HH:MM:SS[.fraction]`.
pub fn format_timestamp(value: &NaiveDateTime) -> String {
    value.format("%Y-%m-%d %H:%M:%S%.f").to_string()
}

/// Converts a normalized `YYYY-MM-DD HH:MM:SS[.fraction]` literal to nanoseconds since the epoch.
///
/// The naive value is read as UTC. The fraction is right-padded or truncated to nine digits.
/// Returns [`None`] when the literal does not start with a full date and time, or when the
/// result overflows.
pub fn timestamp_literal_to_epoch_nanos(literal: &str) -> Option<i64> {
    let date_time = literal.get(..DATE_TIME_LEN)?;
    let seconds = NaiveDateTime::parse_from_str(date_time, DATE_TIME_FORMAT)
        .ok()?
        .and_utc()
        .timestamp();

    let rest = &literal[DATE_TIME_LEN..];
    let fraction: String = rest
        .strip_prefix('.')
        .unwrap_or("")
        .chars()
        .take_while(char::is_ascii_digit)
        .take(NANOS_DIGITS)
        .collect();
    let nanos: i64 = format!("{fraction:0<width$}", width = NANOS_DIGITS).parse().ok()?;

    seconds.checked_mul(1_000_000_000)?.checked_add(nanos)
}
