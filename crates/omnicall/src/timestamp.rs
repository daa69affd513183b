//! Time parsing and rendering for option values and resource expiries.

use time::format_description::well_known::{Iso8601, Rfc3339};
use time::{Duration, OffsetDateTime, PrimitiveDateTime, UtcOffset};

/// Parses an instant, assuming UTC when no offset is given.
///
/// Accepts RFC 3339 text and ISO 8601 date-times written with either `T` or a
/// space between the date and time.
pub fn parse_instant(input: &str) -> Result<OffsetDateTime, String> {
    let trimmed = input.trim();
    if let Ok(parsed) = OffsetDateTime::parse(trimmed, &Rfc3339) {
        return Ok(parsed);
    }
    let normalised = trimmed.replacen(' ', "T", 1);
    if let Ok(parsed) = OffsetDateTime::parse(&normalised, &Iso8601::DEFAULT) {
        return Ok(parsed);
    }
    PrimitiveDateTime::parse(&normalised, &Iso8601::DEFAULT)
        .map(PrimitiveDateTime::assume_utc)
        .map_err(|error| error.to_string())
}

/// Renders an instant as RFC 3339 UTC without fractional seconds.
pub fn format_instant(instant: OffsetDateTime) -> Result<String, String> {
    let utc = instant.to_offset(UtcOffset::UTC);
    let whole = utc - Duration::nanoseconds(i64::from(utc.nanosecond()));
    whole.format(&Rfc3339).map_err(|error| error.to_string())
}

/// Parses and re-renders a caller-supplied time.
pub(crate) fn normalise_time(input: &str) -> Result<String, String> {
    parse_instant(input).and_then(format_instant)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("2026-03-01T12:30:45Z", "2026-03-01T12:30:45Z")]
    #[case("2026-03-01T12:30:45.987654Z", "2026-03-01T12:30:45Z")]
    #[case("2026-03-01T14:30:45+02:00", "2026-03-01T12:30:45Z")]
    #[case("2026-03-01T12:30:45", "2026-03-01T12:30:45Z")]
    #[case("2026-03-01 12:30:45", "2026-03-01T12:30:45Z")]
    fn normalises_to_utc_whole_seconds(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalise_time(input).as_deref(), Ok(expected));
    }

    #[rstest]
    #[case("tomorrow")]
    #[case("")]
    fn rejects_unparseable_times(#[case] input: &str) {
        assert!(normalise_time(input).is_err());
    }
}
