use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{Result, TelemorphError};

pub fn parse_time_or_relative(input: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(input) {
        return Ok(ts.with_timezone(&Utc));
    }

    if let Ok(duration) = humantime::parse_duration(input) {
        return Ok(Utc::now() - to_chrono(duration)?);
    }

    Err(TelemorphError::InvalidArgument(format!(
        "expected RFC3339 time or duration, got {input}"
    )))
}

pub fn to_chrono(duration: Duration) -> Result<chrono::Duration> {
    chrono::Duration::from_std(duration)
        .map_err(|e| TelemorphError::InvalidArgument(format!("duration out of range: {e}")))
}

/// Converts wire nanoseconds; values past the representable range are a decode error.
pub fn from_wire_nanos(nanos: u64) -> Result<DateTime<Utc>> {
    let signed = i64::try_from(nanos)
        .map_err(|_| TelemorphError::Decode(format!("timestamp out of range: {nanos}")))?;
    Ok(DateTime::from_timestamp_nanos(signed))
}

pub fn to_unix_nanos(ts: &DateTime<Utc>) -> Result<i64> {
    ts.timestamp_nanos_opt().ok_or_else(|| {
        TelemorphError::InvalidArgument(format!("timestamp not representable in nanoseconds: {ts}"))
    })
}

pub fn from_unix_nanos(nanos: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(nanos)
}

/// Fractional unix seconds with millisecond precision.
pub fn unix_seconds(ts: &DateTime<Utc>) -> f64 {
    ts.timestamp_millis() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn parses_rfc3339() {
        let ts = parse_time_or_relative("2026-01-01T00:00:00Z").unwrap();
        assert_eq!(ts.to_rfc3339(), "2026-01-01T00:00:00+00:00");
    }

    #[test]
    fn parses_duration() {
        let now = Utc::now();
        let ts = parse_time_or_relative("5m").unwrap();
        assert!(ts < now);
    }

    #[test]
    fn rejects_invalid() {
        assert!(parse_time_or_relative("nope").is_err());
    }

    #[test]
    fn wire_nanos_keep_precision() {
        let ts = from_wire_nanos(1_700_000_000_123_456_789).unwrap();
        assert_eq!(to_unix_nanos(&ts).unwrap(), 1_700_000_000_123_456_789);
        assert_eq!(from_unix_nanos(1_700_000_000_123_456_789), ts);
    }

    #[test]
    fn wire_nanos_out_of_range() {
        assert!(from_wire_nanos(u64::MAX).is_err());
    }

    #[test]
    fn unix_seconds_are_fractional() {
        let ts = Utc.timestamp_opt(10, 500_000_000).unwrap();
        assert_eq!(unix_seconds(&ts), 10.5);
    }
}
