use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::errors::{PipelineError, PipelineResult};
use crate::models::server::ActivityLevel;

/// Parses a code-host timestamp.
///
/// Accepts RFC 3339 (`2026-01-10T08:00:00Z`), a naive `YYYY-MM-DD HH:MM:SS`
/// taken as UTC, and a bare `YYYY-MM-DD` taken as midnight UTC.
pub fn parse_timestamp(value: &str) -> PipelineResult<DateTime<Utc>> {
    let trimmed = value.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S") {
        return Ok(naive.and_utc());
    }
    if let Some(naive) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Ok(naive.and_utc());
    }

    Err(PipelineError::UnparseableTimestamp {
        value: value.to_string(),
    })
}

/// Parses an optional timestamp, logging and discarding values that fail.
pub fn parse_optional_timestamp(value: Option<&str>) -> Option<DateTime<Utc>> {
    let value = value?;
    match parse_timestamp(value) {
        Ok(dt) => Some(dt),
        Err(err) => {
            log::debug!("{err}; treating as missing");
            None
        }
    }
}

/// Whole days elapsed between `then` and `now`.
pub fn days_since(then: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    now.signed_duration_since(then).num_days()
}

/// Recency class of the last push: ≤7 days Active, ≤30 Recent, ≤90 Moderate, else Stale.
pub fn activity_level(pushed_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> ActivityLevel {
    let Some(pushed_at) = pushed_at else {
        return ActivityLevel::Unknown;
    };

    match days_since(pushed_at, now) {
        d if d <= 7 => ActivityLevel::Active,
        d if d <= 30 => ActivityLevel::Recent,
        d if d <= 90 => ActivityLevel::Moderate,
        _ => ActivityLevel::Stale,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn parses_supported_formats() {
        assert!(parse_timestamp("2026-01-10T08:00:00Z").is_ok());
        assert!(parse_timestamp("2026-01-10T08:00:00+02:00").is_ok());
        assert!(parse_timestamp("2026-01-10 08:00:00").is_ok());
        assert_eq!(
            parse_timestamp("2026-01-10").unwrap(),
            Utc.with_ymd_and_hms(2026, 1, 10, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn malformed_timestamp_is_an_explicit_error() {
        let err = parse_timestamp("last tuesday").unwrap_err();
        assert!(matches!(err, PipelineError::UnparseableTimestamp { .. }));
        assert_eq!(parse_optional_timestamp(Some("last tuesday")), None);
        assert_eq!(parse_optional_timestamp(None), None);
    }

    #[test]
    fn seven_days_is_active_eight_is_recent() {
        assert_eq!(activity_level(Some(now() - Duration::days(7)), now()), ActivityLevel::Active);
        assert_eq!(activity_level(Some(now() - Duration::days(8)), now()), ActivityLevel::Recent);
    }

    #[test]
    fn buckets_cover_every_range() {
        assert_eq!(activity_level(Some(now() - Duration::days(30)), now()), ActivityLevel::Recent);
        assert_eq!(activity_level(Some(now() - Duration::days(31)), now()), ActivityLevel::Moderate);
        assert_eq!(activity_level(Some(now() - Duration::days(90)), now()), ActivityLevel::Moderate);
        assert_eq!(activity_level(Some(now() - Duration::days(91)), now()), ActivityLevel::Stale);
        assert_eq!(activity_level(Some(now() + Duration::days(2)), now()), ActivityLevel::Active);
        assert_eq!(activity_level(None, now()), ActivityLevel::Unknown);
    }
}
