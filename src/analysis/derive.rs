use chrono::{DateTime, Utc};

use crate::analysis::activity::{activity_level, days_since, parse_optional_timestamp};
use crate::analysis::health::{health_score, scoring_inputs};
use crate::analysis::popularity::{ecosystem_label, popularity_tier};
use crate::models::server::CanonicalRecord;

/// Fills the derived columns of every record. Each record is scored on its own.
pub fn apply_derived_metrics(records: &mut [CanonicalRecord], now: DateTime<Utc>) {
    for record in records.iter_mut() {
        let inputs = scoring_inputs(record);

        record.health_score = health_score(&inputs, now);
        record.activity_level = activity_level(inputs.pushed_at, now);
        record.popularity_tier = popularity_tier(&inputs);
        record.ecosystem_label = ecosystem_label(
            record.npm_package.as_deref(),
            record.pypi_package.as_deref(),
            record.repo_language.as_deref(),
        );
        record.days_since_creation = parse_optional_timestamp(record.repo_created_at.as_deref())
            .map(|created| days_since(created, now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::server::{ActivityLevel, PopularityTier, NODE_ECOSYSTEM_LABEL};
    use crate::models::source_record::SourceKind;
    use chrono::{NaiveDate, TimeZone};

    #[test]
    fn fills_every_derived_column() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let mut record = CanonicalRecord::new(
            "acme_x".to_string(),
            SourceKind::Curated,
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
        );
        record.npm_package = Some("@acme/x".to_string());
        record.repo_stars = Some(120);
        record.repo_pushed_at = Some("2026-02-27T00:00:00Z".to_string());
        record.repo_created_at = Some("2026-02-19T00:00:00Z".to_string());
        record.total_downloads_week = 40;

        let mut records = vec![record];
        apply_derived_metrics(&mut records, now);
        let r = &records[0];

        assert_eq!(r.activity_level, ActivityLevel::Active);
        assert_eq!(r.popularity_tier, PopularityTier::Popular);
        assert_eq!(r.ecosystem_label, NODE_ECOSYSTEM_LABEL);
        assert_eq!(r.days_since_creation, Some(10));
        // 30 activity (simplified), 15 stars + 5 downloads
        assert_eq!(r.health_score, 50);
    }

    #[test]
    fn unparseable_push_date_degrades_to_unknown() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let mut record = CanonicalRecord::new(
            "a".to_string(),
            SourceKind::Registry,
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
        );
        record.repo_pushed_at = Some("not-a-date".to_string());

        let mut records = vec![record];
        apply_derived_metrics(&mut records, now);
        assert_eq!(records[0].activity_level, ActivityLevel::Unknown);
        assert_eq!(records[0].health_score, 0);
    }
}
