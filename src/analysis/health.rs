use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analysis::activity::{days_since, parse_optional_timestamp};
use crate::models::metrics::ScoringInputs;
use crate::models::server::CanonicalRecord;

const ACTIVITY_CAP: f64 = 30.0;
const POPULARITY_CAP: f64 = 40.0;
const COMMUNITY_CAP: f64 = 30.0;

/// Per-component contributions behind a health score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthBreakdown {
    pub activity: f64,
    pub popularity: f64,
    pub community: f64,
    pub total: u8,
}

/// Builds the metric view the calculators consume from a joined record.
pub fn scoring_inputs(record: &CanonicalRecord) -> ScoringInputs {
    ScoringInputs {
        stars: record.repo_stars,
        forks: record.repo_forks,
        open_issues: record.repo_open_issues,
        contributors: record.repo_contributors,
        commits_last_4_weeks: record.commits_last_4_weeks,
        pushed_at: parse_optional_timestamp(record.repo_pushed_at.as_deref()),
        downloads_week: record.total_downloads_week,
    }
}

/// Composite 0-100 health score. Missing inputs contribute nothing.
pub fn health_score(inputs: &ScoringInputs, now: DateTime<Utc>) -> u8 {
    health_breakdown(inputs, now).total
}

pub fn health_breakdown(inputs: &ScoringInputs, now: DateTime<Utc>) -> HealthBreakdown {
    let activity = activity_points(inputs, now).min(ACTIVITY_CAP);
    let popularity = popularity_points(inputs).min(POPULARITY_CAP);
    let community = community_points(inputs).min(COMMUNITY_CAP);

    let total = (activity + popularity + community).round().clamp(0.0, 100.0) as u8;
    HealthBreakdown {
        activity,
        popularity,
        community,
        total,
    }
}

/// Commit count (up to 15) plus push recency (15/10/5) when commit activity is
/// known; push recency alone (30/15) otherwise.
fn activity_points(inputs: &ScoringInputs, now: DateTime<Utc>) -> f64 {
    let days = inputs.pushed_at.map(|pushed| days_since(pushed, now));

    match inputs.commits_last_4_weeks {
        Some(commits) => {
            let commit_points = (commits as f64).min(15.0);
            let recency = match days {
                Some(d) if d <= 7 => 15.0,
                Some(d) if d <= 30 => 10.0,
                Some(d) if d <= 90 => 5.0,
                _ => 0.0,
            };
            commit_points + recency
        }
        None => match days {
            Some(d) if d <= 30 => 30.0,
            Some(d) if d <= 90 => 15.0,
            _ => 0.0,
        },
    }
}

fn popularity_points(inputs: &ScoringInputs) -> f64 {
    let stars = match inputs.stars.unwrap_or(0) {
        s if s >= 1000 => 20.0,
        s if s >= 100 => 15.0,
        s if s >= 10 => 10.0,
        s if s >= 1 => 5.0,
        _ => 0.0,
    };
    let downloads = match inputs.downloads_week {
        d if d >= 10_000 => 20.0,
        d if d >= 1_000 => 15.0,
        d if d >= 100 => 10.0,
        d if d >= 10 => 5.0,
        _ => 0.0,
    };
    stars + downloads
}

fn community_points(inputs: &ScoringInputs) -> f64 {
    let issues = inputs.open_issues.map_or(0.0, |i| (i as f64).min(10.0));
    let forks = inputs.forks.map_or(0.0, |f| (f as f64 / 5.0).min(10.0));
    // A sole contributor says nothing about community.
    let contributors = inputs
        .contributors
        .filter(|&c| c > 1)
        .map_or(0.0, |c| (c as f64).min(10.0));
    issues + forks + contributors
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn empty_inputs_score_zero() {
        assert_eq!(health_score(&ScoringInputs::default(), now()), 0);
    }

    #[test]
    fn full_variant_uses_commits_and_recency() {
        let inputs = ScoringInputs {
            commits_last_4_weeks: Some(40),
            pushed_at: Some(now() - Duration::days(3)),
            ..ScoringInputs::default()
        };
        let b = health_breakdown(&inputs, now());
        assert_eq!(b.activity, 30.0);

        let sparse = ScoringInputs {
            commits_last_4_weeks: Some(2),
            pushed_at: Some(now() - Duration::days(20)),
            ..ScoringInputs::default()
        };
        assert_eq!(health_breakdown(&sparse, now()).activity, 12.0);
    }

    #[test]
    fn simplified_variant_without_commit_data() {
        let recent = ScoringInputs {
            pushed_at: Some(now() - Duration::days(20)),
            ..ScoringInputs::default()
        };
        assert_eq!(health_breakdown(&recent, now()).activity, 30.0);

        let moderate = ScoringInputs {
            pushed_at: Some(now() - Duration::days(60)),
            ..ScoringInputs::default()
        };
        assert_eq!(health_breakdown(&moderate, now()).activity, 15.0);

        let stale = ScoringInputs {
            pushed_at: Some(now() - Duration::days(200)),
            ..ScoringInputs::default()
        };
        assert_eq!(health_breakdown(&stale, now()).activity, 0.0);
    }

    #[test]
    fn popularity_buckets_stars_and_downloads() {
        let inputs = ScoringInputs {
            stars: Some(150),
            downloads_week: 12_000,
            ..ScoringInputs::default()
        };
        assert_eq!(health_breakdown(&inputs, now()).popularity, 35.0);
    }

    #[test]
    fn community_caps_each_signal() {
        let inputs = ScoringInputs {
            open_issues: Some(500),
            forks: Some(12),
            contributors: Some(1),
            ..ScoringInputs::default()
        };
        let b = health_breakdown(&inputs, now());
        assert!((b.community - 12.4).abs() < 1e-9);
        assert_eq!(b.total, 12);
    }

    #[test]
    fn maxed_inputs_hit_the_ceiling() {
        let inputs = ScoringInputs {
            stars: Some(50_000),
            forks: Some(5_000),
            open_issues: Some(300),
            contributors: Some(80),
            commits_last_4_weeks: Some(200),
            pushed_at: Some(now()),
            downloads_week: 1_000_000,
        };
        assert_eq!(health_score(&inputs, now()), 100);
    }

    proptest! {
        #[test]
        fn score_is_always_bounded(
            stars in proptest::option::of(any::<u64>()),
            forks in proptest::option::of(any::<u64>()),
            issues in proptest::option::of(any::<u64>()),
            contributors in proptest::option::of(any::<u64>()),
            commits in proptest::option::of(any::<u64>()),
            pushed_days in proptest::option::of(-400i64..4000),
            downloads in any::<u64>(),
        ) {
            let inputs = ScoringInputs {
                stars,
                forks,
                open_issues: issues,
                contributors,
                commits_last_4_weeks: commits,
                pushed_at: pushed_days.map(|d| now() - Duration::days(d)),
                downloads_week: downloads,
            };
            let score = health_score(&inputs, now());
            prop_assert!(score <= 100);
        }
    }
}
