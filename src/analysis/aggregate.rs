use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};

use crate::models::metrics::DownloadMap;
use crate::models::server::CanonicalRecord;
use crate::models::snapshot::{EcosystemSnapshot, ServerSummary};
use crate::models::source_record::SourceKind;

pub const DEFAULT_TOP_CATEGORIES: usize = 15;
pub const DEFAULT_TOP_SERVERS: usize = 10;

#[derive(Debug, Clone)]
pub struct AggregateOptions {
    pub snapshot_date: NaiveDate,
    pub top_categories: usize,
    pub top_servers: usize,
    /// Official SDK packages, reported separately from server downloads.
    pub sdk_npm_package: Option<String>,
    pub sdk_pypi_package: Option<String>,
}

impl AggregateOptions {
    pub fn new(snapshot_date: NaiveDate) -> Self {
        Self {
            snapshot_date,
            top_categories: DEFAULT_TOP_CATEGORIES,
            top_servers: DEFAULT_TOP_SERVERS,
            sdk_npm_package: None,
            sdk_pypi_package: None,
        }
    }
}

/// Reduces the scored canonical table to ecosystem-wide counts, sums and distributions.
pub fn aggregate(
    records: &[CanonicalRecord],
    npm_downloads: &DownloadMap,
    pypi_downloads: &DownloadMap,
    opts: &AggregateOptions,
) -> EcosystemSnapshot {
    let total_servers = records.len();

    let activity_distribution = count_by(records.iter().map(|r| r.activity_level.to_string()));
    let popularity_distribution = count_by(records.iter().map(|r| r.popularity_tier.to_string()));
    let ecosystem_distribution = count_by(records.iter().map(|r| r.ecosystem_label.clone()));

    let mut servers_by_source: BTreeMap<String, usize> = SourceKind::ALL
        .iter()
        .map(|kind| (kind.to_string(), 0))
        .collect();
    for record in records {
        for kind in &record.sources {
            *servers_by_source.entry(kind.to_string()).or_insert(0) += 1;
        }
    }

    let active_servers = ["Active", "Recent"]
        .iter()
        .filter_map(|level| activity_distribution.get(*level))
        .sum::<usize>();

    let mut stars: Vec<u64> = records.iter().map(|r| r.repo_stars.unwrap_or(0)).collect();
    stars.sort_unstable();
    let total_stars = saturating_sum(stars.iter().copied());

    let total_npm_downloads_week = saturating_sum(records.iter().map(|r| r.npm_downloads_week.unwrap_or(0)));
    let total_pypi_downloads_week = saturating_sum(records.iter().map(|r| r.pypi_downloads_week.unwrap_or(0)));

    let sdk_downloads = |map: &DownloadMap, package: &Option<String>| {
        package
            .as_ref()
            .and_then(|p| map.get(p))
            .copied()
            .unwrap_or(0)
    };

    EcosystemSnapshot {
        snapshot_date: opts.snapshot_date,
        total_servers,
        servers_with_npm_package: records.iter().filter(|r| r.npm_package.is_some()).count(),
        servers_with_pypi_package: records.iter().filter(|r| r.pypi_package.is_some()).count(),
        servers_with_repo_metrics: records.iter().filter(|r| r.has_repo_metrics).count(),
        servers_by_source,
        active_servers,
        active_percentage: percentage(active_servers, total_servers),
        total_stars,
        avg_stars: if total_servers == 0 {
            0.0
        } else {
            round1(total_stars as f64 / total_servers as f64)
        },
        median_stars: median(&stars),
        total_npm_downloads_week,
        total_pypi_downloads_week,
        total_downloads_week: total_npm_downloads_week.saturating_add(total_pypi_downloads_week),
        sdk_npm_downloads_week: sdk_downloads(npm_downloads, &opts.sdk_npm_package),
        sdk_pypi_downloads_week: sdk_downloads(pypi_downloads, &opts.sdk_pypi_package),
        activity_distribution,
        popularity_distribution,
        ecosystem_distribution,
        top_categories: top_categories(records, opts.top_categories),
        top_servers: top_servers(records, opts.top_servers),
    }
}

fn saturating_sum<I>(values: I) -> u64
where
    I: Iterator<Item = u64>,
{
    values.fold(0, u64::saturating_add)
}

fn count_by<I>(values: I) -> BTreeMap<String, usize>
where
    I: Iterator<Item = String>,
{
    let mut counts = BTreeMap::new();
    for value in values {
        *counts.entry(value).or_insert(0) += 1;
    }
    counts
}

/// (part / total) × 100 to one decimal; zero when the table is empty.
fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round1(part as f64 / total as f64 * 100.0)
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn median(sorted: &[u64]) -> u64 {
    match sorted.len() {
        0 => 0,
        n if n % 2 == 1 => sorted[n / 2],
        n => {
            let (a, b) = (sorted[n / 2 - 1], sorted[n / 2]);
            a / 2 + b / 2 + (a % 2 + b % 2) / 2
        }
    }
}

/// Categories are split on commas and trimmed before counting.
fn top_categories(records: &[CanonicalRecord], limit: usize) -> Vec<(String, usize)> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for category in records
        .iter()
        .flat_map(|r| r.categories.iter())
        .flat_map(|c| c.split(','))
        .map(str::trim)
        .filter(|c| !c.is_empty())
    {
        *counts.entry(category.to_string()).or_insert(0) += 1;
    }

    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(limit);
    ranked
}

fn top_servers(records: &[CanonicalRecord], limit: usize) -> Vec<ServerSummary> {
    let mut ranked: Vec<&CanonicalRecord> = records.iter().collect();
    ranked.sort_by(|a, b| {
        b.health_score
            .cmp(&a.health_score)
            .then_with(|| b.repo_stars.unwrap_or(0).cmp(&a.repo_stars.unwrap_or(0)))
            .then_with(|| a.server_id.cmp(&b.server_id))
    });

    ranked
        .into_iter()
        .take(limit)
        .map(|r| ServerSummary {
            server_id: r.server_id.clone(),
            name: r.display_name().to_string(),
            health_score: r.health_score,
            activity_level: r.activity_level.to_string(),
            popularity_tier: r.popularity_tier.to_string(),
            repo_stars: r.repo_stars.unwrap_or(0),
            total_downloads_week: r.total_downloads_week,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::server::ActivityLevel;
    use proptest::prelude::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
    }

    fn server(id: &str, level: ActivityLevel) -> CanonicalRecord {
        let mut r = CanonicalRecord::new(id.to_string(), SourceKind::Registry, date());
        r.activity_level = level;
        r
    }

    #[test]
    fn empty_table_yields_zeroes() {
        let snap = aggregate(&[], &DownloadMap::new(), &DownloadMap::new(), &AggregateOptions::new(date()));
        assert_eq!(snap.total_servers, 0);
        assert_eq!(snap.active_percentage, 0.0);
        assert_eq!(snap.avg_stars, 0.0);
        assert_eq!(snap.median_stars, 0);
        assert!(snap.top_categories.is_empty());
    }

    #[test]
    fn active_percentage_counts_active_and_recent() {
        let records = vec![
            server("a", ActivityLevel::Active),
            server("b", ActivityLevel::Recent),
            server("c", ActivityLevel::Stale),
        ];
        let snap = aggregate(&records, &DownloadMap::new(), &DownloadMap::new(), &AggregateOptions::new(date()));
        assert_eq!(snap.active_servers, 2);
        assert_eq!(snap.active_percentage, 66.7);
        assert_eq!(snap.activity_distribution.get("Stale"), Some(&1));
    }

    #[test]
    fn download_sums_treat_null_as_zero() {
        let mut a = server("a", ActivityLevel::Unknown);
        a.npm_package = Some("@x/a".to_string());
        a.npm_downloads_week = Some(120);
        a.total_downloads_week = 120;
        let mut b = server("b", ActivityLevel::Unknown);
        b.pypi_package = Some("b".to_string());
        b.pypi_downloads_week = Some(30);
        b.total_downloads_week = 30;

        let mut opts = AggregateOptions::new(date());
        opts.sdk_npm_package = Some("@modelcontextprotocol/sdk".to_string());
        let npm = DownloadMap::from([("@modelcontextprotocol/sdk".to_string(), 5_000)]);

        let snap = aggregate(&[a, b], &npm, &DownloadMap::new(), &opts);
        assert_eq!(snap.total_npm_downloads_week, 120);
        assert_eq!(snap.total_pypi_downloads_week, 30);
        assert_eq!(snap.total_downloads_week, 150);
        assert_eq!(snap.sdk_npm_downloads_week, 5_000);
        assert_eq!(snap.sdk_pypi_downloads_week, 0);
        assert_eq!(snap.servers_with_npm_package, 1);
        assert_eq!(snap.servers_with_pypi_package, 1);
    }

    #[test]
    fn categories_are_split_trimmed_and_ranked() {
        let mut a = server("a", ActivityLevel::Unknown);
        a.categories = vec!["database, sql".to_string(), " ".to_string()];
        let mut b = server("b", ActivityLevel::Unknown);
        b.categories = vec!["database".to_string(), "search".to_string()];

        let mut opts = AggregateOptions::new(date());
        opts.top_categories = 2;
        let snap = aggregate(&[a, b], &DownloadMap::new(), &DownloadMap::new(), &opts);
        assert_eq!(
            snap.top_categories,
            vec![("database".to_string(), 2), ("search".to_string(), 1)]
        );
    }

    #[test]
    fn star_statistics() {
        let mut records = Vec::new();
        for (i, stars) in [Some(10), None, Some(30), Some(5)].into_iter().enumerate() {
            let mut r = server(&format!("s{i}"), ActivityLevel::Unknown);
            r.repo_stars = stars;
            records.push(r);
        }
        let snap = aggregate(&records, &DownloadMap::new(), &DownloadMap::new(), &AggregateOptions::new(date()));
        assert_eq!(snap.total_stars, 45);
        assert_eq!(snap.avg_stars, 11.3);
        assert_eq!(snap.median_stars, 7);
        assert_eq!(snap.top_servers[0].server_id, "s2");
    }

    #[test]
    fn extreme_counts_saturate_instead_of_wrapping() {
        let mut a = server("a", ActivityLevel::Unknown);
        a.repo_stars = Some(u64::MAX);
        a.npm_downloads_week = Some(u64::MAX);
        let mut b = server("b", ActivityLevel::Unknown);
        b.repo_stars = Some(u64::MAX - 1);
        b.pypi_downloads_week = Some(7);

        let snap = aggregate(&[a, b], &DownloadMap::new(), &DownloadMap::new(), &AggregateOptions::new(date()));
        assert_eq!(snap.total_stars, u64::MAX);
        assert_eq!(snap.total_npm_downloads_week, u64::MAX);
        assert_eq!(snap.total_downloads_week, u64::MAX);
        assert_eq!(snap.median_stars, u64::MAX - 1);
    }

    proptest! {
        #[test]
        fn activity_distribution_sums_to_total(levels in proptest::collection::vec(0u8..5, 0..40)) {
            let records: Vec<CanonicalRecord> = levels
                .iter()
                .enumerate()
                .map(|(i, l)| {
                    let level = match l {
                        0 => ActivityLevel::Active,
                        1 => ActivityLevel::Recent,
                        2 => ActivityLevel::Moderate,
                        3 => ActivityLevel::Stale,
                        _ => ActivityLevel::Unknown,
                    };
                    server(&format!("s{i}"), level)
                })
                .collect();
            let snap = aggregate(&records, &DownloadMap::new(), &DownloadMap::new(), &AggregateOptions::new(date()));
            prop_assert_eq!(snap.activity_distribution.values().sum::<usize>(), snap.total_servers);
            prop_assert_eq!(snap.total_servers, records.len());
            prop_assert_eq!(snap.popularity_distribution.values().sum::<usize>(), records.len());
        }
    }
}
