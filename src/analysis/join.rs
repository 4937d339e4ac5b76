use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::metrics::{DownloadChannel, DownloadMap, RepoMetrics, RepoMetricsMap};
use crate::models::server::CanonicalRecord;

/// How to pick the owner when two servers claim the same package name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageCollisionPolicy {
    /// Earliest `discovered_date` wins, ties go to the smaller `server_id`.
    EarliestDiscovered,
    /// Later record in table order wins.
    LastSeen,
}

impl PackageCollisionPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "earliest_discovered" => Some(Self::EarliestDiscovered),
            "last_seen" => Some(Self::LastSeen),
            _ => None,
        }
    }
}

/// A package name claimed by more than one server, flagged for manual review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageCollision {
    pub channel: DownloadChannel,
    pub package: String,
    pub kept: String,
    pub displaced: String,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct JoinOutcome {
    pub repo_metrics_matched: usize,
    pub npm_matched: usize,
    pub pypi_matched: usize,
    pub collisions: Vec<PackageCollision>,
}

/// `package → server_id` for one channel, built from the canonical table.
pub fn build_package_map(
    records: &[CanonicalRecord],
    channel: DownloadChannel,
    policy: PackageCollisionPolicy,
) -> (HashMap<String, String>, Vec<PackageCollision>) {
    let mut owners: HashMap<String, &CanonicalRecord> = HashMap::new();
    let mut collisions = Vec::new();

    for record in records {
        let Some(package) = package_for(record, channel) else {
            continue;
        };
        let Some(existing) = owners.get(package).copied() else {
            owners.insert(package.to_string(), record);
            continue;
        };

        let challenger_wins = match policy {
            PackageCollisionPolicy::LastSeen => true,
            PackageCollisionPolicy::EarliestDiscovered => {
                (record.discovered_date, record.server_id.as_str())
                    < (existing.discovered_date, existing.server_id.as_str())
            }
        };
        let (kept, displaced) = if challenger_wins {
            owners.insert(package.to_string(), record);
            (record, existing)
        } else {
            (existing, record)
        };

        log::warn!(
            "{channel} package '{package}' claimed by '{}' and '{}'; keeping '{}' (review needed)",
            existing.server_id,
            record.server_id,
            kept.server_id
        );
        collisions.push(PackageCollision {
            channel,
            package: package.to_string(),
            kept: kept.server_id.clone(),
            displaced: displaced.server_id.clone(),
        });
    }

    let map = owners
        .into_iter()
        .map(|(package, record)| (package, record.server_id.clone()))
        .collect();
    (map, collisions)
}

fn package_for(record: &CanonicalRecord, channel: DownloadChannel) -> Option<&str> {
    match channel {
        DownloadChannel::Npm => record.npm_package.as_deref(),
        DownloadChannel::Pypi => record.pypi_package.as_deref(),
    }
}

/// Left-joins repo metrics and weekly downloads onto the canonical table.
///
/// Every record is kept. Fetched repo metrics take precedence field by field
/// over metrics discovered alongside a search hit. A record whose package name
/// is missing from a download map keeps a null count for that channel.
pub fn join_metrics(
    records: &mut [CanonicalRecord],
    repo_metrics: &RepoMetricsMap,
    npm_downloads: &DownloadMap,
    pypi_downloads: &DownloadMap,
    policy: PackageCollisionPolicy,
) -> JoinOutcome {
    let mut outcome = JoinOutcome::default();

    let (npm_map, npm_collisions) = build_package_map(records, DownloadChannel::Npm, policy);
    let (pypi_map, pypi_collisions) = build_package_map(records, DownloadChannel::Pypi, policy);
    outcome.collisions.extend(npm_collisions);
    outcome.collisions.extend(pypi_collisions);

    for record in records.iter_mut() {
        let fetched = repo_metrics.get(&record.server_id);
        if fetched.is_some() {
            outcome.repo_metrics_matched += 1;
        }
        apply_repo_metrics(record, fetched);

        record.npm_downloads_week = owned_downloads(record, DownloadChannel::Npm, &npm_map, npm_downloads);
        record.pypi_downloads_week = owned_downloads(record, DownloadChannel::Pypi, &pypi_map, pypi_downloads);
        if record.npm_downloads_week.is_some() {
            outcome.npm_matched += 1;
        }
        if record.pypi_downloads_week.is_some() {
            outcome.pypi_matched += 1;
        }

        record.total_downloads_week = record
            .npm_downloads_week
            .unwrap_or(0)
            .saturating_add(record.pypi_downloads_week.unwrap_or(0));
    }

    log::info!(
        "Joined metrics: {} repo, {} npm, {} pypi matches, {} package collisions",
        outcome.repo_metrics_matched,
        outcome.npm_matched,
        outcome.pypi_matched,
        outcome.collisions.len()
    );
    outcome
}

fn owned_downloads(
    record: &CanonicalRecord,
    channel: DownloadChannel,
    owners: &HashMap<String, String>,
    downloads: &DownloadMap,
) -> Option<u64> {
    let package = package_for(record, channel)?;
    if owners.get(package) != Some(&record.server_id) {
        return None;
    }
    downloads.get(package).copied()
}

fn apply_repo_metrics(record: &mut CanonicalRecord, fetched: Option<&RepoMetrics>) {
    let discovered = record.discovered_metrics.clone();
    let sources: Vec<&RepoMetrics> = fetched.into_iter().chain(discovered.as_ref()).collect();
    if sources.is_empty() {
        record.has_repo_metrics = false;
        return;
    }

    let num = |f: fn(&RepoMetrics) -> Option<u64>| sources.iter().find_map(|m| f(m));
    let txt = |f: fn(&RepoMetrics) -> Option<&String>| sources.iter().find_map(|m| f(m).cloned());

    record.repo_stars = num(|m| m.stars);
    record.repo_forks = num(|m| m.forks);
    record.repo_open_issues = num(|m| m.open_issues);
    record.repo_contributors = num(|m| m.contributors);
    record.commits_last_4_weeks = num(|m| m.commits_last_4_weeks);
    record.repo_language = txt(|m| m.language.as_ref());
    record.repo_pushed_at = txt(|m| m.pushed_at.as_ref());
    record.repo_created_at = txt(|m| m.created_at.as_ref());
    record.repo_license = txt(|m| m.license.as_ref());
    record.repo_archived = sources.iter().find_map(|m| m.archived);
    record.has_repo_metrics = true;
}
