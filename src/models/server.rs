use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::metrics::RepoMetrics;
use super::source_record::SourceKind;

pub const NODE_ECOSYSTEM_LABEL: &str = "Node package ecosystem";
pub const PYTHON_ECOSYSTEM_LABEL: &str = "Python package ecosystem";
pub const UNKNOWN_LABEL: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ActivityLevel {
    Active,
    Recent,
    Moderate,
    Stale,
    Unknown,
}

impl ActivityLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            ActivityLevel::Active => "Active",
            ActivityLevel::Recent => "Recent",
            ActivityLevel::Moderate => "Moderate",
            ActivityLevel::Stale => "Stale",
            ActivityLevel::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ActivityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PopularityTier {
    TopTier,
    Popular,
    Growing,
    Emerging,
}

impl PopularityTier {
    pub fn as_str(self) -> &'static str {
        match self {
            PopularityTier::TopTier => "Top Tier",
            PopularityTier::Popular => "Popular",
            PopularityTier::Growing => "Growing",
            PopularityTier::Emerging => "Emerging",
        }
    }
}

impl fmt::Display for PopularityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One deduplicated server, the unit tracked through join, scoring and aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub server_id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub repository_url: Option<String>,
    pub npm_package: Option<String>,
    pub pypi_package: Option<String>,
    pub categories: Vec<String>,
    pub author: Option<String>,
    pub version: Option<String>,
    /// Highest-priority kind among the contributing records.
    pub source_kind: SourceKind,
    pub sources: BTreeSet<SourceKind>,
    pub discovered_date: NaiveDate,
    pub discovered_metrics: Option<RepoMetrics>,

    // Repository metrics (metric joiner)
    pub repo_stars: Option<u64>,
    pub repo_forks: Option<u64>,
    pub repo_open_issues: Option<u64>,
    pub repo_language: Option<String>,
    pub repo_pushed_at: Option<String>,
    pub repo_created_at: Option<String>,
    pub repo_license: Option<String>,
    pub repo_archived: Option<bool>,
    pub repo_contributors: Option<u64>,
    pub commits_last_4_weeks: Option<u64>,
    pub has_repo_metrics: bool,

    // Download metrics (metric joiner)
    pub npm_downloads_week: Option<u64>,
    pub pypi_downloads_week: Option<u64>,
    pub total_downloads_week: u64,

    // Derived metrics
    pub days_since_creation: Option<i64>,
    pub health_score: u8,
    pub activity_level: ActivityLevel,
    pub popularity_tier: PopularityTier,
    pub ecosystem_label: String,
}

impl CanonicalRecord {
    /// A record with identity fields only; metric and derived columns start empty.
    pub fn new(server_id: String, source_kind: SourceKind, discovered_date: NaiveDate) -> Self {
        Self {
            server_id,
            name: None,
            description: None,
            repository_url: None,
            npm_package: None,
            pypi_package: None,
            categories: Vec::new(),
            author: None,
            version: None,
            source_kind,
            sources: BTreeSet::from([source_kind]),
            discovered_date,
            discovered_metrics: None,
            repo_stars: None,
            repo_forks: None,
            repo_open_issues: None,
            repo_language: None,
            repo_pushed_at: None,
            repo_created_at: None,
            repo_license: None,
            repo_archived: None,
            repo_contributors: None,
            commits_last_4_weeks: None,
            has_repo_metrics: false,
            npm_downloads_week: None,
            pypi_downloads_week: None,
            total_downloads_week: 0,
            days_since_creation: None,
            health_score: 0,
            activity_level: ActivityLevel::Unknown,
            popularity_tier: PopularityTier::Emerging,
            ecosystem_label: UNKNOWN_LABEL.to_string(),
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.server_id)
    }
}
