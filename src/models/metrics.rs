use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Repository stats for one server as reported by the code host.
///
/// Timestamps stay as the raw strings the host returned; parsing happens at
/// scoring time so that a malformed value degrades to "absent" there.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepoMetrics {
    #[serde(default, alias = "stargazers_count")]
    pub stars: Option<u64>,
    #[serde(default, alias = "forks_count")]
    pub forks: Option<u64>,
    #[serde(default, alias = "open_issues_count")]
    pub open_issues: Option<u64>,
    #[serde(default, alias = "watchers_count")]
    pub watchers: Option<u64>,
    pub language: Option<String>,
    pub license: Option<String>,
    pub archived: Option<bool>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub pushed_at: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    pub commits_last_week: Option<u64>,
    pub commits_last_4_weeks: Option<u64>,
    pub contributors: Option<u64>,
}

/// `server_id → RepoMetrics`, as produced by the repo metrics collaborator.
pub type RepoMetricsMap = HashMap<String, RepoMetrics>;

/// `package_name → weekly downloads` for a single distribution channel.
pub type DownloadMap = HashMap<String, u64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadChannel {
    Npm,
    Pypi,
}

impl fmt::Display for DownloadChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadChannel::Npm => f.write_str("npm"),
            DownloadChannel::Pypi => f.write_str("pypi"),
        }
    }
}

/// Metric view consumed by the derived-metric calculators.
///
/// Every field is optional except downloads, which default to zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoringInputs {
    pub stars: Option<u64>,
    pub forks: Option<u64>,
    pub open_issues: Option<u64>,
    pub contributors: Option<u64>,
    pub commits_last_4_weeks: Option<u64>,
    pub pushed_at: Option<DateTime<Utc>>,
    pub downloads_week: u64,
}
