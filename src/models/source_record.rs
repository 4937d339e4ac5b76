use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::metrics::RepoMetrics;

/// Where a project mention was discovered.
///
/// Variant order is merge priority: the first variant is the most trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Curated,
    Registry,
    CodeHostSearch,
}

impl SourceKind {
    pub const ALL: [SourceKind; 3] = [
        SourceKind::Curated,
        SourceKind::Registry,
        SourceKind::CodeHostSearch,
    ];

    /// Lower value wins during merge.
    pub fn priority(self) -> u8 {
        match self {
            SourceKind::Curated => 0,
            SourceKind::Registry => 1,
            SourceKind::CodeHostSearch => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Curated => "curated",
            SourceKind::Registry => "registry",
            SourceKind::CodeHostSearch => "code_host_search",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One project mention from one discovery source, pre-merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub source_id: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub repository_url: Option<String>,
    pub npm_package: Option<String>,
    pub pypi_package: Option<String>,
    pub categories: Vec<String>,
    pub author: Option<String>,
    pub version: Option<String>,
    pub source_kind: SourceKind,
    pub discovered_date: NaiveDate,
    /// Repository stats that came along with the discovery hit (code-host search only).
    pub discovered_metrics: Option<RepoMetrics>,
}

impl SourceRecord {
    pub fn new(source_kind: SourceKind, discovered_date: NaiveDate) -> Self {
        Self {
            source_id: None,
            name: None,
            description: None,
            repository_url: None,
            npm_package: None,
            pypi_package: None,
            categories: Vec::new(),
            author: None,
            version: None,
            source_kind,
            discovered_date,
            discovered_metrics: None,
        }
    }
}
