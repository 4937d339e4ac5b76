use serde::{Deserialize, Serialize};
use std::fmt;

use crate::analysis::join::PackageCollision;
use super::source_record::SourceKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Discover,
    Normalize,
    Resolve,
    FetchMetrics,
    Join,
    Derive,
    Aggregate,
    Persist,
}

impl PipelineStage {
    pub const ALL: [PipelineStage; 8] = [
        PipelineStage::Discover,
        PipelineStage::Normalize,
        PipelineStage::Resolve,
        PipelineStage::FetchMetrics,
        PipelineStage::Join,
        PipelineStage::Derive,
        PipelineStage::Aggregate,
        PipelineStage::Persist,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStage::Discover => "discover",
            PipelineStage::Normalize => "normalize",
            PipelineStage::Resolve => "resolve",
            PipelineStage::FetchMetrics => "fetch_metrics",
            PipelineStage::Join => "join",
            PipelineStage::Derive => "derive",
            PipelineStage::Aggregate => "aggregate",
            PipelineStage::Persist => "persist",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Emitted after each stage finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineProgress {
    pub stage: PipelineStage,
    pub current: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceReport {
    pub kind: SourceKind,
    pub fetched: usize,
    pub normalized: usize,
    pub dropped: usize,
    /// Why the source contributed nothing, if it failed outright.
    pub error: Option<String>,
}

/// Processed vs dropped counts for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineReport {
    pub run_id: Option<String>,
    pub sources: Vec<SourceReport>,
    pub dropped_reasons: Vec<String>,

    pub input_records: usize,
    pub canonical_records: usize,
    pub merged_groups: usize,
    pub id_disambiguations: Vec<String>,

    pub repo_metrics_matched: usize,
    pub npm_matched: usize,
    pub pypi_matched: usize,
    pub package_collisions: Vec<PackageCollision>,

    pub duration_ms: u64,
}

impl PipelineReport {
    pub fn total_fetched(&self) -> usize {
        self.sources.iter().map(|s| s.fetched).sum()
    }

    pub fn total_normalized(&self) -> usize {
        self.sources.iter().map(|s| s.normalized).sum()
    }

    pub fn total_dropped(&self) -> usize {
        self.sources.iter().map(|s| s.dropped).sum()
    }
}
