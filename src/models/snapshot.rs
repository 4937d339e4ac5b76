use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ecosystem-wide summary of one canonical table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EcosystemSnapshot {
    pub snapshot_date: NaiveDate,

    pub total_servers: usize,
    pub servers_with_npm_package: usize,
    pub servers_with_pypi_package: usize,
    pub servers_with_repo_metrics: usize,
    pub servers_by_source: BTreeMap<String, usize>,

    pub active_servers: usize,
    pub active_percentage: f64,

    pub total_stars: u64,
    pub avg_stars: f64,
    pub median_stars: u64,

    pub total_npm_downloads_week: u64,
    pub total_pypi_downloads_week: u64,
    pub total_downloads_week: u64,
    pub sdk_npm_downloads_week: u64,
    pub sdk_pypi_downloads_week: u64,

    pub activity_distribution: BTreeMap<String, usize>,
    pub popularity_distribution: BTreeMap<String, usize>,
    pub ecosystem_distribution: BTreeMap<String, usize>,
    /// Most frequent categories, count descending then name ascending.
    pub top_categories: Vec<(String, usize)>,
    pub top_servers: Vec<ServerSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSummary {
    pub server_id: String,
    pub name: String,
    pub health_score: u8,
    pub activity_level: String,
    pub popularity_tier: String,
    pub repo_stars: u64,
    pub total_downloads_week: u64,
}

/// A persisted snapshot row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSnapshot {
    pub id: i64,
    pub run_id: String,
    pub timestamp: i64,
    pub snapshot: EcosystemSnapshot,
}
