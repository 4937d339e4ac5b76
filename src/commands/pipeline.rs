use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeSet;

use crate::analysis::aggregate::{aggregate, AggregateOptions};
use crate::analysis::derive::apply_derived_metrics;
use crate::analysis::join::{join_metrics, PackageCollisionPolicy};
use crate::analysis::normalize::{normalize_batch, NormalizeOptions};
use crate::analysis::resolve::resolve;
use crate::commands::db;
use crate::commands::settings::{load_effective_settings, EffectiveSettings};
use crate::commands::sources::{FetchContext, SourceSet};
use crate::errors::PipelineResult;
use crate::models::metrics::{DownloadChannel, DownloadMap, RepoMetricsMap};
use crate::models::report::{PipelineProgress, PipelineReport, PipelineStage, SourceReport};
use crate::models::server::CanonicalRecord;
use crate::models::snapshot::EcosystemSnapshot;
use crate::models::source_record::SourceKind;

/// Raw items one discovery source returned this run.
#[derive(Debug, Clone)]
pub struct SourceBatch {
    pub kind: SourceKind,
    pub items: Vec<Value>,
    /// Set when the fetch failed; `items` is then empty.
    pub error: Option<String>,
}

impl SourceBatch {
    pub fn new(kind: SourceKind, items: Vec<Value>) -> Self {
        Self { kind, items, error: None }
    }
}

/// Auxiliary metric tables. Any of them may be partial or empty.
#[derive(Debug, Clone, Default)]
pub struct MetricInputs {
    pub repo_metrics: RepoMetricsMap,
    pub npm_downloads: DownloadMap,
    pub pypi_downloads: DownloadMap,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub now: DateTime<Utc>,
    pub normalize: NormalizeOptions,
    pub aggregate: AggregateOptions,
    pub collision_policy: PackageCollisionPolicy,
}

impl PipelineOptions {
    pub fn new(now: DateTime<Utc>) -> Self {
        let today = now.date_naive();
        Self {
            now,
            normalize: NormalizeOptions::new(today),
            aggregate: AggregateOptions::new(today),
            collision_policy: PackageCollisionPolicy::EarliestDiscovered,
        }
    }

    pub fn from_settings(settings: &EffectiveSettings, now: DateTime<Utc>) -> Self {
        let mut opts = Self::new(now);
        opts.normalize.max_text_length = settings.max_text_length;
        opts.normalize.ecosystem_marker = settings.ecosystem_marker.clone();
        opts.aggregate.top_categories = settings.top_categories;
        opts.aggregate.sdk_npm_package = settings.sdk_npm_package.clone();
        opts.aggregate.sdk_pypi_package = settings.sdk_pypi_package.clone();
        opts.collision_policy = settings.package_collision_policy;
        opts
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub records: Vec<CanonicalRecord>,
    pub snapshot: EcosystemSnapshot,
    pub report: PipelineReport,
}

/// Runs every pure stage over already-fetched inputs. Performs no I/O.
pub fn build_snapshot(batches: &[SourceBatch], metrics: &MetricInputs, opts: &PipelineOptions) -> PipelineOutput {
    let start = std::time::Instant::now();
    let mut report = PipelineReport::default();

    let records = merge_sources(batches, opts, &mut report);
    let (records, snapshot) = score_and_aggregate(records, metrics, opts, &mut report, |_| {});

    report.duration_ms = start.elapsed().as_millis() as u64;
    PipelineOutput {
        records,
        snapshot,
        report,
    }
}

/// Normalizes every batch and resolves the survivors into canonical records.
pub fn merge_sources(
    batches: &[SourceBatch],
    opts: &PipelineOptions,
    report: &mut PipelineReport,
) -> Vec<CanonicalRecord> {
    let mut source_records = Vec::new();

    for batch in batches {
        let outcome = normalize_batch(batch.kind, &batch.items, &opts.normalize);
        report.sources.push(SourceReport {
            kind: batch.kind,
            fetched: batch.items.len(),
            normalized: outcome.records.len(),
            dropped: outcome.dropped.len(),
            error: batch.error.clone(),
        });
        report
            .dropped_reasons
            .extend(outcome.dropped.iter().map(ToString::to_string));
        source_records.extend(outcome.records);
    }

    let resolved = resolve(source_records);
    report.input_records = resolved.input_records;
    report.canonical_records = resolved.records.len();
    report.merged_groups = resolved.merged_groups;
    report.id_disambiguations = resolved.id_collisions.iter().map(ToString::to_string).collect();

    resolved.records
}

/// Join, derive and aggregate over the canonical table.
pub fn score_and_aggregate<F>(
    mut records: Vec<CanonicalRecord>,
    metrics: &MetricInputs,
    opts: &PipelineOptions,
    report: &mut PipelineReport,
    mut on_stage: F,
) -> (Vec<CanonicalRecord>, EcosystemSnapshot)
where
    F: FnMut(PipelineStage),
{
    let joined = join_metrics(
        &mut records,
        &metrics.repo_metrics,
        &metrics.npm_downloads,
        &metrics.pypi_downloads,
        opts.collision_policy,
    );
    report.repo_metrics_matched = joined.repo_metrics_matched;
    report.npm_matched = joined.npm_matched;
    report.pypi_matched = joined.pypi_matched;
    report.package_collisions = joined.collisions;
    on_stage(PipelineStage::Join);

    apply_derived_metrics(&mut records, opts.now);
    on_stage(PipelineStage::Derive);

    let snapshot = aggregate(
        &records,
        &metrics.npm_downloads,
        &metrics.pypi_downloads,
        &opts.aggregate,
    );
    on_stage(PipelineStage::Aggregate);

    (records, snapshot)
}

/// Fetches, builds and persists one snapshot using the workspace settings
/// and its file-dump collaborators.
pub fn run_snapshot(workspace_path: &str) -> PipelineResult<PipelineOutput> {
    let settings = load_effective_settings(workspace_path)?;
    let sources = SourceSet::from_input_dir(workspace_path, &settings);
    run_snapshot_internal(workspace_path, &sources, &settings, Utc::now(), |progress| {
        log::debug!(
            "Stage {} done ({}/{})",
            progress.stage,
            progress.current,
            progress.total
        );
    })
}

pub fn run_snapshot_internal<F>(
    workspace_path: &str,
    sources: &SourceSet,
    settings: &EffectiveSettings,
    now: DateTime<Utc>,
    mut emit_progress: F,
) -> PipelineResult<PipelineOutput>
where
    F: FnMut(PipelineProgress),
{
    let start = std::time::Instant::now();
    let total = PipelineStage::ALL.len();
    let mut emit = |stage: PipelineStage| {
        let current = PipelineStage::ALL
            .iter()
            .position(|s| *s == stage)
            .map_or(0, |i| i + 1);
        emit_progress(PipelineProgress { stage, current, total });
    };

    let ctx = settings.fetch_context(now.date_naive());
    log::debug!("Fetch context: {ctx:?}");
    let opts = PipelineOptions::from_settings(settings, now);
    let mut report = PipelineReport::default();

    let batches = fetch_batches(sources, &ctx);
    emit(PipelineStage::Discover);

    // Normalize and resolve run back to back; both are reported.
    let records = merge_sources(&batches, &opts, &mut report);
    emit(PipelineStage::Normalize);
    emit(PipelineStage::Resolve);

    let metrics = fetch_metrics(sources, &ctx, &records, settings);
    emit(PipelineStage::FetchMetrics);

    let (records, snapshot) = score_and_aggregate(records, &metrics, &opts, &mut report, &mut emit);

    let conn = db::get_db_connection(workspace_path)?;
    db::replace_servers(&conn, &records)?;
    let stored = db::insert_ecosystem_snapshot(&conn, &snapshot)?;
    report.run_id = Some(stored.run_id);
    emit(PipelineStage::Persist);

    report.duration_ms = start.elapsed().as_millis() as u64;
    log::info!(
        "Snapshot {}: {} servers, {} stars, {} weekly downloads, {:.1}% active",
        snapshot.snapshot_date,
        snapshot.total_servers,
        snapshot.total_stars,
        snapshot.total_downloads_week,
        snapshot.active_percentage
    );

    Ok(PipelineOutput {
        records,
        snapshot,
        report,
    })
}

fn fetch_batches(sources: &SourceSet, ctx: &FetchContext) -> Vec<SourceBatch> {
    sources
        .discovery
        .iter()
        .map(|source| {
            let kind = source.kind();
            match source.fetch_items(ctx) {
                Ok(items) => SourceBatch::new(kind, items),
                Err(err) => {
                    log::warn!("Source {kind} failed, continuing without it: {err}");
                    SourceBatch {
                        kind,
                        items: Vec::new(),
                        error: Some(err.to_string()),
                    }
                }
            }
        })
        .collect()
}

fn fetch_metrics(
    sources: &SourceSet,
    ctx: &FetchContext,
    records: &[CanonicalRecord],
    settings: &EffectiveSettings,
) -> MetricInputs {
    let mut metrics = MetricInputs::default();

    if let Some(source) = &sources.repo_metrics {
        match source.fetch_repo_metrics(ctx, records) {
            Ok(map) => metrics.repo_metrics = map,
            Err(err) => log::warn!("Repo metrics unavailable: {err}"),
        }
    }

    for source in &sources.downloads {
        let channel = source.channel();
        let sdk = match channel {
            DownloadChannel::Npm => settings.sdk_npm_package.as_deref(),
            DownloadChannel::Pypi => settings.sdk_pypi_package.as_deref(),
        };
        let packages = package_fetch_list(records, channel, sdk);
        match source.fetch_weekly_downloads(ctx, &packages) {
            Ok(map) => match channel {
                DownloadChannel::Npm => metrics.npm_downloads = map,
                DownloadChannel::Pypi => metrics.pypi_downloads = map,
            },
            Err(err) => log::warn!("{channel} download stats unavailable: {err}"),
        }
    }

    metrics
}

/// Distinct package names to request for a channel, plus the SDK package.
pub fn package_fetch_list(
    records: &[CanonicalRecord],
    channel: DownloadChannel,
    sdk_package: Option<&str>,
) -> Vec<String> {
    let mut packages: BTreeSet<String> = records
        .iter()
        .filter_map(|r| match channel {
            DownloadChannel::Npm => r.npm_package.clone(),
            DownloadChannel::Pypi => r.pypi_package.clone(),
        })
        .collect();
    if let Some(sdk) = sdk_package {
        packages.insert(sdk.to_string());
    }
    packages.into_iter().collect()
}
