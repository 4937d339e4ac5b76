use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use mcp_pulse_lib::commands::db::{get_db_connection, get_ecosystem_snapshots, get_server, load_servers};
use mcp_pulse_lib::commands::pipeline::{
    build_snapshot, run_snapshot_internal, MetricInputs, PipelineOptions, SourceBatch,
};
use mcp_pulse_lib::commands::settings::{get_settings, load_effective_settings, save_settings};
use mcp_pulse_lib::commands::sources::{DiscoverySource, FetchContext, SourceSet};
use mcp_pulse_lib::errors::{PipelineError, PipelineResult};
use mcp_pulse_lib::models::report::PipelineStage;
use mcp_pulse_lib::models::server::{PopularityTier, NODE_ECOSYSTEM_LABEL};
use mcp_pulse_lib::models::source_record::SourceKind;

fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

fn create_workspace() -> (TempDir, String) {
    let temp_dir = tempfile::tempdir().expect("create temp dir");
    let workspace_path = temp_dir.path().to_string_lossy().to_string();
    (temp_dir, workspace_path)
}

fn write_input(workspace_path: &str, file: &str, value: Value) {
    let dir = Path::new(workspace_path).join("inputs");
    fs::create_dir_all(&dir).expect("create inputs dir");
    fs::write(dir.join(file), serde_json::to_string_pretty(&value).expect("serialize"))
        .expect("write input file");
}

fn curated_x() -> Value {
    json!({
        "name": "X",
        "repository": "https://github.com/acme/x",
        "npm_package": "@acme/x",
        "company": "Acme"
    })
}

fn registry_x() -> Value {
    json!({ "name": "x-server", "repository": "github.com/acme/x/", "author": "registry-author" })
}

fn search_x() -> Value {
    json!({
        "id": 4242,
        "name": "x",
        "html_url": "https://github.com/ACME/X.git",
        "stargazers_count": 50,
        "owner": { "login": "search-author" }
    })
}

fn write_x_fixture(workspace_path: &str) {
    write_input(workspace_path, "curated.json", json!([curated_x()]));
    write_input(workspace_path, "registry.json", json!({ "servers": [registry_x()] }));
    write_input(workspace_path, "code_host_search.json", json!({ "items": [search_x()] }));
}

#[test]
fn three_mentions_of_one_project_merge_into_one_server() {
    let batches = vec![
        SourceBatch::new(SourceKind::Curated, vec![curated_x()]),
        SourceBatch::new(SourceKind::Registry, vec![registry_x()]),
        SourceBatch::new(SourceKind::CodeHostSearch, vec![search_x()]),
    ];

    let out = build_snapshot(&batches, &MetricInputs::default(), &PipelineOptions::new(fixed_now()));

    assert_eq!(out.records.len(), 1);
    let server = &out.records[0];
    assert_eq!(server.author.as_deref(), Some("Acme"));
    assert_eq!(server.npm_package.as_deref(), Some("@acme/x"));
    assert_eq!(server.repo_stars, Some(50));
    assert!(server.has_repo_metrics);
    assert_eq!(server.sources.len(), 3);
    assert_eq!(server.ecosystem_label, NODE_ECOSYSTEM_LABEL);

    assert_eq!(out.snapshot.total_servers, 1);
    assert_eq!(out.report.input_records, 3);
    assert_eq!(out.report.merged_groups, 1);
    assert_eq!(out.snapshot.servers_by_source.get("curated"), Some(&1));
    assert_eq!(out.snapshot.servers_by_source.get("code_host_search"), Some(&1));
}

#[test]
fn processed_and_dropped_counts_are_reported_per_source() {
    let batches = vec![
        SourceBatch::new(
            SourceKind::Registry,
            vec![
                registry_x(),
                json!({ "description": "neither a name nor a repository" }),
                json!(null),
            ],
        ),
        SourceBatch::new(SourceKind::CodeHostSearch, vec![search_x()]),
    ];

    let out = build_snapshot(&batches, &MetricInputs::default(), &PipelineOptions::new(fixed_now()));

    let registry = &out.report.sources[0];
    assert_eq!(registry.kind, SourceKind::Registry);
    assert_eq!((registry.fetched, registry.normalized, registry.dropped), (3, 1, 2));
    assert_eq!(out.report.total_dropped(), 2);
    assert_eq!(out.report.total_normalized(), 2);
    assert_eq!(out.snapshot.total_servers, 1);
}

#[test]
fn settings_round_trip_and_merge_partial_updates() {
    let (_tmp, workspace_path) = create_workspace();

    let initial = get_settings(&workspace_path).expect("load settings");
    assert_eq!(initial["historyDays"], json!(90));
    assert!(Path::new(&workspace_path).join(".mcppulse/settings.json").exists());

    let saved = save_settings(
        &workspace_path,
        json!({ "historyDays": 30, "packageCollisionPolicy": "last_seen" }),
    )
    .expect("save settings");
    assert_eq!(saved["historyDays"], json!(30));
    assert_eq!(saved["maxTextLength"], json!(500));

    let reloaded = get_settings(&workspace_path).expect("reload settings");
    assert_eq!(reloaded, saved);

    let effective = load_effective_settings(&workspace_path).expect("effective settings");
    assert_eq!(effective.history_days, 30);
}

#[test]
fn file_sources_drive_a_persisted_snapshot() {
    let (_tmp, workspace_path) = create_workspace();
    write_x_fixture(&workspace_path);
    write_input(
        &workspace_path,
        "repo_metrics.json",
        json!({ "acme/x": { "stargazers_count": 75, "pushed_at": "2026-02-27T00:00:00Z" } }),
    );
    write_input(
        &workspace_path,
        "npm_downloads.json",
        json!({ "@acme/x": 1200, "@modelcontextprotocol/sdk": 90000 }),
    );

    let settings = load_effective_settings(&workspace_path).expect("settings");
    let sources = SourceSet::from_input_dir(&workspace_path, &settings);
    let mut stages = Vec::new();

    let out = run_snapshot_internal(&workspace_path, &sources, &settings, fixed_now(), |p| {
        stages.push((p.stage, p.current, p.total));
    })
    .expect("run snapshot");

    assert_eq!(out.snapshot.total_servers, 1);
    let server = &out.records[0];
    assert_eq!(server.repo_stars, Some(75));
    assert_eq!(server.npm_downloads_week, Some(1200));
    assert_eq!(server.pypi_downloads_week, None);
    assert_eq!(server.total_downloads_week, 1200);
    assert_eq!(server.popularity_tier, PopularityTier::Popular);
    assert_eq!(out.snapshot.sdk_npm_downloads_week, 90000);
    assert_eq!(out.snapshot.total_npm_downloads_week, 1200);
    assert_eq!(out.report.repo_metrics_matched, 1);
    assert!(out.report.run_id.is_some());

    assert_eq!(stages.first().map(|s| s.0), Some(PipelineStage::Discover));
    assert_eq!(stages.last(), Some(&(PipelineStage::Persist, 8, 8)));

    let conn = get_db_connection(&workspace_path).expect("db");
    let stored = load_servers(&conn).expect("stored servers");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].server_id, server.server_id);

    let shown = get_server(&workspace_path, &server.server_id)
        .expect("lookup")
        .expect("server stored");
    assert_eq!(shown.repo_stars, Some(75));
    assert!(get_server(&workspace_path, "no_such_server").expect("lookup").is_none());
}

#[test]
fn snapshot_history_accumulates_across_runs() {
    let (_tmp, workspace_path) = create_workspace();
    write_x_fixture(&workspace_path);

    let settings = load_effective_settings(&workspace_path).expect("settings");
    let sources = SourceSet::from_input_dir(&workspace_path, &settings);

    let first = run_snapshot_internal(&workspace_path, &sources, &settings, fixed_now(), |_| {})
        .expect("first run");
    let second = run_snapshot_internal(&workspace_path, &sources, &settings, fixed_now(), |_| {})
        .expect("second run");
    assert_ne!(first.report.run_id, second.report.run_id);

    let history = get_ecosystem_snapshots(&workspace_path).expect("history");
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].run_id, first.report.run_id.clone().unwrap_or_default());
    assert!(history.iter().all(|h| h.snapshot.total_servers == 1));
}

#[test]
fn missing_inputs_fall_back_to_the_builtin_curated_list() {
    let (_tmp, workspace_path) = create_workspace();

    let settings = load_effective_settings(&workspace_path).expect("settings");
    let sources = SourceSet::from_input_dir(&workspace_path, &settings);
    let out = run_snapshot_internal(&workspace_path, &sources, &settings, fixed_now(), |_| {})
        .expect("run without inputs");

    // Five bundled entries share the reference servers repository.
    assert_eq!(out.report.input_records, 15);
    assert_eq!(out.report.merged_groups, 1);
    assert_eq!(out.snapshot.total_servers, 11);
    assert_eq!(out.snapshot.servers_with_repo_metrics, 0);

    let failed: Vec<SourceKind> = out
        .report
        .sources
        .iter()
        .filter(|s| s.error.is_some())
        .map(|s| s.kind)
        .collect();
    assert_eq!(failed, vec![SourceKind::Registry, SourceKind::CodeHostSearch]);
}

struct UnreachableRegistry;

impl DiscoverySource for UnreachableRegistry {
    fn kind(&self) -> SourceKind {
        SourceKind::Registry
    }

    fn fetch_items(&self, ctx: &FetchContext) -> PipelineResult<Vec<Value>> {
        Err(PipelineError::SourceUnavailable {
            source_name: ctx.registry_base_url.clone(),
            message: "connection refused".to_string(),
        })
    }
}

#[test]
fn failing_collaborator_does_not_abort_the_run() {
    let (_tmp, workspace_path) = create_workspace();
    write_x_fixture(&workspace_path);

    let settings = load_effective_settings(&workspace_path).expect("settings");
    let mut sources = SourceSet::from_input_dir(&workspace_path, &settings);
    sources.discovery[1] = Box::new(UnreachableRegistry);
    sources.repo_metrics = None;
    sources.downloads.clear();

    let out = run_snapshot_internal(&workspace_path, &sources, &settings, fixed_now(), |_| {})
        .expect("run with failing registry");

    let registry = out
        .report
        .sources
        .iter()
        .find(|s| s.kind == SourceKind::Registry)
        .expect("registry report");
    assert_eq!(registry.fetched, 0);
    assert!(registry.error.as_deref().unwrap_or_default().contains("connection refused"));

    assert_eq!(out.snapshot.total_servers, 1);
    assert_eq!(out.records[0].repo_stars, Some(50));
    assert_eq!(out.records[0].npm_downloads_week, None);

    let all_sources = build_snapshot(
        &[
            SourceBatch::new(SourceKind::Curated, vec![curated_x()]),
            SourceBatch::new(SourceKind::Registry, vec![registry_x()]),
            SourceBatch::new(SourceKind::CodeHostSearch, vec![search_x()]),
        ],
        &MetricInputs::default(),
        &PipelineOptions::new(fixed_now()),
    );
    assert_eq!(out.records[0].server_id, all_sources.records[0].server_id);
}
