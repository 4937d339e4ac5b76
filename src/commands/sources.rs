use chrono::NaiveDate;
use serde_json::Value;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::analysis::resolve::code_host_slug;
use crate::commands::settings::EffectiveSettings;
use crate::errors::{PipelineError, PipelineResult};
use crate::models::metrics::{DownloadChannel, DownloadMap, RepoMetrics, RepoMetricsMap};
use crate::models::server::CanonicalRecord;
use crate::models::source_record::SourceKind;

const BUILTIN_CURATED: &str = include_str!("../../resources/curated_servers.json");

/// Everything a fetch collaborator may need for one run. Built once, never mutated.
///
/// Network collaborators pace themselves with the delays and authenticate with
/// the token. File-dump collaborators only use the endpoints, for provenance,
/// and the date window.
#[derive(Clone)]
pub struct FetchContext {
    pub registry_base_url: String,
    pub code_host_api_base_url: String,
    pub npm_downloads_api_url: String,
    pub pypi_stats_api_url: String,
    pub code_host_token: Option<String>,
    pub code_host_delay: Duration,
    pub npm_delay: Duration,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl FetchContext {
    /// Upstream endpoint a discovery source kind is fetched from.
    pub fn discovery_endpoint(&self, kind: SourceKind) -> &str {
        match kind {
            SourceKind::Registry => &self.registry_base_url,
            SourceKind::CodeHostSearch | SourceKind::Curated => &self.code_host_api_base_url,
        }
    }

    pub fn downloads_endpoint(&self, channel: DownloadChannel) -> &str {
        match channel {
            DownloadChannel::Npm => &self.npm_downloads_api_url,
            DownloadChannel::Pypi => &self.pypi_stats_api_url,
        }
    }
}

// Hand-written so the token never reaches the logs.
impl fmt::Debug for FetchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchContext")
            .field("registry_base_url", &self.registry_base_url)
            .field("code_host_api_base_url", &self.code_host_api_base_url)
            .field("npm_downloads_api_url", &self.npm_downloads_api_url)
            .field("pypi_stats_api_url", &self.pypi_stats_api_url)
            .field("code_host_token", &self.code_host_token.as_ref().map(|_| "<redacted>"))
            .field("code_host_delay", &self.code_host_delay)
            .field("npm_delay", &self.npm_delay)
            .field("start_date", &self.start_date)
            .field("end_date", &self.end_date)
            .finish()
    }
}

/// Produces raw items for one discovery source kind.
pub trait DiscoverySource {
    fn kind(&self) -> SourceKind;
    fn fetch_items(&self, ctx: &FetchContext) -> PipelineResult<Vec<Value>>;
}

/// Produces `server_id → RepoMetrics` for the canonical table.
pub trait RepoMetricsSource {
    fn fetch_repo_metrics(
        &self,
        ctx: &FetchContext,
        records: &[CanonicalRecord],
    ) -> PipelineResult<RepoMetricsMap>;
}

/// Produces `package → weekly downloads` for one channel.
pub trait DownloadStatsSource {
    fn channel(&self) -> DownloadChannel;
    fn fetch_weekly_downloads(&self, ctx: &FetchContext, packages: &[String]) -> PipelineResult<DownloadMap>;
}

/// The collaborators wired into one run.
pub struct SourceSet {
    pub discovery: Vec<Box<dyn DiscoverySource>>,
    pub repo_metrics: Option<Box<dyn RepoMetricsSource>>,
    pub downloads: Vec<Box<dyn DownloadStatsSource>>,
}

impl SourceSet {
    /// File-dump collaborators reading from `<workspace>/<inputDir>`.
    pub fn from_input_dir(workspace_path: &str, settings: &EffectiveSettings) -> Self {
        let dir = Path::new(workspace_path).join(&settings.input_dir);
        Self {
            discovery: vec![
                Box::new(CuratedList::new(dir.join("curated.json"))),
                Box::new(JsonDumpDiscovery::new(SourceKind::Registry, dir.join("registry.json"))),
                Box::new(JsonDumpDiscovery::new(
                    SourceKind::CodeHostSearch,
                    dir.join("code_host_search.json"),
                )),
            ],
            repo_metrics: Some(Box::new(JsonDumpRepoMetrics::new(dir.join("repo_metrics.json")))),
            downloads: vec![
                Box::new(JsonDumpDownloads::new(DownloadChannel::Npm, dir.join("npm_downloads.json"))),
                Box::new(JsonDumpDownloads::new(DownloadChannel::Pypi, dir.join("pypi_downloads.json"))),
            ],
        }
    }
}

/// Items from a saved API response. Accepts a bare array or an object
/// wrapping the array under `servers`, `items` or `data`.
pub struct JsonDumpDiscovery {
    kind: SourceKind,
    path: PathBuf,
}

impl JsonDumpDiscovery {
    pub fn new(kind: SourceKind, path: PathBuf) -> Self {
        Self { kind, path }
    }
}

impl DiscoverySource for JsonDumpDiscovery {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn fetch_items(&self, ctx: &FetchContext) -> PipelineResult<Vec<Value>> {
        let endpoint = ctx.discovery_endpoint(self.kind);
        log::debug!("Reading {} dump of {endpoint} from {}", self.kind, self.path.display());
        let doc = read_json_file(self.kind.as_str(), endpoint, &self.path)?;
        items_from_document(self.kind.as_str(), doc)
    }
}

/// Curated entries from `curated.json` when present, else the bundled list.
pub struct CuratedList {
    override_path: PathBuf,
}

impl CuratedList {
    pub fn new(override_path: PathBuf) -> Self {
        Self { override_path }
    }
}

impl DiscoverySource for CuratedList {
    fn kind(&self) -> SourceKind {
        SourceKind::Curated
    }

    fn fetch_items(&self, _ctx: &FetchContext) -> PipelineResult<Vec<Value>> {
        if self.override_path.exists() {
            let doc = read_json_file("curated", "curated list", &self.override_path)?;
            return items_from_document("curated", doc);
        }
        builtin_curated_items()
    }
}

pub fn builtin_curated_items() -> PipelineResult<Vec<Value>> {
    let doc: Value = serde_json::from_str(BUILTIN_CURATED)?;
    items_from_document("curated", doc)
}

/// Repo stats keyed by `server_id` or by `owner/repo`.
pub struct JsonDumpRepoMetrics {
    path: PathBuf,
}

impl JsonDumpRepoMetrics {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl RepoMetricsSource for JsonDumpRepoMetrics {
    fn fetch_repo_metrics(
        &self,
        ctx: &FetchContext,
        records: &[CanonicalRecord],
    ) -> PipelineResult<RepoMetricsMap> {
        let doc = read_json_file("repo_metrics", &ctx.code_host_api_base_url, &self.path)?;
        let Value::Object(entries) = doc else {
            return Err(unavailable("repo_metrics", "expected an object keyed by server id"));
        };

        let mut out = RepoMetricsMap::new();
        for record in records {
            let slug_key = record
                .repository_url
                .as_deref()
                .and_then(code_host_slug)
                .map(|(owner, repo)| format!("{owner}/{repo}"));

            let raw = entries.get(&record.server_id).or_else(|| {
                slug_key.as_ref().and_then(|key| {
                    entries
                        .iter()
                        .find(|(k, _)| k.eq_ignore_ascii_case(key))
                        .map(|(_, v)| v)
                })
            });
            let Some(raw) = raw else {
                continue;
            };

            match serde_json::from_value::<RepoMetrics>(raw.clone()) {
                Ok(metrics) => {
                    out.insert(record.server_id.clone(), metrics);
                }
                Err(e) => log::warn!("Ignoring repo metrics for {}: {e}", record.server_id),
            }
        }

        Ok(out)
    }
}

/// Weekly download counts: `{ "pkg": 123 }` or `{ "pkg": { "downloads": 123 } }`.
///
/// The counts may also sit under `downloads` next to a
/// `period: { start, end }` naming the window they cover; a window that
/// differs from the run's is logged and the counts are still used.
pub struct JsonDumpDownloads {
    channel: DownloadChannel,
    path: PathBuf,
}

impl JsonDumpDownloads {
    pub fn new(channel: DownloadChannel, path: PathBuf) -> Self {
        Self { channel, path }
    }
}

impl DownloadStatsSource for JsonDumpDownloads {
    fn channel(&self) -> DownloadChannel {
        self.channel
    }

    fn fetch_weekly_downloads(&self, ctx: &FetchContext, packages: &[String]) -> PipelineResult<DownloadMap> {
        let source_name = format!("{}_downloads", self.channel);
        let doc = read_json_file(&source_name, ctx.downloads_endpoint(self.channel), &self.path)?;
        let Value::Object(mut entries) = doc else {
            return Err(unavailable(&source_name, "expected an object keyed by package name"));
        };

        if let Some(period) = entries.remove("period") {
            warn_on_window_mismatch(&source_name, &period, ctx);
            entries = match entries.remove("downloads") {
                Some(Value::Object(counts)) => counts,
                _ => return Err(unavailable(&source_name, "period given without a downloads object")),
            };
        }

        let mut out = DownloadMap::new();
        for package in packages {
            let count = entries.get(package).and_then(|v| {
                v.as_u64()
                    .or_else(|| v.get("downloads").and_then(Value::as_u64))
            });
            if let Some(count) = count {
                out.insert(package.clone(), count);
            }
        }

        Ok(out)
    }
}

fn warn_on_window_mismatch(source_name: &str, period: &Value, ctx: &FetchContext) {
    let date = |key: &str| {
        period
            .get(key)
            .and_then(Value::as_str)
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
    };
    match (date("start"), date("end")) {
        (Some(start), Some(end)) if start == ctx.start_date && end == ctx.end_date => {}
        (Some(start), Some(end)) => log::warn!(
            "{source_name} dump covers {start}..{end}, run window is {}..{}",
            ctx.start_date,
            ctx.end_date
        ),
        _ => log::warn!("{source_name} dump has an unreadable period"),
    }
}

fn read_json_file(source_name: &str, endpoint: &str, path: &Path) -> PipelineResult<Value> {
    if !path.exists() {
        return Err(unavailable(
            source_name,
            &format!("no dump of {endpoint} at {}", path.display()),
        ));
    }
    let raw = fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|e| unavailable(source_name, &format!("invalid JSON: {e}")))
}

fn items_from_document(source_name: &str, doc: Value) -> PipelineResult<Vec<Value>> {
    match doc {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => ["servers", "items", "data"]
            .iter()
            .find_map(|key| match map.remove(*key) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            })
            .ok_or_else(|| unavailable(source_name, "no item array in document")),
        _ => Err(unavailable(source_name, "unexpected document shape")),
    }
}

fn unavailable(source_name: &str, message: &str) -> PipelineError {
    PipelineError::SourceUnavailable {
        source_name: source_name.to_string(),
        message: message.to_string(),
    }
}
