use chrono::NaiveDate;
use serde_json::Value;

use crate::analysis::resolve::slugify;
use crate::errors::{PipelineError, PipelineResult};
use crate::models::metrics::RepoMetrics;
use crate::models::source_record::{SourceKind, SourceRecord};

pub const DEFAULT_MAX_TEXT_LENGTH: usize = 500;
pub const DEFAULT_ECOSYSTEM_MARKER: &str = "mcp";

#[derive(Debug, Clone)]
pub struct NormalizeOptions {
    pub discovered_date: NaiveDate,
    pub max_text_length: usize,
    /// Substring a repo name must contain before a package name is inferred from it.
    pub ecosystem_marker: String,
}

impl NormalizeOptions {
    pub fn new(discovered_date: NaiveDate) -> Self {
        Self {
            discovered_date,
            max_text_length: DEFAULT_MAX_TEXT_LENGTH,
            ecosystem_marker: DEFAULT_ECOSYSTEM_MARKER.to_string(),
        }
    }
}

/// Records that normalized cleanly plus the reasons for every dropped item.
#[derive(Debug, Default)]
pub struct NormalizeOutcome {
    pub records: Vec<SourceRecord>,
    pub dropped: Vec<PipelineError>,
}

/// Missing, blank, and the literal text "nan" all mean "no value".
pub fn is_absent(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan")
}

/// Keeps a value only if it is present, trimmed.
pub fn present(value: Option<&str>) -> Option<String> {
    value
        .filter(|v| !is_absent(v))
        .map(|v| v.trim().to_string())
}

/// Truncates to at most `max_chars` characters, never splitting a code point.
pub fn truncate_text(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => value[..byte_idx].to_string(),
        None => value.to_string(),
    }
}

/// Best-effort package-name guess from a repository's primary language and name.
///
/// Returns `(npm, pypi)`. Nothing is inferred unless the lower-cased name
/// contains `marker`.
pub fn infer_packages(
    language: Option<&str>,
    name: Option<&str>,
    marker: &str,
) -> (Option<String>, Option<String>) {
    let (Some(language), Some(name)) = (language, name) else {
        return (None, None);
    };
    let name = name.trim().to_lowercase();
    if marker.is_empty() || !name.contains(&marker.to_lowercase()) {
        return (None, None);
    }

    match language.trim().to_lowercase().as_str() {
        "typescript" | "javascript" => (Some(name), None),
        "python" => (None, Some(name.replace('-', "_"))),
        _ => (None, None),
    }
}

pub fn normalize_batch(kind: SourceKind, items: &[Value], opts: &NormalizeOptions) -> NormalizeOutcome {
    let mut outcome = NormalizeOutcome::default();

    for item in items {
        match normalize_item(kind, item, opts) {
            Ok(record) => outcome.records.push(record),
            Err(err) => {
                log::warn!("Dropping {kind} item: {err}");
                outcome.dropped.push(err);
            }
        }
    }

    if items.is_empty() {
        log::warn!("Source {kind} returned no items; it contributes nothing this run");
    } else {
        log::info!(
            "Normalized {kind}: {} kept, {} dropped",
            outcome.records.len(),
            outcome.dropped.len()
        );
    }

    outcome
}

pub fn normalize_item(kind: SourceKind, raw: &Value, opts: &NormalizeOptions) -> PipelineResult<SourceRecord> {
    if !raw.is_object() {
        return Err(PipelineError::MalformedSourceItem {
            kind,
            reason: "item is not an object".to_string(),
        });
    }

    let mut record = match kind {
        SourceKind::Registry => from_registry(raw, opts),
        SourceKind::CodeHostSearch => from_code_host(raw, opts),
        SourceKind::Curated => from_curated(raw, opts),
    };

    if record.name.is_none() && record.repository_url.is_none() {
        return Err(PipelineError::MalformedSourceItem {
            kind,
            reason: "missing both a name and a repository reference".to_string(),
        });
    }

    if record.npm_package.is_none() && record.pypi_package.is_none() {
        let language = record
            .discovered_metrics
            .as_ref()
            .and_then(|m| m.language.as_deref());
        let (npm, pypi) = infer_packages(language, record.name.as_deref(), &opts.ecosystem_marker);
        record.npm_package = npm;
        record.pypi_package = pypi;
    }

    bound_text_fields(&mut record, opts.max_text_length);
    Ok(record)
}

fn from_registry(raw: &Value, opts: &NormalizeOptions) -> SourceRecord {
    // Newer registry responses wrap the entry in a "server" object.
    let item = raw.get("server").filter(|s| s.is_object()).unwrap_or(raw);

    let mut record = SourceRecord::new(SourceKind::Registry, opts.discovered_date);
    record.source_id = text(item, &["id", "name"]);
    record.name = text(item, &["name", "display_name"]);
    record.description = text(item, &["description"]);
    record.repository_url = repository(item, &["repository", "repo", "source_url"]);
    record.categories = categories(item, &["categories"]);
    record.author = text(item, &["author", "publisher"]).or_else(|| nested_text(item, "author", "name"));
    record.version = text(item, &["version"])
        .or_else(|| nested_text(item, "version_detail", "version"));

    let (npm, pypi) = registry_packages(item);
    record.npm_package = npm;
    record.pypi_package = pypi;
    record
}

fn registry_packages(item: &Value) -> (Option<String>, Option<String>) {
    let mut npm = None;
    let mut pypi = None;

    match item.get("package") {
        Some(Value::Object(map)) => {
            npm = present(map.get("npm").and_then(Value::as_str));
            pypi = present(map.get("pypi").and_then(Value::as_str));
        }
        Some(Value::String(pkg)) if !is_absent(pkg) => {
            if pkg.contains("npmjs") || pkg.trim_start().starts_with('@') {
                npm = present(Some(pkg.as_str()));
            } else if pkg.contains("pypi") {
                pypi = present(Some(pkg.as_str()));
            }
        }
        _ => {}
    }

    if let Some(Value::Array(packages)) = item.get("packages") {
        for pkg in packages {
            let registry = text(pkg, &["registry_name", "registry_type", "registryType"])
                .map(|r| r.to_lowercase());
            let name = text(pkg, &["name", "identifier"]);
            match registry.as_deref() {
                Some("npm") if npm.is_none() => npm = name,
                Some("pypi") if pypi.is_none() => pypi = name,
                _ => {}
            }
        }
    }

    (npm, pypi)
}

fn from_code_host(raw: &Value, opts: &NormalizeOptions) -> SourceRecord {
    let mut record = SourceRecord::new(SourceKind::CodeHostSearch, opts.discovered_date);
    record.source_id = raw.get("id").and_then(scalar_text).map(|id| format!("github_{id}"));
    record.name = text(raw, &["name"]);
    record.description = text(raw, &["description"]);
    record.repository_url = text(raw, &["html_url"]).or_else(|| {
        text(raw, &["full_name"]).map(|full| format!("https://github.com/{full}"))
    });
    record.categories = categories(raw, &["topics"]);
    record.author = nested_text(raw, "owner", "login");

    record.discovered_metrics = Some(RepoMetrics {
        stars: raw.get("stargazers_count").and_then(Value::as_u64),
        forks: raw.get("forks_count").and_then(Value::as_u64),
        open_issues: raw.get("open_issues_count").and_then(Value::as_u64),
        watchers: raw.get("watchers_count").and_then(Value::as_u64),
        language: text(raw, &["language"]),
        license: nested_text(raw, "license", "spdx_id"),
        archived: raw.get("archived").and_then(Value::as_bool),
        created_at: text(raw, &["created_at"]),
        updated_at: text(raw, &["updated_at"]),
        pushed_at: text(raw, &["pushed_at"]),
        topics: record.categories.clone(),
        ..RepoMetrics::default()
    });
    record
}

fn from_curated(raw: &Value, opts: &NormalizeOptions) -> SourceRecord {
    let mut record = SourceRecord::new(SourceKind::Curated, opts.discovered_date);
    record.name = text(raw, &["name"]);
    record.source_id = text(raw, &["id", "server_id"])
        .or_else(|| record.name.as_deref().and_then(slugify));
    record.repository_url = repository(raw, &["repository", "repo"]);
    record.npm_package = text(raw, &["npm_package"]);
    record.pypi_package = text(raw, &["pypi_package"]);
    record.categories = categories(raw, &["categories", "category"]);

    let company = text(raw, &["company"]);
    record.author = text(raw, &["author"]).or_else(|| company.clone());
    record.description = text(raw, &["description"])
        .or_else(|| company.map(|c| format!("{c} official MCP server")));
    record.version = text(raw, &["version"]);
    record
}

fn bound_text_fields(record: &mut SourceRecord, max_chars: usize) {
    for field in [
        &mut record.name,
        &mut record.description,
        &mut record.author,
        &mut record.version,
    ] {
        if let Some(value) = field.as_mut() {
            *value = truncate_text(value, max_chars);
        }
    }
    for category in &mut record.categories {
        *category = truncate_text(category, max_chars);
    }
}

/// First present string (or number) among `keys`.
fn text(item: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| item.get(*key))
        .filter_map(scalar_text)
        .find(|v| !is_absent(v))
        .map(|v| v.trim().to_string())
}

fn nested_text(item: &Value, outer: &str, inner: &str) -> Option<String> {
    item.get(outer).and_then(|o| text(o, &[inner]))
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn repository(item: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().filter_map(|key| item.get(*key)).find_map(|value| match value {
        Value::Object(_) => text(value, &["url"]),
        other => scalar_text(other).and_then(|s| present(Some(s.as_str()))),
    })
}

/// Categories arrive as an array or a comma-separated string.
fn categories(item: &Value, keys: &[&str]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for value in keys.iter().filter_map(|key| item.get(*key)) {
        let parts: Vec<String> = match value {
            Value::Array(items) => items.iter().filter_map(scalar_text).collect(),
            Value::String(s) => s.split(',').map(str::to_string).collect(),
            _ => Vec::new(),
        };
        for part in parts {
            let part = part.trim();
            if !is_absent(part) && !out.iter().any(|c| c == part) {
                out.push(part.to_string());
            }
        }
        if !out.is_empty() {
            break;
        }
    }
    out
}
