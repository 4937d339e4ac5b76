use chrono::{Duration as ChronoDuration, NaiveDate};
use serde_json::{json, Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::analysis::join::PackageCollisionPolicy;
use crate::commands::sources::FetchContext;
use crate::errors::{PipelineError, PipelineResult};

pub const STATE_DIR: &str = ".mcppulse";
const SETTINGS_SCHEMA_VERSION: i64 = 2;

/// Typed view over the sanitized settings file.
#[derive(Debug, Clone)]
pub struct EffectiveSettings {
    pub registry_base_url: String,
    pub code_host_api_base_url: String,
    pub npm_downloads_api_url: String,
    pub pypi_stats_api_url: String,
    pub code_host_token: Option<String>,
    pub code_host_delay: Duration,
    pub npm_delay: Duration,
    pub history_days: u32,
    pub max_text_length: usize,
    pub ecosystem_marker: String,
    pub top_categories: usize,
    pub sdk_npm_package: Option<String>,
    pub sdk_pypi_package: Option<String>,
    pub package_collision_policy: PackageCollisionPolicy,
    pub input_dir: String,
}

impl EffectiveSettings {
    pub fn from_value(settings: &Value) -> Self {
        let sanitized = migrate_settings(settings.clone());
        let text = |key: &str| {
            sanitized
                .get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let number = |key: &str| sanitized.get(key).and_then(Value::as_u64).unwrap_or(0);

        Self {
            registry_base_url: text("registryBaseUrl").unwrap_or_default(),
            code_host_api_base_url: text("codeHostApiBaseUrl").unwrap_or_default(),
            npm_downloads_api_url: text("npmDownloadsApiUrl").unwrap_or_default(),
            pypi_stats_api_url: text("pypiStatsApiUrl").unwrap_or_default(),
            code_host_token: text("codeHostToken"),
            code_host_delay: Duration::from_millis(number("codeHostRateLimitDelayMs")),
            npm_delay: Duration::from_millis(number("npmRateLimitDelayMs")),
            history_days: number("historyDays") as u32,
            max_text_length: number("maxTextLength") as usize,
            ecosystem_marker: text("ecosystemMarker").unwrap_or_default(),
            top_categories: number("topCategories") as usize,
            sdk_npm_package: text("sdkNpmPackage"),
            sdk_pypi_package: text("sdkPypiPackage"),
            package_collision_policy: text("packageCollisionPolicy")
                .as_deref()
                .and_then(PackageCollisionPolicy::parse)
                .unwrap_or(PackageCollisionPolicy::EarliestDiscovered),
            input_dir: text("inputDir").unwrap_or_else(|| "inputs".to_string()),
        }
    }

    /// Immutable context handed to every fetch collaborator for one run.
    pub fn fetch_context(&self, today: NaiveDate) -> FetchContext {
        FetchContext {
            registry_base_url: self.registry_base_url.clone(),
            code_host_api_base_url: self.code_host_api_base_url.clone(),
            npm_downloads_api_url: self.npm_downloads_api_url.clone(),
            pypi_stats_api_url: self.pypi_stats_api_url.clone(),
            code_host_token: self.code_host_token.clone(),
            code_host_delay: self.code_host_delay,
            npm_delay: self.npm_delay,
            start_date: today - ChronoDuration::days(i64::from(self.history_days)),
            end_date: today,
        }
    }
}

pub fn get_settings(workspace_path: &str) -> PipelineResult<Value> {
    load_settings_from_disk(workspace_path)
}

pub fn save_settings(workspace_path: &str, settings: Value) -> PipelineResult<Value> {
    save_settings_to_disk(workspace_path, settings)
}

pub fn load_effective_settings(workspace_path: &str) -> PipelineResult<EffectiveSettings> {
    let settings = load_settings_from_disk(workspace_path)?;
    Ok(EffectiveSettings::from_value(&settings))
}

pub fn load_settings_from_disk(workspace_path: &str) -> PipelineResult<Value> {
    let path = settings_path(workspace_path);
    ensure_state_dir(workspace_path)?;

    let original = if path.exists() {
        let raw = fs::read_to_string(&path)?;
        serde_json::from_str::<Value>(&raw).unwrap_or_else(|e| {
            log::warn!("settings.json is not valid JSON ({e}); falling back to defaults");
            json!({})
        })
    } else {
        json!({})
    };

    let migrated = migrate_settings(original.clone());
    if migrated != original || !path.exists() {
        write_settings_file(&path, &migrated)?;
    }

    Ok(migrated)
}

pub fn save_settings_to_disk(workspace_path: &str, settings: Value) -> PipelineResult<Value> {
    let path = settings_path(workspace_path);
    ensure_state_dir(workspace_path)?;

    let mut merged = load_settings_from_disk(workspace_path).unwrap_or_else(|_| default_settings());
    merge_settings(&mut merged, &settings);

    let migrated = migrate_settings(merged);
    write_settings_file(&path, &migrated)?;
    Ok(migrated)
}

pub fn state_dir(workspace_path: &str) -> PathBuf {
    Path::new(workspace_path).join(STATE_DIR)
}

fn settings_path(workspace_path: &str) -> PathBuf {
    state_dir(workspace_path).join("settings.json")
}

fn ensure_state_dir(workspace_path: &str) -> PipelineResult<()> {
    fs::create_dir_all(state_dir(workspace_path)).map_err(|e| {
        PipelineError::Settings(format!("Failed to create {STATE_DIR} directory: {e}"))
    })
}

fn write_settings_file(path: &Path, settings: &Value) -> PipelineResult<()> {
    let raw = serde_json::to_string_pretty(settings)?;
    fs::write(path, raw)
        .map_err(|e| PipelineError::Settings(format!("Failed to write settings.json: {e}")))
}

fn migrate_settings(input: Value) -> Value {
    let defaults = default_settings();
    let mut out = match input {
        Value::Object(map) => Value::Object(map),
        _ => Value::Object(Map::new()),
    };

    let version = out
        .get("schema_version")
        .and_then(Value::as_i64)
        .unwrap_or(0);

    if version < 2 {
        // V2 renamed the code-host keys and moved delays to milliseconds.
        migrate_legacy_code_host_keys(&mut out);
    }

    deep_merge_defaults(&mut out, &defaults);
    sanitize_settings(&mut out);
    if let Some(obj) = out.as_object_mut() {
        obj.insert("schema_version".to_string(), json!(SETTINGS_SCHEMA_VERSION));
    }

    out
}

fn default_settings() -> Value {
    json!({
        "schema_version": SETTINGS_SCHEMA_VERSION,
        "registryBaseUrl": "https://registry.modelcontextprotocol.io/v0",
        "codeHostApiBaseUrl": "https://api.github.com",
        "npmDownloadsApiUrl": "https://api.npmjs.org/downloads",
        "pypiStatsApiUrl": "https://pypistats.org/api",
        "codeHostToken": null,
        "codeHostRateLimitDelayMs": 2500,
        "npmRateLimitDelayMs": 500,
        "historyDays": 90,
        "maxTextLength": 500,
        "ecosystemMarker": "mcp",
        "topCategories": 15,
        "sdkNpmPackage": "@modelcontextprotocol/sdk",
        "sdkPypiPackage": "mcp",
        "packageCollisionPolicy": "earliest_discovered",
        "inputDir": "inputs"
    })
}

fn deep_merge_defaults(target: &mut Value, defaults: &Value) {
    let (Some(target_obj), Some(default_obj)) = (target.as_object_mut(), defaults.as_object()) else {
        return;
    };

    for (key, default_value) in default_obj {
        match target_obj.get_mut(key) {
            Some(existing) => {
                if existing.is_object() && default_value.is_object() {
                    deep_merge_defaults(existing, default_value);
                }
            }
            None => {
                target_obj.insert(key.clone(), default_value.clone());
            }
        }
    }
}

fn merge_settings(target: &mut Value, incoming: &Value) {
    match (target, incoming) {
        (Value::Object(target_obj), Value::Object(incoming_obj)) => {
            for (key, value) in incoming_obj {
                if let Some(existing) = target_obj.get_mut(key) {
                    merge_settings(existing, value);
                } else {
                    target_obj.insert(key.clone(), value.clone());
                }
            }
        }
        (target_slot, incoming_value) => {
            *target_slot = incoming_value.clone();
        }
    }
}

fn migrate_legacy_code_host_keys(settings: &mut Value) {
    let Some(obj) = settings.as_object_mut() else {
        return;
    };

    if let Some(token) = obj.remove("githubToken") {
        obj.entry("codeHostToken".to_string()).or_insert(token);
    }
    if let Some(seconds) = obj.remove("githubRateLimitDelay").and_then(|v| v.as_f64()) {
        let millis = (seconds * 1000.0).round().max(0.0) as u64;
        obj.entry("codeHostRateLimitDelayMs".to_string())
            .or_insert(json!(millis));
    }
}

fn sanitize_settings(settings: &mut Value) {
    let Some(obj) = settings.as_object_mut() else {
        return;
    };

    // Clamp numerics.
    clamp_u64(obj, "codeHostRateLimitDelayMs", 0, 60_000, 2500);
    clamp_u64(obj, "npmRateLimitDelayMs", 0, 60_000, 500);
    clamp_u64(obj, "historyDays", 7, 365, 90);
    clamp_u64(obj, "maxTextLength", 50, 5000, 500);
    clamp_u64(obj, "topCategories", 1, 100, 15);

    sanitize_enum(
        obj,
        "packageCollisionPolicy",
        &["earliest_discovered", "last_seen"],
        "earliest_discovered",
    );

    ensure_string(obj, "ecosystemMarker", "mcp");
    ensure_string(obj, "inputDir", "inputs");

    // Token may be null, never any other non-string value.
    if !matches!(obj.get("codeHostToken"), Some(Value::String(_)) | Some(Value::Null)) {
        obj.insert("codeHostToken".to_string(), Value::Null);
    }
}

fn clamp_u64(map: &mut Map<String, Value>, key: &str, min: u64, max: u64, default: u64) {
    let raw = map.get(key).and_then(Value::as_u64).unwrap_or(default);
    map.insert(key.to_string(), json!(raw.clamp(min, max)));
}

fn sanitize_enum(map: &mut Map<String, Value>, key: &str, allowed: &[&str], default: &str) {
    let valid = map
        .get(key)
        .and_then(Value::as_str)
        .filter(|value| allowed.contains(value))
        .unwrap_or(default);
    map.insert(key.to_string(), json!(valid));
}

fn ensure_string(map: &mut Map<String, Value>, key: &str, default: &str) {
    let value = map
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default)
        .to_string();
    map.insert(key.to_string(), json!(value));
}
