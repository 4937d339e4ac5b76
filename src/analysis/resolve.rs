use std::collections::{BTreeSet, HashMap, HashSet};

use crate::analysis::normalize::is_absent;
use crate::errors::PipelineError;
use crate::models::metrics::RepoMetrics;
use crate::models::server::CanonicalRecord;
use crate::models::source_record::{SourceKind, SourceRecord};

const MAX_SLUG_LEN: usize = 50;

/// Canonical records plus the bookkeeping a run report needs.
#[derive(Debug, Default)]
pub struct ResolveOutcome {
    pub records: Vec<CanonicalRecord>,
    pub input_records: usize,
    /// Groups built from more than one source record.
    pub merged_groups: usize,
    /// One `AmbiguousServerId` per disambiguated identifier.
    pub id_collisions: Vec<PipelineError>,
}

/// Normalized repository URL used as the deduplication key.
///
/// Lower-cases, then strips scheme, a leading `www.`, trailing slashes and a
/// trailing `.git` until nothing changes, so applying it twice is a no-op.
/// Absent URLs yield an empty fingerprint.
pub fn repo_fingerprint(url: Option<&str>) -> String {
    let Some(url) = url.filter(|u| !is_absent(u)) else {
        return String::new();
    };

    let mut fp = url.trim().to_lowercase();
    loop {
        let before = fp.len();
        for prefix in ["https://", "http://", "www."] {
            if let Some(rest) = fp.strip_prefix(prefix) {
                fp = rest.to_string();
            }
        }
        fp = fp.trim_end_matches('/').to_string();
        if let Some(rest) = fp.strip_suffix(".git") {
            fp = rest.to_string();
        }
        fp = fp.trim().to_string();
        if fp.len() == before {
            break;
        }
    }

    if is_absent(&fp) {
        return String::new();
    }
    fp
}

/// `(owner, repo)` for a GitHub repository URL.
pub fn code_host_slug(url: &str) -> Option<(String, String)> {
    let fp = repo_fingerprint(Some(url));
    let path = fp.strip_prefix("github.com/")?;
    let mut parts = path.split('/').filter(|p| !p.is_empty());
    let owner = parts.next()?;
    let repo = parts.next()?;
    Some((owner.to_string(), repo.to_string()))
}

/// Lower-cased name with non-alphanumeric runs collapsed to `_`, at most 50 chars.
pub fn slugify(name: &str) -> Option<String> {
    let mut slug = String::with_capacity(name.len());
    let mut pending_sep = false;
    for ch in name.trim().chars().flat_map(char::to_lowercase) {
        if ch.is_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('_');
            }
            pending_sep = false;
            slug.push(ch);
        } else {
            pending_sep = true;
        }
    }

    let slug: String = slug.chars().take(MAX_SLUG_LEN).collect();
    let slug = slug.trim_end_matches('_').to_string();
    (!slug.is_empty()).then_some(slug)
}

fn hashed_id(seed: &str) -> String {
    let hash = blake3::hash(seed.as_bytes()).to_hex();
    format!("server_{}", &hash[..12])
}

/// Groups records by repository fingerprint and merges each group into one
/// canonical record with a snapshot-unique `server_id`.
///
/// Records without a fingerprint are never merged. Groups keep the order in
/// which their first member appeared, so identifier disambiguation is
/// deterministic for a given input order.
pub fn resolve(records: Vec<SourceRecord>) -> ResolveOutcome {
    let input_records = records.len();
    let mut groups: Vec<(String, Vec<SourceRecord>)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for record in records {
        let fp = repo_fingerprint(record.repository_url.as_deref());
        if fp.is_empty() {
            groups.push((fp, vec![record]));
            continue;
        }
        match index.get(&fp) {
            Some(&i) => groups[i].1.push(record),
            None => {
                index.insert(fp.clone(), groups.len());
                groups.push((fp, vec![record]));
            }
        }
    }

    let mut outcome = ResolveOutcome {
        input_records,
        ..ResolveOutcome::default()
    };
    let mut taken: HashSet<String> = HashSet::new();

    for (fp, group) in groups {
        if group.len() > 1 {
            outcome.merged_groups += 1;
        }
        let (mut merged, candidate_id) = merge_group(group, &fp);

        let server_id = unique_id(&candidate_id, &taken);
        if server_id != candidate_id {
            log::warn!(
                "Server id '{candidate_id}' collides within snapshot, assigned '{server_id}'"
            );
            outcome.id_collisions.push(PipelineError::AmbiguousServerId {
                server_id: candidate_id,
                resolved_as: server_id.clone(),
            });
        }
        taken.insert(server_id.clone());
        merged.server_id = server_id;
        outcome.records.push(merged);
    }

    log::info!(
        "Resolved {} source records into {} servers ({} merged groups, {} id collisions)",
        outcome.input_records,
        outcome.records.len(),
        outcome.merged_groups,
        outcome.id_collisions.len()
    );
    outcome
}

fn unique_id(candidate: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(candidate) {
        return candidate.to_string();
    }
    (2..)
        .map(|n| format!("{candidate}_{n}"))
        .find(|id| !taken.contains(id))
        .unwrap_or_else(|| candidate.to_string())
}

/// Merges one group field-by-field in source priority order.
///
/// Returns the merged record (with an empty `server_id`) and the candidate id.
fn merge_group(mut group: Vec<SourceRecord>, fingerprint: &str) -> (CanonicalRecord, String) {
    // Stable: records of the same kind keep input order.
    group.sort_by_key(|r| r.source_kind.priority());

    let primary = group[0].source_kind;
    let earliest = group
        .iter()
        .map(|r| r.discovered_date)
        .min()
        .unwrap_or(group[0].discovered_date);

    let mut merged = CanonicalRecord::new(String::new(), primary, earliest);
    merged.name = first_text(&group, |r| r.name.as_deref());
    merged.description = first_text(&group, |r| r.description.as_deref());
    merged.repository_url = first_text(&group, |r| r.repository_url.as_deref());
    merged.npm_package = first_text(&group, |r| r.npm_package.as_deref());
    merged.pypi_package = first_text(&group, |r| r.pypi_package.as_deref());
    merged.author = first_text(&group, |r| r.author.as_deref());
    merged.version = first_text(&group, |r| r.version.as_deref());
    merged.categories = group
        .iter()
        .map(|r| present_categories(&r.categories))
        .find(|cats| !cats.is_empty())
        .unwrap_or_default();
    merged.discovered_metrics = merge_metrics(&group);
    merged.sources = group.iter().map(|r| r.source_kind).collect::<BTreeSet<SourceKind>>();

    let candidate_id = if fingerprint.is_empty() {
        first_text(&group, |r| r.source_id.as_deref())
            .or_else(|| merged.name.as_deref().and_then(slugify))
            .unwrap_or_else(|| hashed_id(&merged.repository_url.clone().unwrap_or_default()))
    } else {
        repo_backed_id(&group, fingerprint)
    };

    (merged, candidate_id)
}

/// The curated id when the group has one, else a hash of the fingerprint.
///
/// Ids from the registry or search hits are ignored here so a repository keeps
/// its id in runs where those sources are missing.
fn repo_backed_id(group: &[SourceRecord], fingerprint: &str) -> String {
    group
        .iter()
        .filter(|r| r.source_kind == SourceKind::Curated)
        .filter_map(|r| r.source_id.as_deref())
        .find(|id| !is_absent(id))
        .map(|id| id.trim().to_string())
        .unwrap_or_else(|| hashed_id(fingerprint))
}

fn first_text<F>(group: &[SourceRecord], field: F) -> Option<String>
where
    F: Fn(&SourceRecord) -> Option<&str>,
{
    group
        .iter()
        .filter_map(|r| field(r))
        .find(|v| !is_absent(v))
        .map(|v| v.trim().to_string())
}

fn present_categories(categories: &[String]) -> Vec<String> {
    categories
        .iter()
        .filter(|c| !is_absent(c))
        .map(|c| c.trim().to_string())
        .collect()
}

/// Discovered metrics merge like any other field: first present value per stat.
fn merge_metrics(group: &[SourceRecord]) -> Option<RepoMetrics> {
    let candidates: Vec<&RepoMetrics> = group
        .iter()
        .filter_map(|r| r.discovered_metrics.as_ref())
        .collect();
    if candidates.is_empty() {
        return None;
    }

    let num = |f: fn(&RepoMetrics) -> Option<u64>| candidates.iter().find_map(|m| f(m));
    let txt = |f: fn(&RepoMetrics) -> Option<&str>| {
        candidates
            .iter()
            .filter_map(|m| f(m))
            .find(|v| !is_absent(v))
            .map(str::to_string)
    };

    Some(RepoMetrics {
        stars: num(|m| m.stars),
        forks: num(|m| m.forks),
        open_issues: num(|m| m.open_issues),
        watchers: num(|m| m.watchers),
        language: txt(|m| m.language.as_deref()),
        license: txt(|m| m.license.as_deref()),
        archived: candidates.iter().find_map(|m| m.archived),
        created_at: txt(|m| m.created_at.as_deref()),
        updated_at: txt(|m| m.updated_at.as_deref()),
        pushed_at: txt(|m| m.pushed_at.as_deref()),
        topics: candidates
            .iter()
            .map(|m| m.topics.clone())
            .find(|t| !t.is_empty())
            .unwrap_or_default(),
        commits_last_week: num(|m| m.commits_last_week),
        commits_last_4_weeks: num(|m| m.commits_last_4_weeks),
        contributors: num(|m| m.contributors),
    })
}
