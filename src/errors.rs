//! Error taxonomy for the snapshot pipeline.

use crate::models::source_record::SourceKind;

/// Errors raised while building a snapshot.
///
/// Per-record variants (`MalformedSourceItem`, `AmbiguousServerId`,
/// `UnparseableTimestamp`) are collected into the run report and never abort
/// a batch. The remaining variants come from the I/O shell.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Malformed {kind} item: {reason}")]
    MalformedSourceItem { kind: SourceKind, reason: String },

    #[error("Server id '{server_id}' already taken, resolved as '{resolved_as}'")]
    AmbiguousServerId { server_id: String, resolved_as: String },

    #[error("Unparseable timestamp: '{value}'")]
    UnparseableTimestamp { value: String },

    #[error("Source '{source_name}' unavailable: {message}")]
    SourceUnavailable { source_name: String, message: String },

    #[error("Usage: {0}")]
    Usage(String),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
