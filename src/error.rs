use std::path::PathBuf;

use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("forbidden local path outside repository: {0}")]
    Forbidden(String),

    #[error("local source not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON at {location}: {source}")]
    InvalidJson {
        location: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("permanent failure fetching {url} after {attempts} attempts: {last}")]
    Exhausted {
        url: String,
        attempts: u32,
        last: String,
    },

    #[error("unsupported source (expected local:<path> or http(s) URL): {0}")]
    UnsupportedSource(String),

    #[error("mappingRef must be an HTTP(S) URL, got: {0}")]
    NotRemote(String),
}

#[derive(Error, Debug)]
pub enum MergeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Missing required field: {target}")]
    Extraction { target: String },

    #[error("No 'name' for item #{index} in source {origin}")]
    Unnamed { index: usize, origin: String },

    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    #[error("Expression evaluator not available: {0}")]
    ToolMissing(String),

    #[error("Schema validation failed: {0}")]
    Validation(String),

    #[error("No output generated. You must provide either --inplace or --output.")]
    NoOutput,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MergeError {
    /// Errors that terminate the run regardless of strict mode.
    pub fn is_always_fatal(&self) -> bool {
        matches!(
            self,
            MergeError::Config(_)
                | MergeError::Extraction { .. }
                | MergeError::ToolMissing(_)
                | MergeError::NoOutput
                | MergeError::Io(_)
                | MergeError::Json(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, MergeError>;

/// Turns a tolerable failure into a skip (`Ok(None)`) unless running strict.
///
/// The failure is logged here, at the point the skip-or-abort decision is made.
pub fn tolerate<T>(result: Result<T>, strict: bool) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if strict || e.is_always_fatal() => Err(e),
        Err(e) => {
            error!("{}; skipping", e);
            Ok(None)
        }
    }
}
