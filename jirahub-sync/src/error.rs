//! Error types for jirahub-sync.

use std::path::PathBuf;

use thiserror::Error;

use jirahub_core::{ConfigError, TrackerError};
use jirahub_markup::MarkupError;

/// All errors that can arise from sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A tracker call failed after the retry policy gave up.
    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error("markup error: {0}")]
    Markup(#[from] MarkupError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid redact pattern: {0}")]
    Regex(#[from] regex::Error),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error (sync state).
    #[error("sync state JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A background fetch thread panicked.
    #[error("fetching {0} issues panicked")]
    FetchPanicked(String),
}

impl SyncError {
    /// Aborts the run instead of failing a single issue.
    pub fn is_fatal(&self) -> bool {
        match self {
            SyncError::Tracker(e) => e.is_fatal(),
            SyncError::Markup(_) => false,
            _ => true,
        }
    }
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
