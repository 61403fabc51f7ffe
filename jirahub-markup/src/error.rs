//! Error types for jirahub-markup.

use thiserror::Error;

/// All errors that can arise while building converters or rendering
/// attribution templates.
#[derive(Debug, Error)]
pub enum MarkupError {
    /// Tera template engine error.
    #[error("template engine error: {0}")]
    Tera(#[from] tera::Error),

    /// JSON serialization error (building tera context).
    #[error("context serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid markup pattern: {0}")]
    Regex(#[from] regex::Error),
}
