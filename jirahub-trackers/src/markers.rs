//! Hidden markers embedded in tracker text.
//!
//! Mirrored comments end with a marker naming the comment they were copied
//! from, written in a form the service does not render. GitHub has no custom
//! fields, so its issues keep [`LinkMetadata`] in a bot comment whose body is
//! a single hidden block: a SHA-256 checksum and the hex-encoded JSON.

use sha2::{Digest, Sha256};

use jirahub_core::types::{CommentId, LinkMetadata, Source};

const GITHUB_SOURCE_OPEN: &str = "<!-- jirahub-source-comment: ";
const GITHUB_SOURCE_CLOSE: &str = " -->";
const JIRA_SOURCE_OPEN: &str = "{anchor:jirahub-source-comment-";
const JIRA_SOURCE_CLOSE: &str = "}";

const METADATA_OPEN: &str = "<!-- jirahub-metadata:";
const METADATA_CLOSE: &str = " -->";
/// Hex digits of the checksum kept in the metadata block.
const CHECKSUM_LEN: usize = 16;

fn source_delimiters(service: Source) -> (&'static str, &'static str) {
    match service {
        Source::Github => (GITHUB_SOURCE_OPEN, GITHUB_SOURCE_CLOSE),
        Source::Jira => (JIRA_SOURCE_OPEN, JIRA_SOURCE_CLOSE),
    }
}

/// Append the source-comment marker for `origin` to `body`.
pub fn mark_comment(service: Source, body: &str, origin: &CommentId) -> String {
    let (open, close) = source_delimiters(service);
    format!("{}\n\n{open}{origin}{close}", body.trim_end())
}

/// Split a trailing source-comment marker off `body`.
pub fn split_comment(service: Source, body: &str) -> (String, Option<CommentId>) {
    let (open, close) = source_delimiters(service);
    let trimmed = body.trim_end();
    let Some(start) = trimmed.rfind(open) else {
        return (body.to_string(), None);
    };
    let Some(id) = trimmed[start + open.len()..].strip_suffix(close) else {
        return (body.to_string(), None);
    };
    if id.is_empty() || id.contains(char::is_whitespace) {
        return (body.to_string(), None);
    }
    let text = trimmed[..start].trim_end().to_string();
    (text, Some(CommentId::from(id)))
}

// ---------------------------------------------------------------------------
// GitHub metadata comment
// ---------------------------------------------------------------------------

/// Why a metadata block could not be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    Malformed(String),
    ChecksumMismatch,
}

impl std::fmt::Display for MetadataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataError::Malformed(reason) => write!(f, "malformed link metadata: {reason}"),
            MetadataError::ChecksumMismatch => write!(f, "link metadata checksum mismatch"),
        }
    }
}

fn checksum(json: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(CHECKSUM_LEN);
    digest
}

/// Whether `body` is a metadata comment.
pub fn is_metadata_comment(body: &str) -> bool {
    body.trim_start().starts_with(METADATA_OPEN)
}

/// Body of the GitHub comment holding `metadata`.
pub fn encode_metadata(metadata: &LinkMetadata) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string(metadata)?;
    Ok(format!(
        "{METADATA_OPEN}{}:{}{METADATA_CLOSE}",
        checksum(&json),
        hex::encode(json.as_bytes())
    ))
}

pub fn decode_metadata(body: &str) -> Result<LinkMetadata, MetadataError> {
    let inner = body
        .trim()
        .strip_prefix(METADATA_OPEN)
        .and_then(|rest| rest.strip_suffix(METADATA_CLOSE))
        .ok_or_else(|| MetadataError::Malformed("missing delimiters".into()))?;
    let (sum, payload) = inner
        .split_once(':')
        .ok_or_else(|| MetadataError::Malformed("missing checksum".into()))?;
    let bytes = hex::decode(payload.trim()).map_err(|e| MetadataError::Malformed(e.to_string()))?;
    let json = String::from_utf8(bytes).map_err(|e| MetadataError::Malformed(e.to_string()))?;
    if checksum(&json) != sum {
        return Err(MetadataError::ChecksumMismatch);
    }
    serde_json::from_str(&json).map_err(|e| MetadataError::Malformed(e.to_string()))
}
