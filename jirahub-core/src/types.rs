//! Normalized issue-tracker types shared by the engine and the tracker clients.
//!
//! Every [`Issue`] and [`Comment`] is a read-mostly projection rebuilt on each
//! run. Only [`LinkMetadata`] is durable, and it lives on the tracker issue
//! itself rather than in local state.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Schema version written into every [`LinkMetadata`] block.
pub const LINK_METADATA_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Identifier of an issue on its own service (`"42"` on GitHub, `"PROJ-7"` on JIRA).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IssueId(pub String);

impl fmt::Display for IssueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for IssueId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for IssueId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Identifier of a comment on its own service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommentId(pub String);

impl fmt::Display for CommentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for CommentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CommentId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// The two tracker services kept in sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Github,
    Jira,
}

impl Source {
    /// Both services in a stable order.
    pub fn all() -> &'static [Source] {
        &[Source::Github, Source::Jira]
    }

    /// The service on the other side of a link.
    pub fn other(self) -> Source {
        match self {
            Source::Github => Source::Jira,
            Source::Jira => Source::Github,
        }
    }

    /// Lowercase key used in configuration and log fields.
    pub fn key(self) -> &'static str {
        match self {
            Source::Github => "github",
            Source::Jira => "jira",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Github => write!(f, "GitHub"),
            Source::Jira => write!(f, "JIRA"),
        }
    }
}

/// Normalized open/closed state.
///
/// JIRA models status as a free-form string; its client maps the configured
/// closed-status set onto [`IssueStatus::Closed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IssueStatus {
    #[default]
    Open,
    Closed,
}

impl IssueStatus {
    pub fn is_open(self) -> bool {
        self == IssueStatus::Open
    }
}

impl fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssueStatus::Open => write!(f, "open"),
            IssueStatus::Closed => write!(f, "closed"),
        }
    }
}

// ---------------------------------------------------------------------------
// References
// ---------------------------------------------------------------------------

/// Service-qualified issue reference. This is what the sync state persists
/// in its `failed` set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IssueRef {
    pub source: Source,
    pub id: IssueId,
}

impl IssueRef {
    pub fn new(source: Source, id: impl Into<IssueId>) -> Self {
        Self {
            source,
            id: id.into(),
        }
    }
}

impl fmt::Display for IssueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} issue {}", self.source, self.id)
    }
}

/// Pointer from an issue to its linked counterpart on the other service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterpartRef {
    pub source: Source,
    /// Repository (`owner/name`) or JIRA project key holding the counterpart.
    pub project: String,
    pub id: IssueId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl CounterpartRef {
    pub fn issue_ref(&self) -> IssueRef {
        IssueRef::new(self.source, self.id.clone())
    }

    /// Build a counterpart pointer at `issue`.
    pub fn to_issue(issue: &Issue) -> Self {
        Self {
            source: issue.source,
            project: issue.project.clone(),
            id: issue.id.clone(),
            url: issue.url.clone(),
        }
    }
}

/// Durable linking metadata stored on the tracker issue itself.
///
/// Unknown fields are ignored on read so older and newer writers can share
/// the same issues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkMetadata {
    pub version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counterpart: Option<CounterpartRef>,
    /// Local comment id -> id of the comment it produced on the other side.
    /// Append-only.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub comments: BTreeMap<CommentId, CommentId>,
}

impl Default for LinkMetadata {
    fn default() -> Self {
        Self {
            version: LINK_METADATA_VERSION,
            counterpart: None,
            comments: BTreeMap::new(),
        }
    }
}

impl LinkMetadata {
    pub fn linked_to(counterpart: CounterpartRef) -> Self {
        Self {
            counterpart: Some(counterpart),
            ..Self::default()
        }
    }

    pub fn is_linked(&self) -> bool {
        self.counterpart.is_some()
    }

    pub fn mirror_of(&self, local: &CommentId) -> Option<&CommentId> {
        self.comments.get(local)
    }

    /// Record a mirrored comment. Existing entries are never overwritten;
    /// returns `false` when `local` was already mapped.
    pub fn record_comment(&mut self, local: CommentId, mirror: CommentId) -> bool {
        if self.comments.contains_key(&local) {
            return false;
        }
        self.comments.insert(local, mirror);
        true
    }

    /// Whether `comment` is one of the mirrors this side produced.
    pub fn produced(&self, comment: &CommentId) -> bool {
        self.comments.values().any(|m| m == comment)
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// A tracker account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct User {
    pub username: String,
    pub display_name: String,
}

impl User {
    pub fn new(username: impl Into<String>, display_name: Option<String>) -> Self {
        let username = username.into();
        let display_name = display_name
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| username.clone());
        Self {
            username,
            display_name,
        }
    }
}

/// A comment on an issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    pub author: User,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Authored by the sync account.
    #[serde(default)]
    pub is_bot: bool,
    /// Set when this comment is a mirror; names the source comment.
    #[serde(default)]
    pub mirror_of: Option<CommentId>,
    /// Opaque service payload.
    #[serde(default)]
    pub raw: serde_json::Value,
}

/// Normalized view of a tracker issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub source: Source,
    pub id: IssueId,
    /// Repository (`owner/name`) or JIRA project key.
    pub project: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub labels: BTreeSet<String>,
    #[serde(default)]
    pub milestone: Option<String>,
    pub status: IssueStatus,
    /// Service status name before normalization (JIRA only).
    #[serde(default)]
    pub raw_status: Option<String>,
    #[serde(default)]
    pub issue_type: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub components: BTreeSet<String>,
    pub author: User,
    /// Created by the sync account.
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub comments: Vec<Comment>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub link: LinkMetadata,
    /// Opaque service payload, available to custom filters.
    #[serde(default)]
    pub raw: serde_json::Value,
}

impl Issue {
    pub fn reference(&self) -> IssueRef {
        IssueRef::new(self.source, self.id.clone())
    }

    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    pub fn counterpart(&self) -> Option<&CounterpartRef> {
        self.link.counterpart.as_ref()
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} issue {}", self.source, self.id)
    }
}

// ---------------------------------------------------------------------------
// Write payloads
// ---------------------------------------------------------------------------

/// Field set used to create a new issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct IssueFields {
    pub title: String,
    pub body: String,
    pub labels: BTreeSet<String>,
    pub milestone: Option<String>,
    pub status: IssueStatus,
    /// Service status to move the new issue to (JIRA workflow name).
    pub status_name: Option<String>,
    pub issue_type: Option<String>,
    pub priority: Option<String>,
    pub components: BTreeSet<String>,
    /// Service-specific extras (e.g. JIRA custom fields), passed through verbatim.
    pub extra: BTreeMap<String, serde_json::Value>,
    pub link: LinkMetadata,
}

/// Partial update of an existing issue. `None` leaves the field untouched.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FieldChanges {
    pub title: Option<String>,
    pub body: Option<String>,
    pub labels: Option<BTreeSet<String>>,
    /// `Some(None)` clears the milestone.
    pub milestone: Option<Option<String>>,
    pub status: Option<IssueStatus>,
    /// Workflow status name accompanying `status` (JIRA close/reopen names).
    pub status_name: Option<String>,
    pub link: Option<LinkMetadata>,
}

impl FieldChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.body.is_none()
            && self.labels.is_none()
            && self.milestone.is_none()
            && self.status.is_none()
            && self.link.is_none()
    }

    /// Names of the fields this change touches, in write order.
    pub fn field_names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.title.is_some() {
            names.push("title");
        }
        if self.body.is_some() {
            names.push("body");
        }
        if self.labels.is_some() {
            names.push("labels");
        }
        if self.milestone.is_some() {
            names.push("milestone");
        }
        if self.status.is_some() {
            names.push("status");
        }
        if self.link.is_some() {
            names.push("link");
        }
        names
    }
}

/// Body of a comment to post. `mirror_of` is embedded by the client as a
/// hidden marker so a lost mapping can be recovered later.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NewComment {
    pub body: String,
    pub mirror_of: Option<CommentId>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
