//! The collaborator contract every tracker client implements.
//!
//! The reconciliation engine is written only against [`IssueSource`]; the
//! GitHub and JIRA clients and the in-memory test tracker are the
//! implementations.

use chrono::{DateTime, Utc};

use crate::error::TrackerError;
use crate::feature::SyncFeature;
use crate::types::{
    Comment, CommentId, FieldChanges, Issue, IssueFields, IssueId, IssueRef, NewComment, Source,
};

/// Lazily paginated issue listing.
pub type IssueStream<'a> = Box<dyn Iterator<Item = Result<Issue, TrackerError>> + 'a>;

pub type TrackerResult<T> = Result<T, TrackerError>;

/// One tracker service, seen through the normalized data model.
///
/// Issues returned by `list_issues` and `get_issue` carry their comments and
/// their decoded [`crate::types::LinkMetadata`]. Writing the metadata back
/// happens through [`FieldChanges::link`] and [`IssueFields::link`].
pub trait IssueSource: Send + Sync {
    fn source(&self) -> Source;

    /// Repository (`owner/name`) or JIRA project key.
    fn project(&self) -> &str;

    /// Issues updated at or after `updated_since` (all issues when `None`).
    fn list_issues(&self, updated_since: Option<DateTime<Utc>>) -> IssueStream<'_>;

    /// Fetch one issue; `Ok(None)` when it does not exist.
    fn get_issue(&self, id: &IssueId) -> TrackerResult<Option<Issue>>;

    fn list_comments(&self, issue: &IssueRef) -> TrackerResult<Vec<Comment>>;

    fn create_issue(&self, fields: &IssueFields) -> TrackerResult<Issue>;

    fn update_issue(&self, issue: &IssueRef, changes: &FieldChanges) -> TrackerResult<()>;

    fn add_comment(&self, issue: &IssueRef, comment: &NewComment) -> TrackerResult<Comment>;

    fn update_comment(
        &self,
        issue: &IssueRef,
        comment: &CommentId,
        body: &NewComment,
    ) -> TrackerResult<()>;

    /// Human-readable descriptions of every missing permission needed for
    /// `features` (empty when everything is in place).
    fn check_permissions(&self, features: &[SyncFeature]) -> TrackerResult<Vec<String>>;
}

impl<T: IssueSource + ?Sized> IssueSource for Box<T> {
    fn source(&self) -> Source {
        (**self).source()
    }

    fn project(&self) -> &str {
        (**self).project()
    }

    fn list_issues(&self, updated_since: Option<DateTime<Utc>>) -> IssueStream<'_> {
        (**self).list_issues(updated_since)
    }

    fn get_issue(&self, id: &IssueId) -> TrackerResult<Option<Issue>> {
        (**self).get_issue(id)
    }

    fn list_comments(&self, issue: &IssueRef) -> TrackerResult<Vec<Comment>> {
        (**self).list_comments(issue)
    }

    fn create_issue(&self, fields: &IssueFields) -> TrackerResult<Issue> {
        (**self).create_issue(fields)
    }

    fn update_issue(&self, issue: &IssueRef, changes: &FieldChanges) -> TrackerResult<()> {
        (**self).update_issue(issue, changes)
    }

    fn add_comment(&self, issue: &IssueRef, comment: &NewComment) -> TrackerResult<Comment> {
        (**self).add_comment(issue, comment)
    }

    fn update_comment(
        &self,
        issue: &IssueRef,
        comment: &CommentId,
        body: &NewComment,
    ) -> TrackerResult<()> {
        (**self).update_comment(issue, comment, body)
    }

    fn check_permissions(&self, features: &[SyncFeature]) -> TrackerResult<Vec<String>> {
        (**self).check_permissions(features)
    }
}
