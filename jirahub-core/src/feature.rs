//! Sync features and the tracker permissions they require.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One independently configurable kind of write into a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncFeature {
    CreateIssues,
    SyncComments,
    SyncStatus,
    SyncLabels,
    SyncMilestones,
}

impl SyncFeature {
    pub fn all() -> &'static [SyncFeature] {
        &[
            SyncFeature::CreateIssues,
            SyncFeature::SyncComments,
            SyncFeature::SyncStatus,
            SyncFeature::SyncLabels,
            SyncFeature::SyncMilestones,
        ]
    }

    /// Configuration key of the feature flag.
    pub fn key(self) -> &'static str {
        match self {
            SyncFeature::CreateIssues => "create_issues",
            SyncFeature::SyncComments => "sync_comments",
            SyncFeature::SyncStatus => "sync_status",
            SyncFeature::SyncLabels => "sync_labels",
            SyncFeature::SyncMilestones => "sync_milestones",
        }
    }

    /// JIRA project permissions needed to write this feature into JIRA.
    pub fn jira_permissions(self) -> &'static [&'static str] {
        match self {
            SyncFeature::CreateIssues => &["CREATE_ISSUES", "EDIT_ISSUES"],
            SyncFeature::SyncComments => {
                &["ADD_COMMENTS", "DELETE_OWN_COMMENTS", "EDIT_OWN_COMMENTS"]
            }
            SyncFeature::SyncStatus => &["CLOSE_ISSUES", "RESOLVE_ISSUES", "TRANSITION_ISSUES"],
            SyncFeature::SyncLabels => &["EDIT_ISSUES"],
            SyncFeature::SyncMilestones => &["EDIT_ISSUES", "RESOLVE_ISSUES"],
        }
    }

    /// Whether writing this feature into GitHub needs push access to the
    /// repository. Issues and comments can be written by any account with
    /// read access; labels, milestones and state changes cannot.
    pub fn needs_github_push(self) -> bool {
        matches!(
            self,
            SyncFeature::SyncStatus | SyncFeature::SyncLabels | SyncFeature::SyncMilestones
        )
    }
}

impl fmt::Display for SyncFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// JIRA permissions needed regardless of enabled features.
pub const JIRA_BASE_PERMISSIONS: &[&str] = &["BROWSE_PROJECTS", "EDIT_ISSUES"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_feature_needs_some_jira_permission() {
        for feature in SyncFeature::all() {
            assert!(!feature.jira_permissions().is_empty(), "{feature}");
        }
    }

    #[test]
    fn push_only_for_repository_metadata() {
        assert!(!SyncFeature::CreateIssues.needs_github_push());
        assert!(!SyncFeature::SyncComments.needs_github_push());
        assert!(SyncFeature::SyncLabels.needs_github_push());
    }
}
