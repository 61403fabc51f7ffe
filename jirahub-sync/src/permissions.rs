//! Permission check across both trackers.

use std::fmt;

use jirahub_core::config::Config;
use jirahub_core::tracker::IssueSource;
use jirahub_core::types::Source;

use crate::error::SyncError;

/// One missing capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionProblem {
    pub service: Source,
    pub message: String,
}

impl fmt::Display for PermissionProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.service, self.message)
    }
}

/// Ask each tracker for what it lacks for the features enabled on its side.
///
/// Permission failures (missing or rejected credentials) become problems;
/// any other tracker error is returned.
pub fn check_permissions(
    config: &Config,
    github: &dyn IssueSource,
    jira: &dyn IssueSource,
) -> Result<Vec<PermissionProblem>, SyncError> {
    let mut problems = Vec::new();
    for tracker in [github, jira] {
        let service = tracker.source();
        let features = config.side(service).sync.enabled_features();
        match tracker.check_permissions(&features) {
            Ok(missing) => problems.extend(missing.into_iter().map(|message| PermissionProblem {
                service,
                message,
            })),
            Err(err) if err.is_fatal() => problems.push(PermissionProblem {
                service,
                message: err.to_string(),
            }),
            Err(err) => return Err(err.into()),
        }
    }
    for problem in &problems {
        tracing::error!(service = %problem.service, "{}", problem.message);
    }
    Ok(problems)
}

#[cfg(test)]
mod tests {
    use jirahub_core::TrackerError;

    use super::*;
    use crate::memory::{MemoryTracker, TrackerOp};

    #[test]
    fn problems_are_itemised_per_service() {
        let mut config = Config::default();
        config.jira.common.sync.sync_comments = true;
        let gh = MemoryTracker::github("octo/widgets");
        let jira = MemoryTracker::jira("WID");
        jira.set_missing_permissions(vec!["ADD_COMMENTS (needed for sync_comments)".into()]);
        gh.fail_next(TrackerOp::Permissions, TrackerError::permission("GitHub", "bad credentials"));

        let problems = check_permissions(&config, &gh, &jira).unwrap();
        assert_eq!(problems.len(), 2);
        assert_eq!(problems[0].to_string(), "GitHub: GitHub permission denied: bad credentials");
        assert_eq!(problems[1].service, Source::Jira);
    }

    #[test]
    fn nothing_missing_is_empty() {
        let config = Config::default();
        let gh = MemoryTracker::github("octo/widgets");
        let jira = MemoryTracker::jira("WID");
        jira.set_missing_permissions(vec!["ignored: nothing enabled".into()]);
        assert!(check_permissions(&config, &gh, &jira).unwrap().is_empty());
    }

    #[test]
    fn transport_errors_propagate() {
        let config = Config::default();
        let gh = MemoryTracker::github("octo/widgets");
        let jira = MemoryTracker::jira("WID");
        jira.fail_next(TrackerOp::Permissions, TrackerError::transient("JIRA", "connection reset"));
        assert!(matches!(
            check_permissions(&config, &gh, &jira),
            Err(SyncError::Tracker(_))
        ));
    }
}
