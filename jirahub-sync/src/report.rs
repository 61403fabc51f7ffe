//! Per-run report returned by the sync pipeline.

use chrono::{DateTime, Utc};

use jirahub_core::types::IssueRef;

use crate::reconcile::WriteIntent;

/// What happened to one candidate issue.
#[derive(Debug, Clone, PartialEq)]
pub enum IssueOutcome {
    /// Linked pair reconciled; `writes` remote writes were made (or would
    /// be, in a dry run).
    Synced { writes: usize },
    /// A counterpart was created. `None` in a dry run.
    Created { counterpart: Option<IssueRef> },
    Skipped { reason: String },
    Failed { error: String },
}

impl IssueOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, IssueOutcome::Failed { .. })
    }
}

/// One candidate and the intents computed for it.
#[derive(Debug, Clone, PartialEq)]
pub struct IssueReport {
    pub issue: IssueRef,
    pub outcome: IssueOutcome,
    pub intents: Vec<WriteIntent>,
}

/// Outcome counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportCounts {
    pub synced: usize,
    pub created: usize,
    pub skipped: usize,
    pub failed: usize,
    pub writes: usize,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SyncReport {
    pub dry_run: bool,
    pub issues: Vec<IssueReport>,
    pub previous_cursor: Option<DateTime<Utc>>,
    pub next_cursor: Option<DateTime<Utc>>,
}

impl SyncReport {
    pub fn counts(&self) -> ReportCounts {
        let mut counts = ReportCounts::default();
        for report in &self.issues {
            match &report.outcome {
                IssueOutcome::Synced { .. } => counts.synced += 1,
                IssueOutcome::Created { .. } => counts.created += 1,
                IssueOutcome::Skipped { .. } => counts.skipped += 1,
                IssueOutcome::Failed { .. } => counts.failed += 1,
            }
            counts.writes += report.intents.iter().filter(|i| i.is_remote_write()).count();
        }
        counts
    }

    pub fn failed(&self) -> impl Iterator<Item = &IssueReport> {
        self.issues
            .iter()
            .filter(|r| matches!(r.outcome, IssueOutcome::Failed { .. }))
    }

    pub fn outcome_of(&self, issue: &IssueRef) -> Option<&IssueOutcome> {
        self.issues
            .iter()
            .find(|r| &r.issue == issue)
            .map(|r| &r.outcome)
    }
}

#[cfg(test)]
mod tests {
    use jirahub_core::types::{IssueStatus, Source};

    use super::*;

    #[test]
    fn counts_by_outcome() {
        let gh = IssueRef::new(Source::Github, "1");
        let report = SyncReport {
            dry_run: true,
            issues: vec![
                IssueReport {
                    issue: gh.clone(),
                    outcome: IssueOutcome::Synced { writes: 1 },
                    intents: vec![WriteIntent::SetStatus {
                        target: IssueRef::new(Source::Jira, "WID-1"),
                        previous: IssueStatus::Open,
                        status: IssueStatus::Closed,
                        status_name: None,
                    }],
                },
                IssueReport {
                    issue: IssueRef::new(Source::Github, "2"),
                    outcome: IssueOutcome::Failed {
                        error: "boom".into(),
                    },
                    intents: vec![],
                },
                IssueReport {
                    issue: IssueRef::new(Source::Jira, "WID-7"),
                    outcome: IssueOutcome::Skipped {
                        reason: "rejected by open_only filter".into(),
                    },
                    intents: vec![],
                },
            ],
            ..SyncReport::default()
        };
        let counts = report.counts();
        assert_eq!((counts.synced, counts.failed, counts.skipped, counts.writes), (1, 1, 1, 1));
        assert_eq!(report.failed().count(), 1);
        assert_eq!(
            report.outcome_of(&gh),
            Some(&IssueOutcome::Synced { writes: 1 })
        );
        assert!(IssueOutcome::Skipped { reason: String::new() }.is_success());
    }
}
