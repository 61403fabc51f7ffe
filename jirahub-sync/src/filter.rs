//! Creation filter: decides whether an unlinked issue gets a counterpart.
//!
//! Filters are consulted only before creating a new counterpart. Linked
//! pairs keep syncing regardless of what the filter would say today.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use jirahub_core::config::FilterConfig;
use jirahub_core::types::Issue;

/// User-supplied predicate over the normalized issue. It may inspect
/// [`Issue::raw`] for fields the normalization does not expose.
pub type IssuePredicate = Arc<dyn Fn(&Issue) -> bool + Send + Sync>;

/// One predicate in a [`FilterChain`].
#[derive(Clone)]
pub enum IssueFilter {
    CreatedAfter(DateTime<Utc>),
    /// Issue must carry at least one of these labels.
    IncludeLabels(BTreeSet<String>),
    /// Issue must carry none of these labels.
    ExcludeLabels(BTreeSet<String>),
    OpenOnly,
    IncludeIssueTypes(BTreeSet<String>),
    ExcludeIssueTypes(BTreeSet<String>),
    IncludeComponents(BTreeSet<String>),
    ExcludeComponents(BTreeSet<String>),
    Custom(IssuePredicate),
}

impl IssueFilter {
    pub fn accept(&self, issue: &Issue) -> bool {
        match self {
            IssueFilter::CreatedAfter(min) => issue.created_at >= *min,
            IssueFilter::IncludeLabels(set) => issue.labels.iter().any(|l| set.contains(l)),
            IssueFilter::ExcludeLabels(set) => !issue.labels.iter().any(|l| set.contains(l)),
            IssueFilter::OpenOnly => issue.is_open(),
            IssueFilter::IncludeIssueTypes(set) => issue
                .issue_type
                .as_ref()
                .is_some_and(|t| set.contains(t)),
            IssueFilter::ExcludeIssueTypes(set) => !issue
                .issue_type
                .as_ref()
                .is_some_and(|t| set.contains(t)),
            IssueFilter::IncludeComponents(set) => {
                issue.components.iter().any(|c| set.contains(c))
            }
            IssueFilter::ExcludeComponents(set) => {
                !issue.components.iter().any(|c| set.contains(c))
            }
            IssueFilter::Custom(predicate) => predicate(issue),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            IssueFilter::CreatedAfter(_) => "min_created_at",
            IssueFilter::IncludeLabels(_) => "include_labels",
            IssueFilter::ExcludeLabels(_) => "exclude_labels",
            IssueFilter::OpenOnly => "open_only",
            IssueFilter::IncludeIssueTypes(_) => "include_issue_types",
            IssueFilter::ExcludeIssueTypes(_) => "exclude_issue_types",
            IssueFilter::IncludeComponents(_) => "include_components",
            IssueFilter::ExcludeComponents(_) => "exclude_components",
            IssueFilter::Custom(_) => "custom",
        }
    }
}

impl fmt::Debug for IssueFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssueFilter::CreatedAfter(min) => write!(f, "CreatedAfter({min})"),
            IssueFilter::IncludeLabels(s)
            | IssueFilter::ExcludeLabels(s)
            | IssueFilter::IncludeIssueTypes(s)
            | IssueFilter::ExcludeIssueTypes(s)
            | IssueFilter::IncludeComponents(s)
            | IssueFilter::ExcludeComponents(s) => write!(f, "{}({s:?})", self.name()),
            IssueFilter::OpenOnly => write!(f, "OpenOnly"),
            IssueFilter::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Logical AND of built-in filters followed by custom predicates.
///
/// Evaluation stops at the first rejecting filter. Custom predicates always
/// run after every built-in one.
#[derive(Debug, Clone, Default)]
pub struct FilterChain {
    builtin: Vec<IssueFilter>,
    custom: Vec<IssueFilter>,
}

impl FilterChain {
    pub fn from_config(cfg: &FilterConfig) -> Self {
        let mut builtin = Vec::new();
        if let Some(min) = cfg.min_created_at {
            builtin.push(IssueFilter::CreatedAfter(min));
        }
        if !cfg.include_labels.is_empty() {
            builtin.push(IssueFilter::IncludeLabels(cfg.include_labels.clone()));
        }
        if !cfg.exclude_labels.is_empty() {
            builtin.push(IssueFilter::ExcludeLabels(cfg.exclude_labels.clone()));
        }
        if cfg.open_only {
            builtin.push(IssueFilter::OpenOnly);
        }
        if !cfg.include_issue_types.is_empty() {
            builtin.push(IssueFilter::IncludeIssueTypes(cfg.include_issue_types.clone()));
        }
        if !cfg.exclude_issue_types.is_empty() {
            builtin.push(IssueFilter::ExcludeIssueTypes(cfg.exclude_issue_types.clone()));
        }
        if !cfg.include_components.is_empty() {
            builtin.push(IssueFilter::IncludeComponents(cfg.include_components.clone()));
        }
        if !cfg.exclude_components.is_empty() {
            builtin.push(IssueFilter::ExcludeComponents(cfg.exclude_components.clone()));
        }
        Self {
            builtin,
            custom: Vec::new(),
        }
    }

    /// Append a filter. Custom predicates stay behind the built-ins.
    pub fn push(&mut self, filter: IssueFilter) {
        match filter {
            IssueFilter::Custom(_) => self.custom.push(filter),
            other => self.builtin.push(other),
        }
    }

    /// The first filter rejecting `issue`, if any.
    pub fn rejection(&self, issue: &Issue) -> Option<&IssueFilter> {
        self.builtin
            .iter()
            .chain(self.custom.iter())
            .find(|f| !f.accept(issue))
    }

    pub fn accept(&self, issue: &Issue) -> bool {
        self.rejection(issue).is_none()
    }

    pub fn len(&self) -> usize {
        self.builtin.len() + self.custom.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::TimeZone;
    use jirahub_core::types::{IssueId, IssueStatus, LinkMetadata, Source, User};
    use rstest::rstest;

    use super::*;

    fn issue(labels: &[&str], status: IssueStatus) -> Issue {
        let at = Utc.with_ymd_and_hms(2021, 3, 1, 12, 0, 0).unwrap();
        Issue {
            source: Source::Github,
            id: IssueId::from("1"),
            project: "octo/widgets".into(),
            title: "Crash on load".into(),
            body: String::new(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
            milestone: None,
            status,
            raw_status: None,
            issue_type: None,
            priority: None,
            components: BTreeSet::new(),
            author: User::new("octocat", None),
            is_bot: false,
            comments: vec![],
            created_at: at,
            updated_at: at,
            url: None,
            link: LinkMetadata::default(),
            raw: serde_json::Value::Null,
        }
    }

    fn set(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn exclude_wins_over_include() {
        let cfg = FilterConfig {
            include_labels: set(&["bug"]),
            exclude_labels: set(&["wontfix"]),
            open_only: true,
            ..FilterConfig::default()
        };
        let chain = FilterChain::from_config(&cfg);
        let rejected = issue(&["bug", "wontfix"], IssueStatus::Open);
        assert!(!chain.accept(&rejected));
        assert_eq!(chain.rejection(&rejected).map(|f| f.name()), Some("exclude_labels"));
        assert!(chain.accept(&issue(&["bug"], IssueStatus::Open)));
    }

    #[rstest]
    #[case(&["bug"], IssueStatus::Closed, false)]
    #[case(&["docs"], IssueStatus::Open, false)]
    #[case(&["bug", "ui"], IssueStatus::Open, true)]
    fn open_only_and_include(
        #[case] labels: &[&str],
        #[case] status: IssueStatus,
        #[case] accepted: bool,
    ) {
        let cfg = FilterConfig {
            include_labels: set(&["bug"]),
            ..FilterConfig::default()
        };
        assert_eq!(FilterChain::from_config(&cfg).accept(&issue(labels, status)), accepted);
    }

    #[test]
    fn created_after_lower_bound() {
        let cfg = FilterConfig {
            min_created_at: Some(Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap()),
            ..FilterConfig::default()
        };
        let chain = FilterChain::from_config(&cfg);
        assert_eq!(
            chain.rejection(&issue(&[], IssueStatus::Open)).map(|f| f.name()),
            Some("min_created_at")
        );
    }

    #[test]
    fn issue_type_filters_require_a_type() {
        let mut chain = FilterChain::default();
        chain.push(IssueFilter::IncludeIssueTypes(set(&["Bug"])));
        let mut i = issue(&[], IssueStatus::Open);
        assert!(!chain.accept(&i));
        i.issue_type = Some("Bug".into());
        assert!(chain.accept(&i));
    }

    #[test]
    fn custom_runs_last_and_short_circuits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let mut chain = FilterChain::default();
        chain.push(IssueFilter::Custom(Arc::new(move |i: &Issue| {
            seen.fetch_add(1, Ordering::SeqCst);
            i.raw.get("priority").is_some()
        })));
        chain.push(IssueFilter::OpenOnly);

        assert!(!chain.accept(&issue(&[], IssueStatus::Closed)));
        assert_eq!(calls.load(Ordering::SeqCst), 0, "custom must not run after a rejection");

        let mut open = issue(&[], IssueStatus::Open);
        assert!(!chain.accept(&open));
        open.raw = serde_json::json!({"priority": "high"});
        assert!(chain.accept(&open));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
