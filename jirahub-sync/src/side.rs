//! Per-destination runtime settings: filter chain, formatter, pre-create
//! hooks and workflow status names, built once per run from [`Config`].

use std::collections::BTreeSet;

use jirahub_core::config::{Config, SideConfig};
use jirahub_core::feature::SyncFeature;
use jirahub_core::types::{IssueStatus, Source};

use crate::error::SyncError;
use crate::filter::FilterChain;
use crate::formatter::Formatter;
use crate::linker::PreCreateHook;

/// JIRA workflow names used when writing a status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusNames {
    pub close: String,
    pub reopen: String,
    pub open: Option<String>,
}

/// Everything the engine needs to write into one service.
pub struct Side {
    pub destination: Source,
    pub settings: SideConfig,
    pub filter: FilterChain,
    pub formatter: Formatter,
    pub hooks: Vec<PreCreateHook>,
    statuses: Option<StatusNames>,
}

impl Side {
    pub fn from_config(config: &Config, destination: Source) -> Result<Self, SyncError> {
        let settings = config.side(destination).clone();
        let statuses = match destination {
            Source::Jira => Some(StatusNames {
                close: config.jira.close_status.clone(),
                reopen: config.jira.reopen_status.clone(),
                open: config.jira.open_status.clone(),
            }),
            Source::Github => None,
        };
        Ok(Self {
            destination,
            filter: FilterChain::from_config(&settings.filter),
            formatter: Formatter::from_config(config, destination)?,
            hooks: settings
                .before_issue_create
                .iter()
                .map(PreCreateHook::from)
                .collect(),
            settings,
            statuses,
        })
    }

    pub fn is_enabled(&self, feature: SyncFeature) -> bool {
        self.settings.sync.is_enabled(feature)
    }

    /// Labels the bot keeps on every linked issue of this side.
    pub fn managed_labels(&self) -> &BTreeSet<String> {
        &self.settings.sync.labels
    }

    /// Workflow status to move an existing issue to.
    pub fn status_name(&self, status: IssueStatus) -> Option<String> {
        self.statuses.as_ref().map(|names| match status {
            IssueStatus::Closed => names.close.clone(),
            IssueStatus::Open => names.reopen.clone(),
        })
    }

    /// Workflow status for a newly created issue.
    pub fn initial_status_name(&self, status: IssueStatus) -> Option<String> {
        let names = self.statuses.as_ref()?;
        match status {
            IssueStatus::Closed => Some(names.close.clone()),
            IssueStatus::Open => names.open.clone(),
        }
    }
}

/// Both sides, addressed by destination.
pub struct Sides {
    pub github: Side,
    pub jira: Side,
}

impl Sides {
    pub fn from_config(config: &Config) -> Result<Self, SyncError> {
        Ok(Self {
            github: Side::from_config(config, Source::Github)?,
            jira: Side::from_config(config, Source::Jira)?,
        })
    }

    pub fn get(&self, destination: Source) -> &Side {
        match destination {
            Source::Github => &self.github,
            Source::Jira => &self.jira,
        }
    }

    pub fn get_mut(&mut self, destination: Source) -> &mut Side {
        match destination {
            Source::Github => &mut self.github,
            Source::Jira => &mut self.jira,
        }
    }
}

#[cfg(test)]
mod tests {
    use jirahub_core::config::HookConfig;

    use super::*;

    fn config() -> Config {
        let mut config = Config::default();
        config.github.repository = "octo/widgets".into();
        config.jira.server = "https://jira.example.org".into();
        config.jira.open_status = Some("Backlog".into());
        config.jira.common.sync.labels = BTreeSet::from(["github".to_string()]);
        config.jira.common.before_issue_create = vec![HookConfig::AddLabels {
            labels: BTreeSet::from(["triage".to_string()]),
        }];
        config
    }

    #[test]
    fn jira_side_uses_workflow_names() {
        let sides = Sides::from_config(&config()).unwrap();
        let jira = sides.get(Source::Jira);
        assert_eq!(jira.status_name(IssueStatus::Closed).as_deref(), Some("Closed"));
        assert_eq!(jira.status_name(IssueStatus::Open).as_deref(), Some("Reopened"));
        assert_eq!(jira.initial_status_name(IssueStatus::Open).as_deref(), Some("Backlog"));
        assert_eq!(jira.hooks.len(), 1);
        assert!(jira.managed_labels().contains("github"));
    }

    #[test]
    fn github_side_has_no_workflow() {
        let sides = Sides::from_config(&config()).unwrap();
        let gh = sides.get(Source::Github);
        assert_eq!(gh.status_name(IssueStatus::Closed), None);
        assert_eq!(gh.initial_status_name(IssueStatus::Closed), None);
        assert!(gh.filter.len() == 1, "open_only is on by default");
    }
}
