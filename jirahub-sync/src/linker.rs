//! Linker: resolves which issue on the other service a candidate belongs to.
//!
//! Only persisted [`LinkMetadata`] is authoritative. There is no text
//! matching. An unlinked issue either gets adopted (some issue on the other
//! side already points back at it) or gets a newly created counterpart when
//! the destination allows creation and its filter accepts.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use jirahub_core::config::HookConfig;
use jirahub_core::feature::SyncFeature;
use jirahub_core::types::{CounterpartRef, Issue, IssueFields, IssueRef, LinkMetadata};
use jirahub_markup::{Attribution, AttributionContext, EntityKind};

use crate::error::SyncError;
use crate::side::{Side, Sides};

// ---------------------------------------------------------------------------
// Link state
// ---------------------------------------------------------------------------

/// Where an issue is in the linking lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Unlinked,
    /// Counterpart requested but not yet linked back.
    LinkPending,
    Linked,
}

impl LinkState {
    pub fn of(issue: &Issue) -> Self {
        if issue.link.is_linked() {
            LinkState::Linked
        } else {
            LinkState::Unlinked
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Unlinked => write!(f, "unlinked"),
            LinkState::LinkPending => write!(f, "link-pending"),
            LinkState::Linked => write!(f, "linked"),
        }
    }
}

// ---------------------------------------------------------------------------
// Backlinks
// ---------------------------------------------------------------------------

/// Reverse index of `counterpart` pointers over every fetched issue.
#[derive(Debug, Clone, Default)]
pub struct BacklinkIndex {
    holders: HashMap<IssueRef, IssueRef>,
}

impl BacklinkIndex {
    pub fn build<'a>(issues: impl IntoIterator<Item = &'a Issue>) -> Self {
        let mut holders = HashMap::new();
        for issue in issues {
            if let Some(counterpart) = issue.counterpart() {
                holders.insert(counterpart.issue_ref(), issue.reference());
            }
        }
        Self { holders }
    }

    /// The issue whose metadata points at `target`.
    pub fn holder_of(&self, target: &IssueRef) -> Option<&IssueRef> {
        self.holders.get(target)
    }

    pub fn insert(&mut self, target: IssueRef, holder: IssueRef) {
        self.holders.insert(target, holder);
    }
}

// ---------------------------------------------------------------------------
// Pre-create hooks
// ---------------------------------------------------------------------------

/// Receives the source issue and the accumulated fields, returns the fields
/// to continue with.
pub type FieldsHook = Arc<dyn Fn(&Issue, IssueFields) -> IssueFields + Send + Sync>;

/// One step run on the initial field set before a counterpart is created.
#[derive(Clone)]
pub enum PreCreateHook {
    AddLabels(Vec<String>),
    SetField { name: String, value: Value },
    Custom(FieldsHook),
}

impl PreCreateHook {
    pub fn apply(&self, issue: &Issue, mut fields: IssueFields) -> IssueFields {
        match self {
            PreCreateHook::AddLabels(labels) => {
                fields.labels.extend(labels.iter().cloned());
                fields
            }
            PreCreateHook::SetField { name, value } => {
                set_field(&mut fields, name, value);
                fields
            }
            PreCreateHook::Custom(hook) => hook(issue, fields),
        }
    }
}

impl From<&HookConfig> for PreCreateHook {
    fn from(cfg: &HookConfig) -> Self {
        match cfg {
            HookConfig::AddLabels { labels } => {
                PreCreateHook::AddLabels(labels.iter().cloned().collect())
            }
            HookConfig::SetField { name, value } => PreCreateHook::SetField {
                name: name.clone(),
                value: value.clone(),
            },
        }
    }
}

impl fmt::Debug for PreCreateHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreCreateHook::AddLabels(labels) => write!(f, "AddLabels({labels:?})"),
            PreCreateHook::SetField { name, value } => write!(f, "SetField({name}={value})"),
            PreCreateHook::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn as_text_set(value: &Value) -> BTreeSet<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(as_text).collect(),
        other => as_text(other).into_iter().collect(),
    }
}

fn set_field(fields: &mut IssueFields, name: &str, value: &Value) {
    match name {
        "title" => fields.title = as_text(value).unwrap_or_default(),
        "body" => fields.body = as_text(value).unwrap_or_default(),
        "milestone" => fields.milestone = as_text(value),
        "issue_type" => fields.issue_type = as_text(value),
        "priority" => fields.priority = as_text(value),
        "labels" => fields.labels = as_text_set(value),
        "components" => fields.components = as_text_set(value),
        other => {
            fields.extra.insert(other.to_string(), value.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// What to do with one candidate issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Already linked to this issue on the other service.
    Linked(IssueRef),
    /// Unlinked, but the given issue already points back at it.
    Adopt(IssueRef),
    /// Create a counterpart.
    Create,
    Skip(String),
}

/// Stateless resolver over the per-run [`Sides`].
pub struct Linker<'a> {
    sides: &'a Sides,
    attribution: &'a Attribution,
}

impl<'a> Linker<'a> {
    pub fn new(sides: &'a Sides, attribution: &'a Attribution) -> Self {
        Self { sides, attribution }
    }

    pub fn resolve(&self, issue: &Issue, backlinks: &BacklinkIndex) -> Resolution {
        let other = issue.source.other();
        if let Some(counterpart) = issue.counterpart() {
            if counterpart.source == other {
                return Resolution::Linked(counterpart.issue_ref());
            }
            return Resolution::Skip(format!(
                "counterpart metadata points at {} instead of {other}",
                counterpart.source
            ));
        }
        if let Some(holder) = backlinks.holder_of(&issue.reference()) {
            if holder.source == other {
                return Resolution::Adopt(holder.clone());
            }
        }
        if issue.is_bot {
            return Resolution::Skip("created by the sync account".to_string());
        }
        let destination = self.sides.get(other);
        if !destination.is_enabled(SyncFeature::CreateIssues) {
            return Resolution::Skip(format!("issue creation on {other} is disabled"));
        }
        if let Some(rejected) = destination.filter.rejection(issue) {
            tracing::debug!(issue = %issue.reference(), filter = rejected.name(), "filter rejected issue");
            return Resolution::Skip(format!("rejected by {} filter", rejected.name()));
        }
        Resolution::Create
    }

    /// Field set for a new counterpart of `issue`, hooks applied in order.
    pub fn initial_fields(&self, issue: &Issue) -> Result<IssueFields, SyncError> {
        let origin = self.sides.get(issue.source);
        let destination = self.sides.get(issue.source.other());

        let body = self.attribution.attach(
            destination.destination,
            EntityKind::Issue,
            &AttributionContext::for_issue(issue),
            &destination.formatter.body(issue),
        )?;

        let mut labels = destination.managed_labels().clone();
        if destination.is_enabled(SyncFeature::SyncLabels) {
            labels.extend(core_labels(issue, origin));
        }

        let status = if destination.is_enabled(SyncFeature::SyncStatus) {
            issue.status
        } else {
            Default::default()
        };

        let defaults = &destination.settings.defaults;
        let mut fields = IssueFields {
            title: destination.formatter.title(issue),
            body,
            labels,
            milestone: if destination.is_enabled(SyncFeature::SyncMilestones) {
                issue.milestone.clone()
            } else {
                None
            },
            status,
            status_name: destination.initial_status_name(status),
            issue_type: defaults.issue_type.clone(),
            priority: defaults.priority.clone(),
            components: defaults.components.clone(),
            extra: Default::default(),
            link: LinkMetadata::linked_to(CounterpartRef::to_issue(issue)),
        };
        for hook in &destination.hooks {
            fields = hook.apply(issue, fields);
        }
        Ok(fields)
    }
}

/// Labels of `issue` that are not managed by the bot on its own side.
pub(crate) fn core_labels(issue: &Issue, own_side: &Side) -> BTreeSet<String> {
    issue
        .labels
        .difference(own_side.managed_labels())
        .cloned()
        .collect()
}

/// Whether `issue` is a bot-owned mirror created from `origin`.
pub(crate) fn is_mirror_of(issue: &Issue, origin: &Issue) -> bool {
    issue.is_bot
        && !origin.is_bot
        && issue
            .counterpart()
            .is_some_and(|c| c.issue_ref() == origin.reference())
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use jirahub_core::config::Config;
    use jirahub_core::types::{IssueId, IssueStatus, Source, User};
    use serde_json::json;

    use super::*;
    use crate::filter::IssueFilter;

    fn issue(source: Source, id: &str, labels: &[&str]) -> Issue {
        let at = Utc.with_ymd_and_hms(2021, 3, 1, 12, 0, 0).unwrap();
        Issue {
            source,
            id: IssueId::from(id),
            project: match source {
                Source::Github => "octo/widgets".into(),
                Source::Jira => "WID".into(),
            },
            title: "Crash on load".into(),
            body: "It **crashes**.".into(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
            milestone: Some("v1.0".into()),
            status: IssueStatus::Open,
            raw_status: None,
            issue_type: None,
            priority: None,
            components: BTreeSet::new(),
            author: User::new("octocat", Some("Mona".into())),
            is_bot: false,
            comments: vec![],
            created_at: at,
            updated_at: at,
            url: Some(format!("https://github.com/octo/widgets/issues/{id}")),
            link: LinkMetadata::default(),
            raw: serde_json::Value::Null,
        }
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.github.repository = "octo/widgets".into();
        config.jira.server = "https://jira.example.org".into();
        config.jira.project_key = "WID".into();
        let jira = &mut config.jira.common;
        jira.sync.create_issues = true;
        jira.sync.sync_labels = true;
        jira.sync.sync_milestones = true;
        jira.sync.labels = BTreeSet::from(["github".to_string()]);
        jira.filter.include_labels = BTreeSet::from(["sync-me".to_string()]);
        jira.defaults.issue_type = Some("Bug".into());
        jira.before_issue_create = vec![
            HookConfig::AddLabels {
                labels: BTreeSet::from(["triage".to_string()]),
            },
            HookConfig::SetField {
                name: "customfield_10002".into(),
                value: json!({"value": "Platform"}),
            },
        ];
        config.github.common.sync.labels = BTreeSet::from(["jira".to_string()]);
        config
    }

    #[test]
    fn linked_issue_resolves_to_counterpart() {
        let sides = Sides::from_config(&config()).unwrap();
        let attribution = Attribution::new().unwrap();
        let linker = Linker::new(&sides, &attribution);
        let mut gh = issue(Source::Github, "1", &[]);
        gh.link = LinkMetadata::linked_to(CounterpartRef {
            source: Source::Jira,
            project: "WID".into(),
            id: IssueId::from("WID-4"),
            url: None,
        });
        assert_eq!(LinkState::of(&gh), LinkState::Linked);
        assert_eq!(
            linker.resolve(&gh, &BacklinkIndex::default()),
            Resolution::Linked(IssueRef::new(Source::Jira, "WID-4"))
        );
    }

    #[test]
    fn backlink_adopts_instead_of_creating() {
        let sides = Sides::from_config(&config()).unwrap();
        let attribution = Attribution::new().unwrap();
        let linker = Linker::new(&sides, &attribution);
        let gh = issue(Source::Github, "1", &["sync-me"]);
        let mut jira = issue(Source::Jira, "WID-9", &[]);
        jira.link = LinkMetadata::linked_to(CounterpartRef::to_issue(&gh));
        let index = BacklinkIndex::build([&gh, &jira]);
        assert_eq!(
            linker.resolve(&gh, &index),
            Resolution::Adopt(jira.reference())
        );
    }

    #[test]
    fn creation_requires_filter_and_flag() {
        let sides = Sides::from_config(&config()).unwrap();
        let attribution = Attribution::new().unwrap();
        let linker = Linker::new(&sides, &attribution);
        let index = BacklinkIndex::default();

        assert_eq!(
            linker.resolve(&issue(Source::Github, "1", &["sync-me"]), &index),
            Resolution::Create
        );
        assert_eq!(
            linker.resolve(&issue(Source::Github, "2", &["other"]), &index),
            Resolution::Skip("rejected by include_labels filter".into())
        );
        assert!(matches!(
            linker.resolve(&issue(Source::Jira, "WID-1", &[]), &index),
            Resolution::Skip(reason) if reason.contains("disabled")
        ));

        let mut bot = issue(Source::Github, "3", &["sync-me"]);
        bot.is_bot = true;
        assert!(matches!(linker.resolve(&bot, &index), Resolution::Skip(_)));
    }

    #[test]
    fn custom_filter_runs_after_builtins() {
        let mut sides = Sides::from_config(&config()).unwrap();
        sides
            .get_mut(Source::Jira)
            .filter
            .push(IssueFilter::Custom(Arc::new(|i: &Issue| i.id.0 != "7")));
        let attribution = Attribution::new().unwrap();
        let linker = Linker::new(&sides, &attribution);
        assert_eq!(
            linker.resolve(&issue(Source::Github, "7", &["sync-me"]), &BacklinkIndex::default()),
            Resolution::Skip("rejected by custom filter".into())
        );
    }

    #[test]
    fn initial_fields_apply_mapping_defaults_and_hooks() {
        let sides = Sides::from_config(&config()).unwrap();
        let attribution = Attribution::new().unwrap();
        let linker = Linker::new(&sides, &attribution);
        let gh = issue(Source::Github, "1", &["sync-me", "jira"]);

        let fields = linker.initial_fields(&gh).unwrap();
        assert_eq!(fields.title, "Crash on load");
        assert!(fields.body.starts_with("It *crashes*."), "{}", fields.body);
        assert!(fields.body.contains("Mona"), "{}", fields.body);
        assert_eq!(
            fields.labels,
            BTreeSet::from(["github".to_string(), "sync-me".to_string(), "triage".to_string()])
        );
        assert_eq!(fields.milestone.as_deref(), Some("v1.0"));
        assert_eq!(fields.status, IssueStatus::Open);
        assert_eq!(fields.issue_type.as_deref(), Some("Bug"));
        assert_eq!(fields.extra["customfield_10002"], json!({"value": "Platform"}));
        assert_eq!(
            fields.link.counterpart.map(|c| c.issue_ref()),
            Some(gh.reference())
        );
    }

    #[test]
    fn custom_hook_sees_accumulated_fields() {
        let mut sides = Sides::from_config(&config()).unwrap();
        sides
            .get_mut(Source::Jira)
            .hooks
            .push(PreCreateHook::Custom(Arc::new(|issue: &Issue, mut fields: IssueFields| {
                assert!(fields.labels.contains("triage"));
                fields.title = format!("[GH-{}] {}", issue.id, fields.title);
                fields
            })));
        let attribution = Attribution::new().unwrap();
        let linker = Linker::new(&sides, &attribution);
        let fields = linker
            .initial_fields(&issue(Source::Github, "1", &["sync-me"]))
            .unwrap();
        assert_eq!(fields.title, "[GH-1] Crash on load");
    }

    #[test]
    fn set_field_maps_known_names() {
        let mut fields = IssueFields::default();
        set_field(&mut fields, "priority", &json!("High"));
        set_field(&mut fields, "components", &json!(["api", "ui"]));
        set_field(&mut fields, "milestone", &Value::Null);
        assert_eq!(fields.priority.as_deref(), Some("High"));
        assert_eq!(fields.components.len(), 2);
        assert_eq!(fields.milestone, None);
        assert!(fields.extra.is_empty());
    }
}
