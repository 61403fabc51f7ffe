//! Configuration loading, merging and validation.
//!
//! One or more YAML files are read, deep-merged in order (mappings key by
//! key, later scalars and sequences win), deserialized into [`Config`] and
//! validated. Each side's `sync`, `filter`, `defaults` and
//! `before_issue_create` settings govern writes *into* that service, so
//! `jira.sync.sync_status` controls GitHub→JIRA status sync.
//!
//! Credentials never live in configuration files; see [`Credentials`].

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::Value;

use crate::error::{io_err, ConfigError};
use crate::feature::SyncFeature;
use crate::types::Source;

pub const ENV_JIRA_USERNAME: &str = "JIRAHUB_JIRA_USERNAME";
pub const ENV_JIRA_PASSWORD: &str = "JIRAHUB_JIRA_PASSWORD";
pub const ENV_GITHUB_TOKEN: &str = "JIRAHUB_GITHUB_TOKEN";

pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
pub const MAX_RETRIES_LIMIT: u32 = 10;

const TEMPLATE: &str = include_str!("config_template.yaml");

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// Fully merged and validated configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub jira: JiraConfig,
    pub github: GithubConfig,
}

impl Config {
    /// Settings governing writes into `source`.
    pub fn side(&self, source: Source) -> &SideConfig {
        match source {
            Source::Jira => &self.jira.common,
            Source::Github => &self.github.common,
        }
    }

    pub fn is_enabled(&self, source: Source, feature: SyncFeature) -> bool {
        self.side(source).sync.is_enabled(feature)
    }

    pub fn project(&self, source: Source) -> &str {
        match source {
            Source::Jira => &self.jira.project_key,
            Source::Github => &self.github.repository,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JiraConfig {
    /// Base URL of the JIRA deployment.
    pub server: String,
    pub project_key: String,
    /// Custom field id (e.g. `customfield_10001`) holding link metadata.
    pub metadata_field: String,
    /// Optional custom field that receives the linked GitHub issue URL.
    pub github_url_field: Option<String>,
    /// Status names treated as closed, compared case-insensitively.
    pub closed_statuses: BTreeSet<String>,
    pub close_status: String,
    pub reopen_status: String,
    /// Status for newly created issues; the project default when unset.
    pub open_status: Option<String>,
    pub notify_watchers: bool,
    #[serde(flatten)]
    pub common: SideConfig,
}

impl Default for JiraConfig {
    fn default() -> Self {
        Self {
            server: String::new(),
            project_key: String::new(),
            metadata_field: String::new(),
            github_url_field: None,
            closed_statuses: BTreeSet::from(["closed".to_string()]),
            close_status: "Closed".to_string(),
            reopen_status: "Reopened".to_string(),
            open_status: None,
            notify_watchers: true,
            common: SideConfig::default(),
        }
    }
}

impl JiraConfig {
    pub fn is_closed_status(&self, status: &str) -> bool {
        let status = status.to_lowercase();
        self.closed_statuses
            .iter()
            .any(|s| s.to_lowercase() == status)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GithubConfig {
    /// `owner/name`.
    pub repository: String,
    pub api_url: String,
    #[serde(flatten)]
    pub common: SideConfig,
}

impl GithubConfig {
    /// Web root matching `api_url`: `https://github.com` for the public API,
    /// the host root for GitHub Enterprise (`…/api/v3`).
    pub fn web_url(&self) -> String {
        let api = self.api_url.trim_end_matches('/');
        if api == DEFAULT_GITHUB_API_URL {
            return "https://github.com".to_string();
        }
        api.strip_suffix("/api/v3").unwrap_or(api).to_string()
    }
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            repository: String::new(),
            api_url: DEFAULT_GITHUB_API_URL.to_string(),
            common: SideConfig::default(),
        }
    }
}

/// Settings shared by both sides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SideConfig {
    pub max_retries: u32,
    /// Base delay of the exponential retry backoff.
    pub retry_backoff_ms: u64,
    pub sync: SyncConfig,
    pub filter: FilterConfig,
    pub defaults: DefaultsConfig,
    pub before_issue_create: Vec<HookConfig>,
}

impl Default for SideConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_backoff_ms: 500,
            sync: SyncConfig::default(),
            filter: FilterConfig::default(),
            defaults: DefaultsConfig::default(),
            before_issue_create: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SyncConfig {
    pub create_issues: bool,
    pub sync_comments: bool,
    pub sync_status: bool,
    pub sync_labels: bool,
    pub sync_milestones: bool,
    /// Managed labels: added by the bot to every linked issue on this side
    /// and preserved through label sync.
    pub labels: BTreeSet<String>,
    /// Regular expressions whose matches are redacted from text copied in.
    pub redact_patterns: Vec<String>,
}

impl SyncConfig {
    pub fn is_enabled(&self, feature: SyncFeature) -> bool {
        match feature {
            SyncFeature::CreateIssues => self.create_issues,
            SyncFeature::SyncComments => self.sync_comments,
            SyncFeature::SyncStatus => self.sync_status,
            SyncFeature::SyncLabels => self.sync_labels,
            SyncFeature::SyncMilestones => self.sync_milestones,
        }
    }

    pub fn enabled_features(&self) -> Vec<SyncFeature> {
        SyncFeature::all()
            .iter()
            .copied()
            .filter(|f| self.is_enabled(*f))
            .collect()
    }
}

/// Creation filter. Only consulted before creating a new counterpart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    #[serde(deserialize_with = "de_opt_timestamp")]
    pub min_created_at: Option<DateTime<Utc>>,
    pub include_labels: BTreeSet<String>,
    pub exclude_labels: BTreeSet<String>,
    pub open_only: bool,
    pub include_issue_types: BTreeSet<String>,
    pub exclude_issue_types: BTreeSet<String>,
    pub include_components: BTreeSet<String>,
    pub exclude_components: BTreeSet<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_created_at: None,
            include_labels: BTreeSet::new(),
            exclude_labels: BTreeSet::new(),
            open_only: true,
            include_issue_types: BTreeSet::new(),
            exclude_issue_types: BTreeSet::new(),
            include_components: BTreeSet::new(),
            exclude_components: BTreeSet::new(),
        }
    }
}

/// Field values applied to every issue created on this side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DefaultsConfig {
    pub issue_type: Option<String>,
    pub priority: Option<String>,
    pub components: BTreeSet<String>,
}

/// Built-in pre-create hook, applied in configured order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "hook", rename_all = "snake_case")]
pub enum HookConfig {
    AddLabels { labels: BTreeSet<String> },
    SetField { name: String, value: serde_json::Value },
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Service credentials, read from the environment only.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub jira_username: Option<String>,
    pub jira_password: Option<String>,
    pub github_token: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            jira_username: var(ENV_JIRA_USERNAME),
            jira_password: var(ENV_JIRA_PASSWORD),
            github_token: var(ENV_GITHUB_TOKEN),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mask = |v: &Option<String>| v.as_ref().map(|_| "***");
        f.debug_struct("Credentials")
            .field("jira_username", &self.jira_username)
            .field("jira_password", &mask(&self.jira_password))
            .field("github_token", &mask(&self.github_token))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load, merge and validate the configuration files at `paths`.
pub fn load<P: AsRef<Path>>(paths: &[P]) -> Result<Config, ConfigError> {
    if paths.is_empty() {
        return Err(ConfigError::NoFiles);
    }
    let mut merged = Value::Mapping(Default::default());
    for path in paths {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        let doc: Value = serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        merge(&mut merged, doc);
    }
    from_value(merged)
}

/// Parse and validate a single YAML document.
pub fn from_yaml_str(yaml: &str) -> Result<Config, ConfigError> {
    let doc: Value = serde_yaml::from_str(yaml).map_err(ConfigError::Schema)?;
    from_value(doc)
}

fn from_value(doc: Value) -> Result<Config, ConfigError> {
    let doc = match doc {
        Value::Null => Value::Mapping(Default::default()),
        other => other,
    };
    let config: Config = serde_yaml::from_value(doc).map_err(ConfigError::Schema)?;
    validate(&config)?;
    Ok(config)
}

/// Deep-merge `overlay` into `base`.
pub fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base), Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        // An empty overlay document leaves the accumulated config untouched.
        (_, Value::Null) => {}
        (base, overlay) => *base = overlay,
    }
}

/// The commented YAML template printed by `generate-config`.
pub fn template() -> &'static str {
    TEMPLATE
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

pub fn validate(config: &Config) -> Result<(), ConfigError> {
    let jira = &config.jira;
    require(&jira.server, "jira.server")?;
    require(&jira.project_key, "jira.project_key")?;
    require(&jira.metadata_field, "jira.metadata_field")?;
    require(&config.github.repository, "github.repository")?;

    if !(jira.server.starts_with("http://") || jira.server.starts_with("https://")) {
        return Err(ConfigError::InvalidValue {
            field: "jira.server".into(),
            reason: format!("expected an http(s) URL, got '{}'", jira.server),
        });
    }
    if jira.close_status.trim().is_empty() {
        return Err(ConfigError::InvalidValue {
            field: "jira.close_status".into(),
            reason: "must not be empty".into(),
        });
    }
    // Transitions must land on a status that reads back the way it was meant,
    // or every run would plan the same change again.
    if !jira.is_closed_status(&jira.close_status) {
        return Err(ConfigError::InvalidValue {
            field: "jira.close_status".into(),
            reason: format!("'{}' is not one of jira.closed_statuses", jira.close_status),
        });
    }
    if jira.is_closed_status(&jira.reopen_status) {
        return Err(ConfigError::InvalidValue {
            field: "jira.reopen_status".into(),
            reason: format!("'{}' is one of jira.closed_statuses", jira.reopen_status),
        });
    }
    if !is_repository(&config.github.repository) {
        return Err(ConfigError::InvalidValue {
            field: "github.repository".into(),
            reason: format!(
                "expected 'owner/name', got '{}'",
                config.github.repository
            ),
        });
    }

    for source in Source::all() {
        validate_side(source.key(), config.side(*source))?;
    }
    Ok(())
}

fn require(value: &str, field: &'static str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        Err(ConfigError::MissingField(field))
    } else {
        Ok(())
    }
}

fn is_repository(value: &str) -> bool {
    let mut parts = value.split('/');
    let valid = |p: &str| {
        !p.is_empty()
            && p
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    };
    matches!((parts.next(), parts.next(), parts.next()), (Some(owner), Some(name), None) if valid(owner) && valid(name))
}

fn validate_side(section: &str, side: &SideConfig) -> Result<(), ConfigError> {
    if side.max_retries > MAX_RETRIES_LIMIT {
        return Err(ConfigError::InvalidValue {
            field: format!("{section}.max_retries"),
            reason: format!("must be at most {MAX_RETRIES_LIMIT}"),
        });
    }
    for pattern in &side.sync.redact_patterns {
        Regex::new(pattern).map_err(|e| ConfigError::InvalidRegex {
            field: format!("{section}.sync.redact_patterns"),
            source: e,
        })?;
    }
    let filter = &side.filter;
    disjoint(
        section,
        ("include_labels", &filter.include_labels),
        ("exclude_labels", &filter.exclude_labels),
    )?;
    disjoint(
        section,
        ("include_issue_types", &filter.include_issue_types),
        ("exclude_issue_types", &filter.exclude_issue_types),
    )?;
    disjoint(
        section,
        ("include_components", &filter.include_components),
        ("exclude_components", &filter.exclude_components),
    )?;
    for hook in &side.before_issue_create {
        if let HookConfig::SetField { name, .. } = hook {
            if name.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: format!("{section}.before_issue_create"),
                    reason: "set_field requires a field name".into(),
                });
            }
        }
    }
    Ok(())
}

fn disjoint(
    section: &str,
    include: (&str, &BTreeSet<String>),
    exclude: (&str, &BTreeSet<String>),
) -> Result<(), ConfigError> {
    let values: Vec<String> = include.1.intersection(exclude.1).cloned().collect();
    if values.is_empty() {
        return Ok(());
    }
    Err(ConfigError::Conflict {
        include: format!("{section}.filter.{}", include.0),
        exclude: format!("{section}.filter.{}", exclude.0),
        values,
    })
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Parse an RFC 3339 timestamp, or a naive ISO-8601 date/datetime taken as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn de_opt_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(s) => parse_timestamp(&s)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{s}'"))),
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("2020-01-02T03:04:05Z")]
    #[case("2020-01-02T03:04:05+00:00")]
    #[case("2020-01-02T03:04:05")]
    #[case("2020-01-02 03:04:05")]
    fn timestamps_parse_as_utc(#[case] raw: &str) {
        let expected = Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(parse_timestamp(raw), Some(expected));
    }

    #[test]
    fn date_only_timestamp_is_midnight() {
        let expected = Utc.with_ymd_and_hms(2019, 6, 1, 0, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2019-06-01"), Some(expected));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn merge_overrides_scalars_and_keeps_siblings() {
        let mut base: Value =
            serde_yaml::from_str("jira: {server: a, sync: {sync_status: true}}").unwrap();
        let overlay: Value =
            serde_yaml::from_str("jira: {sync: {sync_labels: true}, server: b}").unwrap();
        merge(&mut base, overlay);
        let expected: Value = serde_yaml::from_str(
            "jira: {server: b, sync: {sync_status: true, sync_labels: true}}",
        )
        .unwrap();
        assert_eq!(base, expected);
    }

    #[rstest]
    #[case("https://api.github.com", "https://github.com")]
    #[case("https://github.example.org/api/v3/", "https://github.example.org")]
    fn web_url_follows_api_url(#[case] api_url: &str, #[case] web: &str) {
        let gh = GithubConfig {
            api_url: api_url.to_string(),
            ..GithubConfig::default()
        };
        assert_eq!(gh.web_url(), web);
    }

    #[rstest]
    #[case("octo/repo", true)]
    #[case("spacetelescope/jwst.io", true)]
    #[case("octo", false)]
    #[case("octo/repo/extra", false)]
    #[case("/repo", false)]
    #[case("octo/re po", false)]
    fn repository_format(#[case] value: &str, #[case] ok: bool) {
        assert_eq!(is_repository(value), ok);
    }

    #[test]
    fn closed_status_is_case_insensitive() {
        let jira = JiraConfig {
            closed_statuses: BTreeSet::from(["Done".to_string(), "closed".to_string()]),
            ..JiraConfig::default()
        };
        assert!(jira.is_closed_status("CLOSED"));
        assert!(jira.is_closed_status("done"));
        assert!(!jira.is_closed_status("In Progress"));
    }

    #[test]
    fn credentials_debug_masks_secrets() {
        let creds = Credentials {
            jira_username: Some("bot".into()),
            jira_password: Some("hunter2".into()),
            github_token: Some("ghp_secret".into()),
        };
        let shown = format!("{creds:?}");
        assert!(shown.contains("bot"));
        assert!(!shown.contains("hunter2"));
        assert!(!shown.contains("ghp_secret"));
    }
}
