//! Configuration loading, merge-order, and validation integration tests.

use assert_fs::prelude::*;
use jirahub_core::{config, ConfigError, Source, SyncFeature};
use predicates::prelude::predicate;
use rstest::rstest;

const BASE: &str = r#"
jira:
  server: https://jira.example.org
  project_key: PROJ
  metadata_field: customfield_10001
github:
  repository: octo/widgets
"#;

fn write(dir: &assert_fs::TempDir, name: &str, contents: &str) -> std::path::PathBuf {
    let file = dir.child(name);
    file.write_str(contents).expect("write config");
    file.path().to_path_buf()
}

// ---------------------------------------------------------------------------
// 1. Loading and defaults
// ---------------------------------------------------------------------------

#[test]
fn minimal_config_gets_documented_defaults() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let path = write(&dir, "base.yaml", BASE);

    let cfg = config::load(&[path]).expect("load");
    assert_eq!(cfg.jira.project_key, "PROJ");
    assert_eq!(cfg.jira.close_status, "Closed");
    assert_eq!(cfg.jira.reopen_status, "Reopened");
    assert!(cfg.jira.open_status.is_none());
    assert!(cfg.jira.notify_watchers);
    assert!(cfg.jira.is_closed_status("Closed"));
    assert_eq!(cfg.github.api_url, config::DEFAULT_GITHUB_API_URL);
    for source in Source::all() {
        let side = cfg.side(*source);
        assert_eq!(side.max_retries, 3);
        assert_eq!(side.retry_backoff_ms, 500);
        assert!(side.filter.open_only);
        assert!(side.sync.enabled_features().is_empty());
    }
}

#[test]
fn later_files_override_earlier_ones() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let base = write(&dir, "base.yaml", BASE);
    let overlay = write(
        &dir,
        "overlay.yaml",
        r#"
jira:
  project_key: OTHER
  sync:
    sync_status: true
    labels: [jirahub]
github:
  max_retries: 5
  sync:
    sync_comments: true
"#,
    );

    let cfg = config::load(&[base, overlay]).expect("load");
    assert_eq!(cfg.jira.project_key, "OTHER");
    assert_eq!(cfg.jira.server, "https://jira.example.org");
    assert!(cfg.is_enabled(Source::Jira, SyncFeature::SyncStatus));
    assert!(!cfg.is_enabled(Source::Jira, SyncFeature::SyncComments));
    assert!(cfg.is_enabled(Source::Github, SyncFeature::SyncComments));
    assert_eq!(cfg.github.common.max_retries, 5);
    assert!(cfg.jira.common.sync.labels.contains("jirahub"));
}

#[test]
fn hooks_and_filter_deserialize() {
    let yaml = format!(
        "{BASE}\n{}",
        r#"
jira_extra: ignored
"#
    );
    let cfg = config::from_yaml_str(&yaml).expect("extra top-level keys are tolerated");
    assert!(cfg.jira.common.before_issue_create.is_empty());

    let yaml = r#"
jira:
  server: https://jira.example.org
  project_key: PROJ
  metadata_field: customfield_10001
  filter:
    min_created_at: 2020-01-01
    include_labels: [bug]
    exclude_labels: [wontfix]
  before_issue_create:
    - hook: add_labels
      labels: [from-github]
    - hook: set_field
      name: customfield_10010
      value: 5
github:
  repository: octo/widgets
"#;
    let cfg = config::from_yaml_str(yaml).expect("load");
    let filter = &cfg.jira.common.filter;
    assert_eq!(
        filter.min_created_at.map(|d| d.to_rfc3339()),
        Some("2020-01-01T00:00:00+00:00".to_string())
    );
    assert_eq!(cfg.jira.common.before_issue_create.len(), 2);
    assert!(matches!(
        &cfg.jira.common.before_issue_create[1],
        config::HookConfig::SetField { name, value } if name == "customfield_10010" && value == 5
    ));
}

#[test]
fn template_loads_once_required_fields_are_filled() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let template = write(&dir, "template.yaml", config::template());
    let filled = write(&dir, "filled.yaml", BASE);

    let err = config::load(&[template.clone()]).unwrap_err();
    assert!(matches!(err, ConfigError::MissingField("jira.server")), "got: {err}");

    let cfg = config::load(&[template, filled]).expect("template + required fields");
    assert_eq!(cfg.jira.common.defaults.issue_type.as_deref(), Some("Story"));
}

// ---------------------------------------------------------------------------
// 2. Load errors
// ---------------------------------------------------------------------------

#[test]
fn missing_file_reports_path() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let missing = dir.child("nope.yaml");
    let err = config::load(&[missing.path()]).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }), "got: {err}");
    assert!(err.to_string().contains("nope.yaml"));
    missing.assert(predicate::path::missing());
}

#[test]
fn corrupt_yaml_returns_parse_error_with_path() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let path = write(&dir, "broken.yaml", ": : corrupt : yaml : !!!\n  - broken: [unclosed");
    let err = config::load(&[path]).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("broken.yaml"));
}

#[test]
fn no_files_is_an_error() {
    let paths: [&std::path::Path; 0] = [];
    assert!(matches!(config::load(&paths), Err(ConfigError::NoFiles)));
}

// ---------------------------------------------------------------------------
// 3. Validation
// ---------------------------------------------------------------------------

#[rstest]
#[case("jira: {project_key: P, metadata_field: f}\ngithub: {repository: a/b}", "jira.server")]
#[case("jira: {server: 'https://j', metadata_field: f}\ngithub: {repository: a/b}", "jira.project_key")]
#[case("jira: {server: 'https://j', project_key: P}\ngithub: {repository: a/b}", "jira.metadata_field")]
#[case("jira: {server: 'https://j', project_key: P, metadata_field: f}", "github.repository")]
fn missing_required_fields(#[case] yaml: &str, #[case] field: &str) {
    let err = config::from_yaml_str(yaml).unwrap_err();
    assert!(
        matches!(err, ConfigError::MissingField(f) if f == field),
        "expected missing {field}, got: {err}"
    );
}

#[test]
fn invalid_redact_regex_is_rejected() {
    let yaml = format!("{BASE}\n");
    let mut doc: serde_yaml::Value = serde_yaml::from_str(&yaml).expect("yaml");
    config::merge(
        &mut doc,
        serde_yaml::from_str("github: {sync: {redact_patterns: ['(unclosed']}}").expect("yaml"),
    );
    let yaml = serde_yaml::to_string(&doc).expect("yaml");
    let err = config::from_yaml_str(&yaml).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidRegex { .. }), "got: {err}");
    assert!(err.to_string().contains("github.sync.redact_patterns"));
}

#[test]
fn overlapping_include_exclude_labels_conflict() {
    let yaml = format!(
        "{BASE}\n  filter:\n    include_labels: [bug, ui]\n    exclude_labels: [ui]\n"
    );
    let err = config::from_yaml_str(&yaml).unwrap_err();
    match err {
        ConfigError::Conflict { include, values, .. } => {
            assert_eq!(include, "github.filter.include_labels");
            assert_eq!(values, vec!["ui".to_string()]);
        }
        other => panic!("expected conflict, got: {other}"),
    }
}

#[rstest]
#[case("github:\n  repository: not-a-repo\n")]
#[case("jira:\n  server: jira.example.org\n")]
#[case("jira:\n  max_retries: 11\n")]
#[case("jira:\n  close_status: Done\n")]
#[case("jira:\n  reopen_status: CLOSED\n")]
fn invalid_values_are_rejected(#[case] overlay: &str) {
    let mut doc: serde_yaml::Value = serde_yaml::from_str(BASE).expect("yaml");
    config::merge(&mut doc, serde_yaml::from_str(overlay).expect("yaml"));
    let yaml = serde_yaml::to_string(&doc).expect("yaml");
    let err = config::from_yaml_str(&yaml).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { .. }), "got: {err}");
}

#[test]
fn close_status_must_read_back_as_closed() {
    let yaml = BASE.replacen("jira:\n", "jira:\n  close_status: Done\n", 1);
    let err = config::from_yaml_str(&yaml).unwrap_err();
    match err {
        ConfigError::InvalidValue { field, reason } => {
            assert_eq!(field, "jira.close_status");
            assert!(reason.contains("closed_statuses"), "{reason}");
        }
        other => panic!("expected invalid value, got: {other}"),
    }

    let yaml = BASE.replacen(
        "jira:\n",
        "jira:\n  close_status: Done\n  closed_statuses: [done, closed]\n",
        1,
    );
    let cfg = config::from_yaml_str(&yaml).expect("close status among closed statuses");
    assert!(cfg.jira.is_closed_status(&cfg.jira.close_status));
}
