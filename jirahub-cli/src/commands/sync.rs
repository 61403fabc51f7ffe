//! `jirahub sync`: run one reconciliation pass.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use jirahub_core::config::{
    parse_timestamp, ENV_GITHUB_TOKEN, ENV_JIRA_PASSWORD, ENV_JIRA_USERNAME,
};
use jirahub_core::Credentials;
use jirahub_sync::{pipeline, state_store, IssueOutcome, RunOptions, SyncEngine, SyncReport};

use super::load_config;

/// Arguments for `jirahub sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Configuration files, merged in order.
    #[arg(required = true, value_name = "CONFIG")]
    pub configs: Vec<PathBuf>,

    /// Consider issues updated at or after this time instead of the stored
    /// cursor (ISO-8601, UTC when no offset is given).
    #[arg(long, value_parser = parse_min_updated_at)]
    pub min_updated_at: Option<DateTime<Utc>>,

    /// Sync state file (default: ~/.jirahub/state.json).
    #[arg(long)]
    pub state_path: Option<PathBuf>,

    /// Compute and report writes without making them or saving state.
    #[arg(long)]
    pub dry_run: bool,
}

fn parse_min_updated_at(value: &str) -> Result<DateTime<Utc>, String> {
    parse_timestamp(value).ok_or_else(|| format!("invalid timestamp '{value}'"))
}

/// Environment variables that are unset or empty.
fn missing_credentials(credentials: &Credentials) -> Vec<&'static str> {
    [
        (ENV_JIRA_USERNAME, &credentials.jira_username),
        (ENV_JIRA_PASSWORD, &credentials.jira_password),
        (ENV_GITHUB_TOKEN, &credentials.github_token),
    ]
    .into_iter()
    .filter(|(_, value)| value.is_none())
    .map(|(name, _)| name)
    .collect()
}

impl SyncArgs {
    pub fn run(self, verbose: bool) -> Result<ExitCode> {
        let config = load_config(&self.configs)?;
        let credentials = Credentials::from_env();
        let missing = missing_credentials(&credentials);
        if !missing.is_empty() {
            bail!("missing credentials: set {}", missing.join(", "));
        }

        let state_path = match self.state_path {
            Some(path) => path,
            None => {
                let home = dirs::home_dir().context("could not determine home directory")?;
                state_store::default_path_at(&home)
            }
        };

        tracing::info!(state = %state_path.display(), dry_run = self.dry_run, "starting sync");
        let (github, jira) = jirahub_trackers::connect(&config, &credentials);
        let engine = SyncEngine::new(&config, &github, &jira)
            .context("failed to prepare sync engine")?;
        let options = RunOptions {
            dry_run: self.dry_run,
            min_updated_at: self.min_updated_at,
        };
        let report = pipeline::run(&engine, &state_path, &options).context("sync failed")?;

        print_report(&report, verbose);
        Ok(ExitCode::SUCCESS)
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Tabled)]
struct IssueRow {
    #[tabled(rename = "issue")]
    issue: String,
    #[tabled(rename = "outcome")]
    outcome: String,
    #[tabled(rename = "detail")]
    detail: String,
    #[tabled(rename = "writes")]
    writes: usize,
}

fn outcome_row(outcome: &IssueOutcome) -> (String, String) {
    match outcome {
        IssueOutcome::Synced { .. } => ("synced".into(), String::new()),
        IssueOutcome::Created {
            counterpart: Some(created),
        } => ("created".into(), created.to_string()),
        IssueOutcome::Created { counterpart: None } => ("created".into(), String::new()),
        IssueOutcome::Skipped { reason } => ("skipped".into(), reason.clone()),
        IssueOutcome::Failed { error } => ("failed".into(), error.clone()),
    }
}

fn print_report(report: &SyncReport, verbose: bool) {
    let prefix = if report.dry_run { "[dry-run] " } else { "" };
    let counts = report.counts();

    if report.issues.is_empty() {
        println!("{prefix}✓ nothing to sync");
        return;
    }

    println!(
        "{prefix}✓ sync complete ({} synced, {} created, {} skipped, {} failed, {} writes)",
        counts.synced, counts.created, counts.skipped, counts.failed, counts.writes
    );

    for failed in report.failed() {
        if let IssueOutcome::Failed { error } = &failed.outcome {
            println!("  {}  {}: {error}", "✗".red(), failed.issue);
        }
    }

    if !verbose {
        return;
    }

    let rows: Vec<IssueRow> = report
        .issues
        .iter()
        .map(|r| {
            let (outcome, detail) = outcome_row(&r.outcome);
            IssueRow {
                issue: r.issue.to_string(),
                outcome,
                detail,
                writes: r.intents.iter().filter(|i| i.is_remote_write()).count(),
            }
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    for intent in report.issues.iter().flat_map(|r| &r.intents) {
        println!("{prefix}  ~  {intent}");
        if let Some(diff) = intent.diff() {
            print!("{diff}");
            if !diff.ends_with('\n') {
                println!();
            }
        }
    }

    match report.next_cursor {
        Some(cursor) => println!("next cursor: {}", cursor.to_rfc3339()),
        None => println!("next cursor: (none)"),
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn min_updated_at_accepts_naive_and_offset_times() {
        let expected = Utc.with_ymd_and_hms(1983, 11, 20, 11, 0, 0).unwrap();
        assert_eq!(parse_min_updated_at("1983-11-20T11:00:00"), Ok(expected));
        assert_eq!(parse_min_updated_at("1983-11-20T12:00:00+01:00"), Ok(expected));
        assert!(parse_min_updated_at("yesterday").is_err());
    }

    #[test]
    fn missing_credentials_are_listed_by_variable() {
        let credentials = Credentials {
            jira_username: Some("bot".into()),
            ..Credentials::default()
        };
        assert_eq!(
            missing_credentials(&credentials),
            vec![ENV_JIRA_PASSWORD, ENV_GITHUB_TOKEN]
        );
    }
}
