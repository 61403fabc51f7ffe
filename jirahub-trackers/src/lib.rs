//! # jirahub-trackers
//!
//! Blocking HTTP clients for the two services, both implementing
//! [`jirahub_core::IssueSource`]:
//!
//! - [`github::GithubClient`]: GitHub REST v3, link metadata in a hidden bot comment
//! - [`jira::JiraClient`]: JIRA REST v2, link metadata in a custom field
//!
//! Neither client retries; the engine's executor owns the retry policy.

mod http;

pub mod github;
pub mod jira;
pub mod markers;

pub use github::GithubClient;
pub use jira::JiraClient;

use jirahub_core::{Config, Credentials};

/// Both clients for `config`, authenticated with `credentials`.
///
/// Missing credentials do not fail here; they surface from
/// `check_permissions` and as permission errors on first use.
pub fn connect(config: &Config, credentials: &Credentials) -> (GithubClient, JiraClient) {
    let github = GithubClient::new(&config.github, credentials.github_token.clone());
    let jira = JiraClient::new(
        &config.jira,
        credentials.jira_username.clone(),
        credentials.jira_password.clone(),
    );
    (github, jira)
}

#[cfg(test)]
mod tests {
    use jirahub_core::{IssueSource, Source};

    use super::*;

    #[test]
    fn connect_builds_both_sides() {
        let mut config = Config::default();
        config.github.repository = "octo/widgets".into();
        config.jira.server = "https://jira.example.org".into();
        config.jira.project_key = "WID".into();

        let (github, jira) = connect(&config, &Credentials::default());
        assert_eq!(github.source(), Source::Github);
        assert_eq!(github.project(), "octo/widgets");
        assert_eq!(jira.source(), Source::Jira);
        assert_eq!(jira.project(), "WID");
    }
}
