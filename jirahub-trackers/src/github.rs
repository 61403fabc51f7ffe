//! GitHub REST v3 client.
//!
//! Pull requests share the issue endpoints and are dropped from every
//! listing. Link metadata lives in a bot-authored comment (see
//! [`crate::markers`]); that comment never surfaces as an issue comment.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use jirahub_core::config::ENV_GITHUB_TOKEN;
use jirahub_core::{
    Comment, CommentId, FieldChanges, GithubConfig, Issue, IssueFields, IssueId, IssueRef,
    IssueSource, IssueStatus, IssueStream, LinkMetadata, NewComment, Source, SyncFeature,
    TrackerError, TrackerResult, User,
};

use crate::http::{next_link, paginate, Http, Page};
use crate::markers;

const SERVICE: &str = "GitHub";
const ACCEPT: &str = "application/vnd.github+json";
const PER_PAGE: &str = "100";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct RawLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawMilestone {
    number: u64,
    title: String,
}

#[derive(Debug, Deserialize)]
struct RawIssue {
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    labels: Vec<RawLabel>,
    #[serde(default)]
    milestone: Option<RawMilestone>,
    state: String,
    user: RawUser,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    html_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawComment {
    id: u64,
    user: RawUser,
    #[serde(default)]
    body: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
struct RawPermissions {
    #[serde(default)]
    push: bool,
}

#[derive(Debug, Deserialize)]
struct RawRepo {
    #[serde(default)]
    permissions: Option<RawPermissions>,
}

// ---------------------------------------------------------------------------
// Mapping
// ---------------------------------------------------------------------------

fn decode<T: for<'de> Deserialize<'de>>(value: Value) -> TrackerResult<T> {
    serde_json::from_value(value).map_err(|e| TrackerError::decode(SERVICE, e.to_string()))
}

fn is_pull_request(value: &Value) -> bool {
    value.get("pull_request").is_some_and(|pr| !pr.is_null())
}

fn comment_from_raw(raw: Value, bot: &str) -> TrackerResult<Comment> {
    let parsed: RawComment = decode(raw.clone())?;
    let (body, mirror_of) =
        markers::split_comment(Source::Github, parsed.body.as_deref().unwrap_or_default());
    Ok(Comment {
        id: CommentId::from(parsed.id.to_string()),
        is_bot: parsed.user.login == bot,
        author: User::new(parsed.user.login, None),
        body,
        created_at: parsed.created_at,
        updated_at: parsed.updated_at,
        mirror_of,
        raw,
    })
}

/// Split raw comments into the link metadata and the visible comments.
///
/// Only a metadata block authored by `bot` counts; anyone else's copy is
/// treated as an ordinary comment.
fn split_comments(raw: Vec<Value>, bot: &str) -> TrackerResult<(LinkMetadata, Vec<Comment>)> {
    let mut link = LinkMetadata::default();
    let mut comments = Vec::with_capacity(raw.len());
    for value in raw {
        let comment = comment_from_raw(value, bot)?;
        if comment.is_bot && markers::is_metadata_comment(&comment.body) {
            link = markers::decode_metadata(&comment.body)
                .map_err(|e| TrackerError::decode(SERVICE, e.to_string()))?;
            continue;
        }
        comments.push(comment);
    }
    Ok((link, comments))
}

fn issue_from_raw(
    repository: &str,
    raw: Value,
    comments: Vec<Value>,
    bot: &str,
) -> TrackerResult<Issue> {
    let parsed: RawIssue = decode(raw.clone())?;
    let (link, comments) = split_comments(comments, bot)?;
    let status = if parsed.state.eq_ignore_ascii_case("closed") {
        IssueStatus::Closed
    } else {
        IssueStatus::Open
    };
    Ok(Issue {
        source: Source::Github,
        id: IssueId::from(parsed.number.to_string()),
        project: repository.to_string(),
        title: parsed.title,
        body: parsed.body.unwrap_or_default(),
        labels: parsed.labels.into_iter().map(|l| l.name).collect(),
        milestone: parsed.milestone.map(|m| m.title),
        status,
        raw_status: None,
        issue_type: None,
        priority: None,
        components: BTreeSet::new(),
        is_bot: parsed.user.login == bot,
        author: User::new(parsed.user.login, None),
        comments,
        created_at: parsed.created_at,
        updated_at: parsed.updated_at,
        url: parsed.html_url,
        link,
        raw,
    })
}

fn state_name(status: IssueStatus) -> &'static str {
    match status {
        IssueStatus::Open => "open",
        IssueStatus::Closed => "closed",
    }
}

/// Problems preventing the sync from writing `features` into a repository
/// with the given push access.
fn push_problems(repository: &str, push: bool, features: &[SyncFeature]) -> Vec<String> {
    if push {
        return Vec::new();
    }
    features
        .iter()
        .filter(|f| f.needs_github_push())
        .map(|f| {
            format!(
                "github.sync.{} is enabled, but the token lacks push access to {repository}.",
                f.key()
            )
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct GithubClient {
    http: Http,
    repository: String,
    /// Login of the token's account, fetched on first use.
    bot: Mutex<Option<String>>,
    /// Milestone title -> number, fetched on first use.
    milestones: Mutex<Option<BTreeMap<String, u64>>>,
}

impl GithubClient {
    pub fn new(config: &GithubConfig, token: Option<String>) -> Self {
        let authorization = token.map(|t| format!("Bearer {t}"));
        Self {
            http: Http::new(SERVICE, &config.api_url, authorization, ACCEPT),
            repository: config.repository.clone(),
            bot: Mutex::new(None),
            milestones: Mutex::new(None),
        }
    }

    fn repo_path(&self, rest: &str) -> String {
        format!("/repos/{}{rest}", self.repository)
    }

    fn bot_login(&self) -> TrackerResult<String> {
        let mut cached = self.bot.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(login) = cached.as_ref() {
            return Ok(login.clone());
        }
        let user: RawUser = self.http.get_json("/user", &[])?;
        tracing::debug!(login = %user.login, "resolved GitHub sync account");
        *cached = Some(user.login.clone());
        Ok(user.login)
    }

    /// Every page behind `first`, collected.
    fn collect_pages(&self, first: String) -> TrackerResult<Vec<Value>> {
        paginate(first, |url| self.page(url)).collect()
    }

    fn page(&self, url: &str) -> TrackerResult<Page<Value>> {
        let response = self.http.send("GET", url, &[], None)?;
        let next = next_link(response.header("link"));
        let items: Vec<Value> = self.http.decode(response)?;
        Ok(Page { items, next })
    }

    fn raw_comments(&self, number: &str) -> TrackerResult<Vec<Value>> {
        let first = self.http.url(&self.repo_path(&format!(
            "/issues/{number}/comments?per_page={PER_PAGE}"
        )));
        self.collect_pages(first)
    }

    fn full_issue(&self, raw: Value, bot: &str) -> TrackerResult<Issue> {
        let number = raw
            .get("number")
            .and_then(Value::as_u64)
            .ok_or_else(|| TrackerError::decode(SERVICE, "issue without a number"))?;
        let comments = self.raw_comments(&number.to_string())?;
        issue_from_raw(&self.repository, raw, comments, bot)
    }

    fn milestone_number(&self, title: &str) -> TrackerResult<Option<u64>> {
        let mut cached = self.milestones.lock().unwrap_or_else(|e| e.into_inner());
        if cached.is_none() {
            let first = self.http.url(&self.repo_path(&format!(
                "/milestones?state=all&per_page={PER_PAGE}"
            )));
            let mut map = BTreeMap::new();
            for raw in self.collect_pages(first)? {
                let milestone: RawMilestone = decode(raw)?;
                map.insert(milestone.title, milestone.number);
            }
            *cached = Some(map);
        }
        Ok(cached.as_ref().and_then(|m| m.get(title).copied()))
    }

    /// JSON value for a milestone field, or `None` when the title does not
    /// exist in the repository.
    fn milestone_value(&self, title: Option<&str>) -> TrackerResult<Option<Value>> {
        let Some(title) = title else {
            return Ok(Some(Value::Null));
        };
        match self.milestone_number(title)? {
            Some(number) => Ok(Some(json!(number))),
            None => {
                tracing::warn!(
                    repository = %self.repository,
                    milestone = title,
                    "milestone does not exist on GitHub, leaving it unset"
                );
                Ok(None)
            }
        }
    }

    /// Create or replace the metadata comment on issue `number`.
    fn write_link(&self, number: &str, link: &LinkMetadata) -> TrackerResult<()> {
        let bot = self.bot_login()?;
        let body = markers::encode_metadata(link)
            .map_err(|e| TrackerError::decode(SERVICE, e.to_string()))?;
        let existing = self
            .raw_comments(number)?
            .into_iter()
            .map(|raw| comment_from_raw(raw, &bot))
            .collect::<TrackerResult<Vec<_>>>()?
            .into_iter()
            .find(|c| c.is_bot && markers::is_metadata_comment(&c.body));
        match existing {
            Some(comment) if comment.body == body => Ok(()),
            Some(comment) => {
                let path = self.repo_path(&format!("/issues/comments/{}", comment.id));
                self.http
                    .send_json::<Value>("PATCH", &path, &[], &json!({ "body": body }))?;
                Ok(())
            }
            None => {
                let path = self.repo_path(&format!("/issues/{number}/comments"));
                self.http
                    .send_json::<Value>("POST", &path, &[], &json!({ "body": body }))?;
                Ok(())
            }
        }
    }

    fn comment_body(comment: &NewComment) -> String {
        match &comment.mirror_of {
            Some(origin) => markers::mark_comment(Source::Github, &comment.body, origin),
            None => comment.body.clone(),
        }
    }
}

impl IssueSource for GithubClient {
    fn source(&self) -> Source {
        Source::Github
    }

    fn project(&self) -> &str {
        &self.repository
    }

    fn list_issues(&self, updated_since: Option<DateTime<Utc>>) -> IssueStream<'_> {
        let bot = match self.bot_login() {
            Ok(bot) => bot,
            Err(err) => return Box::new(std::iter::once(Err(err))),
        };
        let mut first = self.http.url(&self.repo_path(&format!(
            "/issues?state=all&sort=updated&direction=asc&per_page={PER_PAGE}"
        )));
        if let Some(since) = updated_since {
            first.push_str("&since=");
            first.push_str(&since.to_rfc3339_opts(SecondsFormat::Secs, true));
        }
        Box::new(paginate(first, move |url| {
            let page = self.page(url)?;
            let items = page
                .items
                .into_iter()
                .filter(|raw| !is_pull_request(raw))
                .map(|raw| self.full_issue(raw, &bot))
                .collect::<TrackerResult<Vec<_>>>()?;
            Ok(Page {
                items,
                next: page.next,
            })
        }))
    }

    fn get_issue(&self, id: &IssueId) -> TrackerResult<Option<Issue>> {
        if id.0.parse::<u64>().is_err() {
            return Ok(None);
        }
        let Some(raw) = self
            .http
            .get_optional::<Value>(&self.repo_path(&format!("/issues/{id}")), &[])?
        else {
            return Ok(None);
        };
        if is_pull_request(&raw) {
            return Ok(None);
        }
        let bot = self.bot_login()?;
        self.full_issue(raw, &bot).map(Some)
    }

    fn list_comments(&self, issue: &IssueRef) -> TrackerResult<Vec<Comment>> {
        let bot = self.bot_login()?;
        let (_, comments) = split_comments(self.raw_comments(&issue.id.0)?, &bot)?;
        Ok(comments)
    }

    fn create_issue(&self, fields: &IssueFields) -> TrackerResult<Issue> {
        let bot = self.bot_login()?;
        let mut payload = Map::new();
        payload.insert("title".into(), json!(fields.title));
        payload.insert("body".into(), json!(fields.body));
        if !fields.labels.is_empty() {
            payload.insert("labels".into(), json!(fields.labels));
        }
        if let Some(title) = fields.milestone.as_deref() {
            if let Some(value) = self.milestone_value(Some(title))? {
                payload.insert("milestone".into(), value);
            }
        }
        let raw: Value =
            self.http
                .send_json("POST", &self.repo_path("/issues"), &[], &Value::Object(payload))?;
        let mut issue = issue_from_raw(&self.repository, raw, Vec::new(), &bot)?;
        tracing::info!(repository = %self.repository, issue = %issue.id, "created GitHub issue");

        if fields.status == IssueStatus::Closed {
            let path = self.repo_path(&format!("/issues/{}", issue.id));
            self.http
                .send_json::<Value>("PATCH", &path, &[], &json!({ "state": "closed" }))?;
            issue.status = IssueStatus::Closed;
        }
        if fields.link.is_linked() {
            self.write_link(&issue.id.0, &fields.link)?;
            issue.link = fields.link.clone();
        }
        Ok(issue)
    }

    fn update_issue(&self, issue: &IssueRef, changes: &FieldChanges) -> TrackerResult<()> {
        let mut payload = Map::new();
        if let Some(title) = &changes.title {
            payload.insert("title".into(), json!(title));
        }
        if let Some(body) = &changes.body {
            payload.insert("body".into(), json!(body));
        }
        if let Some(labels) = &changes.labels {
            payload.insert("labels".into(), json!(labels));
        }
        if let Some(milestone) = &changes.milestone {
            if let Some(value) = self.milestone_value(milestone.as_deref())? {
                payload.insert("milestone".into(), value);
            }
        }
        if let Some(status) = changes.status {
            payload.insert("state".into(), json!(state_name(status)));
        }
        if !payload.is_empty() {
            let path = self.repo_path(&format!("/issues/{}", issue.id));
            self.http
                .send_json::<Value>("PATCH", &path, &[], &Value::Object(payload))?;
        }
        if let Some(link) = &changes.link {
            self.write_link(&issue.id.0, link)?;
        }
        Ok(())
    }

    fn add_comment(&self, issue: &IssueRef, comment: &NewComment) -> TrackerResult<Comment> {
        let bot = self.bot_login()?;
        let path = self.repo_path(&format!("/issues/{}/comments", issue.id));
        let raw: Value = self.http.send_json(
            "POST",
            &path,
            &[],
            &json!({ "body": Self::comment_body(comment) }),
        )?;
        comment_from_raw(raw, &bot)
    }

    fn update_comment(
        &self,
        _issue: &IssueRef,
        comment: &CommentId,
        body: &NewComment,
    ) -> TrackerResult<()> {
        let path = self.repo_path(&format!("/issues/comments/{comment}"));
        self.http.send_json::<Value>(
            "PATCH",
            &path,
            &[],
            &json!({ "body": Self::comment_body(body) }),
        )?;
        Ok(())
    }

    fn check_permissions(&self, features: &[SyncFeature]) -> TrackerResult<Vec<String>> {
        if !self.http.has_credentials() {
            return Ok(vec![format!(
                "Missing GitHub access token. Set the {ENV_GITHUB_TOKEN} environment variable."
            )]);
        }
        match self.http.get_json::<RawRepo>(&self.repo_path(""), &[]) {
            Ok(repo) => {
                let push = repo.permissions.unwrap_or_default().push;
                Ok(push_problems(&self.repository, push, features))
            }
            Err(TrackerError::Permission { .. }) => Ok(vec![format!(
                "GitHub rejected the credentials in {ENV_GITHUB_TOKEN}."
            )]),
            Err(TrackerError::NotFound { .. }) => Ok(vec![format!(
                "GitHub repository {} does not exist or is not visible to the token.",
                self.repository
            )]),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use jirahub_core::CounterpartRef;

    use super::*;

    fn raw_issue(number: u64, state: &str) -> Value {
        json!({
            "number": number,
            "title": "Widget crashes",
            "body": null,
            "labels": [{ "name": "bug" }, { "name": "ui" }],
            "milestone": { "number": 3, "title": "v1.2" },
            "state": state,
            "user": { "login": "octocat" },
            "created_at": "2021-03-01T12:00:00Z",
            "updated_at": "2021-03-02T08:30:00Z",
            "html_url": format!("https://github.com/octo/widgets/issues/{number}"),
        })
    }

    fn raw_comment(id: u64, login: &str, body: &str) -> Value {
        json!({
            "id": id,
            "user": { "login": login },
            "body": body,
            "created_at": "2021-03-01T12:00:00Z",
            "updated_at": "2021-03-01T12:00:00Z",
        })
    }

    #[test]
    fn issue_fields_are_normalized() {
        let issue = issue_from_raw("octo/widgets", raw_issue(7, "closed"), vec![], "jirahub-bot")
            .unwrap();
        assert_eq!(issue.id, IssueId::from("7"));
        assert_eq!(issue.body, "");
        assert_eq!(issue.status, IssueStatus::Closed);
        assert_eq!(issue.milestone.as_deref(), Some("v1.2"));
        assert!(issue.labels.contains("ui"));
        assert_eq!(issue.author.display_name, "octocat");
        assert!(!issue.is_bot);
        assert_eq!(issue.updated_at.to_rfc3339(), "2021-03-02T08:30:00+00:00");
    }

    #[test]
    fn metadata_comment_is_hidden_and_decoded() {
        let link = LinkMetadata::linked_to(CounterpartRef {
            source: Source::Jira,
            project: "WID".into(),
            id: IssueId::from("WID-3"),
            url: None,
        });
        let meta = markers::encode_metadata(&link).unwrap();
        let mirrored = markers::mark_comment(Source::Github, "from jira", &CommentId::from("100"));
        let comments = vec![
            raw_comment(1, "mona", "first"),
            raw_comment(2, "jirahub-bot", &meta),
            raw_comment(3, "jirahub-bot", &mirrored),
        ];
        let issue = issue_from_raw("octo/widgets", raw_issue(7, "open"), comments, "jirahub-bot")
            .unwrap();
        assert_eq!(issue.link, link);
        assert_eq!(issue.comments.len(), 2);
        assert_eq!(issue.comments[1].body, "from jira");
        assert_eq!(issue.comments[1].mirror_of, Some(CommentId::from("100")));
        assert!(issue.comments[1].is_bot);
    }

    #[test]
    fn metadata_from_another_account_is_ignored() {
        let link = LinkMetadata::linked_to(CounterpartRef {
            source: Source::Jira,
            project: "WID".into(),
            id: IssueId::from("WID-9"),
            url: None,
        });
        let forged = markers::encode_metadata(&link).unwrap();
        let (found, comments) =
            split_comments(vec![raw_comment(5, "mallory", &forged)], "jirahub-bot").unwrap();
        assert!(!found.is_linked());
        assert_eq!(comments.len(), 1);
    }

    #[test]
    fn pull_requests_are_recognized() {
        let mut pr = raw_issue(8, "open");
        assert!(!is_pull_request(&pr));
        pr["pull_request"] = json!({ "url": "https://api.github.com/repos/octo/widgets/pulls/8" });
        assert!(is_pull_request(&pr));
    }

    #[test]
    fn missing_push_access_lists_affected_features() {
        let problems = push_problems("octo/widgets", false, SyncFeature::all());
        assert_eq!(problems.len(), 3);
        assert!(problems[0].contains("sync_status"), "{problems:?}");
        assert!(push_problems("octo/widgets", true, SyncFeature::all()).is_empty());
    }

    #[test]
    fn missing_token_is_reported_without_a_request() {
        let client = GithubClient::new(&GithubConfig::default(), None);
        let problems = client.check_permissions(SyncFeature::all()).unwrap();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains(ENV_GITHUB_TOKEN));
    }
}
