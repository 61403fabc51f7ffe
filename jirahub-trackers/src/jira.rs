//! JIRA REST v2 client.
//!
//! Link metadata is a JSON string in the configured custom field. The URL of
//! the linked GitHub issue optionally goes into a second custom field so
//! people can follow it from the JIRA UI.

use std::collections::BTreeSet;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use jirahub_core::config::{ENV_JIRA_PASSWORD, ENV_JIRA_USERNAME};
use jirahub_core::feature::JIRA_BASE_PERMISSIONS;
use jirahub_core::{
    Comment, CommentId, FieldChanges, Issue, IssueFields, IssueId, IssueRef, IssueSource,
    IssueStatus, IssueStream, JiraConfig, LinkMetadata, NewComment, Source, SyncFeature,
    TrackerError, TrackerResult, User,
};

use crate::http::{paginate, Http, Page};
use crate::markers;

const SERVICE: &str = "JIRA";
const ACCEPT: &str = "application/json";
const API: &str = "/rest/api/2";
const PAGE_SIZE: usize = 50;
const DEFAULT_ISSUE_TYPE: &str = "Task";
/// Any one of these lets the account suppress watcher notifications.
const ADMIN_PERMISSIONS: &[&str] = &["SYSTEM_ADMIN", "ADMINISTER", "ADMINISTER_PROJECTS"];

// ---------------------------------------------------------------------------
// Mapping
// ---------------------------------------------------------------------------

fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}

fn names(value: Option<&Value>) -> impl Iterator<Item = String> + '_ {
    value
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|v| v.get("name").and_then(Value::as_str))
        .map(str::to_string)
}

/// JIRA writes `2021-03-01T12:00:00.000+0000`; RFC 3339 is accepted too.
pub(crate) fn parse_time(value: &str) -> TrackerResult<DateTime<Utc>> {
    DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f%z")
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| TrackerError::decode(SERVICE, format!("timestamp {value:?}: {e}")))
}

fn required_time(value: &Value, pointer: &str) -> TrackerResult<DateTime<Utc>> {
    let text = str_at(value, pointer)
        .ok_or_else(|| TrackerError::decode(SERVICE, format!("missing {pointer}")))?;
    parse_time(text)
}

fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n")
}

fn user_from(value: Option<&Value>) -> User {
    let value = value.unwrap_or(&Value::Null);
    let username = value
        .get("name")
        .or_else(|| value.get("accountId"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    let display = value
        .get("displayName")
        .and_then(Value::as_str)
        .map(str::to_string);
    User::new(username, display)
}

fn comment_from_raw(raw: Value, bot: &str) -> TrackerResult<Comment> {
    let id = str_at(&raw, "/id")
        .ok_or_else(|| TrackerError::decode(SERVICE, "comment without an id"))?
        .to_string();
    let author = user_from(raw.get("author"));
    let text = normalize_newlines(str_at(&raw, "/body").unwrap_or_default());
    let (body, mirror_of) = markers::split_comment(Source::Jira, &text);
    Ok(Comment {
        id: CommentId::from(id),
        is_bot: !bot.is_empty() && author.username == bot,
        author,
        body,
        created_at: required_time(&raw, "/created")?,
        updated_at: required_time(&raw, "/updated")?,
        mirror_of,
        raw,
    })
}

/// Decode the metadata custom field: a JSON string, or an object when the
/// field was written by hand.
fn decode_link(value: Option<&Value>) -> TrackerResult<LinkMetadata> {
    let parsed = match value {
        None | Some(Value::Null) => return Ok(LinkMetadata::default()),
        Some(Value::String(text)) if text.trim().is_empty() => return Ok(LinkMetadata::default()),
        Some(Value::String(text)) => serde_json::from_str(text),
        Some(other) => serde_json::from_value(other.clone()),
    };
    parsed.map_err(|e| TrackerError::decode(SERVICE, format!("link metadata: {e}")))
}

fn encode_link(link: &LinkMetadata) -> TrackerResult<Value> {
    serde_json::to_string(link)
        .map(Value::String)
        .map_err(|e| TrackerError::decode(SERVICE, e.to_string()))
}

pub(crate) fn issue_from_raw(
    config: &JiraConfig,
    raw: Value,
    comments: Vec<Value>,
    bot: &str,
) -> TrackerResult<Issue> {
    let key = str_at(&raw, "/key")
        .ok_or_else(|| TrackerError::decode(SERVICE, "issue without a key"))?
        .to_string();
    let fields = raw.get("fields").unwrap_or(&Value::Null);
    let raw_status = str_at(fields, "/status/name").map(str::to_string);
    let status = match &raw_status {
        Some(name) if config.is_closed_status(name) => IssueStatus::Closed,
        _ => IssueStatus::Open,
    };
    let author = user_from(fields.get("creator").or_else(|| fields.get("reporter")));
    let link = decode_link(fields.get(&config.metadata_field))?;
    let comments = comments
        .into_iter()
        .map(|c| comment_from_raw(c, bot))
        .collect::<TrackerResult<Vec<_>>>()?;
    let milestone = names(fields.get("fixVersions")).next();
    Ok(Issue {
        source: Source::Jira,
        url: Some(format!(
            "{}/browse/{key}",
            config.server.trim_end_matches('/')
        )),
        id: IssueId::from(key),
        project: str_at(fields, "/project/key")
            .unwrap_or(&config.project_key)
            .to_string(),
        title: str_at(fields, "/summary").unwrap_or_default().to_string(),
        body: normalize_newlines(str_at(fields, "/description").unwrap_or_default()),
        labels: fields
            .get("labels")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        milestone,
        status,
        raw_status,
        issue_type: str_at(fields, "/issuetype/name").map(str::to_string),
        priority: str_at(fields, "/priority/name").map(str::to_string),
        components: names(fields.get("components")).collect(),
        is_bot: !bot.is_empty() && author.username == bot,
        author,
        comments,
        created_at: required_time(fields, "/created")?,
        updated_at: required_time(fields, "/updated")?,
        link,
        raw,
    })
}

fn name_list<'a>(items: impl IntoIterator<Item = &'a String>) -> Value {
    Value::Array(items.into_iter().map(|n| json!({ "name": n })).collect())
}

/// Custom-field writes carrying `link`.
fn link_fields(config: &JiraConfig, link: &LinkMetadata, out: &mut Map<String, Value>) -> TrackerResult<()> {
    out.insert(config.metadata_field.clone(), encode_link(link)?);
    if let Some(field) = &config.github_url_field {
        let url = link.counterpart.as_ref().and_then(|c| c.url.clone());
        out.insert(field.clone(), json!(url));
    }
    Ok(())
}

pub(crate) fn create_payload(config: &JiraConfig, fields: &IssueFields) -> TrackerResult<Value> {
    let mut out = Map::new();
    out.insert("project".into(), json!({ "key": config.project_key }));
    out.insert("summary".into(), json!(fields.title));
    out.insert("description".into(), json!(fields.body));
    out.insert(
        "issuetype".into(),
        json!({ "name": fields.issue_type.as_deref().unwrap_or(DEFAULT_ISSUE_TYPE) }),
    );
    if !fields.labels.is_empty() {
        out.insert("labels".into(), json!(fields.labels));
    }
    if let Some(milestone) = &fields.milestone {
        out.insert("fixVersions".into(), name_list([milestone]));
    }
    if !fields.components.is_empty() {
        out.insert("components".into(), name_list(&fields.components));
    }
    if let Some(priority) = &fields.priority {
        out.insert("priority".into(), json!({ "name": priority }));
    }
    if fields.link.is_linked() {
        link_fields(config, &fields.link, &mut out)?;
    }
    for (key, value) in &fields.extra {
        out.insert(key.clone(), value.clone());
    }
    Ok(json!({ "fields": out }))
}

pub(crate) fn update_payload(config: &JiraConfig, changes: &FieldChanges) -> TrackerResult<Map<String, Value>> {
    let mut out = Map::new();
    if let Some(title) = &changes.title {
        out.insert("summary".into(), json!(title));
    }
    if let Some(body) = &changes.body {
        out.insert("description".into(), json!(body));
    }
    if let Some(labels) = &changes.labels {
        out.insert("labels".into(), json!(labels));
    }
    if let Some(milestone) = &changes.milestone {
        out.insert("fixVersions".into(), name_list(milestone.iter()));
    }
    if let Some(link) = &changes.link {
        link_fields(config, link, &mut out)?;
    }
    Ok(out)
}

/// Workflow status to move to for `status`, honoring an explicit name.
fn target_status(config: &JiraConfig, status: IssueStatus, explicit: Option<&str>) -> String {
    match (explicit, status) {
        (Some(name), _) => name.to_string(),
        (None, IssueStatus::Closed) => config.close_status.clone(),
        (None, IssueStatus::Open) => config.reopen_status.clone(),
    }
}

/// Id of the transition reaching `target`, matched against either the
/// destination status or the transition's own name.
pub(crate) fn find_transition(transitions: &Value, target: &str) -> Option<String> {
    transitions
        .get("transitions")
        .and_then(Value::as_array)?
        .iter()
        .find(|t| {
            [str_at(t, "/to/name"), str_at(t, "/name")]
                .into_iter()
                .flatten()
                .any(|name| name.eq_ignore_ascii_case(target))
        })
        .and_then(|t| str_at(t, "/id").map(str::to_string))
}

pub(crate) fn search_jql(project_key: &str, updated_since: Option<DateTime<Utc>>) -> String {
    let mut jql = format!("project = \"{project_key}\"");
    if let Some(since) = updated_since {
        jql.push_str(&format!(" AND updated >= {}", since.timestamp_millis()));
    }
    jql.push_str(" ORDER BY updated ASC, key ASC");
    jql
}

/// Human-readable problems for the `mypermissions` response.
pub(crate) fn permission_problems(
    response: &Value,
    features: &[SyncFeature],
    notify_watchers: bool,
) -> Vec<String> {
    let granted: BTreeSet<&str> = response
        .get("permissions")
        .and_then(Value::as_object)
        .into_iter()
        .flatten()
        .filter(|(_, v)| v.get("havePermission").and_then(Value::as_bool) == Some(true))
        .map(|(k, _)| k.as_str())
        .collect();

    let mut problems = Vec::new();
    for permission in JIRA_BASE_PERMISSIONS {
        if !granted.contains(permission) {
            problems.push(format!("JIRA user has not been granted the {permission} permission."));
        }
    }
    if !notify_watchers && !ADMIN_PERMISSIONS.iter().any(|p| granted.contains(p)) {
        problems.push(
            "jira.notify_watchers is false, but JIRA user has not been granted the ADMINISTER_PROJECTS permission."
                .to_string(),
        );
    }
    for feature in features {
        for permission in feature.jira_permissions() {
            if !granted.contains(permission) {
                problems.push(format!(
                    "jira.sync.{} is enabled, but JIRA user has not been granted the {permission} permission.",
                    feature.key()
                ));
            }
        }
    }
    problems
}

fn every_permission(features: &[SyncFeature]) -> String {
    let mut all: BTreeSet<&str> = JIRA_BASE_PERMISSIONS.iter().copied().collect();
    all.extend(ADMIN_PERMISSIONS);
    all.extend(features.iter().flat_map(|f| f.jira_permissions().iter().copied()));
    all.into_iter().collect::<Vec<_>>().join(",")
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct JiraClient {
    http: Http,
    config: JiraConfig,
    username: String,
    missing: Vec<&'static str>,
}

impl JiraClient {
    pub fn new(config: &JiraConfig, username: Option<String>, password: Option<String>) -> Self {
        let mut missing = Vec::new();
        if username.is_none() {
            missing.push(ENV_JIRA_USERNAME);
        }
        if password.is_none() {
            missing.push(ENV_JIRA_PASSWORD);
        }
        let authorization = match (&username, &password) {
            (Some(user), Some(pass)) => {
                Some(format!("Basic {}", BASE64.encode(format!("{user}:{pass}"))))
            }
            _ => None,
        };
        Self {
            http: Http::new(SERVICE, &config.server, authorization, ACCEPT),
            config: config.clone(),
            username: username.unwrap_or_default(),
            missing,
        }
    }

    fn issue_path(&self, key: &str, rest: &str) -> String {
        format!("{API}/issue/{key}{rest}")
    }

    fn raw_comments(&self, key: &str) -> TrackerResult<Vec<Value>> {
        let path = self.issue_path(key, "/comment");
        paginate("0".to_string(), |start| {
            let query = [
                ("startAt", start.to_string()),
                ("maxResults", PAGE_SIZE.to_string()),
            ];
            let page: Value = self.http.get_json(&path, &query)?;
            Ok(offset_page(&page, "comments", start))
        })
        .collect()
    }

    fn full_issue(&self, raw: Value) -> TrackerResult<Issue> {
        let key = str_at(&raw, "/key")
            .ok_or_else(|| TrackerError::decode(SERVICE, "issue without a key"))?
            .to_string();
        let comments = self.raw_comments(&key)?;
        issue_from_raw(&self.config, raw, comments, &self.username)
    }

    fn notify_query(&self) -> Vec<(&'static str, String)> {
        if self.config.notify_watchers {
            Vec::new()
        } else {
            vec![("notifyUsers", "false".to_string())]
        }
    }

    fn transition(&self, key: &str, target: &str) -> TrackerResult<()> {
        let path = self.issue_path(key, "/transitions");
        let available: Value = self.http.get_json(&path, &[])?;
        let Some(id) = find_transition(&available, target) else {
            return Err(TrackerError::Rejected {
                service: SERVICE.to_string(),
                status: 400,
                message: format!("no transition from {key} to status {target:?}"),
            });
        };
        self.http.send_json::<Value>(
            "POST",
            &path,
            &[],
            &json!({ "transition": { "id": id } }),
        )?;
        tracing::debug!(issue = key, status = target, "transitioned JIRA issue");
        Ok(())
    }

    fn comment_body(comment: &NewComment) -> String {
        match &comment.mirror_of {
            Some(origin) => markers::mark_comment(Source::Jira, &comment.body, origin),
            None => comment.body.clone(),
        }
    }
}

/// A page of an offset-paginated listing stored under `items_key`.
fn offset_page(page: &Value, items_key: &str, start: &str) -> Page<Value> {
    let items = page
        .get(items_key)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let start: u64 = start.parse().unwrap_or(0);
    let total = page.get("total").and_then(Value::as_u64).unwrap_or(0);
    let end = start + items.len() as u64;
    let next = (!items.is_empty() && end < total).then(|| end.to_string());
    Page { items, next }
}

impl IssueSource for JiraClient {
    fn source(&self) -> Source {
        Source::Jira
    }

    fn project(&self) -> &str {
        &self.config.project_key
    }

    fn list_issues(&self, updated_since: Option<DateTime<Utc>>) -> IssueStream<'_> {
        let jql = search_jql(&self.config.project_key, updated_since);
        let path = format!("{API}/search");
        Box::new(paginate("0".to_string(), move |start| {
            let query = [
                ("jql", jql.clone()),
                ("startAt", start.to_string()),
                ("maxResults", PAGE_SIZE.to_string()),
                ("fields", "*all".to_string()),
            ];
            let page: Value = self.http.get_json(&path, &query)?;
            let page = offset_page(&page, "issues", start);
            let items = page
                .items
                .into_iter()
                .map(|raw| self.full_issue(raw))
                .collect::<TrackerResult<Vec<_>>>()?;
            Ok(Page {
                items,
                next: page.next,
            })
        }))
    }

    fn get_issue(&self, id: &IssueId) -> TrackerResult<Option<Issue>> {
        let path = self.issue_path(&id.0, "");
        match self.http.get_optional::<Value>(&path, &[])? {
            Some(raw) => self.full_issue(raw).map(Some),
            None => Ok(None),
        }
    }

    fn list_comments(&self, issue: &IssueRef) -> TrackerResult<Vec<Comment>> {
        self.raw_comments(&issue.id.0)?
            .into_iter()
            .map(|c| comment_from_raw(c, &self.username))
            .collect()
    }

    fn create_issue(&self, fields: &IssueFields) -> TrackerResult<Issue> {
        let payload = create_payload(&self.config, fields)?;
        let created: Value = self
            .http
            .send_json("POST", &format!("{API}/issue"), &[], &payload)?;
        let key = str_at(&created, "/key")
            .ok_or_else(|| TrackerError::decode(SERVICE, "create response without a key"))?
            .to_string();
        tracing::info!(project = %self.config.project_key, issue = %key, "created JIRA issue");

        let target = match (fields.status_name.as_deref(), fields.status) {
            (Some(name), _) => Some(name.to_string()),
            (None, IssueStatus::Closed) => Some(self.config.close_status.clone()),
            (None, IssueStatus::Open) => None,
        };
        if let Some(target) = target {
            self.transition(&key, &target)?;
        }
        self.get_issue(&IssueId::from(key.clone()))?
            .ok_or_else(|| TrackerError::not_found(SERVICE, format!("created issue {key}")))
    }

    fn update_issue(&self, issue: &IssueRef, changes: &FieldChanges) -> TrackerResult<()> {
        let fields = update_payload(&self.config, changes)?;
        if !fields.is_empty() {
            self.http.send_json::<Value>(
                "PUT",
                &self.issue_path(&issue.id.0, ""),
                &self.notify_query(),
                &json!({ "fields": fields }),
            )?;
        }
        if let Some(status) = changes.status {
            let target = target_status(&self.config, status, changes.status_name.as_deref());
            self.transition(&issue.id.0, &target)?;
        }
        Ok(())
    }

    fn add_comment(&self, issue: &IssueRef, comment: &NewComment) -> TrackerResult<Comment> {
        let raw: Value = self.http.send_json(
            "POST",
            &self.issue_path(&issue.id.0, "/comment"),
            &[],
            &json!({ "body": Self::comment_body(comment) }),
        )?;
        comment_from_raw(raw, &self.username)
    }

    fn update_comment(
        &self,
        issue: &IssueRef,
        comment: &CommentId,
        body: &NewComment,
    ) -> TrackerResult<()> {
        self.http.send_json::<Value>(
            "PUT",
            &self.issue_path(&issue.id.0, &format!("/comment/{comment}")),
            &[],
            &json!({ "body": Self::comment_body(body) }),
        )?;
        Ok(())
    }

    fn check_permissions(&self, features: &[SyncFeature]) -> TrackerResult<Vec<String>> {
        if !self.missing.is_empty() {
            return Ok(self
                .missing
                .iter()
                .map(|var| format!("Missing JIRA credentials. Set the {var} environment variable."))
                .collect());
        }
        let query = [
            ("projectKey", self.config.project_key.clone()),
            ("permissions", every_permission(features)),
        ];
        let response = match self.http.get_json::<Value>(&format!("{API}/mypermissions"), &query) {
            Ok(response) => response,
            Err(TrackerError::Permission { .. }) => {
                return Ok(vec![format!(
                    "JIRA rejected credentials. Check {ENV_JIRA_USERNAME} and {ENV_JIRA_PASSWORD}."
                )])
            }
            Err(TrackerError::NotFound { .. }) | Err(TrackerError::Rejected { .. }) => {
                return Ok(vec![format!(
                    "JIRA project {} does not exist.",
                    self.config.project_key
                )])
            }
            Err(err) => return Err(err),
        };
        let mut problems = permission_problems(&response, features, self.config.notify_watchers);

        let fields: Value = self.http.get_json(&format!("{API}/field"), &[])?;
        let known = |id: &str| {
            fields
                .as_array()
                .is_some_and(|all| all.iter().any(|f| str_at(f, "/id") == Some(id)))
        };
        let custom = std::iter::once(&self.config.metadata_field)
            .chain(self.config.github_url_field.as_ref());
        for field in custom {
            if !known(field) {
                problems.push(format!("JIRA field {field} does not exist."));
            }
        }
        Ok(problems)
    }
}
