//! In-memory [`IssueSource`] used as the tracker double in engine tests.
//!
//! Behaves like a real tracker from the engine's point of view: issues and
//! comments created through it are owned by the sync account, every write
//! advances a logical clock and bumps `updated_at`, and failures can be
//! scripted per operation.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, TimeZone, Utc};

use jirahub_core::feature::SyncFeature;
use jirahub_core::tracker::{IssueSource, IssueStream, TrackerResult};
use jirahub_core::types::{
    Comment, CommentId, FieldChanges, Issue, IssueFields, IssueId, IssueRef, IssueStatus,
    LinkMetadata, NewComment, Source, User,
};
use jirahub_core::TrackerError;

pub const BOT_USERNAME: &str = "jirahub-bot";

/// Tracker operations that can be scripted to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackerOp {
    List,
    Get,
    Create,
    Update,
    AddComment,
    UpdateComment,
    Permissions,
}

#[derive(Debug)]
struct MemoryState {
    issues: Vec<Issue>,
    next_issue: u64,
    next_comment: u64,
    clock: DateTime<Utc>,
    writes: usize,
    failures: HashMap<TrackerOp, VecDeque<TrackerError>>,
    calls: HashMap<TrackerOp, usize>,
    missing_permissions: Vec<String>,
}

impl MemoryState {
    fn tick(&mut self) -> DateTime<Utc> {
        self.clock += Duration::minutes(1);
        self.clock
    }

    fn enter(&mut self, op: TrackerOp) -> TrackerResult<()> {
        *self.calls.entry(op).or_default() += 1;
        match self.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn issue_mut(&mut self, service: &str, id: &IssueId) -> TrackerResult<&mut Issue> {
        self.issues
            .iter_mut()
            .find(|i| &i.id == id)
            .ok_or_else(|| TrackerError::not_found(service, format!("issue {id}")))
    }
}

/// Thread-safe in-memory tracker for one service.
#[derive(Debug)]
pub struct MemoryTracker {
    source: Source,
    project: String,
    state: Mutex<MemoryState>,
}

impl MemoryTracker {
    pub fn new(source: Source, project: impl Into<String>) -> Self {
        Self {
            source,
            project: project.into(),
            state: Mutex::new(MemoryState {
                issues: Vec::new(),
                next_issue: 1,
                next_comment: 1000,
                clock: Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).single().unwrap_or_default(),
                writes: 0,
                failures: HashMap::new(),
                calls: HashMap::new(),
                missing_permissions: Vec::new(),
            }),
        }
    }

    pub fn github(repository: impl Into<String>) -> Self {
        Self::new(Source::Github, repository)
    }

    pub fn jira(project_key: impl Into<String>) -> Self {
        Self::new(Source::Jira, project_key)
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn service(&self) -> String {
        self.source.to_string()
    }

    fn next_id(&self, state: &mut MemoryState) -> IssueId {
        let n = state.next_issue;
        state.next_issue += 1;
        match self.source {
            Source::Github => IssueId(n.to_string()),
            Source::Jira => IssueId(format!("{}-{n}", self.project)),
        }
    }

    fn url(&self, id: &IssueId) -> String {
        format!("memory://{}/{}/{id}", self.source.key(), self.project)
    }

    // -----------------------------------------------------------------------
    // Test helpers
    // -----------------------------------------------------------------------

    /// Add an issue written by a human, returning it.
    pub fn open_issue(&self, title: &str, labels: &[&str]) -> Issue {
        let mut state = self.lock();
        let now = state.tick();
        let id = self.next_id(&mut state);
        let issue = Issue {
            source: self.source,
            id: id.clone(),
            project: self.project.clone(),
            title: title.to_string(),
            body: String::new(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
            milestone: None,
            status: IssueStatus::Open,
            raw_status: None,
            issue_type: None,
            priority: None,
            components: Default::default(),
            author: User::new("mona", Some("Mona Lisa".to_string())),
            is_bot: false,
            comments: Vec::new(),
            created_at: now,
            updated_at: now,
            url: Some(self.url(&id)),
            link: LinkMetadata::default(),
            raw: serde_json::Value::Null,
        };
        state.issues.push(issue.clone());
        issue
    }

    /// Insert or replace an issue as-is.
    pub fn insert(&self, issue: Issue) {
        let mut state = self.lock();
        match state.issues.iter_mut().find(|i| i.id == issue.id) {
            Some(existing) => *existing = issue,
            None => state.issues.push(issue),
        }
    }

    /// Change an issue the way a human would, bumping `updated_at`.
    pub fn edit(&self, id: &IssueId, f: impl FnOnce(&mut Issue)) {
        let mut state = self.lock();
        let now = state.tick();
        if let Some(issue) = state.issues.iter_mut().find(|i| &i.id == id) {
            f(issue);
            issue.updated_at = now;
        }
    }

    /// Post a human comment.
    pub fn comment_as_human(&self, id: &IssueId, body: &str) -> Option<Comment> {
        let mut state = self.lock();
        let now = state.tick();
        let comment_id = CommentId(state.next_comment.to_string());
        state.next_comment += 1;
        let issue = state.issues.iter_mut().find(|i| &i.id == id)?;
        let comment = Comment {
            id: comment_id,
            author: User::new("hubot", Some("Hu Bot".to_string())),
            body: body.to_string(),
            created_at: now,
            updated_at: now,
            is_bot: false,
            mirror_of: None,
            raw: serde_json::Value::Null,
        };
        issue.comments.push(comment.clone());
        issue.updated_at = now;
        Some(comment)
    }

    pub fn issue(&self, id: &IssueId) -> Option<Issue> {
        self.lock().issues.iter().find(|i| &i.id == id).cloned()
    }

    pub fn issues(&self) -> Vec<Issue> {
        self.lock().issues.clone()
    }

    /// Remote writes performed so far.
    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    pub fn reset_writes(&self) {
        self.lock().writes = 0;
    }

    /// Calls made for `op`, failed ones included.
    pub fn calls(&self, op: TrackerOp) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn fail_next(&self, op: TrackerOp, err: TrackerError) {
        self.fail_times(op, 1, err);
    }

    /// Make the next `times` calls of `op` fail with `err`.
    pub fn fail_times(&self, op: TrackerOp, times: usize, err: TrackerError) {
        let mut state = self.lock();
        let queue = state.failures.entry(op).or_default();
        queue.extend(std::iter::repeat(err).take(times));
    }

    pub fn set_missing_permissions(&self, missing: Vec<String>) {
        self.lock().missing_permissions = missing;
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.lock().clock
    }

    pub fn set_now(&self, now: DateTime<Utc>) {
        self.lock().clock = now;
    }
}

impl IssueSource for MemoryTracker {
    fn source(&self) -> Source {
        self.source
    }

    fn project(&self) -> &str {
        &self.project
    }

    fn list_issues(&self, updated_since: Option<DateTime<Utc>>) -> IssueStream<'_> {
        let mut state = self.lock();
        if let Err(err) = state.enter(TrackerOp::List) {
            return Box::new(std::iter::once(Err(err)));
        }
        let mut issues: Vec<Issue> = state
            .issues
            .iter()
            .filter(|i| updated_since.map_or(true, |since| i.updated_at >= since))
            .cloned()
            .collect();
        issues.sort_by_key(|i| i.updated_at);
        Box::new(issues.into_iter().map(Ok))
    }

    fn get_issue(&self, id: &IssueId) -> TrackerResult<Option<Issue>> {
        let mut state = self.lock();
        state.enter(TrackerOp::Get)?;
        Ok(state.issues.iter().find(|i| &i.id == id).cloned())
    }

    fn list_comments(&self, issue: &IssueRef) -> TrackerResult<Vec<Comment>> {
        let mut state = self.lock();
        let service = self.service();
        Ok(state.issue_mut(&service, &issue.id)?.comments.clone())
    }

    fn create_issue(&self, fields: &IssueFields) -> TrackerResult<Issue> {
        let mut state = self.lock();
        state.enter(TrackerOp::Create)?;
        let now = state.tick();
        let id = self.next_id(&mut state);
        let issue = Issue {
            source: self.source,
            id: id.clone(),
            project: self.project.clone(),
            title: fields.title.clone(),
            body: fields.body.clone(),
            labels: fields.labels.clone(),
            milestone: fields.milestone.clone(),
            status: fields.status,
            raw_status: fields.status_name.clone(),
            issue_type: fields.issue_type.clone(),
            priority: fields.priority.clone(),
            components: fields.components.clone(),
            author: User::new(BOT_USERNAME, None),
            is_bot: true,
            comments: Vec::new(),
            created_at: now,
            updated_at: now,
            url: Some(self.url(&id)),
            link: fields.link.clone(),
            raw: serde_json::to_value(&fields.extra).unwrap_or_default(),
        };
        state.issues.push(issue.clone());
        state.writes += 1;
        Ok(issue)
    }

    fn update_issue(&self, issue: &IssueRef, changes: &FieldChanges) -> TrackerResult<()> {
        let mut state = self.lock();
        state.enter(TrackerOp::Update)?;
        let now = state.tick();
        let service = self.service();
        let target = state.issue_mut(&service, &issue.id)?;
        if let Some(title) = &changes.title {
            target.title = title.clone();
        }
        if let Some(body) = &changes.body {
            target.body = body.clone();
        }
        if let Some(labels) = &changes.labels {
            target.labels = labels.clone();
        }
        if let Some(milestone) = &changes.milestone {
            target.milestone = milestone.clone();
        }
        if let Some(status) = changes.status {
            target.status = status;
            target.raw_status = changes.status_name.clone();
        }
        if let Some(link) = &changes.link {
            target.link = link.clone();
        }
        target.updated_at = now;
        state.writes += 1;
        Ok(())
    }

    fn add_comment(&self, issue: &IssueRef, comment: &NewComment) -> TrackerResult<Comment> {
        let mut state = self.lock();
        state.enter(TrackerOp::AddComment)?;
        let now = state.tick();
        let id = CommentId(state.next_comment.to_string());
        state.next_comment += 1;
        let service = self.service();
        let target = state.issue_mut(&service, &issue.id)?;
        let created = Comment {
            id,
            author: User::new(BOT_USERNAME, None),
            body: comment.body.clone(),
            created_at: now,
            updated_at: now,
            is_bot: true,
            mirror_of: comment.mirror_of.clone(),
            raw: serde_json::Value::Null,
        };
        target.comments.push(created.clone());
        target.updated_at = now;
        state.writes += 1;
        Ok(created)
    }

    fn update_comment(
        &self,
        issue: &IssueRef,
        comment: &CommentId,
        body: &NewComment,
    ) -> TrackerResult<()> {
        let mut state = self.lock();
        state.enter(TrackerOp::UpdateComment)?;
        let now = state.tick();
        let service = self.service();
        let target = state.issue_mut(&service, &issue.id)?;
        let existing = target
            .comments
            .iter_mut()
            .find(|c| &c.id == comment)
            .ok_or_else(|| TrackerError::not_found(service.clone(), format!("comment {comment}")))?;
        existing.body = body.body.clone();
        existing.updated_at = now;
        target.updated_at = now;
        state.writes += 1;
        Ok(())
    }

    fn check_permissions(&self, features: &[SyncFeature]) -> TrackerResult<Vec<String>> {
        let mut state = self.lock();
        state.enter(TrackerOp::Permissions)?;
        if features.is_empty() {
            return Ok(Vec::new());
        }
        Ok(state.missing_permissions.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_follow_service_conventions() {
        let gh = MemoryTracker::github("octo/widgets");
        let jira = MemoryTracker::jira("WID");
        assert_eq!(gh.open_issue("a", &[]).id.0, "1");
        assert_eq!(jira.open_issue("a", &[]).id.0, "WID-1");
        assert_eq!(jira.open_issue("b", &[]).id.0, "WID-2");
    }

    #[test]
    fn writes_bump_updated_at_and_count() {
        let gh = MemoryTracker::github("octo/widgets");
        let issue = gh.open_issue("Crash on load", &["bug"]);
        let changes = FieldChanges {
            status: Some(IssueStatus::Closed),
            ..FieldChanges::default()
        };
        gh.update_issue(&issue.reference(), &changes).unwrap();
        let updated = gh.issue(&issue.id).unwrap();
        assert_eq!(updated.status, IssueStatus::Closed);
        assert!(updated.updated_at > issue.updated_at);
        assert_eq!(gh.writes(), 1);
    }

    #[test]
    fn listing_respects_updated_since() {
        let gh = MemoryTracker::github("octo/widgets");
        let first = gh.open_issue("one", &[]);
        let second = gh.open_issue("two", &[]);
        let listed: Vec<_> = gh
            .list_issues(Some(second.updated_at))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, second.id);
        assert_eq!(gh.list_issues(None).count(), 2);
        assert!(first.updated_at < second.updated_at);
    }

    #[test]
    fn scripted_failures_are_consumed_in_order() {
        let jira = MemoryTracker::jira("WID");
        jira.fail_times(TrackerOp::Get, 2, TrackerError::transient("JIRA", "503"));
        assert!(jira.get_issue(&IssueId::from("WID-1")).is_err());
        assert!(jira.get_issue(&IssueId::from("WID-1")).is_err());
        assert!(jira.get_issue(&IssueId::from("WID-1")).unwrap().is_none());
        assert_eq!(jira.calls(TrackerOp::Get), 3);
    }

    #[test]
    fn bot_comments_keep_their_marker() {
        let jira = MemoryTracker::jira("WID");
        let issue = jira.open_issue("x", &[]);
        let comment = jira
            .add_comment(
                &issue.reference(),
                &NewComment {
                    body: "hello".into(),
                    mirror_of: Some(CommentId::from("77")),
                },
            )
            .unwrap();
        assert!(comment.is_bot);
        let comments = jira.list_comments(&issue.reference()).unwrap();
        assert_eq!(comments[0].mirror_of, Some(CommentId::from("77")));
    }
}
