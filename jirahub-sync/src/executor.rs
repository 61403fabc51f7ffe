//! Action executor: every tracker call goes through here.
//!
//! Transient failures are retried with exponential backoff up to the
//! service's `max_retries`. Permission failures are returned immediately.
//! A rate-limit response carrying a retry-after delay closes that service's
//! throttle window, and every later call to the same service waits for it.
//! In a dry run, writes are skipped and reads still happen.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use jirahub_core::config::Config;
use jirahub_core::tracker::{IssueSource, TrackerResult};
use jirahub_core::types::{FieldChanges, Issue, IssueRef, NewComment, Source};

use crate::reconcile::{LinkBook, WriteIntent};

/// Exponent cap for the backoff multiplier.
const MAX_BACKOFF_SHIFT: u32 = 6;
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Blocking pause between attempts. Tests inject a recording sleeper.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Retry budget for one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn for_service(config: &Config, source: Source) -> Self {
        let side = config.side(source);
        Self {
            max_retries: side.max_retries,
            base_backoff: Duration::from_millis(side.retry_backoff_ms),
            max_backoff: MAX_BACKOFF,
        }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(MAX_BACKOFF_SHIFT);
        self.base_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Applies reads and writes against both trackers.
pub struct Executor<'a> {
    github: &'a dyn IssueSource,
    jira: &'a dyn IssueSource,
    github_policy: RetryPolicy,
    jira_policy: RetryPolicy,
    /// Per-service deadline set by a retry-after hint; indexed by [`Self::slot`].
    throttle: Mutex<[Option<Instant>; 2]>,
    sleeper: Arc<dyn Sleeper>,
    dry_run: bool,
}

impl<'a> Executor<'a> {
    pub fn new(
        config: &Config,
        github: &'a dyn IssueSource,
        jira: &'a dyn IssueSource,
        sleeper: Arc<dyn Sleeper>,
        dry_run: bool,
    ) -> Self {
        Self {
            github,
            jira,
            github_policy: RetryPolicy::for_service(config, Source::Github),
            jira_policy: RetryPolicy::for_service(config, Source::Jira),
            throttle: Mutex::new([None, None]),
            sleeper,
            dry_run,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn tracker(&self, source: Source) -> &'a dyn IssueSource {
        match source {
            Source::Github => self.github,
            Source::Jira => self.jira,
        }
    }

    fn policy(&self, source: Source) -> RetryPolicy {
        match source {
            Source::Github => self.github_policy,
            Source::Jira => self.jira_policy,
        }
    }

    fn slot(source: Source) -> usize {
        match source {
            Source::Github => 0,
            Source::Jira => 1,
        }
    }

    /// Sleep until `source`'s throttle window reopens.
    ///
    /// The deadline is consumed by the call that waits for it. Each service
    /// is only called from one thread at a time (the parallel fetch uses one
    /// thread per service), so one budget per service is all that is needed.
    fn wait_for_window(&self, source: Source) {
        let until = match self.throttle.lock() {
            Ok(mut gates) => gates[Self::slot(source)].take(),
            Err(poisoned) => poisoned.into_inner()[Self::slot(source)].take(),
        };
        if let Some(until) = until {
            let now = Instant::now();
            if until > now {
                self.sleeper.sleep(until - now);
            }
        }
    }

    fn close_window(&self, source: Source, delay: Duration) {
        let until = Instant::now() + delay;
        let mut gates = match self.throttle.lock() {
            Ok(gates) => gates,
            Err(poisoned) => poisoned.into_inner(),
        };
        let slot = &mut gates[Self::slot(source)];
        *slot = Some(slot.map_or(until, |current| current.max(until)));
    }

    /// Run `op` against `source` under its retry policy.
    pub fn call<T>(
        &self,
        source: Source,
        what: &str,
        mut op: impl FnMut(&dyn IssueSource) -> TrackerResult<T>,
    ) -> TrackerResult<T> {
        let policy = self.policy(source);
        let tracker = self.tracker(source);
        let mut attempt = 0;
        loop {
            self.wait_for_window(source);
            match op(tracker) {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < policy.max_retries => {
                    match err.retry_after() {
                        Some(delay) => self.close_window(source, delay),
                        None => self.sleeper.sleep(policy.backoff(attempt)),
                    }
                    attempt += 1;
                    tracing::warn!(
                        service = %source,
                        attempt,
                        max = policy.max_retries,
                        "{what} failed, retrying: {err}"
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// A read; performed in dry runs too.
    pub fn read<T>(
        &self,
        source: Source,
        what: &str,
        op: impl FnMut(&dyn IssueSource) -> TrackerResult<T>,
    ) -> TrackerResult<T> {
        self.call(source, what, op)
    }

    /// A write; `Ok(None)` in dry runs.
    pub fn write<T>(
        &self,
        source: Source,
        what: &str,
        op: impl FnMut(&dyn IssueSource) -> TrackerResult<T>,
    ) -> TrackerResult<Option<T>> {
        if self.dry_run {
            tracing::info!(service = %source, "[dry-run] {what}");
            return Ok(None);
        }
        self.call(source, what, op).map(Some)
    }

    /// Perform `intent`, recording comment mappings in `book`.
    ///
    /// Returns the new issue for [`WriteIntent::CreateIssue`].
    pub fn apply(&self, intent: &WriteIntent, book: &mut LinkBook) -> TrackerResult<Option<Issue>> {
        let what = intent.to_string();
        let service = intent.service();
        match intent {
            WriteIntent::CreateIssue { fields, .. } => {
                self.write(service, &what, |t| t.create_issue(fields))
            }
            WriteIntent::AddComment {
                target,
                origin,
                origin_comment,
                body,
            } => {
                let comment = NewComment {
                    body: body.clone(),
                    mirror_of: Some(origin_comment.clone()),
                };
                if let Some(mirror) = self.write(service, &what, |t| t.add_comment(target, &comment))? {
                    book.record_comment(origin, origin_comment.clone(), mirror.id);
                }
                Ok(None)
            }
            WriteIntent::UpdateComment {
                target,
                comment,
                origin_comment,
                body,
                ..
            } => {
                let update = NewComment {
                    body: body.clone(),
                    mirror_of: Some(origin_comment.clone()),
                };
                self.write(service, &what, |t| t.update_comment(target, comment, &update))?;
                Ok(None)
            }
            WriteIntent::RecordComment {
                origin,
                origin_comment,
                mirror,
            } => {
                book.record_comment(origin, origin_comment.clone(), mirror.clone());
                Ok(None)
            }
            WriteIntent::WriteLink { target, link } => {
                let changes = FieldChanges {
                    link: Some(link.clone()),
                    ..FieldChanges::default()
                };
                self.update(target, &what, &changes)
            }
            WriteIntent::UpdateTitle { target, title, .. } => {
                let changes = FieldChanges {
                    title: Some(title.clone()),
                    ..FieldChanges::default()
                };
                self.update(target, &what, &changes)
            }
            WriteIntent::UpdateBody { target, body, .. } => {
                let changes = FieldChanges {
                    body: Some(body.clone()),
                    ..FieldChanges::default()
                };
                self.update(target, &what, &changes)
            }
            WriteIntent::SetLabels { target, labels, .. } => {
                let changes = FieldChanges {
                    labels: Some(labels.clone()),
                    ..FieldChanges::default()
                };
                self.update(target, &what, &changes)
            }
            WriteIntent::SetMilestone {
                target, milestone, ..
            } => {
                let changes = FieldChanges {
                    milestone: Some(milestone.clone()),
                    ..FieldChanges::default()
                };
                self.update(target, &what, &changes)
            }
            WriteIntent::SetStatus {
                target,
                status,
                status_name,
                ..
            } => {
                let changes = FieldChanges {
                    status: Some(*status),
                    status_name: status_name.clone(),
                    ..FieldChanges::default()
                };
                self.update(target, &what, &changes)
            }
        }
    }

    fn update(
        &self,
        target: &IssueRef,
        what: &str,
        changes: &FieldChanges,
    ) -> TrackerResult<Option<Issue>> {
        self.write(target.source, what, |t| t.update_issue(target, changes))?;
        Ok(None)
    }
}
