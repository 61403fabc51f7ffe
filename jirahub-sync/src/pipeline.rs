//! Sync run pipeline shared by the CLI and tests.
//!
//! One run: fetch candidates from both services (in parallel), add the
//! previously failed issues, resolve links, reconcile each pair through the
//! executor, then compute the next [`SyncState`]. Issues are processed one
//! at a time; a failure is confined to the issue being processed unless it
//! is a permission failure, which aborts the run.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::thread;

use chrono::{DateTime, Utc};

use jirahub_core::config::Config;
use jirahub_core::tracker::{IssueSource, TrackerResult};
use jirahub_core::types::{CounterpartRef, Issue, IssueFields, IssueId, IssueRef, Source, User};
use jirahub_markup::Attribution;

use crate::error::SyncError;
use crate::executor::{Executor, Sleeper, ThreadSleeper};
use crate::filter::{IssueFilter, IssuePredicate};
use crate::formatter::FormatOverride;
use crate::linker::{BacklinkIndex, FieldsHook, LinkState, Linker, PreCreateHook, Resolution};
use crate::reconcile::{LinkBook, Pair, Reconciler, WriteIntent};
use crate::report::{IssueOutcome, IssueReport, SyncReport};
use crate::side::Sides;
use crate::state_store::{self, SyncState};

/// Per-run switches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub dry_run: bool,
    /// Replaces the stored cursor for this run only.
    pub min_updated_at: Option<DateTime<Utc>>,
}

type PairKey = (IssueRef, IssueRef);

/// Mutable state of one run.
struct Batch {
    issues: BTreeMap<IssueRef, Issue>,
    backlinks: BacklinkIndex,
    book: LinkBook,
    pairs: HashMap<PairKey, IssueOutcome>,
}

/// The reconciliation engine, bound to a configuration and two trackers.
pub struct SyncEngine<'a> {
    config: &'a Config,
    github: &'a dyn IssueSource,
    jira: &'a dyn IssueSource,
    sides: Sides,
    attribution: Attribution,
    sleeper: Arc<dyn Sleeper>,
}

impl<'a> SyncEngine<'a> {
    pub fn new(
        config: &'a Config,
        github: &'a dyn IssueSource,
        jira: &'a dyn IssueSource,
    ) -> Result<Self, SyncError> {
        Ok(Self {
            config,
            github,
            jira,
            sides: Sides::from_config(config)?,
            attribution: Attribution::new()?,
            sleeper: Arc::new(ThreadSleeper),
        })
    }

    /// Add a custom creation filter for issues created on `destination`.
    pub fn with_filter(mut self, destination: Source, predicate: IssuePredicate) -> Self {
        self.sides
            .get_mut(destination)
            .filter
            .push(IssueFilter::Custom(predicate));
        self
    }

    /// Set the final formatting stage for text written to `destination`.
    pub fn with_formatter(mut self, destination: Source, user: FormatOverride) -> Self {
        self.sides.get_mut(destination).formatter.set_override(user);
        self
    }

    /// Append a pre-create hook for issues created on `destination`.
    pub fn with_hook(mut self, destination: Source, hook: FieldsHook) -> Self {
        self.sides
            .get_mut(destination)
            .hooks
            .push(PreCreateHook::Custom(hook));
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Run once against `state`, returning the report and the next state.
    ///
    /// Nothing is persisted here; see [`run`].
    pub fn run(
        &self,
        state: &SyncState,
        options: &RunOptions,
    ) -> Result<(SyncReport, SyncState), SyncError> {
        let executor = Executor::new(
            self.config,
            self.github,
            self.jira,
            Arc::clone(&self.sleeper),
            options.dry_run,
        );
        let since = options.min_updated_at.or(state.cursor);
        tracing::info!(
            since = ?since,
            retry = state.failed.len(),
            dry_run = options.dry_run,
            "starting sync run"
        );

        let (github, jira) = fetch_both(&executor, since)?;
        let mut issues: BTreeMap<IssueRef, Issue> = github
            .into_iter()
            .chain(jira)
            .map(|i| (i.reference(), i))
            .collect();

        let mut reports = Vec::new();
        for failed in &state.failed {
            if issues.contains_key(failed) {
                continue;
            }
            let what = format!("fetch {failed}");
            match executor.read(failed.source, &what, |t| t.get_issue(&failed.id)) {
                Ok(Some(issue)) => {
                    issues.insert(failed.clone(), issue);
                }
                Ok(None) => {
                    tracing::warn!(issue = %failed, "previously failed issue no longer exists");
                }
                Err(err) if err.is_fatal() => return Err(err.into()),
                Err(err) => {
                    tracing::warn!(issue = %failed, "could not fetch previously failed issue: {err}");
                    reports.push(IssueReport {
                        issue: failed.clone(),
                        outcome: IssueOutcome::Failed {
                            error: err.to_string(),
                        },
                        intents: Vec::new(),
                    });
                }
            }
        }

        let stamps: HashMap<IssueRef, DateTime<Utc>> = issues
            .iter()
            .map(|(r, i)| (r.clone(), i.updated_at))
            .collect();
        let candidates: Vec<IssueRef> = issues.keys().cloned().collect();
        let mut book = LinkBook::default();
        for issue in issues.values() {
            book.track(issue);
        }
        let mut batch = Batch {
            backlinks: BacklinkIndex::build(issues.values()),
            issues,
            book,
            pairs: HashMap::new(),
        };

        for reference in candidates {
            let Some(issue) = batch.issues.get(&reference).cloned() else {
                continue;
            };
            let mut intents = Vec::new();
            let outcome = match self.process(&executor, &mut batch, &issue, &mut intents) {
                Ok(outcome) => outcome,
                Err(err) if err.is_fatal() => {
                    tracing::error!(issue = %reference, "aborting run: {err}");
                    return Err(err);
                }
                Err(err) => {
                    tracing::warn!(issue = %reference, "sync failed: {err}");
                    IssueOutcome::Failed {
                        error: err.to_string(),
                    }
                }
            };
            reports.push(IssueReport {
                issue: reference,
                outcome,
                intents,
            });
        }

        let mut next = SyncState {
            cursor: state.cursor,
            failed: BTreeSet::new(),
        };
        for report in &reports {
            if report.outcome.is_success() {
                if let Some(stamp) = stamps.get(&report.issue) {
                    next.cursor = Some(next.cursor.map_or(*stamp, |c| c.max(*stamp)));
                }
            } else {
                next.failed.insert(report.issue.clone());
            }
        }

        let report = SyncReport {
            dry_run: options.dry_run,
            issues: reports,
            previous_cursor: state.cursor,
            next_cursor: next.cursor,
        };
        let counts = report.counts();
        tracing::info!(
            synced = counts.synced,
            created = counts.created,
            skipped = counts.skipped,
            failed = counts.failed,
            writes = counts.writes,
            "sync run finished"
        );
        Ok((report, next))
    }

    fn process(
        &self,
        executor: &Executor<'_>,
        batch: &mut Batch,
        issue: &Issue,
        intents: &mut Vec<WriteIntent>,
    ) -> Result<IssueOutcome, SyncError> {
        let linker = Linker::new(&self.sides, &self.attribution);
        tracing::debug!(issue = %issue.reference(), state = %LinkState::of(issue), "resolving");
        match linker.resolve(issue, &batch.backlinks) {
            Resolution::Skip(reason) => {
                tracing::debug!(issue = %issue.reference(), "skipped: {reason}");
                Ok(IssueOutcome::Skipped { reason })
            }
            Resolution::Linked(counterpart) => {
                let found = match batch.issues.get(&counterpart) {
                    Some(found) => Some(found.clone()),
                    None => executor.read(counterpart.source, &format!("fetch {counterpart}"), |t| {
                        t.get_issue(&counterpart.id)
                    })?,
                };
                match found {
                    Some(found) => self.reconcile(executor, batch, issue, &found, intents),
                    None => {
                        tracing::warn!(
                            issue = %issue.reference(),
                            counterpart = %counterpart,
                            "linked counterpart no longer exists"
                        );
                        Ok(IssueOutcome::Skipped {
                            reason: format!("linked {counterpart} no longer exists"),
                        })
                    }
                }
            }
            Resolution::Adopt(holder) => {
                let Some(found) = batch.issues.get(&holder).cloned() else {
                    return Ok(IssueOutcome::Skipped {
                        reason: format!("{holder} is no longer available"),
                    });
                };
                tracing::info!(issue = %issue.reference(), counterpart = %holder, "adopting existing counterpart");
                self.reconcile(executor, batch, issue, &found, intents)
            }
            Resolution::Create => self.create(executor, batch, &linker, issue, intents),
        }
    }

    fn create(
        &self,
        executor: &Executor<'_>,
        batch: &mut Batch,
        linker: &Linker<'_>,
        issue: &Issue,
        intents: &mut Vec<WriteIntent>,
    ) -> Result<IssueOutcome, SyncError> {
        let destination = issue.source.other();
        if !executor.is_dry_run() {
            let fresh = executor.read(issue.source, &format!("refresh {issue}"), |t| {
                t.get_issue(&issue.id)
            })?;
            if fresh.as_ref().and_then(|f| f.counterpart()).is_some() {
                tracing::info!(issue = %issue.reference(), "linked since listing, not creating");
                return Ok(IssueOutcome::Skipped {
                    reason: "linked since it was listed".to_string(),
                });
            }
        }

        let fields = linker.initial_fields(issue)?;
        let intent = WriteIntent::CreateIssue {
            destination,
            source: issue.reference(),
            fields: fields.clone(),
        };
        intents.push(intent.clone());
        tracing::debug!(issue = %issue.reference(), state = %LinkState::LinkPending, "creating counterpart");
        let created = match executor.apply(&intent, &mut batch.book)? {
            Some(created) => {
                tracing::info!(
                    issue = %issue.reference(),
                    counterpart = %created.reference(),
                    "created counterpart"
                );
                Some(created)
            }
            None => None,
        };
        // A dry run still plans the follow-up writes, against a stand-in.
        let counterpart = match &created {
            Some(created) => created.clone(),
            None => provisional_counterpart(self.config, issue, &fields),
        };

        batch.book.track(&counterpart);
        batch
            .backlinks
            .insert(issue.reference(), counterpart.reference());
        batch.issues.insert(counterpart.reference(), counterpart.clone());
        self.reconcile(executor, batch, issue, &counterpart, intents)?;
        Ok(IssueOutcome::Created {
            counterpart: created.map(|c| c.reference()),
        })
    }

    fn reconcile(
        &self,
        executor: &Executor<'_>,
        batch: &mut Batch,
        issue: &Issue,
        counterpart: &Issue,
        intents: &mut Vec<WriteIntent>,
    ) -> Result<IssueOutcome, SyncError> {
        let Some(pair) = Pair::new(issue, counterpart) else {
            return Ok(IssueOutcome::Skipped {
                reason: format!("{counterpart} is on the same service"),
            });
        };
        let key = pair.key();
        if let Some(outcome) = batch.pairs.get(&key) {
            tracing::debug!(issue = %issue.reference(), "pair already reconciled this run");
            return Ok(outcome.clone());
        }
        batch.pairs.insert(
            key.clone(),
            IssueOutcome::Failed {
                error: "counterpart failed earlier in this run".to_string(),
            },
        );

        for (from, to) in [(issue, counterpart), (counterpart, issue)] {
            if !batch
                .book
                .link_to(&from.reference(), CounterpartRef::to_issue(to))
            {
                tracing::warn!(
                    issue = %from.reference(),
                    expected = %to.reference(),
                    "issue is linked to a different counterpart"
                );
            }
        }

        let plan = Reconciler::new(&self.sides, &self.attribution).plan(&pair, &batch.book)?;
        let (comments, fields): (Vec<_>, Vec<_>) = plan.into_iter().partition(|i| {
            matches!(
                i,
                WriteIntent::AddComment { .. }
                    | WriteIntent::UpdateComment { .. }
                    | WriteIntent::RecordComment { .. }
            )
        });

        let mut writes = 0;
        for intent in comments {
            apply(executor, batch, &intent, &mut writes)?;
            intents.push(intent);
        }
        for intent in batch.book.take_pending(&[key.0.clone(), key.1.clone()]) {
            apply(executor, batch, &intent, &mut writes)?;
            intents.push(intent);
        }
        for intent in fields {
            apply(executor, batch, &intent, &mut writes)?;
            intents.push(intent);
        }

        let outcome = IssueOutcome::Synced { writes };
        batch.pairs.insert(key, outcome.clone());
        Ok(outcome)
    }
}

/// The issue a create of `fields` would produce, for planning dry runs.
///
/// The id is a placeholder derived from the source issue, so stand-ins for
/// different sources never collide within a run.
fn provisional_counterpart(config: &Config, source: &Issue, fields: &IssueFields) -> Issue {
    let destination = source.source.other();
    let now = Utc::now();
    Issue {
        source: destination,
        id: IssueId(format!("new-{}", source.id)),
        project: config.project(destination).to_string(),
        title: fields.title.clone(),
        body: fields.body.clone(),
        labels: fields.labels.clone(),
        milestone: fields.milestone.clone(),
        status: fields.status,
        raw_status: fields.status_name.clone(),
        issue_type: fields.issue_type.clone(),
        priority: fields.priority.clone(),
        components: fields.components.clone(),
        author: User::new("jirahub", None),
        is_bot: true,
        comments: Vec::new(),
        created_at: now,
        updated_at: now,
        url: None,
        link: fields.link.clone(),
        raw: serde_json::Value::Null,
    }
}

fn apply(
    executor: &Executor<'_>,
    batch: &mut Batch,
    intent: &WriteIntent,
    writes: &mut usize,
) -> TrackerResult<()> {
    if intent.is_remote_write() {
        *writes += 1;
    }
    executor.apply(intent, &mut batch.book)?;
    Ok(())
}

fn fetch_all(
    executor: &Executor<'_>,
    source: Source,
    since: Option<DateTime<Utc>>,
) -> TrackerResult<Vec<Issue>> {
    executor.read(source, &format!("list {source} issues"), |t| {
        t.list_issues(since).collect()
    })
}

fn fetch_both(
    executor: &Executor<'_>,
    since: Option<DateTime<Utc>>,
) -> Result<(Vec<Issue>, Vec<Issue>), SyncError> {
    let (github, jira) = thread::scope(|s| {
        let github = s.spawn(|| fetch_all(executor, Source::Github, since));
        let jira = s.spawn(|| fetch_all(executor, Source::Jira, since));
        (github.join(), jira.join())
    });
    let github = github.map_err(|_| SyncError::FetchPanicked(Source::Github.to_string()))??;
    let jira = jira.map_err(|_| SyncError::FetchPanicked(Source::Jira.to_string()))??;
    tracing::debug!(github = github.len(), jira = jira.len(), "fetched candidates");
    Ok((github, jira))
}

/// Load state from `state_path`, run once, and save the next state unless
/// this is a dry run.
pub fn run(
    engine: &SyncEngine<'_>,
    state_path: &Path,
    options: &RunOptions,
) -> Result<SyncReport, SyncError> {
    let state = state_store::load(state_path)?;
    let (report, next) = engine.run(&state, options)?;
    if !options.dry_run {
        state_store::save(state_path, &next)?;
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::memory::MemoryTracker;

    fn config() -> Config {
        let mut config = Config::default();
        config.github.repository = "octo/widgets".into();
        config.jira.server = "https://jira.example.org".into();
        config.jira.project_key = "WID".into();
        config.jira.common.sync.create_issues = true;
        config
    }

    #[test]
    fn empty_trackers_produce_empty_report() {
        let config = config();
        let gh = MemoryTracker::github("octo/widgets");
        let jira = MemoryTracker::jira("WID");
        let engine = SyncEngine::new(&config, &gh, &jira).unwrap();
        let (report, next) = engine.run(&SyncState::default(), &RunOptions::default()).unwrap();
        assert!(report.issues.is_empty());
        assert_eq!(next, SyncState::default());
    }

    #[test]
    fn run_saves_state_unless_dry_run() {
        let config = config();
        let gh = MemoryTracker::github("octo/widgets");
        let jira = MemoryTracker::jira("WID");
        gh.open_issue("Crash on load", &[]);
        let engine = SyncEngine::new(&config, &gh, &jira).unwrap();
        let home = TempDir::new().unwrap();
        let path = state_store::default_path_at(home.path());

        let dry = RunOptions {
            dry_run: true,
            ..RunOptions::default()
        };
        let report = run(&engine, &path, &dry).unwrap();
        assert!(report.dry_run);
        assert!(!path.exists());
        assert!(jira.issues().is_empty());

        let report = run(&engine, &path, &RunOptions::default()).unwrap();
        assert_eq!(report.counts().created, 1);
        let saved = state_store::load(&path).unwrap();
        assert_eq!(saved.cursor, report.next_cursor);
    }
}
