//! Reconciler: computes the writes that bring a linked pair into agreement.
//!
//! Planning is pure. [`Reconciler::plan`] returns an ordered list of
//! [`WriteIntent`]s (comments first, then title/body, labels, milestone and
//! status) which the executor applies, or reports in a dry run. Link
//! metadata changes accumulate in a [`LinkBook`] and are flushed as
//! [`WriteIntent::WriteLink`] writes.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use similar::TextDiff;

use jirahub_core::feature::SyncFeature;
use jirahub_core::types::{
    Comment, CommentId, CounterpartRef, Issue, IssueFields, IssueRef, IssueStatus, LinkMetadata,
    Source,
};
use jirahub_markup::{Attribution, AttributionContext, EntityKind};

use crate::error::SyncError;
use crate::linker::{core_labels, is_mirror_of};
use crate::side::Sides;

// ---------------------------------------------------------------------------
// Write intents
// ---------------------------------------------------------------------------

/// One write the engine wants to make.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteIntent {
    CreateIssue {
        destination: Source,
        source: IssueRef,
        fields: IssueFields,
    },
    AddComment {
        target: IssueRef,
        origin: IssueRef,
        origin_comment: CommentId,
        body: String,
    },
    UpdateComment {
        target: IssueRef,
        comment: CommentId,
        origin_comment: CommentId,
        previous: String,
        body: String,
    },
    /// A mirror already exists on the destination; only the mapping is missing.
    RecordComment {
        origin: IssueRef,
        origin_comment: CommentId,
        mirror: CommentId,
    },
    UpdateTitle {
        target: IssueRef,
        previous: String,
        title: String,
    },
    UpdateBody {
        target: IssueRef,
        previous: String,
        body: String,
    },
    SetLabels {
        target: IssueRef,
        previous: BTreeSet<String>,
        labels: BTreeSet<String>,
    },
    SetMilestone {
        target: IssueRef,
        previous: Option<String>,
        milestone: Option<String>,
    },
    SetStatus {
        target: IssueRef,
        previous: IssueStatus,
        status: IssueStatus,
        status_name: Option<String>,
    },
    WriteLink {
        target: IssueRef,
        link: LinkMetadata,
    },
}

impl WriteIntent {
    /// Service the write goes to.
    pub fn service(&self) -> Source {
        match self {
            WriteIntent::CreateIssue { destination, .. } => *destination,
            WriteIntent::RecordComment { origin, .. } => origin.source,
            WriteIntent::AddComment { target, .. }
            | WriteIntent::UpdateComment { target, .. }
            | WriteIntent::UpdateTitle { target, .. }
            | WriteIntent::UpdateBody { target, .. }
            | WriteIntent::SetLabels { target, .. }
            | WriteIntent::SetMilestone { target, .. }
            | WriteIntent::SetStatus { target, .. }
            | WriteIntent::WriteLink { target, .. } => target.source,
        }
    }

    /// Whether applying this intent calls a tracker.
    pub fn is_remote_write(&self) -> bool {
        !matches!(self, WriteIntent::RecordComment { .. })
    }

    /// Unified diff for text replacements.
    pub fn diff(&self) -> Option<String> {
        let (previous, next) = match self {
            WriteIntent::UpdateTitle { previous, title, .. } => (previous, title),
            WriteIntent::UpdateBody { previous, body, .. } => (previous, body),
            WriteIntent::UpdateComment { previous, body, .. } => (previous, body),
            _ => return None,
        };
        Some(
            TextDiff::from_lines(previous.as_str(), next.as_str())
                .unified_diff()
                .header("current", "proposed")
                .context_radius(3)
                .to_string(),
        )
    }
}

fn fmt_labels(labels: &BTreeSet<String>) -> String {
    let items: Vec<&str> = labels.iter().map(String::as_str).collect();
    format!("[{}]", items.join(", "))
}

fn fmt_optional(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("(none)")
}

impl fmt::Display for WriteIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteIntent::CreateIssue {
                destination,
                source,
                fields,
            } => write!(f, "create {destination} issue for {source}: {:?}", fields.title),
            WriteIntent::AddComment {
                target,
                origin,
                origin_comment,
                ..
            } => write!(
                f,
                "add comment to {target} mirroring comment {origin_comment} of {origin}"
            ),
            WriteIntent::UpdateComment {
                target, comment, ..
            } => write!(f, "update comment {comment} on {target}"),
            WriteIntent::RecordComment {
                origin,
                origin_comment,
                mirror,
            } => write!(
                f,
                "record existing mirror {mirror} of comment {origin_comment} on {origin}"
            ),
            WriteIntent::UpdateTitle { target, .. } => write!(f, "update title of {target}"),
            WriteIntent::UpdateBody { target, .. } => write!(f, "update body of {target}"),
            WriteIntent::SetLabels {
                target,
                previous,
                labels,
            } => write!(
                f,
                "set labels of {target}: {} -> {}",
                fmt_labels(previous),
                fmt_labels(labels)
            ),
            WriteIntent::SetMilestone {
                target,
                previous,
                milestone,
            } => write!(
                f,
                "set milestone of {target}: {} -> {}",
                fmt_optional(previous),
                fmt_optional(milestone)
            ),
            WriteIntent::SetStatus {
                target,
                previous,
                status,
                status_name,
            } => {
                write!(f, "set status of {target}: {previous} -> {status}")?;
                if let Some(name) = status_name {
                    write!(f, " ({name})")?;
                }
                Ok(())
            }
            WriteIntent::WriteLink { target, link } => match &link.counterpart {
                Some(c) => write!(f, "link {target} to {}", c.issue_ref()),
                None => write!(f, "write link metadata on {target}"),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Link book
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct BookEntry {
    written: LinkMetadata,
    working: LinkMetadata,
}

/// Link metadata as last read or written, and as it should become.
#[derive(Debug, Clone, Default)]
pub struct LinkBook {
    entries: BTreeMap<IssueRef, BookEntry>,
}

impl LinkBook {
    /// Start tracking `issue`. Already tracked issues keep their state.
    pub fn track(&mut self, issue: &Issue) {
        self.entries
            .entry(issue.reference())
            .or_insert_with(|| BookEntry {
                written: issue.link.clone(),
                working: issue.link.clone(),
            });
    }

    pub fn link(&self, issue: &IssueRef) -> Option<&LinkMetadata> {
        self.entries.get(issue).map(|e| &e.working)
    }

    /// Point `issue` at `counterpart`. An existing link to a different
    /// issue is left alone and `false` is returned.
    pub fn link_to(&mut self, issue: &IssueRef, counterpart: CounterpartRef) -> bool {
        let Some(entry) = self.entries.get_mut(issue) else {
            return false;
        };
        match &entry.working.counterpart {
            Some(existing) => existing.issue_ref() == counterpart.issue_ref(),
            None => {
                entry.working.counterpart = Some(counterpart);
                true
            }
        }
    }

    pub fn record_comment(
        &mut self,
        origin: &IssueRef,
        local: CommentId,
        mirror: CommentId,
    ) -> bool {
        match self.entries.get_mut(origin) {
            Some(entry) => entry.working.record_comment(local, mirror),
            None => false,
        }
    }

    /// Metadata writes for the changed entries among `issues`. Entries
    /// count as written once returned.
    pub fn take_pending(&mut self, issues: &[IssueRef]) -> Vec<WriteIntent> {
        let mut writes = Vec::new();
        for (target, entry) in &mut self.entries {
            if issues.contains(target) && entry.working != entry.written {
                entry.written = entry.working.clone();
                writes.push(WriteIntent::WriteLink {
                    target: target.clone(),
                    link: entry.working.clone(),
                });
            }
        }
        writes
    }
}

// ---------------------------------------------------------------------------
// Pairs
// ---------------------------------------------------------------------------

/// A linked pair, one issue per service.
#[derive(Debug, Clone, Copy)]
pub struct Pair<'a> {
    pub github: &'a Issue,
    pub jira: &'a Issue,
}

impl<'a> Pair<'a> {
    /// Order two issues from different services into a pair.
    pub fn new(a: &'a Issue, b: &'a Issue) -> Option<Self> {
        match (a.source, b.source) {
            (Source::Github, Source::Jira) => Some(Self { github: a, jira: b }),
            (Source::Jira, Source::Github) => Some(Self { github: b, jira: a }),
            _ => None,
        }
    }

    pub fn issue(&self, source: Source) -> &'a Issue {
        match source {
            Source::Github => self.github,
            Source::Jira => self.jira,
        }
    }

    pub fn key(&self) -> (IssueRef, IssueRef) {
        (self.github.reference(), self.jira.reference())
    }
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

pub struct Reconciler<'a> {
    sides: &'a Sides,
    attribution: &'a Attribution,
}

impl<'a> Reconciler<'a> {
    pub fn new(sides: &'a Sides, attribution: &'a Attribution) -> Self {
        Self { sides, attribution }
    }

    /// Destination of `feature` for this pair, if any.
    ///
    /// With both directions enabled the side updated last is authoritative;
    /// equal timestamps favour GitHub.
    pub fn direction(&self, pair: &Pair<'_>, feature: SyncFeature) -> Option<Source> {
        let into_github = self.sides.github.is_enabled(feature);
        let into_jira = self.sides.jira.is_enabled(feature);
        match (into_github, into_jira) {
            (false, false) => None,
            (true, false) => Some(Source::Github),
            (false, true) => Some(Source::Jira),
            (true, true) if pair.jira.updated_at > pair.github.updated_at => Some(Source::Github),
            (true, true) => Some(Source::Jira),
        }
    }

    pub fn plan(&self, pair: &Pair<'_>, book: &LinkBook) -> Result<Vec<WriteIntent>, SyncError> {
        let mut intents = Vec::new();
        for origin in Source::all() {
            if self.sides.get(origin.other()).is_enabled(SyncFeature::SyncComments) {
                self.plan_comments(pair, *origin, book, &mut intents)?;
            }
        }
        for origin in Source::all() {
            self.plan_text(pair, *origin, &mut intents)?;
        }
        self.plan_labels(pair, &mut intents);
        self.plan_milestone(pair, &mut intents);
        self.plan_status(pair, &mut intents);
        Ok(intents)
    }

    fn plan_comments(
        &self,
        pair: &Pair<'_>,
        origin_source: Source,
        book: &LinkBook,
        out: &mut Vec<WriteIntent>,
    ) -> Result<(), SyncError> {
        let origin = pair.issue(origin_source);
        let target = pair.issue(origin_source.other());
        let destination = self.sides.get(target.source);
        let link = book.link(&origin.reference()).unwrap_or(&origin.link);

        let mut comments: Vec<&Comment> = origin.comments.iter().collect();
        comments.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        for comment in comments {
            if comment.is_bot || comment.mirror_of.is_some() || target.link.produced(&comment.id) {
                continue;
            }
            let body = self.attribution.attach(
                target.source,
                EntityKind::Comment,
                &AttributionContext::for_comment(origin, comment),
                &destination.formatter.comment(origin, comment),
            )?;
            match link.mirror_of(&comment.id) {
                Some(mirror_id) => {
                    match target.comments.iter().find(|c| &c.id == mirror_id) {
                        Some(mirror) if mirror.body != body => out.push(WriteIntent::UpdateComment {
                            target: target.reference(),
                            comment: mirror_id.clone(),
                            origin_comment: comment.id.clone(),
                            previous: mirror.body.clone(),
                            body,
                        }),
                        Some(_) => {}
                        None => tracing::debug!(
                            issue = %target.reference(),
                            comment = %mirror_id,
                            "mirrored comment no longer exists"
                        ),
                    }
                }
                None => match target
                    .comments
                    .iter()
                    .find(|c| c.mirror_of.as_ref() == Some(&comment.id))
                {
                    Some(existing) => out.push(WriteIntent::RecordComment {
                        origin: origin.reference(),
                        origin_comment: comment.id.clone(),
                        mirror: existing.id.clone(),
                    }),
                    None => out.push(WriteIntent::AddComment {
                        target: target.reference(),
                        origin: origin.reference(),
                        origin_comment: comment.id.clone(),
                        body,
                    }),
                },
            }
        }
        Ok(())
    }

    /// Title and body follow the source only on bot-owned mirrors.
    fn plan_text(
        &self,
        pair: &Pair<'_>,
        origin_source: Source,
        out: &mut Vec<WriteIntent>,
    ) -> Result<(), SyncError> {
        let origin = pair.issue(origin_source);
        let target = pair.issue(origin_source.other());
        if !is_mirror_of(target, origin) {
            return Ok(());
        }
        let formatter = &self.sides.get(target.source).formatter;

        let title = formatter.title(origin);
        if title != target.title {
            out.push(WriteIntent::UpdateTitle {
                target: target.reference(),
                previous: target.title.clone(),
                title,
            });
        }
        let body = self.attribution.attach(
            target.source,
            EntityKind::Issue,
            &AttributionContext::for_issue(origin),
            &formatter.body(origin),
        )?;
        if body != target.body {
            out.push(WriteIntent::UpdateBody {
                target: target.reference(),
                previous: target.body.clone(),
                body,
            });
        }
        Ok(())
    }

    fn plan_labels(&self, pair: &Pair<'_>, out: &mut Vec<WriteIntent>) {
        let destination = self.direction(pair, SyncFeature::SyncLabels);
        for source in Source::all() {
            let issue = pair.issue(*source);
            let side = self.sides.get(*source);
            let mut desired = if destination == Some(*source) {
                let other = source.other();
                core_labels(pair.issue(other), self.sides.get(other))
            } else {
                issue.labels.clone()
            };
            desired.extend(side.managed_labels().iter().cloned());
            if desired != issue.labels {
                out.push(WriteIntent::SetLabels {
                    target: issue.reference(),
                    previous: issue.labels.clone(),
                    labels: desired,
                });
            }
        }
    }

    fn plan_milestone(&self, pair: &Pair<'_>, out: &mut Vec<WriteIntent>) {
        let Some(destination) = self.direction(pair, SyncFeature::SyncMilestones) else {
            return;
        };
        let target = pair.issue(destination);
        let source = pair.issue(destination.other());
        if target.milestone != source.milestone {
            out.push(WriteIntent::SetMilestone {
                target: target.reference(),
                previous: target.milestone.clone(),
                milestone: source.milestone.clone(),
            });
        }
    }

    fn plan_status(&self, pair: &Pair<'_>, out: &mut Vec<WriteIntent>) {
        let Some(destination) = self.direction(pair, SyncFeature::SyncStatus) else {
            return;
        };
        let target = pair.issue(destination);
        let source = pair.issue(destination.other());
        if target.status != source.status {
            out.push(WriteIntent::SetStatus {
                target: target.reference(),
                previous: target.status,
                status: source.status,
                status_name: self.sides.get(destination).status_name(source.status),
            });
        }
    }
}
