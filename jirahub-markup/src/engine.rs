//! Tera attribution engine: [`EntityKind`] and [`Attribution`].
//!
//! | Destination | Issue template        | Comment template        |
//! |-------------|-----------------------|-------------------------|
//! | JIRA        | `jira/issue.tera`     | `jira/comment.tera`     |
//! | GitHub      | `github/issue.tera`   | `github/comment.tera`   |
//!
//! Templates render in the destination's markup, so they are chosen by the
//! service the text is written *to*.

use tera::Tera;

use jirahub_core::types::Source;

use crate::context::AttributionContext;
use crate::error::MarkupError;

// ---------------------------------------------------------------------------
// Embedded templates, baked into the binary via include_str!
// ---------------------------------------------------------------------------

const TPLS: &[(&str, &str)] = &[
    ("jira/issue.tera", include_str!("templates/jira/issue.tera")),
    ("jira/comment.tera", include_str!("templates/jira/comment.tera")),
    ("github/issue.tera", include_str!("templates/github/issue.tera")),
    ("github/comment.tera", include_str!("templates/github/comment.tera")),
];

// ---------------------------------------------------------------------------
// EntityKind
// ---------------------------------------------------------------------------

/// What is being attributed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Issue,
    Comment,
}

fn template_name(destination: Source, kind: EntityKind) -> &'static str {
    match (destination, kind) {
        (Source::Jira, EntityKind::Issue) => "jira/issue.tera",
        (Source::Jira, EntityKind::Comment) => "jira/comment.tera",
        (Source::Github, EntityKind::Issue) => "github/issue.tera",
        (Source::Github, EntityKind::Comment) => "github/comment.tera",
    }
}

// ---------------------------------------------------------------------------
// Attribution
// ---------------------------------------------------------------------------

/// Renders the attribution footer appended to mirrored bodies and comments.
///
/// Create once with [`Attribution::new`] and reuse.
pub struct Attribution {
    tera: Tera,
}

impl Attribution {
    pub fn new() -> Result<Self, MarkupError> {
        let mut tera = Tera::default();
        tera.add_raw_templates(TPLS.iter().copied())?;
        Ok(Attribution { tera })
    }

    /// The footer alone, without trailing whitespace.
    pub fn footer(
        &self,
        destination: Source,
        kind: EntityKind,
        ctx: &AttributionContext,
    ) -> Result<String, MarkupError> {
        let tera_ctx = ctx.to_tera_context()?;
        let rendered = self.tera.render(template_name(destination, kind), &tera_ctx)?;
        Ok(rendered.trim_end().to_string())
    }

    /// `body` followed by the footer, separated by a blank line.
    pub fn attach(
        &self,
        destination: Source,
        kind: EntityKind,
        ctx: &AttributionContext,
        body: &str,
    ) -> Result<String, MarkupError> {
        let footer = self.footer(destination, kind, ctx)?;
        let body = body.trim_end();
        if body.is_empty() {
            Ok(footer)
        } else {
            Ok(format!("{body}\n\n{footer}"))
        }
    }
}
