//! # jirahub-markup
//!
//! Cross-service markup adaptation and attribution rendering.
//!
//! - [`MarkdownToJira`] rewrites GitHub Markdown for JIRA.
//! - [`JiraToMarkdown`] rewrites JIRA wiki markup for GitHub.
//! - [`Attribution`] renders the footer naming where mirrored text came from.
//!
//! Every conversion is pure: identical input always yields identical output,
//! so mirrored text can be re-derived and compared on every run.

pub mod context;
pub mod engine;
pub mod error;
mod regions;
pub mod to_jira;
pub mod to_markdown;

pub use context::AttributionContext;
pub use engine::{Attribution, EntityKind};
pub use error::MarkupError;
pub use to_jira::MarkdownToJira;
pub use to_markdown::JiraToMarkdown;

/// A text conversion into one service's markup.
pub trait Markup: Send + Sync {
    fn convert(&self, text: &str) -> String;
}
