//! Formatter pipeline for text copied into a destination service.
//!
//! Stages run in a fixed order: redaction, markup adaptation, then the
//! optional user override. Every stage is pure, so the output can be
//! re-derived on each run and compared with what was written last time.

use std::sync::Arc;

use regex::Regex;

use jirahub_core::config::Config;
use jirahub_core::types::{Comment, Issue, Source};
use jirahub_markup::{JiraToMarkdown, Markup, MarkdownToJira};

use crate::error::SyncError;

/// Replacement for every redacted character.
pub const REDACTION_CHAR: char = '\u{2588}';

/// Which piece of text is being formatted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextField {
    Title,
    Body,
    Comment,
}

/// The untouched source entity handed to a user override.
#[derive(Debug, Clone, Copy)]
pub struct FormatInput<'a> {
    pub issue: &'a Issue,
    pub comment: Option<&'a Comment>,
    pub field: TextField,
}

/// Final formatting stage: receives the original entity and the pipeline
/// output so far, returns the text to write.
pub type FormatOverride = Arc<dyn Fn(&FormatInput<'_>, String) -> String + Send + Sync>;

/// Text pipeline for one destination service.
pub struct Formatter {
    destination: Source,
    redactions: Vec<Regex>,
    markup: Box<dyn Markup>,
    user: Option<FormatOverride>,
}

impl Formatter {
    /// Build the pipeline for text written into `destination`, using that
    /// side's `redact_patterns`.
    pub fn from_config(config: &Config, destination: Source) -> Result<Self, SyncError> {
        let redactions = config
            .side(destination)
            .sync
            .redact_patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        let web_url = config.github.web_url();
        let markup: Box<dyn Markup> = match destination {
            Source::Jira => Box::new(MarkdownToJira::new(&web_url, &config.github.repository)?),
            Source::Github => Box::new(JiraToMarkdown::new(
                &web_url,
                &config.github.repository,
                &config.jira.server,
            )?),
        };
        Ok(Self::new(destination, redactions, markup))
    }

    pub fn new(destination: Source, redactions: Vec<Regex>, markup: Box<dyn Markup>) -> Self {
        Self {
            destination,
            redactions,
            markup,
            user: None,
        }
    }

    pub fn with_override(mut self, user: FormatOverride) -> Self {
        self.set_override(user);
        self
    }

    pub fn set_override(&mut self, user: FormatOverride) {
        self.user = Some(user);
    }

    pub fn destination(&self) -> Source {
        self.destination
    }

    /// Run every stage over `text`.
    pub fn transform(&self, input: &FormatInput<'_>, text: &str) -> String {
        let mut out = self.redact(text);
        if input.field != TextField::Title {
            // Markup can join text into a fresh match, so redact again.
            out = self.redact(&self.markup.convert(&out));
        }
        match &self.user {
            Some(user) => user(input, out),
            None => out,
        }
    }

    pub fn title(&self, issue: &Issue) -> String {
        let input = FormatInput {
            issue,
            comment: None,
            field: TextField::Title,
        };
        self.transform(&input, &issue.title)
    }

    pub fn body(&self, issue: &Issue) -> String {
        let input = FormatInput {
            issue,
            comment: None,
            field: TextField::Body,
        };
        self.transform(&input, &issue.body)
    }

    pub fn comment(&self, issue: &Issue, comment: &Comment) -> String {
        let input = FormatInput {
            issue,
            comment: Some(comment),
            field: TextField::Comment,
        };
        self.transform(&input, &comment.body)
    }

    fn redact(&self, text: &str) -> String {
        let mut out = text.to_string();
        for re in &self.redactions {
            out = re
                .replace_all(&out, |c: &regex::Captures<'_>| {
                    REDACTION_CHAR.to_string().repeat(c[0].chars().count())
                })
                .into_owned();
        }
        out
    }
}
