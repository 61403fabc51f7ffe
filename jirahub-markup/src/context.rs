//! Attribution context: serializable rendering payload built from an issue
//! or comment on the source service.

use serde::{Deserialize, Serialize};

use jirahub_core::types::{Comment, Issue, Source};

use crate::error::MarkupError;

/// Payload for the attribution templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributionContext {
    /// Display name of the source service (`GitHub`, `JIRA`).
    pub source: String,
    /// How the source issue is referred to (`#12`, `PROJ-7`).
    pub reference: String,
    pub url: Option<String>,
    /// Display name of the source author.
    pub author: String,
}

impl AttributionContext {
    pub fn for_issue(issue: &Issue) -> Self {
        Self {
            source: issue.source.to_string(),
            reference: reference(issue),
            url: issue.url.clone(),
            author: issue.author.display_name.clone(),
        }
    }

    /// The comment URL is derived from the issue URL the way each service
    /// anchors comments.
    pub fn for_comment(issue: &Issue, comment: &Comment) -> Self {
        let url = issue.url.as_ref().map(|base| match issue.source {
            Source::Github => format!("{base}#issuecomment-{}", comment.id),
            Source::Jira => format!(
                "{base}?focusedCommentId={id}&page=com.atlassian.jira.plugin.system.issuetabpanels%3Acomment-tabpanel#comment-{id}",
                id = comment.id
            ),
        });
        Self {
            source: issue.source.to_string(),
            reference: reference(issue),
            url,
            author: comment.author.display_name.clone(),
        }
    }

    /// Build a [`tera::Context`] from this payload.
    pub fn to_tera_context(&self) -> Result<tera::Context, MarkupError> {
        let value = serde_json::to_value(self)?;
        Ok(tera::Context::from_value(value)?)
    }
}

fn reference(issue: &Issue) -> String {
    match issue.source {
        Source::Github => format!("#{}", issue.id),
        Source::Jira => issue.id.to_string(),
    }
}
