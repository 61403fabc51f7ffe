//! JIRA wiki markup → GitHub-flavoured Markdown.

use regex::{Captures, Regex};

use crate::error::MarkupError;
use crate::regions::{isolate_regions, join_regions, Region};
use crate::Markup;

/// Invisible separator inserted after `@` so mirrored text never pings a
/// GitHub user.
const MENTION_BREAK: &str = "\u{2063}";
/// Word joiner entity inserted after `#` so numbers never auto-link to
/// unrelated GitHub issues.
const REFERENCE_BREAK: &str = "&#x2060;";

/// Rewrites JIRA wiki markup into GitHub Markdown.
///
/// `{code}`, `{noformat}` and `{quote}` regions are isolated first; code is
/// never rewritten. Links back to `repository` are shortened to `#123`.
#[derive(Debug, Clone)]
pub struct JiraToMarkdown {
    repository: String,
    jira_server: String,
    issue_url: Regex,
    pull_url: Regex,
    profile_url: Regex,
    headings: Vec<(Regex, &'static str)>,
    code_open: Regex,
    code_close: Regex,
    noformat: Regex,
    quote: Regex,
    color: Regex,
    hash_number: Regex,
    bold: Regex,
    italic: Regex,
    monospaced: Regex,
    strikethrough: Regex,
    inserted: Regex,
    superscript: Regex,
    subscript: Regex,
    url_with_text: Regex,
    url: Regex,
    user_mention: Regex,
    github_mention: Regex,
}

impl JiraToMarkdown {
    pub fn new(web_url: &str, repository: &str, jira_server: &str) -> Result<Self, MarkupError> {
        let escaped = regex::escape(web_url.trim_end_matches('/'));
        let headings = (1..=6)
            .map(|level| {
                let tag: &'static str = ["# ", "## ", "### ", "#### ", "##### ", "###### "][level - 1];
                Ok((Regex::new(&format!(r"\bh{level}\. "))?, tag))
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;

        Ok(Self {
            repository: repository.to_string(),
            jira_server: jira_server.trim_end_matches('/').to_string(),
            issue_url: Regex::new(&format!(r"^{escaped}/([^/]+/[^/]+)/issues/([0-9]+)$"))?,
            pull_url: Regex::new(&format!(r"^{escaped}/([^/]+/[^/]+)/pull/([0-9]+)$"))?,
            profile_url: Regex::new(&format!(r"^{escaped}/([^/]+)$"))?,
            headings,
            code_open: Regex::new(r"\{code(:(.*?))?\}")?,
            code_close: Regex::new(r"\{code\}")?,
            noformat: Regex::new(r"\{noformat\}")?,
            quote: Regex::new(r"\{quote\}")?,
            color: Regex::new(r"\{color.*?\}")?,
            hash_number: Regex::new(r"#([0-9]+)")?,
            bold: Regex::new(r"(^|\W)\*(\w(.*?\w)?)\*($|\W)")?,
            italic: Regex::new(r"(^|\W)_(\w(.*?\w)?)_($|\W)")?,
            monospaced: Regex::new(r"\{\{(.*?)\}\}")?,
            strikethrough: Regex::new(r"(^|\W)-(\w(.*?\w)?)-($|\W)")?,
            inserted: Regex::new(r"(^|\W)\+(\w(.*?\w)?)\+($|\W)")?,
            superscript: Regex::new(r"(^|\W)\^(\w(.*?\w)?)\^($|\W)")?,
            subscript: Regex::new(r"(^|\W)~(\w(.*?\w)?)~($|\W)")?,
            url_with_text: Regex::new(r"\[([^\[\]|]*?)\|(http.*?)\]")?,
            url: Regex::new(r"(\s|^)\[?(http[^\s\]]*)\]?(\s|$)")?,
            user_mention: Regex::new(r"\[~(.+?)\]")?,
            github_mention: Regex::new(r"(^|\s)@(\w+?)\b")?,
        })
    }

    fn format_link(&self, url: &str, text: Option<&str>) -> String {
        if let Some(text) = text.filter(|t| !t.is_empty()) {
            return format!("[{text}]({url})");
        }
        for re in [&self.issue_url, &self.pull_url] {
            if let Some(c) = re.captures(url) {
                return if c[1] == *self.repository {
                    format!("#{}", &c[2])
                } else {
                    format!("{}#{}", &c[1], &c[2])
                };
            }
        }
        if let Some(c) = self.profile_url.captures(url) {
            return format!("@{}", &c[1]);
        }
        format!("<{url}>")
    }

    fn profile(&self, username: &str) -> String {
        format!(
            "{}/secure/ViewProfile.jspa?name={username}",
            self.jira_server
        )
    }

    fn format_quoted(content: &str) -> Region {
        if content.is_empty() {
            return Region::verbatim("");
        }
        let mut lines: Vec<&str> = content.split('\n').collect();
        if lines.first().is_some_and(|l| l.trim().is_empty()) {
            lines.remove(0);
        }
        if lines.last().is_some_and(|l| l.trim().is_empty()) {
            lines.pop();
        }
        let quoted: Vec<String> = lines.iter().map(|l| format!("> {l}")).collect();
        Region::formatted(format!("\n{}\n", quoted.join("\n")))
    }

    fn format_content(&self, content: &str) -> String {
        let mut out = self
            .github_mention
            .replace_all(content, |c: &Captures<'_>| {
                format!("{}@{MENTION_BREAK}{}", &c[1], &c[2])
            })
            .into_owned();
        out = self
            .hash_number
            .replace_all(&out, |c: &Captures<'_>| format!("#{REFERENCE_BREAK}{}", &c[1]))
            .into_owned();
        for (re, tag) in &self.headings {
            out = re.replace_all(&out, *tag).into_owned();
        }
        out = self.color.replace_all(&out, "").into_owned();
        out = self.bold.replace_all(&out, "${1}**${2}**${4}").into_owned();
        out = self.italic.replace_all(&out, "${1}*${2}*${4}").into_owned();
        out = self
            .subscript
            .replace_all(&out, "${1}<sub>${2}</sub>${4}")
            .into_owned();
        out = self.monospaced.replace_all(&out, "`${1}`").into_owned();
        out = self
            .strikethrough
            .replace_all(&out, "${1}~~${2}~~${4}")
            .into_owned();
        out = self
            .inserted
            .replace_all(&out, "${1}<ins>${2}</ins>${4}")
            .into_owned();
        out = self
            .superscript
            .replace_all(&out, "${1}<sup>${2}</sup>${4}")
            .into_owned();
        out = self
            .url_with_text
            .replace_all(&out, |c: &Captures<'_>| self.format_link(&c[2], Some(&c[1])))
            .into_owned();
        out = self
            .url
            .replace_all(&out, |c: &Captures<'_>| {
                format!("{}{}{}", &c[1], self.format_link(&c[2], None), &c[3])
            })
            .into_owned();
        self.user_mention
            .replace_all(&out, |c: &Captures<'_>| {
                self.format_link(&self.profile(&c[1]), Some(&c[1]))
            })
            .into_owned()
    }
}

impl Markup for JiraToMarkdown {
    fn convert(&self, text: &str) -> String {
        let regions = vec![Region::formatted(text)];
        let regions = isolate_regions(regions, &self.code_open, &self.code_close, |content, open| {
            if content.is_empty() {
                return Region::verbatim("");
            }
            let lang = open.get(2).map(|m| m.as_str()).unwrap_or("");
            Region::verbatim(format!("```{lang}{content}```"))
        });
        let regions = isolate_regions(regions, &self.noformat, &self.noformat, |content, _| {
            if content.is_empty() {
                Region::verbatim("")
            } else {
                Region::verbatim(format!("```{content}```"))
            }
        });
        let regions = isolate_regions(regions, &self.quote, &self.quote, |content, _| {
            Self::format_quoted(content)
        });
        join_regions(regions, |t| self.format_content(t))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn conv() -> JiraToMarkdown {
        JiraToMarkdown::new("https://github.com", "octo/widgets", "https://jira.example.org/")
            .unwrap()
    }

    #[rstest]
    #[case("h1. Title", "# Title")]
    #[case("h3. Sub", "### Sub")]
    #[case("some *bold* text", "some **bold** text")]
    #[case("some _italic_ text", "some *italic* text")]
    #[case("use {{cargo}} here", "use `cargo` here")]
    #[case("a -gone- b", "a ~~gone~~ b")]
    #[case("{color:red}warn{color}", "warn")]
    #[case("see [docs|https://example.org/d]", "see [docs](https://example.org/d)")]
    #[case("see https://example.org/d now", "see <https://example.org/d> now")]
    #[case("well-known re-run", "well-known re-run")]
    fn inline_markup(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(conv().convert(input), expected);
    }

    #[test]
    fn github_links_are_shortened() {
        let c = conv();
        assert_eq!(c.convert("[https://github.com/octo/widgets/issues/3]"), "#3");
        assert_eq!(
            c.convert("[https://github.com/other/repo/pull/9]"),
            "other/repo#9"
        );
        assert_eq!(c.convert("[https://github.com/mona]"), "@mona");
    }

    #[test]
    fn references_and_mentions_are_neutralised() {
        let out = conv().convert("fixes #12, thanks @mona");
        assert_eq!(out, "fixes #&#x2060;12, thanks @\u{2063}mona");
        assert!(!out.contains("#12"));
        assert!(!out.contains("@mona"));
    }

    #[test]
    fn jira_mentions_link_to_profile() {
        assert_eq!(
            conv().convert("cc [~jdoe]"),
            "cc [jdoe](https://jira.example.org/secure/ViewProfile.jspa?name=jdoe)"
        );
    }

    #[test]
    fn code_regions_are_verbatim() {
        let out = conv().convert("{code:python}\nx = *y* # 5\n{code}\n{noformat}\n_raw_\n{noformat}");
        assert_eq!(out, "```python\nx = *y* # 5\n```\n```\n_raw_\n```");
    }

    #[test]
    fn quotes_become_block_quotes() {
        assert_eq!(
            conv().convert("{quote}\nfirst\n*second*\n{quote}"),
            "\n> first\n> **second**\n"
        );
    }
}
