//! GitHub-flavoured Markdown → JIRA wiki markup.

use regex::{Captures, Regex};

use crate::error::MarkupError;
use crate::regions::{isolate_regions, join_regions, Region};
use crate::Markup;

/// Rewrites GitHub Markdown into JIRA wiki markup.
///
/// Bare `#123` references become links to the issue in `repository`, and
/// `@user` mentions become links to the GitHub profile. Fenced code blocks
/// become `{code:lang}` (or `{noformat}` without a language) and are not
/// rewritten further.
#[derive(Debug, Clone)]
pub struct MarkdownToJira {
    web_url: String,
    repository: String,
    headings: Vec<(Regex, &'static str)>,
    fence_open: Regex,
    fence_close: Regex,
    hash_number: Regex,
    user_mention: Regex,
    italic: Regex,
    bold: Regex,
    monospaced: Regex,
    strikethrough: Regex,
    inserted: Regex,
    superscript: Regex,
    subscript: Regex,
    url_with_text: Regex,
    url: Regex,
    quote: Regex,
}

impl MarkdownToJira {
    /// `web_url` is the GitHub web root (`https://github.com`), `repository`
    /// is `owner/name`.
    pub fn new(web_url: &str, repository: &str) -> Result<Self, MarkupError> {
        let headings = [
            (r"(\s|^)###### ", "h6. "),
            (r"(\s|^)##### ", "h5. "),
            (r"(\s|^)#### ", "h4. "),
            (r"(\s|^)### ", "h3. "),
            (r"(\s|^)## ", "h2. "),
            (r"(\s|^)# ", "h1. "),
        ]
        .into_iter()
        .map(|(re, tag)| Ok((Regex::new(re)?, tag)))
        .collect::<Result<Vec<_>, regex::Error>>()?;

        Ok(Self {
            web_url: web_url.trim_end_matches('/').to_string(),
            repository: repository.to_string(),
            headings,
            fence_open: Regex::new(r"```(\w*)")?,
            fence_close: Regex::new(r"```")?,
            hash_number: Regex::new(r"(^|\s)#([0-9]+)($|\s)")?,
            user_mention: Regex::new(r"(^|\s)@(\w+?)\b")?,
            italic: Regex::new(r"(^|[^\w*])\*(\w(.*?\w)?)\*($|[^\w*])")?,
            bold: Regex::new(r"(^|\W)\*\*(\w(.*?\w)?)\*\*($|\W)")?,
            monospaced: Regex::new(r"`(.+?)`")?,
            strikethrough: Regex::new(r"(^|\W)~~(\w(.*?\w)?)~~($|\W)")?,
            inserted: Regex::new(r"<ins>(.+?)</ins>")?,
            superscript: Regex::new(r"<sup>(.+?)</sup>")?,
            subscript: Regex::new(r"<sub>(.+?)</sub>")?,
            url_with_text: Regex::new(r"\[(.*?)\]\((http.*?)\)")?,
            url: Regex::new(r"(\s|^)<?(http[^\s>]*)>?(\s|$)")?,
            quote: Regex::new(r"(?m)((^> .*?$)(\r?\n)?)+")?,
        })
    }

    fn format_link(url: &str, text: Option<&str>) -> String {
        match text {
            Some(text) if !text.is_empty() => format!("[{text}|{url}]"),
            _ => format!("[{url}]"),
        }
    }

    fn issue_url(&self, number: &str) -> String {
        format!("{}/{}/issues/{number}", self.web_url, self.repository)
    }

    fn format_quote(block: &str) -> String {
        let mut content = format!("{{quote}}\n{block}");
        if content.ends_with('\n') {
            content.push_str("{quote}");
        } else {
            content.push_str("\n{quote}");
        }
        content
            .split('\n')
            .map(|line| line.strip_prefix("> ").unwrap_or(line))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn format_content(&self, content: &str) -> String {
        let mut out = self
            .hash_number
            .replace_all(content, |c: &Captures<'_>| {
                let link = Self::format_link(&self.issue_url(&c[2]), Some(&format!("#{}", &c[2])));
                format!("{}{link}{}", &c[1], &c[3])
            })
            .into_owned();
        for (re, tag) in &self.headings {
            out = re
                .replace_all(&out, |c: &Captures<'_>| format!("{}{tag}", &c[1]))
                .into_owned();
        }
        out = self
            .italic
            .replace_all(&out, "${1}_${2}_${4}")
            .into_owned();
        out = self.bold.replace_all(&out, "${1}*${2}*${4}").into_owned();
        out = self.subscript.replace_all(&out, "~${1}~").into_owned();
        out = self.monospaced.replace_all(&out, "{{${1}}}").into_owned();
        out = self
            .strikethrough
            .replace_all(&out, "${1}-${2}-${4}")
            .into_owned();
        out = self.inserted.replace_all(&out, "+${1}+").into_owned();
        out = self.superscript.replace_all(&out, "^${1}^").into_owned();
        out = self
            .user_mention
            .replace_all(&out, |c: &Captures<'_>| {
                let url = format!("{}/{}", self.web_url, &c[2]);
                format!("{}{}", &c[1], Self::format_link(&url, Some(&format!("@{}", &c[2]))))
            })
            .into_owned();
        out = self
            .url_with_text
            .replace_all(&out, |c: &Captures<'_>| Self::format_link(&c[2], Some(&c[1])))
            .into_owned();
        out = self
            .url
            .replace_all(&out, |c: &Captures<'_>| {
                format!("{}{}{}", &c[1], Self::format_link(&c[2], None), &c[3])
            })
            .into_owned();
        self.quote
            .replace_all(&out, |c: &Captures<'_>| Self::format_quote(&c[0]))
            .into_owned()
    }
}

impl Markup for MarkdownToJira {
    fn convert(&self, text: &str) -> String {
        let regions = isolate_regions(
            vec![Region::formatted(text)],
            &self.fence_open,
            &self.fence_close,
            |content, open| match open.get(1).map(|m| m.as_str()) {
                Some(lang) if !lang.is_empty() => {
                    Region::verbatim(format!("{{code:{lang}}}{content}{{code}}"))
                }
                _ => Region::verbatim(format!("{{noformat}}{content}{{noformat}}")),
            },
        );
        join_regions(regions, |t| self.format_content(t))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn conv() -> MarkdownToJira {
        MarkdownToJira::new("https://github.com", "octo/widgets").unwrap()
    }

    #[rstest]
    #[case("# Title", "h1. Title")]
    #[case("intro\n### Sub", "intro\nh3. Sub")]
    #[case("some **bold** text", "some *bold* text")]
    #[case("some *italic* text", "some _italic_ text")]
    #[case("use `cargo` here", "use {{cargo}} here")]
    #[case("a ~~gone~~ b", "a -gone- b")]
    #[case("x<sup>2</sup>", "x^2^")]
    #[case("see [docs](https://example.org/d)", "see [docs|https://example.org/d]")]
    #[case("see https://example.org/d now", "see [https://example.org/d] now")]
    fn inline_markup(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(conv().convert(input), expected);
    }

    #[test]
    fn issue_references_link_to_repository() {
        assert_eq!(
            conv().convert("dup of #12 really"),
            "dup of [#12|https://github.com/octo/widgets/issues/12] really"
        );
    }

    #[test]
    fn mentions_link_to_profile() {
        assert_eq!(
            conv().convert("ping @mona please"),
            "ping [@mona|https://github.com/mona] please"
        );
    }

    #[test]
    fn fenced_code_is_not_rewritten() {
        let input = "before\n```rust\nlet x = **y**; // #3\n```\n```\nraw *text*\n```";
        let out = conv().convert(input);
        assert!(out.contains("{code:rust}\nlet x = **y**; // #3\n{code}"), "{out}");
        assert!(out.contains("{noformat}\nraw *text*\n{noformat}"), "{out}");
    }

    #[test]
    fn block_quotes_become_quote_macros() {
        assert_eq!(
            conv().convert("> quoted\n> lines\nafter"),
            "{quote}\nquoted\nlines\n{quote}after"
        );
    }

    #[test]
    fn conversion_is_deterministic() {
        let c = conv();
        let text = "# H\n**b** #4 @x `m`";
        assert_eq!(c.convert(text), c.convert(text));
    }
}
