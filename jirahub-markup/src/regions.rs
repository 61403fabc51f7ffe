//! Splitting text into regions that are rewritten and regions that are left
//! verbatim (code blocks, noformat blocks).

use regex::{Captures, Regex};

/// A run of text, and whether the inline rewrites still apply to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Region {
    pub text: String,
    pub formatted: bool,
}

impl Region {
    pub fn formatted(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            formatted: true,
        }
    }

    pub fn verbatim(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            formatted: false,
        }
    }
}

/// Carve every `open ... close` span out of the still-formatted regions.
///
/// `handler` receives the text between the delimiters and the opening match
/// and returns the replacement region. An opening delimiter without a close
/// extends to the end of the region.
pub(crate) fn isolate_regions<F>(
    regions: Vec<Region>,
    open: &Regex,
    close: &Regex,
    mut handler: F,
) -> Vec<Region>
where
    F: FnMut(&str, &Captures<'_>) -> Region,
{
    let mut out = Vec::with_capacity(regions.len());
    for region in regions {
        if !region.formatted {
            out.push(region);
            continue;
        }
        let content = region.text.as_str();
        let mut index = 0;
        while index < content.len() {
            let Some(open_caps) = open.captures_at(content, index) else {
                out.push(Region::formatted(&content[index..]));
                break;
            };
            let Some(open_match) = open_caps.get(0) else {
                break;
            };
            if open_match.start() > index {
                out.push(Region::formatted(&content[index..open_match.start()]));
            }
            let start = open_match.end();
            let (end, next) = match close.find_at(content, start) {
                Some(close_match) => (close_match.start(), close_match.end()),
                None => (content.len(), content.len()),
            };
            out.push(handler(&content[start..end], &open_caps));
            index = next;
        }
    }
    out
}

/// Concatenate regions, rewriting the formatted ones with `format`.
pub(crate) fn join_regions<F>(regions: Vec<Region>, mut format: F) -> String
where
    F: FnMut(&str) -> String,
{
    regions
        .into_iter()
        .map(|r| if r.formatted { format(&r.text) } else { r.text })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fences() -> (Regex, Regex) {
        (Regex::new(r"```(\w*)").unwrap(), Regex::new(r"```").unwrap())
    }

    #[test]
    fn splits_around_delimited_block() {
        let (open, close) = fences();
        let regions = isolate_regions(
            vec![Region::formatted("a ```rs\nx``` b")],
            &open,
            &close,
            |content, caps| Region::verbatim(format!("<{}:{}>", &caps[1], content)),
        );
        assert_eq!(
            regions,
            vec![
                Region::formatted("a "),
                Region::verbatim("<rs:\nx>"),
                Region::formatted(" b"),
            ]
        );
    }

    #[test]
    fn unclosed_block_runs_to_end() {
        let (open, close) = fences();
        let regions = isolate_regions(
            vec![Region::formatted("x ```tail")],
            &open,
            &close,
            |content, _| Region::verbatim(content),
        );
        assert_eq!(regions.last(), Some(&Region::verbatim("")));
        assert_eq!(regions.len(), 2);
    }

    #[test]
    fn verbatim_regions_pass_through() {
        let (open, close) = fences();
        let regions = isolate_regions(
            vec![Region::verbatim("```untouched```")],
            &open,
            &close,
            |_, _| Region::formatted("changed"),
        );
        assert_eq!(regions, vec![Region::verbatim("```untouched```")]);
        assert_eq!(join_regions(regions, |t| t.to_uppercase()), "```untouched```");
    }
}
