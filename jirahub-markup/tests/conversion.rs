//! End-to-end conversion of realistic issue bodies in both directions.

use jirahub_markup::{JiraToMarkdown, MarkdownToJira, Markup};

const GITHUB_BODY: &str = "## Steps\n\nRun `make` and see #42 now.\n\n```sh\nmake **all** # 1\n```\n\n> it fails\n\nThanks @mona";

const JIRA_BODY: &str = "h2. Steps\n\nRun {{make}} and see [https://github.com/octo/widgets/issues/42] now.\n\n{code:sh}\nmake *all* # 1\n{code}\n\nThanks [~jdoe] @mona";

#[test]
fn github_body_to_jira() {
    let conv = MarkdownToJira::new("https://github.com", "octo/widgets").expect("converter");
    let out = conv.convert(GITHUB_BODY);

    assert!(out.starts_with("h2. Steps"), "{out}");
    assert!(out.contains("Run {{make}} and see [#42|https://github.com/octo/widgets/issues/42] now"), "{out}");
    assert!(out.contains("{code:sh}\nmake **all** # 1\n{code}"), "{out}");
    assert!(out.contains("{quote}\nit fails\n"), "{out}");
    assert!(out.contains("[@mona|https://github.com/mona]"), "{out}");
}

#[test]
fn jira_body_to_github() {
    let conv = JiraToMarkdown::new("https://github.com", "octo/widgets", "https://jira.example.org")
        .expect("converter");
    let out = conv.convert(JIRA_BODY);

    assert!(out.starts_with("## Steps"), "{out}");
    assert!(out.contains("Run `make` and see #42 now."), "{out}");
    assert!(out.contains("```sh\nmake *all* # 1\n```"), "{out}");
    assert!(out.contains("[jdoe](https://jira.example.org/secure/ViewProfile.jspa?name=jdoe)"), "{out}");
    assert!(out.contains("@\u{2063}mona"), "{out}");
}

#[test]
fn converters_are_usable_as_trait_objects() {
    let converters: Vec<Box<dyn Markup>> = vec![
        Box::new(MarkdownToJira::new("https://github.com", "o/r").expect("converter")),
        Box::new(JiraToMarkdown::new("https://github.com", "o/r", "https://j").expect("converter")),
    ];
    for c in &converters {
        assert_eq!(c.convert("plain words"), "plain words");
    }
}
