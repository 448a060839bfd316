//! Inline span resolution: markdown links, bare URLs and `**bold**`.

use std::sync::LazyLock;

use regex::Regex;

use crate::Run;

static MARKDOWN_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[([^\]]+)\]\((https?://[^\s)]+)\)").expect("valid markdown link regex")
});

static BARE_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://\S+").expect("valid bare URL regex"));

static BOLD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*([^*]+)\*\*").expect("valid bold regex"));

/// Resolve a line (or joined paragraph) into runs.
///
/// Markdown links are resolved first, then bare `http(s)://` tokens in the
/// remaining text, then bold spans. Adjacent plain text is merged into a
/// single run and empty runs are never produced.
#[must_use]
pub fn parse_runs(text: &str) -> Vec<Run> {
    let mut runs = Vec::new();
    let mut last = 0;

    for caps in MARKDOWN_LINK.captures_iter(text) {
        let (Some(whole), Some(label), Some(url)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        push_unlinked(&mut runs, &text[last..whole.start()]);
        runs.push(Run::link(label.as_str(), url.as_str()));
        last = whole.end();
    }
    push_unlinked(&mut runs, &text[last..]);

    runs
}

/// Concatenated visible text of a run sequence.
#[must_use]
pub fn plain_text(runs: &[Run]) -> String {
    runs.iter().map(Run::as_str).collect()
}

fn push_unlinked(runs: &mut Vec<Run>, text: &str) {
    let mut last = 0;
    for found in BARE_URL.find_iter(text) {
        push_emphasis(runs, &text[last..found.start()]);
        let (url, trailing) = split_trailing_punctuation(found.as_str());
        if url.is_empty() {
            push_text(runs, found.as_str());
        } else {
            runs.push(Run::link(url, url));
            push_emphasis(runs, trailing);
        }
        last = found.end();
    }
    push_emphasis(runs, &text[last..]);
}

fn push_emphasis(runs: &mut Vec<Run>, text: &str) {
    let mut last = 0;
    for caps in BOLD.captures_iter(text) {
        let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        push_text(runs, &text[last..whole.start()]);
        runs.push(Run::bold(inner.as_str()));
        last = whole.end();
    }
    push_text(runs, &text[last..]);
}

fn push_text(runs: &mut Vec<Run>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(Run::Text { text: existing }) = runs.last_mut() {
        existing.push_str(text);
    } else {
        runs.push(Run::text(text));
    }
}

/// Sentence punctuation glued to the end of a bare URL is not part of it.
/// A closing paren is kept only when the URL opened one.
fn split_trailing_punctuation(token: &str) -> (&str, &str) {
    let keeps_paren = token.contains('(');
    let url = token.trim_end_matches(|c: char| {
        matches!(c, '.' | ',' | ';' | ':' | '!' | '?' | '"' | '\'') || (c == ')' && !keeps_paren)
    });
    (url, &token[url.len()..])
}
