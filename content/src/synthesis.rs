//! The synthesis producer's textual contract.
//!
//! A synthesis document is delimited by `===REASONING===`, `===ANSWER===` and
//! `===TIPS===` tags (case-insensitive, each optional). The reasoning section
//! may further contain bold-labelled `Consensus`, `Conflicts` and `Checks`
//! mini-sections.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::Block;
use crate::blocks::parse_blocks;

static SECTION_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)===(REASONING|ANSWER|TIPS)===").expect("valid synthesis tag regex")
});

/// A bold label, optionally qualified in parentheses inside or right after
/// the bold (`**Consensus (4/4 models):**`, `**Checks** (2):`). The
/// qualifier is part of the label, not the body.
static REASONING_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\*\*\s*(consensus(?:es)?|conflicts?|checks?)\s*(?:\([^)\n]*\))?\s*:?\s*\*\*[ \t]*:?(?:[ \t]*\([^)\n]*\)[ \t]*:?)?",
    )
    .expect("valid reasoning label regex")
});

/// Raw section text of a synthesis document.
///
/// A section whose tag is missing is the empty string here; use
/// [`SynthesisDocument`] to distinguish "absent" from "present but empty".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesisSections {
    pub reasoning: String,
    pub answer: String,
    pub tips: String,
}

/// Raw sub-section text of a reasoning section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasoningSections {
    pub consensus: String,
    pub conflicts: String,
    pub checks: String,
}

/// Parsed synthesis document. `None` fields were not present in the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesisDocument {
    pub reasoning: Option<ReasoningDocument>,
    pub answer: Option<Vec<Block>>,
    pub tips: Option<Vec<Block>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasoningDocument {
    /// The whole reasoning section, unsplit.
    pub blocks: Vec<Block>,
    /// `None` when no Consensus/Conflicts/Checks label was found.
    pub breakdown: Option<ReasoningBreakdown>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasoningBreakdown {
    pub consensus: Option<Vec<Block>>,
    pub conflicts: Option<Vec<Block>>,
    pub checks: Option<Vec<Block>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SectionTag {
    Reasoning,
    Answer,
    Tips,
}

impl SectionTag {
    fn parse(label: &str) -> Option<Self> {
        match label.to_ascii_lowercase().as_str() {
            "reasoning" => Some(Self::Reasoning),
            "answer" => Some(Self::Answer),
            "tips" => Some(Self::Tips),
            _ => None,
        }
    }

    const fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReasoningLabel {
    Consensus,
    Conflicts,
    Checks,
}

impl ReasoningLabel {
    fn parse(label: &str) -> Option<Self> {
        let label = label.to_ascii_lowercase();
        if label.starts_with("consensus") {
            Some(Self::Consensus)
        } else if label.starts_with("conflict") {
            Some(Self::Conflicts)
        } else if label.starts_with("check") {
            Some(Self::Checks)
        } else {
            None
        }
    }

    const fn index(self) -> usize {
        self as usize
    }
}

/// Split `text` at every label match, returning the trimmed body after the
/// first occurrence of each label kind. A body runs until the next label of
/// any kind.
fn locate<'a, const N: usize>(
    text: &'a str,
    pattern: &Regex,
    classify: impl Fn(&str) -> Option<usize>,
) -> [Option<&'a str>; N] {
    let mut marks: Vec<(usize, usize, usize)> = Vec::new();
    for caps in pattern.captures_iter(text) {
        let (Some(whole), Some(label)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if let Some(slot) = classify(label.as_str()) {
            marks.push((slot, whole.start(), whole.end()));
        }
    }

    let mut found = [None; N];
    for (i, &(slot, _, body_start)) in marks.iter().enumerate() {
        if slot >= N || found[slot].is_some() {
            continue;
        }
        let body_end = marks.get(i + 1).map_or(text.len(), |&(_, start, _)| start);
        found[slot] = Some(text[body_start..body_end].trim());
    }
    found
}

fn locate_sections(text: &str) -> [Option<&str>; 3] {
    locate(text, &SECTION_TAG, |label| {
        SectionTag::parse(label).map(SectionTag::index)
    })
}

fn locate_reasoning(text: &str) -> [Option<&str>; 3] {
    locate(text, &REASONING_LABEL, |label| {
        ReasoningLabel::parse(label).map(ReasoningLabel::index)
    })
}

/// Parse the tagged section contract.
///
/// Returns `None` when none of the three tags is present, meaning the text is
/// not a synthesis document and should be rendered as plain blocks.
#[must_use]
pub fn parse_synthesis(text: &str) -> Option<SynthesisSections> {
    let [reasoning, answer, tips] = locate_sections(text);
    if reasoning.is_none() && answer.is_none() && tips.is_none() {
        return None;
    }
    Some(SynthesisSections {
        reasoning: reasoning.unwrap_or_default().to_string(),
        answer: answer.unwrap_or_default().to_string(),
        tips: tips.unwrap_or_default().to_string(),
    })
}

/// Split a reasoning section into Consensus / Conflicts / Checks.
///
/// Returns `None` rather than a partially-filled value when none of the three
/// labels is found, so callers can render the reasoning unsplit.
#[must_use]
pub fn split_reasoning(text: &str) -> Option<ReasoningSections> {
    let [consensus, conflicts, checks] = locate_reasoning(text);
    if consensus.is_none() && conflicts.is_none() && checks.is_none() {
        return None;
    }
    Some(ReasoningSections {
        consensus: consensus.unwrap_or_default().to_string(),
        conflicts: conflicts.unwrap_or_default().to_string(),
        checks: checks.unwrap_or_default().to_string(),
    })
}

impl SynthesisDocument {
    /// Parse and render a synthesis text. `None` when the text carries no tags.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let [reasoning, answer, tips] = locate_sections(text);
        if reasoning.is_none() && answer.is_none() && tips.is_none() {
            return None;
        }
        Some(Self {
            reasoning: reasoning.map(ReasoningDocument::parse),
            answer: answer.map(parse_blocks),
            tips: tips.map(parse_blocks),
        })
    }
}

impl ReasoningDocument {
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let [consensus, conflicts, checks] = locate_reasoning(text);
        let breakdown = (consensus.is_some() || conflicts.is_some() || checks.is_some()).then(|| {
            ReasoningBreakdown {
                consensus: consensus.map(parse_blocks),
                conflicts: conflicts.map(parse_blocks),
                checks: checks.map(parse_blocks),
            }
        });
        Self {
            blocks: parse_blocks(text),
            breakdown,
        }
    }
}
