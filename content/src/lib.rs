//! Structured-text parsing for model answers and synthesis documents.
//!
//! Everything in this crate is pure and total: no input can make a parser
//! panic or return an error. Unrecognized structure degrades to
//! [`Block::Paragraph`].
//!
//! # Entry points
//!
//! | Function | Output |
//! |----------|--------|
//! | [`parse_blocks`] | Generic block model (headings, lists, code, tables, embeds) |
//! | [`parse_synthesis`] | Raw `REASONING` / `ANSWER` / `TIPS` sections, or `None` for plain text |
//! | [`split_reasoning`] | Raw `Consensus` / `Conflicts` / `Checks` sub-sections, or `None` |
//! | [`SynthesisDocument::parse`] | Both of the above, rendered into blocks |

mod blocks;
mod embed;
mod inline;
mod synthesis;

pub use blocks::parse_blocks;
pub use embed::youtube_video_id;
pub use inline::{parse_runs, plain_text};
pub use synthesis::{
    ReasoningBreakdown, ReasoningDocument, ReasoningSections, SynthesisDocument, SynthesisSections,
    parse_synthesis, split_reasoning,
};

use serde::{Deserialize, Serialize};

/// An inline span inside a textual block. Never contains raw markup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Run {
    Text { text: String },
    Bold { text: String },
    Link { text: String, url: String },
}

impl Run {
    #[must_use]
    pub fn text(value: impl Into<String>) -> Self {
        Run::Text { text: value.into() }
    }

    #[must_use]
    pub fn bold(value: impl Into<String>) -> Self {
        Run::Bold { text: value.into() }
    }

    #[must_use]
    pub fn link(text: impl Into<String>, url: impl Into<String>) -> Self {
        Run::Link {
            text: text.into(),
            url: url.into(),
        }
    }

    /// Visible text of the run (link text for links).
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Run::Text { text } | Run::Bold { text } | Run::Link { text, .. } => text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListMarker {
    Ordinal(u32),
    Bullet,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbedKind {
    YouTube { video_id: String },
}

impl EmbedKind {
    /// URL suitable for an embedded player frame.
    #[must_use]
    pub fn player_url(&self) -> String {
        match self {
            EmbedKind::YouTube { video_id } => format!("https://www.youtube.com/embed/{video_id}"),
        }
    }
}

/// One structural unit of parsed text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Paragraph {
        runs: Vec<Run>,
    },
    Heading {
        level: u8,
        text: String,
    },
    ListItem {
        marker: ListMarker,
        runs: Vec<Run>,
    },
    CodeBlock {
        language: String,
        code: String,
    },
    Table {
        headers: Vec<String>,
        rows: Vec<Vec<String>>,
    },
    EmbedRef {
        kind: EmbedKind,
        url: String,
    },
    /// Thematic break (`---`).
    Rule,
}

impl Block {
    #[must_use]
    pub fn paragraph(runs: Vec<Run>) -> Self {
        Block::Paragraph { runs }
    }

    /// Runs for textual blocks; empty for code, tables, embeds and rules.
    #[must_use]
    pub fn runs(&self) -> &[Run] {
        match self {
            Block::Paragraph { runs } | Block::ListItem { runs, .. } => runs,
            _ => &[],
        }
    }
}
