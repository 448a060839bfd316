//! Block-level classification: fenced code, tables, then line-by-line.

use std::sync::LazyLock;

use regex::Regex;

use crate::embed::EmbedCollector;
use crate::inline::parse_runs;
use crate::{Block, ListMarker, Run};

const DEFAULT_CODE_LANGUAGE: &str = "text";

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[ \t]*(\w+)?[ \t]*\r?\n(.*?)```").expect("valid code fence regex")
});

static RULE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-{3,}$").expect("valid rule regex"));

static BOLD_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\*\*([^*:]+):?\*\*:?$").expect("valid bold header regex")
});

static ITALIC_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\*([^*]+)\*$").expect("valid italic header regex"));

static HASH_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(#{1,3})\s+(.*)$").expect("valid hash heading regex"));

static LABEL_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Z][A-Za-z\s\-\x{2011}]+):$").expect("valid label heading regex")
});

static QUALIFIED_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Z][A-Za-z\s\-\x{2011}]+\s*\([^)]+\)$").expect("valid qualified heading regex")
});

static NUMBERED_BOLD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)\.?\s*\*\*([^*]+)\*\*:?:?\s*(.*)$").expect("valid numbered bold regex")
});

static NUMBERED_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)\.\s*([A-Za-z][A-Za-z\s\-\x{2011}]+):\s*(.+)$")
        .expect("valid numbered label regex")
});

static NUMBERED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)\.(\s*)(.+)$").expect("valid numbered regex"));

static BULLET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-\x{2022}*]\s+(.+)$").expect("valid bullet regex"));

/// Parse a block of text into the generic block model.
///
/// Fenced code regions are extracted first; an unterminated fence is not a
/// code block and stays in the surrounding text. Tables are recognized next,
/// then every remaining line is classified. YouTube links are appended as
/// [`Block::EmbedRef`] after all other blocks, once per video.
#[must_use]
pub fn parse_blocks(text: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut embeds = EmbedCollector::default();
    let mut last = 0;

    for caps in CODE_FENCE.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        parse_text_segment(&text[last..whole.start()], &mut blocks, &mut embeds);

        let language = caps
            .get(1)
            .map_or(DEFAULT_CODE_LANGUAGE, |lang| lang.as_str());
        let code = caps.get(2).map_or("", |code| code.as_str());
        blocks.push(Block::CodeBlock {
            language: language.to_string(),
            code: code.trim_end().to_string(),
        });
        last = whole.end();
    }
    parse_text_segment(&text[last..], &mut blocks, &mut embeds);

    blocks.extend(embeds.into_blocks());
    blocks
}

fn parse_text_segment(segment: &str, blocks: &mut Vec<Block>, embeds: &mut EmbedCollector) {
    if segment.trim().is_empty() {
        return;
    }
    embeds.scan(segment);

    // Trimmed lines classify; paragraphs keep the raw lines.
    let raw: Vec<&str> = segment.lines().collect();
    let lines: Vec<&str> = raw.iter().map(|line| line.trim()).collect();
    let mut paragraph: Vec<&str> = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        if line.is_empty() {
            flush_paragraph(&mut paragraph, blocks);
            i += 1;
            continue;
        }

        if let Some(table) = take_table(&lines[i..]) {
            flush_paragraph(&mut paragraph, blocks);
            blocks.push(Block::Table {
                headers: table.headers,
                rows: table.rows,
            });
            for leftover in table.leftovers {
                blocks.push(Block::paragraph(parse_runs(leftover)));
            }
            i += table.consumed;
            continue;
        }

        match classify_line(line) {
            Some(block) => {
                flush_paragraph(&mut paragraph, blocks);
                blocks.push(block);
            }
            None => paragraph.push(raw[i]),
        }
        i += 1;
    }
    flush_paragraph(&mut paragraph, blocks);
}

fn flush_paragraph(paragraph: &mut Vec<&str>, blocks: &mut Vec<Block>) {
    if paragraph.is_empty() {
        return;
    }
    let joined = paragraph.join("\n");
    paragraph.clear();
    blocks.push(Block::paragraph(parse_runs(joined.trim())));
}

/// Classify one non-empty, trimmed line. `None` means plain paragraph text.
fn classify_line(line: &str) -> Option<Block> {
    if RULE.is_match(line) {
        return Some(Block::Rule);
    }

    if let Some(caps) = BOLD_HEADER
        .captures(line)
        .or_else(|| ITALIC_HEADER.captures(line))
    {
        return Some(heading(4, &caps[1]));
    }

    if let Some(caps) = HASH_HEADING.captures(line) {
        return Some(heading(caps[1].len() as u8, &caps[2]));
    }
    if let Some(caps) = LABEL_HEADING.captures(line) {
        return Some(heading(3, &caps[1]));
    }
    if QUALIFIED_HEADING.is_match(line) {
        return Some(heading(3, line));
    }

    if let Some(caps) = NUMBERED_BOLD.captures(line) {
        let ordinal = caps[1].parse().ok()?;
        let mut runs = vec![Run::bold(caps[2].trim())];
        let rest = caps[3].trim();
        if !rest.is_empty() {
            runs.extend(parse_runs(&format!(": {rest}")));
        }
        return Some(list_item(ListMarker::Ordinal(ordinal), runs));
    }

    if let Some(caps) = NUMBERED_LABEL.captures(line) {
        let ordinal = caps[1].parse().ok()?;
        let mut runs = vec![Run::bold(caps[2].trim())];
        runs.extend(parse_runs(&format!(": {}", caps[3].trim())));
        return Some(list_item(ListMarker::Ordinal(ordinal), runs));
    }

    if let Some(caps) = NUMBERED.captures(line) {
        // "3.5 percent" is a number, not an item.
        let glued_digit = caps[2].is_empty() && caps[3].starts_with(|c: char| c.is_ascii_digit());
        if !glued_digit {
            let ordinal = caps[1].parse().ok()?;
            return Some(list_item(ListMarker::Ordinal(ordinal), parse_runs(&caps[3])));
        }
    }

    if let Some(caps) = BULLET.captures(line) {
        return Some(list_item(ListMarker::Bullet, parse_runs(&caps[1])));
    }

    None
}

fn heading(level: u8, raw: &str) -> Block {
    Block::Heading {
        level,
        text: raw.replace("**", "").trim().to_string(),
    }
}

fn list_item(marker: ListMarker, runs: Vec<Run>) -> Block {
    Block::ListItem { marker, runs }
}

struct ParsedTable<'a> {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    leftovers: Vec<&'a str>,
    consumed: usize,
}

fn is_table_row(line: &str) -> bool {
    line.starts_with('|') && line.matches('|').count() >= 2
}

fn is_separator_row(line: &str) -> bool {
    line.contains('|')
        && line.contains('-')
        && line
            .chars()
            .all(|c| matches!(c, '|' | '-' | ':' | ' ' | '\t'))
}

fn split_cells(line: &str) -> Vec<String> {
    let inner = line.strip_prefix('|').unwrap_or(line);
    let inner = inner.strip_suffix('|').unwrap_or(inner);
    inner.split('|').map(|cell| cell.trim().to_string()).collect()
}

/// Recognize a table at the start of `lines`: header row, separator row, then
/// contiguous data rows. Rows whose cell count disagrees with the header are
/// kept out of the grid and returned as leftovers.
fn take_table<'a>(lines: &[&'a str]) -> Option<ParsedTable<'a>> {
    let (&header, rest) = lines.split_first()?;
    let (&separator, body) = rest.split_first()?;
    if !is_table_row(header) || !is_separator_row(separator) {
        return None;
    }

    let headers = split_cells(header);
    let mut rows = Vec::new();
    let mut leftovers = Vec::new();
    let mut consumed = 2;

    for &line in body.iter().take_while(|line| is_table_row(line)) {
        let cells = split_cells(line);
        if cells.len() == headers.len() {
            rows.push(cells);
        } else {
            leftovers.push(line);
        }
        consumed += 1;
    }

    Some(ParsedTable {
        headers,
        rows,
        leftovers,
        consumed,
    })
}
