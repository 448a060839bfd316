//! Embeddable media references lifted out of text.

use std::sync::LazyLock;

use regex::Regex;

use crate::{Block, EmbedKind};

static YOUTUBE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"https?://(?:www\.|m\.)?(?:youtube\.com/watch\?v=|youtu\.be/|youtube\.com/embed/)([\w-]{11})",
    )
    .expect("valid YouTube URL regex")
});

/// Extract the 11-character video id from a watch, share or embed URL.
#[must_use]
pub fn youtube_video_id(url: &str) -> Option<&str> {
    YOUTUBE_URL
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|id| id.as_str())
}

/// Collects embed references across the text segments of one document,
/// de-duplicated by video id in first-seen order.
#[derive(Debug, Default)]
pub(crate) struct EmbedCollector {
    seen: Vec<(String, String)>,
}

impl EmbedCollector {
    pub(crate) fn scan(&mut self, text: &str) {
        for caps in YOUTUBE_URL.captures_iter(text) {
            let (Some(url), Some(id)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if self.seen.iter().any(|(seen_id, _)| seen_id == id.as_str()) {
                continue;
            }
            self.seen
                .push((id.as_str().to_string(), url.as_str().to_string()));
        }
    }

    pub(crate) fn into_blocks(self) -> impl Iterator<Item = Block> {
        self.seen.into_iter().map(|(video_id, url)| Block::EmbedRef {
            kind: EmbedKind::YouTube { video_id },
            url,
        })
    }
}
