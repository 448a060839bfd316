//! Transcript messages and chat records.
//!
//! Constructors take the timestamp explicitly; callers own the clock.

use std::collections::BTreeMap;

use chorus_content::{Block, SynthesisDocument, parse_blocks};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ChatId, ExchangeId, MessageId};

pub const NEW_CHAT_TITLE: &str = "New Chat";
const TITLE_CHARS: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One contributing model's answer within an exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelAnswer {
    pub model_key: String,
    pub text: String,
}

/// Milliseconds relative to request start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timings {
    pub first_model_ms: Option<u64>,
    pub synthesis_ms: Option<u64>,
    pub total_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    id: MessageId,
    exchange: ExchangeId,
    role: Role,
    /// `None` on an assistant message means no synthesis has arrived yet.
    text: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    model_answers: BTreeMap<String, ModelAnswer>,
    /// Model keys in first-arrival order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    answer_order: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timings: Option<Timings>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    failed: bool,
    created_at: DateTime<Utc>,
}

impl Message {
    #[must_use]
    pub fn user(exchange: ExchangeId, prompt: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            id: MessageId::mint(),
            exchange,
            role: Role::User,
            text: Some(prompt.into()),
            model_answers: BTreeMap::new(),
            answer_order: Vec::new(),
            timings: None,
            failed: false,
            created_at: at,
        }
    }

    /// Assistant message that exists but has no synthesis yet.
    #[must_use]
    pub fn pending_assistant(exchange: ExchangeId, at: DateTime<Utc>) -> Self {
        Self {
            id: MessageId::mint(),
            exchange,
            role: Role::Assistant,
            text: None,
            model_answers: BTreeMap::new(),
            answer_order: Vec::new(),
            timings: None,
            failed: false,
            created_at: at,
        }
    }

    /// Assistant message carrying a fixed failure notice.
    #[must_use]
    pub fn failure(exchange: ExchangeId, notice: impl Into<String>, at: DateTime<Utc>) -> Self {
        let mut message = Self::pending_assistant(exchange, at);
        message.mark_failed(notice);
        message
    }

    /// Rebuild a message from stored parts.
    #[must_use]
    pub fn restore(
        id: MessageId,
        exchange: ExchangeId,
        role: Role,
        text: Option<String>,
        answers: impl IntoIterator<Item = ModelAnswer>,
        at: DateTime<Utc>,
    ) -> Self {
        let mut message = Self {
            id,
            exchange,
            role,
            text,
            model_answers: BTreeMap::new(),
            answer_order: Vec::new(),
            timings: None,
            failed: false,
            created_at: at,
        };
        for answer in answers {
            message.upsert_answer(answer.model_key, answer.text);
        }
        message
    }

    #[must_use]
    pub fn id(&self) -> MessageId {
        self.id
    }

    #[must_use]
    pub fn exchange(&self) -> ExchangeId {
        self.exchange
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    #[must_use]
    pub fn model_answers(&self) -> &BTreeMap<String, ModelAnswer> {
        &self.model_answers
    }

    #[must_use]
    pub fn timings(&self) -> Option<Timings> {
        self.timings
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Assistant message still waiting for its synthesis.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.role == Role::Assistant && self.text.is_none()
    }

    /// Insert or replace a model's answer. Returns `true` when the key was
    /// already present.
    /// A replaced answer keeps its original arrival position.
    pub fn upsert_answer(&mut self, model_key: String, text: String) -> bool {
        let replaced = self
            .model_answers
            .insert(model_key.clone(), ModelAnswer { model_key: model_key.clone(), text })
            .is_some();
        if !replaced {
            self.answer_order.push(model_key);
        }
        replaced
    }

    /// Model answers in the order their keys first arrived. Answers from
    /// records written without an order follow in key order.
    pub fn answers_in_arrival_order(&self) -> impl Iterator<Item = &ModelAnswer> {
        let ordered = self
            .answer_order
            .iter()
            .filter_map(|key| self.model_answers.get(key));
        let unordered = self
            .model_answers
            .values()
            .filter(|answer| !self.answer_order.contains(&answer.model_key));
        ordered.chain(unordered)
    }

    /// Set the synthesis text. Returns `false` and leaves the message
    /// untouched when text is already set.
    pub fn set_synthesis(&mut self, text: String) -> bool {
        if self.text.is_some() {
            return false;
        }
        self.text = Some(text);
        true
    }

    pub fn stamp_timings(&mut self, timings: Timings) {
        self.timings = Some(timings);
    }

    /// Fill a still-pending message with a failure notice, keeping partial
    /// model answers. Returns `false` and leaves the message untouched when
    /// text is already set.
    pub fn mark_failed(&mut self, notice: impl Into<String>) -> bool {
        if self.text.is_some() {
            return false;
        }
        self.text = Some(notice.into());
        self.failed = true;
        true
    }

    /// Parsed synthesis document, or `None` if the text is absent or untagged.
    ///
    /// Computed on demand rather than stored.
    #[must_use]
    pub fn synthesis(&self) -> Option<SynthesisDocument> {
        if self.role != Role::Assistant || self.failed {
            return None;
        }
        self.text.as_deref().and_then(SynthesisDocument::parse)
    }

    /// Generic block rendering of the text.
    #[must_use]
    pub fn blocks(&self) -> Vec<Block> {
        self.text.as_deref().map(parse_blocks).unwrap_or_default()
    }
}

/// One conversation as the client sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRecord {
    pub id: ChatId,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl ChatRecord {
    #[must_use]
    pub fn new(id: ChatId, first_prompt: &str, at: DateTime<Utc>) -> Self {
        Self {
            id,
            title: title_from_prompt(first_prompt),
            created_at: at,
            updated_at: at,
            messages: Vec::new(),
        }
    }

    /// A chat still titled "New Chat" takes its title from `prompt`.
    pub fn adopt_title(&mut self, prompt: &str) {
        if self.title == NEW_CHAT_TITLE {
            self.title = title_from_prompt(prompt);
        }
    }

    /// Replace the message with the same id, or append it.
    pub fn upsert_message(&mut self, message: Message, at: DateTime<Utc>) {
        match self.messages.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => *existing = message,
            None => self.messages.push(message),
        }
        self.updated_at = at;
    }

    /// The assistant message of `exchange`, if one exists.
    pub fn assistant_mut(&mut self, exchange: ExchangeId) -> Option<&mut Message> {
        self.messages
            .iter_mut()
            .rev()
            .find(|message| message.exchange == exchange && message.role == Role::Assistant)
    }

    /// Drop assistant messages of `exchange` that never received text.
    /// Returns how many were removed.
    pub fn drop_pending(&mut self, exchange: ExchangeId) -> usize {
        let before = self.messages.len();
        self.messages
            .retain(|message| !(message.exchange == exchange && message.is_pending()));
        before - self.messages.len()
    }
}

/// First 30 characters of the prompt, or "New Chat" when it is blank.
#[must_use]
pub fn title_from_prompt(prompt: &str) -> String {
    let title: String = prompt.trim().chars().take(TITLE_CHARS).collect();
    if title.is_empty() {
        NEW_CHAT_TITLE.to_string()
    } else {
        title
    }
}
