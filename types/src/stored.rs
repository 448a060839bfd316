//! Storage record format of the remote chat store.
//!
//! The remote schema has no variable-length map, so each assistant message's
//! model answers are spread over numbered `modelN_name` / `modelN_response`
//! slots.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{ChatId, ExchangeId, MessageId};
use crate::message::{ChatRecord, Message, ModelAnswer, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub message_id: String,
    pub sender: Sender,
    #[serde(default)]
    pub user_prompt: Option<String>,
    #[serde(default)]
    pub synthesized_response: Option<String>,
    pub created_at: DateTime<Utc>,
    /// `modelN_name` / `modelN_response` pairs, plus any fields the store
    /// adds that this client does not model.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredChat {
    pub chat_id: ChatId,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<StoredMessage>,
}

fn name_key(slot: usize) -> String {
    format!("model{slot}_name")
}

fn response_key(slot: usize) -> String {
    format!("model{slot}_response")
}

impl StoredMessage {
    fn from_message(message: &Message, slots: usize) -> (Self, usize) {
        let base = Self {
            message_id: message.id().to_string(),
            sender: Sender::User,
            user_prompt: None,
            synthesized_response: None,
            created_at: message.created_at(),
            extra: BTreeMap::new(),
        };

        match message.role() {
            Role::User => (
                Self {
                    user_prompt: message.text().map(ToString::to_string),
                    ..base
                },
                0,
            ),
            Role::Assistant => {
                let mut extra = BTreeMap::new();
                let mut answers = message.answers_in_arrival_order();
                for slot in 1..=slots {
                    let (name, response) = answers.next().map_or((Value::Null, Value::Null), |a| {
                        (
                            Value::String(a.model_key.clone()),
                            Value::String(a.text.clone()),
                        )
                    });
                    extra.insert(name_key(slot), name);
                    extra.insert(response_key(slot), response);
                }
                let dropped = answers.count();
                (
                    Self {
                        sender: Sender::Bot,
                        synthesized_response: message.text().map(ToString::to_string),
                        extra,
                        ..base
                    },
                    dropped,
                )
            }
        }
    }

    /// Non-null model slots in slot order.
    #[must_use]
    pub fn model_answers(&self) -> Vec<ModelAnswer> {
        let mut answers = Vec::new();
        for slot in 1.. {
            let Some(name) = self.extra.get(&name_key(slot)) else {
                break;
            };
            if let Value::String(model_key) = name {
                let text = self
                    .extra
                    .get(&response_key(slot))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                answers.push(ModelAnswer {
                    model_key: model_key.clone(),
                    text,
                });
            }
        }
        answers
    }
}

impl StoredChat {
    /// Format a chat for the remote store using `slots` numbered model
    /// slots. Also returns how many answers did not fit.
    #[must_use]
    pub fn from_record(chat: &ChatRecord, slots: usize) -> (Self, usize) {
        let mut dropped = 0;
        let messages = chat
            .messages
            .iter()
            .map(|message| {
                let (stored, lost) = StoredMessage::from_message(message, slots);
                dropped += lost;
                stored
            })
            .collect();

        (
            Self {
                chat_id: chat.id.clone(),
                title: chat.title.clone(),
                created_at: chat.created_at,
                updated_at: chat.updated_at,
                messages,
            },
            dropped,
        )
    }

    /// Rebuild a client-side record. Each user message opens a new exchange
    /// that the following bot messages join.
    #[must_use]
    pub fn into_record(self) -> ChatRecord {
        let mut exchange = ExchangeId::mint();
        let messages = self
            .messages
            .into_iter()
            .map(|stored| {
                let id = MessageId::parse_or_mint(&stored.message_id);
                match stored.sender {
                    Sender::User => {
                        exchange = ExchangeId::mint();
                        Message::restore(
                            id,
                            exchange,
                            Role::User,
                            stored.user_prompt,
                            [],
                            stored.created_at,
                        )
                    }
                    Sender::Bot => {
                        let answers = stored.model_answers();
                        Message::restore(
                            id,
                            exchange,
                            Role::Assistant,
                            stored.synthesized_response,
                            answers,
                            stored.created_at,
                        )
                    }
                }
            })
            .collect();

        ChatRecord {
            id: self.chat_id,
            title: self.title,
            created_at: self.created_at,
            updated_at: self.updated_at,
            messages,
        }
    }
}
