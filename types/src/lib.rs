//! Core domain types for Chorus.
//!
//! Pure domain types with no IO and no async: identifiers, transcript
//! messages, the wire protocol of the ask-many-models endpoint and the
//! storage record format of the remote chat store.

mod ids;
mod message;
mod stored;
mod wire;

pub use ids::{ChatId, ExchangeId, MessageId};
pub use message::{
    ChatRecord, Message, ModelAnswer, NEW_CHAT_TITLE, Role, Timings, title_from_prompt,
};
pub use stored::{Sender, StoredChat, StoredMessage};
pub use wire::{ChatRequest, ModelResponseData, SynthesisData, WireEvent};
