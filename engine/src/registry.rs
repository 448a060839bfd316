//! Explicit handler registry for transcript callbacks.
//!
//! The registry is owned by whoever drives the [`StreamController`] and passed
//! in by `&mut`; there is no process-wide handler. It holds at most one
//! handler, the one registered most recently.
//!
//! [`StreamController`]: crate::StreamController

use chorus_types::{ChatId, Message};

use crate::SessionState;
use crate::error::StreamFailure;

/// Callbacks dispatched while the controller processes stream updates.
pub trait TranscriptObserver {
    /// A message in `chat` was created or changed.
    fn transcript_changed(&mut self, chat: &ChatId, message: &Message) {
        let _ = (chat, message);
    }

    fn state_changed(&mut self, state: SessionState) {
        let _ = state;
    }

    /// A session failed. Never called for cancellation.
    fn failed(&mut self, failure: &StreamFailure) {
        let _ = failure;
    }
}

impl<T: TranscriptObserver + ?Sized> TranscriptObserver for Box<T> {
    fn transcript_changed(&mut self, chat: &ChatId, message: &Message) {
        (**self).transcript_changed(chat, message);
    }

    fn state_changed(&mut self, state: SessionState) {
        (**self).state_changed(state);
    }

    fn failed(&mut self, failure: &StreamFailure) {
        (**self).failed(failure);
    }
}

/// Identifies one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerToken(u64);

#[derive(Debug)]
pub struct HandlerRegistry<H> {
    current: Option<(HandlerToken, H)>,
    next_token: u64,
}

impl<H> Default for HandlerRegistry<H> {
    fn default() -> Self {
        Self {
            current: None,
            next_token: 0,
        }
    }
}

impl<H> HandlerRegistry<H> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler`, replacing any previous one.
    pub fn register(&mut self, handler: H) -> HandlerToken {
        self.next_token += 1;
        let token = HandlerToken(self.next_token);
        self.current = Some((token, handler));
        token
    }

    /// Remove the handler registered under `token`. A stale token (its
    /// handler has since been replaced) leaves the current handler in place.
    pub fn unregister(&mut self, token: HandlerToken) -> Option<H> {
        if self.is_current(token) {
            self.current.take().map(|(_, handler)| handler)
        } else {
            None
        }
    }

    #[must_use]
    pub fn is_current(&self, token: HandlerToken) -> bool {
        matches!(&self.current, Some((current, _)) if *current == token)
    }

    pub fn current_mut(&mut self) -> Option<&mut H> {
        self.current.as_mut().map(|(_, handler)| handler)
    }
}
