//! Stream session controller.
//!
//! Owns at most one live exchange. The network side runs in a spawned,
//! abortable task that forwards decoded events over a channel; everything
//! that touches transcript state happens on the caller's side when it drains
//! that channel, so an aborted session's late events are simply never read.

use std::sync::Arc;
use std::time::Duration;

use chorus_client::{ChatTransport, TransportError, decode_stream};
use chorus_config::ClientConfig;
use chorus_types::{ChatId, ChatRecord, ChatRequest, ExchangeId, Message, Timings, WireEvent};
use chrono::Utc;
use futures_util::StreamExt;
use futures_util::future::{AbortHandle, Abortable};
use tokio::sync::mpsc;

use crate::aggregator::{Applied, ResponseAggregator};
use crate::error::{StreamFailure, SubmitError};
use crate::gateway::PersistenceGateway;
use crate::registry::{HandlerRegistry, TranscriptObserver};

/// Text of the assistant message appended when a session fails.
pub const FAILURE_NOTICE: &str = "Something went wrong. Please try again.";

const STREAM_UPDATE_CHANNEL_CAPACITY: usize = 1024;
const STREAM_UPDATE_BUDGET: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    /// Request issued, response not yet open.
    Submitting,
    Streaming,
    Completed,
    Cancelled,
    Failed,
}

/// How the most recent session ended.
pub type SessionOutcome = Result<Timings, StreamFailure>;

/// Returned by [`StreamController::submit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub exchange: ExchangeId,
    pub chat: ChatId,
    /// A chat record was created for this submission.
    pub created: bool,
}

enum StreamUpdate {
    Opened,
    Event { event: WireEvent, elapsed: Duration },
    Failed(TransportError),
    /// The source ended. Only meaningful if no `done` was seen.
    Ended,
}

/// One-shot marker: the chat `chat` was created by the submit that
/// started `exchange`.
#[derive(Debug)]
struct PendingCreation {
    chat: ChatId,
    exchange: ExchangeId,
}

struct ActiveSession {
    exchange: ExchangeId,
    chat: ChatId,
    rx: mpsc::Receiver<StreamUpdate>,
    abort: AbortHandle,
    aggregator: ResponseAggregator,
}

enum Notice {
    Transcript { chat: ChatId, message: Message },
    State(SessionState),
    Failed,
}

pub struct StreamController {
    transport: Arc<dyn ChatTransport>,
    gateway: PersistenceGateway,
    models: Vec<String>,
    synthesize: bool,
    state: SessionState,
    active: Option<ActiveSession>,
    pending_creation: Option<PendingCreation>,
    current_chat: Option<ChatId>,
    last_outcome: Option<SessionOutcome>,
    outbox: Vec<Notice>,
}

impl std::fmt::Debug for StreamController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamController")
            .field("state", &self.state)
            .field("active_exchange", &self.active_exchange())
            .field("current_chat", &self.current_chat)
            .field("models", &self.models)
            .finish_non_exhaustive()
    }
}

impl StreamController {
    #[must_use]
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        gateway: PersistenceGateway,
        config: &ClientConfig,
    ) -> Self {
        Self {
            transport,
            gateway,
            models: config.models.clone(),
            synthesize: config.synthesize,
            state: SessionState::Idle,
            active: None,
            pending_creation: None,
            current_chat: None,
            last_outcome: None,
            outbox: Vec::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn active_exchange(&self) -> Option<ExchangeId> {
        self.active.as_ref().map(|active| active.exchange)
    }

    #[must_use]
    pub fn current_chat(&self) -> Option<&ChatId> {
        self.current_chat.as_ref()
    }

    #[must_use]
    pub fn last_outcome(&self) -> Option<&SessionOutcome> {
        self.last_outcome.as_ref()
    }

    #[must_use]
    pub fn gateway(&self) -> &PersistenceGateway {
        &self.gateway
    }

    #[must_use]
    pub fn models(&self) -> &[String] {
        &self.models
    }

    /// Models asked by subsequent submissions.
    pub fn set_models(&mut self, models: Vec<String>) {
        self.models = models;
    }

    /// Start a new exchange for `prompt` in `chat`, or in a fresh chat when
    /// `chat` is `None`.
    ///
    /// A live session is always superseded. Must be called within a tokio
    /// runtime.
    pub fn submit(&mut self, prompt: &str, chat: Option<ChatId>) -> Result<Submission, SubmitError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(SubmitError::EmptyPrompt);
        }

        if self.active.is_some() {
            tracing::info!("Superseding live session");
            self.cancel();
        }

        let exchange = ExchangeId::mint();
        let now = Utc::now();
        let (chat, created) = match chat {
            Some(chat) if self.gateway.contains(&chat) => {
                self.gateway
                    .schedule_chat(&chat, |record| record.adopt_title(prompt));
                (chat, false)
            }
            requested => {
                let chat = requested.unwrap_or_else(ChatId::mint);
                self.gateway
                    .insert_chat(ChatRecord::new(chat.clone(), prompt, now));
                self.pending_creation = Some(PendingCreation {
                    chat: chat.clone(),
                    exchange,
                });
                (chat, true)
            }
        };

        let user = Message::user(exchange, prompt, now);
        self.gateway
            .schedule_chat(&chat, |record| record.upsert_message(user.clone(), now));
        self.outbox.push(Notice::Transcript {
            chat: chat.clone(),
            message: user,
        });

        let request = ChatRequest {
            message: prompt.to_string(),
            models: self.models.clone(),
            synthesize: self.synthesize,
        };
        let (rx, abort) = spawn_stream(Arc::clone(&self.transport), request);

        tracing::info!(
            exchange = %exchange,
            chat = %chat,
            created,
            models = self.models.len(),
            "Submitted prompt"
        );
        self.active = Some(ActiveSession {
            exchange,
            chat: chat.clone(),
            rx,
            abort,
            aggregator: ResponseAggregator::new(exchange, now),
        });
        self.current_chat = Some(chat.clone());
        self.set_state(SessionState::Submitting);

        Ok(Submission {
            exchange,
            chat,
            created,
        })
    }

    /// The caller's current chat changed to `chat`.
    ///
    /// The first change to the chat a live session just created leaves that
    /// session running. Any other change aborts the live session. Returns
    /// whether a session was aborted.
    pub fn chat_identity_changed(&mut self, chat: ChatId) -> bool {
        let exempt = match self.pending_creation.take() {
            Some(marker) if marker.chat == chat => self.active_exchange() == Some(marker.exchange),
            other => {
                self.pending_creation = other;
                false
            }
        };
        self.current_chat = Some(chat);

        if exempt {
            tracing::debug!("Navigation to the chat being created; session kept");
            return false;
        }
        self.cancel()
    }

    /// Abort the live session and drop its unanswered assistant message.
    /// Returns `false` when nothing was live.
    pub fn cancel(&mut self) -> bool {
        let Some(active) = self.active.take() else {
            return false;
        };
        active.abort.abort();

        let dropped = self
            .gateway
            .schedule_chat(&active.chat, |record| record.drop_pending(active.exchange))
            .unwrap_or_default();
        if let Err(e) = self.gateway.flush() {
            tracing::warn!(%e, "Failed to persist transcript after cancel");
        }
        self.clear_marker(active.exchange);

        tracing::info!(exchange = %active.exchange, dropped, "Session cancelled");
        self.last_outcome = Some(Err(StreamFailure::Cancelled));
        self.set_state(SessionState::Cancelled);
        self.set_state(SessionState::Idle);
        true
    }

    /// Apply updates that have already arrived, without waiting.
    /// Returns how many were applied.
    pub fn process_stream_events<H: TranscriptObserver>(
        &mut self,
        registry: &mut HandlerRegistry<H>,
    ) -> usize {
        let mut processed = 0usize;
        while processed < STREAM_UPDATE_BUDGET {
            let Some(active) = self.active.as_mut() else {
                break;
            };
            let update = match active.rx.try_recv() {
                Ok(update) => update,
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    tracing::warn!(exchange = %active.exchange, "Stream channel disconnected");
                    StreamUpdate::Ended
                }
            };
            processed += 1;
            self.handle(update);
        }
        self.dispatch(registry);
        processed
    }

    /// Wait for and apply one update. Returns `false` when no session is live.
    pub async fn next_update<H: TranscriptObserver>(
        &mut self,
        registry: &mut HandlerRegistry<H>,
    ) -> bool {
        let Some(active) = self.active.as_mut() else {
            self.dispatch(registry);
            return false;
        };
        let update = active.rx.recv().await.unwrap_or(StreamUpdate::Ended);
        self.handle(update);
        self.dispatch(registry);
        true
    }

    /// Drive the live session until it ends. A stalled stream keeps this
    /// pending until the transport errors.
    pub async fn run_to_completion<H: TranscriptObserver>(
        &mut self,
        registry: &mut HandlerRegistry<H>,
    ) -> Option<&SessionOutcome> {
        while self.next_update(registry).await {}
        self.last_outcome.as_ref()
    }

    fn handle(&mut self, update: StreamUpdate) {
        match update {
            StreamUpdate::Opened => {
                if let Some(active) = &self.active {
                    tracing::debug!(exchange = %active.exchange, "Stream opened");
                }
                self.set_state(SessionState::Streaming);
            }
            StreamUpdate::Event { event, elapsed } => self.apply_event(event, elapsed),
            StreamUpdate::Failed(e) => self.fail(StreamFailure::Transport(e)),
            StreamUpdate::Ended => self.fail(StreamFailure::ProtocolAnomaly),
        }
    }

    fn apply_event(&mut self, event: WireEvent, elapsed: Duration) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        tracing::debug!(exchange = %active.exchange, kind = event.kind(), "Stream event");

        let applied = active.aggregator.apply(event, elapsed);
        let Some(message) = active.aggregator.message().cloned() else {
            return;
        };
        let chat = active.chat.clone();
        let now = Utc::now();
        let stored = self
            .gateway
            .schedule_chat(&chat, |record| record.upsert_message(message.clone(), now));
        if stored.is_none() {
            tracing::debug!(chat = %chat, "Chat no longer present; event not persisted");
        }
        self.outbox.push(Notice::Transcript { chat, message });

        if let Applied::Done(timings) = applied {
            self.complete(timings);
        }
    }

    fn complete(&mut self, timings: Timings) {
        let Some(active) = self.active.take() else {
            return;
        };
        active.abort.abort();
        self.clear_marker(active.exchange);

        tracing::info!(
            exchange = %active.exchange,
            chat = %active.chat,
            total_ms = timings.total_ms,
            "Session completed"
        );
        self.last_outcome = Some(Ok(timings));
        self.set_state(SessionState::Completed);

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let gateway = self.gateway.clone();
                let chat = active.chat;
                runtime.spawn(async move {
                    if let Err(e) = gateway.save_completed(&chat).await {
                        tracing::warn!(chat = %chat, %e, "Saving completed chat failed");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(chat = %active.chat, "No runtime available; completed chat not saved");
            }
        }
        self.set_state(SessionState::Idle);
    }

    fn fail(&mut self, failure: StreamFailure) {
        let Some(active) = self.active.take() else {
            return;
        };
        active.abort.abort();
        self.clear_marker(active.exchange);

        let now = Utc::now();
        let exchange = active.exchange;
        let message = self.gateway.schedule_chat(&active.chat, |record| {
            // A message that already holds its synthesis keeps it; the
            // notice then goes into a message of its own.
            let reused = match record.assistant_mut(exchange) {
                Some(message) if message.is_pending() => {
                    message.mark_failed(FAILURE_NOTICE);
                    Some(message.clone())
                }
                _ => None,
            };
            let message = match reused {
                Some(message) => message,
                None => {
                    let message = Message::failure(exchange, FAILURE_NOTICE, now);
                    record.messages.push(message.clone());
                    message
                }
            };
            record.updated_at = now;
            message
        });
        if let Some(message) = message {
            self.outbox.push(Notice::Transcript {
                chat: active.chat.clone(),
                message,
            });
        }

        tracing::warn!(
            exchange = %exchange,
            chat = %active.chat,
            error = %failure,
            "Session failed"
        );
        self.last_outcome = Some(Err(failure));
        self.set_state(SessionState::Failed);
        self.outbox.push(Notice::Failed);
        self.set_state(SessionState::Idle);
    }

    fn clear_marker(&mut self, exchange: ExchangeId) {
        if self
            .pending_creation
            .as_ref()
            .is_some_and(|marker| marker.exchange == exchange)
        {
            self.pending_creation = None;
        }
    }

    fn set_state(&mut self, state: SessionState) {
        self.state = state;
        self.outbox.push(Notice::State(state));
    }

    fn dispatch<H: TranscriptObserver>(&mut self, registry: &mut HandlerRegistry<H>) {
        let notices = std::mem::take(&mut self.outbox);
        let Some(handler) = registry.current_mut() else {
            return;
        };
        for notice in notices {
            match notice {
                Notice::Transcript { chat, message } => handler.transcript_changed(&chat, &message),
                Notice::State(state) => handler.state_changed(state),
                Notice::Failed => {
                    if let Some(Err(failure)) = &self.last_outcome {
                        handler.failed(failure);
                    }
                }
            }
        }
    }
}

/// Open the stream in an abortable task that forwards updates over a channel.
fn spawn_stream(
    transport: Arc<dyn ChatTransport>,
    request: ChatRequest,
) -> (mpsc::Receiver<StreamUpdate>, AbortHandle) {
    let (tx, rx) = mpsc::channel(STREAM_UPDATE_CHANNEL_CAPACITY);
    let (abort_handle, abort_registration) = AbortHandle::new_pair();

    let task = async move {
        let started = tokio::time::Instant::now();
        let source = match transport.open(request).await {
            Ok(source) => source,
            Err(e) => {
                let _ = tx.send(StreamUpdate::Failed(e)).await;
                return;
            }
        };
        if tx.send(StreamUpdate::Opened).await.is_err() {
            return;
        }

        let mut events = Box::pin(decode_stream(source));
        while let Some(item) = events.next().await {
            let update = match item {
                Ok(event) => StreamUpdate::Event {
                    event,
                    elapsed: started.elapsed(),
                },
                Err(e) => {
                    let _ = tx.send(StreamUpdate::Failed(e)).await;
                    return;
                }
            };
            if tx.send(update).await.is_err() {
                return;
            }
        }
        let _ = tx.send(StreamUpdate::Ended).await;
    };

    tokio::spawn(async move {
        let _ = Abortable::new(task, abort_registration).await;
    });
    (rx, abort_handle)
}
