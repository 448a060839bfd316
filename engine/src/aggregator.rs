//! Folds one exchange's wire events into its assistant message.

use std::time::Duration;

use chorus_types::{ExchangeId, Message, Timings, WireEvent};
use chrono::{DateTime, Utc};

/// What applying one event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// A model's answer was stored. `replaced` marks a repeated key.
    Answer { model_key: String, replaced: bool },
    Synthesis,
    /// A second synthesis arrived and was ignored.
    SynthesisIgnored,
    Done(Timings),
}

/// Reducer over the ordered event sequence of one exchange.
///
/// The only time dependency is the `elapsed` stamp supplied with each event;
/// the merge itself is deterministic.
#[derive(Debug)]
pub struct ResponseAggregator {
    exchange: ExchangeId,
    started_at: DateTime<Utc>,
    message: Option<Message>,
    first_model: Option<Duration>,
    synthesis_at: Option<Duration>,
}

fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

impl ResponseAggregator {
    #[must_use]
    pub fn new(exchange: ExchangeId, started_at: DateTime<Utc>) -> Self {
        Self {
            exchange,
            started_at,
            message: None,
            first_model: None,
            synthesis_at: None,
        }
    }

    #[must_use]
    pub fn exchange(&self) -> ExchangeId {
        self.exchange
    }

    /// The assistant message so far. `None` until the first event.
    #[must_use]
    pub fn message(&self) -> Option<&Message> {
        self.message.as_ref()
    }

    pub fn message_mut(&mut self) -> Option<&mut Message> {
        self.message.as_mut()
    }

    /// Apply `event`, received `elapsed` after the request started.
    pub fn apply(&mut self, event: WireEvent, elapsed: Duration) -> Applied {
        let exchange = self.exchange;
        let started_at = self.started_at;
        let message = self
            .message
            .get_or_insert_with(|| Message::pending_assistant(exchange, started_at));

        match event {
            WireEvent::ModelResponse { data } => {
                self.first_model.get_or_insert(elapsed);
                let model_key = data.model.to_lowercase();
                let replaced = message.upsert_answer(model_key.clone(), data.response);
                if replaced {
                    tracing::warn!(
                        exchange = %exchange,
                        model = %model_key,
                        "Duplicate model response; keeping the latest"
                    );
                }
                Applied::Answer {
                    model_key,
                    replaced,
                }
            }
            WireEvent::Synthesis { data } => {
                if message.set_synthesis(data.response) {
                    self.synthesis_at = Some(elapsed);
                    Applied::Synthesis
                } else {
                    tracing::warn!(exchange = %exchange, "Ignoring repeated synthesis event");
                    Applied::SynthesisIgnored
                }
            }
            WireEvent::Done => {
                let timings = Timings {
                    first_model_ms: self.first_model.map(millis),
                    synthesis_ms: self.synthesis_at.map(millis),
                    total_ms: millis(elapsed),
                };
                message.stamp_timings(timings);
                Applied::Done(timings)
            }
        }
    }
}
