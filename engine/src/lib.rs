//! Core engine for Chorus: streaming sessions and transcript persistence.
//!
//! - [`StreamController`] owns the single live exchange: submit, cancel, and
//!   the new-chat navigation exemption.
//! - [`ResponseAggregator`] folds one exchange's wire events into its
//!   assistant [`Message`].
//! - [`PersistenceGateway`] debounces transcript writes to a [`LocalStore`]
//!   and saves completed chats to the remote store.
//! - [`HandlerRegistry`] carries the caller's [`TranscriptObserver`].
//!
//! No UI dependencies; callers drive the controller and render what the
//! observer reports.

use std::sync::Arc;

use chorus_client::{HttpRemoteStore, HttpTransport, RemoteStore, http_client};
use chorus_config::ChorusConfig;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

mod aggregator;
mod controller;
mod error;
mod gateway;
mod registry;
mod store;

pub use aggregator::{Applied, ResponseAggregator};
pub use controller::{FAILURE_NOTICE, SessionOutcome, SessionState, StreamController, Submission};
pub use error::{EngineError, PersistenceError, StreamFailure, SubmitError};
pub use gateway::{GatewaySettings, PersistenceGateway, SaveOutcome};
pub use registry::{HandlerRegistry, HandlerToken, TranscriptObserver};
pub use store::{ARCHIVE_FILE, CHATS_FILE, FileStore, LocalStore, MemoryStore};

pub use chorus_client::{ChatTransport, TransportError};
pub use chorus_config::{ClientConfig, PersistenceConfig};
pub use chorus_content as content;
pub use chorus_types::{
    ChatId, ChatRecord, ExchangeId, Message, ModelAnswer, Role, StoredChat, Timings, WireEvent,
};

/// Install a stderr `tracing` subscriber filtered by `RUST_LOG`, defaulting
/// to `info`. Does nothing if a subscriber is already installed.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::try_new("warn").expect("warn filter is valid"));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .try_init();
}

/// Build a controller talking HTTP to the configured service, with the
/// transcript kept in the configured data directory.
pub fn connect(config: &ChorusConfig) -> Result<StreamController, EngineError> {
    let client = config.client();
    let persistence = config.persistence();
    let data_dir = persistence.data_dir().ok_or(EngineError::NoDataDir)?;

    let http = http_client(&client)?;
    let base_url = client.base_url();
    let transport = HttpTransport::new(http.clone(), &base_url)?;
    let remote: Arc<dyn RemoteStore> = Arc::new(HttpRemoteStore::new(http, &base_url)?);

    tracing::info!(
        base_url = %base_url,
        data_dir = %data_dir.display(),
        "Connecting"
    );
    let gateway = PersistenceGateway::open(
        FileStore::new(data_dir),
        Some(remote),
        GatewaySettings::from(&persistence),
    )?;
    Ok(StreamController::new(Arc::new(transport), gateway, &client))
}

/// [`connect`] using `~/.chorus/config.toml`, or defaults when it is absent.
pub fn connect_default() -> Result<StreamController, EngineError> {
    let config = ChorusConfig::load()?.unwrap_or_default();
    connect(&config)
}
