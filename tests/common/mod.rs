//! Shared fixtures for the integration suite.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chorus_client::{
    ByteStream, ChatTransport, ClientFut, HttpRemoteStore, HttpTransport, RemoteStore,
    TransportError,
};
use chorus_config::ClientConfig;
use chorus_engine::{
    ChatId, GatewaySettings, HandlerRegistry, MemoryStore, Message, PersistenceGateway,
    SessionState, StreamController, StreamFailure, TranscriptObserver, WireEvent,
};
use chorus_types::ChatRequest;
use futures_util::stream;
use tokio::sync::mpsc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// One `data:` line.
pub fn sse_line(event: &WireEvent) -> String {
    format!("data: {}\n", serde_json::to_string(event).expect("event serializes"))
}

/// A full stream body, with a blank line after each event as servers send it.
pub fn sse_body(events: &[WireEvent]) -> String {
    events
        .iter()
        .map(|event| format!("{}\n", sse_line(event)))
        .collect()
}

/// Four model answers, a tagged synthesis and `done`.
pub fn full_exchange() -> Vec<WireEvent> {
    vec![
        WireEvent::model_response("DeepSeek", "Paris is the capital of France."),
        WireEvent::model_response("Llama", "The capital is **Paris**."),
        WireEvent::model_response("GLM", "Paris."),
        WireEvent::model_response("Qwen", "France's capital: Paris"),
        WireEvent::synthesis(
            "===REASONING===\n**Consensus:** All models agree.\n===ANSWER===\nParis\n===TIPS===\n- Visit in spring",
        ),
        WireEvent::Done,
    ]
}

pub fn client_config(server: &MockServer) -> ClientConfig {
    ClientConfig {
        base_url: server.uri(),
        ..ClientConfig::default()
    }
}

pub async fn mount_chat_stream(server: &MockServer, body: String) {
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(body)
                .insert_header("content-type", "text/event-stream"),
        )
        .mount(server)
        .await;
}

pub async fn mount_chat_error(server: &MockServer, status: u16, body: &str) {
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(status).set_body_string(body))
        .mount(server)
        .await;
}

pub async fn mount_save(server: &MockServer, status: u16) {
    Mock::given(method("POST"))
        .and(path("/api/chats/save"))
        .respond_with(ResponseTemplate::new(status).set_body_json(serde_json::json!({"ok": true})))
        .mount(server)
        .await;
}

/// Bodies of every request the server received on `route`.
pub async fn bodies_for(server: &MockServer, route: &str) -> Vec<serde_json::Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|request| request.url.path() == route)
        .filter_map(|request| serde_json::from_slice(&request.body).ok())
        .collect()
}

/// Wait (bounded) until the server has seen a request on `route`.
pub async fn wait_for_request(server: &MockServer, route: &str) -> bool {
    for _ in 0..100 {
        let seen = server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .any(|request| request.url.path() == route);
        if seen {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    false
}

pub fn remote_store(server: &MockServer) -> Arc<dyn RemoteStore> {
    Arc::new(HttpRemoteStore::from_config(&client_config(server)).expect("remote store"))
}

pub fn memory_gateway(
    remote: Option<Arc<dyn RemoteStore>>,
) -> (PersistenceGateway, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let gateway = PersistenceGateway::open(Arc::clone(&store), remote, GatewaySettings::default())
        .expect("memory store opens");
    (gateway, store)
}

/// Controller speaking HTTP to `server`, with an in-memory transcript.
pub fn http_controller(server: &MockServer) -> (StreamController, Arc<MemoryStore>) {
    let config = client_config(server);
    let transport = HttpTransport::from_config(&config).expect("transport");
    let (gateway, store) = memory_gateway(Some(remote_store(server)));
    (
        StreamController::new(Arc::new(transport), gateway, &config),
        store,
    )
}

/// Feeds bytes to one opened stream by hand.
pub struct Feed {
    tx: mpsc::UnboundedSender<Result<Vec<u8>, TransportError>>,
}

impl Feed {
    pub fn send(&self, chunk: &str) -> bool {
        self.tx.send(Ok(chunk.as_bytes().to_vec())).is_ok()
    }

    pub fn event(&self, event: &WireEvent) -> bool {
        self.send(&sse_line(event))
    }
}

/// Transport whose streams are driven by [`Feed`]s queued in advance.
#[derive(Default)]
pub struct ScriptedTransport {
    streams: Mutex<VecDeque<ByteStream>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedTransport {
    /// Queue the stream for the next `open` and return its feed. Dropping the
    /// feed ends the stream.
    pub fn queue(&self) -> Feed {
        let (tx, rx) = mpsc::unbounded_channel();
        let source = stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) });
        self.streams.lock().unwrap().push_back(Box::pin(source));
        Feed { tx }
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl ChatTransport for ScriptedTransport {
    fn open(&self, request: ChatRequest) -> ClientFut<'_, Result<ByteStream, TransportError>> {
        self.requests.lock().unwrap().push(request);
        let next = self.streams.lock().unwrap().pop_front();
        Box::pin(async move {
            next.ok_or_else(|| TransportError::Body("no scripted stream queued".to_string()))
        })
    }
}

pub fn scripted_controller() -> (StreamController, Arc<ScriptedTransport>, Arc<MemoryStore>) {
    let transport = Arc::new(ScriptedTransport::default());
    let (gateway, store) = memory_gateway(None);
    let controller = StreamController::new(
        Arc::clone(&transport) as Arc<dyn ChatTransport>,
        gateway,
        &ClientConfig::default(),
    );
    (controller, transport, store)
}

/// Observer that records everything it is told.
#[derive(Debug, Default)]
pub struct Recorder {
    pub states: Vec<SessionState>,
    pub messages: Vec<(ChatId, Message)>,
    pub failures: Vec<String>,
}

impl TranscriptObserver for Recorder {
    fn transcript_changed(&mut self, chat: &ChatId, message: &Message) {
        self.messages.push((chat.clone(), message.clone()));
    }

    fn state_changed(&mut self, state: SessionState) {
        self.states.push(state);
    }

    fn failed(&mut self, failure: &StreamFailure) {
        self.failures.push(failure.to_string());
    }
}

pub fn recording_registry() -> HandlerRegistry<Recorder> {
    let mut registry = HandlerRegistry::new();
    registry.register(Recorder::default());
    registry
}
