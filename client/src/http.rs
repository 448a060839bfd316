//! HTTP plumbing for `POST /api/chat`.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chorus_config::ClientConfig;
use chorus_types::ChatRequest;
use futures_util::StreamExt;
use url::Url;

use crate::{ByteStream, TransportError};

const TCP_KEEPALIVE_SECS: u64 = 60;
const POOL_MAX_IDLE_PER_HOST: usize = 16;
const POOL_IDLE_TIMEOUT_SECS: u64 = 90;
const MAX_ERROR_BODY_BYTES: usize = 32 * 1024;

/// Boxed future returned by the object-safe client traits.
pub type ClientFut<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Build the shared HTTP client. No overall request timeout: a stalled
/// stream stays open until cancelled.
pub fn http_client(config: &ClientConfig) -> Result<reqwest::Client, TransportError> {
    let client = reqwest::Client::builder()
        .connect_timeout(config.connect_timeout())
        .redirect(reqwest::redirect::Policy::none())
        .tcp_keepalive(Some(Duration::from_secs(TCP_KEEPALIVE_SECS)))
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .pool_idle_timeout(Some(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS)))
        .build()?;
    Ok(client)
}

/// `base` joined with a relative `path`, keeping any path prefix on `base`.
pub(crate) fn endpoint(base: &str, path: &str) -> Result<Url, TransportError> {
    let base = Url::parse(&format!("{}/", base.trim_end_matches('/')))?;
    Ok(base.join(path)?)
}

pub async fn read_capped_error_body(response: reqwest::Response) -> String {
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let Ok(chunk) = chunk else { break };
        body.extend_from_slice(&chunk);
        if body.len() > MAX_ERROR_BODY_BYTES {
            body.truncate(MAX_ERROR_BODY_BYTES);
            let text = String::from_utf8_lossy(&body);
            return format!("{text}...(truncated)");
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}

/// Fail with [`TransportError::Status`] unless the response is a success.
pub(crate) async fn ensure_success(
    response: reqwest::Response,
) -> Result<reqwest::Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = read_capped_error_body(response).await;
    Err(TransportError::Status {
        status: status.as_u16(),
        body,
    })
}

/// Opens the response stream for one exchange.
///
/// The controller only sees a byte source, so tests and embedders can supply
/// their own.
pub trait ChatTransport: Send + Sync {
    fn open(&self, request: ChatRequest) -> ClientFut<'_, Result<ByteStream, TransportError>>;
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    chat_url: Url,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client, base_url: &str) -> Result<Self, TransportError> {
        Ok(Self {
            client,
            chat_url: endpoint(base_url, "api/chat")?,
        })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, TransportError> {
        Self::new(http_client(config)?, &config.base_url())
    }

    #[must_use]
    pub fn chat_url(&self) -> &Url {
        &self.chat_url
    }
}

impl ChatTransport for HttpTransport {
    fn open(&self, request: ChatRequest) -> ClientFut<'_, Result<ByteStream, TransportError>> {
        Box::pin(async move {
            tracing::debug!(
                url = %self.chat_url,
                models = request.models.len(),
                "Opening chat stream"
            );
            let response = self
                .client
                .post(self.chat_url.clone())
                .header(reqwest::header::ACCEPT, "text/event-stream")
                .json(&request)
                .send()
                .await?;
            let response = ensure_success(response).await?;

            let body = response
                .bytes_stream()
                .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(TransportError::from));
            Ok(Box::pin(body) as ByteStream)
        })
    }
}
