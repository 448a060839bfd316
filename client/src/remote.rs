//! Client side of the remote chat store.

use chorus_config::ClientConfig;
use chorus_types::{ChatId, StoredChat};
use serde::Deserialize;
use url::Url;

use crate::http::{ClientFut, endpoint, ensure_success, http_client};
use crate::TransportError;

/// The three chat-store endpoints. Every call is best-effort from the
/// caller's point of view; local storage stays the record of truth.
pub trait RemoteStore: Send + Sync {
    fn list_chats(&self) -> ClientFut<'_, Result<Vec<StoredChat>, TransportError>>;

    /// Idempotent upsert keyed by `chat.chat_id`.
    fn save_chat<'a>(&'a self, chat: &'a StoredChat) -> ClientFut<'a, Result<(), TransportError>>;

    fn delete_chat<'a>(&'a self, chat_id: &'a ChatId) -> ClientFut<'a, Result<(), TransportError>>;
}

#[derive(Debug, Deserialize)]
struct ChatList {
    #[serde(default)]
    chats: Vec<StoredChat>,
}

/// `GET /api/chats`, `POST /api/chats/save`, `DELETE /api/chats/{id}`.
#[derive(Debug, Clone)]
pub struct HttpRemoteStore {
    client: reqwest::Client,
    chats_url: Url,
    save_url: Url,
}

impl HttpRemoteStore {
    pub fn new(client: reqwest::Client, base_url: &str) -> Result<Self, TransportError> {
        Ok(Self {
            client,
            chats_url: endpoint(base_url, "api/chats")?,
            save_url: endpoint(base_url, "api/chats/save")?,
        })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, TransportError> {
        Self::new(http_client(config)?, &config.base_url())
    }

    fn chat_url(&self, chat_id: &ChatId) -> Url {
        let mut url = self.chats_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(chat_id.as_str());
        }
        url
    }
}

impl RemoteStore for HttpRemoteStore {
    fn list_chats(&self) -> ClientFut<'_, Result<Vec<StoredChat>, TransportError>> {
        Box::pin(async move {
            let response = self.client.get(self.chats_url.clone()).send().await?;
            let list: ChatList = ensure_success(response).await?.json().await?;
            Ok(list.chats)
        })
    }

    fn save_chat<'a>(&'a self, chat: &'a StoredChat) -> ClientFut<'a, Result<(), TransportError>> {
        Box::pin(async move {
            let response = self
                .client
                .post(self.save_url.clone())
                .json(chat)
                .send()
                .await?;
            ensure_success(response).await?;
            Ok(())
        })
    }

    fn delete_chat<'a>(&'a self, chat_id: &'a ChatId) -> ClientFut<'a, Result<(), TransportError>> {
        Box::pin(async move {
            let response = self.client.delete(self.chat_url(chat_id)).send().await?;
            ensure_success(response).await?;
            Ok(())
        })
    }
}
