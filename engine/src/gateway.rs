//! Persistence gateway: debounced write-through of the transcript.
//!
//! Mutations are applied immediately to an in-memory snapshot of every chat.
//! The first mutation after a commit starts a timer; when it fires the latest
//! snapshot is written once, however many mutations arrived in between. The
//! timer is not restarted by later mutations, so a steady stream of updates
//! still commits once per window.
//!
//! Completed chats are additionally formatted into the remote storage record,
//! kept in a local archive, and pushed to the remote store best-effort.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chorus_client::RemoteStore;
use chorus_config::PersistenceConfig;
use chorus_types::{ChatId, ChatRecord, StoredChat};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::PersistenceError;
use crate::store::LocalStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewaySettings {
    pub debounce: Duration,
    pub model_slots: usize,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self::from(&PersistenceConfig::default())
    }
}

impl From<&PersistenceConfig> for GatewaySettings {
    fn from(config: &PersistenceConfig) -> Self {
        Self {
            debounce: config.debounce(),
            model_slots: config.model_slots,
        }
    }
}

/// Result of [`PersistenceGateway::save_completed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Archived locally and accepted by the remote store.
    Synced,
    /// Archived locally only; the remote push failed or there is no remote.
    LocalOnly,
    /// No chat with that id is known.
    Missing,
}

#[derive(Default)]
struct GatewayState {
    snapshot: Vec<ChatRecord>,
    dirty: bool,
    timer: Option<JoinHandle<()>>,
}

struct Inner {
    local: Box<dyn LocalStore>,
    remote: Option<Arc<dyn RemoteStore>>,
    settings: GatewaySettings,
    state: Mutex<GatewayState>,
    /// Held for the duration of every local write so commits never interleave.
    io: Mutex<()>,
    changed: watch::Sender<u64>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Inner {
    fn commit(&self) -> Result<(), PersistenceError> {
        let _io = lock(&self.io);
        let snapshot = {
            let mut state = lock(&self.state);
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            if !state.dirty {
                return Ok(());
            }
            state.dirty = false;
            state.snapshot.clone()
        };

        if let Err(e) = self.local.store_chats(&snapshot) {
            lock(&self.state).dirty = true;
            return Err(e);
        }
        self.changed.send_modify(|writes| *writes += 1);
        tracing::debug!(chats = snapshot.len(), "Committed transcript");
        Ok(())
    }

    fn update_archive(
        &self,
        update: impl FnOnce(&mut Vec<StoredChat>),
    ) -> Result<(), PersistenceError> {
        let _io = lock(&self.io);
        let mut archive = self.local.load_archive()?;
        update(&mut archive);
        self.local.store_archive(&archive)
    }
}

/// Cheap to clone; clones share one snapshot and one timer.
#[derive(Clone)]
pub struct PersistenceGateway {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for PersistenceGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceGateway")
            .field("settings", &self.inner.settings)
            .field("remote", &self.inner.remote.is_some())
            .finish_non_exhaustive()
    }
}

impl PersistenceGateway {
    /// Load the transcript from `local` and start from it.
    pub fn open(
        local: impl LocalStore + 'static,
        remote: Option<Arc<dyn RemoteStore>>,
        settings: GatewaySettings,
    ) -> Result<Self, PersistenceError> {
        let snapshot = local.load_chats()?;
        tracing::debug!(chats = snapshot.len(), "Loaded transcript");
        let (changed, _) = watch::channel(0);
        Ok(Self {
            inner: Arc::new(Inner {
                local: Box::new(local),
                remote,
                settings,
                state: Mutex::new(GatewayState {
                    snapshot,
                    ..GatewayState::default()
                }),
                io: Mutex::new(()),
                changed,
            }),
        })
    }

    #[must_use]
    pub fn settings(&self) -> GatewaySettings {
        self.inner.settings
    }

    /// Apply `mutator` to the latest snapshot and schedule a durable write.
    ///
    /// Outside a tokio runtime the write happens immediately.
    pub fn schedule<R>(&self, mutator: impl FnOnce(&mut Vec<ChatRecord>) -> R) -> R {
        let (result, commit_now) = {
            let mut state = lock(&self.inner.state);
            let result = mutator(&mut state.snapshot);
            state.dirty = true;
            let commit_now = if state.timer.is_some() {
                false
            } else if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                let inner = Arc::clone(&self.inner);
                let debounce = self.inner.settings.debounce;
                state.timer = Some(runtime.spawn(async move {
                    tokio::time::sleep(debounce).await;
                    // Detach our own handle so commit does not abort us.
                    drop(lock(&inner.state).timer.take());
                    if let Err(e) = inner.commit() {
                        tracing::warn!(%e, "Debounced transcript write failed");
                    }
                }));
                false
            } else {
                true
            };
            (result, commit_now)
        };

        if commit_now && let Err(e) = self.inner.commit() {
            tracing::warn!(%e, "Transcript write failed");
        }
        result
    }

    /// [`schedule`](Self::schedule) against one chat. `None` (and no write)
    /// when the chat is unknown.
    pub fn schedule_chat<R>(
        &self,
        chat: &ChatId,
        mutator: impl FnOnce(&mut ChatRecord) -> R,
    ) -> Option<R> {
        if !self.contains(chat) {
            return None;
        }
        self.schedule(|chats| chats.iter_mut().find(|c| &c.id == chat).map(mutator))
    }

    /// Add `chat` at the front of the transcript, replacing any chat with the
    /// same id.
    pub fn insert_chat(&self, chat: ChatRecord) {
        self.schedule(|chats| {
            chats.retain(|c| c.id != chat.id);
            chats.insert(0, chat);
        });
    }

    #[must_use]
    pub fn contains(&self, chat: &ChatId) -> bool {
        lock(&self.inner.state)
            .snapshot
            .iter()
            .any(|c| &c.id == chat)
    }

    /// Latest snapshot, including writes not yet committed.
    #[must_use]
    pub fn transcript(&self) -> Vec<ChatRecord> {
        lock(&self.inner.state).snapshot.clone()
    }

    #[must_use]
    pub fn chat(&self, chat: &ChatId) -> Option<ChatRecord> {
        lock(&self.inner.state)
            .snapshot
            .iter()
            .find(|c| &c.id == chat)
            .cloned()
    }

    /// Commit any pending write now.
    pub fn flush(&self) -> Result<(), PersistenceError> {
        self.inner.commit()
    }

    /// Observe committed writes. The value counts commits since open.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.changed.subscribe()
    }

    /// Format `chat` for the remote store, archive it locally and push it.
    ///
    /// Idempotent: the remote save is an upsert and the archive is keyed by
    /// chat id. A failed push is logged and not retried.
    pub async fn save_completed(&self, chat: &ChatId) -> Result<SaveOutcome, PersistenceError> {
        self.flush()?;
        let Some(record) = self.chat(chat) else {
            return Ok(SaveOutcome::Missing);
        };

        let (stored, dropped) = StoredChat::from_record(&record, self.inner.settings.model_slots);
        if dropped > 0 {
            tracing::warn!(
                chat = %chat,
                dropped,
                slots = self.inner.settings.model_slots,
                "Model answers beyond the slot count were not stored"
            );
        }

        self.inner.update_archive(|archive| {
            match archive.iter_mut().find(|c| c.chat_id == stored.chat_id) {
                Some(existing) => *existing = stored.clone(),
                None => archive.push(stored.clone()),
            }
        })?;

        let Some(remote) = self.inner.remote.clone() else {
            return Ok(SaveOutcome::LocalOnly);
        };
        match remote.save_chat(&stored).await {
            Ok(()) => {
                tracing::info!(chat = %chat, messages = stored.messages.len(), "Saved chat");
                Ok(SaveOutcome::Synced)
            }
            Err(e) => {
                tracing::warn!(chat = %chat, %e, "Remote save failed; keeping local copy");
                Ok(SaveOutcome::LocalOnly)
            }
        }
    }

    /// Chats held by the remote store. Empty when there is no remote or the
    /// fetch fails.
    pub async fn fetch_remote(&self) -> Vec<StoredChat> {
        let Some(remote) = self.inner.remote.clone() else {
            return Vec::new();
        };
        match remote.list_chats().await {
            Ok(chats) => chats,
            Err(e) => {
                tracing::warn!(%e, "Fetching remote chats failed");
                Vec::new()
            }
        }
    }

    /// Adopt remote chats that are not known locally. Returns how many were
    /// added.
    pub async fn import_remote(&self) -> usize {
        let remote = self.fetch_remote().await;
        let added = self.schedule(|chats| {
            let mut added = 0;
            for stored in remote {
                if chats.iter().all(|c| c.id != stored.chat_id) {
                    chats.push(stored.into_record());
                    added += 1;
                }
            }
            added
        });
        if added > 0 {
            tracing::info!(added, "Imported remote chats");
        }
        added
    }

    /// Remove `chat` locally, then best-effort from the remote store.
    /// Returns whether it was known locally.
    pub async fn delete_chat(&self, chat: &ChatId) -> Result<bool, PersistenceError> {
        let removed = self.schedule(|chats| {
            let before = chats.len();
            chats.retain(|c| &c.id != chat);
            before != chats.len()
        });
        self.flush()?;
        self.inner
            .update_archive(|archive| archive.retain(|c| &c.chat_id != chat))?;

        if let Some(remote) = self.inner.remote.clone()
            && let Err(e) = remote.delete_chat(chat).await
        {
            tracing::warn!(chat = %chat, %e, "Remote delete failed");
        }
        Ok(removed)
    }
}
