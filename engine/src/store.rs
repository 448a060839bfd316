//! Local durable storage of the chat transcript and the stored-record archive.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chorus_types::{ChatRecord, StoredChat};
use chorus_utils::{atomic_write, read_if_exists};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::PersistenceError;

pub const CHATS_FILE: &str = "chats.json";
pub const ARCHIVE_FILE: &str = "stored_chats.json";

/// Synchronous local storage. The gateway serializes all writes.
pub trait LocalStore: Send + Sync {
    fn load_chats(&self) -> Result<Vec<ChatRecord>, PersistenceError>;
    fn store_chats(&self, chats: &[ChatRecord]) -> Result<(), PersistenceError>;

    /// Formatted records as last pushed (or attempted) to the remote store.
    fn load_archive(&self) -> Result<Vec<StoredChat>, PersistenceError>;
    fn store_archive(&self, chats: &[StoredChat]) -> Result<(), PersistenceError>;
}

/// JSON files in one directory, written atomically.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read<T: DeserializeOwned>(&self, name: &str) -> Result<Vec<T>, PersistenceError> {
        let path = self.dir.join(name);
        let bytes = read_if_exists(&path).map_err(|source| PersistenceError::Io {
            path: path.clone(),
            source,
        })?;
        match bytes {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|source| PersistenceError::Decode { path, source }),
            None => Ok(Vec::new()),
        }
    }

    fn write<T: Serialize>(&self, name: &str, items: &[T]) -> Result<(), PersistenceError> {
        let path = self.dir.join(name);
        let bytes = serde_json::to_vec(items).map_err(PersistenceError::Encode)?;
        atomic_write(&path, &bytes).map_err(|source| PersistenceError::Io { path, source })
    }
}

impl LocalStore for FileStore {
    fn load_chats(&self) -> Result<Vec<ChatRecord>, PersistenceError> {
        self.read(CHATS_FILE)
    }

    fn store_chats(&self, chats: &[ChatRecord]) -> Result<(), PersistenceError> {
        self.write(CHATS_FILE, chats)
    }

    fn load_archive(&self) -> Result<Vec<StoredChat>, PersistenceError> {
        self.read(ARCHIVE_FILE)
    }

    fn store_archive(&self, chats: &[StoredChat]) -> Result<(), PersistenceError> {
        self.write(ARCHIVE_FILE, chats)
    }
}

/// In-memory store for ephemeral sessions. Counts transcript writes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    chats: Mutex<Vec<ChatRecord>>,
    archive: Mutex<Vec<StoredChat>>,
    writes: Mutex<usize>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_chats(chats: Vec<ChatRecord>) -> Self {
        Self {
            chats: Mutex::new(chats),
            ..Self::default()
        }
    }

    /// Transcript writes committed so far.
    #[must_use]
    pub fn writes(&self) -> usize {
        *lock(&self.writes)
    }

    /// Transcript as last committed.
    #[must_use]
    pub fn chats(&self) -> Vec<ChatRecord> {
        lock(&self.chats).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl LocalStore for MemoryStore {
    fn load_chats(&self) -> Result<Vec<ChatRecord>, PersistenceError> {
        Ok(self.chats())
    }

    fn store_chats(&self, chats: &[ChatRecord]) -> Result<(), PersistenceError> {
        *lock(&self.chats) = chats.to_vec();
        *lock(&self.writes) += 1;
        Ok(())
    }

    fn load_archive(&self) -> Result<Vec<StoredChat>, PersistenceError> {
        Ok(lock(&self.archive).clone())
    }

    fn store_archive(&self, chats: &[StoredChat]) -> Result<(), PersistenceError> {
        *lock(&self.archive) = chats.to_vec();
        Ok(())
    }
}

// Shared-ownership stores, so callers can keep a handle for inspection.
impl<T: LocalStore + ?Sized> LocalStore for std::sync::Arc<T> {
    fn load_chats(&self) -> Result<Vec<ChatRecord>, PersistenceError> {
        (**self).load_chats()
    }

    fn store_chats(&self, chats: &[ChatRecord]) -> Result<(), PersistenceError> {
        (**self).store_chats(chats)
    }

    fn load_archive(&self) -> Result<Vec<StoredChat>, PersistenceError> {
        (**self).load_archive()
    }

    fn store_archive(&self, chats: &[StoredChat]) -> Result<(), PersistenceError> {
        (**self).store_archive(chats)
    }
}
