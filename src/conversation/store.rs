use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::sync::Mutex;

use super::Conversation;
use crate::error::ClientError;

/// Keyed persistent storage for conversations.
///
/// Read-modify-write of one key is not atomic across callers; two exchanges
/// on the same handle may overwrite each other.
#[async_trait]
pub trait ConversationCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Conversation>, ClientError>;
    async fn set(&self, key: &str, conversation: &Conversation) -> Result<(), ClientError>;
}

/// Process-local cache.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<FxHashMap<String, Conversation>>,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl ConversationCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Conversation>, ClientError> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn set(&self, key: &str, conversation: &Conversation) -> Result<(), ClientError> {
        self.entries
            .write()
            .insert(key.to_string(), conversation.clone());
        Ok(())
    }
}

/// Cache persisted as one JSON object on disk, keyed like the memory cache.
///
/// Writes go to a sibling temp file that is renamed over the original.
pub struct JsonFileCache {
    path: PathBuf,
    io_lock: Mutex<()>,
}

impl JsonFileCache {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            io_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<FxHashMap<String, Conversation>, ClientError> {
        let contents = match tokio::fs::read(&self.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(FxHashMap::default())
            }
            Err(err) => {
                return Err(ClientError::Cache(format!(
                    "Failed to read {}: {err}",
                    self.path.display()
                )))
            }
        };
        if contents.iter().all(u8::is_ascii_whitespace) {
            return Ok(FxHashMap::default());
        }
        serde_json::from_slice(&contents).map_err(|err| {
            ClientError::Cache(format!("Failed to parse {}: {err}", self.path.display()))
        })
    }

    async fn write_all(&self, entries: &FxHashMap<String, Conversation>) -> Result<(), ClientError> {
        let body = serde_json::to_vec(entries)
            .map_err(|err| ClientError::Cache(format!("Failed to encode cache: {err}")))?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, body).await.map_err(|err| {
            ClientError::Cache(format!("Failed to write {}: {err}", tmp.display()))
        })?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|err| {
            ClientError::Cache(format!("Failed to replace {}: {err}", self.path.display()))
        })
    }
}

#[async_trait]
impl ConversationCache for JsonFileCache {
    async fn get(&self, key: &str) -> Result<Option<Conversation>, ClientError> {
        let _guard = self.io_lock.lock().await;
        let mut entries = self.read_all().await?;
        Ok(entries.remove(key))
    }

    async fn set(&self, key: &str, conversation: &Conversation) -> Result<(), ClientError> {
        let _guard = self.io_lock.lock().await;
        let mut entries = self.read_all().await?;
        entries.insert(key.to_string(), conversation.clone());
        self.write_all(&entries).await
    }
}

/// Namespaced view over a [`ConversationCache`].
#[derive(Clone)]
pub struct ConversationStore {
    cache: Arc<dyn ConversationCache>,
    namespace: String,
}

impl ConversationStore {
    #[must_use]
    pub fn new(cache: Arc<dyn ConversationCache>, namespace: impl Into<String>) -> Self {
        Self {
            cache,
            namespace: namespace.into(),
        }
    }

    fn key(&self, handle: &str) -> String {
        format!("{}:{handle}", self.namespace)
    }

    /// # Errors
    ///
    /// Propagates backend failures as [`ClientError::Cache`].
    pub async fn get(&self, handle: &str) -> Result<Option<Conversation>, ClientError> {
        self.cache.get(&self.key(handle)).await
    }

    /// # Errors
    ///
    /// Propagates backend failures as [`ClientError::Cache`].
    pub async fn set(&self, handle: &str, conversation: &Conversation) -> Result<(), ClientError> {
        self.cache.set(&self.key(handle), conversation).await
    }

    /// The stored conversation, or a fresh empty one. Never writes.
    ///
    /// # Errors
    ///
    /// Propagates backend failures as [`ClientError::Cache`].
    pub async fn get_or_create(&self, handle: &str) -> Result<Conversation, ClientError> {
        Ok(self
            .get(handle)
            .await?
            .unwrap_or_else(|| Conversation::new(handle)))
    }
}
