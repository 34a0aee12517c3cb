use std::collections::HashMap;
use std::collections::VecDeque;
use std::path::Path;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::ProviderError;
use crate::error::ProviderResult;
use crate::identity::ProviderIdentity;

/// `(model_identity, text_hash)` — the cache key spec §5 describes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub identity_prefix: String,
    pub text_hash: String,
}

impl CacheKey {
    #[must_use]
    pub fn new(identity: &ProviderIdentity, text: &str) -> Self {
        Self {
            identity_prefix: identity.cache_key_prefix(),
            text_hash: blake3::hash(text.as_bytes()).to_hex().to_string(),
        }
    }

    fn as_flat_string(&self) -> String {
        format!("{}#{}", self.identity_prefix, self.text_hash)
    }
}

/// The persistent backing a [`LruEmbeddingCache`] fronts (spec §5: "a
/// persistent key/value store on disk, shared across threads by a
/// short-lived lock").
#[async_trait]
pub trait EmbeddingCacheStore: Send + Sync {
    async fn load(&self, key: &CacheKey) -> ProviderResult<Option<Vec<f32>>>;
    async fn store(&self, key: &CacheKey, vector: &[f32]) -> ProviderResult<()>;
}

/// A no-op backing store: every lookup misses, every store is discarded.
/// The default when no on-disk cache is configured.
#[derive(Default)]
pub struct NullCacheStore;

#[async_trait]
impl EmbeddingCacheStore for NullCacheStore {
    async fn load(&self, _key: &CacheKey) -> ProviderResult<Option<Vec<f32>>> {
        Ok(None)
    }

    async fn store(&self, _key: &CacheKey, _vector: &[f32]) -> ProviderResult<()> {
        Ok(())
    }
}

/// A JSON-file-backed store, one entry per line, loaded fully into memory
/// on open and rewritten on every `store`. Adequate for the embedding
/// cache's access pattern (small vectors, infrequent writes relative to
/// reads); grounded on the source's practice of persisting small ambient
/// state as a JSON file under the store's data directory.
pub struct FileCacheStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, Vec<f32>>>,
}

impl FileCacheStore {
    pub fn open(path: &Path) -> ProviderResult<Self> {
        let entries = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| ProviderError::Fatal(format!("read cache file: {e}")))?;
            serde_json::from_str(&raw)
                .map_err(|e| ProviderError::Fatal(format!("parse cache file: {e}")))?
        } else {
            HashMap::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            entries: Mutex::new(entries),
        })
    }

    async fn flush(&self, entries: &HashMap<String, Vec<f32>>) -> ProviderResult<()> {
        let serialized = serde_json::to_string(entries)
            .map_err(|e| ProviderError::Fatal(format!("serialize cache file: {e}")))?;
        std::fs::write(&self.path, serialized)
            .map_err(|e| ProviderError::Fatal(format!("write cache file: {e}")))
    }
}

#[async_trait]
impl EmbeddingCacheStore for FileCacheStore {
    async fn load(&self, key: &CacheKey) -> ProviderResult<Option<Vec<f32>>> {
        let entries = self.entries.lock().await;
        Ok(entries.get(&key.as_flat_string()).cloned())
    }

    async fn store(&self, key: &CacheKey, vector: &[f32]) -> ProviderResult<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(key.as_flat_string(), vector.to_vec());
        self.flush(&entries).await
    }
}

struct LruState {
    map: HashMap<CacheKey, Vec<f32>>,
    order: VecDeque<CacheKey>,
}

/// A bounded in-memory LRU fronting an [`EmbeddingCacheStore`] (spec §5:
/// "a bounded in-memory LRU of `(model_identity, text_hash) -> vector`,
/// plus a persistent key/value store on disk"), grounded on the
/// cache-wraps-persistence shape used elsewhere in the corpus for
/// durable-with-a-fast-path stores.
pub struct LruEmbeddingCache<S: EmbeddingCacheStore> {
    capacity: usize,
    state: Mutex<LruState>,
    backing: S,
}

impl<S: EmbeddingCacheStore> LruEmbeddingCache<S> {
    #[must_use]
    pub fn new(capacity: usize, backing: S) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(LruState {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
            backing,
        }
    }

    pub async fn get(&self, key: &CacheKey) -> ProviderResult<Option<Vec<f32>>> {
        {
            let mut state = self.state.lock().await;
            if let Some(vector) = state.map.get(key).cloned() {
                state.order.retain(|k| k != key);
                state.order.push_back(key.clone());
                return Ok(Some(vector));
            }
        }
        let Some(vector) = self.backing.load(key).await? else {
            return Ok(None);
        };
        self.insert_local(key.clone(), vector.clone()).await;
        Ok(Some(vector))
    }

    pub async fn put(&self, key: CacheKey, vector: Vec<f32>) -> ProviderResult<()> {
        self.backing.store(&key, &vector).await?;
        self.insert_local(key, vector).await;
        Ok(())
    }

    async fn insert_local(&self, key: CacheKey, vector: Vec<f32>) {
        let mut state = self.state.lock().await;
        if !state.map.contains_key(&key) && state.map.len() >= self.capacity {
            if let Some(evicted) = state.order.pop_front() {
                state.map.remove(&evicted);
            }
        }
        state.order.retain(|k| k != &key);
        state.order.push_back(key.clone());
        state.map.insert(key, vector);
    }
}
