use std::sync::Arc;

use keeper_docstore::DocumentStore;
use keeper_providers::ProviderRouter;
use keeper_providers::ReindexState;
use keeper_queue::PendingQueue;
use keeper_vectorstore::VectorStore;
use tokio::sync::Mutex;
use tokio::sync::RwLock;

use crate::config::StoreConfig;

/// The Keeper facade (spec §4.1): orchestrates DocStore, VectorStore,
/// PendingQueue and ProviderRouter into the single write/read/find surface
/// callers use. Construction takes `Arc<dyn _>` trait objects for every
/// collaborator, mirroring the teacher's `LedgerFacade` wrapping `Arc<dyn
/// LedgerService>` — swapping an in-memory store for a durable one changes
/// nothing about `Keeper`'s own code.
pub struct Keeper {
    pub(crate) docstore: Arc<dyn DocumentStore>,
    pub(crate) vectorstore: Arc<dyn VectorStore>,
    pub(crate) queue: Arc<dyn PendingQueue>,
    pub(crate) providers: Arc<ProviderRouter>,
    pub(crate) config: RwLock<StoreConfig>,
    /// The store's reindex state machine (spec §4.6, §9 "Global state"): a
    /// state transition driven by an embedding provider identity change,
    /// not a side effect buried in the first inconsistent write.
    pub(crate) reindex: Mutex<ReindexState>,
}

impl Keeper {
    #[must_use]
    pub fn new(
        docstore: Arc<dyn DocumentStore>,
        vectorstore: Arc<dyn VectorStore>,
        queue: Arc<dyn PendingQueue>,
        providers: Arc<ProviderRouter>,
        config: StoreConfig,
    ) -> Self {
        Self {
            docstore,
            vectorstore,
            queue,
            providers,
            config: RwLock::new(config),
            reindex: Mutex::new(ReindexState::Current),
        }
    }

    pub async fn reindex_state(&self) -> ReindexState {
        self.reindex.lock().await.clone()
    }

    pub async fn config(&self) -> StoreConfig {
        self.config.read().await.clone()
    }

    pub async fn update_config(&self, config: StoreConfig) {
        *self.config.write().await = config;
    }
}
