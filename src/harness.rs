//! Wiring shared by every command: open the store, build the embedding
//! provider, and hand out the core components configured from `Config`.

use anyhow::Result;
use std::sync::Arc;

use recall_harness_core::chat::ChatHistoryStore;
use recall_harness_core::embedding::EmbeddingProvider;
use recall_harness_core::vectorstore::VectorStore;

use crate::config::Config;
use crate::embedding::create_provider;
use crate::sqlite_store::SqliteKvStore;

pub struct Harness {
    store: Arc<SqliteKvStore>,
    embeddings: Arc<dyn EmbeddingProvider>,
    config: Config,
}

impl Harness {
    pub async fn open(config: &Config) -> Result<Self> {
        let store = Arc::new(SqliteKvStore::open(&config.db.path).await?);
        let embeddings = create_provider(&config.embedding)?;
        Ok(Self {
            store,
            embeddings,
            config: config.clone(),
        })
    }

    pub fn store(&self) -> &Arc<SqliteKvStore> {
        &self.store
    }

    pub fn vector_store(&self) -> VectorStore {
        VectorStore::new(
            self.store.clone(),
            self.embeddings.clone(),
            self.config.vector_store_config(),
        )
    }

    pub fn chat_history(&self) -> ChatHistoryStore {
        ChatHistoryStore::new(self.store.clone(), self.config.chat.history_config())
    }

    pub async fn close(self) {
        self.store.pool().close().await;
    }
}
