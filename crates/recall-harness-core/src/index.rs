//! Index lifecycle management.
//!
//! An index is created lazily the first time documents are ingested and is
//! immutable afterwards; the only way to change its schema is to drop it.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{HarnessError, Result};
use crate::models::IndexSchema;
use crate::store::KeyValueStore;

/// Outcome of [`IndexManager::ensure_index`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStatus {
    Created,
    Existing,
}

pub struct IndexManager {
    store: Arc<dyn KeyValueStore>,
}

impl IndexManager {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Create the index when absent; accept it when present with the same
    /// schema; otherwise fail with `SchemaMismatch`.
    pub async fn ensure_index(&self, schema: &IndexSchema) -> Result<IndexStatus> {
        schema.validate()?;

        if let Some(existing) = self.store.index_info(&schema.name).await? {
            schema.check_compatible(&existing)?;
            debug!(index = %schema.name, "index already present");
            return Ok(IndexStatus::Existing);
        }

        match self.store.create_index(schema).await {
            Ok(()) => {
                info!(
                    index = %schema.name,
                    prefix = %schema.key_prefix,
                    dims = schema.dims,
                    metric = %schema.metric,
                    "created index"
                );
                Ok(IndexStatus::Created)
            }
            // Another writer created it between our read and create.
            Err(HarnessError::IndexExists(_)) => {
                let existing = self
                    .store
                    .index_info(&schema.name)
                    .await?
                    .ok_or_else(|| HarnessError::IndexNotFound(schema.name.clone()))?;
                schema.check_compatible(&existing)?;
                Ok(IndexStatus::Existing)
            }
            Err(e) => Err(e),
        }
    }

    /// Drop the index definition. Documents under its prefix are kept
    /// unless `delete_documents` is set.
    pub async fn drop_index(&self, name: &str, delete_documents: bool) -> Result<()> {
        self.store.drop_index(name, delete_documents).await?;
        info!(index = %name, delete_documents, "dropped index");
        Ok(())
    }

    pub async fn index_info(&self, name: &str) -> Result<Option<IndexSchema>> {
        self.store.index_info(name).await
    }
}
