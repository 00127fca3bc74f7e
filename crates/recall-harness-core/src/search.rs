//! Similarity search over one index.
//!
//! A search compiles the caller's filter, embeds the query text when
//! needed, issues a single combined KNN + filter query to the store, and
//! decodes the hits back into documents.
//!
//! # Ranking
//!
//! Results are ordered by ascending distance under the index metric.
//! Equal distances are ordered by ascending document id so repeated
//! searches over the same data return the same order.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::{debug, info};

use crate::embedding::EmbeddingProvider;
use crate::error::{HarnessError, Result};
use crate::filter::{Filter, FilterQueryBuilder};
use crate::ingest::decode_record;
use crate::models::{Document, IndexSchema, SearchResult};
use crate::store::{KeyValueStore, StoreFilter, VectorQuery};

/// What [`SimilaritySearchEngine::delete`] removes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteTarget {
    Ids(Vec<String>),
    /// Every document under the index prefix; the index itself stays.
    All,
}

pub struct SimilaritySearchEngine {
    store: Arc<dyn KeyValueStore>,
    embeddings: Arc<dyn EmbeddingProvider>,
    schema: IndexSchema,
    default_filter_field: Option<String>,
}

impl SimilaritySearchEngine {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        embeddings: Arc<dyn EmbeddingProvider>,
        schema: IndexSchema,
    ) -> Self {
        Self {
            store,
            embeddings,
            schema,
            default_filter_field: None,
        }
    }

    pub fn with_default_filter_field(mut self, field: Option<String>) -> Self {
        self.default_filter_field = field;
        self
    }

    pub async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<Document>> {
        Ok(strip_scores(
            self.similarity_search_with_score(query, k, filter).await?,
        ))
    }

    pub async fn similarity_search_with_score(
        &self,
        query: &str,
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchResult>> {
        let store_filter = self.compile(filter)?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let vector = self.embeddings.embed(query).await?;
        self.run_query(vector, k, store_filter).await
    }

    pub async fn similarity_search_by_vector(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<Document>> {
        Ok(strip_scores(
            self.similarity_search_by_vector_with_score(vector, k, filter)
                .await?,
        ))
    }

    pub async fn similarity_search_by_vector_with_score(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchResult>> {
        let store_filter = self.compile(filter)?;
        if k == 0 {
            return Ok(Vec::new());
        }
        self.run_query(vector.to_vec(), k, store_filter).await
    }

    /// Remove documents. Returns how many existed.
    pub async fn delete(&self, target: &DeleteTarget) -> Result<usize> {
        self.schema.validate()?;
        let keys: Vec<String> = match target {
            DeleteTarget::Ids(ids) => ids.iter().map(|id| self.schema.key_for(id)).collect(),
            DeleteTarget::All => self.store.keys_with_prefix(&self.schema.key_prefix).await?,
        };
        if keys.is_empty() {
            return Ok(0);
        }
        let removed = self.store.delete(&keys).await?;
        info!(index = %self.schema.name, requested = keys.len(), removed, "deleted documents");
        Ok(removed)
    }

    fn compile(&self, filter: Option<&Filter>) -> Result<StoreFilter> {
        FilterQueryBuilder::new(&self.schema)
            .with_default_field(self.default_filter_field.as_deref())
            .build(filter)
    }

    async fn run_query(
        &self,
        vector: Vec<f32>,
        k: usize,
        filter: StoreFilter,
    ) -> Result<Vec<SearchResult>> {
        if vector.len() != self.schema.dims {
            return Err(HarnessError::DimensionMismatch {
                expected: self.schema.dims,
                actual: vector.len(),
            });
        }

        debug!(index = %self.schema.name, k, filter = %filter, "vector query");
        let query = VectorQuery {
            index: self.schema.name.clone(),
            vector,
            k,
            filter,
        };
        let hits = self.store.vector_query(&query).await?;

        let mut results = hits
            .iter()
            .map(|hit| {
                let mut document = decode_record(&self.schema, &hit.key, &hit.fields)?;
                document.vector = None;
                Ok(SearchResult {
                    document,
                    score: hit.distance,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        results.sort_by(|a, b| {
            a.score
                .partial_cmp(&b.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.document.id.cmp(&b.document.id))
        });
        results.truncate(k);
        Ok(results)
    }
}

fn strip_scores(results: Vec<SearchResult>) -> Vec<Document> {
    results.into_iter().map(|r| r.document).collect()
}
