//! The vector store facade.
//!
//! [`VectorStore`] binds one index schema, one store handle and one
//! embedding provider, and exposes the full document API: ensure / drop
//! the index, add documents, search, delete. It holds no mutable state of
//! its own, so one instance can serve concurrent callers.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::filter::Filter;
use crate::index::{IndexManager, IndexStatus};
use crate::ingest::{AddOptions, DocumentIngestor, DEFAULT_BATCH_SIZE};
use crate::models::{DistanceMetric, Document, FieldKind, IndexSchema, SearchResult};
use crate::search::{DeleteTarget, SimilaritySearchEngine};
use crate::store::KeyValueStore;

#[derive(Debug, Clone)]
pub struct VectorStoreConfig {
    pub index_name: String,
    pub key_prefix: String,
    pub metric: DistanceMetric,
    /// Defaults to the embedding provider's dimension.
    pub dims: Option<usize>,
    pub metadata_fields: BTreeMap<String, FieldKind>,
    /// Field matched by [`Filter::Values`].
    pub default_filter_field: Option<String>,
    pub batch_size: usize,
}

impl VectorStoreConfig {
    pub fn new(index_name: impl Into<String>, key_prefix: impl Into<String>) -> Self {
        Self {
            index_name: index_name.into(),
            key_prefix: key_prefix.into(),
            metric: DistanceMetric::Cosine,
            dims: None,
            metadata_fields: BTreeMap::new(),
            default_filter_field: None,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_dims(mut self, dims: usize) -> Self {
        self.dims = Some(dims);
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.metadata_fields.insert(name.into(), kind);
        self
    }

    pub fn with_default_filter_field(mut self, field: impl Into<String>) -> Self {
        self.default_filter_field = Some(field.into());
        self
    }
}

pub struct VectorStore {
    schema: IndexSchema,
    indexes: IndexManager,
    ingestor: DocumentIngestor,
    engine: SimilaritySearchEngine,
}

impl VectorStore {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        embeddings: Arc<dyn EmbeddingProvider>,
        config: VectorStoreConfig,
    ) -> Self {
        let schema = IndexSchema {
            name: config.index_name,
            key_prefix: config.key_prefix,
            dims: config.dims.unwrap_or_else(|| embeddings.dims()),
            metric: config.metric,
            metadata_fields: config.metadata_fields,
        };

        Self {
            indexes: IndexManager::new(store.clone()),
            ingestor: DocumentIngestor::new(store.clone(), embeddings.clone(), schema.clone())
                .with_batch_size(config.batch_size),
            engine: SimilaritySearchEngine::new(store, embeddings, schema.clone())
                .with_default_filter_field(config.default_filter_field),
            schema,
        }
    }

    pub fn schema(&self) -> &IndexSchema {
        &self.schema
    }

    pub async fn ensure_index(&self) -> Result<IndexStatus> {
        self.indexes.ensure_index(&self.schema).await
    }

    pub async fn index_info(&self) -> Result<Option<IndexSchema>> {
        self.indexes.index_info(&self.schema.name).await
    }

    pub async fn drop_index(&self, delete_documents: bool) -> Result<()> {
        self.indexes
            .drop_index(&self.schema.name, delete_documents)
            .await
    }

    pub async fn add_documents(
        &self,
        docs: &[Document],
        options: &AddOptions,
    ) -> Result<Vec<String>> {
        self.ingestor.add_documents(docs, options).await
    }

    pub async fn add_vectors(
        &self,
        vectors: &[Vec<f32>],
        docs: &[Document],
        options: &AddOptions,
    ) -> Result<Vec<String>> {
        self.ingestor.add_vectors(vectors, docs, options).await
    }

    pub async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<Document>> {
        self.engine.similarity_search(query, k, filter).await
    }

    pub async fn similarity_search_with_score(
        &self,
        query: &str,
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchResult>> {
        self.engine
            .similarity_search_with_score(query, k, filter)
            .await
    }

    pub async fn similarity_search_by_vector(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<Document>> {
        self.engine
            .similarity_search_by_vector(vector, k, filter)
            .await
    }

    pub async fn similarity_search_by_vector_with_score(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchResult>> {
        self.engine
            .similarity_search_by_vector_with_score(vector, k, filter)
            .await
    }

    pub async fn delete(&self, target: &DeleteTarget) -> Result<usize> {
        self.engine.delete(target).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedding;
    use crate::error::HarnessError;
    use crate::filter::Predicate;
    use crate::models::{Metadata, MetadataValue};
    use crate::store::memory::InMemoryStore;

    fn vector_store(store: Arc<InMemoryStore>) -> VectorStore {
        VectorStore::new(
            store,
            Arc::new(HashEmbedding::new(64)),
            VectorStoreConfig::new("test-index", "test:")
                .with_field("foo", FieldKind::Tag)
                .with_field("year", FieldKind::Numeric),
        )
    }

    fn strip_ids(mut docs: Vec<Document>) -> Vec<Document> {
        for d in &mut docs {
            d.id = None;
        }
        docs
    }

    #[tokio::test]
    async fn test_auto_generated_ids() {
        let vs = vector_store(Arc::new(InMemoryStore::new()));
        let content = "lorem ipsum dolor sit amet";
        vs.add_documents(
            &[Document::new(content).with_metadata("foo", "bar")],
            &AddOptions::default(),
        )
        .await
        .unwrap();

        let results = vs.similarity_search(content, 1, None).await.unwrap();
        assert_eq!(
            strip_ids(results),
            vec![Document::new(content).with_metadata("foo", "bar")]
        );
    }

    #[tokio::test]
    async fn test_user_provided_keys() {
        let store = Arc::new(InMemoryStore::new());
        let vs = vector_store(store.clone());
        let key = format!("test:{}", uuid::Uuid::new_v4());
        let content = "consectetur adipiscing elit sed do";

        let ids = vs
            .add_documents(&[Document::new(content)], &AddOptions::with_keys([key.clone()]))
            .await
            .unwrap();
        assert!(store.get_hash(&key).await.unwrap().is_some());

        let results = vs.similarity_search(content, 1, None).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, content);
        assert!(results[0].metadata.is_empty());
        assert_eq!(results[0].id.as_deref(), Some(ids[0].as_str()));

        assert_eq!(vs.delete(&DeleteTarget::Ids(ids)).await.unwrap(), 1);
        assert!(store.get_hash(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_metadata_filtering() {
        let vs = vector_store(Arc::new(InMemoryStore::new()));
        let content = "tempor incididunt ut labore";
        let marker = uuid::Uuid::new_v4().to_string();

        vs.add_documents(&[Document::new(content)], &AddOptions::default())
            .await
            .unwrap();
        vs.drop_index(false).await.unwrap();

        vs.add_documents(
            &[
                Document::new(content).with_metadata("foo", "bar"),
                Document::new(content).with_metadata("foo", marker.as_str()),
                Document::new(content).with_metadata("foo", "qux"),
            ],
            &AddOptions::default(),
        )
        .await
        .unwrap();

        let results = vs
            .similarity_search(content, 3, Some(&Filter::values([marker.clone()])))
            .await
            .unwrap();
        assert_eq!(
            strip_ids(results),
            vec![Document::new(content).with_metadata("foo", marker.as_str())]
        );
    }

    #[tokio::test]
    async fn test_non_finite_metadata_keeps_index_searchable() {
        let vs = vector_store(Arc::new(InMemoryStore::new()));
        vs.add_documents(&[Document::new("good doc")], &AddOptions::default())
            .await
            .unwrap();

        for n in [f64::NAN, f64::INFINITY] {
            let err = vs
                .add_documents(
                    &[Document::new("bad doc").with_metadata("year", n)],
                    &AddOptions::default(),
                )
                .await
                .unwrap_err();
            assert!(matches!(err, HarnessError::InvalidMetadata(_)));
        }

        let results = vs.similarity_search("good doc", 5, None).await.unwrap();
        assert_eq!(strip_ids(results), vec![Document::new("good doc")]);
    }

    #[tokio::test]
    async fn test_roundtrip_returns_every_document() {
        let vs = vector_store(Arc::new(InMemoryStore::new()));
        let docs = vec![
            Document::new("rust borrow checker").with_metadata("foo", "a"),
            Document::new("python garbage collector").with_metadata("year", 1991i64),
            Document::new("go scheduler goroutines"),
        ];
        vs.add_documents(&docs, &AddOptions::default()).await.unwrap();

        let mut found: Vec<(String, Metadata)> = vs
            .similarity_search("anything at all", 10, None)
            .await
            .unwrap()
            .into_iter()
            .map(|d| (d.content, d.metadata))
            .collect();
        let mut expected: Vec<(String, Metadata)> =
            docs.into_iter().map(|d| (d.content, d.metadata)).collect();
        found.sort_by(|a, b| a.0.cmp(&b.0));
        expected.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(found, expected);
    }

    #[tokio::test]
    async fn test_filter_returns_exactly_matching() {
        let vs = vector_store(Arc::new(InMemoryStore::new()));
        let docs: Vec<Document> = (0..10)
            .map(|i| {
                let tag = if i % 3 == 0 { "shared" } else { "other" };
                Document::new(format!("document number {}", i))
                    .with_metadata("foo", tag)
                    .with_metadata("year", 2000 + i as i64)
            })
            .collect();
        vs.add_documents(&docs, &AddOptions::default()).await.unwrap();

        let results = vs
            .similarity_search("document", 10, Some(&Filter::values(["shared"])))
            .await
            .unwrap();
        assert_eq!(results.len(), 4);
        assert!(results
            .iter()
            .all(|d| d.metadata["foo"] == MetadataValue::from("shared")));

        let range = Filter::from(Predicate::And(vec![
            Predicate::eq("foo", "other"),
            Predicate::range("year", Some(2004.0), Some(2008.0)),
        ]));
        let results = vs
            .similarity_search("document", 10, Some(&range))
            .await
            .unwrap();
        // 2004, 2005, 2007, 2008 are "other"; 2006 is "shared".
        assert_eq!(results.len(), 4);
    }

    #[tokio::test]
    async fn test_invalid_filter_field() {
        let vs = vector_store(Arc::new(InMemoryStore::new()));
        vs.ensure_index().await.unwrap();
        let err = vs
            .similarity_search("x", 1, Some(&Predicate::eq("color", "red").into()))
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::InvalidFilter(_)));
    }

    #[tokio::test]
    async fn test_reingest_same_id_overwrites() {
        let vs = vector_store(Arc::new(InMemoryStore::new()));
        let opts = AddOptions::with_keys(["one"]);
        vs.add_documents(&[Document::new("first").with_metadata("foo", "a")], &opts)
            .await
            .unwrap();
        vs.add_documents(&[Document::new("second")], &opts)
            .await
            .unwrap();

        let results = vs.similarity_search("second", 5, None).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "second");
        assert!(results[0].metadata.is_empty());
        let tagged = vs
            .similarity_search("first", 5, Some(&Filter::values(["a"])))
            .await
            .unwrap();
        assert!(tagged.is_empty());
    }

    #[tokio::test]
    async fn test_drop_and_delete_idempotence() {
        let store = Arc::new(InMemoryStore::new());
        let vs = vector_store(store.clone());
        vs.ensure_index().await.unwrap();
        assert_eq!(vs.delete(&DeleteTarget::All).await.unwrap(), 0);

        vs.add_documents(&[Document::new("kept")], &AddOptions::with_keys(["k"]))
            .await
            .unwrap();
        vs.drop_index(false).await.unwrap();
        assert!(store.get_hash("test:k").await.unwrap().is_some());
        assert!(matches!(
            vs.drop_index(false).await,
            Err(HarnessError::IndexNotFound(_))
        ));
        assert!(vs.index_info().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_prefix_cannot_touch_other_keys() {
        let store = Arc::new(InMemoryStore::new());
        vector_store(store.clone())
            .add_documents(&[Document::new("kept")], &AddOptions::with_keys(["k"]))
            .await
            .unwrap();
        store.push_list("chat:s", &[b"{}".to_vec()]).await.unwrap();

        let unscoped = VectorStore::new(
            store.clone(),
            Arc::new(HashEmbedding::new(64)),
            VectorStoreConfig::new("unscoped", ""),
        );
        assert!(matches!(
            unscoped.ensure_index().await,
            Err(HarnessError::InvalidArgument(_))
        ));
        assert!(matches!(
            unscoped.delete(&DeleteTarget::All).await,
            Err(HarnessError::InvalidArgument(_))
        ));
        assert_eq!(store.keys_with_prefix("").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_schema_mismatch_between_stores() {
        let store = Arc::new(InMemoryStore::new());
        let a = vector_store(store.clone());
        a.ensure_index().await.unwrap();

        let b = VectorStore::new(
            store,
            Arc::new(HashEmbedding::new(32)),
            VectorStoreConfig::new("test-index", "test:"),
        );
        let err = b
            .add_documents(&[Document::new("x")], &AddOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::SchemaMismatch { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_ingest_and_search() {
        let vs = Arc::new(vector_store(Arc::new(InMemoryStore::new())));
        vs.ensure_index().await.unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let vs = vs.clone();
            handles.push(tokio::spawn(async move {
                vs.add_documents(
                    &[Document::new(format!("parallel doc {}", i))],
                    &AddOptions::with_keys([format!("p{}", i)]),
                )
                .await
                .unwrap();
                vs.similarity_search("parallel doc", 1, None).await.unwrap()
            }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap().len(), 1);
        }
        assert_eq!(vs.delete(&DeleteTarget::All).await.unwrap(), 8);
    }
}
