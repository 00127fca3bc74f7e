//! Document ingestion.
//!
//! Turns caller documents into stored records: assigns ids, computes
//! missing embeddings, validates metadata and vector sizes against the
//! index schema, ensures the index exists, then writes one hash per
//! document.
//!
//! # Failure semantics
//!
//! Everything that can be checked up front (key count, metadata, vector
//! dimension, embedding) is checked before the first write, so those
//! failures leave the store untouched. Writes are independent per
//! document; a write failure on document `i` returns
//! [`HarnessError::Ingest`] and documents `0..i` stay written. Re-ingesting
//! the same ids overwrites, so retrying a whole batch is safe.

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::embedding::{blob_to_vec, vec_to_blob, EmbeddingProvider};
use crate::error::{HarnessError, Result};
use crate::index::IndexManager;
use crate::models::{
    Document, IndexSchema, Metadata, CONTENT_FIELD, METADATA_FIELD, VECTOR_FIELD,
};
use crate::store::{Hash, KeyValueStore};

/// Default number of texts sent to the embedding provider per call.
pub const DEFAULT_BATCH_SIZE: usize = 64;

/// Per-call ingest options.
#[derive(Debug, Clone, Default)]
pub struct AddOptions {
    /// Explicit ids, one per document. A key that already carries the
    /// index prefix is accepted as a full store key.
    pub keys: Option<Vec<String>>,
}

impl AddOptions {
    pub fn with_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: Some(keys.into_iter().map(Into::into).collect()),
        }
    }
}

pub struct DocumentIngestor {
    store: Arc<dyn KeyValueStore>,
    embeddings: Arc<dyn EmbeddingProvider>,
    indexes: IndexManager,
    schema: IndexSchema,
    batch_size: usize,
}

impl DocumentIngestor {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        embeddings: Arc<dyn EmbeddingProvider>,
        schema: IndexSchema,
    ) -> Self {
        Self {
            indexes: IndexManager::new(store.clone()),
            store,
            embeddings,
            schema,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Ingest documents, embedding those without a vector. Returns the ids
    /// used, in input order.
    pub async fn add_documents(
        &self,
        docs: &[Document],
        options: &AddOptions,
    ) -> Result<Vec<String>> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }
        let ids = self.assign_ids(docs, options)?;
        self.validate(docs)?;
        let vectors = self.resolve_vectors(docs).await?;
        self.write_all(docs, &ids, &vectors).await
    }

    /// Ingest documents with caller-computed vectors, one per document.
    pub async fn add_vectors(
        &self,
        vectors: &[Vec<f32>],
        docs: &[Document],
        options: &AddOptions,
    ) -> Result<Vec<String>> {
        if vectors.len() != docs.len() {
            return Err(HarnessError::InvalidArgument(format!(
                "{} vectors for {} documents",
                vectors.len(),
                docs.len()
            )));
        }
        if docs.is_empty() {
            return Ok(Vec::new());
        }
        let ids = self.assign_ids(docs, options)?;
        self.validate(docs)?;
        for v in vectors {
            self.check_dims(v.len())?;
        }
        self.write_all(docs, &ids, vectors).await
    }

    fn assign_ids(&self, docs: &[Document], options: &AddOptions) -> Result<Vec<String>> {
        match &options.keys {
            Some(keys) => {
                if keys.len() != docs.len() {
                    return Err(HarnessError::InvalidArgument(format!(
                        "{} keys for {} documents",
                        keys.len(),
                        docs.len()
                    )));
                }
                keys.iter()
                    .map(|key| {
                        let id = self.schema.id_from_key(key);
                        if id.is_empty() {
                            Err(HarnessError::InvalidArgument(format!(
                                "key '{}' yields an empty id",
                                key
                            )))
                        } else {
                            Ok(id.to_string())
                        }
                    })
                    .collect()
            }
            None => Ok(docs
                .iter()
                .map(|doc| match &doc.id {
                    Some(id) if !id.is_empty() => id.clone(),
                    _ => Uuid::new_v4().to_string(),
                })
                .collect()),
        }
    }

    fn validate(&self, docs: &[Document]) -> Result<()> {
        for (i, doc) in docs.iter().enumerate() {
            let checked = self.schema.validate_metadata(&doc.metadata).and_then(|_| {
                match &doc.vector {
                    Some(v) => self.check_dims(v.len()),
                    None => Ok(()),
                }
            });
            if let Err(e) = checked {
                warn!(index = %self.schema.name, document = i, error = %e, "rejected batch before writing");
                return Err(e);
            }
        }
        Ok(())
    }

    fn check_dims(&self, actual: usize) -> Result<()> {
        if actual != self.schema.dims {
            return Err(HarnessError::DimensionMismatch {
                expected: self.schema.dims,
                actual,
            });
        }
        Ok(())
    }

    /// Pre-supplied vectors pass through; the rest are embedded in batches.
    async fn resolve_vectors(&self, docs: &[Document]) -> Result<Vec<Vec<f32>>> {
        let missing: Vec<usize> = docs
            .iter()
            .enumerate()
            .filter(|(_, d)| d.vector.is_none())
            .map(|(i, _)| i)
            .collect();

        let mut embedded: Vec<Vec<f32>> = Vec::with_capacity(missing.len());
        for batch in missing.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|&i| docs[i].content.clone()).collect();
            let vectors = self.embeddings.embed_batch(&texts).await?;
            if vectors.len() != texts.len() {
                return Err(HarnessError::embedding(format!(
                    "provider returned {} vectors for {} texts",
                    vectors.len(),
                    texts.len()
                )));
            }
            for v in &vectors {
                self.check_dims(v.len())?;
            }
            embedded.extend(vectors);
        }
        debug!(
            index = %self.schema.name,
            embedded = embedded.len(),
            model = self.embeddings.model_name(),
            "embedded documents"
        );

        let mut embedded = embedded.into_iter();
        docs.iter()
            .map(|d| match &d.vector {
                Some(v) => Ok(v.clone()),
                None => embedded
                    .next()
                    .ok_or_else(|| HarnessError::embedding("embedding count mismatch")),
            })
            .collect()
    }

    async fn write_all(
        &self,
        docs: &[Document],
        ids: &[String],
        vectors: &[Vec<f32>],
    ) -> Result<Vec<String>> {
        self.indexes.ensure_index(&self.schema).await?;

        for (i, ((doc, id), vector)) in docs.iter().zip(ids).zip(vectors).enumerate() {
            let key = self.schema.key_for(id);
            let record = encode_record(&self.schema, doc, vector)?;
            if let Err(e) = self.store.put_hash(&key, record).await {
                warn!(index = %self.schema.name, key = %key, written = i, error = %e, "ingest stopped part-way");
                return Err(HarnessError::Ingest {
                    failed_index: i,
                    source: Box::new(e),
                });
            }
        }

        info!(index = %self.schema.name, documents = ids.len(), "ingested documents");
        Ok(ids.to_vec())
    }
}

/// Encode a document as its stored hash.
pub fn encode_record(schema: &IndexSchema, doc: &Document, vector: &[f32]) -> Result<Hash> {
    let metadata_json = serde_json::to_vec(&doc.metadata)
        .map_err(|e| HarnessError::InvalidMetadata(e.to_string()))?;

    let mut fields = Hash::new();
    fields.insert(CONTENT_FIELD.to_string(), doc.content.as_bytes().to_vec());
    fields.insert(VECTOR_FIELD.to_string(), vec_to_blob(vector));
    fields.insert(METADATA_FIELD.to_string(), metadata_json);
    for (name, value) in &doc.metadata {
        if schema.field_kind(name).is_some() {
            fields.insert(name.clone(), value.to_field_string().into_bytes());
        }
    }
    Ok(fields)
}

/// Decode a stored hash back into a document. The vector is only
/// attached when the hash still carries it.
pub fn decode_record(schema: &IndexSchema, key: &str, fields: &Hash) -> Result<Document> {
    let content = match fields.get(CONTENT_FIELD) {
        Some(bytes) => String::from_utf8(bytes.clone())
            .map_err(|e| HarnessError::decode(key, e))?,
        None => return Err(HarnessError::decode(key, "missing content field")),
    };

    let metadata: Metadata = match fields.get(METADATA_FIELD) {
        Some(bytes) => serde_json::from_slice(bytes).map_err(|e| HarnessError::decode(key, e))?,
        None => Metadata::new(),
    };

    Ok(Document {
        id: Some(schema.id_from_key(key).to_string()),
        content,
        metadata,
        vector: fields.get(VECTOR_FIELD).map(|b| blob_to_vec(b)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedding;
    use crate::models::{DistanceMetric, FieldKind, MetadataValue};
    use crate::store::memory::InMemoryStore;
    use crate::store::{QueryHit, VectorQuery};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn schema() -> IndexSchema {
        IndexSchema::new("docs", "doc:", 8, DistanceMetric::Cosine)
            .with_field("foo", FieldKind::Tag)
            .with_field("year", FieldKind::Numeric)
    }

    fn ingestor(store: Arc<dyn KeyValueStore>) -> DocumentIngestor {
        DocumentIngestor::new(store, Arc::new(HashEmbedding::new(8)), schema())
    }

    /// Delegates to an in-memory store but fails hash writes after
    /// `fail_after` successful ones.
    struct FlakyStore {
        inner: InMemoryStore,
        fail_after: usize,
        writes: AtomicUsize,
    }

    #[async_trait]
    impl KeyValueStore for FlakyStore {
        async fn put_hash(&self, key: &str, fields: Hash) -> Result<()> {
            if self.writes.fetch_add(1, Ordering::SeqCst) >= self.fail_after {
                return Err(HarnessError::connection("connection reset"));
            }
            self.inner.put_hash(key, fields).await
        }
        async fn get_hash(&self, key: &str) -> Result<Option<Hash>> {
            self.inner.get_hash(key).await
        }
        async fn delete(&self, keys: &[String]) -> Result<usize> {
            self.inner.delete(keys).await
        }
        async fn push_list(&self, key: &str, values: &[Vec<u8>]) -> Result<usize> {
            self.inner.push_list(key, values).await
        }
        async fn get_list(&self, key: &str) -> Result<Vec<Vec<u8>>> {
            self.inner.get_list(key).await
        }
        async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
            self.inner.expire(key, ttl).await
        }
        async fn persist(&self, key: &str) -> Result<bool> {
            self.inner.persist(key).await
        }
        async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
            self.inner.ttl(key).await
        }
        async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
            self.inner.keys_with_prefix(prefix).await
        }
        async fn create_index(&self, schema: &IndexSchema) -> Result<()> {
            self.inner.create_index(schema).await
        }
        async fn index_info(&self, name: &str) -> Result<Option<IndexSchema>> {
            self.inner.index_info(name).await
        }
        async fn drop_index(&self, name: &str, delete_documents: bool) -> Result<()> {
            self.inner.drop_index(name, delete_documents).await
        }
        async fn vector_query(&self, query: &VectorQuery) -> Result<Vec<QueryHit>> {
            self.inner.vector_query(query).await
        }
    }

    #[tokio::test]
    async fn test_ids_in_input_order_and_keys_derived() {
        let store = Arc::new(InMemoryStore::new());
        let ids = ingestor(store.clone())
            .add_documents(
                &[Document::new("alpha"), Document::new("beta")],
                &AddOptions::with_keys(["a", "doc:b"]),
            )
            .await
            .unwrap();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
        assert!(store.get_hash("doc:a").await.unwrap().is_some());
        assert!(store.get_hash("doc:b").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_auto_ids_are_unique() {
        let store = Arc::new(InMemoryStore::new());
        let ids = ingestor(store.clone())
            .add_documents(&[Document::new("same"), Document::new("same")], &AddOptions::default())
            .await
            .unwrap();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
        assert_eq!(store.keys_with_prefix("doc:").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_document_id_used_without_keys() {
        let store = Arc::new(InMemoryStore::new());
        let ids = ingestor(store)
            .add_documents(&[Document::new("x").with_id("fixed")], &AddOptions::default())
            .await
            .unwrap();
        assert_eq!(ids, vec!["fixed".to_string()]);
    }

    #[tokio::test]
    async fn test_key_count_mismatch() {
        let store = Arc::new(InMemoryStore::new());
        let err = ingestor(store)
            .add_documents(&[Document::new("x")], &AddOptions::with_keys(["a", "b"]))
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_dimension_mismatch_writes_nothing() {
        let store = Arc::new(InMemoryStore::new());
        let docs = vec![
            Document::new("fine"),
            Document::new("bad").with_vector(vec![1.0, 2.0]),
        ];
        let err = ingestor(store.clone())
            .add_documents(&docs, &AddOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HarnessError::DimensionMismatch {
                expected: 8,
                actual: 2
            }
        ));
        assert!(store.keys_with_prefix("doc:").await.unwrap().is_empty());
        assert!(store.index_info("docs").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_undeclared_metadata_rejected() {
        let store = Arc::new(InMemoryStore::new());
        let err = ingestor(store.clone())
            .add_documents(
                &[Document::new("x").with_metadata("color", "red")],
                &AddOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::InvalidMetadata(_)));
        assert!(store.keys_with_prefix("doc:").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_non_finite_number_rejected_before_write() {
        let store = Arc::new(InMemoryStore::new());
        let docs = [
            Document::new("good doc").with_metadata("year", 2001.0),
            Document::new("bad doc").with_metadata("year", f64::NAN),
        ];
        let err = ingestor(store.clone())
            .add_documents(&docs, &AddOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::InvalidMetadata(_)));
        assert!(store.keys_with_prefix("doc:").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_earlier_writes() {
        let store = Arc::new(FlakyStore {
            inner: InMemoryStore::new(),
            fail_after: 2,
            writes: AtomicUsize::new(0),
        });
        let docs: Vec<Document> = (0..4).map(|i| Document::new(format!("doc {}", i))).collect();
        let err = ingestor(store.clone())
            .add_documents(&docs, &AddOptions::with_keys(["0", "1", "2", "3"]))
            .await
            .unwrap_err();
        match err {
            HarnessError::Ingest {
                failed_index,
                source,
            } => {
                assert_eq!(failed_index, 2);
                assert!(matches!(*source, HarnessError::Connection(_)));
            }
            other => panic!("expected Ingest, got {:?}", other),
        }
        assert_eq!(
            store.keys_with_prefix("doc:").await.unwrap(),
            vec!["doc:0".to_string(), "doc:1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_add_vectors_checks_lengths() {
        let store = Arc::new(InMemoryStore::new());
        let ing = ingestor(store);
        let err = ing
            .add_vectors(&[vec![0.0; 8]], &[], &AddOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::InvalidArgument(_)));

        let err = ing
            .add_vectors(&[vec![0.0; 3]], &[Document::new("x")], &AddOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_record_roundtrip() {
        let s = schema();
        let doc = Document::new("hello")
            .with_metadata("foo", "bar")
            .with_metadata("year", 2020i64);
        let fields = encode_record(&s, &doc, &[0.5; 8]).unwrap();
        assert_eq!(fields["foo"], b"bar".to_vec());
        assert_eq!(fields["year"], b"2020".to_vec());

        let back = decode_record(&s, "doc:abc", &fields).unwrap();
        assert_eq!(back.id.as_deref(), Some("abc"));
        assert_eq!(back.content, "hello");
        assert_eq!(back.metadata["year"], MetadataValue::Number(2020.0));
        assert_eq!(back.vector, Some(vec![0.5; 8]));
    }

    #[test]
    fn test_decode_rejects_missing_content() {
        let err = decode_record(&schema(), "doc:x", &Hash::new()).unwrap_err();
        assert!(matches!(err, HarnessError::Decode { .. }));
    }
}
