//! In-memory [`KeyValueStore`] implementation for tests and embedded use.
//!
//! Uses `HashMap` behind `std::sync::RwLock` for thread safety. Expiry is
//! lazy: an entry past its deadline reads as absent and is dropped on the
//! next write that touches it. Vector queries are brute-force scans ranked
//! by [`rank_candidates`].

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::{HarnessError, Result};
use crate::models::IndexSchema;

use super::{rank_candidates, Hash, KeyValueStore, QueryHit, VectorQuery};

enum Value {
    Hash(Hash),
    List(Vec<Vec<u8>>),
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map(|at| at > now).unwrap_or(true)
    }
}

/// In-memory store for testing and embedded environments.
pub struct InMemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
    indexes: RwLock<HashMap<String, IndexSchema>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            indexes: RwLock::new(HashMap::new()),
        }
    }

    fn read_entries(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Entry>>> {
        self.entries.read().map_err(|_| poisoned())
    }

    fn write_entries(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Entry>>> {
        self.entries.write().map_err(|_| poisoned())
    }

    fn read_indexes(&self) -> Result<RwLockReadGuard<'_, HashMap<String, IndexSchema>>> {
        self.indexes.read().map_err(|_| poisoned())
    }

    fn write_indexes(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, IndexSchema>>> {
        self.indexes.write().map_err(|_| poisoned())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> HarnessError {
    HarnessError::connection("in-memory store lock poisoned")
}

/// Drop `key` if it has expired, so the caller sees only live entries.
fn purge_if_expired(entries: &mut HashMap<String, Entry>, key: &str, now: Instant) {
    if entries.get(key).map(|e| !e.is_live(now)).unwrap_or(false) {
        entries.remove(key);
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn put_hash(&self, key: &str, fields: Hash) -> Result<()> {
        let now = Instant::now();
        let mut entries = self.write_entries()?;
        purge_if_expired(&mut entries, key, now);
        if let Some(Entry {
            value: Value::List(_),
            ..
        }) = entries.get(key)
        {
            return Err(HarnessError::WrongType(key.to_string()));
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Hash(fields),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn get_hash(&self, key: &str) -> Result<Option<Hash>> {
        let now = Instant::now();
        let entries = self.read_entries()?;
        match entries.get(key) {
            Some(e) if e.is_live(now) => match &e.value {
                Value::Hash(h) => Ok(Some(h.clone())),
                Value::List(_) => Err(HarnessError::WrongType(key.to_string())),
            },
            _ => Ok(None),
        }
    }

    async fn delete(&self, keys: &[String]) -> Result<usize> {
        let now = Instant::now();
        let mut entries = self.write_entries()?;
        let removed = keys
            .iter()
            .filter_map(|k| entries.remove(k))
            .filter(|e| e.is_live(now))
            .count();
        Ok(removed)
    }

    async fn push_list(&self, key: &str, values: &[Vec<u8>]) -> Result<usize> {
        let now = Instant::now();
        let mut entries = self.write_entries()?;
        purge_if_expired(&mut entries, key, now);
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::List(Vec::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::List(items) => {
                items.extend(values.iter().cloned());
                Ok(items.len())
            }
            Value::Hash(_) => Err(HarnessError::WrongType(key.to_string())),
        }
    }

    async fn get_list(&self, key: &str) -> Result<Vec<Vec<u8>>> {
        let now = Instant::now();
        let entries = self.read_entries()?;
        match entries.get(key) {
            Some(e) if e.is_live(now) => match &e.value {
                Value::List(items) => Ok(items.clone()),
                Value::Hash(_) => Err(HarnessError::WrongType(key.to_string())),
            },
            _ => Ok(Vec::new()),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.write_entries()?;
        purge_if_expired(&mut entries, key, now);
        if ttl.is_zero() {
            return Ok(entries.remove(key).is_some());
        }
        match entries.get_mut(key) {
            Some(e) => {
                // A deadline past what `Instant` can hold never arrives.
                e.expires_at = now.checked_add(ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn persist(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.write_entries()?;
        purge_if_expired(&mut entries, key, now);
        match entries.get_mut(key) {
            Some(e) => Ok(e.expires_at.take().is_some()),
            None => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let now = Instant::now();
        let entries = self.read_entries()?;
        Ok(entries
            .get(key)
            .filter(|e| e.is_live(now))
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let now = Instant::now();
        let entries = self.read_entries()?;
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && e.is_live(now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn create_index(&self, schema: &IndexSchema) -> Result<()> {
        let mut indexes = self.write_indexes()?;
        if indexes.contains_key(&schema.name) {
            return Err(HarnessError::IndexExists(schema.name.clone()));
        }
        indexes.insert(schema.name.clone(), schema.clone());
        Ok(())
    }

    async fn index_info(&self, name: &str) -> Result<Option<IndexSchema>> {
        Ok(self.read_indexes()?.get(name).cloned())
    }

    async fn drop_index(&self, name: &str, delete_documents: bool) -> Result<()> {
        let schema = self
            .write_indexes()?
            .remove(name)
            .ok_or_else(|| HarnessError::IndexNotFound(name.to_string()))?;
        if delete_documents {
            let mut entries = self.write_entries()?;
            entries.retain(|k, _| !k.starts_with(&schema.key_prefix));
        }
        Ok(())
    }

    async fn vector_query(&self, query: &VectorQuery) -> Result<Vec<QueryHit>> {
        let schema = self
            .read_indexes()?
            .get(&query.index)
            .cloned()
            .ok_or_else(|| HarnessError::IndexNotFound(query.index.clone()))?;

        let now = Instant::now();
        let entries = self.read_entries()?;
        let candidates: Vec<(String, Hash)> = entries
            .iter()
            .filter(|(k, e)| k.starts_with(&schema.key_prefix) && e.is_live(now))
            .filter_map(|(k, e)| match &e.value {
                Value::Hash(h) => Some((k.clone(), h.clone())),
                Value::List(_) => None,
            })
            .collect();
        drop(entries);

        Ok(rank_candidates(&schema, query, candidates))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::vec_to_blob;
    use crate::models::{DistanceMetric, VECTOR_FIELD};
    use crate::store::StoreFilter;

    fn fields(content: &str) -> Hash {
        [("content".to_string(), content.as_bytes().to_vec())].into()
    }

    #[tokio::test]
    async fn test_hash_put_get_replace() {
        let store = InMemoryStore::new();
        store.put_hash("k", fields("one")).await.unwrap();
        store.put_hash("k", fields("two")).await.unwrap();
        let h = store.get_hash("k").await.unwrap().unwrap();
        assert_eq!(h["content"], b"two".to_vec());
        assert!(store.get_hash("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_wrong_type() {
        let store = InMemoryStore::new();
        store.push_list("l", &[b"a".to_vec()]).await.unwrap();
        assert!(matches!(
            store.put_hash("l", fields("x")).await,
            Err(HarnessError::WrongType(_))
        ));
        assert!(matches!(
            store.get_hash("l").await,
            Err(HarnessError::WrongType(_))
        ));
    }

    #[tokio::test]
    async fn test_list_append_order() {
        let store = InMemoryStore::new();
        assert_eq!(store.push_list("l", &[b"a".to_vec()]).await.unwrap(), 1);
        assert_eq!(
            store
                .push_list("l", &[b"b".to_vec(), b"c".to_vec()])
                .await
                .unwrap(),
            3
        );
        let items = store.get_list("l").await.unwrap();
        assert_eq!(items, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        assert!(store.get_list("nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expire_and_persist() {
        let store = InMemoryStore::new();
        assert!(!store.expire("absent", Duration::from_secs(1)).await.unwrap());

        store.push_list("l", &[b"a".to_vec()]).await.unwrap();
        assert!(store.ttl("l").await.unwrap().is_none());
        assert!(store.expire("l", Duration::from_secs(60)).await.unwrap());
        assert!(store.ttl("l").await.unwrap().unwrap() <= Duration::from_secs(60));
        assert!(store.persist("l").await.unwrap());
        assert!(store.ttl("l").await.unwrap().is_none());
        assert!(!store.persist("l").await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_key_reads_absent() {
        let store = InMemoryStore::new();
        store.push_list("l", &[b"a".to_vec()]).await.unwrap();
        store.expire("l", Duration::from_millis(30)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(store.get_list("l").await.unwrap().is_empty());
        assert!(store.keys_with_prefix("l").await.unwrap().is_empty());
        assert_eq!(store.delete(&["l".to_string()]).await.unwrap(), 0);

        // A push after expiry starts a fresh list without a TTL.
        store.push_list("l", &[b"b".to_vec()]).await.unwrap();
        assert_eq!(store.get_list("l").await.unwrap(), vec![b"b".to_vec()]);
        assert!(store.ttl("l").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_zero_ttl_deletes() {
        let store = InMemoryStore::new();
        store.put_hash("k", fields("x")).await.unwrap();
        assert!(store.expire("k", Duration::ZERO).await.unwrap());
        assert!(store.get_hash("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_huge_ttl_does_not_expire() {
        let store = InMemoryStore::new();
        store.push_list("l", &[b"a".to_vec()]).await.unwrap();
        assert!(store.expire("l", Duration::MAX).await.unwrap());
        assert_eq!(store.get_list("l").await.unwrap(), vec![b"a".to_vec()]);
    }

    #[tokio::test]
    async fn test_keys_with_prefix_sorted() {
        let store = InMemoryStore::new();
        for k in ["doc:b", "doc:a", "other:c"] {
            store.put_hash(k, fields(k)).await.unwrap();
        }
        assert_eq!(
            store.keys_with_prefix("doc:").await.unwrap(),
            vec!["doc:a".to_string(), "doc:b".to_string()]
        );
    }

    #[tokio::test]
    async fn test_index_lifecycle() {
        let store = InMemoryStore::new();
        let schema = IndexSchema::new("idx", "doc:", 2, DistanceMetric::Cosine);
        store.create_index(&schema).await.unwrap();
        assert!(matches!(
            store.create_index(&schema).await,
            Err(HarnessError::IndexExists(_))
        ));
        assert_eq!(store.index_info("idx").await.unwrap(), Some(schema.clone()));

        let mut doc = fields("x");
        doc.insert(VECTOR_FIELD.to_string(), vec_to_blob(&[1.0, 0.0]));
        store.put_hash("doc:1", doc).await.unwrap();

        store.drop_index("idx", false).await.unwrap();
        assert!(store.get_hash("doc:1").await.unwrap().is_some());
        assert!(matches!(
            store.drop_index("idx", false).await,
            Err(HarnessError::IndexNotFound(_))
        ));

        store.create_index(&schema).await.unwrap();
        store.drop_index("idx", true).await.unwrap();
        assert!(store.get_hash("doc:1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_vector_query_requires_index() {
        let store = InMemoryStore::new();
        let query = VectorQuery {
            index: "missing".into(),
            vector: vec![1.0],
            k: 1,
            filter: StoreFilter::All,
        };
        assert!(matches!(
            store.vector_query(&query).await,
            Err(HarnessError::IndexNotFound(_))
        ));
    }
}
