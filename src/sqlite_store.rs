//! SQLite-backed [`KeyValueStore`] implementation.
//!
//! Keys live in `kv_keys` with their kind and optional expiry (Unix ms);
//! hash fields and list items hang off them in `kv_hash_fields` and
//! `kv_list_items`. Index definitions are JSON rows in `kv_indexes`.
//!
//! Reads treat expired keys as absent. Every write first purges the key it
//! touches when expired, then runs in a single transaction, so concurrent
//! writers to one key serialise on SQLite's write lock.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::debug;

use recall_harness_core::error::{HarnessError, Result};
use recall_harness_core::models::IndexSchema;
use recall_harness_core::store::{rank_candidates, Hash, KeyValueStore, QueryHit, VectorQuery};

use crate::{db, migrate};

const KIND_HASH: &str = "hash";
const KIND_LIST: &str = "list";

/// SQLite implementation of the [`KeyValueStore`] trait.
pub struct SqliteKvStore {
    pool: SqlitePool,
}

impl SqliteKvStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating when missing) the database at `path` and apply the
    /// schema.
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        let pool = db::connect_path(path).await?;
        migrate::apply_schema(&pool).await?;
        let store = Self::new(pool);
        store.purge_expired().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Remove every expired key. Returns how many were removed.
    pub async fn purge_expired(&self) -> Result<usize> {
        let now = now_ms();
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        sqlx::query(
            "DELETE FROM kv_hash_fields WHERE key IN \
             (SELECT key FROM kv_keys WHERE expires_at IS NOT NULL AND expires_at <= ?)",
        )
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        sqlx::query(
            "DELETE FROM kv_list_items WHERE key IN \
             (SELECT key FROM kv_keys WHERE expires_at IS NOT NULL AND expires_at <= ?)",
        )
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        let removed = sqlx::query("DELETE FROM kv_keys WHERE expires_at IS NOT NULL AND expires_at <= ?")
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?
            .rows_affected();
        tx.commit().await.map_err(db_err)?;

        if removed > 0 {
            debug!(removed, "purged expired keys");
        }
        Ok(removed as usize)
    }

    async fn live_kind(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query(
            "SELECT kind FROM kv_keys WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(key)
        .bind(now_ms())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(|r| r.get::<String, _>("kind")))
    }
}

fn db_err(e: sqlx::Error) -> HarnessError {
    HarnessError::connection(e)
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Whole milliseconds in `ttl`, rounded up so a sub-millisecond TTL still
/// outlives the current instant, saturating at `i64::MAX`.
fn ttl_millis(ttl: Duration) -> i64 {
    let mut ms = ttl.as_millis();
    if ttl.subsec_nanos() % 1_000_000 != 0 {
        ms += 1;
    }
    i64::try_from(ms).unwrap_or(i64::MAX)
}

/// Drop `key` and its contents if it has expired.
async fn purge_key(conn: &mut SqliteConnection, key: &str, now: i64) -> Result<()> {
    let expired = "SELECT key FROM kv_keys WHERE key = ? AND expires_at IS NOT NULL AND expires_at <= ?";
    sqlx::query(&format!("DELETE FROM kv_hash_fields WHERE key IN ({})", expired))
        .bind(key)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    sqlx::query(&format!("DELETE FROM kv_list_items WHERE key IN ({})", expired))
        .bind(key)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    sqlx::query("DELETE FROM kv_keys WHERE key = ? AND expires_at IS NOT NULL AND expires_at <= ?")
        .bind(key)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    Ok(())
}

/// Remove `key` unconditionally. Returns whether a row existed.
async fn remove_key(conn: &mut SqliteConnection, key: &str) -> Result<bool> {
    sqlx::query("DELETE FROM kv_hash_fields WHERE key = ?")
        .bind(key)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    sqlx::query("DELETE FROM kv_list_items WHERE key = ?")
        .bind(key)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    let removed = sqlx::query("DELETE FROM kv_keys WHERE key = ?")
        .bind(key)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?
        .rows_affected();
    Ok(removed > 0)
}

async fn kind_in_tx(conn: &mut SqliteConnection, key: &str) -> Result<Option<String>> {
    let row = sqlx::query("SELECT kind FROM kv_keys WHERE key = ?")
        .bind(key)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)?;
    Ok(row.map(|r| r.get::<String, _>("kind")))
}

#[async_trait]
impl KeyValueStore for SqliteKvStore {
    async fn put_hash(&self, key: &str, fields: Hash) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        purge_key(&mut *tx, key, now_ms()).await?;

        if kind_in_tx(&mut *tx, key).await?.as_deref() == Some(KIND_LIST) {
            return Err(HarnessError::WrongType(key.to_string()));
        }

        sqlx::query("DELETE FROM kv_hash_fields WHERE key = ?")
            .bind(key)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        sqlx::query(
            r#"
            INSERT INTO kv_keys (key, kind, expires_at) VALUES (?, ?, NULL)
            ON CONFLICT(key) DO UPDATE SET kind = excluded.kind, expires_at = NULL
            "#,
        )
        .bind(key)
        .bind(KIND_HASH)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        for (field, value) in &fields {
            sqlx::query("INSERT INTO kv_hash_fields (key, field, value) VALUES (?, ?, ?)")
                .bind(key)
                .bind(field)
                .bind(value)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn get_hash(&self, key: &str) -> Result<Option<Hash>> {
        match self.live_kind(key).await?.as_deref() {
            None => return Ok(None),
            Some(KIND_LIST) => return Err(HarnessError::WrongType(key.to_string())),
            Some(_) => {}
        }

        let rows = sqlx::query("SELECT field, value FROM kv_hash_fields WHERE key = ?")
            .bind(key)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        let hash = rows
            .iter()
            .map(|r| (r.get::<String, _>("field"), r.get::<Vec<u8>, _>("value")))
            .collect();
        Ok(Some(hash))
    }

    async fn delete(&self, keys: &[String]) -> Result<usize> {
        let now = now_ms();
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let mut removed = 0;
        for key in keys {
            purge_key(&mut *tx, key, now).await?;
            if remove_key(&mut *tx, key).await? {
                removed += 1;
            }
        }
        tx.commit().await.map_err(db_err)?;
        Ok(removed)
    }

    async fn push_list(&self, key: &str, values: &[Vec<u8>]) -> Result<usize> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        purge_key(&mut *tx, key, now_ms()).await?;

        match kind_in_tx(&mut *tx, key).await?.as_deref() {
            Some(KIND_HASH) => return Err(HarnessError::WrongType(key.to_string())),
            Some(_) => {}
            None => {
                sqlx::query("INSERT INTO kv_keys (key, kind, expires_at) VALUES (?, ?, NULL)")
                    .bind(key)
                    .bind(KIND_LIST)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err)?;
            }
        }

        let last: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(seq), -1) FROM kv_list_items WHERE key = ?")
                .bind(key)
                .fetch_one(&mut *tx)
                .await
                .map_err(db_err)?;

        for (i, value) in values.iter().enumerate() {
            sqlx::query("INSERT INTO kv_list_items (key, seq, value) VALUES (?, ?, ?)")
                .bind(key)
                .bind(last + 1 + i as i64)
                .bind(value)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }

        let len: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM kv_list_items WHERE key = ?")
            .bind(key)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(len as usize)
    }

    async fn get_list(&self, key: &str) -> Result<Vec<Vec<u8>>> {
        match self.live_kind(key).await?.as_deref() {
            None => return Ok(Vec::new()),
            Some(KIND_HASH) => return Err(HarnessError::WrongType(key.to_string())),
            Some(_) => {}
        }

        let rows = sqlx::query("SELECT value FROM kv_list_items WHERE key = ? ORDER BY seq")
            .bind(key)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(rows.iter().map(|r| r.get::<Vec<u8>, _>("value")).collect())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = now_ms();
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        purge_key(&mut *tx, key, now).await?;

        let existed = if ttl.is_zero() {
            remove_key(&mut *tx, key).await?
        } else {
            let deadline = now.saturating_add(ttl_millis(ttl));
            sqlx::query("UPDATE kv_keys SET expires_at = ? WHERE key = ?")
                .bind(deadline)
                .bind(key)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?
                .rows_affected()
                > 0
        };

        tx.commit().await.map_err(db_err)?;
        Ok(existed)
    }

    async fn persist(&self, key: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        purge_key(&mut *tx, key, now_ms()).await?;
        let changed = sqlx::query(
            "UPDATE kv_keys SET expires_at = NULL WHERE key = ? AND expires_at IS NOT NULL",
        )
        .bind(key)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?
        .rows_affected();
        tx.commit().await.map_err(db_err)?;
        Ok(changed > 0)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let now = now_ms();
        let row = sqlx::query(
            "SELECT expires_at FROM kv_keys WHERE key = ? AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(key)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row
            .and_then(|r| r.get::<Option<i64>, _>("expires_at"))
            .map(|at| Duration::from_millis((at - now).max(0) as u64)))
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT key FROM kv_keys
            WHERE substr(key, 1, length(?1)) = ?1
              AND (expires_at IS NULL OR expires_at > ?2)
            ORDER BY key
            "#,
        )
        .bind(prefix)
        .bind(now_ms())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.iter().map(|r| r.get::<String, _>("key")).collect())
    }

    async fn create_index(&self, schema: &IndexSchema) -> Result<()> {
        let schema_json = serde_json::to_string(schema)
            .map_err(|e| HarnessError::InvalidArgument(e.to_string()))?;
        let inserted = sqlx::query(
            "INSERT INTO kv_indexes (name, schema_json) VALUES (?, ?) ON CONFLICT(name) DO NOTHING",
        )
        .bind(&schema.name)
        .bind(&schema_json)
        .execute(&self.pool)
        .await
        .map_err(db_err)?
        .rows_affected();

        if inserted == 0 {
            return Err(HarnessError::IndexExists(schema.name.clone()));
        }
        Ok(())
    }

    async fn index_info(&self, name: &str) -> Result<Option<IndexSchema>> {
        let row = sqlx::query("SELECT schema_json FROM kv_indexes WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        match row {
            Some(r) => {
                let json: String = r.get("schema_json");
                let schema = serde_json::from_str(&json).map_err(|e| HarnessError::Decode {
                    key: format!("index:{}", name),
                    reason: e.to_string(),
                })?;
                Ok(Some(schema))
            }
            None => Ok(None),
        }
    }

    async fn drop_index(&self, name: &str, delete_documents: bool) -> Result<()> {
        let schema = self
            .index_info(name)
            .await?
            .ok_or_else(|| HarnessError::IndexNotFound(name.to_string()))?;

        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let dropped = sqlx::query("DELETE FROM kv_indexes WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?
            .rows_affected();
        if dropped == 0 {
            return Err(HarnessError::IndexNotFound(name.to_string()));
        }

        if delete_documents {
            let under_prefix = "SELECT key FROM kv_keys WHERE substr(key, 1, length(?1)) = ?1";
            for table in ["kv_hash_fields", "kv_list_items"] {
                sqlx::query(&format!("DELETE FROM {} WHERE key IN ({})", table, under_prefix))
                    .bind(&schema.key_prefix)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err)?;
            }
            sqlx::query("DELETE FROM kv_keys WHERE substr(key, 1, length(?1)) = ?1")
                .bind(&schema.key_prefix)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn vector_query(&self, query: &VectorQuery) -> Result<Vec<QueryHit>> {
        let schema = self
            .index_info(&query.index)
            .await?
            .ok_or_else(|| HarnessError::IndexNotFound(query.index.clone()))?;

        let rows = sqlx::query(
            r#"
            SELECT f.key, f.field, f.value
            FROM kv_hash_fields f
            JOIN kv_keys k ON k.key = f.key
            WHERE k.kind = ?1
              AND substr(k.key, 1, length(?2)) = ?2
              AND (k.expires_at IS NULL OR k.expires_at > ?3)
            "#,
        )
        .bind(KIND_HASH)
        .bind(&schema.key_prefix)
        .bind(now_ms())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut candidates: BTreeMap<String, Hash> = BTreeMap::new();
        for row in &rows {
            candidates
                .entry(row.get::<String, _>("key"))
                .or_default()
                .insert(row.get::<String, _>("field"), row.get::<Vec<u8>, _>("value"));
        }
        debug!(
            index = %schema.name,
            candidates = candidates.len(),
            filter = %query.filter,
            "brute-force vector scan"
        );

        Ok(rank_candidates(&schema, query, candidates))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recall_harness_core::models::{DistanceMetric, FieldKind};
    use tempfile::TempDir;

    async fn open() -> (TempDir, SqliteKvStore) {
        let tmp = TempDir::new().unwrap();
        let store = SqliteKvStore::open(&tmp.path().join("kv.sqlite"))
            .await
            .unwrap();
        (tmp, store)
    }

    fn fields(content: &str) -> Hash {
        [("content".to_string(), content.as_bytes().to_vec())].into()
    }

    #[tokio::test]
    async fn test_hash_replace_clears_old_fields() {
        let (_tmp, store) = open().await;
        let mut first = fields("one");
        first.insert("foo".into(), b"bar".to_vec());
        store.put_hash("k", first).await.unwrap();
        store.put_hash("k", fields("two")).await.unwrap();

        let h = store.get_hash("k").await.unwrap().unwrap();
        assert_eq!(h.len(), 1);
        assert_eq!(h["content"], b"two".to_vec());
    }

    #[tokio::test]
    async fn test_list_order_and_wrong_type() {
        let (_tmp, store) = open().await;
        assert_eq!(store.push_list("l", &[b"a".to_vec()]).await.unwrap(), 1);
        assert_eq!(
            store
                .push_list("l", &[b"b".to_vec(), b"c".to_vec()])
                .await
                .unwrap(),
            3
        );
        assert_eq!(
            store.get_list("l").await.unwrap(),
            vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]
        );
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
    async fn test_expiry_and_persist() {
        let (_tmp, store) = open().await;
        store.push_list("l", &[b"a".to_vec()]).await.unwrap();
        assert!(store.expire("l", Duration::from_secs(60)).await.unwrap());
        assert!(store.ttl("l").await.unwrap().unwrap() <= Duration::from_secs(60));
        assert!(store.persist("l").await.unwrap());
        assert!(store.ttl("l").await.unwrap().is_none());

        store.expire("l", Duration::from_millis(50)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(store.get_list("l").await.unwrap().is_empty());
        assert_eq!(store.delete(&["l".to_string()]).await.unwrap(), 0);

        store.push_list("l", &[b"b".to_vec()]).await.unwrap();
        assert_eq!(store.get_list("l").await.unwrap(), vec![b"b".to_vec()]);
        assert!(store.ttl("l").await.unwrap().is_none());
    }

    #[test]
    fn test_ttl_millis_rounds_up_and_saturates() {
        assert_eq!(ttl_millis(Duration::from_secs(2)), 2000);
        assert_eq!(ttl_millis(Duration::from_micros(1)), 1);
        assert_eq!(ttl_millis(Duration::from_micros(1500)), 2);
        assert_eq!(ttl_millis(Duration::MAX), i64::MAX);
    }

    #[tokio::test]
    async fn test_huge_ttl_does_not_expire() {
        let (_tmp, store) = open().await;
        store.push_list("l", &[b"a".to_vec()]).await.unwrap();
        assert!(store.expire("l", Duration::MAX).await.unwrap());
        assert_eq!(store.get_list("l").await.unwrap(), vec![b"a".to_vec()]);
        assert!(store.ttl("l").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_index_lifecycle_and_query() {
        let (_tmp, store) = open().await;
        let schema = IndexSchema::new("docs", "doc:", 2, DistanceMetric::L2)
            .with_field("foo", FieldKind::Tag);
        store.create_index(&schema).await.unwrap();
        assert!(matches!(
            store.create_index(&schema).await,
            Err(HarnessError::IndexExists(_))
        ));
        assert_eq!(store.index_info("docs").await.unwrap(), Some(schema.clone()));

        for (key, v) in [("doc:a", [0.0f32, 1.0]), ("doc:b", [0.0, 0.2])] {
            let mut h = fields(key);
            h.insert(
                "content_vector".into(),
                recall_harness_core::embedding::vec_to_blob(&v),
            );
            store.put_hash(key, h).await.unwrap();
        }

        let hits = store
            .vector_query(&VectorQuery {
                index: "docs".into(),
                vector: vec![0.0, 0.0],
                k: 5,
                filter: recall_harness_core::store::StoreFilter::All,
            })
            .await
            .unwrap();
        let keys: Vec<&str> = hits.iter().map(|h| h.key.as_str()).collect();
        assert_eq!(keys, vec!["doc:b", "doc:a"]);
        assert!(!hits[0].fields.contains_key("content_vector"));

        store.drop_index("docs", true).await.unwrap();
        assert!(store.keys_with_prefix("doc:").await.unwrap().is_empty());
        assert!(matches!(
            store.drop_index("docs", true).await,
            Err(HarnessError::IndexNotFound(_))
        ));
    }
}
