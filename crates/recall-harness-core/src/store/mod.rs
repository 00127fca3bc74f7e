//! Storage abstraction for Recall Harness.
//!
//! The [`KeyValueStore`] trait is the capability set the engine consumes
//! from its backing store: per-key hash and list values, key expiry, and a
//! search-index sub-protocol (create / drop / inspect an index, run a
//! combined vector + filter query). Wire protocol, connection management
//! and persistence belong to the implementation.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::embedding::{blob_to_vec, distance};
use crate::error::Result;
use crate::models::{IndexSchema, VECTOR_FIELD};

/// Field → raw bytes, the value stored at a hash key.
pub type Hash = BTreeMap<String, Vec<u8>>;

/// Store-native filter expression evaluated against hash fields.
///
/// Produced by [`FilterQueryBuilder`](crate::filter::FilterQueryBuilder);
/// its `Display` form is the RediSearch query dialect.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreFilter {
    All,
    /// Field value equals one of `values`.
    Tag { field: String, values: Vec<String> },
    /// Field parses as a number within the inclusive bounds.
    Numeric {
        field: String,
        min: Option<f64>,
        max: Option<f64>,
    },
    And(Vec<StoreFilter>),
    Or(Vec<StoreFilter>),
    Not(Box<StoreFilter>),
}

impl StoreFilter {
    pub fn is_match_all(&self) -> bool {
        match self {
            StoreFilter::All => true,
            StoreFilter::And(parts) => parts.iter().all(StoreFilter::is_match_all),
            _ => false,
        }
    }

    pub fn matches(&self, hash: &Hash) -> bool {
        match self {
            StoreFilter::All => true,
            StoreFilter::Tag { field, values } => field_str(hash, field)
                .map(|v| values.iter().any(|candidate| candidate == v))
                .unwrap_or(false),
            StoreFilter::Numeric { field, min, max } => {
                match field_str(hash, field).and_then(|v| v.parse::<f64>().ok()) {
                    Some(n) => {
                        min.map(|lo| n >= lo).unwrap_or(true) && max.map(|hi| n <= hi).unwrap_or(true)
                    }
                    None => false,
                }
            }
            StoreFilter::And(parts) => parts.iter().all(|p| p.matches(hash)),
            StoreFilter::Or(parts) => parts.iter().any(|p| p.matches(hash)),
            StoreFilter::Not(inner) => !inner.matches(hash),
        }
    }
}

fn field_str<'a>(hash: &'a Hash, field: &str) -> Option<&'a str> {
    hash.get(field).and_then(|b| std::str::from_utf8(b).ok())
}

fn escape_tag(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if !c.is_alphanumeric() && c != '_' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn fmt_bound(bound: Option<f64>, open: &str) -> String {
    bound.map(|b| b.to_string()).unwrap_or_else(|| open.to_string())
}

impl fmt::Display for StoreFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreFilter::All => f.write_str("*"),
            StoreFilter::Tag { field, values } => {
                let joined: Vec<String> = values.iter().map(|v| escape_tag(v)).collect();
                write!(f, "@{}:{{{}}}", field, joined.join("|"))
            }
            StoreFilter::Numeric { field, min, max } => write!(
                f,
                "@{}:[{} {}]",
                field,
                fmt_bound(*min, "-inf"),
                fmt_bound(*max, "+inf")
            ),
            StoreFilter::And(parts) if parts.is_empty() => f.write_str("*"),
            StoreFilter::And(parts) => {
                let rendered: Vec<String> = parts.iter().map(|p| p.to_string()).collect();
                write!(f, "({})", rendered.join(" "))
            }
            StoreFilter::Or(parts) => {
                let rendered: Vec<String> = parts.iter().map(|p| p.to_string()).collect();
                write!(f, "({})", rendered.join(" | "))
            }
            StoreFilter::Not(inner) => write!(f, "-{}", inner),
        }
    }
}

/// A combined KNN + filter query against one index.
#[derive(Debug, Clone)]
pub struct VectorQuery {
    pub index: String,
    pub vector: Vec<f32>,
    pub k: usize,
    pub filter: StoreFilter,
}

/// One ranked hit: the document key, its distance, and its stored fields
/// (the vector field excluded).
#[derive(Debug, Clone)]
pub struct QueryHit {
    pub key: String,
    pub distance: f32,
    pub fields: Hash,
}

/// Rank candidate hashes for a query the way a search-capable store does:
/// drop hashes without a vector of the index dimension or failing the
/// filter, order by ascending distance then key, keep the top `k`.
///
/// Shared by every brute-force backend so they rank identically.
pub fn rank_candidates<I>(schema: &IndexSchema, query: &VectorQuery, candidates: I) -> Vec<QueryHit>
where
    I: IntoIterator<Item = (String, Hash)>,
{
    let mut hits: Vec<QueryHit> = candidates
        .into_iter()
        .filter_map(|(key, mut fields)| {
            let vector = blob_to_vec(fields.get(VECTOR_FIELD)?);
            if vector.len() != schema.dims || !query.filter.matches(&fields) {
                return None;
            }
            fields.remove(VECTOR_FIELD);
            Some(QueryHit {
                distance: distance(schema.metric, &query.vector, &vector),
                key,
                fields,
            })
        })
        .collect();

    hits.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.key.cmp(&b.key))
    });
    hits.truncate(query.k);
    hits
}

/// Abstract key-value / search store.
///
/// All operations are async (via `async-trait`). In-memory implementations
/// return immediately-ready futures.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`put_hash`](KeyValueStore::put_hash) | Replace the hash at a key |
/// | [`get_hash`](KeyValueStore::get_hash) | Read a whole hash |
/// | [`delete`](KeyValueStore::delete) | Delete keys of any type |
/// | [`push_list`](KeyValueStore::push_list) | Append to a list |
/// | [`get_list`](KeyValueStore::get_list) | Read a whole list |
/// | [`expire`](KeyValueStore::expire) | Set or refresh a key's TTL |
/// | [`persist`](KeyValueStore::persist) | Clear a key's TTL |
/// | [`ttl`](KeyValueStore::ttl) | Remaining TTL |
/// | [`keys_with_prefix`](KeyValueStore::keys_with_prefix) | Key scan |
/// | [`create_index`](KeyValueStore::create_index) | Declare a search index |
/// | [`index_info`](KeyValueStore::index_info) | Read an index definition |
/// | [`drop_index`](KeyValueStore::drop_index) | Remove an index definition |
/// | [`vector_query`](KeyValueStore::vector_query) | KNN + filter query |
///
/// Expired keys behave exactly like absent keys for every operation.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Replace the hash at `key`, clearing any TTL. Fails with
    /// `WrongType` when the key holds a list.
    async fn put_hash(&self, key: &str, fields: Hash) -> Result<()>;

    async fn get_hash(&self, key: &str) -> Result<Option<Hash>>;

    /// Delete keys of any type, returning how many existed.
    async fn delete(&self, keys: &[String]) -> Result<usize>;

    /// Append values to the list at `key`, creating it when absent and
    /// keeping its TTL. Returns the new length.
    async fn push_list(&self, key: &str, values: &[Vec<u8>]) -> Result<usize>;

    /// Whole list in push order; empty when the key is absent.
    async fn get_list(&self, key: &str) -> Result<Vec<Vec<u8>>>;

    /// Set the TTL of an existing key. Returns `false` when absent.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Remove the TTL of an existing key. Returns `false` when the key is
    /// absent or had no TTL.
    async fn persist(&self, key: &str) -> Result<bool>;

    /// Remaining TTL; `None` when the key is absent or never expires.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    /// Every live key starting with `prefix`, sorted.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Declare an index. Fails with `IndexExists` when the name is taken.
    async fn create_index(&self, schema: &IndexSchema) -> Result<()>;

    async fn index_info(&self, name: &str) -> Result<Option<IndexSchema>>;

    /// Remove an index definition, and its documents when
    /// `delete_documents` is set. Fails with `IndexNotFound`.
    async fn drop_index(&self, name: &str, delete_documents: bool) -> Result<()>;

    /// Top-`k` documents under the index prefix matching the filter, by
    /// ascending distance then key. Fails with `IndexNotFound`.
    async fn vector_query(&self, query: &VectorQuery) -> Result<Vec<QueryHit>>;
}
