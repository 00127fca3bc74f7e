//! Core data models used throughout Recall Harness.
//!
//! These types describe what flows between the caller, the engine and the
//! store: documents and their typed metadata, index schemas, search
//! results, and chat messages.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};

/// Hash field holding the document text.
pub const CONTENT_FIELD: &str = "content";
/// Hash field holding the little-endian `f32` vector blob.
pub const VECTOR_FIELD: &str = "content_vector";
/// Hash field holding the full metadata as JSON.
pub const METADATA_FIELD: &str = "metadata";

const RESERVED_FIELDS: [&str; 3] = [CONTENT_FIELD, VECTOR_FIELD, METADATA_FIELD];

/// A single metadata value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl MetadataValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            MetadataValue::Bool(_) => FieldKind::Bool,
            MetadataValue::Number(_) => FieldKind::Numeric,
            MetadataValue::Text(_) => FieldKind::Tag,
        }
    }

    /// Encode the value the way it is stored in its own hash field and
    /// matched by tag filters.
    pub fn to_field_string(&self) -> String {
        match self {
            MetadataValue::Bool(b) => b.to_string(),
            MetadataValue::Number(n) => n.to_string(),
            MetadataValue::Text(s) => s.clone(),
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_field_string())
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::Text(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::Text(s)
    }
}

impl From<f64> for MetadataValue {
    fn from(n: f64) -> Self {
        MetadataValue::Number(n)
    }
}

impl From<i64> for MetadataValue {
    fn from(n: i64) -> Self {
        MetadataValue::Number(n as f64)
    }
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        MetadataValue::Bool(b)
    }
}

/// Typed metadata mapping. Ordered so stored JSON is deterministic.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// A document to ingest, or a document decoded from a search hit.
///
/// Search results always carry `id` and never carry `vector`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    pub id: Option<String>,
    pub content: String,
    pub metadata: Metadata,
    pub vector: Option<Vec<f32>>,
}

impl Document {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_vector(mut self, vector: Vec<f32>) -> Self {
        self.vector = Some(vector);
        self
    }
}

/// Kind of a declared metadata field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// Exact-match string values.
    Tag,
    /// Numbers, filterable by range.
    Numeric,
    Bool,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FieldKind::Tag => "tag",
            FieldKind::Numeric => "numeric",
            FieldKind::Bool => "bool",
        };
        f.write_str(s)
    }
}

/// Distance function used to rank results. Lower distance is closer for
/// every metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DistanceMetric {
    /// `1 - cosine_similarity`, in `[0, 2]`.
    #[default]
    #[serde(rename = "cosine")]
    Cosine,
    /// Euclidean distance.
    #[serde(rename = "l2")]
    L2,
    /// `1 - dot(a, b)`.
    #[serde(rename = "ip", alias = "inner_product")]
    InnerProduct,
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::L2 => "l2",
            DistanceMetric::InnerProduct => "ip",
        };
        f.write_str(s)
    }
}

/// Declared shape of an index: where its documents live and how they are
/// compared and filtered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSchema {
    pub name: String,
    pub key_prefix: String,
    pub dims: usize,
    #[serde(default)]
    pub metric: DistanceMetric,
    #[serde(default)]
    pub metadata_fields: BTreeMap<String, FieldKind>,
}

impl IndexSchema {
    pub fn new(
        name: impl Into<String>,
        key_prefix: impl Into<String>,
        dims: usize,
        metric: DistanceMetric,
    ) -> Self {
        Self {
            name: name.into(),
            key_prefix: key_prefix.into(),
            dims,
            metric,
            metadata_fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.metadata_fields.insert(name.into(), kind);
        self
    }

    pub fn field_kind(&self, name: &str) -> Option<FieldKind> {
        self.metadata_fields.get(name).copied()
    }

    /// Store key for a document id.
    pub fn key_for(&self, id: &str) -> String {
        format!("{}{}", self.key_prefix, id)
    }

    /// Document id for a store key under this index's prefix.
    pub fn id_from_key<'a>(&self, key: &'a str) -> &'a str {
        key.strip_prefix(self.key_prefix.as_str()).unwrap_or(key)
    }

    /// Reject schemas the store could not honour.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(HarnessError::InvalidArgument(
                "index name must not be empty".to_string(),
            ));
        }
        if self.key_prefix.is_empty() {
            return Err(HarnessError::InvalidArgument(format!(
                "index '{}' must declare a non-empty key prefix",
                self.name
            )));
        }
        if self.dims == 0 {
            return Err(HarnessError::InvalidArgument(format!(
                "index '{}' must declare dims > 0",
                self.name
            )));
        }
        for field in self.metadata_fields.keys() {
            if RESERVED_FIELDS.contains(&field.as_str()) {
                return Err(HarnessError::InvalidMetadata(format!(
                    "'{}' is reserved and cannot be a metadata field",
                    field
                )));
            }
        }
        Ok(())
    }

    /// Compare a requested schema against the one already stored.
    pub fn check_compatible(&self, existing: &IndexSchema) -> Result<()> {
        let reason = if self.key_prefix != existing.key_prefix {
            Some(format!(
                "key prefix '{}' != existing '{}'",
                self.key_prefix, existing.key_prefix
            ))
        } else if self.dims != existing.dims {
            Some(format!("dims {} != existing {}", self.dims, existing.dims))
        } else if self.metric != existing.metric {
            Some(format!("metric {} != existing {}", self.metric, existing.metric))
        } else if self.metadata_fields != existing.metadata_fields {
            Some("metadata fields differ".to_string())
        } else {
            None
        };

        match reason {
            Some(reason) => Err(HarnessError::SchemaMismatch {
                index: self.name.clone(),
                reason,
            }),
            None => Ok(()),
        }
    }

    /// Check every metadata key is declared and of the declared kind.
    pub fn validate_metadata(&self, metadata: &Metadata) -> Result<()> {
        for (key, value) in metadata {
            match self.field_kind(key) {
                None => {
                    return Err(HarnessError::InvalidMetadata(format!(
                        "field '{}' is not declared in index '{}'",
                        key, self.name
                    )))
                }
                Some(kind) if kind != value.kind() => {
                    return Err(HarnessError::InvalidMetadata(format!(
                        "field '{}' is {} but got a {} value",
                        key,
                        kind,
                        value.kind()
                    )))
                }
                Some(_) => {}
            }
            if let MetadataValue::Number(n) = value {
                if !n.is_finite() {
                    return Err(HarnessError::InvalidMetadata(format!(
                        "field '{}' must be a finite number, got {}",
                        key, n
                    )));
                }
            }
        }
        Ok(())
    }
}

/// A ranked search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub document: Document,
    /// Distance under the index metric; lower is closer.
    pub score: f32,
}

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Human,
    Ai,
    System,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Human => "human",
            Role::Ai => "ai",
            Role::System => "system",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn human(content: impl Into<String>) -> Self {
        Self::new(Role::Human, content)
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Self::new(Role::Ai, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}
