//! Error taxonomy shared by every core component.
//!
//! Every fallible operation returns [`Result`]. Errors are reported by the
//! call that detected them; the core never retries and never swallows.

/// Boxed cause carried by transport and embedding errors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result alias defaulting to [`HarnessError`].
pub type Result<T, E = HarnessError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// The store could not be reached or failed to execute a command.
    #[error("store connection error: {0}")]
    Connection(#[source] BoxError),

    #[error("index not found: {0}")]
    IndexNotFound(String),

    #[error("index already exists: {0}")]
    IndexExists(String),

    #[error("index '{index}' exists with an incompatible schema: {reason}")]
    SchemaMismatch { index: String, reason: String },

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A batch write failed part-way. Documents before `failed_index`
    /// remain written.
    #[error("ingest failed at document {failed_index}: {source}")]
    Ingest {
        failed_index: usize,
        #[source]
        source: Box<HarnessError>,
    },

    #[error("embedding failed: {0}")]
    Embedding(#[source] BoxError),

    #[error("wrong value type stored at key '{0}'")]
    WrongType(String),

    #[error("cannot decode record '{key}': {reason}")]
    Decode { key: String, reason: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl HarnessError {
    /// Wrap any backend error as a [`HarnessError::Connection`].
    pub fn connection(err: impl Into<BoxError>) -> Self {
        Self::Connection(err.into())
    }

    /// Wrap any provider error as a [`HarnessError::Embedding`].
    pub fn embedding(err: impl Into<BoxError>) -> Self {
        Self::Embedding(err.into())
    }

    pub(crate) fn decode(key: &str, reason: impl std::fmt::Display) -> Self {
        Self::Decode {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }
}
