//! TOML configuration for the `recall` binary.
//!
//! See `config/recall.example.toml` for every section. Only `[db]` is
//! required; the other sections fall back to defaults.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use recall_harness_core::chat::{ChatHistoryConfig, DEFAULT_SESSION_PREFIX};
use recall_harness_core::ingest::DEFAULT_BATCH_SIZE;
use recall_harness_core::models::{DistanceMetric, FieldKind};
use recall_harness_core::vectorstore::VectorStoreConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_name")]
    pub name: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default)]
    pub metric: DistanceMetric,
    /// Defaults to `embedding.dims`.
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub default_filter_field: Option<String>,
    #[serde(default)]
    pub metadata_fields: BTreeMap<String, FieldKind>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            name: default_index_name(),
            key_prefix: default_key_prefix(),
            metric: DistanceMetric::default(),
            dims: None,
            default_filter_field: None,
            metadata_fields: BTreeMap::new(),
        }
    }
}

fn default_index_name() -> String {
    "documents".to_string()
}
fn default_key_prefix() -> String {
    "doc:".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub default_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: default_k(),
        }
    }
}

fn default_k() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL override for `openai` and `ollama`.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            batch_size: DEFAULT_BATCH_SIZE,
            max_retries: 5,
            timeout_secs: 30,
            url: None,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_session_prefix")]
    pub key_prefix: String,
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_session_prefix(),
            ttl_secs: None,
        }
    }
}

fn default_session_prefix() -> String {
    DEFAULT_SESSION_PREFIX.to_string()
}

impl ChatConfig {
    pub fn history_config(&self) -> ChatHistoryConfig {
        ChatHistoryConfig {
            key_prefix: self.key_prefix.clone(),
            ttl: self.ttl_secs.map(Duration::from_secs),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_level() -> String {
    "warn".to_string()
}

impl Config {
    /// Vector store settings for the configured index.
    pub fn vector_store_config(&self) -> VectorStoreConfig {
        VectorStoreConfig {
            index_name: self.index.name.clone(),
            key_prefix: self.index.key_prefix.clone(),
            metric: self.index.metric,
            dims: self.index.dims.or(self.embedding.dims),
            metadata_fields: self.index.metadata_fields.clone(),
            default_filter_field: self.index.default_filter_field.clone(),
            batch_size: self.embedding.batch_size,
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Index
    if config.index.name.trim().is_empty() {
        bail!("index.name must not be empty");
    }
    if config.index.key_prefix.is_empty() {
        bail!("index.key_prefix must not be empty");
    }
    if let Some(field) = &config.index.default_filter_field {
        match config.index.metadata_fields.get(field) {
            Some(FieldKind::Tag) => {}
            Some(kind) => bail!(
                "index.default_filter_field '{}' must be a tag field, not {}",
                field,
                kind
            ),
            None => bail!(
                "index.default_filter_field '{}' is not declared in index.metadata_fields",
                field
            ),
        }
    }

    // Retrieval
    if config.retrieval.default_k < 1 {
        bail!("retrieval.default_k must be >= 1");
    }

    // Embedding
    match config.embedding.provider.as_str() {
        "disabled" | "hash" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, hash, openai, or ollama.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.provider != "hash" && config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }
    if let (Some(index_dims), Some(embedding_dims)) = (config.index.dims, config.embedding.dims) {
        if index_dims != embedding_dims {
            bail!(
                "index.dims ({}) must equal embedding.dims ({})",
                index_dims,
                embedding_dims
            );
        }
    }

    // Chat
    if config.chat.key_prefix.is_empty() {
        bail!("chat.key_prefix must not be empty");
    }
    if config.chat.ttl_secs == Some(0) {
        bail!("chat.ttl_secs must be > 0 when set");
    }

    Ok(())
}
