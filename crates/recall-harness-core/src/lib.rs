//! # Recall Harness Core
//!
//! Backend-agnostic logic for Recall Harness: data models, the
//! [`store::KeyValueStore`] and [`embedding::EmbeddingProvider`] traits,
//! index lifecycle, document ingestion, metadata filtering, similarity
//! search, and session-scoped chat history.
//!
//! This crate contains no tokio, sqlx, or network dependencies. Concrete
//! stores and embedding clients live in the `recall-harness` app crate;
//! [`store::memory::InMemoryStore`] and [`embedding::HashEmbedding`] are
//! provided here for tests and embedded use.
//!
//! ## Layout
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`error`] | `HarnessError` taxonomy |
//! | [`models`] | Documents, metadata, schemas, messages |
//! | [`embedding`] | Embedding trait, hashing embedder, vector math |
//! | [`store`] | Store trait, native filter AST, in-memory backend |
//! | [`index`] | `IndexManager`: ensure / drop / inspect |
//! | [`ingest`] | `DocumentIngestor`: embed, encode, write |
//! | [`filter`] | `FilterQueryBuilder`: caller filter → store filter |
//! | [`search`] | `SimilaritySearchEngine`: query, decode, rank, delete |
//! | [`vectorstore`] | `VectorStore` facade over one index |
//! | [`chat`] | `ChatHistoryStore`: per-session message log with TTL |

pub mod chat;
pub mod embedding;
pub mod error;
pub mod filter;
pub mod index;
pub mod ingest;
pub mod models;
pub mod search;
pub mod store;
pub mod vectorstore;

pub use error::{HarnessError, Result};
