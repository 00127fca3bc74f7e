//! # Recall Harness
//!
//! A local-first vector similarity index and session-scoped chat history
//! for AI tools.
//!
//! The backend-agnostic engine lives in [`recall_harness_core`]; this crate
//! supplies the SQLite key-value store, HTTP embedding providers, TOML
//! configuration, logging, and the `recall` CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────────┐   ┌──────────────┐
//! │  recall CLI  │──▶│  VectorStore / Chat  │──▶│ SqliteKvStore │
//! │   (clap)     │   │  (recall-harness-    │   │ hashes, lists │
//! └──────────────┘   │        core)         │   │ TTLs, indexes │
//!                    └──────────┬───────────┘   └──────────────┘
//!                               ▼
//!                    ┌──────────────────────┐
//!                    │ Embedding providers  │
//!                    │ hash/OpenAI/Ollama   │
//!                    └──────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |
//! | [`sqlite_store`] | `KeyValueStore` over SQLite |
//! | [`embedding`] | Embedding providers |
//! | [`harness`] | Per-command wiring |
//! | [`index_cmd`], [`ingest`], [`search`], [`chat`] | CLI commands |

pub mod chat;
pub mod config;
pub mod db;
pub mod embedding;
pub mod harness;
pub mod index_cmd;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod search;
pub mod sqlite_store;
