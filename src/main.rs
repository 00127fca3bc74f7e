//! # Recall Harness CLI (`recall`)
//!
//! The `recall` binary drives a local vector index and session chat
//! histories stored in SQLite.
//!
//! ## Usage
//!
//! ```bash
//! recall --config ./config/recall.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `recall init` | Create the SQLite database and schema |
//! | `recall index create\|info\|drop` | Manage the configured index |
//! | `recall add <text>...` | Embed and store documents |
//! | `recall search "<query>"` | Similarity search with optional filters |
//! | `recall delete <id>...` | Delete documents by id, or `--all` |
//! | `recall chat show\|say\|clear` | Session chat history |
//!
//! ## Examples
//!
//! ```bash
//! recall init
//! recall add "Rust ownership explained" --meta lang=rust --meta year=2021
//! recall search "borrow checker" -k 3 --where lang=rust
//! recall chat say session-1 "Who is the best vocalist?"
//! recall chat say session-1 "Ozzy Osbourne" --role ai
//! recall chat show session-1
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use recall_harness::{chat, config, index_cmd, ingest, logging, migrate, search};

/// Recall Harness CLI: a local vector index and session chat history.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/recall.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "recall",
    about = "Recall Harness: a local vector similarity index and session chat history",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/recall.toml")]
    config: PathBuf,

    /// Log at debug level regardless of config or RUST_LOG.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Manage the configured vector index.
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },

    /// Embed and store documents.
    ///
    /// Each text argument and each `--file` becomes one document. Every
    /// document gets the same `--meta` pairs.
    Add {
        /// Document texts.
        texts: Vec<String>,

        /// Read a document body from a file.
        #[arg(long = "file")]
        files: Vec<PathBuf>,

        /// Explicit key per document, in order. A key carrying the index
        /// prefix is used as-is.
        #[arg(long = "key")]
        keys: Vec<String>,

        /// Metadata `field=value`, typed by the field's declared kind.
        #[arg(long = "meta")]
        meta: Vec<String>,
    },

    /// Similarity search over the configured index.
    Search {
        /// The query text.
        query: String,

        /// Number of results (defaults to `retrieval.default_k`).
        #[arg(short, long)]
        k: Option<usize>,

        /// Accepted value for the default filter field (repeatable).
        #[arg(long = "filter")]
        values: Vec<String>,

        /// Equality clause `field=value` (repeatable, AND-ed).
        #[arg(long = "where")]
        wheres: Vec<String>,

        /// Numeric range `field=min..max`; either bound may be empty.
        #[arg(long = "range")]
        ranges: Vec<String>,
    },

    /// Delete documents from the configured index.
    Delete {
        /// Document ids.
        ids: Vec<String>,

        /// Delete every document under the index prefix.
        #[arg(long)]
        all: bool,
    },

    /// Session chat history.
    Chat {
        #[command(subcommand)]
        action: ChatAction,
    },
}

#[derive(Subcommand)]
enum IndexAction {
    /// Create the index if absent; verify its schema if present.
    Create,
    /// Print the stored index definition.
    Info,
    /// Drop the index definition.
    Drop {
        /// Also delete every document under the index prefix.
        #[arg(long)]
        delete_documents: bool,
    },
}

#[derive(Subcommand)]
enum ChatAction {
    /// Print a session's messages in order.
    Show { session: String },
    /// Append a message to a session.
    Say {
        session: String,
        text: String,
        /// Author: human, ai, or system.
        #[arg(long, default_value = "human")]
        role: String,
    },
    /// Delete a session.
    Clear { session: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging, cli.verbose)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Index { action } => match action {
            IndexAction::Create => index_cmd::run_index_create(&cfg).await?,
            IndexAction::Info => index_cmd::run_index_info(&cfg).await?,
            IndexAction::Drop { delete_documents } => {
                index_cmd::run_index_drop(&cfg, delete_documents).await?
            }
        },
        Commands::Add {
            texts,
            files,
            keys,
            meta,
        } => {
            ingest::run_add(&cfg, texts, files, keys, meta).await?;
        }
        Commands::Search {
            query,
            k,
            values,
            wheres,
            ranges,
        } => {
            search::run_search(&cfg, &query, k, values, wheres, ranges).await?;
        }
        Commands::Delete { ids, all } => {
            search::run_delete(&cfg, ids, all).await?;
        }
        Commands::Chat { action } => match action {
            ChatAction::Show { session } => chat::run_chat_show(&cfg, &session).await?,
            ChatAction::Say {
                session,
                text,
                role,
            } => chat::run_chat_say(&cfg, &session, &text, &role).await?,
            ChatAction::Clear { session } => chat::run_chat_clear(&cfg, &session).await?,
        },
    }

    Ok(())
}
