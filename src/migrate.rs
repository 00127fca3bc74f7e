use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the key-value tables. Safe to run on every open.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // One row per live key; `expires_at` is a Unix timestamp in ms
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS kv_keys (
            key TEXT PRIMARY KEY,
            kind TEXT NOT NULL CHECK (kind IN ('hash', 'list')),
            expires_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS kv_hash_fields (
            key TEXT NOT NULL,
            field TEXT NOT NULL,
            value BLOB NOT NULL,
            PRIMARY KEY (key, field),
            FOREIGN KEY (key) REFERENCES kv_keys(key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS kv_list_items (
            key TEXT NOT NULL,
            seq INTEGER NOT NULL,
            value BLOB NOT NULL,
            PRIMARY KEY (key, seq),
            FOREIGN KEY (key) REFERENCES kv_keys(key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS kv_indexes (
            name TEXT PRIMARY KEY,
            schema_json TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_kv_keys_expires_at ON kv_keys(expires_at)")
        .execute(pool)
        .await?;

    Ok(())
}
