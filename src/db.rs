//! SQLite connection management for both databases (§5 "Locking discipline").

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

async fn open(path: &Path, max_connections: u32) -> Result<SqlitePool> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new().max_connections(max_connections).connect_with(options).await?;

    Ok(pool)
}

/// Connect to the main store. Exclusive writer during ingest/backfill,
/// multi-reader otherwise.
pub async fn connect_main(config: &crate::config::Config) -> Result<SqlitePool> {
    open(&config.db.path, 5).await
}

/// Connect to the embeddings store, a derived artifact that lives beside the
/// main DB and may be rebuilt from scratch at any time.
pub async fn connect_embeddings(config: &crate::config::Config) -> Result<SqlitePool> {
    open(&config.embeddings_db.path, 5).await
}
