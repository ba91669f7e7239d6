use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::config::Config;
use crate::embedding::Embedder;
use crate::store::sqlite::SqliteGraphStore;

pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let db_path = &config.db.path;

    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    if let Some(extension) = &config.db.vector_extension {
        options = options.extension(extension.to_string_lossy().into_owned());
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open graph database {}", db_path.display()))?;

    Ok(pool)
}

/// Open the graph database and make sure its schema exists.
pub async fn open_store(config: &Config) -> Result<SqliteGraphStore> {
    use crate::store::GraphStore;

    let pool = connect(config).await?;
    let store = SqliteGraphStore::open(pool).await;
    store.initialize(config.embedding.index_dims()).await?;
    Ok(store)
}

/// Open the graph and build the configured embedder, as every read or
/// write command needs both.
pub async fn open_graph(config: &Config) -> Result<(SqliteGraphStore, Embedder)> {
    let store = open_store(config).await?;
    let embedder = Embedder::from_config(&config.embedding).await?;
    Ok((store, embedder))
}
