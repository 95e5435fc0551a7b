//! Schema setup for the chunk store.
//!
//! Creates the `chunks` table and its `contract_id` index when missing. Safe to
//! run on every start.

use anyhow::Result;
use tracing::debug;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    // One row per chunk; embedding columns stay NULL until a vector exists.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            chunk_id TEXT PRIMARY KEY,
            contract_id TEXT NOT NULL,
            page_number INTEGER NOT NULL,
            section TEXT,
            start_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            text_hash TEXT NOT NULL,
            embedding BLOB,
            model TEXT,
            dims INTEGER,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_contract_id ON chunks(contract_id)")
        .execute(&pool)
        .await?;

    debug!(db = %config.data.db_path().display(), "migrations applied");
    pool.close().await;
    Ok(())
}
