use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create the database and its schema. Idempotent.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    // One row per unique content hash
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            content_hash TEXT NOT NULL UNIQUE,
            domain TEXT NOT NULL,
            label TEXT NOT NULL,
            source TEXT NOT NULL,
            kind TEXT NOT NULL,
            domain_score REAL NOT NULL,
            content_excerpt TEXT NOT NULL DEFAULT '',
            extra_json TEXT NOT NULL DEFAULT '{}',
            vector BLOB NOT NULL,
            visual_vector BLOB,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS folder_contracts (
            folder_path TEXT PRIMARY KEY,
            content_signature TEXT NOT NULL,
            domain TEXT NOT NULL,
            confidence REAL NOT NULL,
            verified INTEGER NOT NULL,
            sealed_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_domain ON records(domain)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_label ON records(label)")
        .execute(pool)
        .await?;

    Ok(())
}
