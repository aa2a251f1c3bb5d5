use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the history schema on an open pool. Idempotent.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // One row per item id; later writes replace earlier ones.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS processed (
            id TEXT PRIMARY KEY,
            content_fingerprint TEXT,
            source_fingerprint TEXT,
            source_tag TEXT NOT NULL,
            caption TEXT,
            recorded_at INTEGER NOT NULL,
            status TEXT NOT NULL,
            error_detail TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_processed_content_fp ON processed(content_fingerprint)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_processed_source_fp ON processed(source_fingerprint)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_processed_recorded_at ON processed(recorded_at)")
        .execute(pool)
        .await?;

    Ok(())
}
