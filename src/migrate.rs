use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the catalog tables on an open pool. Safe to run repeatedly.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    // One row per table-of-contents entry
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS archives (
            cbtnum INTEGER PRIMARY KEY,
            archive_id TEXT NOT NULL UNIQUE,
            path TEXT NOT NULL,
            comment TEXT NOT NULL DEFAULT '',
            updated INTEGER NOT NULL DEFAULT 0,
            info TEXT NOT NULL DEFAULT '',
            remote_size INTEGER,
            content_hash TEXT,
            converted_at INTEGER,
            listed_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Rows of the most recent scan
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scan_rows (
            archive_id TEXT NOT NULL,
            row_index INTEGER NOT NULL,
            dataset_name TEXT NOT NULL,
            member_name TEXT NOT NULL,
            extension TEXT NOT NULL,
            media_type TEXT NOT NULL,
            subcontent TEXT NOT NULL,
            scanned_at INTEGER NOT NULL,
            PRIMARY KEY (archive_id, row_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_scan_rows_media_type ON scan_rows(media_type)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_archives_updated ON archives(updated)")
        .execute(pool)
        .await?;

    Ok(())
}
