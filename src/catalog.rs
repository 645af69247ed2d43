//! Persistent catalog of known archives and the latest scan.
//!
//! Table-of-contents entries are upserted on every `fetch`; `convert`
//! records the hash of the copy it converted; `scan` replaces the rows of
//! each archive it scanned.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

use crate::models::CatalogRow;
use crate::toc::{self, TocEntry};

/// An archive as the catalog knows it.
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveRecord {
    #[serde(flatten)]
    pub entry: TocEntry,
    pub content_hash: Option<String>,
    /// Unix seconds of the last conversion.
    pub converted_at: Option<i64>,
}

pub async fn upsert_toc(pool: &SqlitePool, entries: &[TocEntry]) -> Result<u64> {
    let now = Utc::now().timestamp();
    let mut tx = pool.begin().await?;
    let mut written = 0u64;
    for entry in entries {
        sqlx::query(
            r#"
            INSERT INTO archives (cbtnum, archive_id, path, comment, updated, info, listed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(cbtnum) DO UPDATE SET
                path = excluded.path,
                comment = excluded.comment,
                updated = excluded.updated,
                info = excluded.info,
                listed_at = excluded.listed_at
            "#,
        )
        .bind(entry.cbtnum as i64)
        .bind(entry.archive_id())
        .bind(&entry.path)
        .bind(&entry.comment)
        .bind(entry.updated)
        .bind(&entry.info)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        written += 1;
    }
    tx.commit().await?;
    Ok(written)
}

pub async fn list_archives(pool: &SqlitePool) -> Result<Vec<ArchiveRecord>> {
    let rows = sqlx::query(
        "SELECT cbtnum, path, comment, updated, info, content_hash, converted_at FROM archives ORDER BY cbtnum ASC",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(record_from_row).collect())
}

pub async fn get_archive(pool: &SqlitePool, cbtnum: u32) -> Result<Option<ArchiveRecord>> {
    let row = sqlx::query(
        "SELECT cbtnum, path, comment, updated, info, content_hash, converted_at FROM archives WHERE cbtnum = ?",
    )
    .bind(cbtnum as i64)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(record_from_row))
}

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> ArchiveRecord {
    let cbtnum: i64 = row.get("cbtnum");
    ArchiveRecord {
        entry: TocEntry {
            cbtnum: cbtnum as u32,
            path: row.get("path"),
            comment: row.get("comment"),
            updated: row.get("updated"),
            info: row.get("info"),
        },
        content_hash: row.get("content_hash"),
        converted_at: row.get("converted_at"),
    }
}

/// Remember that `archive_id` was converted from a copy hashing to `content_hash`.
///
/// Archives converted before any `fetch` get a catalog row of their own.
pub async fn record_conversion(
    pool: &SqlitePool,
    archive_id: &str,
    content_hash: &str,
) -> Result<()> {
    let cbtnum = toc::parse_archive_id(archive_id)
        .with_context(|| format!("Not an archive id: {}", archive_id))?;
    let now = Utc::now().timestamp();
    sqlx::query(
        r#"
        INSERT INTO archives (cbtnum, archive_id, path, content_hash, converted_at, listed_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(cbtnum) DO UPDATE SET
            content_hash = excluded.content_hash,
            converted_at = excluded.converted_at
        "#,
    )
    .bind(cbtnum as i64)
    .bind(archive_id)
    .bind(format!("cbt/{}.zip", archive_id))
    .bind(content_hash)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

/// Replace the stored scan rows of every archive present in `rows`.
pub async fn replace_scan_rows(pool: &SqlitePool, rows: &[CatalogRow]) -> Result<u64> {
    let now = Utc::now().timestamp();
    let mut tx = pool.begin().await?;

    let mut archives: Vec<&str> = rows.iter().map(|r| r.archive_id.as_str()).collect();
    archives.sort_unstable();
    archives.dedup();
    for archive_id in archives {
        sqlx::query("DELETE FROM scan_rows WHERE archive_id = ?")
            .bind(archive_id)
            .execute(&mut *tx)
            .await?;
    }

    let mut next_index: HashMap<&str, i64> = HashMap::new();
    for row in rows {
        let slot = next_index.entry(row.archive_id.as_str()).or_insert(0);
        let index = *slot;
        *slot += 1;
        sqlx::query(
            r#"
            INSERT INTO scan_rows (archive_id, row_index, dataset_name, member_name, extension, media_type, subcontent, scanned_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.archive_id)
        .bind(index)
        .bind(&row.dataset_name)
        .bind(&row.member_name)
        .bind(&row.extension)
        .bind(&row.media_type)
        .bind(&row.subcontent)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(rows.len() as u64)
}

/// Stored scan rows, for one archive or all of them, in scan order.
pub async fn load_scan_rows(
    pool: &SqlitePool,
    archive_id: Option<&str>,
) -> Result<Vec<CatalogRow>> {
    let rows = match archive_id {
        Some(id) => {
            sqlx::query(
                "SELECT * FROM scan_rows WHERE archive_id = ? ORDER BY row_index ASC",
            )
            .bind(id)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query("SELECT * FROM scan_rows ORDER BY archive_id ASC, row_index ASC")
                .fetch_all(pool)
                .await?
        }
    };
    Ok(rows
        .iter()
        .map(|row| CatalogRow {
            archive_id: row.get("archive_id"),
            dataset_name: row.get("dataset_name"),
            member_name: row.get("member_name"),
            extension: row.get("extension"),
            media_type: row.get("media_type"),
            subcontent: row.get("subcontent"),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::migrate_pool;
    use crate::toc::parse_toc;

    async fn open() -> (tempfile::TempDir, SqlitePool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = crate::db::connect_at(&dir.path().join("catalog.sqlite"))
            .await
            .unwrap();
        migrate_pool(&pool).await.unwrap();
        (dir, pool)
    }

    fn row(archive: &str, member: &str) -> CatalogRow {
        CatalogRow {
            archive_id: archive.to_string(),
            dataset_name: "FILE001.PDS".to_string(),
            member_name: member.to_string(),
            extension: String::new(),
            media_type: "text/plain".to_string(),
            subcontent: "noXMIT".to_string(),
        }
    }

    #[tokio::test]
    async fn toc_upsert_then_conversion() {
        let (_dir, pool) = open().await;
        let toc = parse_toc("//*+FILE001:  Docs  *#  DOC FILE\n");
        assert_eq!(upsert_toc(&pool, &toc.entries).await.unwrap(), 1);
        // idempotent
        upsert_toc(&pool, &toc.entries).await.unwrap();

        record_conversion(&pool, "CBT001", "abc").await.unwrap();
        record_conversion(&pool, "CBT002", "def").await.unwrap();

        let all = list_archives(&pool).await.unwrap();
        assert_eq!(all.len(), 2);
        let first = get_archive(&pool, 1).await.unwrap().unwrap();
        assert_eq!(first.entry.comment, "Docs");
        assert!(first.entry.updated);
        assert_eq!(first.content_hash.as_deref(), Some("abc"));
        assert!(get_archive(&pool, 3).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn scan_rows_are_replaced_per_archive() {
        let (_dir, pool) = open().await;
        replace_scan_rows(&pool, &[row("CBT001", "A"), row("CBT001", "B"), row("CBT002", "C")])
            .await
            .unwrap();
        replace_scan_rows(&pool, &[row("CBT001", "Z")]).await.unwrap();

        let one = load_scan_rows(&pool, Some("CBT001")).await.unwrap();
        assert_eq!(one, vec![row("CBT001", "Z")]);
        let all = load_scan_rows(&pool, None).await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
