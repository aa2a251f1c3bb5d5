//! Duplicate detection backed by the `processed` history table.
//!
//! Two independent gates decide whether an item was already published:
//!
//! - **By id**: a `success` row for the same id recorded inside the
//!   duplicate window.
//! - **By content**: a fingerprint present in the in-memory recent cache.
//!
//! The window is a query predicate, not a retention policy: rows older than
//! the window stay in the table for audit but stop affecting checks. The
//! cache is a bounded FIFO rebuilt from history at startup, so its memory and
//! lookup cost stay flat no matter how large the table grows.

use anyhow::{Context, Result};
use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use std::collections::VecDeque;
use std::path::Path;
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::DedupConfig;
use crate::error::truncate_detail;
use crate::models::{ProcessedRecord, RecordStatus};

const HASH_CHUNK_BYTES: usize = 8192;

/// Counts by status and source tag.
#[derive(Debug, Clone, Default)]
pub struct HistoryStats {
    pub total: i64,
    pub success: i64,
    pub error: i64,
    pub by_source: Vec<(String, i64, i64)>,
    pub last_success_at: Option<i64>,
}

pub struct DuplicateStore {
    pool: SqlitePool,
    window_secs: i64,
    capacity: usize,
    recent: Mutex<VecDeque<String>>,
}

impl DuplicateStore {
    /// Open the store over an already-migrated pool and replay recent
    /// fingerprints into the cache.
    pub async fn open(pool: SqlitePool, config: &DedupConfig) -> Result<Self> {
        let store = Self {
            pool,
            window_secs: config.window_hours.saturating_mul(3600),
            capacity: config.max_history_items.max(1),
            recent: Mutex::new(VecDeque::new()),
        };
        store.rebuild_cache().await?;
        Ok(store)
    }

    fn cutoff(&self) -> i64 {
        Utc::now().timestamp().saturating_sub(self.window_secs)
    }

    async fn rebuild_cache(&self) -> Result<()> {
        let rows = sqlx::query(
            r#"
            SELECT content_fingerprint, source_fingerprint
            FROM processed
            WHERE status = 'success' AND recorded_at >= ?
            ORDER BY recorded_at ASC
            "#,
        )
        .bind(self.cutoff())
        .fetch_all(&self.pool)
        .await
        .context("Failed to load recent fingerprints")?;

        let mut recent = self.recent.lock().await;
        recent.clear();
        for row in &rows {
            for column in ["content_fingerprint", "source_fingerprint"] {
                let fp: Option<String> = row.get(column);
                if let Some(fp) = fp {
                    push_bounded(&mut recent, fp, self.capacity);
                }
            }
        }
        debug!(cached = recent.len(), "Rebuilt recent fingerprint cache");
        Ok(())
    }

    /// True if `id` was published inside the window or `fingerprint` is in
    /// the recent cache.
    pub async fn is_duplicate(&self, id: Option<&str>, fingerprint: Option<&str>) -> Result<bool> {
        if let Some(fp) = fingerprint {
            let recent = self.recent.lock().await;
            if recent.iter().any(|known| known == fp) {
                return Ok(true);
            }
        }

        if let Some(id) = id {
            let found: Option<String> = sqlx::query_scalar(
                "SELECT id FROM processed WHERE id = ? AND status = 'success' AND recorded_at >= ?",
            )
            .bind(id)
            .bind(self.cutoff())
            .fetch_optional(&self.pool)
            .await?;
            if found.is_some() {
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Upsert a success row and remember its fingerprints.
    pub async fn register_success(
        &self,
        id: &str,
        fingerprint: Option<&str>,
        source_fingerprint: Option<&str>,
        source_tag: &str,
        caption: &str,
    ) -> Result<ProcessedRecord> {
        let record = ProcessedRecord {
            id: id.to_string(),
            content_fingerprint: fingerprint.map(str::to_string),
            source_fingerprint: source_fingerprint.map(str::to_string),
            source_tag: source_tag.to_string(),
            caption: Some(caption.to_string()),
            recorded_at: Utc::now().timestamp(),
            status: RecordStatus::Success,
            error_detail: None,
        };

        // Hold the cache lock across the write so readers never see the row
        // without its fingerprints.
        let mut recent = self.recent.lock().await;
        self.upsert_record(&record).await?;
        for fp in [fingerprint, source_fingerprint].into_iter().flatten() {
            push_bounded(&mut recent, fp.to_string(), self.capacity);
        }
        Ok(record)
    }

    /// Upsert an error row. The fingerprint cache is untouched.
    pub async fn register_failure(
        &self,
        id: &str,
        source_tag: &str,
        error: &str,
    ) -> Result<ProcessedRecord> {
        let record = ProcessedRecord {
            id: id.to_string(),
            content_fingerprint: None,
            source_fingerprint: None,
            source_tag: source_tag.to_string(),
            caption: None,
            recorded_at: Utc::now().timestamp(),
            status: RecordStatus::Error,
            error_detail: Some(truncate_detail(error)),
        };
        let _guard = self.recent.lock().await;
        self.upsert_record(&record).await?;
        Ok(record)
    }

    /// Write a row as-is, replacing any previous row with the same id.
    pub async fn upsert_record(&self, record: &ProcessedRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO processed (id, content_fingerprint, source_fingerprint, source_tag, caption, recorded_at, status, error_detail)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                content_fingerprint = excluded.content_fingerprint,
                source_fingerprint = excluded.source_fingerprint,
                source_tag = excluded.source_tag,
                caption = excluded.caption,
                recorded_at = excluded.recorded_at,
                status = excluded.status,
                error_detail = excluded.error_detail
            "#,
        )
        .bind(&record.id)
        .bind(&record.content_fingerprint)
        .bind(&record.source_fingerprint)
        .bind(&record.source_tag)
        .bind(&record.caption)
        .bind(record.recorded_at)
        .bind(record.status.as_str())
        .bind(&record.error_detail)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to record history for '{}'", record.id))?;

        Ok(())
    }

    pub async fn get_record(&self, id: &str) -> Result<Option<ProcessedRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, content_fingerprint, source_fingerprint, source_tag, caption, recorded_at, status, error_detail
            FROM processed WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_record(&r)).transpose()
    }

    /// Most recent rows first, optionally filtered by status.
    pub async fn recent_records(
        &self,
        limit: i64,
        status: Option<RecordStatus>,
    ) -> Result<Vec<ProcessedRecord>> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    r#"
                    SELECT id, content_fingerprint, source_fingerprint, source_tag, caption, recorded_at, status, error_detail
                    FROM processed WHERE status = ?
                    ORDER BY recorded_at DESC, id ASC LIMIT ?
                    "#,
                )
                .bind(status.as_str())
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT id, content_fingerprint, source_fingerprint, source_tag, caption, recorded_at, status, error_detail
                    FROM processed
                    ORDER BY recorded_at DESC, id ASC LIMIT ?
                    "#,
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(row_to_record).collect()
    }

    pub async fn stats(&self) -> Result<HistoryStats> {
        let rows = sqlx::query(
            r#"
            SELECT
                source_tag,
                SUM(CASE WHEN status = 'success' THEN 1 ELSE 0 END) AS success_count,
                SUM(CASE WHEN status = 'error' THEN 1 ELSE 0 END) AS error_count
            FROM processed
            GROUP BY source_tag
            ORDER BY source_tag ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = HistoryStats::default();
        for row in &rows {
            let source: String = row.get("source_tag");
            let success: i64 = row.get("success_count");
            let error: i64 = row.get("error_count");
            stats.success += success;
            stats.error += error;
            stats.by_source.push((source, success, error));
        }
        stats.total = stats.success + stats.error;

        stats.last_success_at =
            sqlx::query_scalar("SELECT MAX(recorded_at) FROM processed WHERE status = 'success'")
                .fetch_one(&self.pool)
                .await?;

        Ok(stats)
    }

    /// Number of fingerprints currently held in the recent cache.
    pub async fn cached_fingerprints(&self) -> usize {
        self.recent.lock().await.len()
    }
}

fn push_bounded(recent: &mut VecDeque<String>, fp: String, capacity: usize) {
    if recent.len() >= capacity {
        recent.pop_front();
    }
    recent.push_back(fp);
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<ProcessedRecord> {
    let status: String = row.get("status");
    let status = RecordStatus::parse(&status)
        .ok_or_else(|| anyhow::anyhow!("Unknown record status: '{}'", status))?;

    Ok(ProcessedRecord {
        id: row.get("id"),
        content_fingerprint: row.get("content_fingerprint"),
        source_fingerprint: row.get("source_fingerprint"),
        source_tag: row.get("source_tag"),
        caption: row.get("caption"),
        recorded_at: row.get("recorded_at"),
        status,
        error_detail: row.get("error_detail"),
    })
}

/// SHA-256 of a file's bytes, streamed in fixed-size chunks.
///
/// Returns `None` when the file cannot be read; such items are never treated
/// as duplicates by content.
pub async fn fingerprint_file(path: &Path) -> Option<String> {
    match hash_file(path).await {
        Ok(digest) => Some(digest),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Could not fingerprint file");
            None
        }
    }
}

async fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_CHUNK_BYTES];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
