//! History listing and summary statistics.
//!
//! `relay history` prints the most recent rows of the `processed` table;
//! `relay stats` prints totals, a per-source breakdown, and when the last
//! successful publish happened.

use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::dedup::DuplicateStore;
use crate::migrate;
use crate::models::RecordStatus;

const CAPTION_PREVIEW_CHARS: usize = 40;

async fn open_store(config: &Config) -> Result<DuplicateStore> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    DuplicateStore::open(pool, &config.dedup).await
}

/// Print the `limit` most recent history rows.
pub async fn run_history(config: &Config, limit: i64, status: Option<RecordStatus>) -> Result<()> {
    let store = open_store(config).await?;
    let records = store.recent_records(limit, status).await?;

    if records.is_empty() {
        println!("No history yet.");
        return Ok(());
    }

    println!(
        "{:<36} {:<10} {:<8} {:<18} DETAIL",
        "ID", "SOURCE", "STATUS", "RECORDED"
    );
    println!("{}", "-".repeat(100));
    for record in &records {
        let detail = match record.status {
            RecordStatus::Success => record.caption.as_deref().map(preview).unwrap_or_default(),
            RecordStatus::Error => record.error_detail.as_deref().map(preview).unwrap_or_default(),
        };
        println!(
            "{:<36} {:<10} {:<8} {:<18} {}",
            record.id,
            record.source_tag,
            record.status.as_str(),
            format_ts_relative(record.recorded_at),
            detail
        );
    }

    Ok(())
}

pub async fn run_stats(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let stats = store.stats().await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Reel Relay - History Stats");
    println!("==========================");
    println!();
    println!("  Database:      {}", config.db.path.display());
    println!("  Size:          {}", format_bytes(db_size));
    println!();
    println!("  Records:       {}", stats.total);
    println!("  Published:     {}", stats.success);
    println!("  Failed:        {}", stats.error);
    println!(
        "  Last publish:  {}",
        stats
            .last_success_at
            .map(format_ts_relative)
            .unwrap_or_else(|| "never".to_string())
    );
    println!(
        "  Window:        {}h ({} fingerprints cached)",
        config.dedup.window_hours,
        store.cached_fingerprints().await
    );

    if !stats.by_source.is_empty() {
        println!();
        println!("  By source:");
        println!("  {:<16} {:>10} {:>8}", "SOURCE", "PUBLISHED", "FAILED");
        println!("  {}", "-".repeat(36));
        for (source, success, error) in &stats.by_source {
            println!("  {:<16} {:>10} {:>8}", source, success, error);
        }
    }

    println!();
    Ok(())
}

fn preview(text: &str) -> String {
    let single_line = text.replace('\n', " ");
    match single_line.char_indices().nth(CAPTION_PREVIEW_CHARS) {
        Some((idx, _)) => format!("{}…", &single_line[..idx]),
        None => single_line,
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
