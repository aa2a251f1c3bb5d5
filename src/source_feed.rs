//! HTTP trending-feed source.
//!
//! Lists candidates from a JSON endpoint and downloads their media over
//! HTTP.
//!
//! # Feed format
//!
//! `GET <url>?count=<n>&lang=<language>` must return either a bare array or
//! an object with an `items` array. Each item:
//!
//! | Field | Type | Notes |
//! |-------|------|-------|
//! | `id` | string or number | required |
//! | `description` / `desc` | string | optional |
//! | `media_url` | string | required |
//! | `created_at` | unix seconds or RFC 3339 | optional, defaults to now |
//!
//! Items missing `id` or `media_url` are skipped.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::config::FeedSourceConfig;
use crate::models::{CandidateItem, FetchedMedia};
use crate::traits::ContentSource;

pub struct HttpFeedSource {
    client: reqwest::Client,
    url: String,
    count: usize,
    language: String,
    download_dir: PathBuf,
}

impl HttpFeedSource {
    pub fn new(config: &FeedSourceConfig, download_dir: impl Into<PathBuf>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
            count: config.count,
            language: config.language.clone(),
            download_dir: download_dir.into(),
        })
    }
}

#[async_trait]
impl ContentSource for HttpFeedSource {
    fn tag(&self) -> &str {
        "feed"
    }

    async fn list_candidates(&self) -> Result<Vec<CandidateItem>> {
        let response = self
            .client
            .get(&self.url)
            .query(&[
                ("count", self.count.to_string()),
                ("lang", self.language.clone()),
            ])
            .send()
            .await
            .with_context(|| format!("Error fetching trending videos from {}", self.url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Feed returned {}: {}", status, body);
        }

        let json: Value = response.json().await.context("Feed returned invalid JSON")?;
        let mut items = parse_feed(&json, Utc::now())?;
        items.truncate(self.count);
        debug!(count = items.len(), "Fetched feed candidates");
        Ok(items)
    }

    async fn fetch_media(&self, candidate: &CandidateItem) -> Result<FetchedMedia> {
        tokio::fs::create_dir_all(&self.download_dir).await?;
        let path = self.download_dir.join(download_file_name(candidate));
        let partial = path.with_extension("mp4.part");

        let result = self.download_to(&candidate.media_locator, &partial).await;
        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e.context(format!("Error downloading video {}", candidate.id)));
        }

        tokio::fs::rename(&partial, &path).await?;
        if !path.exists() {
            bail!("Download failed - file not created");
        }

        Ok(FetchedMedia {
            path,
            temporary: true,
        })
    }
}

impl HttpFeedSource {
    async fn download_to(&self, url: &str, dest: &Path) -> Result<()> {
        let mut response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            bail!("Media request returned {}", status);
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        if written == 0 {
            bail!("Media response was empty");
        }
        Ok(())
    }
}

/// Parse a feed document into candidates. Malformed items are skipped.
pub fn parse_feed(json: &Value, now: DateTime<Utc>) -> Result<Vec<CandidateItem>> {
    let items = match json {
        Value::Array(items) => items,
        Value::Object(obj) => obj
            .get("items")
            .and_then(|i| i.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid feed: missing items array"))?,
        _ => bail!("Invalid feed: expected an array or an object"),
    };

    let mut candidates = Vec::with_capacity(items.len());
    for item in items {
        let id = match item.get("id") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                warn!("Skipping feed item without id");
                continue;
            }
        };
        let Some(media_url) = item.get("media_url").and_then(|v| v.as_str()) else {
            warn!(id = %id, "Skipping feed item without media_url");
            continue;
        };
        let description = item
            .get("description")
            .or_else(|| item.get("desc"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let created_at = item
            .get("created_at")
            .and_then(parse_timestamp)
            .unwrap_or(now);

        candidates.push(CandidateItem {
            id,
            description,
            media_locator: media_url.to_string(),
            created_at,
        });
    }

    Ok(candidates)
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_i64().and_then(|s| DateTime::from_timestamp(s, 0)),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        _ => None,
    }
}

/// `<created_at>_<id>.mp4`, with the id reduced to filename-safe characters.
fn download_file_name(candidate: &CandidateItem) -> String {
    let safe_id: String = candidate
        .id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}_{}.mp4", candidate.created_at.timestamp(), safe_id)
}
