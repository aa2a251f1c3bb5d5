use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::config::LocalSourceConfig;
use crate::models::{CandidateItem, FetchedMedia};
use crate::traits::ContentSource;

/// A single user-provided video file.
///
/// Offers one synthetic candidate whose id is derived from the path and
/// modification time, so editing the file makes it publishable again.
pub struct LocalFileSource {
    path: PathBuf,
}

impl LocalFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn from_config(config: &LocalSourceConfig) -> Self {
        Self::new(config.path.clone())
    }
}

#[async_trait]
impl ContentSource for LocalFileSource {
    fn tag(&self) -> &str {
        "local"
    }

    async fn list_candidates(&self) -> Result<Vec<CandidateItem>> {
        if !self.path.is_file() {
            bail!("Local video does not exist: {}", self.path.display());
        }
        Ok(vec![file_to_candidate(&self.path)?])
    }

    async fn fetch_media(&self, candidate: &CandidateItem) -> Result<FetchedMedia> {
        let path = PathBuf::from(&candidate.media_locator);
        if !path.is_file() {
            bail!("Not found: {}", path.display());
        }
        Ok(FetchedMedia {
            path,
            temporary: false,
        })
    }
}

fn file_to_candidate(path: &Path) -> Result<CandidateItem> {
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("Failed to stat {}", path.display()))?;
    let modified: DateTime<Utc> = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());

    Ok(CandidateItem {
        id: local_id(path, modified.timestamp_nanos_opt().unwrap_or_default()),
        description: String::new(),
        media_locator: path.display().to_string(),
        created_at: modified,
    })
}

/// Short stable id for a local file version.
fn local_id(path: &Path, mtime_nanos: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    hasher.update(mtime_nanos.to_le_bytes());
    format!("local-{}", &hex::encode(hasher.finalize())[..32])
}
