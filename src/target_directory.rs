use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::config::DirectoryTargetConfig;
use crate::models::PostResult;
use crate::traits::{PublishOptions, PublishTarget, Session};

/// Publishes into a local outbox directory.
///
/// Each post is `<post_id>.mp4` plus a `<post_id>.json` sidecar holding the
/// caption and options. Useful for dry runs and for handing files to another
/// uploader.
pub struct DirectoryTarget {
    root: PathBuf,
}

impl DirectoryTarget {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_config(config: &DirectoryTargetConfig) -> Self {
        Self::new(config.path.clone())
    }
}

#[async_trait]
impl PublishTarget for DirectoryTarget {
    fn name(&self) -> &str {
        "directory"
    }

    async fn authenticate(&self) -> Result<Session> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("Failed to create outbox {}", self.root.display()))?;
        Ok(Session {
            token: self.root.display().to_string(),
        })
    }

    async fn publish(
        &self,
        _session: &Session,
        path: &Path,
        caption: &str,
        options: &PublishOptions,
    ) -> Result<PostResult> {
        if !path.exists() {
            bail!("Not found: {}", path.display());
        }

        let post_id = Uuid::new_v4().to_string();
        let media_dest = self.root.join(format!("{}.mp4", post_id));
        tokio::fs::copy(path, &media_dest)
            .await
            .with_context(|| format!("Failed to copy {} into outbox", path.display()))?;

        let sidecar = json!({
            "post_id": post_id,
            "caption": caption,
            "like_and_view_counts_disabled": options.hide_like_counts,
            "disable_comments": options.disable_comments,
            "custom_accessibility_caption": options.alt_text,
            "published_at": Utc::now().to_rfc3339(),
        });
        tokio::fs::write(
            self.root.join(format!("{}.json", post_id)),
            serde_json::to_vec_pretty(&sidecar)?,
        )
        .await?;

        Ok(PostResult {
            post_id,
            raw_fields: sidecar,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_writes_media_and_sidecar() {
        let tmp = tempfile::TempDir::new().unwrap();
        let media = tmp.path().join("processed.mp4");
        std::fs::write(&media, b"video").unwrap();

        let target = DirectoryTarget::new(tmp.path().join("outbox"));
        let session = target.authenticate().await.unwrap();
        let options = PublishOptions {
            hide_like_counts: true,
            disable_comments: false,
            alt_text: Some("alt".to_string()),
        };
        let post = target
            .publish(&session, &media, "caption #tag", &options)
            .await
            .unwrap();

        let outbox = tmp.path().join("outbox");
        assert!(outbox.join(format!("{}.mp4", post.post_id)).exists());
        let sidecar: serde_json::Value = serde_json::from_slice(
            &std::fs::read(outbox.join(format!("{}.json", post.post_id))).unwrap(),
        )
        .unwrap();
        assert_eq!(sidecar["caption"], "caption #tag");
        assert_eq!(sidecar["custom_accessibility_caption"], "alt");
        assert_eq!(sidecar["disable_comments"], false);
    }

    #[tokio::test]
    async fn test_publish_missing_file_fails() {
        let tmp = tempfile::TempDir::new().unwrap();
        let target = DirectoryTarget::new(tmp.path().join("outbox"));
        let session = target.authenticate().await.unwrap();
        let err = target
            .publish(
                &session,
                &tmp.path().join("missing.mp4"),
                "c",
                &PublishOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Not found"));
    }
}
