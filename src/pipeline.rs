//! Per-cycle pipeline orchestration.
//!
//! One cycle walks a fixed sequence of states and never goes back:
//!
//! ```text
//! Acquire → Select → Download → Fingerprint-gate → Transform & Publish → Record & Cleanup
//!    │         │                      │
//!    └─────────┴── no candidates      └── duplicate content
//! ```
//!
//! Downloads and publishes run under the retry executor. Transcoding runs
//! exactly once: a bad input or plan ends the cycle instead of being
//! retried. Any failure after a candidate is selected is written to history
//! under the candidate's id.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::dedup::{fingerprint_file, DuplicateStore};
use crate::error::PipelineError;
use crate::models::{CandidateItem, CycleOutcome, ProcessedRecord};
use crate::retry::{self, RetryPolicy};
use crate::traits::{ContentSource, PublishOptions, PublishTarget, Transcoder};
use crate::transform::{build_caption, build_transform_plan};

pub struct PipelineOrchestrator {
    config: Arc<Config>,
    store: Arc<DuplicateStore>,
    transcoder: Arc<dyn Transcoder>,
    target: Arc<dyn PublishTarget>,
}

/// Local files produced during a cycle.
#[derive(Debug, Default)]
struct Artifacts {
    download: Option<PathBuf>,
    output: Option<PathBuf>,
}

impl PipelineOrchestrator {
    pub fn new(
        config: Arc<Config>,
        store: Arc<DuplicateStore>,
        transcoder: Arc<dyn Transcoder>,
        target: Arc<dyn PublishTarget>,
    ) -> Self {
        Self {
            config,
            store,
            transcoder,
            target,
        }
    }

    /// Run one cycle against `source`.
    ///
    /// Returns `Err` only when nothing was selected yet (acquisition or
    /// history lookup failed); later failures are recorded and reported as
    /// [`CycleOutcome::Failure`].
    pub async fn run_cycle(&self, source: &dyn ContentSource) -> Result<CycleOutcome, PipelineError> {
        // Acquire
        let candidates = source
            .list_candidates()
            .await
            .map_err(PipelineError::Acquisition)?;
        if candidates.is_empty() {
            info!(source = source.tag(), "No candidates available");
            return Ok(CycleOutcome::SkippedNoCandidates);
        }

        // Select
        let total = candidates.len();
        let mut fresh = Vec::with_capacity(total);
        for candidate in candidates {
            let seen = self
                .store
                .is_duplicate(Some(&candidate.id), None)
                .await
                .map_err(PipelineError::Storage)?;
            if !seen {
                fresh.push(candidate);
            }
        }
        if fresh.is_empty() {
            info!(source = source.tag(), total, "All candidates already published");
            return Ok(CycleOutcome::SkippedNoCandidates);
        }
        let selected = fresh.swap_remove(pick_index(fresh.len()));
        info!(
            source = source.tag(),
            id = %selected.id,
            fresh = fresh.len() + 1,
            total,
            "Selected candidate"
        );

        let mut artifacts = Artifacts::default();
        let outcome = match self.process(source, &selected, &mut artifacts).await {
            Ok(Some(record)) => {
                info!(id = %record.id, "Published");
                CycleOutcome::Success(record)
            }
            Ok(None) => {
                info!(id = %selected.id, "Content already published under another id");
                CycleOutcome::SkippedDuplicate
            }
            Err(e) => {
                warn!(id = %selected.id, error = %e, "Cycle failed");
                if let Err(store_err) = self
                    .store
                    .register_failure(&selected.id, source.tag(), &e.detail())
                    .await
                {
                    error!(id = %selected.id, error = %store_err, "Failed to record failure");
                }
                CycleOutcome::Failure(e)
            }
        };

        if self.config.cleanup.after_publish {
            cleanup(&artifacts).await;
        }

        Ok(outcome)
    }

    /// Download through record. `Ok(None)` means duplicate content.
    async fn process(
        &self,
        source: &dyn ContentSource,
        candidate: &CandidateItem,
        artifacts: &mut Artifacts,
    ) -> Result<Option<ProcessedRecord>, PipelineError> {
        let policy = RetryPolicy::from_config(&self.config.retry);

        // Download
        let fetched = retry::execute("download", &policy, || source.fetch_media(candidate))
            .await
            .map_err(PipelineError::Download)?;
        if fetched.temporary {
            artifacts.download = Some(fetched.path.clone());
        }
        debug!(id = %candidate.id, path = %fetched.path.display(), "Media fetched");

        // Fingerprint-gate
        let source_fp = fingerprint_file(&fetched.path).await;
        if let Some(fp) = &source_fp {
            let seen = self
                .store
                .is_duplicate(None, Some(fp))
                .await
                .map_err(PipelineError::Storage)?;
            if seen {
                return Ok(None);
            }
        }

        // Transform
        let plan = build_transform_plan(&self.config);
        let file_name = fetched
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("{}.mp4", candidate.id));
        let output = self
            .config
            .paths
            .output_dir
            .join(format!("processed_{}", file_name));
        artifacts.output = Some(output.clone());

        debug!(id = %candidate.id, ?plan, "Transcoding");
        self.transcoder
            .transcode(&plan, &fetched.path, &output)
            .await
            .map_err(PipelineError::Transform)?;
        let content_fp = fingerprint_file(&output).await;

        // Publish
        let caption = build_caption(
            &self.config.caption.template,
            &self.config.caption.hashtags,
            Some(&candidate.description),
        );
        let options = PublishOptions::from_config(&self.config.publish);
        let target = self.target.as_ref();
        let (output_ref, caption_ref, options_ref) = (output.as_path(), caption.as_str(), &options);
        let post = retry::execute("publish", &policy, || async move {
            let session = target.authenticate().await?;
            target
                .publish(&session, output_ref, caption_ref, options_ref)
                .await
        })
        .await
        .map_err(PipelineError::Publish)?;
        info!(id = %candidate.id, post_id = %post.post_id, target = target.name(), "Post created");

        // Record
        let record = self
            .store
            .register_success(
                &candidate.id,
                content_fp.as_deref(),
                source_fp.as_deref(),
                source.tag(),
                &caption,
            )
            .await
            .map_err(PipelineError::Storage)?;

        Ok(Some(record))
    }
}

/// Uniform index in `0..len`. `len` must be non-zero.
fn pick_index(len: usize) -> usize {
    (rand::random::<u64>() % len as u64) as usize
}

async fn cleanup(artifacts: &Artifacts) {
    for path in [&artifacts.download, &artifacts.output].into_iter().flatten() {
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!(path = %path.display(), "Removed artifact"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove artifact"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_index_in_range() {
        for len in 1..20 {
            for _ in 0..50 {
                assert!(pick_index(len) < len);
            }
        }
    }

    #[test]
    fn test_pick_index_reaches_every_slot() {
        let mut seen = [false; 4];
        for _ in 0..1000 {
            seen[pick_index(4)] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[tokio::test]
    async fn test_cleanup_ignores_missing_files() {
        let tmp = tempfile::TempDir::new().unwrap();
        let present = tmp.path().join("a.mp4");
        std::fs::write(&present, b"x").unwrap();

        cleanup(&Artifacts {
            download: Some(present.clone()),
            output: Some(tmp.path().join("never-written.mp4")),
        })
        .await;
        assert!(!present.exists());
    }
}
