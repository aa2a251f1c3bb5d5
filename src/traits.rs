//! Collaborator traits the pipeline drives.
//!
//! The orchestrator never talks to a concrete platform or tool. It sees three
//! seams:
//!
//! ```text
//!  ┌───────────────┐    ┌──────────────────────┐    ┌───────────────┐
//!  │ ContentSource │──▶ │ PipelineOrchestrator │ ──▶│ PublishTarget │
//!  │ feed / local  │    │                      │    │ dir / http    │
//!  └───────────────┘    └──────────┬───────────┘    └───────────────┘
//!                                  ▼
//!                          ┌──────────────┐
//!                          │  Transcoder  │
//!                          │   (ffmpeg)   │
//!                          └──────────────┘
//! ```
//!
//! Built-in implementations live in [`crate::source_feed`],
//! [`crate::source_local`], [`crate::target_directory`],
//! [`crate::target_http`], and [`crate::transcoder`]. Hosts embedding the
//! library can supply their own.
//!
//! # Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use anyhow::Result;
//! use reel_relay::models::{CandidateItem, FetchedMedia};
//! use reel_relay::traits::ContentSource;
//!
//! pub struct EmptySource;
//!
//! #[async_trait]
//! impl ContentSource for EmptySource {
//!     fn tag(&self) -> &str { "empty" }
//!
//!     async fn list_candidates(&self) -> Result<Vec<CandidateItem>> {
//!         Ok(vec![])
//!     }
//!
//!     async fn fetch_media(&self, candidate: &CandidateItem) -> Result<FetchedMedia> {
//!         anyhow::bail!("nothing to fetch for {}", candidate.id)
//!     }
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

use crate::config::PublishConfig;
use crate::models::{CandidateItem, FetchedMedia, PostResult, TransformPlan};

// ═══════════════════════════════════════════════════════════════════════
// ContentSource
// ═══════════════════════════════════════════════════════════════════════

/// Where candidates come from.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Tag written to the `source_tag` column of history rows.
    fn tag(&self) -> &str;

    /// Enumerate the candidates available this cycle.
    ///
    /// An empty list is a normal outcome; an error means the source itself
    /// could not be reached.
    async fn list_candidates(&self) -> Result<Vec<CandidateItem>>;

    /// Materialize the candidate's media on local storage.
    ///
    /// Called under the retry executor, so implementations should leave no
    /// partial file behind on failure.
    async fn fetch_media(&self, candidate: &CandidateItem) -> Result<FetchedMedia>;
}

// ═══════════════════════════════════════════════════════════════════════
// PublishTarget
// ═══════════════════════════════════════════════════════════════════════

/// Opaque handle returned by [`PublishTarget::authenticate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
}

/// Per-post visibility flags.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PublishOptions {
    pub hide_like_counts: bool,
    pub disable_comments: bool,
    /// Accessibility caption; `None` when alt text is disabled.
    pub alt_text: Option<String>,
}

impl PublishOptions {
    pub fn from_config(config: &PublishConfig) -> Self {
        Self {
            hide_like_counts: config.hide_like_counts,
            disable_comments: config.disable_comments,
            alt_text: config
                .alt_text_enabled
                .then(|| config.alt_text.clone())
                .filter(|t| !t.is_empty()),
        }
    }
}

/// Where processed files are published.
#[async_trait]
pub trait PublishTarget: Send + Sync {
    fn name(&self) -> &str;

    /// Obtain a session. Idempotent: implementations may return a cached one.
    async fn authenticate(&self) -> Result<Session>;

    /// Publish `path` with `caption`. Returns the destination's post id.
    async fn publish(
        &self,
        session: &Session,
        path: &Path,
        caption: &str,
        options: &PublishOptions,
    ) -> Result<PostResult>;
}

// ═══════════════════════════════════════════════════════════════════════
// Transcoder
// ═══════════════════════════════════════════════════════════════════════

/// External transcoding tool.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Verify the tool is installed and runnable.
    async fn check(&self) -> Result<String>;

    /// Run one transcode. `Ok` only if `output` exists and is non-empty.
    async fn transcode(&self, plan: &TransformPlan, input: &Path, output: &Path) -> Result<()>;
}
