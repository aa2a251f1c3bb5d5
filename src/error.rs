//! Pipeline error taxonomy.
//!
//! Duplicate skips and resource back-off are outcomes, not errors; see
//! [`CycleOutcome`](crate::models::CycleOutcome) and
//! [`ResourceGate`](crate::resources::ResourceGate).

use thiserror::Error;

/// Maximum length of an error message persisted to history.
pub const MAX_ERROR_DETAIL_CHARS: usize = 500;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// The source could not enumerate candidates.
    #[error("Acquisition failed: {0:#}")]
    Acquisition(anyhow::Error),

    /// Media could not be materialized after all retries.
    #[error("Download failed: {0:#}")]
    Download(anyhow::Error),

    /// The transcoder rejected the plan or the input. Never retried.
    #[error("Transform failed: {0:#}")]
    Transform(anyhow::Error),

    /// The destination rejected the post after all retries.
    #[error("Publish failed: {0:#}")]
    Publish(anyhow::Error),

    #[error("Storage error: {0:#}")]
    Storage(anyhow::Error),

    /// Run setup failed; fatal to the whole run.
    #[error("Bootstrap failed: {0:#}")]
    Bootstrap(anyhow::Error),
}

impl PipelineError {
    /// Rendered message, cut to [`MAX_ERROR_DETAIL_CHARS`] characters.
    pub fn detail(&self) -> String {
        truncate_detail(&self.to_string())
    }
}

/// Truncate on a char boundary so multi-byte text never splits.
pub fn truncate_detail(msg: &str) -> String {
    match msg.char_indices().nth(MAX_ERROR_DETAIL_CHARS) {
        Some((idx, _)) => msg[..idx].to_string(),
        None => msg.to_string(),
    }
}
