//! Core data models used throughout the relay.
//!
//! These types represent the candidates, plans, and history rows that flow
//! through one pipeline cycle.

use chrono::{DateTime, Utc};
use std::fmt;
use std::path::PathBuf;

use crate::error::PipelineError;

/// One piece of content offered by a source for the current cycle.
#[derive(Debug, Clone)]
pub struct CandidateItem {
    pub id: String,
    pub description: String,
    /// URL or local path of the media.
    pub media_locator: String,
    pub created_at: DateTime<Utc>,
}

/// A media file materialized on local storage by a source.
#[derive(Debug, Clone)]
pub struct FetchedMedia {
    pub path: PathBuf,
    /// `true` when the relay created the file and may delete it during cleanup.
    /// User-owned inputs (local mode) are never temporary.
    pub temporary: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    Success,
    Error,
}

impl RecordStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordStatus::Success => "success",
            RecordStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(RecordStatus::Success),
            "error" => Some(RecordStatus::Error),
            _ => None,
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable audit row stored in SQLite.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedRecord {
    pub id: String,
    /// SHA-256 of the published file.
    pub content_fingerprint: Option<String>,
    /// SHA-256 of the acquired input file.
    pub source_fingerprint: Option<String>,
    pub source_tag: String,
    pub caption: Option<String>,
    /// Unix seconds.
    pub recorded_at: i64,
    pub status: RecordStatus,
    pub error_detail: Option<String>,
}

/// Watermark overlay parameters for one transcoding run.
#[derive(Debug, Clone, PartialEq)]
pub struct WatermarkPlan {
    pub path: PathBuf,
    pub x: i64,
    pub y: i64,
    pub opacity: f64,
}

/// Parameters handed to the transcoder for one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformPlan {
    pub width: u32,
    pub height: u32,
    pub enhance: bool,
    pub watermark: Option<WatermarkPlan>,
    pub bitrate: String,
}

/// Result of a successful publish.
#[derive(Debug, Clone)]
pub struct PostResult {
    pub post_id: String,
    pub raw_fields: serde_json::Value,
}

/// Result of one orchestrator pass.
#[derive(Debug)]
pub enum CycleOutcome {
    SkippedNoCandidates,
    SkippedDuplicate,
    Success(ProcessedRecord),
    Failure(PipelineError),
}

impl CycleOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            CycleOutcome::SkippedNoCandidates => "skipped-no-candidates",
            CycleOutcome::SkippedDuplicate => "skipped-duplicate",
            CycleOutcome::Success(_) => "success",
            CycleOutcome::Failure(_) => "failure",
        }
    }
}
