//! `ffmpeg` transcoder.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::config::TransformConfig;
use crate::models::TransformPlan;
use crate::traits::Transcoder;
use crate::transform::ffmpeg_args;

pub struct FfmpegTranscoder {
    program: String,
}

impl FfmpegTranscoder {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn from_config(config: &TransformConfig) -> Self {
        Self::new(config.ffmpeg_path.clone())
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn check(&self) -> Result<String> {
        let output = Command::new(&self.program)
            .arg("-version")
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("Transcoder '{}' is not runnable", self.program))?;

        if !output.status.success() {
            bail!(
                "Transcoder '{}' exited with {}",
                self.program,
                output.status
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().next().unwrap_or_default().to_string())
    }

    async fn transcode(&self, plan: &TransformPlan, input: &Path, output: &Path) -> Result<()> {
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let args = ffmpeg_args(plan, input, output);
        debug!("{} args: {:?}", self.program, args);

        let result = Command::new(&self.program)
            .args(&args)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("Failed to spawn '{}'", self.program))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            bail!(
                "{} exited with {}: {}",
                self.program,
                result.status,
                stderr.trim()
            );
        }

        let size = tokio::fs::metadata(output)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        if size == 0 {
            bail!(
                "{} reported success but produced no output at {}",
                self.program,
                output.display()
            );
        }

        Ok(())
    }
}
