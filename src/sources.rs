//! Wiring from configuration to adapters, plus the `relay check` report.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::config::{Config, TargetKind};
use crate::resources::ResourceGate;
use crate::source_feed::HttpFeedSource;
use crate::source_local::LocalFileSource;
use crate::target_directory::DirectoryTarget;
use crate::target_http::HttpTarget;
use crate::traits::{ContentSource, PublishTarget, Transcoder};
use crate::transcoder::FfmpegTranscoder;

/// Sources enabled by `source.mode`, feed first.
pub fn build_sources(config: &Config) -> Result<Vec<Arc<dyn ContentSource>>> {
    let mut sources: Vec<Arc<dyn ContentSource>> = Vec::new();

    if config.source.mode.uses_feed() {
        let feed = config
            .source
            .feed
            .as_ref()
            .context("source.mode requires a [source.feed] section")?;
        sources.push(Arc::new(HttpFeedSource::new(
            feed,
            &config.paths.download_dir,
        )?));
    }

    if config.source.mode.uses_local() {
        let local = config
            .source
            .local
            .as_ref()
            .context("source.mode requires a [source.local] section")?;
        sources.push(Arc::new(LocalFileSource::from_config(local)));
    }

    Ok(sources)
}

pub fn build_target(config: &Config) -> Result<Arc<dyn PublishTarget>> {
    match config.publish.target {
        TargetKind::Directory => {
            let dir = config
                .publish
                .directory
                .as_ref()
                .context("publish.target = \"directory\" requires a [publish.directory] section")?;
            Ok(Arc::new(DirectoryTarget::from_config(dir)))
        }
        TargetKind::Http => {
            let http = config
                .publish
                .http
                .as_ref()
                .context("publish.target = \"http\" requires a [publish.http] section")?;
            Ok(Arc::new(HttpTarget::new(http, &config.paths.data_dir)?))
        }
    }
}

pub fn build_transcoder(config: &Config) -> Arc<dyn Transcoder> {
    Arc::new(FfmpegTranscoder::from_config(&config.transform))
}

/// Print the health of every configured component. Never authenticates.
pub async fn run_check(config: &Config) -> Result<()> {
    println!("{:<16} {:<12} DETAIL", "COMPONENT", "STATUS");

    let transcoder = build_transcoder(config);
    match transcoder.check().await {
        Ok(version) => println!("{:<16} {:<12} {}", "transcoder", "OK", version),
        Err(e) => println!("{:<16} {:<12} {:#}", "transcoder", "MISSING", e),
    }

    if config.source.mode.uses_feed() {
        match &config.source.feed {
            Some(feed) => println!("{:<16} {:<12} {}", "feed", "CONFIGURED", feed.url),
            None => println!("{:<16} {:<12}", "feed", "NOT CONFIGURED"),
        }
    }
    if config.source.mode.uses_local() {
        match &config.source.local {
            Some(local) if local.path.is_file() => {
                println!("{:<16} {:<12} {}", "local", "OK", local.path.display())
            }
            Some(local) => println!(
                "{:<16} {:<12} {} does not exist",
                "local",
                "MISSING",
                local.path.display()
            ),
            None => println!("{:<16} {:<12}", "local", "NOT CONFIGURED"),
        }
    }

    match build_target(config) {
        Ok(target) => println!("{:<16} {:<12} {}", "target", "CONFIGURED", target.name()),
        Err(e) => println!("{:<16} {:<12} {:#}", "target", "INVALID", e),
    }

    let gate = ResourceGate::system(&config.paths.output_dir);
    let reading = gate.read().await;
    println!(
        "{:<16} {:<12} cpu {} / memory {} / disk {}",
        "resources",
        "SAMPLED",
        format_percent(reading.cpu),
        format_percent(reading.memory),
        format_percent(reading.disk)
    );
    let verdict = if gate.allow_work().await { "OPEN" } else { "CLOSED" };
    println!("{:<16} {:<12}", "gate", verdict);

    Ok(())
}

fn format_percent(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.1}%", v),
        None => "n/a".to_string(),
    }
}
