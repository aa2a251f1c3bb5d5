use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::transform::Anchor;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub publish: PublishConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub transform: TransformConfig,
    #[serde(default)]
    pub watermark: WatermarkConfig,
    #[serde(default)]
    pub caption: CaptionConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            output_dir: default_output_dir(),
            data_dir: default_data_dir(),
        }
    }
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("processed")
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

/// Which acquisition paths run each iteration.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    #[default]
    Feed,
    Local,
    Both,
}

impl SourceMode {
    pub fn uses_feed(self) -> bool {
        matches!(self, SourceMode::Feed | SourceMode::Both)
    }

    pub fn uses_local(self) -> bool {
        matches!(self, SourceMode::Local | SourceMode::Both)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SourceConfig {
    #[serde(default)]
    pub mode: SourceMode,
    pub feed: Option<FeedSourceConfig>,
    pub local: Option<LocalSourceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeedSourceConfig {
    pub url: String,
    #[serde(default = "default_trending_count")]
    pub count: usize,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_trending_count() -> usize {
    10
}
fn default_language() -> String {
    "es".to_string()
}
fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct LocalSourceConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    #[default]
    Directory,
    Http,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PublishConfig {
    #[serde(default)]
    pub target: TargetKind,
    #[serde(default = "default_true")]
    pub hide_like_counts: bool,
    #[serde(default = "default_true")]
    pub disable_comments: bool,
    #[serde(default = "default_true")]
    pub alt_text_enabled: bool,
    #[serde(default = "default_alt_text")]
    pub alt_text: String,
    pub directory: Option<DirectoryTargetConfig>,
    pub http: Option<HttpTargetConfig>,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            target: TargetKind::Directory,
            hide_like_counts: true,
            disable_comments: true,
            alt_text_enabled: true,
            alt_text: default_alt_text(),
            directory: None,
            http: None,
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_alt_text() -> String {
    "Automatic content".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DirectoryTargetConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpTargetConfig {
    pub base_url: String,
    #[serde(default = "default_username_env")]
    pub username_env: String,
    #[serde(default = "default_password_env")]
    pub password_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_username_env() -> String {
    "RELAY_PUBLISH_USERNAME".to_string()
}
fn default_password_env() -> String {
    "RELAY_PUBLISH_PASSWORD".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base")]
    pub backoff_base: u32,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: u32,
    /// Length of one backoff time unit, in milliseconds.
    #[serde(default = "default_unit_ms")]
    pub unit_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base: default_backoff_base(),
            backoff_multiplier: default_backoff_multiplier(),
            unit_ms: default_unit_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base() -> u32 {
    2
}
fn default_backoff_multiplier() -> u32 {
    1
}
fn default_unit_ms() -> u64 {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub loop_enabled: bool,
    #[serde(default = "default_delay_secs")]
    pub delay_secs: u64,
    #[serde(default = "default_jitter_percent")]
    pub jitter_percent: u64,
    #[serde(default = "default_resource_cooldown_secs")]
    pub resource_cooldown_secs: u64,
    #[serde(default = "default_error_cooldown_secs")]
    pub error_cooldown_secs: u64,
    #[serde(default = "default_tick_millis")]
    pub tick_millis: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            loop_enabled: false,
            delay_secs: default_delay_secs(),
            jitter_percent: default_jitter_percent(),
            resource_cooldown_secs: default_resource_cooldown_secs(),
            error_cooldown_secs: default_error_cooldown_secs(),
            tick_millis: default_tick_millis(),
        }
    }
}

fn default_delay_secs() -> u64 {
    1800
}
fn default_jitter_percent() -> u64 {
    10
}
fn default_resource_cooldown_secs() -> u64 {
    300
}
fn default_error_cooldown_secs() -> u64 {
    60
}
fn default_tick_millis() -> u64 {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct TransformConfig {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_bitrate")]
    pub bitrate: String,
    #[serde(default = "default_true")]
    pub enhance: bool,
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            bitrate: default_bitrate(),
            enhance: true,
            ffmpeg_path: default_ffmpeg_path(),
        }
    }
}

fn default_width() -> u32 {
    720
}
fn default_height() -> u32 {
    1280
}
fn default_bitrate() -> String {
    "2500k".to_string()
}
fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct WatermarkConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Two-letter compass code (`TL`, `CC`, `BR`, ...). Ignored when both
    /// `x` and `y` are set.
    #[serde(default = "default_anchor")]
    pub anchor: String,
    pub x: Option<i64>,
    pub y: Option<i64>,
    #[serde(default = "default_opacity")]
    pub opacity: f64,
    #[serde(default = "default_padding")]
    pub padding: i64,
    #[serde(default = "default_logo_size")]
    pub logo_width: u32,
    #[serde(default = "default_logo_size")]
    pub logo_height: u32,
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
            anchor: default_anchor(),
            x: None,
            y: None,
            opacity: default_opacity(),
            padding: default_padding(),
            logo_width: default_logo_size(),
            logo_height: default_logo_size(),
        }
    }
}

fn default_anchor() -> String {
    "TL".to_string()
}
fn default_opacity() -> f64 {
    0.7
}
fn default_padding() -> i64 {
    30
}
fn default_logo_size() -> u32 {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct CaptionConfig {
    #[serde(default = "default_caption_template")]
    pub template: String,
    #[serde(default = "default_hashtags")]
    pub hashtags: String,
}

impl Default for CaptionConfig {
    fn default() -> Self {
        Self {
            template: default_caption_template(),
            hashtags: default_hashtags(),
        }
    }
}

fn default_caption_template() -> String {
    "| {desc}".to_string()
}
fn default_hashtags() -> String {
    "#reels #viral #trending".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DedupConfig {
    #[serde(default = "default_window_hours")]
    pub window_hours: i64,
    #[serde(default = "default_max_history_items")]
    pub max_history_items: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window_hours: default_window_hours(),
            max_history_items: default_max_history_items(),
        }
    }
}

fn default_window_hours() -> i64 {
    72
}
fn default_max_history_items() -> usize {
    5000
}

#[derive(Debug, Deserialize, Clone)]
pub struct CleanupConfig {
    #[serde(default = "default_true")]
    pub after_publish: bool,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            after_publish: true,
        }
    }
}

impl Config {
    /// A config with every section defaulted, rooted at `root`.
    ///
    /// Used by tests and by hosts that build the config programmatically.
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            db: DbConfig {
                path: root.join("data").join("relay.sqlite"),
            },
            paths: PathsConfig {
                download_dir: root.join("downloads"),
                output_dir: root.join("processed"),
                data_dir: root.join("data"),
            },
            source: SourceConfig::default(),
            publish: PublishConfig::default(),
            retry: RetryConfig::default(),
            schedule: ScheduleConfig::default(),
            transform: TransformConfig::default(),
            watermark: WatermarkConfig::default(),
            caption: CaptionConfig::default(),
            dedup: DedupConfig::default(),
            cleanup: CleanupConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

/// Upper bound for any schedule delay or cool-down.
pub const MAX_SCHEDULE_SECS: u64 = 365 * 24 * 3600;

/// Ten years.
pub const MAX_WINDOW_HOURS: i64 = 10 * 365 * 24;

pub fn validate(config: &Config) -> Result<()> {
    // Validate transform
    if config.transform.width == 0 || config.transform.height == 0 {
        anyhow::bail!("transform.width and transform.height must be > 0");
    }
    if config.transform.bitrate.trim().is_empty() {
        anyhow::bail!("transform.bitrate must not be empty");
    }

    // Validate retry
    if config.retry.max_attempts == 0 {
        anyhow::bail!("retry.max_attempts must be >= 1");
    }

    // Validate schedule
    if config.schedule.jitter_percent > 100 {
        anyhow::bail!("schedule.jitter_percent must be in [0, 100]");
    }
    if config.schedule.tick_millis == 0 {
        anyhow::bail!("schedule.tick_millis must be > 0");
    }
    for (name, secs) in [
        ("schedule.delay_secs", config.schedule.delay_secs),
        ("schedule.error_cooldown_secs", config.schedule.error_cooldown_secs),
        ("schedule.resource_cooldown_secs", config.schedule.resource_cooldown_secs),
    ] {
        if secs > MAX_SCHEDULE_SECS {
            anyhow::bail!("{} must be <= {} (one year)", name, MAX_SCHEDULE_SECS);
        }
    }

    // Validate watermark
    if !(0.0..=1.0).contains(&config.watermark.opacity) {
        anyhow::bail!("watermark.opacity must be in [0.0, 1.0]");
    }
    if config.watermark.anchor.parse::<Anchor>().is_err() {
        anyhow::bail!(
            "Unknown watermark anchor: '{}'. Must be one of TL, TC, TR, CL, CC, CR, BL, BC, BR.",
            config.watermark.anchor
        );
    }

    // Validate dedup
    if !(0..=MAX_WINDOW_HOURS).contains(&config.dedup.window_hours) {
        anyhow::bail!("dedup.window_hours must be in [0, {}]", MAX_WINDOW_HOURS);
    }
    if config.dedup.max_history_items == 0 {
        anyhow::bail!("dedup.max_history_items must be > 0");
    }

    // Validate sources
    if config.source.mode.uses_feed() && config.source.feed.is_none() {
        anyhow::bail!("source.mode requires a [source.feed] section");
    }
    if config.source.mode.uses_local() && config.source.local.is_none() {
        anyhow::bail!("source.mode requires a [source.local] section");
    }

    // Validate publish target
    match config.publish.target {
        TargetKind::Directory if config.publish.directory.is_none() => {
            anyhow::bail!("publish.target = \"directory\" requires a [publish.directory] section")
        }
        TargetKind::Http if config.publish.http.is_none() => {
            anyhow::bail!("publish.target = \"http\" requires a [publish.http] section")
        }
        _ => {}
    }

    Ok(())
}
