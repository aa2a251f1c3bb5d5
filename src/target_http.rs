//! HTTP publish target with a cached login session.
//!
//! # Protocol
//!
//! - `POST <base_url>/auth/login` with `{"username", "password"}` returns
//!   `{"token": "..."}`.
//! - `POST <base_url>/media` (multipart, bearer token) with a `video` file
//!   part and `caption`, `like_and_view_counts_disabled`,
//!   `disable_comments`, and optional `custom_accessibility_caption` fields
//!   returns the created post as JSON with an `id`, `post_id`, or `pk` key.
//!
//! The session token is cached in memory and in `<data_dir>/session.json`
//! so restarts reuse it. A `401` drops both copies; the next attempt logs in
//! again.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use crate::config::HttpTargetConfig;
use crate::models::PostResult;
use crate::traits::{PublishOptions, PublishTarget, Session};

const SESSION_FILE: &str = "session.json";

#[derive(Debug, Serialize, Deserialize)]
struct StoredSession {
    token: String,
    created_at: i64,
}

pub struct HttpTarget {
    client: reqwest::Client,
    base_url: String,
    username_env: String,
    password_env: String,
    session_path: PathBuf,
    cached: Mutex<Option<Session>>,
}

impl HttpTarget {
    pub fn new(config: &HttpTargetConfig, data_dir: &Path) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            username_env: config.username_env.clone(),
            password_env: config.password_env.clone(),
            session_path: data_dir.join(SESSION_FILE),
            cached: Mutex::new(None),
        })
    }

    async fn login(&self) -> Result<Session> {
        let username = std::env::var(&self.username_env)
            .map_err(|_| anyhow::anyhow!("{} not set", self.username_env))?;
        let password = std::env::var(&self.password_env)
            .map_err(|_| anyhow::anyhow!("{} not set", self.password_env))?;

        let response = self
            .client
            .post(format!("{}/auth/login", self.base_url))
            .json(&serde_json::json!({ "username": username, "password": password }))
            .send()
            .await
            .context("Login request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Login rejected {}: {}", status, body);
        }

        let json: Value = response.json().await?;
        let token = json
            .get("token")
            .and_then(|t| t.as_str())
            .ok_or_else(|| anyhow::anyhow!("Invalid login response: missing token"))?;

        info!(target_url = %self.base_url, "Logged in to publish target");
        Ok(Session {
            token: token.to_string(),
        })
    }

    async fn invalidate(&self) {
        *self.cached.lock().await = None;
        if let Err(e) = tokio::fs::remove_file(&self.session_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(error = %e, "Failed to remove cached session");
            }
        }
    }
}

#[async_trait]
impl PublishTarget for HttpTarget {
    fn name(&self) -> &str {
        "http"
    }

    async fn authenticate(&self) -> Result<Session> {
        let mut cached = self.cached.lock().await;
        if let Some(session) = cached.as_ref() {
            return Ok(session.clone());
        }

        if let Some(session) = load_session(&self.session_path).await {
            debug!("Reusing stored session");
            *cached = Some(session.clone());
            return Ok(session);
        }

        let session = self.login().await?;
        save_session(&self.session_path, &session).await?;
        *cached = Some(session.clone());
        Ok(session)
    }

    async fn publish(
        &self,
        session: &Session,
        path: &Path,
        caption: &str,
        options: &PublishOptions,
    ) -> Result<PostResult> {
        if !path.exists() {
            bail!("Not found: {}", path.display());
        }

        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let len = file
            .metadata()
            .await
            .with_context(|| format!("Failed to stat {}", path.display()))?
            .len();
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "video.mp4".to_string());

        let mut form = reqwest::multipart::Form::new()
            .text("caption", caption.to_string())
            .text(
                "like_and_view_counts_disabled",
                flag(options.hide_like_counts),
            )
            .text("disable_comments", flag(options.disable_comments))
            .part(
                "video",
                reqwest::multipart::Part::stream_with_length(body, len)
                    .file_name(file_name)
                    .mime_str("video/mp4")?,
            );
        if let Some(alt) = &options.alt_text {
            form = form.text("custom_accessibility_caption", alt.clone());
        }

        let response = self
            .client
            .post(format!("{}/media", self.base_url))
            .bearer_auth(&session.token)
            .multipart(form)
            .send()
            .await
            .context("Upload request failed")?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            self.invalidate().await;
            bail!("Publish target rejected session (401); will re-authenticate");
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Publish target error {}: {}", status, body);
        }

        let json: Value = response.json().await?;
        parse_post_response(json)
    }
}

fn flag(on: bool) -> String {
    let value = if on { "1" } else { "0" };
    value.to_string()
}

/// Extract the post id from an upload response.
pub fn parse_post_response(json: Value) -> Result<PostResult> {
    let post_id = ["id", "post_id", "pk"]
        .iter()
        .find_map(|key| match json.get(*key) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
        .ok_or_else(|| anyhow::anyhow!("Invalid upload response: missing post id"))?;

    Ok(PostResult {
        post_id,
        raw_fields: json,
    })
}

async fn load_session(path: &Path) -> Option<Session> {
    let bytes = tokio::fs::read(path).await.ok()?;
    match serde_json::from_slice::<StoredSession>(&bytes) {
        Ok(stored) if !stored.token.is_empty() => Some(Session {
            token: stored.token,
        }),
        Ok(_) => None,
        Err(e) => {
            warn!(error = %e, "Ignoring unreadable session file");
            None
        }
    }
}

async fn save_session(path: &Path, session: &Session) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let stored = StoredSession {
        token: session.token.clone(),
        created_at: chrono::Utc::now().timestamp(),
    };
    tokio::fs::write(path, serde_json::to_vec_pretty(&stored)?)
        .await
        .with_context(|| format!("Failed to write session file {}", path.display()))?;
    Ok(())
}
