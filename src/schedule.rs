//! Long-running schedule loop.
//!
//! ```text
//! bootstrap ─▶ ┌─────────────────────────────────────────────┐
//!              │ snapshot config                              │
//!              │ resource gate ── denied ─▶ cool-down ──┐     │
//!              │ cycle per source                       │     │
//!              │ error? ─▶ error cool-down ─────────────┤     │
//!              │ jittered delay ────────────────────────┘     │
//!              └──────────── until cancelled ────────────────┘
//! ```
//!
//! Configuration is read once per iteration from a [`watch`] channel, so a
//! reload takes effect on the next iteration without touching the one in
//! flight. Every sleep is sliced into `tick_millis` increments and stops
//! promptly when the [`CancellationToken`] fires.

use anyhow::Context;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::dedup::DuplicateStore;
use crate::error::PipelineError;
use crate::models::CycleOutcome;
use crate::pipeline::PipelineOrchestrator;
use crate::resources::ResourceGate;
use crate::retry::{self, RetryPolicy};
use crate::traits::{ContentSource, PublishTarget, Transcoder};

/// Tag written to history for iterations that fail outside a cycle.
pub const SCHEDULER_TAG: &str = "scheduler";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Stopped,
}

impl RunState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => RunState::Running,
            2 => RunState::Stopped,
            _ => RunState::Idle,
        }
    }
}

/// Counters shared between the loop and whoever watches it.
#[derive(Debug, Default)]
pub struct RunStats {
    state: AtomicU8,
    iterations: AtomicU64,
    successes: AtomicU64,
    skips: AtomicU64,
    errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSnapshot {
    pub state: RunState,
    pub iterations: u64,
    pub successes: u64,
    pub skips: u64,
    pub errors: u64,
}

impl RunStats {
    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            state: RunState::from_u8(self.state.load(Ordering::Relaxed)),
            iterations: self.iterations.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            skips: self.skips.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    fn set_state(&self, state: RunState) {
        let v = match state {
            RunState::Idle => 0,
            RunState::Running => 1,
            RunState::Stopped => 2,
        };
        self.state.store(v, Ordering::Relaxed);
    }
}

pub struct ScheduleLoop {
    config: Arc<watch::Sender<Arc<Config>>>,
    store: Arc<DuplicateStore>,
    sources: Vec<Arc<dyn ContentSource>>,
    transcoder: Arc<dyn Transcoder>,
    target: Arc<dyn PublishTarget>,
    gate: ResourceGate,
    stats: Arc<RunStats>,
}

impl ScheduleLoop {
    pub fn new(
        config: Config,
        store: Arc<DuplicateStore>,
        sources: Vec<Arc<dyn ContentSource>>,
        transcoder: Arc<dyn Transcoder>,
        target: Arc<dyn PublishTarget>,
        gate: ResourceGate,
    ) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(config));
        Self {
            config: Arc::new(tx),
            store,
            sources,
            transcoder,
            target,
            gate,
            stats: Arc::new(RunStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<RunStats> {
        self.stats.clone()
    }

    /// Handle for swapping the configuration between iterations.
    pub fn config_handle(&self) -> ConfigHandle {
        ConfigHandle {
            tx: self.config.clone(),
        }
    }

    /// Create working directories, verify the transcoder, and authenticate
    /// once. Any failure aborts the run.
    pub async fn bootstrap(&self) -> Result<(), PipelineError> {
        let config = self.config.borrow().clone();

        for dir in [
            &config.paths.download_dir,
            &config.paths.output_dir,
            &config.paths.data_dir,
        ] {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create {}", dir.display()))
                .map_err(PipelineError::Bootstrap)?;
        }

        let version = self
            .transcoder
            .check()
            .await
            .map_err(PipelineError::Bootstrap)?;
        info!(transcoder = %version, "Transcoder available");

        let policy = RetryPolicy::from_config(&config.retry);
        let target = self.target.as_ref();
        retry::execute("authenticate", &policy, || target.authenticate())
            .await
            .map_err(PipelineError::Bootstrap)?;
        info!(target = target.name(), "Publish target ready");

        Ok(())
    }

    /// Bootstrap, then iterate until cancelled (or once, when the loop is
    /// disabled).
    pub async fn run(&self, token: CancellationToken) -> Result<(), PipelineError> {
        self.stats.set_state(RunState::Running);
        let result = self.run_inner(&token).await;
        self.stats.set_state(RunState::Stopped);
        result
    }

    async fn run_inner(&self, token: &CancellationToken) -> Result<(), PipelineError> {
        self.bootstrap().await?;

        let mut iteration: u64 = 0;
        while !token.is_cancelled() {
            let config = self.config.borrow().clone();
            let tick = Duration::from_millis(config.schedule.tick_millis);

            if !self.gate.allow_work().await {
                let cooldown = Duration::from_secs(config.schedule.resource_cooldown_secs);
                info!(cooldown_secs = cooldown.as_secs(), "Resources constrained, backing off");
                if !sleep_cancellable(cooldown, tick, token).await {
                    break;
                }
                continue;
            }

            iteration += 1;
            self.stats.iterations.fetch_add(1, Ordering::Relaxed);
            info!(iteration, "Starting iteration");

            let had_error = self.run_iteration(iteration, config.clone(), token).await;

            if !config.schedule.loop_enabled {
                break;
            }

            let pause = if had_error {
                let cooldown = Duration::from_secs(config.schedule.error_cooldown_secs);
                warn!(cooldown_secs = cooldown.as_secs(), "Iteration had errors, cooling down");
                cooldown
            } else {
                let secs = jittered_delay(config.schedule.delay_secs, config.schedule.jitter_percent);
                info!(delay_secs = secs, "Next iteration scheduled");
                Duration::from_secs(secs)
            };
            if !sleep_cancellable(pause, tick, token).await {
                break;
            }
        }

        info!(iterations = iteration, "Schedule loop stopped");
        Ok(())
    }

    /// One cycle per source. Returns true if any cycle failed.
    async fn run_iteration(
        &self,
        iteration: u64,
        config: Arc<Config>,
        token: &CancellationToken,
    ) -> bool {
        let orchestrator = PipelineOrchestrator::new(
            config,
            self.store.clone(),
            self.transcoder.clone(),
            self.target.clone(),
        );

        let mut had_error = false;
        for source in &self.sources {
            if token.is_cancelled() {
                break;
            }
            match orchestrator.run_cycle(source.as_ref()).await {
                Ok(CycleOutcome::Success(record)) => {
                    self.stats.successes.fetch_add(1, Ordering::Relaxed);
                    info!(source = source.tag(), id = %record.id, "Cycle succeeded");
                }
                Ok(outcome @ (CycleOutcome::SkippedNoCandidates | CycleOutcome::SkippedDuplicate)) => {
                    self.stats.skips.fetch_add(1, Ordering::Relaxed);
                    info!(source = source.tag(), outcome = outcome.label(), "Cycle skipped");
                }
                Ok(CycleOutcome::Failure(e)) => {
                    self.stats.errors.fetch_add(1, Ordering::Relaxed);
                    had_error = true;
                    warn!(source = source.tag(), error = %e, "Cycle failed");
                }
                Err(e) => {
                    self.stats.errors.fetch_add(1, Ordering::Relaxed);
                    had_error = true;
                    error!(source = source.tag(), error = %e, "Iteration error");
                    let id = format!("iter_{}", iteration);
                    if let Err(store_err) = self
                        .store
                        .register_failure(&id, SCHEDULER_TAG, &e.detail())
                        .await
                    {
                        error!(error = %store_err, "Failed to record iteration error");
                    }
                }
            }
        }
        had_error
    }
}

/// Swaps the configuration seen by a running [`ScheduleLoop`].
#[derive(Clone)]
pub struct ConfigHandle {
    tx: Arc<watch::Sender<Arc<Config>>>,
}

impl ConfigHandle {
    pub fn replace(&self, config: Config) {
        self.tx.send_replace(Arc::new(config));
    }

    pub fn current(&self) -> Arc<Config> {
        self.tx.borrow().clone()
    }
}

/// Owns a spawned [`ScheduleLoop`] task.
pub struct RunController {
    token: CancellationToken,
    stats: Arc<RunStats>,
    config: ConfigHandle,
    handle: JoinHandle<Result<(), PipelineError>>,
}

impl RunController {
    pub fn start(schedule: ScheduleLoop) -> Self {
        let token = CancellationToken::new();
        let stats = schedule.stats();
        let config = schedule.config_handle();
        let child = token.clone();
        let handle = tokio::spawn(async move { schedule.run(child).await });
        Self {
            token,
            stats,
            config,
            handle,
        }
    }

    /// Request a stop. Takes effect at the next cancellation check.
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn snapshot(&self) -> RunSnapshot {
        self.stats.snapshot()
    }

    pub fn reload(&self, config: Config) {
        self.config.replace(config);
    }

    pub fn config_handle(&self) -> ConfigHandle {
        self.config.clone()
    }

    /// Token that stops the loop when cancelled.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the loop to exit and return the final counters.
    pub async fn join(self) -> Result<RunSnapshot, PipelineError> {
        match self.handle.await {
            Ok(result) => result.map(|()| self.stats.snapshot()),
            Err(e) => Err(PipelineError::Bootstrap(anyhow::anyhow!(
                "Schedule task panicked: {}",
                e
            ))),
        }
    }
}

/// `base` seconds, moved by a uniform integer offset within
/// `±base * jitter_percent / 100`.
pub fn jittered_delay(base_secs: u64, jitter_percent: u64) -> u64 {
    let jitter = base_secs.saturating_mul(jitter_percent) / 100;
    let low = base_secs - jitter.min(base_secs);
    let span = jitter * 2 + 1;
    low + rand::random::<u64>() % span
}

/// Sleep `total` in `tick` slices. Returns false if cancelled first.
pub async fn sleep_cancellable(total: Duration, tick: Duration, token: &CancellationToken) -> bool {
    let Some(deadline) = Instant::now().checked_add(total) else {
        // Past the clock's range: only cancellation ends it.
        token.cancelled().await;
        return false;
    };
    loop {
        if token.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        let step = tick.min(deadline - now);
        tokio::select! {
            _ = token.cancelled() => return false,
            _ = tokio::time::sleep(step) => {}
        }
    }
}
