//! Integration tests for the pipeline and schedule loop.
//!
//! Every collaborator is an in-memory fake implementing the public traits,
//! so these run without ffmpeg or network access.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use reel_relay::config::Config;
use reel_relay::db;
use reel_relay::dedup::DuplicateStore;
use reel_relay::error::PipelineError;
use reel_relay::migrate;
use reel_relay::models::{
    CandidateItem, CycleOutcome, FetchedMedia, PostResult, RecordStatus, TransformPlan,
};
use reel_relay::pipeline::PipelineOrchestrator;
use reel_relay::resources::{ResourceGate, ResourceProbe};
use reel_relay::schedule::{RunController, RunState, ScheduleLoop, SCHEDULER_TAG};
use reel_relay::traits::{ContentSource, PublishOptions, PublishTarget, Session, Transcoder};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

// ─── Fakes ──────────────────────────────────────────────────────────

/// Serves fixed candidates; "downloads" by writing `bytes` into `dir`.
struct FakeSource {
    dir: PathBuf,
    items: Vec<(String, String, Vec<u8>)>, // (id, description, bytes)
    temporary: bool,
    fail_listing: bool,
    listing_failures: AtomicU32,
    fetch_failures: AtomicU32,
    fetches: AtomicU32,
}

impl FakeSource {
    fn new(dir: &Path, items: Vec<(&str, &str, &str)>) -> Self {
        Self {
            dir: dir.to_path_buf(),
            items: items
                .into_iter()
                .map(|(id, desc, bytes)| (id.to_string(), desc.to_string(), bytes.as_bytes().to_vec()))
                .collect(),
            temporary: true,
            fail_listing: false,
            listing_failures: AtomicU32::new(0),
            fetch_failures: AtomicU32::new(0),
            fetches: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl ContentSource for FakeSource {
    fn tag(&self) -> &str {
        "fake"
    }

    async fn list_candidates(&self) -> Result<Vec<CandidateItem>> {
        if self.fail_listing {
            anyhow::bail!("feed unreachable");
        }
        if self.listing_failures.load(Ordering::SeqCst) > 0 {
            self.listing_failures.fetch_sub(1, Ordering::SeqCst);
            anyhow::bail!("feed timed out");
        }
        Ok(self
            .items
            .iter()
            .map(|(id, desc, _)| CandidateItem {
                id: id.clone(),
                description: desc.clone(),
                media_locator: format!("mem://{}", id),
                created_at: Utc::now(),
            })
            .collect())
    }

    async fn fetch_media(&self, candidate: &CandidateItem) -> Result<FetchedMedia> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fetch_failures.load(Ordering::SeqCst) > 0 {
            self.fetch_failures.fetch_sub(1, Ordering::SeqCst);
            anyhow::bail!("connection reset");
        }
        let (_, _, bytes) = self
            .items
            .iter()
            .find(|(id, _, _)| *id == candidate.id)
            .ok_or_else(|| anyhow::anyhow!("unknown id"))?;
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{}.mp4", candidate.id));
        std::fs::write(&path, bytes)?;
        Ok(FetchedMedia {
            path,
            temporary: self.temporary,
        })
    }
}

/// Copies input to output with a marker appended.
#[derive(Default)]
struct FakeTranscoder {
    fail: bool,
    fail_check: bool,
    calls: AtomicU32,
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn check(&self) -> Result<String> {
        if self.fail_check {
            anyhow::bail!("ffmpeg not found");
        }
        Ok("fake 1.0".to_string())
    }

    async fn transcode(&self, _plan: &TransformPlan, input: &Path, output: &Path) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("Invalid data found when processing input");
        }
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut bytes = std::fs::read(input)?;
        bytes.extend_from_slice(b"+encoded");
        std::fs::write(output, bytes)?;
        Ok(())
    }
}

/// Records captions; fails the first `publish_failures` publishes.
#[derive(Default)]
struct FakeTarget {
    publish_failures: AtomicU32,
    auths: AtomicU32,
    captions: Mutex<Vec<String>>,
    published_exists: AtomicBool,
}

#[async_trait]
impl PublishTarget for FakeTarget {
    fn name(&self) -> &str {
        "fake"
    }

    async fn authenticate(&self) -> Result<Session> {
        self.auths.fetch_add(1, Ordering::SeqCst);
        Ok(Session {
            token: "t".to_string(),
        })
    }

    async fn publish(
        &self,
        _session: &Session,
        path: &Path,
        caption: &str,
        _options: &PublishOptions,
    ) -> Result<PostResult> {
        if self.publish_failures.load(Ordering::SeqCst) > 0 {
            self.publish_failures.fetch_sub(1, Ordering::SeqCst);
            anyhow::bail!("503 Service Unavailable");
        }
        self.published_exists.store(path.exists(), Ordering::SeqCst);
        self.captions.lock().unwrap().push(caption.to_string());
        Ok(PostResult {
            post_id: format!("post-{}", self.captions.lock().unwrap().len()),
            raw_fields: serde_json::json!({}),
        })
    }
}

/// Denies work for the first `deny` samples.
struct CountingProbe {
    deny: AtomicU32,
    samples: Arc<AtomicU32>,
}

#[async_trait]
impl ResourceProbe for CountingProbe {
    async fn cpu_percent(&self) -> Result<f64> {
        self.samples.fetch_add(1, Ordering::SeqCst);
        if self.deny.load(Ordering::SeqCst) > 0 {
            self.deny.fetch_sub(1, Ordering::SeqCst);
            return Ok(99.0);
        }
        Ok(10.0)
    }

    async fn memory_percent(&self) -> Result<f64> {
        Ok(10.0)
    }

    async fn disk_percent(&self, _path: &Path) -> Result<f64> {
        Ok(10.0)
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

fn test_config(tmp: &TempDir) -> Config {
    let mut config = Config::rooted_at(tmp.path());
    config.retry.unit_ms = 5;
    config.schedule.tick_millis = 20;
    config.schedule.error_cooldown_secs = 0;
    config.schedule.resource_cooldown_secs = 0;
    config
}

async fn open_store(config: &Config) -> Arc<DuplicateStore> {
    let pool = db::connect(config).await.unwrap();
    migrate::apply(&pool).await.unwrap();
    Arc::new(DuplicateStore::open(pool, &config.dedup).await.unwrap())
}

fn orchestrator(
    config: &Config,
    store: &Arc<DuplicateStore>,
    transcoder: &Arc<FakeTranscoder>,
    target: &Arc<FakeTarget>,
) -> PipelineOrchestrator {
    PipelineOrchestrator::new(
        Arc::new(config.clone()),
        store.clone(),
        transcoder.clone(),
        target.clone(),
    )
}

fn dir_is_empty(path: &Path) -> bool {
    match std::fs::read_dir(path) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => true,
    }
}

// ─── Pipeline ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_cycle_publishes_records_and_cleans_up() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let store = open_store(&config).await;
    let transcoder = Arc::new(FakeTranscoder::default());
    let target = Arc::new(FakeTarget::default());
    let source = FakeSource::new(
        &config.paths.download_dir,
        vec![("v1", "Cat video", "cat-frames")],
    );

    let outcome = orchestrator(&config, &store, &transcoder, &target)
        .run_cycle(&source)
        .await
        .unwrap();

    let record = match outcome {
        CycleOutcome::Success(record) => record,
        other => panic!("expected success, got {:?}", other),
    };
    assert_eq!(record.id, "v1");
    assert_eq!(record.source_tag, "fake");
    assert_eq!(record.status, RecordStatus::Success);
    assert_eq!(
        record.caption.as_deref(),
        Some("| Cat video #reels #viral #trending")
    );
    assert!(record.content_fingerprint.is_some());
    assert!(record.source_fingerprint.is_some());
    assert_ne!(record.content_fingerprint, record.source_fingerprint);

    // The published file existed at publish time and is gone afterwards.
    assert!(target.published_exists.load(Ordering::SeqCst));
    assert!(dir_is_empty(&config.paths.download_dir));
    assert!(dir_is_empty(&config.paths.output_dir));

    let stored = store.get_record("v1").await.unwrap().unwrap();
    assert_eq!(stored, record);
}

#[tokio::test]
async fn test_published_id_is_filtered_next_cycle() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let store = open_store(&config).await;
    let transcoder = Arc::new(FakeTranscoder::default());
    let target = Arc::new(FakeTarget::default());
    let source = FakeSource::new(&config.paths.download_dir, vec![("v1", "", "abc")]);
    let orch = orchestrator(&config, &store, &transcoder, &target);

    assert!(matches!(
        orch.run_cycle(&source).await.unwrap(),
        CycleOutcome::Success(_)
    ));
    assert!(matches!(
        orch.run_cycle(&source).await.unwrap(),
        CycleOutcome::SkippedNoCandidates
    ));
    assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
    assert_eq!(target.captions.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_same_bytes_under_new_id_is_duplicate() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let store = open_store(&config).await;
    let transcoder = Arc::new(FakeTranscoder::default());
    let target = Arc::new(FakeTarget::default());
    let orch = orchestrator(&config, &store, &transcoder, &target);

    let first = FakeSource::new(&config.paths.download_dir, vec![("a", "", "same")]);
    assert!(matches!(
        orch.run_cycle(&first).await.unwrap(),
        CycleOutcome::Success(_)
    ));

    let reupload = FakeSource::new(&config.paths.download_dir, vec![("b", "", "same")]);
    assert!(matches!(
        orch.run_cycle(&reupload).await.unwrap(),
        CycleOutcome::SkippedDuplicate
    ));

    // Skipped before transcoding; the download was cleaned up.
    assert_eq!(transcoder.calls.load(Ordering::SeqCst), 1);
    assert!(dir_is_empty(&config.paths.download_dir));
    assert!(store.get_record("b").await.unwrap().is_none());
}

#[tokio::test]
async fn test_transform_failure_is_recorded_and_not_retried() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let store = open_store(&config).await;
    let transcoder = Arc::new(FakeTranscoder {
        fail: true,
        ..Default::default()
    });
    let target = Arc::new(FakeTarget::default());
    let source = FakeSource::new(&config.paths.download_dir, vec![("bad", "", "junk")]);

    let outcome = orchestrator(&config, &store, &transcoder, &target)
        .run_cycle(&source)
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        CycleOutcome::Failure(PipelineError::Transform(_))
    ));
    assert_eq!(transcoder.calls.load(Ordering::SeqCst), 1);
    assert!(target.captions.lock().unwrap().is_empty());
    assert!(dir_is_empty(&config.paths.download_dir));

    let row = store.get_record("bad").await.unwrap().unwrap();
    assert_eq!(row.status, RecordStatus::Error);
    assert!(row
        .error_detail
        .unwrap()
        .contains("Invalid data found when processing input"));

    // An error row does not block a later attempt.
    assert!(!store.is_duplicate(Some("bad"), None).await.unwrap());
}

#[tokio::test]
async fn test_publish_retries_reauthenticate() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let store = open_store(&config).await;
    let transcoder = Arc::new(FakeTranscoder::default());
    let target = Arc::new(FakeTarget::default());
    target.publish_failures.store(2, Ordering::SeqCst);
    let source = FakeSource::new(&config.paths.download_dir, vec![("v", "", "x")]);

    let outcome = orchestrator(&config, &store, &transcoder, &target)
        .run_cycle(&source)
        .await
        .unwrap();

    assert!(matches!(outcome, CycleOutcome::Success(_)));
    assert_eq!(target.auths.load(Ordering::SeqCst), 3);
    assert_eq!(transcoder.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_publish_exhaustion_records_error() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let store = open_store(&config).await;
    let transcoder = Arc::new(FakeTranscoder::default());
    let target = Arc::new(FakeTarget::default());
    target.publish_failures.store(10, Ordering::SeqCst);
    let source = FakeSource::new(&config.paths.download_dir, vec![("v", "", "x")]);

    let outcome = orchestrator(&config, &store, &transcoder, &target)
        .run_cycle(&source)
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        CycleOutcome::Failure(PipelineError::Publish(_))
    ));
    assert_eq!(target.auths.load(Ordering::SeqCst), 3);
    let row = store.get_record("v").await.unwrap().unwrap();
    assert_eq!(row.status, RecordStatus::Error);
    assert!(row.error_detail.unwrap().contains("503"));
    assert!(dir_is_empty(&config.paths.output_dir));
}

#[tokio::test]
async fn test_download_retries_then_succeeds() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let store = open_store(&config).await;
    let transcoder = Arc::new(FakeTranscoder::default());
    let target = Arc::new(FakeTarget::default());
    let source = FakeSource::new(&config.paths.download_dir, vec![("v", "", "x")]);
    source.fetch_failures.store(2, Ordering::SeqCst);

    let outcome = orchestrator(&config, &store, &transcoder, &target)
        .run_cycle(&source)
        .await
        .unwrap();

    assert!(matches!(outcome, CycleOutcome::Success(_)));
    assert_eq!(source.fetches.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_acquisition_error_writes_nothing() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let store = open_store(&config).await;
    let transcoder = Arc::new(FakeTranscoder::default());
    let target = Arc::new(FakeTarget::default());
    let mut source = FakeSource::new(&config.paths.download_dir, vec![]);
    source.fail_listing = true;

    let result = orchestrator(&config, &store, &transcoder, &target)
        .run_cycle(&source)
        .await;

    assert!(matches!(result, Err(PipelineError::Acquisition(_))));
    assert_eq!(store.stats().await.unwrap().total, 0);
}

#[tokio::test]
async fn test_user_owned_input_survives_cleanup() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let store = open_store(&config).await;
    let transcoder = Arc::new(FakeTranscoder::default());
    let target = Arc::new(FakeTarget::default());
    let mut source = FakeSource::new(&tmp.path().join("mine"), vec![("local-1", "", "home")]);
    source.temporary = false;

    let outcome = orchestrator(&config, &store, &transcoder, &target)
        .run_cycle(&source)
        .await
        .unwrap();

    assert!(matches!(outcome, CycleOutcome::Success(_)));
    assert!(tmp.path().join("mine").join("local-1.mp4").exists());
    assert!(dir_is_empty(&config.paths.output_dir));
}

#[tokio::test]
async fn test_cleanup_disabled_keeps_artifacts() {
    let tmp = TempDir::new().unwrap();
    let mut config = test_config(&tmp);
    config.cleanup.after_publish = false;
    let store = open_store(&config).await;
    let transcoder = Arc::new(FakeTranscoder::default());
    let target = Arc::new(FakeTarget::default());
    let source = FakeSource::new(&config.paths.download_dir, vec![("keep", "", "k")]);

    orchestrator(&config, &store, &transcoder, &target)
        .run_cycle(&source)
        .await
        .unwrap();

    assert!(config.paths.download_dir.join("keep.mp4").exists());
    assert!(config.paths.output_dir.join("processed_keep.mp4").exists());
}

// ─── Schedule loop ──────────────────────────────────────────────────

fn schedule(
    config: Config,
    store: Arc<DuplicateStore>,
    source: FakeSource,
    transcoder: Arc<FakeTranscoder>,
    gate: ResourceGate,
) -> ScheduleLoop {
    ScheduleLoop::new(
        config,
        store,
        vec![Arc::new(source) as Arc<dyn ContentSource>],
        transcoder,
        Arc::new(FakeTarget::default()),
        gate,
    )
}

#[tokio::test]
async fn test_loop_disabled_runs_one_iteration() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let store = open_store(&config).await;
    let source = FakeSource::new(&config.paths.download_dir, vec![("v", "", "x")]);
    let gate = ResourceGate::new(None, tmp.path());

    let controller = RunController::start(schedule(
        config,
        store.clone(),
        source,
        Arc::new(FakeTranscoder::default()),
        gate,
    ));
    let snapshot = controller.join().await.unwrap();

    assert_eq!(snapshot.state, RunState::Stopped);
    assert_eq!(snapshot.iterations, 1);
    assert_eq!(snapshot.successes, 1);
    assert_eq!(snapshot.errors, 0);
    assert!(store.get_record("v").await.unwrap().is_some());
}

#[tokio::test]
async fn test_resource_denial_waits_without_counting_iterations() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let store = open_store(&config).await;
    let source = FakeSource::new(&config.paths.download_dir, vec![("v", "", "x")]);
    let samples = Arc::new(AtomicU32::new(0));
    let gate = ResourceGate::new(
        Some(Box::new(CountingProbe {
            deny: AtomicU32::new(2),
            samples: samples.clone(),
        }) as Box<dyn ResourceProbe>),
        tmp.path(),
    );

    let snapshot = RunController::start(schedule(
        config,
        store,
        source,
        Arc::new(FakeTranscoder::default()),
        gate,
    ))
    .join()
    .await
    .unwrap();

    assert_eq!(samples.load(Ordering::SeqCst), 3);
    assert_eq!(snapshot.iterations, 1);
    assert_eq!(snapshot.successes, 1);
}

#[tokio::test]
async fn test_bootstrap_failure_aborts_run() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let store = open_store(&config).await;
    let source = FakeSource::new(&config.paths.download_dir, vec![("v", "", "x")]);
    let transcoder = Arc::new(FakeTranscoder {
        fail_check: true,
        ..Default::default()
    });

    let controller = RunController::start(schedule(
        config,
        store.clone(),
        source,
        transcoder,
        ResourceGate::new(None, tmp.path()),
    ));
    let result = controller.join().await;

    assert!(matches!(result, Err(PipelineError::Bootstrap(_))));
    assert_eq!(store.stats().await.unwrap().total, 0);
}

#[tokio::test]
async fn test_iteration_error_is_recorded_under_scheduler_tag() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let store = open_store(&config).await;
    let mut source = FakeSource::new(&config.paths.download_dir, vec![]);
    source.fail_listing = true;

    let snapshot = RunController::start(schedule(
        config,
        store.clone(),
        source,
        Arc::new(FakeTranscoder::default()),
        ResourceGate::new(None, tmp.path()),
    ))
    .join()
    .await
    .unwrap();

    assert_eq!(snapshot.errors, 1);
    let row = store.get_record("iter_1").await.unwrap().unwrap();
    assert_eq!(row.source_tag, SCHEDULER_TAG);
    assert_eq!(row.status, RecordStatus::Error);
    assert!(row.error_detail.unwrap().contains("feed unreachable"));
}

#[tokio::test]
async fn test_failed_iteration_takes_error_cooldown_and_continues() {
    let tmp = TempDir::new().unwrap();
    let mut config = test_config(&tmp);
    config.schedule.loop_enabled = true;
    config.schedule.delay_secs = 3600;
    config.schedule.jitter_percent = 0;
    config.schedule.error_cooldown_secs = 0;
    let store = open_store(&config).await;
    let source = FakeSource::new(&config.paths.download_dir, vec![("v", "", "x")]);
    source.listing_failures.store(1, Ordering::SeqCst);

    let controller = RunController::start(schedule(
        config,
        store.clone(),
        source,
        Arc::new(FakeTranscoder::default()),
        ResourceGate::new(None, tmp.path()),
    ));

    // A jittered delay would hold the second iteration back for an hour.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while controller.snapshot().successes == 0 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "second iteration never ran: {:?}",
            controller.snapshot()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    controller.stop();
    let snapshot = tokio::time::timeout(Duration::from_secs(2), controller.join())
        .await
        .expect("loop did not stop promptly")
        .unwrap();

    assert!(snapshot.iterations >= 2);
    assert!(snapshot.errors >= 1);
    assert!(snapshot.successes >= 1);
    let row = store.get_record("iter_1").await.unwrap().unwrap();
    assert_eq!(row.source_tag, SCHEDULER_TAG);
    assert!(row.error_detail.unwrap().contains("feed timed out"));
    assert_eq!(
        store.get_record("v").await.unwrap().unwrap().status,
        RecordStatus::Success
    );
}

#[tokio::test]
async fn test_stop_interrupts_long_delay() {
    let tmp = TempDir::new().unwrap();
    let mut config = test_config(&tmp);
    config.schedule.loop_enabled = true;
    config.schedule.delay_secs = 3600;
    let store = open_store(&config).await;
    let source = FakeSource::new(&config.paths.download_dir, vec![("v", "", "x")]);

    let controller = RunController::start(schedule(
        config,
        store,
        source,
        Arc::new(FakeTranscoder::default()),
        ResourceGate::new(None, tmp.path()),
    ));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while controller.snapshot().iterations == 0 {
        assert!(tokio::time::Instant::now() < deadline, "loop never started");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    // Give the cycle time to finish and enter the delay.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let stopped_at = std::time::Instant::now();
    controller.stop();
    let snapshot = tokio::time::timeout(Duration::from_secs(2), controller.join())
        .await
        .expect("loop did not stop promptly")
        .unwrap();

    assert!(stopped_at.elapsed() < Duration::from_secs(2));
    assert_eq!(snapshot.iterations, 1);
    assert_eq!(snapshot.state, RunState::Stopped);
}

#[tokio::test]
async fn test_reload_applies_to_next_iteration() {
    let tmp = TempDir::new().unwrap();
    let mut config = test_config(&tmp);
    config.schedule.loop_enabled = true;
    config.schedule.delay_secs = 0;
    config.schedule.jitter_percent = 0;
    let store = open_store(&config).await;
    let source = FakeSource::new(&config.paths.download_dir, vec![]);

    let controller = RunController::start(schedule(
        config.clone(),
        store,
        source,
        Arc::new(FakeTranscoder::default()),
        ResourceGate::new(None, tmp.path()),
    ));

    let mut once = config;
    once.schedule.loop_enabled = false;
    controller.reload(once);
    assert!(!controller.config_handle().current().schedule.loop_enabled);

    // With the loop disabled by the reload the run ends on its own.
    let snapshot = tokio::time::timeout(Duration::from_secs(5), controller.join())
        .await
        .expect("reloaded loop did not stop")
        .unwrap();
    assert!(snapshot.iterations >= 1);
    assert!(snapshot.skips >= 1);
}
