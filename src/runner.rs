//! `relay run`: build the adapters from config and drive the schedule loop
//! until Ctrl-C (or after one iteration with `--once`).
//!
//! On unix, `SIGHUP` reloads the config file. The new values apply from the
//! next iteration; sources and the publish target are built once at startup
//! and need a restart to change.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::config::{self, Config};
use crate::db;
use crate::dedup::DuplicateStore;
use crate::migrate;
use crate::resources::ResourceGate;
use crate::schedule::{RunController, ScheduleLoop};
use crate::sources;

pub async fn run_relay(config_path: &Path, config: Config, once: bool) -> Result<()> {
    let config = apply_overrides(config, once);

    let pool = db::connect(&config).await?;
    migrate::apply(&pool).await?;
    let store = Arc::new(DuplicateStore::open(pool.clone(), &config.dedup).await?);

    let sources = sources::build_sources(&config)?;
    let target = sources::build_target(&config)?;
    let transcoder = sources::build_transcoder(&config);
    let gate = ResourceGate::system(&config.paths.output_dir);

    info!(
        mode = ?config.source.mode,
        target = target.name(),
        loop_enabled = config.schedule.loop_enabled,
        "Starting relay"
    );

    let schedule = ScheduleLoop::new(config, store, sources, transcoder, target, gate);
    let controller = RunController::start(schedule);

    let token = controller.token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Stop requested, finishing current step");
            token.cancel();
        }
    });

    #[cfg(unix)]
    spawn_reload_on_hangup(config_path.to_path_buf(), once, controller.config_handle());
    #[cfg(not(unix))]
    let _ = config_path;

    let result = controller.join().await;
    pool.close().await;
    let snapshot = result?;

    println!(
        "Run finished: {} iteration(s), {} published, {} skipped, {} failed.",
        snapshot.iterations, snapshot.successes, snapshot.skips, snapshot.errors
    );
    Ok(())
}

fn apply_overrides(mut config: Config, once: bool) -> Config {
    if once {
        config.schedule.loop_enabled = false;
    }
    config
}

#[cfg(unix)]
fn spawn_reload_on_hangup(path: std::path::PathBuf, once: bool, handle: crate::schedule::ConfigHandle) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "Cannot listen for SIGHUP; reload disabled");
                return;
            }
        };
        while hangup.recv().await.is_some() {
            match config::load_config(&path) {
                Ok(fresh) => {
                    handle.replace(apply_overrides(fresh, once));
                    info!(path = %path.display(), "Configuration reloaded");
                }
                Err(e) => {
                    tracing::warn!(error = %format!("{:#}", e), "Reload failed, keeping previous config")
                }
            }
        }
    });
}
