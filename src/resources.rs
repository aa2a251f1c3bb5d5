//! Resource gate consulted by the schedule loop before each iteration.
//!
//! The gate is a point-in-time check, not a controller: the loop re-checks
//! before every iteration and backs off when denied.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use sysinfo::{CpuRefreshKind, Disks, MemoryRefreshKind, RefreshKind, System};
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub const CPU_HIGH_WATER: f64 = 95.0;
pub const MEMORY_HIGH_WATER: f64 = 90.0;
pub const DISK_HIGH_WATER: f64 = 95.0;

/// Source of live load figures, all in percent.
#[async_trait]
pub trait ResourceProbe: Send + Sync {
    async fn cpu_percent(&self) -> Result<f64>;
    async fn memory_percent(&self) -> Result<f64>;
    async fn disk_percent(&self, path: &Path) -> Result<f64>;
}

/// Probe backed by `sysinfo`.
pub struct SystemProbe {
    system: Mutex<System>,
}

impl SystemProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new_with_specifics(
                RefreshKind::nothing()
                    .with_cpu(CpuRefreshKind::everything())
                    .with_memory(MemoryRefreshKind::everything()),
            )),
        }
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceProbe for SystemProbe {
    async fn cpu_percent(&self) -> Result<f64> {
        // CPU usage is a delta between two refreshes.
        self.system.lock().await.refresh_cpu_all();
        tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
        let mut system = self.system.lock().await;
        system.refresh_cpu_all();
        Ok(system.global_cpu_usage() as f64)
    }

    async fn memory_percent(&self) -> Result<f64> {
        let mut system = self.system.lock().await;
        system.refresh_memory();
        let total = system.total_memory();
        if total == 0 {
            return Err(anyhow!("Total memory reported as zero"));
        }
        Ok(system.used_memory() as f64 / total as f64 * 100.0)
    }

    async fn disk_percent(&self, path: &Path) -> Result<f64> {
        let target = resolve_existing(path);
        let target_str = target.to_string_lossy().to_string();
        let disks = Disks::new_with_refreshed_list();

        // Longest matching mount point is the disk holding the path.
        let mut best: Option<(&sysinfo::Disk, usize)> = None;
        for disk in disks.list() {
            let mount = disk.mount_point().to_string_lossy().to_string();
            if target_str.starts_with(&mount) && best.is_none_or(|(_, len)| mount.len() > len) {
                best = Some((disk, mount.len()));
            }
        }

        let (disk, _) = best.ok_or_else(|| anyhow!("No disk found for {}", target.display()))?;
        let total = disk.total_space();
        if total == 0 {
            return Err(anyhow!("Disk for {} reports zero size", target.display()));
        }
        let used = total.saturating_sub(disk.available_space());
        Ok(used as f64 / total as f64 * 100.0)
    }
}

/// Nearest existing ancestor of `path`, made absolute.
fn resolve_existing(path: &Path) -> PathBuf {
    let mut current = Some(path);
    while let Some(p) = current {
        if let Ok(canonical) = p.canonicalize() {
            return canonical;
        }
        current = p.parent();
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"))
}

/// One sample of the three gauges. `None` where the probe failed.
#[derive(Debug, Clone, Default)]
pub struct ResourceReading {
    pub cpu: Option<f64>,
    pub memory: Option<f64>,
    pub disk: Option<f64>,
}

pub struct ResourceGate {
    probe: Option<Box<dyn ResourceProbe>>,
    disk_path: PathBuf,
    cpu_limit: f64,
    memory_limit: f64,
    disk_limit: f64,
}

impl ResourceGate {
    pub fn new(probe: Option<Box<dyn ResourceProbe>>, disk_path: impl Into<PathBuf>) -> Self {
        Self {
            probe,
            disk_path: disk_path.into(),
            cpu_limit: CPU_HIGH_WATER,
            memory_limit: MEMORY_HIGH_WATER,
            disk_limit: DISK_HIGH_WATER,
        }
    }

    /// Gate backed by the live system probe.
    pub fn system(disk_path: impl Into<PathBuf>) -> Self {
        Self::new(Some(Box::new(SystemProbe::new())), disk_path)
    }

    pub fn with_limits(mut self, cpu: f64, memory: f64, disk: f64) -> Self {
        self.cpu_limit = cpu;
        self.memory_limit = memory;
        self.disk_limit = disk;
        self
    }

    pub async fn read(&self) -> ResourceReading {
        let Some(probe) = &self.probe else {
            return ResourceReading::default();
        };
        ResourceReading {
            cpu: probe.cpu_percent().await.ok(),
            memory: probe.memory_percent().await.ok(),
            disk: probe.disk_percent(&self.disk_path).await.ok(),
        }
    }

    /// False if any gauge is above its high-water mark. Fails open when the
    /// probe is missing or errors.
    pub async fn allow_work(&self) -> bool {
        let Some(probe) = &self.probe else {
            return true;
        };

        let checks = [
            ("cpu", probe.cpu_percent().await, self.cpu_limit),
            ("memory", probe.memory_percent().await, self.memory_limit),
            (
                "disk",
                probe.disk_percent(&self.disk_path).await,
                self.disk_limit,
            ),
        ];

        for (gauge, value, limit) in checks {
            match value {
                Ok(v) if v > limit => {
                    warn!(gauge, value = v, limit, "Resource above high-water mark");
                    return false;
                }
                Ok(v) => debug!(gauge, value = v, "Resource within limits"),
                Err(e) => {
                    debug!(gauge, error = %e, "Resource probe unavailable, failing open");
                }
            }
        }
        true
    }
}
