//! Host metric sampling (C8): CPU, memory, disk, uptime, and failed-service
//! counts, backed by `sysinfo` for host telemetry and `systemctl` for
//! service health. Cached briefly to bound kernel-interface and subprocess
//! I/O.
use std::process::Command;
use std::sync::Mutex;
use std::time::Instant;

use sysinfo::{Disks, System};
use tracing::warn;

use crate::constants::{DEFAULT_DISK_MOUNT_POINT, SAMPLER_CACHE_TTL};
use crate::error::MonitorError;

/// A single snapshot of host utilization, matching the health-snapshot data
/// model: everything a `health` response or a threshold evaluation needs.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Percentage of total CPU capacity in use, averaged across cores.
    pub cpu_percent: f32,
    /// Number of logical CPU cores.
    pub cpu_cores: usize,
    /// Total installed memory, in bytes.
    pub memory_total_bytes: u64,
    /// Memory currently in use, in bytes.
    pub memory_used_bytes: u64,
    /// Memory available for new allocations, in bytes.
    pub memory_available_bytes: u64,
    /// Percentage of total memory in use.
    pub memory_percent: f32,
    /// Mount point whose disk usage was sampled (e.g. `/`).
    pub disk_mount_point: String,
    /// Total capacity of the monitored mount point, in bytes.
    pub disk_total_bytes: u64,
    /// Used capacity of the monitored mount point, in bytes.
    pub disk_used_bytes: u64,
    /// Available capacity of the monitored mount point, in bytes.
    pub disk_available_bytes: u64,
    /// Percentage of the monitored mount point's capacity in use.
    pub disk_percent: f32,
    /// Seconds since the host booted.
    pub uptime_secs: u64,
    /// Number of systemd units currently in a `failed` active state.
    pub failed_services: u64,
}

impl Default for Sample {
    /// All-zero sample used as a base for tests that only care about one or
    /// two fields (`Sample { cpu_percent: 85.0, ..Sample::default() }`).
    fn default() -> Self {
        Self {
            cpu_percent: 0.0,
            cpu_cores: 1,
            memory_total_bytes: 0,
            memory_used_bytes: 0,
            memory_available_bytes: 0,
            memory_percent: 0.0,
            disk_mount_point: DEFAULT_DISK_MOUNT_POINT.to_string(),
            disk_total_bytes: 0,
            disk_used_bytes: 0,
            disk_available_bytes: 0,
            disk_percent: 0.0,
            uptime_secs: 0,
            failed_services: 0,
        }
    }
}

struct Cache {
    sample: Option<Sample>,
    taken_at: Instant,
}

/// Samples host metrics, caching the most recent reading for
/// `SAMPLER_CACHE_TTL` so that frequent callers (the monitor tick loop and
/// the IPC `health` handler) don't each force a fresh kernel read.
pub struct Sampler {
    system: Mutex<System>,
    disk_mount_point: String,
    cache: Mutex<Cache>,
}

impl Sampler {
    /// Builds a sampler that reports on `disk_mount_point` (e.g. `"/"`).
    pub fn new(disk_mount_point: impl Into<String>) -> Self {
        let mut system = System::new_all();
        system.refresh_cpu_usage();
        system.refresh_memory();
        Self {
            system: Mutex::new(system),
            disk_mount_point: disk_mount_point.into(),
            cache: Mutex::new(Cache {
                sample: None,
                taken_at: Instant::now() - SAMPLER_CACHE_TTL,
            }),
        }
    }

    /// Builds a sampler reporting on the default root mount point.
    pub fn default_mount() -> Self {
        Self::new(DEFAULT_DISK_MOUNT_POINT)
    }

    /// Returns a cached sample if one was taken within `SAMPLER_CACHE_TTL`,
    /// otherwise takes and caches a fresh one.
    pub fn sample(&self) -> Result<Sample, MonitorError> {
        let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(sample) = &cache.sample {
            if cache.taken_at.elapsed() < SAMPLER_CACHE_TTL {
                return Ok(sample.clone());
            }
        }
        let fresh = self.sample_fresh()?;
        cache.sample = Some(fresh.clone());
        cache.taken_at = Instant::now();
        Ok(fresh)
    }

    fn sample_fresh(&self) -> Result<Sample, MonitorError> {
        let mut system = self.system.lock().unwrap_or_else(|p| p.into_inner());
        system.refresh_cpu_usage();
        system.refresh_memory();

        let cpu_percent = system.global_cpu_usage().clamp(0.0, 100.0);
        let cpu_cores = system.cpus().len().max(1);

        let memory_total_bytes = system.total_memory();
        let memory_available_bytes = system.available_memory();
        let memory_used_bytes = memory_total_bytes.saturating_sub(memory_available_bytes);
        let memory_percent = if memory_total_bytes == 0 {
            0.0
        } else {
            (memory_used_bytes as f64 / memory_total_bytes as f64 * 100.0) as f32
        };

        let (disk_total_bytes, disk_available_bytes) = self.disk_bytes();
        let disk_used_bytes = disk_total_bytes.saturating_sub(disk_available_bytes);
        let disk_percent = if disk_total_bytes == 0 {
            0.0
        } else {
            (disk_used_bytes as f64 / disk_total_bytes as f64 * 100.0) as f32
        };

        let uptime_secs = System::uptime();
        let failed_services = failed_service_count();

        Ok(Sample {
            cpu_percent,
            cpu_cores,
            memory_total_bytes,
            memory_used_bytes,
            memory_available_bytes,
            memory_percent,
            disk_mount_point: self.disk_mount_point.clone(),
            disk_total_bytes,
            disk_used_bytes,
            disk_available_bytes,
            disk_percent,
            uptime_secs,
            failed_services,
        })
    }

    fn disk_bytes(&self) -> (u64, u64) {
        let disks = Disks::new_with_refreshed_list();
        let disk = disks
            .list()
            .iter()
            .find(|d| d.mount_point().to_string_lossy() == self.disk_mount_point)
            .or_else(|| disks.list().first());

        match disk {
            Some(disk) => (disk.total_space(), disk.available_space()),
            None => {
                warn!(mount = %self.disk_mount_point, "no disk found for configured mount point");
                (0, 0)
            }
        }
    }
}

/// Counts systemd units whose `ActiveState` is the literal string `failed`.
///
/// Queried by shelling out to `systemctl --failed`, re-invoked on every
/// cache miss rather than held open as a persistent D-Bus connection: the
/// dependency stack this daemon is built from has no D-Bus client, and a
/// short-lived subprocess per sample (rate-limited by `SAMPLER_CACHE_TTL`)
/// gives the same "reconnect on error" behavior the supervisor-API contract
/// asks for without introducing one. Absence of `systemctl` (non-systemd
/// hosts, containers) is treated as zero failed services, not an error.
fn failed_service_count() -> u64 {
    let output = Command::new("systemctl")
        .args(["list-units", "--failed", "--no-legend", "--plain"])
        .output();

    match output {
        Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|line| !line.trim().is_empty())
            .count() as u64,
        Ok(output) => {
            warn!(
                status = %output.status,
                "systemctl --failed exited non-zero; treating as zero failed services"
            );
            0
        }
        Err(err) => {
            warn!(error = %err, "could not query systemctl for failed services");
            0
        }
    }
}
