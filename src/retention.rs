//! Periodic alert retention cleanup, run as its own background service
//! rather than folded into the monitor's tick loop: the cleanup cadence
//! (hourly) and the sampling cadence (seconds) have nothing in common, and
//! tying them together would make the monitor's interval double as a
//! retention knob.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{info, warn};

use crate::config::Config;
use crate::constants::STOP_CHECK_GRANULARITY;
use crate::manager::AlertManager;
use crate::service::Service;

/// How often the sweeper checks for alerts past the retention window.
const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

struct RetentionState {
    retention_hours: u64,
}

/// Periodically purges alerts older than `alerts.retention_hours`,
/// regardless of status, via `AlertManager::cleanup_older_than`.
pub struct RetentionSweeper {
    manager: Arc<AlertManager>,
    state: RwLock<RetentionState>,
    running: AtomicBool,
    stop_requested: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RetentionSweeper {
    /// Builds a sweeper over `manager` using the retention window in
    /// `config`.
    pub fn new(manager: Arc<AlertManager>, config: &Config) -> Self {
        Self {
            manager,
            state: RwLock::new(RetentionState {
                retention_hours: config.alerts.retention_hours,
            }),
            running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            worker: Mutex::new(None),
        }
    }

    /// Applies a reloaded retention window. Meant to be registered with
    /// `ConfigManager::on_change`.
    pub fn apply_config(&self, config: &Config) {
        let mut state = self.state.write().unwrap_or_else(|p| p.into_inner());
        state.retention_hours = config.alerts.retention_hours;
    }

    fn sweep(&self) {
        let retention_hours = self.state.read().unwrap_or_else(|p| p.into_inner()).retention_hours;
        match self.manager.cleanup_older_than(retention_hours) {
            Ok(deleted) if deleted > 0 => info!(deleted, "retention sweep purged expired alerts"),
            Ok(_) => {}
            Err(err) => warn!(error = %err, "retention sweep failed"),
        }
    }
}

impl Service for RetentionSweeper {
    /// Marks the sweeper running. The sweep loop thread itself is started
    /// separately by `spawn_worker`, mirroring `SystemMonitor`.
    fn start(&self) -> bool {
        if self.running.load(Ordering::SeqCst) {
            return true;
        }
        self.stop_requested.store(false, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        true
    }

    fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        if let Some(handle) = self.worker.lock().unwrap_or_else(|p| p.into_inner()).take() {
            let _ = handle.join();
        }
        self.running.store(false, Ordering::SeqCst);
    }

    fn name(&self) -> String {
        "retention_sweeper".to_string()
    }

    fn priority(&self) -> i32 {
        60
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn is_healthy(&self) -> bool {
        self.is_running()
    }
}

/// Delegates `Service` to the owning `Arc`, same pattern as `SystemMonitor`
/// and `IpcServer`: `start` spawns the sweep loop, which needs an owning
/// `Arc<RetentionSweeper>`.
impl Service for Arc<RetentionSweeper> {
    fn start(&self) -> bool {
        if !(**self).start() {
            return false;
        }
        spawn_worker(Arc::clone(self));
        true
    }

    fn stop(&self) {
        (**self).stop()
    }

    fn name(&self) -> String {
        (**self).name()
    }

    fn priority(&self) -> i32 {
        (**self).priority()
    }

    fn is_running(&self) -> bool {
        (**self).is_running()
    }

    fn is_healthy(&self) -> bool {
        (**self).is_healthy()
    }
}

/// Spawns the sweep loop on a dedicated thread and stores the handle so
/// `Service::stop` can join it.
pub fn spawn_worker(sweeper: Arc<RetentionSweeper>) {
    let loop_sweeper = Arc::clone(&sweeper);
    let handle = thread::spawn(move || {
        while !loop_sweeper.stop_requested.load(Ordering::SeqCst) {
            loop_sweeper.sweep();
            let mut slept = Duration::ZERO;
            while slept < SWEEP_INTERVAL && !loop_sweeper.stop_requested.load(Ordering::SeqCst) {
                let step = STOP_CHECK_GRANULARITY.min(SWEEP_INTERVAL - slept);
                thread::sleep(step);
                slept += step;
            }
        }
    });
    *sweeper.worker.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);
}
