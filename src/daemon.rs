//! Daemon lifecycle coordination (C10): the process-wide singleton that
//! owns the service registry, the signal-driven event loop, and supervisor
//! (systemd) notifications.
//!
//! Signal handlers only ever touch `sig_atomic_t`-equivalent flags
//! (`AtomicBool`, via `signal-hook`'s `flag` module); every other action —
//! logging, stopping services, reloading configuration — happens on the
//! event-loop thread under normal thread context, never inside the handler
//! itself.
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread;
use std::time::Duration;

use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::flag;
use tracing::{error, info, warn};

use crate::config::ConfigManager;
use crate::constants::{DAEMON_TICK_INTERVAL, STOP_CHECK_GRANULARITY};
use crate::error::DaemonError;
use crate::logger::{self, LogLevel};
use crate::service::{self, Service};

/// Process-wide daemon singleton. Owns every registered service exclusively
/// and drives their start/stop ordering and the main event loop.
pub struct Daemon {
    services: Mutex<Vec<Box<dyn Service>>>,
    shutdown_requested: Arc<AtomicBool>,
    reload_requested: Arc<AtomicBool>,
    running: AtomicBool,
}

static DAEMON: OnceLock<Daemon> = OnceLock::new();

impl Daemon {
    /// Returns the process-wide daemon, constructing it on first access.
    pub fn global() -> &'static Daemon {
        DAEMON.get_or_init(Daemon::new)
    }

    fn new() -> Self {
        Self {
            services: Mutex::new(Vec::new()),
            shutdown_requested: Arc::new(AtomicBool::new(false)),
            reload_requested: Arc::new(AtomicBool::new(false)),
            running: AtomicBool::new(false),
        }
    }

    /// Loads configuration from `config_path` (falling back to defaults and
    /// logging a warning on failure — the daemon never starts without a
    /// valid configuration), sets the logger's active level, and installs
    /// signal handlers. Must be called before `run()`.
    pub fn initialize(&self, config_path: Option<&Path>) -> Result<(), DaemonError> {
        let manager = ConfigManager::global();
        if let Some(path) = config_path {
            if let Err(err) = manager.load(path) {
                warn!(error = %err, path = %path.display(), "failed to load configuration, falling back to defaults");
            }
        }
        logger::set_level(LogLevel::from_u8(manager.get().log_level));
        self.install_signal_handlers()?;
        Ok(())
    }

    fn install_signal_handlers(&self) -> Result<(), DaemonError> {
        flag::register(SIGTERM, Arc::clone(&self.shutdown_requested))?;
        flag::register(SIGINT, Arc::clone(&self.shutdown_requested))?;
        flag::register(SIGHUP, Arc::clone(&self.reload_requested))?;
        Ok(())
    }

    /// Registers a service with the daemon. Legal only before `run()` is
    /// called; registering after startup has begun is a programming error.
    pub fn register_service(&self, service: Box<dyn Service>) -> Result<(), DaemonError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(DaemonError::ServiceStartFailed(
                "cannot register a service once run() has started".to_string(),
            ));
        }
        self.services
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(service);
        Ok(())
    }

    /// Requests shutdown, e.g. from the IPC `shutdown` handler. Equivalent
    /// to receiving `SIGTERM`: only a flag is set here, the actual shutdown
    /// happens the next time the event loop in `run()` checks it.
    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
    }

    /// Starts every registered service in priority order, runs the event
    /// loop until a shutdown is requested, then stops every service in
    /// reverse priority order. Returns the process exit code: `0` on clean
    /// shutdown, `1` if a service failed to start.
    pub fn run(&self) -> i32 {
        {
            let services = self.services.lock().unwrap_or_else(|p| p.into_inner());
            if let Err(failed) = service::start_in_priority_order(&services) {
                error!(service = %failed, "service failed to start; aborting initialization");
                return 1;
            }
        }
        self.running.store(true, Ordering::SeqCst);
        notify_ready();
        info!("daemon started");

        while !self.shutdown_requested.load(Ordering::SeqCst) {
            if self.reload_requested.swap(false, Ordering::SeqCst) {
                self.reload_config();
            }

            {
                let services = self.services.lock().unwrap_or_else(|p| p.into_inner());
                for svc in services.iter() {
                    if svc.is_running() && !svc.is_healthy() {
                        warn!(service = %svc.name(), "service running but unhealthy");
                    }
                }
            }
            notify_watchdog();

            let mut slept = Duration::ZERO;
            while slept < DAEMON_TICK_INTERVAL
                && !self.shutdown_requested.load(Ordering::SeqCst)
                && !self.reload_requested.load(Ordering::SeqCst)
            {
                let step = STOP_CHECK_GRANULARITY.min(DAEMON_TICK_INTERVAL - slept);
                thread::sleep(step);
                slept += step;
            }
        }

        notify_stopping();
        info!("daemon shutting down");
        let services = self.services.lock().unwrap_or_else(|p| p.into_inner());
        service::stop_in_reverse_priority_order(&services);
        drop(services);
        self.running.store(false, Ordering::SeqCst);
        0
    }

    /// Re-applies configuration: reloads via `ConfigManager` (fanning out to
    /// every registered subscriber) and re-applies the logger's level from
    /// the result. A failed reload keeps the previous configuration active
    /// and is logged, never fatal.
    pub fn reload_config(&self) {
        match ConfigManager::global().reload() {
            Ok(()) => {
                logger::set_level(LogLevel::from_u8(ConfigManager::global().get().log_level));
                info!("configuration reloaded");
            }
            Err(err) => {
                warn!(error = %err, "configuration reload failed; keeping previous configuration");
            }
        }
    }

    /// Whether the daemon's main loop is currently running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Resets daemon state for test isolation. Legal only in tests: never
    /// call this from concurrent production code, since it clears the
    /// service registry out from under a potentially running `run()`.
    #[cfg(test)]
    pub fn reset_for_test(&self) {
        self.shutdown_requested.store(false, Ordering::SeqCst);
        self.reload_requested.store(false, Ordering::SeqCst);
        self.services
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Notifies the supervisor (systemd, if `NOTIFY_SOCKET` is set) that
/// startup is complete. A no-op, non-fatal, when no supervisor is present.
fn notify_ready() {
    if let Err(err) = sd_notify::notify(false, &[sd_notify::NotifyState::Ready]) {
        tracing::debug!(error = %err, "supervisor notification (ready) not delivered");
    }
}

/// Notifies the supervisor that the daemon is shutting down.
fn notify_stopping() {
    if let Err(err) = sd_notify::notify(false, &[sd_notify::NotifyState::Stopping]) {
        tracing::debug!(error = %err, "supervisor notification (stopping) not delivered");
    }
}

/// Sends a watchdog keepalive to the supervisor.
fn notify_watchdog() {
    if let Err(err) = sd_notify::notify(false, &[sd_notify::NotifyState::Watchdog]) {
        tracing::debug!(error = %err, "supervisor notification (watchdog) not delivered");
    }
}
