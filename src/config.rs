//! Configuration management for hostwatchd.
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Mutex, OnceLock},
};

use crate::error::ConfigError;

const DEFAULT_SOCKET_BACKLOG: u32 = 16;
const DEFAULT_SOCKET_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_MAX_REQUESTS_PER_SEC: u32 = 50;
const DEFAULT_MONITOR_INTERVAL_SEC: u64 = 5;
const DEFAULT_RETENTION_HOURS: u64 = 168;
const DEFAULT_LOG_LEVEL: u8 = 1;

const DEFAULT_CPU_WARNING: f32 = 80.0;
const DEFAULT_CPU_CRITICAL: f32 = 95.0;
const DEFAULT_MEMORY_WARNING: f32 = 80.0;
const DEFAULT_MEMORY_CRITICAL: f32 = 95.0;
const DEFAULT_DISK_WARNING: f32 = 85.0;
const DEFAULT_DISK_CRITICAL: f32 = 95.0;

/// Top-level configuration document.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct Config {
    /// IPC socket settings.
    pub socket: SocketConfig,
    /// Per-client request rate limiting.
    pub rate_limit: RateLimitConfig,
    /// System monitoring thresholds and sampling interval.
    pub monitoring: MonitoringConfig,
    /// Alert store settings.
    pub alerts: AlertsConfig,
    /// Numeric log level (0=debug .. 4=critical).
    pub log_level: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket: SocketConfig::default(),
            rate_limit: RateLimitConfig::default(),
            monitoring: MonitoringConfig::default(),
            alerts: AlertsConfig::default(),
            log_level: DEFAULT_LOG_LEVEL,
        }
    }
}

/// IPC socket configuration.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct SocketConfig {
    /// Optional explicit socket path; defaults to the runtime state
    /// directory's `hostwatchd.sock` when unset.
    pub path: Option<String>,
    /// Listen backlog passed to the underlying socket.
    pub backlog: u32,
    /// Per-connection read/write timeout, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            path: None,
            backlog: DEFAULT_SOCKET_BACKLOG,
            timeout_ms: DEFAULT_SOCKET_TIMEOUT_MS,
        }
    }
}

/// Per-client IPC rate limiting.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Maximum requests a single client connection may issue per second.
    pub max_requests_per_sec: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests_per_sec: DEFAULT_MAX_REQUESTS_PER_SEC,
        }
    }
}

/// Warning/critical thresholds shared by every monitored metric.
#[derive(Debug, Deserialize, Serialize, Clone, Copy)]
#[serde(default)]
pub struct Threshold {
    /// Percentage at which a warning-severity alert is raised.
    pub warning: f32,
    /// Percentage at which a critical-severity alert is raised.
    pub critical: f32,
}

/// System monitoring configuration.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Interval, in seconds, between samples.
    pub interval_sec: u64,
    /// CPU utilization thresholds.
    pub cpu: Threshold,
    /// Memory utilization thresholds.
    pub memory: Threshold,
    /// Disk utilization thresholds.
    pub disk: Threshold,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            interval_sec: DEFAULT_MONITOR_INTERVAL_SEC,
            cpu: Threshold {
                warning: DEFAULT_CPU_WARNING,
                critical: DEFAULT_CPU_CRITICAL,
            },
            memory: Threshold {
                warning: DEFAULT_MEMORY_WARNING,
                critical: DEFAULT_MEMORY_CRITICAL,
            },
            disk: Threshold {
                warning: DEFAULT_DISK_WARNING,
                critical: DEFAULT_DISK_CRITICAL,
            },
        }
    }
}

/// Alert store configuration.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct AlertsConfig {
    /// Optional explicit database path; defaults to the runtime state
    /// directory's `alerts.db` when unset.
    pub db_path: Option<String>,
    /// Hours after which alerts are purged from the store, regardless of
    /// status.
    pub retention_hours: u64,
    /// Whether an `AlertEnricher` is consulted when raising alerts. When
    /// `false`, alerts carry only their basic threshold-breach message.
    pub enricher_enabled: bool,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            retention_hours: DEFAULT_RETENTION_HOURS,
            enricher_enabled: true,
        }
    }
}

impl Config {
    /// Validates field-level invariants not expressible in the type system
    /// alone (ranges, non-zero constraints).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.socket.backlog == 0 {
            return Err(ConfigError::Invalid(
                "socket.backlog must be greater than zero".to_string(),
            ));
        }
        if self.socket.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "socket.timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.rate_limit.max_requests_per_sec == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit.max_requests_per_sec must be greater than zero".to_string(),
            ));
        }
        if self.monitoring.interval_sec == 0 {
            return Err(ConfigError::Invalid(
                "monitoring.interval_sec must be greater than zero".to_string(),
            ));
        }
        if self.alerts.retention_hours == 0 {
            return Err(ConfigError::Invalid(
                "alerts.retention_hours must be greater than zero".to_string(),
            ));
        }
        for (name, threshold) in [
            ("cpu", self.monitoring.cpu),
            ("memory", self.monitoring.memory),
            ("disk", self.monitoring.disk),
        ] {
            if !(0.0..=100.0).contains(&threshold.warning)
                || !(0.0..=100.0).contains(&threshold.critical)
            {
                return Err(ConfigError::Invalid(format!(
                    "monitoring.{name} thresholds must fall within 0..=100"
                )));
            }
            if threshold.warning > threshold.critical {
                return Err(ConfigError::Invalid(format!(
                    "monitoring.{name}.warning must not exceed monitoring.{name}.critical"
                )));
            }
        }
        if self.log_level > 4 {
            return Err(ConfigError::Invalid(
                "log_level must be between 0 and 4".to_string(),
            ));
        }
        Ok(())
    }
}

/// Loads and validates the configuration file at `config_path`.
pub fn load_config(config_path: &Path) -> Result<Config, ConfigError> {
    let content = fs::read_to_string(config_path)
        .map_err(|e| ConfigError::Read(std::io::Error::new(e.kind(), format!("{e} ({})", config_path.display()))))?;
    let config: Config = serde_yaml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

/// Searches `search_dirs`, in order, for a `hostwatchd.yaml` file, returning
/// the first that exists. Callers pass the current directory first and the
/// runtime's XDG-style configuration directories after, so an explicit
/// `--config` override always wins and a file in the working directory
/// takes priority over the installed system/user location.
pub fn resolve_config_path(search_dirs: &[PathBuf]) -> Option<PathBuf> {
    search_dirs
        .iter()
        .map(|dir| dir.join("hostwatchd.yaml"))
        .find(|candidate| candidate.exists())
}

type ChangeCallback = Box<dyn Fn(&Config) + Send + Sync>;

struct ManagerState {
    config: Config,
    path: Option<PathBuf>,
}

/// Process-wide configuration manager. Holds the active configuration and a
/// set of subscribers invoked after a successful reload.
pub struct ConfigManager {
    state: Mutex<ManagerState>,
    subscribers: Mutex<Vec<ChangeCallback>>,
}

static MANAGER: OnceLock<ConfigManager> = OnceLock::new();

impl ConfigManager {
    /// Returns the process-wide manager, initializing it with defaults on
    /// first access.
    pub fn global() -> &'static ConfigManager {
        MANAGER.get_or_init(|| ConfigManager {
            state: Mutex::new(ManagerState {
                config: Config::default(),
                path: None,
            }),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    /// Loads configuration from `path`, validates it, and installs it as the
    /// active configuration. Does not invoke subscribers; used at startup
    /// before any subscriber has registered.
    pub fn load(&self, path: &Path) -> Result<(), ConfigError> {
        let config = load_config(path)?;
        let mut guard = self.state.lock().unwrap_or_else(|p| p.into_inner());
        guard.config = config;
        guard.path = Some(path.to_path_buf());
        Ok(())
    }

    /// Re-reads configuration from the path last passed to `load`, and
    /// notifies subscribers of the new configuration. Subscribers are
    /// invoked after the configuration mutex is released, so a subscriber
    /// calling back into the manager cannot deadlock.
    pub fn reload(&self) -> Result<(), ConfigError> {
        let path = {
            let guard = self.state.lock().unwrap_or_else(|p| p.into_inner());
            guard.path.clone().ok_or(ConfigError::PathChanged)?
        };
        let config = load_config(&path)?;
        {
            let mut guard = self.state.lock().unwrap_or_else(|p| p.into_inner());
            if guard.path.as_deref() != Some(path.as_path()) {
                return Err(ConfigError::PathChanged);
            }
            guard.config = config.clone();
        }
        let subscribers = self.subscribers.lock().unwrap_or_else(|p| p.into_inner());
        for callback in subscribers.iter() {
            callback(&config);
        }
        Ok(())
    }

    /// Returns a clone of the currently active configuration.
    pub fn get(&self) -> Config {
        self.state.lock().unwrap_or_else(|p| p.into_inner()).config.clone()
    }

    /// Registers a callback invoked with the new configuration after every
    /// successful `reload()`.
    pub fn on_change<F>(&self, callback: F)
    where
        F: Fn(&Config) + Send + Sync + 'static,
    {
        self.subscribers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(Box::new(callback));
    }
}
