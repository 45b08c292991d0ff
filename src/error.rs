//! Error handling for hostwatchd.
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error reading the configuration file from disk.
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    /// Error parsing YAML configuration.
    #[error("invalid YAML format: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A parsed configuration failed validation.
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// `reload()` was called but the remembered config path changed
    /// concurrently with the reload.
    #[error("config path changed during reload")]
    PathChanged,
}

/// Errors raised by the alert store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying SQLite engine reported an error.
    #[error("alert store error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Neither the configured directory nor the fallback home directory is
    /// writable.
    #[error("could not open alert store at '{path}' or fallback '{fallback}': {source}")]
    Unwritable {
        /// The originally configured path.
        path: String,
        /// The fallback path that was also tried.
        fallback: String,
        /// The underlying error from the fallback attempt.
        #[source]
        source: rusqlite::Error,
    },

    /// The requested alert UUID does not exist in the store.
    #[error("alert not found: {0}")]
    NotFound(String),

    /// A UUID string could not be parsed.
    #[error("invalid alert id: {0}")]
    InvalidId(#[from] uuid::Error),
}

/// Errors raised by the IPC server and its handlers.
#[derive(Debug, Error)]
pub enum IpcError {
    /// A socket-level I/O error.
    #[error("ipc I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The configured endpoint path exceeds the platform's socket path
    /// length budget.
    #[error("socket path '{0}' exceeds platform length limit")]
    PathTooLong(String),

    /// A request body exceeded `MAX_MESSAGE_SIZE`.
    #[error("request exceeds maximum message size")]
    MessageTooLarge,

    /// The request body was not valid JSON.
    #[error("failed to parse request: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Errors raised by the system monitor and its sampler.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// The alert store/manager reported an error while recording an alert.
    #[error("alert manager error: {0}")]
    Store(#[from] StoreError),

    /// A kernel instrumentation surface could not be read.
    #[error("failed to sample host metrics: {0}")]
    Sample(String),
}

/// Top-level daemon error aggregating every subsystem's error type.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Alert store error.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// IPC error.
    #[error(transparent)]
    Ipc(#[from] IpcError),

    /// Monitor error.
    #[error(transparent)]
    Monitor(#[from] MonitorError),

    /// Generic I/O error not otherwise classified.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A mutex guarding shared state was poisoned by a panicking holder.
    #[error("lock poisoned: {0}")]
    Poisoned(String),

    /// A required service failed to start during daemon initialization.
    #[error("service '{0}' failed to start")]
    ServiceStartFailed(String),
}

impl<T> From<std::sync::PoisonError<T>> for DaemonError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        DaemonError::Poisoned(err.to_string())
    }
}
