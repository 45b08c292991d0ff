//! Constants and configuration values used throughout the daemon.
//!
//! This module centralizes magic numbers and default paths to keep them in
//! one place rather than scattered across the subsystems that use them.

use std::time::Duration;

/// Maximum size, in bytes, of a single IPC request or response body.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Name of the Unix domain socket created under the runtime state directory.
pub const SOCKET_FILE_NAME: &str = "hostwatchd.sock";

/// Name of the SQLite database file holding persisted alerts.
pub const ALERT_DB_FILE_NAME: &str = "alerts.db";

/// Permission bits applied to the IPC endpoint file (world read/write; the
/// endpoint is filesystem-scoped, not network-exposed, so this is local-only
/// by construction).
pub const SOCKET_FILE_MODE: u32 = 0o666;

/// Permission bits applied to directories created to hold runtime state.
pub const RUNTIME_DIR_MODE: u32 = 0o755;

/// Width of the rate limiter's fixed window.
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(1);

/// Minimum sampling interval the monitor will honor, regardless of what the
/// configuration file requests. Prevents a misconfigured file from causing a
/// tight sampling loop.
pub const MIN_MONITOR_INTERVAL: Duration = Duration::from_secs(1);

/// Interval at which the daemon's main event loop wakes to check signal
/// flags, service health, and send a watchdog keepalive.
pub const DAEMON_TICK_INTERVAL: Duration = Duration::from_secs(5);

/// Increment used when sleeping in cancellable loops (monitor worker, daemon
/// event loop) so a stop flag can be observed promptly.
pub const STOP_CHECK_GRANULARITY: Duration = Duration::from_secs(1);

/// TTL applied to cached sampler readings to bound kernel-interface I/O.
pub const SAMPLER_CACHE_TTL: Duration = Duration::from_secs(1);

/// Default root mount point whose disk usage is sampled.
pub const DEFAULT_DISK_MOUNT_POINT: &str = "/";

/// Reserved JSON-RPC-style protocol error codes (negative range) and the
/// positive-range application error codes layered on top of them.
pub mod error_code {
    /// The request body could not be parsed as a JSON object.
    pub const PARSE_ERROR: i32 = -32700;
    /// The request was well-formed JSON but not a valid request envelope.
    pub const INVALID_REQUEST: i32 = -32600;
    /// No handler is registered for the requested method.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// The method's parameters failed validation.
    pub const INVALID_PARAMS: i32 = -32602;
    /// The handler raised an unexpected error.
    pub const INTERNAL_ERROR: i32 = -32603;

    /// A resource the handler depends on (e.g. the monitor) is not loaded.
    pub const RESOURCE_NOT_LOADED: i32 = 100;
    /// The server is busy and cannot service the request right now.
    pub const BUSY: i32 = 101;
    /// The caller exceeded the configured request rate.
    pub const RATE_LIMITED: i32 = 102;
    /// The referenced alert UUID does not exist.
    pub const ALERT_NOT_FOUND: i32 = 103;
    /// The configuration could not be (re)loaded.
    pub const CONFIG_ERROR: i32 = 104;
}
