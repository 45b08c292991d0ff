//! Structured logging (C1).
//!
//! Routed to standard error and, transitively, into the supervisor's
//! journal: when the daemon runs under systemd, stderr is captured into the
//! journal automatically, so no separate journal client is required here.
//! Thread-safe and level-filtered, with the active level swappable at
//! runtime to support configuration reload.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, reload};

type ReloadHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

static RELOAD_HANDLE: OnceLock<ReloadHandle> = OnceLock::new();

/// Numeric log levels as defined by the configuration schema.
///
/// `tracing` has no dedicated "critical" level; level 4 logs at `ERROR`
/// with a `critical = true` field so critical events remain greppable
/// without inventing a level the rest of the ecosystem doesn't understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// 0
    Debug,
    /// 1
    Info,
    /// 2
    Warn,
    /// 3
    Error,
    /// 4
    Critical,
}

impl LogLevel {
    /// Parses the numeric level from configuration, clamping out-of-range
    /// values rather than panicking (validation rejects these earlier; this
    /// is a defensive fallback for direct callers).
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => LogLevel::Debug,
            1 => LogLevel::Info,
            2 => LogLevel::Warn,
            3 => LogLevel::Error,
            _ => LogLevel::Critical,
        }
    }

    fn filter_directive(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error | LogLevel::Critical => "error",
        }
    }
}

/// Initializes the global tracing subscriber. Idempotent: subsequent calls
/// are ignored, matching the once-per-process nature of process-wide
/// logging setup.
pub fn init(level: LogLevel) {
    if RELOAD_HANDLE.get().is_some() {
        set_level(level);
        return;
    }

    let env_filter = std::env::var("RUST_LOG")
        .ok()
        .map(EnvFilter::new)
        .unwrap_or_else(|| EnvFilter::new(level.filter_directive()));

    let (filter, handle) = reload::Layer::new(env_filter);
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());

    use tracing_subscriber::layer::SubscriberExt;
    let _ = tracing::subscriber::set_global_default(registry);
    let _ = RELOAD_HANDLE.set(handle);
}

/// Updates the active log level, used on configuration reload. A no-op if
/// `RUST_LOG` was set at startup and overrides the configured level.
pub fn set_level(level: LogLevel) {
    if std::env::var("RUST_LOG").is_ok() {
        return;
    }
    if let Some(handle) = RELOAD_HANDLE.get() {
        let _ = handle.modify(|filter| *filter = EnvFilter::new(level.filter_directive()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_u8_maps_known_levels() {
        assert_eq!(LogLevel::from_u8(0), LogLevel::Debug);
        assert_eq!(LogLevel::from_u8(1), LogLevel::Info);
        assert_eq!(LogLevel::from_u8(2), LogLevel::Warn);
        assert_eq!(LogLevel::from_u8(3), LogLevel::Error);
        assert_eq!(LogLevel::from_u8(4), LogLevel::Critical);
    }

    #[test]
    fn from_u8_clamps_out_of_range_to_critical() {
        assert_eq!(LogLevel::from_u8(9), LogLevel::Critical);
    }

    #[test]
    fn levels_order_debug_to_critical() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Error);
        assert!(LogLevel::Error < LogLevel::Critical);
    }
}
