//! Local host telemetry and alerting daemon.

#![warn(unused_crate_dependencies)]
// Test-only dependencies are only referenced from #[cfg(test)] code.
#[cfg(test)]
use assert_cmd as _;
#[cfg(test)]
use predicates as _;
#[cfg(test)]
use tempfile as _;

/// Alert domain types: severity, category, status, the alert record itself.
pub mod alert;

/// CLI parsing.
pub mod cli;

/// Configuration loading, validation, and hot reload.
pub mod config;

/// Constants and protocol error codes.
pub mod constants;

/// Process lifecycle coordinator: service registry, signals, event loop.
pub mod daemon;

/// Pluggable alert-message enrichment hook.
pub mod enricher;

/// Errors.
pub mod error;

/// Local IPC server and request/response protocol.
pub mod ipc;

/// Structured logging.
pub mod logger;

/// In-process alert lifecycle façade: dedup, counters, callbacks, retention.
pub mod manager;

/// Per-connection request rate limiting.
pub mod ratelimit;

/// Periodic alert retention cleanup, run as its own background service.
pub mod retention;

/// Runtime paths and modes.
pub mod runtime;

/// Host metric sampling.
pub mod sampler;

/// Common service lifecycle contract.
pub mod service;

/// Durable alert storage.
pub mod store;

/// Periodic sampling and threshold evaluation.
pub mod monitor;

/// Test utilities.
#[doc(hidden)]
pub mod test_utils;
