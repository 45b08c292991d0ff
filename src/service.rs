//! Service abstraction (C1/4.1): the common contract every long-lived
//! subsystem implements so the daemon can start and stop them in priority
//! order without knowing their concrete type.

/// A long-lived subsystem managed by the daemon's service registry.
///
/// Higher `priority()` values start first and stop last, mirroring a
/// dependency ordering where foundational services (the alert store) must
/// be up before dependents (the monitor, the IPC server) start, and must
/// outlive them during shutdown.
pub trait Service: Send + Sync {
    /// Starts the service. Returns `false` on failure; the daemon treats a
    /// `false` return the same as an error, stopping already-started
    /// services in reverse priority and aborting initialization.
    fn start(&self) -> bool;

    /// Stops the service. Idempotent: calling `stop` on an already-stopped
    /// service is a no-op.
    fn stop(&self);

    /// A short, stable name used in logs and health diagnostics.
    fn name(&self) -> String;

    /// Start/stop ordering priority. Higher values start first, stop last.
    fn priority(&self) -> i32;

    /// Whether the service is currently running.
    fn is_running(&self) -> bool;

    /// Whether the service is running and passing its own health check.
    /// A service that is not running is never healthy.
    fn is_healthy(&self) -> bool;
}

/// Starts `services` in descending priority order. On the first failure,
/// stops every service already started, in reverse priority order, and
/// returns the name of the service that failed.
pub fn start_in_priority_order(services: &[Box<dyn Service>]) -> Result<(), String> {
    let mut ordered: Vec<&Box<dyn Service>> = services.iter().collect();
    ordered.sort_by_key(|s| std::cmp::Reverse(s.priority()));

    let mut started = Vec::new();
    for service in &ordered {
        if service.start() {
            started.push(*service);
        } else {
            let failed_name = service.name();
            for started_service in started.into_iter().rev() {
                started_service.stop();
            }
            return Err(failed_name);
        }
    }
    Ok(())
}

/// Stops `services` in reverse priority order (lowest priority first).
pub fn stop_in_reverse_priority_order(services: &[Box<dyn Service>]) {
    let mut ordered: Vec<&Box<dyn Service>> = services.iter().collect();
    ordered.sort_by_key(|s| s.priority());
    for service in ordered {
        service.stop();
    }
}
