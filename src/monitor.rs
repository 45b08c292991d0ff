//! System monitor (C9): periodic sampling, threshold evaluation, and alert
//! creation/retraction via the `AlertManager`.
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::alert::{Category, DedupKey, Severity, Status};
use crate::config::{Config, Threshold};
use crate::constants::{MIN_MONITOR_INTERVAL, STOP_CHECK_GRANULARITY};
use crate::enricher::{AlertContext, AlertEnricher};
use crate::error::MonitorError;
use crate::manager::AlertManager;
use crate::sampler::{Sample, Sampler};
use crate::service::Service;

#[derive(Debug, Clone, Copy)]
struct Thresholds {
    cpu: Threshold,
    memory: Threshold,
    disk: Threshold,
}

impl Thresholds {
    fn from_config(config: &Config) -> Self {
        Self {
            cpu: config.monitoring.cpu,
            memory: config.monitoring.memory,
            disk: config.monitoring.disk,
        }
    }

    fn for_category(&self, category: Category) -> Option<Threshold> {
        match category {
            Category::Cpu => Some(self.cpu),
            Category::Memory => Some(self.memory),
            Category::Disk => Some(self.disk),
            Category::Service | Category::Apt | Category::Cve | Category::System => None,
        }
    }
}

struct MonitorState {
    interval: Duration,
    thresholds: Thresholds,
}

/// Warning/critical thresholds for each monitored metric domain, returned by
/// `SystemMonitor::thresholds()` for the `health` handler's threshold block.
#[derive(Debug, Clone, Copy)]
pub struct ThresholdSnapshot {
    /// CPU utilization thresholds.
    pub cpu: Threshold,
    /// Memory utilization thresholds.
    pub memory: Threshold,
    /// Disk utilization thresholds.
    pub disk: Threshold,
}

/// Periodically samples host metrics and raises or retracts alerts as
/// thresholds are crossed.
pub struct SystemMonitor {
    sampler: Arc<Sampler>,
    manager: Arc<AlertManager>,
    enricher: Arc<dyn AlertEnricher>,
    state: RwLock<MonitorState>,
    running: AtomicBool,
    stop_requested: AtomicBool,
    tick_count: AtomicU64,
    worker: Mutex<Option<JoinHandle<()>>>,
    /// Most recent sample, read by the `health` IPC handler. Serialized by
    /// its own mutex, separate from `state`, since readers must never see a
    /// torn mix of an old sample and new thresholds.
    snapshot: Mutex<Option<Sample>>,
}

const MONITORED_CATEGORIES: [Category; 3] = [Category::Cpu, Category::Memory, Category::Disk];

impl SystemMonitor {
    /// Builds a monitor over `sampler`/`manager` using the thresholds and
    /// interval in `config`.
    pub fn new(
        sampler: Arc<Sampler>,
        manager: Arc<AlertManager>,
        enricher: Arc<dyn AlertEnricher>,
        config: &Config,
    ) -> Self {
        Self {
            sampler,
            manager,
            enricher,
            state: RwLock::new(MonitorState {
                interval: clamp_interval(config.monitoring.interval_sec),
                thresholds: Thresholds::from_config(config),
            }),
            running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            tick_count: AtomicU64::new(0),
            worker: Mutex::new(None),
            snapshot: Mutex::new(None),
        }
    }

    /// Returns the most recent sample, if a tick has run yet.
    pub fn latest_sample(&self) -> Option<Sample> {
        self.snapshot.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Returns the thresholds currently in effect, for the `health` handler.
    pub fn thresholds(&self) -> ThresholdSnapshot {
        let state = self.state.read().unwrap_or_else(|p| p.into_inner());
        ThresholdSnapshot {
            cpu: state.thresholds.cpu,
            memory: state.thresholds.memory,
            disk: state.thresholds.disk,
        }
    }

    /// Applies new thresholds/interval from a reloaded configuration. Meant
    /// to be registered with `ConfigManager::on_change`.
    pub fn apply_config(&self, config: &Config) {
        let mut state = self.state.write().unwrap_or_else(|p| p.into_inner());
        state.interval = clamp_interval(config.monitoring.interval_sec);
        state.thresholds = Thresholds::from_config(config);
    }

    /// Number of ticks executed since the monitor started.
    pub fn tick_count(&self) -> u64 {
        self.tick_count.load(Ordering::SeqCst)
    }

    fn value_for(sample: &Sample, category: Category) -> f32 {
        match category {
            Category::Cpu => sample.cpu_percent,
            Category::Memory => sample.memory_percent,
            Category::Disk => sample.disk_percent,
            Category::Service | Category::Apt | Category::Cve | Category::System => 0.0,
        }
    }

    fn source_for(category: Category) -> &'static str {
        match category {
            Category::Cpu => "cpu",
            Category::Memory => "memory",
            Category::Disk => "disk",
            Category::Service => "service",
            Category::Apt => "apt",
            Category::Cve => "cve",
            Category::System => "system",
        }
    }

    /// Executes a single sampling/evaluation pass. Public so integration
    /// tests can drive ticks deterministically without a background thread.
    pub fn tick(&self) -> Result<(), MonitorError> {
        let sample = self
            .sampler
            .sample()
            .map_err(|e| MonitorError::Sample(e.to_string()))?;
        let thresholds = {
            let state = self.state.read().unwrap_or_else(|p| p.into_inner());
            state.thresholds
        };

        for &category in &MONITORED_CATEGORIES {
            let Some(threshold) = thresholds.for_category(category) else {
                continue;
            };
            self.evaluate_metric(category, Self::value_for(&sample, category), threshold, &sample)?;
        }
        self.evaluate_failed_services(&sample)?;

        *self.snapshot.lock().unwrap_or_else(|p| p.into_inner()) = Some(sample);
        self.tick_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Raises an `error`-severity alert when one or more systemd units are
    /// failed, retracting it once the count returns to zero.
    fn evaluate_failed_services(&self, sample: &Sample) -> Result<(), MonitorError> {
        let source = Self::source_for(Category::Service);
        let message = "one or more services failed";
        if sample.failed_services > 0 {
            let context = AlertContext {
                severity: Severity::Error,
                category: Category::Service,
                source,
                sample: sample.clone(),
            };
            let enrichment = self.enricher.enrich(&context);
            let id = self.manager.raise(Severity::Error, Category::Service, source, message)?;
            if let Some(extra) = enrichment {
                let description = format!("{message} ({} failed; {extra})", sample.failed_services);
                self.manager.set_description(id, &description)?;
            }
        } else {
            self.retract(Category::Service, Severity::Error, source, message);
        }
        Ok(())
    }

    fn evaluate_metric(
        &self,
        category: Category,
        value: f32,
        threshold: Threshold,
        sample: &Sample,
    ) -> Result<(), MonitorError> {
        let source = Self::source_for(category);

        if value >= threshold.critical {
            self.raise(category, Severity::Critical, source, value, sample)?;
            self.retract(category, Severity::Warning, source, "threshold breach");
        } else if value >= threshold.warning {
            self.raise(category, Severity::Warning, source, value, sample)?;
            self.retract(category, Severity::Critical, source, "threshold breach");
        } else {
            self.retract(category, Severity::Warning, source, "threshold breach");
            self.retract(category, Severity::Critical, source, "threshold breach");
        }
        Ok(())
    }

    fn raise(
        &self,
        category: Category,
        severity: Severity,
        source: &str,
        value: f32,
        sample: &Sample,
    ) -> Result<(), MonitorError> {
        let message = "threshold breach".to_string();
        let context = AlertContext {
            severity,
            category,
            source,
            sample: sample.clone(),
        };
        let enrichment = self.enricher.enrich(&context);

        let id = self.manager.raise(severity, category, source, &message)?;
        if let Some(extra) = enrichment {
            let description = format!("{message} ({value:.1}%; {extra})");
            self.manager.set_description(id, &description)?;
        }
        Ok(())
    }

    fn retract(&self, category: Category, severity: Severity, source: &str, message: &str) {
        let key = DedupKey::new(category, severity, source, message);
        if let Ok(active) = self.manager.list(Some(Status::Active)) {
            if let Some(alert) = active.into_iter().find(|a| DedupKey::from_alert(a) == key) {
                debug!(?category, ?severity, source, "retracting cleared alert");
                let _ = self.manager.dismiss(alert.id);
            }
        }
    }
}

fn clamp_interval(interval_sec: u64) -> Duration {
    Duration::from_secs(interval_sec).max(MIN_MONITOR_INTERVAL)
}

impl Service for SystemMonitor {
    /// Marks the monitor running. The tick-loop thread itself is started
    /// separately by `spawn_worker`, which needs an owning `Arc<Self>` that
    /// a `&self` trait method cannot produce; the daemon calls both during
    /// its startup sequence.
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
        "system_monitor".to_string()
    }

    fn priority(&self) -> i32 {
        50
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn is_healthy(&self) -> bool {
        self.is_running()
    }
}

/// Delegates `Service` to the owning `Arc`, mirroring the ipc server: `start`
/// flips the running flag via the inner impl and then spawns the tick-loop
/// thread, which needs an owning `Arc<SystemMonitor>` that a `&self`-based
/// `Service::start` cannot produce on its own.
impl Service for Arc<SystemMonitor> {
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

/// Spawns the monitor's tick loop on a dedicated thread and stores the
/// handle so `Service::stop` can join it. Separated from `Service::start`
/// because the loop needs an owning `Arc<SystemMonitor>` to move into the
/// thread, which a `&self`-based trait method cannot hand out.
pub fn spawn_worker(monitor: Arc<SystemMonitor>) {
    let loop_monitor = Arc::clone(&monitor);
    let handle = thread::spawn(move || {
        while !loop_monitor.stop_requested.load(Ordering::SeqCst) {
            if let Err(err) = loop_monitor.tick() {
                warn!(error = %err, "monitor tick failed");
            }
            let interval = loop_monitor.state.read().unwrap_or_else(|p| p.into_inner()).interval;
            let mut slept = Duration::ZERO;
            while slept < interval && !loop_monitor.stop_requested.load(Ordering::SeqCst) {
                let step = STOP_CHECK_GRANULARITY.min(interval - slept);
                thread::sleep(step);
                slept += step;
            }
        }
    });
    *monitor.worker.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enricher::SampleSummaryEnricher;
    use crate::store::AlertStore;

    fn monitor_with_thresholds(warning: f32, critical: f32) -> (SystemMonitor, Arc<AlertManager>) {
        let store = Arc::new(AlertStore::open_in_memory().expect("open"));
        let manager = Arc::new(AlertManager::new(store).expect("manager"));
        let mut config = Config::default();
        config.monitoring.cpu = Threshold { warning, critical };
        let monitor = SystemMonitor::new(
            Arc::new(Sampler::default_mount()),
            Arc::clone(&manager),
            Arc::new(SampleSummaryEnricher),
            &config,
        );
        (monitor, manager)
    }

    #[test]
    fn warning_threshold_raises_warning_alert() {
        let (monitor, manager) = monitor_with_thresholds(80.0, 95.0);
        let sample = Sample {
            cpu_percent: 85.0,
            memory_percent: 10.0,
            disk_percent: 10.0,
            uptime_secs: 10,
            ..Sample::default()
        };
        monitor.evaluate_metric(Category::Cpu, sample.cpu_percent, Threshold { warning: 80.0, critical: 95.0 }, &sample).unwrap();
        assert_eq!(manager.counts().warning, 1);
        assert_eq!(manager.counts().critical, 0);
    }

    #[test]
    fn critical_threshold_raises_critical_and_clears_warning() {
        let (monitor, manager) = monitor_with_thresholds(80.0, 95.0);
        let threshold = Threshold { warning: 80.0, critical: 95.0 };
        let warn_sample = Sample { cpu_percent: 85.0, ..Sample::default() };
        monitor.evaluate_metric(Category::Cpu, 85.0, threshold, &warn_sample).unwrap();
        assert_eq!(manager.counts().warning, 1);

        let crit_sample = Sample { cpu_percent: 96.0, ..Sample::default() };
        monitor.evaluate_metric(Category::Cpu, 96.0, threshold, &crit_sample).unwrap();
        assert_eq!(manager.counts().critical, 1);
        assert_eq!(manager.counts().warning, 0);
    }

    #[test]
    fn downgrade_from_critical_to_warning_clears_critical() {
        let (monitor, manager) = monitor_with_thresholds(80.0, 95.0);
        let threshold = Threshold { warning: 80.0, critical: 95.0 };
        let crit_sample = Sample { cpu_percent: 96.0, ..Sample::default() };
        monitor.evaluate_metric(Category::Cpu, 96.0, threshold, &crit_sample).unwrap();
        assert_eq!(manager.counts().critical, 1);

        let warn_sample = Sample { cpu_percent: 82.0, ..Sample::default() };
        monitor.evaluate_metric(Category::Cpu, 82.0, threshold, &warn_sample).unwrap();
        assert_eq!(manager.counts().critical, 0);
        assert_eq!(manager.counts().warning, 1);
    }

    #[test]
    fn below_warning_clears_both_alerts() {
        let (monitor, manager) = monitor_with_thresholds(80.0, 95.0);
        let threshold = Threshold { warning: 80.0, critical: 95.0 };
        let warn_sample = Sample { cpu_percent: 85.0, ..Sample::default() };
        monitor.evaluate_metric(Category::Cpu, 85.0, threshold, &warn_sample).unwrap();

        let low_sample = Sample { cpu_percent: 10.0, ..Sample::default() };
        monitor.evaluate_metric(Category::Cpu, 10.0, threshold, &low_sample).unwrap();
        assert_eq!(manager.counts().total, 0);
    }

    #[test]
    fn apply_config_updates_clamped_interval() {
        let (monitor, _manager) = monitor_with_thresholds(80.0, 95.0);
        let mut config = Config::default();
        config.monitoring.interval_sec = 0;
        monitor.apply_config(&config);
        let state = monitor.state.read().unwrap();
        assert_eq!(state.interval, MIN_MONITOR_INTERVAL);
    }

    #[test]
    fn failed_services_raises_error_alert_and_retracts_on_recovery() {
        let (monitor, manager) = monitor_with_thresholds(80.0, 95.0);
        let failing = Sample { failed_services: 2, ..Sample::default() };
        monitor.evaluate_failed_services(&failing).unwrap();
        assert_eq!(manager.counts().error, 1);

        let recovered = Sample { failed_services: 0, ..Sample::default() };
        monitor.evaluate_failed_services(&recovered).unwrap();
        assert_eq!(manager.counts().error, 0);
    }

    #[test]
    fn tick_populates_latest_sample() {
        let (monitor, _manager) = monitor_with_thresholds(80.0, 95.0);
        assert!(monitor.latest_sample().is_none());
        monitor.tick().expect("tick");
        assert!(monitor.latest_sample().is_some());
    }
}
