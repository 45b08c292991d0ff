//! End-to-end system monitor tests: real sampling, threshold evaluation, and
//! the background tick-loop thread spawned by the `Service` impl.
use std::sync::Arc;
use std::time::Duration;

use hostwatchd::config::{Config, Threshold};
use hostwatchd::enricher::SampleSummaryEnricher;
use hostwatchd::manager::AlertManager;
use hostwatchd::monitor::SystemMonitor;
use hostwatchd::sampler::Sampler;
use hostwatchd::service::Service;
use hostwatchd::store::AlertStore;

fn manager() -> Arc<AlertManager> {
    let store = Arc::new(AlertStore::open_in_memory().expect("open"));
    Arc::new(AlertManager::new(store).expect("manager"))
}

#[test]
fn tick_against_a_zero_threshold_always_raises() {
    let manager = manager();
    let mut config = Config::default();
    config.monitoring.cpu = Threshold { warning: 0.0, critical: 0.0 };
    let monitor = SystemMonitor::new(
        Arc::new(Sampler::default_mount()),
        Arc::clone(&manager),
        Arc::new(SampleSummaryEnricher),
        &config,
    );

    monitor.tick().expect("tick");
    assert!(manager.counts().critical >= 1);
    assert!(monitor.latest_sample().is_some());
}

#[test]
fn tick_against_unreachable_thresholds_raises_nothing() {
    let manager = manager();
    let mut config = Config::default();
    for threshold in [&mut config.monitoring.cpu, &mut config.monitoring.memory, &mut config.monitoring.disk] {
        *threshold = Threshold { warning: 100.0, critical: 100.0 };
    }
    let monitor = SystemMonitor::new(
        Arc::new(Sampler::default_mount()),
        Arc::clone(&manager),
        Arc::new(SampleSummaryEnricher),
        &config,
    );

    monitor.tick().expect("tick");
    assert_eq!(manager.counts().warning, 0);
    assert_eq!(manager.counts().critical, 0);
}

#[test]
fn background_service_ticks_repeatedly_until_stopped() {
    let manager = manager();
    let mut config = Config::default();
    config.monitoring.interval_sec = 1;
    let monitor = Arc::new(SystemMonitor::new(
        Arc::new(Sampler::default_mount()),
        Arc::clone(&manager),
        Arc::new(SampleSummaryEnricher),
        &config,
    ));

    assert!(Service::start(&monitor));
    std::thread::sleep(Duration::from_millis(1200));
    Service::stop(&monitor);

    assert!(monitor.tick_count() >= 1);
    assert!(!monitor.is_running());
}

#[test]
fn apply_config_takes_effect_on_the_next_tick() {
    let manager = manager();
    let mut config = Config::default();
    for threshold in [&mut config.monitoring.cpu, &mut config.monitoring.memory, &mut config.monitoring.disk] {
        *threshold = Threshold { warning: 100.0, critical: 100.0 };
    }
    let monitor = SystemMonitor::new(
        Arc::new(Sampler::default_mount()),
        Arc::clone(&manager),
        Arc::new(SampleSummaryEnricher),
        &config,
    );
    monitor.tick().expect("first tick");
    assert_eq!(manager.counts().warning, 0);
    assert_eq!(manager.counts().critical, 0);

    let mut reloaded = config.clone();
    reloaded.monitoring.cpu = Threshold { warning: 0.0, critical: 0.0 };
    monitor.apply_config(&reloaded);

    monitor.tick().expect("second tick");
    assert!(manager.counts().total >= 1);
    assert_eq!(monitor.thresholds().cpu.critical, 0.0);
}
