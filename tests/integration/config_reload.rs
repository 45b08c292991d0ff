//! End-to-end configuration load/reload tests: real files on disk, a real
//! `ConfigManager` instance, and subscriber fan-out.
use std::fs;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tempfile::tempdir;

use hostwatchd::config::{ConfigManager, load_config, resolve_config_path};
use hostwatchd::test_utils::env_lock;

fn write(dir: &std::path::Path, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).expect("write config");
    path
}

#[test]
fn load_config_rejects_invalid_yaml() {
    let dir = tempdir().expect("tempdir");
    let path = write(&dir, "hostwatchd.yaml", "socket: [this is not a mapping\n");
    assert!(load_config(&path).is_err());
}

#[test]
fn load_config_rejects_out_of_range_values() {
    let dir = tempdir().expect("tempdir");
    let path = write(&dir, "hostwatchd.yaml", "log_level: 9\n");
    assert!(load_config(&path).is_err());
}

#[test]
fn resolve_config_path_finds_the_file_in_the_first_matching_directory() {
    let primary = tempdir().expect("tempdir");
    let secondary = tempdir().expect("tempdir");
    write(&secondary, "hostwatchd.yaml", "log_level: 3\n");

    let resolved = resolve_config_path(&[primary.path().to_path_buf(), secondary.path().to_path_buf()]);
    assert_eq!(resolved, Some(secondary.path().join("hostwatchd.yaml")));
}

#[test]
fn reload_fans_out_to_every_subscriber_exactly_once() {
    // `ConfigManager::global()` is a process-wide singleton shared by every
    // test in this binary; serialize access so concurrent tests don't stomp
    // on each other's loaded path and subscriber list.
    let _guard = env_lock();
    let dir = tempdir().expect("tempdir");
    let path = write(&dir, "hostwatchd.yaml", "log_level: 1\n");

    let manager = ConfigManager::global();
    manager.load(&path).expect("load");

    let seen_a = Arc::new(AtomicU8::new(0));
    let seen_b = Arc::new(AtomicU8::new(0));
    {
        let seen_a = Arc::clone(&seen_a);
        manager.on_change(move |config| {
            seen_a.fetch_add(1, Ordering::SeqCst);
            assert_eq!(config.log_level, 2);
        });
    }
    {
        let seen_b = Arc::clone(&seen_b);
        manager.on_change(move |config| {
            seen_b.store(config.log_level, Ordering::SeqCst);
        });
    }

    write(&dir, "hostwatchd.yaml", "log_level: 2\n");
    manager.reload().expect("reload");

    assert_eq!(seen_a.load(Ordering::SeqCst), 1);
    assert_eq!(seen_b.load(Ordering::SeqCst), 2);
    assert_eq!(manager.get().log_level, 2);
}

#[test]
fn reload_with_invalid_replacement_keeps_the_previous_configuration() {
    let _guard = env_lock();
    let dir = tempdir().expect("tempdir");
    let path = write(&dir, "other.yaml", "log_level: 1\n");

    let manager = ConfigManager::global();
    manager.load(&path).expect("load");
    let before = manager.get().log_level;

    fs::write(&path, "log_level: 200\n").expect("overwrite with invalid config");
    assert!(manager.reload().is_err());
    assert_eq!(manager.get().log_level, before);
}
