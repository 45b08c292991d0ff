//! End-to-end IPC server tests: a bound `IpcServer` driven over a real Unix
//! domain socket, exercising the wire protocol rather than `dispatch`
//! directly.
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tempfile::tempdir;

use hostwatchd::alert::{Category, Severity};
use hostwatchd::config::Config;
use hostwatchd::enricher::SampleSummaryEnricher;
use hostwatchd::ipc::{HandlerContext, IpcServer};
use hostwatchd::manager::AlertManager;
use hostwatchd::monitor::SystemMonitor;
use hostwatchd::sampler::Sampler;
use hostwatchd::service::Service;
use hostwatchd::store::AlertStore;

struct Harness {
    server: Arc<IpcServer>,
    path: std::path::PathBuf,
    manager: Arc<AlertManager>,
    _dir: tempfile::TempDir,
}

fn harness(max_requests_per_sec: u32) -> Harness {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("hostwatchd.sock");

    let store = Arc::new(AlertStore::open_in_memory().expect("open store"));
    let manager = Arc::new(AlertManager::new(Arc::clone(&store)).expect("manager"));
    let config = Config::default();
    let monitor = Arc::new(SystemMonitor::new(
        Arc::new(Sampler::default_mount()),
        Arc::clone(&manager),
        Arc::new(SampleSummaryEnricher),
        &config,
    ));
    let context = Arc::new(HandlerContext {
        manager: Arc::clone(&manager),
        monitor,
    });
    let server = Arc::new(IpcServer::new(
        path.clone(),
        16,
        Duration::from_millis(500),
        max_requests_per_sec,
        context,
    ));
    assert!(Service::start(&server), "server failed to bind");

    Harness {
        server,
        path,
        manager,
        _dir: dir,
    }
}

fn request(path: &Path, body: &str) -> Value {
    let mut stream = UnixStream::connect(path).expect("connect");
    stream.write_all(body.as_bytes()).expect("write");
    stream.shutdown(std::net::Shutdown::Write).expect("shutdown write");
    let mut response = String::new();
    stream.read_to_string(&mut response).expect("read");
    serde_json::from_str(&response).expect("parse response")
}

impl Drop for Harness {
    fn drop(&mut self) {
        Service::stop(&self.server);
    }
}

#[test]
fn ping_round_trips_with_an_echoed_id() {
    let harness = harness(50);
    let response = request(&harness.path, r#"{"method":"ping","id":7}"#);
    assert_eq!(response["success"], true);
    assert_eq!(response["result"]["pong"], true);
    assert_eq!(response["id"], 7);
}

#[test]
fn unbound_method_returns_method_not_found() {
    let harness = harness(50);
    let response = request(&harness.path, r#"{"method":"does.not.exist"}"#);
    assert_eq!(response["success"], false);
    assert_eq!(response["error"]["code"], -32601);
}

#[test]
fn malformed_json_returns_parse_error() {
    let harness = harness(50);
    let response = request(&harness.path, "not json at all");
    assert_eq!(response["success"], false);
    assert_eq!(response["error"]["code"], -32700);
}

#[test]
fn alerts_raised_through_the_manager_are_visible_over_ipc() {
    let harness = harness(50);
    harness
        .manager
        .raise(Severity::Warning, Category::Cpu, "cpu0", "load high")
        .expect("raise");

    let response = request(&harness.path, r#"{"method":"alerts"}"#);
    assert_eq!(response["success"], true);
    assert_eq!(response["result"]["count"], 1);
    assert_eq!(response["result"]["counts"]["warning"], 1);
}

#[test]
fn acknowledge_all_clears_active_counts_over_ipc() {
    let harness = harness(50);
    harness
        .manager
        .raise(Severity::Critical, Category::Disk, "/", "disk full")
        .expect("raise");

    let response = request(&harness.path, r#"{"method":"alerts.acknowledge","params":{"all":true}}"#);
    assert_eq!(response["success"], true);
    assert_eq!(response["result"]["acknowledged"], 1);
    assert_eq!(harness.manager.counts().total, 0);
}

#[test]
fn rate_limited_requests_receive_a_structured_error() {
    let harness = harness(1);
    let first = request(&harness.path, r#"{"method":"ping"}"#);
    assert_eq!(first["success"], true);

    let second = request(&harness.path, r#"{"method":"ping"}"#);
    assert_eq!(second["success"], false);
    assert_eq!(second["error"]["code"], 102);
}

#[test]
fn config_get_returns_the_active_configuration_shape() {
    let harness = harness(50);
    let response = request(&harness.path, r#"{"method":"config.get"}"#);
    assert_eq!(response["success"], true);
    assert!(response["result"]["socket"].is_object());
    assert!(response["result"]["monitoring"].is_object());
}

#[test]
fn oversized_request_is_rejected_as_invalid() {
    let harness = harness(50);
    let oversized = json!({"method": "ping", "params": "x".repeat(70 * 1024)}).to_string();
    let response = request(&harness.path, &oversized);
    assert_eq!(response["success"], false);
    assert_eq!(response["error"]["code"], -32600);
}
