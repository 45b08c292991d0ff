//! Local IPC server (C6) and request/response protocol (C7): a length-bounded,
//! one-request-one-response stream socket exposing introspection and control
//! operations to local clients.
//!
//! The listening socket is created with a caller-chosen backlog via a raw
//! `libc` socket/bind/listen sequence, since `std::os::unix::net::UnixListener`
//! hardcodes its own backlog and offers no way to override it.
use std::ffi::CString;
use std::fs;
use std::io::{self, Read, Write};
use std::mem;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::io::FromRawFd;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::alert::{Category, Severity, Status};
use crate::config::{Config, ConfigManager};
use crate::constants::{MAX_MESSAGE_SIZE, RUNTIME_DIR_MODE, SOCKET_FILE_MODE, error_code};
use crate::daemon::Daemon;
use crate::error::{IpcError, StoreError};
use crate::logger::{self, LogLevel};
use crate::manager::{AlertCounts, AlertManager};
use crate::monitor::SystemMonitor;
use crate::ratelimit::RateLimiter;
use crate::service::Service;

/// Platform socket path budget, kept well under `sockaddr_un.sun_path`'s
/// 108-byte capacity to leave room for the null terminator and any prefix a
/// caller might reasonably add.
const MAX_SOCKET_PATH_LEN: usize = 100;

const DAEMON_NAME: &str = "hostwatchd";
const DAEMON_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Inbound request envelope: a method name, optional parameters, and an
/// optional correlation id echoed back unchanged in the response.
#[derive(Debug, Deserialize)]
struct Request {
    method: String,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    id: Option<Value>,
}

/// A structured protocol- or application-level error.
#[derive(Debug, Serialize)]
struct RpcError {
    code: i32,
    message: String,
}

impl RpcError {
    fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Outbound response envelope.
#[derive(Debug, Serialize)]
struct Response {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Value>,
    timestamp: String,
}

impl Response {
    fn ok(result: Value, id: Option<Value>) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
            id,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    fn err(error: RpcError, id: Option<Value>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error),
            id,
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// Shared state every handler dispatches against.
pub struct HandlerContext {
    /// Alert lifecycle and query surface.
    pub manager: Arc<AlertManager>,
    /// Read-side access to the latest sample and active thresholds.
    pub monitor: Arc<SystemMonitor>,
}

/// Owns the IPC endpoint: the bound listener, its accept thread, and the
/// per-connection accounting needed for a clean, drained shutdown.
pub struct IpcServer {
    path: PathBuf,
    backlog: u32,
    timeout: Duration,
    rate_limiter: Arc<RateLimiter>,
    context: Arc<HandlerContext>,
    listener_slot: Mutex<Option<UnixListener>>,
    accept_handle: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
    active_connections: AtomicU64,
    connections_served: AtomicU64,
    drain_lock: Mutex<()>,
    drain_cond: Condvar,
}

impl IpcServer {
    /// Builds a server bound to `path` once `start()` is called. `backlog`
    /// and `timeout` come from `SocketConfig`; `max_requests_per_sec` seeds
    /// the shared rate limiter.
    pub fn new(
        path: PathBuf,
        backlog: u32,
        timeout: Duration,
        max_requests_per_sec: u32,
        context: Arc<HandlerContext>,
    ) -> Self {
        Self {
            path,
            backlog,
            timeout,
            rate_limiter: Arc::new(RateLimiter::new(max_requests_per_sec)),
            context,
            listener_slot: Mutex::new(None),
            accept_handle: Mutex::new(None),
            running: AtomicBool::new(false),
            active_connections: AtomicU64::new(0),
            connections_served: AtomicU64::new(0),
            drain_lock: Mutex::new(()),
            drain_cond: Condvar::new(),
        }
    }

    /// Number of connections currently being handled.
    pub fn active_connections(&self) -> u64 {
        self.active_connections.load(Ordering::SeqCst)
    }

    /// Total connections accepted since the endpoint was bound.
    pub fn connections_served(&self) -> u64 {
        self.connections_served.load(Ordering::SeqCst)
    }

    /// Path of the bound endpoint.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn bind(&self) -> Result<UnixListener, IpcError> {
        if self.path.as_os_str().len() >= MAX_SOCKET_PATH_LEN {
            return Err(IpcError::PathTooLong(self.path.display().to_string()));
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
            let _ = fs::set_permissions(parent, fs::Permissions::from_mode(RUNTIME_DIR_MODE));
        }
        let _ = fs::remove_file(&self.path);
        let listener = bind_with_backlog(&self.path, self.backlog)?;
        fs::set_permissions(&self.path, fs::Permissions::from_mode(SOCKET_FILE_MODE))?;
        Ok(listener)
    }
}

impl Service for IpcServer {
    /// Binds and listens on the configured endpoint. The accept loop itself
    /// is started separately via `spawn_accept_loop`, which needs an owning
    /// `Arc<Self>` to move into its thread.
    fn start(&self) -> bool {
        match self.bind() {
            Ok(listener) => {
                *self
                    .listener_slot
                    .lock()
                    .unwrap_or_else(|p| p.into_inner()) = Some(listener);
                self.running.store(true, Ordering::SeqCst);
                true
            }
            Err(err) => {
                error!(error = %err, path = %self.path.display(), "failed to bind ipc endpoint");
                false
            }
        }
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self
            .accept_handle
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
        {
            let _ = handle.join();
        }

        let guard = self.drain_lock.lock().unwrap_or_else(|p| p.into_inner());
        let _ = self
            .drain_cond
            .wait_timeout_while(guard, Duration::from_secs(10), |_| {
                self.active_connections.load(Ordering::SeqCst) > 0
            });

        let _ = fs::remove_file(&self.path);
        info!(path = %self.path.display(), "ipc server stopped");
    }

    fn name(&self) -> String {
        "ipc_server".to_string()
    }

    fn priority(&self) -> i32 {
        10
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn is_healthy(&self) -> bool {
        self.is_running()
    }
}

/// Delegates `Service` to the owning `Arc`, so the daemon's registry can hold
/// a trait object while callers keep their own strong reference for
/// building the handler context. `start` additionally spawns the accept
/// loop, which needs an owning `Arc<IpcServer>` that `IpcServer::start`'s
/// `&self` receiver cannot produce on its own.
impl Service for Arc<IpcServer> {
    fn start(&self) -> bool {
        if !(**self).start() {
            return false;
        }
        spawn_accept_loop(Arc::clone(self));
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

/// Spawns the accept loop on a dedicated thread. The listener is polled
/// non-blocking so the thread can observe `stop()`'s running flag promptly
/// without relying on platform-specific shutdown-of-listening-socket
/// semantics.
pub fn spawn_accept_loop(server: Arc<IpcServer>) {
    let listener = server
        .listener_slot
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .take();
    let Some(listener) = listener else {
        error!("spawn_accept_loop called before the endpoint was bound");
        return;
    };
    if let Err(err) = listener.set_nonblocking(true) {
        error!(error = %err, "failed to set ipc listener non-blocking");
        return;
    }

    let handle = thread::spawn(move || {
        while server.running.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, _addr)) => {
                    server.active_connections.fetch_add(1, Ordering::SeqCst);
                    server.connections_served.fetch_add(1, Ordering::SeqCst);
                    let timeout = server.timeout;
                    let rate_limiter = Arc::clone(&server.rate_limiter);
                    let context = Arc::clone(&server.context);
                    let server_for_drain = Arc::clone(&server);
                    thread::spawn(move || {
                        handle_connection(stream, timeout, &rate_limiter, &context);
                        server_for_drain
                            .active_connections
                            .fetch_sub(1, Ordering::SeqCst);
                        server_for_drain.drain_cond.notify_all();
                    });
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(50));
                }
                Err(err) => {
                    warn!(error = %err, "ipc accept failed");
                }
            }
        }
    });
    *server
        .accept_handle
        .lock()
        .unwrap_or_else(|p| p.into_inner()) = Some(handle);
}

fn handle_connection(
    mut stream: UnixStream,
    timeout: Duration,
    rate_limiter: &RateLimiter,
    context: &HandlerContext,
) {
    let _ = stream.set_read_timeout(Some(timeout));
    let _ = stream.set_write_timeout(Some(timeout));

    let response = if !rate_limiter.try_acquire() {
        debug!("ipc request rejected by rate limiter");
        Response::err(RpcError::new(error_code::RATE_LIMITED, "rate limit exceeded"), None)
    } else {
        match read_request(&mut stream) {
            Ok(bytes) => match serde_json::from_slice::<Request>(&bytes) {
                Ok(request) => {
                    let id = request.id.clone();
                    match dispatch(&request.method, request.params, context) {
                        Ok(result) => Response::ok(result, id),
                        Err(error) => Response::err(error, id),
                    }
                }
                Err(err) => Response::err(
                    RpcError::new(error_code::PARSE_ERROR, format!("invalid request: {err}")),
                    None,
                ),
            },
            Err(IpcError::MessageTooLarge) => Response::err(
                RpcError::new(error_code::INVALID_REQUEST, "request exceeds maximum message size"),
                None,
            ),
            Err(err) => {
                warn!(error = %err, "failed to read ipc request");
                return;
            }
        }
    };

    if let Err(err) = write_response(&mut stream, &response) {
        warn!(error = %err, "failed to write ipc response");
    }
}

fn read_request(stream: &mut UnixStream) -> Result<Vec<u8>, IpcError> {
    let mut buf = Vec::new();
    let mut limited = stream.by_ref().take((MAX_MESSAGE_SIZE + 1) as u64);
    limited.read_to_end(&mut buf)?;
    if buf.len() > MAX_MESSAGE_SIZE {
        return Err(IpcError::MessageTooLarge);
    }
    Ok(buf)
}

fn write_response(stream: &mut UnixStream, response: &Response) -> Result<(), IpcError> {
    let bytes = serde_json::to_vec(response)?;
    stream.write_all(&bytes)?;
    stream.flush()?;
    Ok(())
}

fn store_error_to_rpc(err: &StoreError) -> RpcError {
    match err {
        StoreError::NotFound(_) => RpcError::new(error_code::ALERT_NOT_FOUND, err.to_string()),
        other => RpcError::new(error_code::INTERNAL_ERROR, other.to_string()),
    }
}

fn dispatch(method: &str, params: Option<Value>, ctx: &HandlerContext) -> Result<Value, RpcError> {
    match method {
        "ping" => Ok(json!({"pong": true})),
        "version" => Ok(json!({"name": DAEMON_NAME, "version": DAEMON_VERSION})),
        "config.get" => handle_config_get(),
        "config.reload" => handle_config_reload(),
        "shutdown" => {
            Daemon::global().request_shutdown();
            Ok(json!({"shutdown": "initiated"}))
        }
        "health" => handle_health(ctx),
        "alerts" | "alerts.get" => handle_alerts_get(ctx, params),
        "alerts.acknowledge" => handle_alerts_acknowledge(ctx, params),
        "alerts.dismiss" => handle_alerts_dismiss(ctx, params),
        other => Err(RpcError::new(
            error_code::METHOD_NOT_FOUND,
            format!("unknown method '{other}'"),
        )),
    }
}

fn handle_config_get() -> Result<Value, RpcError> {
    let config: Config = ConfigManager::global().get();
    serde_json::to_value(&config)
        .map_err(|err| RpcError::new(error_code::INTERNAL_ERROR, err.to_string()))
}

fn handle_config_reload() -> Result<Value, RpcError> {
    ConfigManager::global()
        .reload()
        .map_err(|err| RpcError::new(error_code::CONFIG_ERROR, err.to_string()))?;
    logger::set_level(LogLevel::from_u8(ConfigManager::global().get().log_level));
    Ok(json!({"reloaded": true}))
}

fn handle_health(ctx: &HandlerContext) -> Result<Value, RpcError> {
    let sample = ctx.monitor.latest_sample().ok_or_else(|| {
        RpcError::new(error_code::INTERNAL_ERROR, "monitor has not completed a sampling cycle yet")
    })?;
    let thresholds = ctx.monitor.thresholds();
    Ok(json!({
        "cpu": {
            "percent": sample.cpu_percent,
            "cores": sample.cpu_cores,
        },
        "memory": {
            "percent": sample.memory_percent,
            "total_bytes": sample.memory_total_bytes,
            "used_bytes": sample.memory_used_bytes,
            "available_bytes": sample.memory_available_bytes,
        },
        "disk": {
            "mount_point": sample.disk_mount_point,
            "percent": sample.disk_percent,
            "total_bytes": sample.disk_total_bytes,
            "used_bytes": sample.disk_used_bytes,
            "available_bytes": sample.disk_available_bytes,
        },
        "uptime_secs": sample.uptime_secs,
        "failed_services": sample.failed_services,
        "thresholds": {
            "cpu": {"warning": thresholds.cpu.warning, "critical": thresholds.cpu.critical},
            "memory": {"warning": thresholds.memory.warning, "critical": thresholds.memory.critical},
            "disk": {"warning": thresholds.disk.warning, "critical": thresholds.disk.critical},
        },
    }))
}

fn handle_alerts_get(ctx: &HandlerContext, params: Option<Value>) -> Result<Value, RpcError> {
    let severity_filter = params
        .as_ref()
        .and_then(|p| p.get("severity"))
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<Severity>().ok());
    let category_filter = params
        .as_ref()
        .and_then(|p| p.get("category"))
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<Category>().ok());
    let status_filter = params
        .as_ref()
        .and_then(|p| p.get("status"))
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<Status>().ok());
    let source_filter = params
        .as_ref()
        .and_then(|p| p.get("source"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let include_dismissed = params
        .as_ref()
        .and_then(|p| p.get("include_dismissed"))
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let alerts = ctx
        .manager
        .list(status_filter)
        .map_err(|err| store_error_to_rpc(&err))?;

    let filtered: Vec<_> = alerts
        .into_iter()
        .filter(|a| severity_filter.map(|s| a.severity == s).unwrap_or(true))
        .filter(|a| category_filter.map(|c| a.category == c).unwrap_or(true))
        .filter(|a| source_filter.as_deref().map(|s| a.source == s).unwrap_or(true))
        .filter(|a| status_filter.is_some() || include_dismissed || a.status != Status::Dismissed)
        .collect();

    let counts: AlertCounts = ctx.manager.counts();
    Ok(json!({
        "alerts": filtered,
        "count": filtered.len(),
        "counts": counts,
    }))
}

fn handle_alerts_acknowledge(ctx: &HandlerContext, params: Option<Value>) -> Result<Value, RpcError> {
    let all = params
        .as_ref()
        .and_then(|p| p.get("all"))
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    if all {
        let acknowledged = ctx
            .manager
            .acknowledge_all_active()
            .map_err(|err| store_error_to_rpc(&err))?;
        return Ok(json!({"acknowledged": acknowledged}));
    }

    let uuid_str = params
        .as_ref()
        .and_then(|p| p.get("uuid"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| RpcError::new(error_code::INVALID_PARAMS, "missing 'uuid' or 'all' parameter"))?;
    let id = Uuid::parse_str(uuid_str)
        .map_err(|err| RpcError::new(error_code::INVALID_PARAMS, format!("invalid uuid: {err}")))?;
    ctx.manager
        .acknowledge(id)
        .map_err(|err| store_error_to_rpc(&err))?;
    Ok(json!({"acknowledged": true, "uuid": id}))
}

fn handle_alerts_dismiss(ctx: &HandlerContext, params: Option<Value>) -> Result<Value, RpcError> {
    let uuid_str = params
        .as_ref()
        .and_then(|p| p.get("uuid"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| RpcError::new(error_code::INVALID_PARAMS, "missing 'uuid' parameter"))?;
    let id = Uuid::parse_str(uuid_str)
        .map_err(|err| RpcError::new(error_code::INVALID_PARAMS, format!("invalid uuid: {err}")))?;
    ctx.manager
        .dismiss(id)
        .map_err(|err| store_error_to_rpc(&err))?;
    Ok(json!({"dismissed": true, "uuid": id}))
}

/// Binds a Unix domain stream socket at `path` with an explicit `backlog`,
/// since `UnixListener::bind` hardcodes the kernel default and exposes no
/// way to override it.
fn bind_with_backlog(path: &Path, backlog: u32) -> io::Result<UnixListener> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
    let bytes = c_path.as_bytes();

    unsafe {
        let fd = libc::socket(libc::AF_UNIX, libc::SOCK_STREAM, 0);
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        let mut addr: libc::sockaddr_un = mem::zeroed();
        addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
        if bytes.len() >= addr.sun_path.len() {
            libc::close(fd);
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "socket path exceeds platform length limit",
            ));
        }
        for (slot, byte) in addr.sun_path.iter_mut().zip(bytes.iter()) {
            *slot = *byte as libc::c_char;
        }

        let addr_len = (mem::size_of::<libc::sa_family_t>() + bytes.len() + 1) as libc::socklen_t;
        let addr_ptr = &addr as *const libc::sockaddr_un as *const libc::sockaddr;
        if libc::bind(fd, addr_ptr, addr_len) != 0 {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err);
        }
        if libc::listen(fd, backlog as i32) != 0 {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err);
        }
        Ok(UnixListener::from_raw_fd(fd))
    }
}
