use std::env;
use std::error::Error;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use hostwatchd::cli::{self, Cli};
use hostwatchd::config::{ConfigManager, resolve_config_path};
use hostwatchd::constants::{ALERT_DB_FILE_NAME, SOCKET_FILE_NAME};
use hostwatchd::daemon::Daemon;
use hostwatchd::enricher::{AlertEnricher, NoopEnricher, SampleSummaryEnricher};
use hostwatchd::ipc::{HandlerContext, IpcServer};
use hostwatchd::logger::{self, LogLevel};
use hostwatchd::manager::AlertManager;
use hostwatchd::monitor::SystemMonitor;
use hostwatchd::retention::RetentionSweeper;
use hostwatchd::runtime::{self, RuntimeMode};
use hostwatchd::sampler::Sampler;
use hostwatchd::store::AlertStore;

fn main() -> Result<(), Box<dyn Error>> {
    let args = cli::parse_args();

    logger::init(if args.verbose { LogLevel::Debug } else { LogLevel::Info });
    runtime::init(if running_as_root() { RuntimeMode::System } else { RuntimeMode::User });

    match run(&args) {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("hostwatchd: failed to start: {err}");
            process::exit(1);
        }
    }
}

fn run(args: &Cli) -> Result<i32, Box<dyn Error>> {
    let config_path = resolve_startup_config_path(args)?;

    let daemon = Daemon::global();
    daemon.initialize(config_path.as_deref())?;
    if let Some(path) = &config_path {
        info!(path = %path.display(), "loaded configuration");
    } else {
        warn!("no configuration file found; running with defaults");
    }

    let config = ConfigManager::global().get();

    let db_path = config
        .alerts
        .db_path
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| runtime::state_dir().join(ALERT_DB_FILE_NAME));
    let db_fallback = home_state_dir().join(ALERT_DB_FILE_NAME);
    let store = Arc::new(AlertStore::open(&db_path, &db_fallback)?);

    let manager = Arc::new(AlertManager::new(Arc::clone(&store))?);
    manager.on_alert(|alert| {
        info!(
            id = %alert.id,
            severity = %alert.severity,
            category = %alert.category,
            source = %alert.source,
            "alert active"
        );
    });

    let enricher: Arc<dyn AlertEnricher> = if config.alerts.enricher_enabled {
        Arc::new(SampleSummaryEnricher)
    } else {
        Arc::new(NoopEnricher)
    };

    let sampler = Arc::new(Sampler::default_mount());
    let monitor = Arc::new(SystemMonitor::new(
        Arc::clone(&sampler),
        Arc::clone(&manager),
        enricher,
        &config,
    ));

    let retention = Arc::new(RetentionSweeper::new(Arc::clone(&manager), &config));

    let socket_path = config
        .socket
        .path
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| runtime::state_dir().join(SOCKET_FILE_NAME));
    let handler_context = Arc::new(HandlerContext {
        manager: Arc::clone(&manager),
        monitor: Arc::clone(&monitor),
    });
    let ipc_server = Arc::new(IpcServer::new(
        socket_path,
        config.socket.backlog,
        Duration::from_millis(config.socket.timeout_ms),
        config.rate_limit.max_requests_per_sec,
        handler_context,
    ));

    {
        let monitor = Arc::clone(&monitor);
        ConfigManager::global().on_change(move |config| monitor.apply_config(config));
    }
    {
        let retention = Arc::clone(&retention);
        ConfigManager::global().on_change(move |config| retention.apply_config(config));
    }

    daemon.register_service(Box::new(Arc::clone(&ipc_server)))?;
    daemon.register_service(Box::new(Arc::clone(&monitor)))?;
    daemon.register_service(Box::new(Arc::clone(&retention)))?;

    if args.foreground {
        info!("running in the foreground");
    }

    Ok(daemon.run())
}

/// Resolves the configuration path to load at startup: an explicit
/// `--config` override, else `hostwatchd.yaml` in the current directory,
/// else the runtime's XDG-style configuration directories. Returns `None`
/// if nothing is found, in which case the daemon runs on defaults.
fn resolve_startup_config_path(args: &Cli) -> Result<Option<PathBuf>, Box<dyn Error>> {
    if let Some(path) = &args.config {
        return Ok(Some(path.clone()));
    }

    let mut search_dirs = vec![env::current_dir()?];
    search_dirs.extend(runtime::config_dirs());
    Ok(resolve_config_path(&search_dirs))
}

/// Home-scoped fallback for the alert database, used when the configured or
/// default location can't be opened. Independent of the active runtime
/// mode: even a system-mode daemon falls back to the invoking user's home.
fn home_state_dir() -> PathBuf {
    env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/"))
        .join(".hostwatchd")
}

/// Whether the process is running with root privileges, used to pick
/// between the user-scoped (`~/.hostwatchd`) and system-scoped
/// (`/var/lib/hostwatchd`) runtime directories at startup.
fn running_as_root() -> bool {
    // SAFETY: `geteuid` takes no arguments and never fails.
    unsafe { libc::geteuid() == 0 }
}
