use crate::config::AppConfig;
use crate::logger;
use daemonize::Daemonize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Why oomwatch could not detach into the background.
#[derive(Debug)]
pub enum DaemonError {
    /// The log directory could not be created. Nothing was forked yet.
    LogDirectory {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Forking, the pid file or the chdir failed.
    Daemonize(daemonize::Error),
    /// The daemon is up but its file logging is not.
    Logging(String),
}

impl fmt::Display for DaemonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DaemonError::LogDirectory { path, source } => {
                write!(f, "cannot create log directory {}: {}", path.display(), source)
            }
            DaemonError::Daemonize(e) => write!(f, "failed to daemonize: {}", e),
            DaemonError::Logging(e) => write!(f, "failed to initialize logging: {}", e),
        }
    }
}

impl std::error::Error for DaemonError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DaemonError::LogDirectory { source, .. } => Some(source),
            DaemonError::Daemonize(e) => Some(e),
            DaemonError::Logging(_) => None,
        }
    }
}

impl From<daemonize::Error> for DaemonError {
    fn from(err: daemonize::Error) -> DaemonError {
        DaemonError::Daemonize(err)
    }
}

/// Where the detached process keeps its pid file and logs.
#[derive(Clone, Debug)]
pub struct DaemonConfig {
    pub pid_file: PathBuf,
    pub log_directory: PathBuf,
    pub working_dir: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        DaemonConfig {
            pid_file: PathBuf::from("/tmp/oomwatch.pid"),
            log_directory: PathBuf::from("/tmp/oomwatch"),
            working_dir: PathBuf::from("/"),
        }
    }
}

/// Detaches, switches logging to the rolling file and runs `core_logic_fn`
/// in the child. Returns once the core logic does.
pub fn run_as_daemon<F>(config: Arc<RwLock<AppConfig>>, core_logic_fn: F) -> Result<(), DaemonError>
where
    F: FnOnce() + Send + 'static,
{
    let (daemon_config, log_level) = {
        let config_guard = config.blocking_read();
        (config_guard.to_daemonize_config(), config_guard.log_level.clone())
    };

    // fail while the terminal is still attached
    std::fs::create_dir_all(&daemon_config.log_directory).map_err(|source| {
        DaemonError::LogDirectory {
            path: daemon_config.log_directory.clone(),
            source,
        }
    })?;
    println!("Starting oomwatch in the background");
    println!("PID file: {:?}", daemon_config.pid_file);
    println!("Log directory: {:?}", daemon_config.log_directory);

    Daemonize::new()
        .pid_file(&daemon_config.pid_file)
        .chown_pid_file(false)
        .working_directory(&daemon_config.working_dir)
        .umask(0o027)
        .start()?;

    let log_guard = logger::init_daemon_logging(&daemon_config.log_directory, log_level.as_deref())
        .map_err(|e| DaemonError::Logging(e.to_string()))?;
    tracing::info!(
        pid = std::process::id(),
        "oomwatch detached; pid file {}",
        daemon_config.pid_file.display()
    );

    core_logic_fn();

    // flush the non-blocking writer before the process goes away
    drop(log_guard);
    std::thread::sleep(std::time::Duration::from_millis(100));
    Ok(())
}
