use clap::Parser;
use oomwatch::config::AppConfig;
use oomwatch::daemon_handler::run_as_daemon;
use oomwatch::{core_logic, logger};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Command line options for oomwatch
#[derive(Debug, Parser)]
#[command(author, version, about = "Captures the task behind every kernel OOM kill", long_about = None)]
struct Cli {
    /// Path to configuration file (YAML). If not provided, search order applies.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run in foreground (do not daemonize). Equivalent to env OOMWATCH_NO_DAEMON=1
    #[arg(long)]
    foreground: bool,

    /// Print the path that was selected for configuration and exit
    #[arg(long)]
    print_config_path: bool,
}

fn candidate_config_paths() -> Vec<PathBuf> {
    let mut cands = Vec::new();
    if let Ok(p) = env::var("OOMWATCH_CONFIG") {
        cands.push(PathBuf::from(p));
    }
    cands.push(PathBuf::from("./oomwatch.yaml"));
    cands.push(PathBuf::from("/etc/oomwatch/oomwatch.yaml"));
    if let Ok(home) = env::var("XDG_CONFIG_HOME") {
        cands.push(PathBuf::from(home).join("oomwatch/oomwatch.yaml"));
    }
    if let Some(home_dir) = dirs_next::home_dir() {
        cands.push(home_dir.join(".config/oomwatch/oomwatch.yaml"));
    }
    cands
}

fn resolve_config_path(cli: &Cli) -> PathBuf {
    if let Some(explicit) = &cli.config {
        return explicit.clone();
    }
    if let Ok(env_path) = env::var("OOMWATCH_CONFIG") {
        return PathBuf::from(env_path);
    }
    candidate_config_paths()
        .into_iter()
        .find(|cand| cand.exists())
        .unwrap_or_else(|| PathBuf::from("oomwatch.yaml"))
}

fn env_flag(name: &str) -> bool {
    matches!(
        env::var(name)
            .unwrap_or_default()
            .to_ascii_lowercase()
            .as_str(),
        "1" | "true" | "yes"
    )
}

fn main() {
    let cli = Cli::parse();

    let raw_config_path = resolve_config_path(&cli);
    if cli.print_config_path {
        println!("{}", raw_config_path.display());
        return;
    }

    // SIGHUP reloads from this path, so it must survive the chdir
    let absolute_config_path = match std::fs::canonicalize(&raw_config_path) {
        Ok(path) => path,
        Err(e) => {
            eprintln!("Error: cannot access config {:?}: {}", raw_config_path, e);
            std::process::exit(1);
        }
    };

    let initial_config = match AppConfig::load_from_file(&absolute_config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!(
                "Error: failed to load config {:?}: {}",
                absolute_config_path, e
            );
            std::process::exit(1);
        }
    };
    let log_level = initial_config.log_level.clone();
    let shared_config = Arc::new(RwLock::new(initial_config));

    if cli.foreground || env_flag("OOMWATCH_NO_DAEMON") {
        logger::init_foreground_logging(log_level.as_deref());
        tracing::info!("Using configuration {:?}", absolute_config_path);
        core_logic::async_runtime(shared_config, absolute_config_path);
        return;
    }

    let config_for_closure = Arc::clone(&shared_config);
    let core_logic_closure =
        move || core_logic::async_runtime(config_for_closure, absolute_config_path);
    if let Err(e) = run_as_daemon(shared_config, core_logic_closure) {
        eprintln!("Main program: {}", e);
        std::process::exit(1);
    }
}
