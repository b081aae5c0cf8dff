use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const LOG_FILE_PREFIX: &str = "oomwatch.log";

const DEFAULT_FILTER: &str = "info";

/// `RUST_LOG` when set, then the config's `log_level`, then `info`.
pub fn filter_directive(rust_log: Option<String>, log_level: Option<&str>) -> String {
    rust_log
        .filter(|value| !value.trim().is_empty())
        .or_else(|| log_level.map(str::to_string))
        .unwrap_or_else(|| DEFAULT_FILTER.to_string())
}

fn env_filter(log_level: Option<&str>) -> Result<(EnvFilter, String), String> {
    let filter_str = filter_directive(std::env::var("RUST_LOG").ok(), log_level);
    let filter = EnvFilter::try_new(&filter_str)
        .map_err(|e| format!("Failed to parse log filter '{}': {}", filter_str, e))?;
    Ok((filter, filter_str))
}

/// Daily rolling file log for daemon mode. The returned guard must live as
/// long as the process wants its logs flushed.
pub fn init_daemon_logging(
    log_directory: &Path,
    log_level: Option<&str>,
) -> Result<WorkerGuard, Box<dyn std::error::Error>> {
    let file_appender = tracing_appender::rolling::daily(log_directory, LOG_FILE_PREFIX);
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);
    let (filter, filter_str) = env_filter(log_level)?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking_writer)
        .with_ansi(false)
        .try_init()
        .map_err(|e| format!("Failed to initialize tracing subscriber: {}", e))?;

    tracing::info!(
        "Logging initialized. Log directory: {}",
        log_directory.display()
    );
    tracing::info!("Log filter '{}'", filter_str);

    Ok(guard)
}

/// Coloured stderr logging for `--foreground`.
pub fn init_foreground_logging(log_level: Option<&str>) {
    let filter = env_filter(log_level)
        .map(|(filter, _)| filter)
        .unwrap_or_else(|e| {
            eprintln!("{}; falling back to 'info'", e);
            EnvFilter::new(DEFAULT_FILTER)
        });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rust_log_wins_over_config() {
        assert_eq!(
            filter_directive(Some("oomwatch=trace".into()), Some("warn")),
            "oomwatch=trace"
        );
    }

    #[test]
    fn config_level_is_the_fallback() {
        assert_eq!(filter_directive(None, Some("debug")), "debug");
        assert_eq!(filter_directive(Some("  ".into()), Some("debug")), "debug");
        assert_eq!(filter_directive(None, None), "info");
        assert!(EnvFilter::try_new(filter_directive(None, Some("warn"))).is_ok());
    }
}
