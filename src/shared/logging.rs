use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_appender::non_blocking;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Keeps the non-blocking writers flushing; drop it only at process exit.
pub struct LoggingGuards {
    _guards: Vec<WorkerGuard>,
}

/// Initialize logging for a toolmark process (file + console, or console only
/// when `log_dir` is not writable). Console output goes to stderr so that
/// stdout stays free for event output.
pub fn init_service_logging(log_dir: &str, service_name: &str) -> Result<LoggingGuards, anyhow::Error> {
    // Set up environment filter (can be controlled via RUST_LOG env var)
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if can_write_to(log_dir) {
        use tracing_appender::rolling;

        // Rotate before the appender reopens today's file
        let rotated = rotate_logs_on_startup(log_dir, service_name);

        let file_appender = rolling::daily(log_dir, format!("{service_name}.log"));
        let (file_writer, file_guard) = non_blocking(file_appender);
        let (console_writer, console_guard) = non_blocking(std::io::stderr());

        let file_layer = fmt::layer()
            .with_writer(file_writer)
            .with_ansi(false) // No colors in file logs
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true);

        let console_layer = fmt::layer()
            .with_writer(console_writer)
            .with_ansi(true)
            .with_target(false)
            .with_thread_ids(false)
            .with_line_number(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .with(console_layer)
            .try_init()?;

        match rotated {
            Ok(Some(backup_file)) => info!("Previous log file backed up to: {backup_file}"),
            Ok(None) => {}
            Err(e) => warn!("Failed to rotate previous log file: {e:#}"),
        }
        info!("Logging initialized - logs will be written to {log_dir}/{service_name}.log.<date>");
        Ok(LoggingGuards {
            _guards: vec![file_guard, console_guard],
        })
    } else {
        let (console_writer, console_guard) = non_blocking(std::io::stderr());

        let console_layer = fmt::layer()
            .with_writer(console_writer)
            .with_ansi(true)
            .with_target(false)
            .with_thread_ids(false)
            .with_line_number(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .try_init()?;

        info!("Logging initialized - console output only (could not create log directory)");
        Ok(LoggingGuards {
            _guards: vec![console_guard],
        })
    }
}

fn can_write_to(log_dir: &str) -> bool {
    let marker = format!("{log_dir}/.test_write");
    std::fs::create_dir_all(log_dir)
        .and_then(|_| std::fs::File::create(&marker))
        .and_then(|_| std::fs::remove_file(&marker))
        .is_ok()
}

/// Today's file as written by the daily rolling appender (`<service>.log.YYYY-MM-DD`, UTC).
pub fn daily_log_path(log_dir: &str, service_name: &str) -> PathBuf {
    let date = chrono::Utc::now().format("%Y-%m-%d");
    Path::new(log_dir).join(format!("{service_name}.log.{date}"))
}

/// Moves today's log from an earlier run aside so each run starts a fresh file.
pub fn rotate_logs_on_startup(log_dir: &str, service_name: &str) -> Result<Option<String>, anyhow::Error> {
    let log_path = daily_log_path(log_dir, service_name);

    if !log_path.exists() {
        return Ok(None);
    }

    let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let backup_file = format!("{log_dir}/{service_name}.{timestamp}.log");
    std::fs::rename(&log_path, &backup_file)?;
    Ok(Some(backup_file))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotate_moves_existing_log() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().to_str().unwrap();
        assert_eq!(rotate_logs_on_startup(log_dir, "replay").unwrap(), None);

        let daily = daily_log_path(log_dir, "replay");
        assert!(daily
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap()
            .starts_with("replay.log."));
        std::fs::write(&daily, "old").unwrap();
        let backup = rotate_logs_on_startup(log_dir, "replay").unwrap().unwrap();
        assert!(!daily.exists());
        assert_eq!(std::fs::read_to_string(backup).unwrap(), "old");
    }

    #[test]
    fn test_init_with_file_and_console() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().to_str().unwrap();
        std::fs::write(daily_log_path(log_dir, "replay"), "previous run").unwrap();

        let guards = init_service_logging(log_dir, "replay").unwrap();
        info!("first line of this run");
        drop(guards);

        let rotated = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".log"))
            .count();
        assert_eq!(rotated, 1);
        // A second global subscriber is refused rather than panicking.
        assert!(init_service_logging(log_dir, "replay").is_err());
    }

    #[test]
    fn test_can_write_to() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        assert!(can_write_to(nested.to_str().unwrap()));
        assert!(!nested.join(".test_write").exists());
    }
}
