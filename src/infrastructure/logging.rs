use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Configuration for console and file logging
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_dir: String,
    pub file_prefix: String,
    pub max_files: usize,
    pub enable_console: bool,
    pub enable_file: bool,
    pub log_level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: "logs".to_string(),
            file_prefix: "cache-lock.log".to_string(),
            max_files: 30, // Keep 30 days of logs
            enable_console: true,
            enable_file: false,
            log_level: "info".to_string(),
        }
    }
}

/// Keeps the non-blocking file writer flushing; drop it only at shutdown.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

impl LoggingConfig {
    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("cache_lock={},redis=warn", self.log_level))
        })
    }
}

/// Initialize logging with optional daily-rotated file output
pub fn init_logging(config: Option<LoggingConfig>) -> Result<LoggingGuard> {
    let config = config.unwrap_or_default();

    let mut layers: Vec<Box<dyn Layer<_> + Send + Sync>> = Vec::new();
    let mut file_guard = None;

    if config.enable_console {
        let console_layer = fmt::layer()
            .with_target(false)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_level(true)
            .with_ansi(true);
        layers.push(Box::new(console_layer));
    }

    if config.enable_file {
        fs::create_dir_all(&config.log_dir)
            .with_context(|| format!("cannot create log directory {}", config.log_dir))?;
        cleanup_old_logs(&config.log_dir, config.max_files)?;

        let appender =
            RollingFileAppender::new(Rotation::DAILY, &config.log_dir, &config.file_prefix);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        file_guard = Some(guard);

        let file_layer = fmt::layer()
            .with_writer(writer)
            .with_target(false)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_level(true)
            .with_ansi(false);
        layers.push(Box::new(file_layer));
    }

    tracing_subscriber::registry()
        .with(config.env_filter())
        .with(layers)
        .try_init()
        .context("a global tracing subscriber is already installed")?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

/// Remove the oldest `.log` files so that at most `max_files` remain.
pub fn cleanup_old_logs(log_dir: &str, max_files: usize) -> Result<usize> {
    let log_path = Path::new(log_dir);
    if !log_path.exists() {
        return Ok(0);
    }

    let mut log_files: Vec<_> = fs::read_dir(log_path)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .map(|name| name.contains(".log"))
                .unwrap_or(false)
        })
        .collect();

    // Oldest first
    log_files.sort_by_key(|entry| {
        entry
            .metadata()
            .and_then(|meta| meta.modified())
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
    });

    let mut removed = 0;
    if log_files.len() > max_files {
        let files_to_remove = log_files.len() - max_files;
        for entry in log_files.iter().take(files_to_remove) {
            if fs::remove_file(entry.path()).is_ok() {
                removed += 1;
            }
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_cleanup_keeps_newest_files() {
        let dir = std::env::temp_dir().join(format!("cache-lock-logs-{}", Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        for i in 0..4 {
            fs::write(dir.join(format!("cache-lock.log.2024-01-0{}", i + 1)), "x").unwrap();
        }
        fs::write(dir.join("notes.txt"), "keep").unwrap();

        let removed = cleanup_old_logs(dir.to_str().unwrap(), 2).unwrap();
        assert_eq!(removed, 2);

        let remaining = fs::read_dir(&dir).unwrap().count();
        assert_eq!(remaining, 3);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_cleanup_of_missing_dir_is_noop() {
        assert_eq!(cleanup_old_logs("/nonexistent/cache-lock-logs", 1).unwrap(), 0);
    }
}
