//! Logging setup for podwatch-server.
//!
//! Levels come from the `[logging]` section of [`PodConfig`]. `RUST_LOG`
//! replaces the whole filter and `PODWATCH_LOG_LEVEL` replaces only the
//! default level. Per-sample telemetry records from the adapter get their own
//! directive, so they can be raised to `debug` without flooding everything
//! else.
//!
//! - **Production**: JSON to a daily rolling file + compact stdout for the journal
//! - **Development**: pretty stdout with span events
//!
//! [`PodConfig`]: podwatch_core::PodConfig

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::Context;
use podwatch_core::LoggingConfig;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable overriding the configured default level.
pub const LOG_LEVEL_ENV: &str = "PODWATCH_LOG_LEVEL";

/// Target of the per-sample telemetry records.
const SAMPLE_TARGET: &str = "podwatch_core::adapter";

/// Prefix of rolling log file names.
const FILE_PREFIX: &str = "podwatch";

/// Keep the non-blocking writers alive for the life of the process.
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();
static STDOUT_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Filter directives for `config`, with `level_override` replacing the
/// default level when set.
#[must_use]
pub fn filter_directives(config: &LoggingConfig, level_override: Option<&str>) -> String {
    let level = level_override.unwrap_or(&config.level);
    format!("{level},{SAMPLE_TARGET}={}", config.sample_level)
}

/// Directory for rolling log files: the configured one, else the platform
/// default.
#[must_use]
pub fn log_directory(config: &LoggingConfig) -> PathBuf {
    config.directory.clone().unwrap_or_else(default_log_directory)
}

/// Install the global subscriber.
///
/// # Errors
///
/// Returns an error if the filter cannot be parsed or, in production, if the
/// log directory cannot be created.
pub fn init(config: &LoggingConfig, is_production: bool) -> anyhow::Result<()> {
    let env_filter = if let Ok(filter) = EnvFilter::try_from_default_env() {
        filter
    } else {
        let level = std::env::var(LOG_LEVEL_ENV).ok();
        let directives = filter_directives(config, level.as_deref());
        EnvFilter::try_new(&directives)
            .with_context(|| format!("invalid log filter '{directives}'"))?
    };

    if is_production {
        let log_dir = log_directory(config);
        init_production(env_filter, &log_dir)?;
        info!(directory = %log_dir.display(), "Logging to rolling files");
    } else {
        init_development(env_filter);
    }

    Ok(())
}

fn init_production(env_filter: EnvFilter, log_dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("creating log directory {}", log_dir.display()))?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, FILE_PREFIX);
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(file_writer)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(stdout_writer)
        .with_target(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    let _ = FILE_GUARD.set(file_guard);
    let _ = STDOUT_GUARD.set(stdout_guard);
    Ok(())
}

fn init_development(env_filter: EnvFilter) {
    let stdout_layer = tracing_subscriber::fmt::layer()
        .pretty()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .init();
}

fn default_log_directory() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/log/podwatch")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "podwatch")
            .map_or_else(|| PathBuf::from("./logs"), |dirs| dirs.data_dir().join("logs"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives() {
        let config = LoggingConfig::default();
        assert_eq!(
            filter_directives(&config, None),
            "info,podwatch_core::adapter=info"
        );
    }

    #[test]
    fn test_sample_level_and_override() {
        let config = LoggingConfig {
            level: "info".to_string(),
            sample_level: "debug".to_string(),
            directory: None,
        };

        let directives = filter_directives(&config, Some("warn"));

        assert_eq!(directives, "warn,podwatch_core::adapter=debug");
        assert!(EnvFilter::try_new(&directives).is_ok());
    }

    #[test]
    fn test_configured_directory_wins() {
        let config = LoggingConfig {
            directory: Some(PathBuf::from("/srv/podwatch/logs")),
            ..LoggingConfig::default()
        };
        assert_eq!(log_directory(&config), PathBuf::from("/srv/podwatch/logs"));
    }

    #[test]
    fn test_default_directory() {
        let dir = log_directory(&LoggingConfig::default());
        assert!(dir.to_string_lossy().contains("podwatch") || dir.ends_with("logs"));
    }
}
