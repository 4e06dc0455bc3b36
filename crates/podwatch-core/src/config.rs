//! Application configuration management.
//!
//! Configuration is layered: built-in defaults, then an optional TOML file,
//! then `PODWATCH_`-prefixed environment variables with `__` between section
//! and key (`PODWATCH_THRESHOLDS__WET_THRESHOLD=60`).
//!
//! Sections:
//! - `thresholds`: classification and temperature spike thresholds
//! - `link`: scan and connect timeouts, default transport
//! - `history`: optional retention cap
//! - `display`: timezone for clock labels
//! - `simulator`: sample cadence of the simulated pod
//! - `server`: HTTP bind address
//! - `logging`: log levels and the rolling log directory

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use ::config::{Config, Environment, File, FileFormat};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use tracing::{debug, info};
use utoipa::ToSchema;

use crate::link::Transport;
use crate::status::Thresholds;
use crate::telemetry::{MAX_TEMPERATURE_C, MIN_TEMPERATURE_C};

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "PODWATCH";

/// Errors from loading, saving, or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly requested configuration file does not exist.
    #[error("configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The configuration file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    ReadError {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The configuration file could not be written.
    #[error("failed to write {}: {source}", path.display())]
    WriteError {
        /// File that was being written.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The layered sources could not be merged into a configuration.
    #[error("failed to parse configuration: {0}")]
    ParseError(#[from] ::config::ConfigError),

    /// The configuration could not be rendered as TOML.
    #[error("failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// A single field holds an invalid value.
    #[error("{field}: {message}")]
    ValidationError {
        /// Dotted path of the offending field.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields hold invalid values.
    #[error("{} validation errors", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

impl ConfigError {
    fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct PodConfig {
    /// Classification thresholds.
    pub thresholds: Thresholds,
    /// Device link timeouts.
    pub link: LinkConfig,
    /// Event history retention.
    pub history: HistoryConfig,
    /// Presentation settings.
    pub display: DisplayConfig,
    /// Simulated pod settings.
    pub simulator: SimulatorConfig,
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Log levels and file output.
    pub logging: LoggingConfig,
}

/// Device link settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct LinkConfig {
    /// How long a scan collects results, in milliseconds.
    #[schema(example = 2000)]
    pub scan_timeout_ms: u64,

    /// How long a connect attempt may take, in milliseconds.
    #[schema(example = 10000)]
    pub connect_timeout_ms: u64,

    /// Transport used when a scan does not name one.
    pub default_transport: Transport,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            scan_timeout_ms: 2_000,
            connect_timeout_ms: 10_000,
            default_transport: Transport::Bluetooth,
        }
    }
}

/// Event history settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct HistoryConfig {
    /// Maximum number of events kept. Unbounded when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention_cap: Option<usize>,
}

/// Presentation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct DisplayConfig {
    /// Timezone for clock labels.
    #[schema(value_type = String, example = "America/New_York")]
    pub timezone: Tz,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::UTC,
        }
    }
}

/// Simulated pod settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Interval between simulated samples, in milliseconds.
    #[schema(example = 5000)]
    pub sample_interval_ms: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: 5_000,
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to listen on.
    #[schema(example = "0.0.0.0:3000")]
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
        }
    }
}

/// Logging settings.
///
/// `level` applies to everything; `sample_level` applies only to the
/// per-sample telemetry records, which are chatty at `debug`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level: `trace`, `debug`, `info`, `warn`, `error` or `off`.
    #[schema(example = "info")]
    pub level: String,

    /// Level for per-sample telemetry records.
    #[schema(example = "info")]
    pub sample_level: String,

    /// Directory for rolling log files in production. The platform log
    /// directory when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>, example = "/var/log/podwatch")]
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            sample_level: "info".to_string(),
            directory: None,
        }
    }
}

impl PodConfig {
    /// Load configuration from the default path, falling back to defaults
    /// when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// if the result fails validation.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            debug!(path = %path.display(), "No configuration file, using defaults");
            Self::build(None, None)
        }
    }

    /// Load configuration from `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] if the file does not exist, or an
    /// error if it cannot be read, parsed, or validated.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        Self::load_with_env(path, None)
    }

    fn load_with_env(
        path: &Path,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::build(Some(&content), env)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    fn build(toml: Option<&str>, env: Option<HashMap<String, String>>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);
        if let Some(toml) = toml {
            builder = builder.add_source(File::from_str(toml, FileFormat::Toml));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as TOML to `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be serialized or written.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_error = |source| ConfigError::WriteError {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_error)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(write_error)?;
        info!(path = %path.display(), "Saved configuration");
        Ok(())
    }

    /// Check every field, reporting all violations at once.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for a single violation or
    /// [`ConfigError::MultipleValidationErrors`] for several.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = threshold_errors(&self.thresholds);

        if self.link.scan_timeout_ms == 0 {
            errors.push(ConfigError::invalid("link.scan_timeout_ms", "must be positive"));
        }
        if self.link.connect_timeout_ms == 0 {
            errors.push(ConfigError::invalid(
                "link.connect_timeout_ms",
                "must be positive",
            ));
        }
        if self.history.retention_cap == Some(0) {
            errors.push(ConfigError::invalid(
                "history.retention_cap",
                "must be positive when set",
            ));
        }
        if self.simulator.sample_interval_ms == 0 {
            errors.push(ConfigError::invalid(
                "simulator.sample_interval_ms",
                "must be positive",
            ));
        }
        if self.server.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ConfigError::invalid(
                "server.bind_address",
                format!("'{}' is not a socket address", self.server.bind_address),
            ));
        }
        for (field, value) in [
            ("logging.level", &self.logging.level),
            ("logging.sample_level", &self.logging.sample_level),
        ] {
            if value.parse::<LevelFilter>().is_err() {
                errors.push(ConfigError::invalid(
                    field,
                    format!("'{value}' is not a log level"),
                ));
            }
        }

        collect(errors)
    }

    /// Replace the thresholds after validating them.
    ///
    /// # Errors
    ///
    /// Returns a validation error and leaves the current thresholds in place
    /// if any value is out of range.
    pub fn set_thresholds(&mut self, thresholds: Thresholds) -> Result<(), ConfigError> {
        collect(threshold_errors(&thresholds))?;
        self.thresholds = thresholds;
        Ok(())
    }

    /// Default configuration file path.
    ///
    /// `/etc/podwatch/config.toml` on Linux, the platform config directory
    /// elsewhere.
    #[must_use]
    pub fn default_path() -> PathBuf {
        #[cfg(target_os = "linux")]
        {
            PathBuf::from("/etc/podwatch/config.toml")
        }
        #[cfg(not(target_os = "linux"))]
        {
            directories::ProjectDirs::from("", "", "podwatch").map_or_else(
                || PathBuf::from("podwatch.toml"),
                |dirs| dirs.config_dir().join("config.toml"),
            )
        }
    }
}

impl fmt::Display for PodConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "wet>={} gas>={} spike>{}°C scan={}ms connect={}ms tz={}",
            self.thresholds.wet_threshold,
            self.thresholds.gas_threshold,
            self.thresholds.temp_spike_threshold_c,
            self.link.scan_timeout_ms,
            self.link.connect_timeout_ms,
            self.display.timezone
        )
    }
}

fn threshold_errors(thresholds: &Thresholds) -> Vec<ConfigError> {
    let mut errors = Vec::new();
    for (field, value) in [
        ("thresholds.wet_threshold", thresholds.wet_threshold),
        ("thresholds.gas_threshold", thresholds.gas_threshold),
    ] {
        if !(0.0..=100.0).contains(&value) {
            errors.push(ConfigError::invalid(
                field,
                format!("{value} is outside 0..=100"),
            ));
        }
    }
    let spike = thresholds.temp_spike_threshold_c;
    if !(MIN_TEMPERATURE_C..=MAX_TEMPERATURE_C).contains(&spike) {
        errors.push(ConfigError::invalid(
            "thresholds.temp_spike_threshold_c",
            format!("{spike} is outside {MIN_TEMPERATURE_C}..={MAX_TEMPERATURE_C}"),
        ));
    }
    errors
}

fn collect(mut errors: Vec<ConfigError>) -> Result<(), ConfigError> {
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(ConfigError::MultipleValidationErrors(errors)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_defaults() {
        let config = PodConfig::default();
        assert_eq!(config.thresholds, Thresholds::default());
        assert_eq!(config.link.scan_timeout_ms, 2_000);
        assert_eq!(config.link.connect_timeout_ms, 10_000);
        assert_eq!(config.history.retention_cap, None);
        assert_eq!(config.display.timezone, chrono_tz::UTC);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[thresholds]
wet_threshold = 65.0

[display]
timezone = "Europe/London"
"#,
        );

        let config = PodConfig::load_with_env(&path, Some(HashMap::new())).unwrap();

        assert!((config.thresholds.wet_threshold - 65.0).abs() < f64::EPSILON);
        assert!((config.thresholds.gas_threshold - 50.0).abs() < f64::EPSILON);
        assert_eq!(config.display.timezone, chrono_tz::Europe::London);
        assert_eq!(config.link, LinkConfig::default());
    }

    #[test]
    fn test_environment_overrides_file() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "[link]\nscan_timeout_ms = 3000\n");
        let env = HashMap::from([
            (
                "PODWATCH_LINK__SCAN_TIMEOUT_MS".to_string(),
                "500".to_string(),
            ),
            (
                "PODWATCH_HISTORY__RETENTION_CAP".to_string(),
                "100".to_string(),
            ),
        ]);

        let config = PodConfig::load_with_env(&path, Some(env)).unwrap();

        assert_eq!(config.link.scan_timeout_ms, 500);
        assert_eq!(config.history.retention_cap, Some(100));
    }

    #[test]
    fn test_missing_explicit_file() {
        let dir = TempDir::new().unwrap();
        let err = PodConfig::load_from(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_malformed_file() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "[thresholds\nwet_threshold = ");
        let err = PodConfig::load_with_env(&path, Some(HashMap::new())).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_validation_collects_every_violation() {
        let mut config = PodConfig::default();
        config.thresholds.wet_threshold = 120.0;
        config.link.connect_timeout_ms = 0;
        config.server.bind_address = "not-an-address".to_string();

        match config.validate().unwrap_err() {
            ConfigError::MultipleValidationErrors(errors) => assert_eq!(errors.len(), 3),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_single_violation() {
        let mut config = PodConfig::default();
        config.history.retention_cap = Some(0);

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("history.retention_cap"));
    }

    #[test]
    fn test_set_thresholds_rejects_out_of_range() {
        let mut config = PodConfig::default();
        let bad = Thresholds {
            temp_spike_threshold_c: 50.0,
            ..Thresholds::default()
        };
        assert!(config.set_thresholds(bad).is_err());
        assert_eq!(config.thresholds, Thresholds::default());

        let good = Thresholds {
            wet_threshold: 40.0,
            ..Thresholds::default()
        };
        config.set_thresholds(good).unwrap();
        assert_eq!(config.thresholds, good);
    }

    #[test]
    fn test_logging_section_from_file() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[logging]
sample_level = "debug"
directory = "/srv/podwatch/logs"
"#,
        );

        let config = PodConfig::load_with_env(&path, Some(HashMap::new())).unwrap();

        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.sample_level, "debug");
        assert_eq!(
            config.logging.directory,
            Some(PathBuf::from("/srv/podwatch/logs"))
        );
    }

    #[test]
    fn test_unknown_log_level_is_rejected() {
        let mut config = PodConfig::default();
        config.logging.sample_level = "chatty".to_string();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("logging.sample_level"));

        config.logging.sample_level = "OFF".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_timezone_serializes_as_iana_name() {
        let display = DisplayConfig {
            timezone: chrono_tz::Europe::London,
        };
        assert_eq!(
            serde_json::to_value(&display).unwrap(),
            serde_json::json!({ "timezone": "Europe/London" })
        );
    }

    #[test]
    fn test_config_schema_describes_timezone() {
        use utoipa::PartialSchema;

        let schema = serde_json::to_value(DisplayConfig::schema()).unwrap();
        assert_eq!(schema["properties"]["timezone"]["type"], serde_json::json!("string"));
    }

    #[test]
    fn test_unknown_timezone_fails_to_load() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "[display]\ntimezone = \"Mars/Olympus\"\n");
        let err = PodConfig::load_with_env(&path, Some(HashMap::new())).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = PodConfig::default();
        config.thresholds.gas_threshold = 70.0;
        config.display.timezone = chrono_tz::America::New_York;
        config.history.retention_cap = Some(500);

        config.save(&path).unwrap();
        let loaded = PodConfig::load_with_env(&path, Some(HashMap::new())).unwrap();

        assert_eq!(loaded, config);
    }
}
