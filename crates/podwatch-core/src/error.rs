//! Unified error types for the podwatch core library.
//!
//! [`PodError`] covers every failure mode exposed to callers. Modules keep
//! their own narrower error types ([`LinkError`](crate::link::LinkError),
//! [`SampleError`](crate::telemetry::SampleError),
//! [`ConfigError`](crate::config::ConfigError)) and convert into this one at
//! the boundary.
//!
//! # Example
//!
//! ```rust
//! use podwatch_core::error::{PodError, Result};
//!
//! fn require_device(id: Option<&str>) -> Result<&str> {
//!     id.ok_or_else(|| PodError::DeviceNotFound("unknown".into()))
//! }
//!
//! assert!(require_device(None).unwrap_err().is_link_error());
//! ```

use std::path::PathBuf;

use thiserror::Error;

use crate::connection::{ConnectionEvent, ConnectionState};

/// The unified error type for podwatch operations.
#[derive(Debug, Error)]
pub enum PodError {
    // =========================================================================
    // LINK ERRORS
    // =========================================================================
    /// The radio is unavailable or discovery could not start.
    #[error("Device link unavailable: {0}")]
    LinkUnavailable(String),

    /// The requested device is not reachable.
    #[error("Device not found: '{0}'. Ensure the pod is powered on and within range.")]
    DeviceNotFound(String),

    /// The link to a device could not be established.
    #[error("Failed to connect to '{device_id}': {reason}")]
    ConnectFailed {
        /// The device that was being connected.
        device_id: String,
        /// What went wrong.
        reason: String,
    },

    /// The telemetry feed of a connected device ended without a disconnect.
    #[error("Telemetry feed from '{0}' terminated unexpectedly")]
    FeedTerminated(String),

    // =========================================================================
    // CONNECTION STATE ERRORS
    // =========================================================================
    /// The requested operation is not valid in the current connection state.
    #[error("Cannot {event} while {from}")]
    InvalidTransition {
        /// State the machine was in.
        from: ConnectionState,
        /// The rejected input.
        event: ConnectionEvent,
    },

    /// A connection to another device is in progress or established.
    #[error("Already connecting or connected to '{active}'. Disconnect first.")]
    ConnectionBusy {
        /// The device currently in use.
        active: String,
    },

    /// A newer scan, connect or disconnect replaced this scan.
    #[error("Scan was superseded by a newer request")]
    ScanSuperseded,

    // =========================================================================
    // TELEMETRY ERRORS
    // =========================================================================
    /// A raw sample could not be turned into a telemetry sample.
    #[error("Invalid telemetry sample: {0}")]
    InvalidSample(String),

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found at the expected path.
    #[error("Configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration file exists but could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // =========================================================================
    // PERSISTENCE & I/O ERRORS
    // =========================================================================
    /// An error occurred while persisting or reading data.
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for podwatch operations.
pub type Result<T> = std::result::Result<T, PodError>;

impl PodError {
    /// Returns `true` if this error came from the device link.
    #[inline]
    #[must_use]
    pub const fn is_link_error(&self) -> bool {
        matches!(
            self,
            Self::LinkUnavailable(_)
                | Self::DeviceNotFound(_)
                | Self::ConnectFailed { .. }
                | Self::FeedTerminated(_)
        )
    }

    /// Returns `true` if the operation was refused because of connection state.
    #[inline]
    #[must_use]
    pub const fn is_state_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidTransition { .. } | Self::ConnectionBusy { .. } | Self::ScanSuperseded
        )
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_) | Self::ConfigParseError(_) | Self::ConfigValidationError(_)
        )
    }

    /// Returns `true` if this error is related to I/O or persistence.
    #[inline]
    #[must_use]
    pub const fn is_io_error(&self) -> bool {
        matches!(self, Self::PersistenceError(_) | Self::IoError(_))
    }

    /// Returns `true` if this error represents an expected operational state.
    ///
    /// A superseded scan is not a failure; a newer request replaced it.
    #[inline]
    #[must_use]
    pub const fn is_expected_state(&self) -> bool {
        matches!(self, Self::ScanSuperseded)
    }

    /// Returns `true` if trying again may succeed without user intervention.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::DeviceNotFound(_)
                | Self::ConnectFailed { .. }
                | Self::FeedTerminated(_)
                | Self::ScanSuperseded
        )
    }

    /// Returns an HTTP-appropriate status code for this error.
    #[inline]
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - malformed input
            Self::InvalidSample(_) => 400,

            // 404 Not Found
            Self::ConfigNotFound(_) | Self::DeviceNotFound(_) => 404,

            // 409 Conflict - refused by the connection state
            Self::InvalidTransition { .. } | Self::ConnectionBusy { .. } | Self::ScanSuperseded => {
                409
            }

            // 422 Unprocessable Entity - semantic errors
            Self::ConfigParseError(_) | Self::ConfigValidationError(_) => 422,

            // 500 Internal Server Error - server-side issues
            Self::PersistenceError(_) | Self::IoError(_) => 500,

            // 502 Bad Gateway - the pod misbehaved
            Self::ConnectFailed { .. } | Self::FeedTerminated(_) => 502,

            // 503 Service Unavailable - radio issues
            Self::LinkUnavailable(_) => 503,
        }
    }

    /// Returns a machine-readable error code for API responses.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::LinkUnavailable(_) => "LINK_UNAVAILABLE",
            Self::DeviceNotFound(_) => "DEVICE_NOT_FOUND",
            Self::ConnectFailed { .. } => "CONNECT_FAILED",
            Self::FeedTerminated(_) => "FEED_TERMINATED",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::ConnectionBusy { .. } => "CONNECTION_BUSY",
            Self::ScanSuperseded => "SCAN_SUPERSEDED",
            Self::InvalidSample(_) => "INVALID_SAMPLE",
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::PersistenceError(_) => "PERSISTENCE_ERROR",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::link::LinkError> for PodError {
    fn from(err: crate::link::LinkError) -> Self {
        use crate::link::LinkError;
        match err {
            LinkError::Unavailable { message } | LinkError::DiscoveryFailed { message } => {
                Self::LinkUnavailable(message)
            }
            LinkError::DeviceNotFound { device_id } => Self::DeviceNotFound(device_id),
            LinkError::Rejected { device_id, reason } => Self::ConnectFailed { device_id, reason },
            LinkError::Timeout {
                device_id,
                timeout_ms,
            } => Self::ConnectFailed {
                device_id,
                reason: format!("timed out after {timeout_ms} ms"),
            },
        }
    }
}

impl From<crate::telemetry::SampleError> for PodError {
    fn from(err: crate::telemetry::SampleError) -> Self {
        Self::InvalidSample(err.to_string())
    }
}

impl From<crate::config::ConfigError> for PodError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::NotFound(path) => Self::ConfigNotFound(path),
            ConfigError::ReadError { path, source } => {
                Self::PersistenceError(format!("Failed to read {}: {source}", path.display()))
            }
            ConfigError::WriteError { path, source } => {
                Self::PersistenceError(format!("Failed to write {}: {source}", path.display()))
            }
            ConfigError::ParseError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::SerializeError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::LinkError;
    use crate::telemetry::SampleError;

    #[test]
    fn test_link_error_classification() {
        assert!(PodError::LinkUnavailable("off".into()).is_link_error());
        assert!(PodError::DeviceNotFound("pod-1".into()).is_link_error());
        assert!(PodError::FeedTerminated("pod-1".into()).is_link_error());
        assert!(!PodError::ScanSuperseded.is_link_error());
    }

    #[test]
    fn test_state_error_classification() {
        let err = PodError::InvalidTransition {
            from: ConnectionState::Connected,
            event: ConnectionEvent::StartScan,
        };
        assert!(err.is_state_error());
        assert!(PodError::ConnectionBusy {
            active: "pod-1".into()
        }
        .is_state_error());
        assert!(!PodError::IoError(std::io::Error::other("x")).is_state_error());
    }

    #[test]
    fn test_config_and_io_classification() {
        assert!(PodError::ConfigNotFound(PathBuf::from("/etc/podwatch/config.toml"))
            .is_config_error());
        assert!(PodError::ConfigValidationError("bad".into()).is_config_error());
        assert!(PodError::PersistenceError("disk".into()).is_io_error());
        assert!(!PodError::InvalidSample("x".into()).is_io_error());
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(PodError::DeviceNotFound("pod-1".into()).is_recoverable());
        assert!(PodError::ScanSuperseded.is_recoverable());
        assert!(!PodError::ConfigParseError("x".into()).is_recoverable());
    }

    #[test]
    fn test_expected_state() {
        assert!(PodError::ScanSuperseded.is_expected_state());
        assert!(!PodError::FeedTerminated("pod-1".into()).is_expected_state());
    }

    #[test]
    fn test_http_status_codes() {
        assert_eq!(PodError::InvalidSample("x".into()).http_status_code(), 400);
        assert_eq!(PodError::DeviceNotFound("x".into()).http_status_code(), 404);
        assert_eq!(PodError::ScanSuperseded.http_status_code(), 409);
        assert_eq!(
            PodError::ConnectionBusy { active: "x".into() }.http_status_code(),
            409
        );
        assert_eq!(
            PodError::ConfigValidationError("x".into()).http_status_code(),
            422
        );
        assert_eq!(
            PodError::ConnectFailed {
                device_id: "x".into(),
                reason: "y".into()
            }
            .http_status_code(),
            502
        );
        assert_eq!(PodError::LinkUnavailable("x".into()).http_status_code(), 503);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(PodError::ScanSuperseded.error_code(), "SCAN_SUPERSEDED");
        assert_eq!(
            PodError::FeedTerminated("x".into()).error_code(),
            "FEED_TERMINATED"
        );
        assert_eq!(
            PodError::InvalidTransition {
                from: ConnectionState::Failed,
                event: ConnectionEvent::StartScan
            }
            .error_code(),
            "INVALID_TRANSITION"
        );
    }

    #[test]
    fn test_from_link_error() {
        let err: PodError = LinkError::Timeout {
            device_id: "pod-1".into(),
            timeout_ms: 10_000,
        }
        .into();
        match err {
            PodError::ConnectFailed { device_id, reason } => {
                assert_eq!(device_id, "pod-1");
                assert!(reason.contains("10000 ms"));
            }
            other => panic!("unexpected {other:?}"),
        }

        let err: PodError = LinkError::DiscoveryFailed {
            message: "radio busy".into(),
        }
        .into();
        assert!(matches!(err, PodError::LinkUnavailable(ref m) if m == "radio busy"));
    }

    #[test]
    fn test_from_sample_error() {
        let err: PodError = SampleError::MissingField { field: "ts" }.into();
        assert_eq!(err.error_code(), "INVALID_SAMPLE");
        assert!(err.to_string().contains("ts"));
    }

    #[test]
    fn test_error_display_messages() {
        let err = PodError::InvalidTransition {
            from: ConnectionState::Connected,
            event: ConnectionEvent::StartScan,
        };
        assert_eq!(err.to_string(), "Cannot start_scan while connected");

        let err = PodError::DeviceNotFound("pod-7".into());
        assert!(err.to_string().contains("pod-7"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<PodError>();
        assert_sync::<PodError>();
    }
}
