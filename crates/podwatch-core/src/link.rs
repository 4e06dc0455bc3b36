//! Device link capability.
//!
//! The radio transport is not implemented here. A [`DeviceLink`] supplies
//! discovery results, establishes a connection that yields a [`RawFeed`] of
//! [`RawSample`]s, and tears that connection down again. The connection
//! manager is the only caller.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::telemetry::RawSample;

/// Errors reported by a device link.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// The radio (adapter, Wi-Fi interface) is not available.
    #[error("device link unavailable: {message}")]
    Unavailable {
        /// Description from the transport.
        message: String,
    },

    /// No device with this id is reachable.
    #[error("device '{device_id}' not found. Ensure the pod is powered on and within range.")]
    DeviceNotFound {
        /// The requested device id.
        device_id: String,
    },

    /// The device refused the pairing or connection.
    #[error("device '{device_id}' rejected the connection: {reason}")]
    Rejected {
        /// The requested device id.
        device_id: String,
        /// Reason given by the transport.
        reason: String,
    },

    /// Connection establishment did not finish in time.
    #[error("connecting to '{device_id}' timed out after {timeout_ms} ms")]
    Timeout {
        /// The requested device id.
        device_id: String,
        /// The timeout that elapsed.
        timeout_ms: u64,
    },

    /// Discovery could not be started.
    #[error("discovery failed: {message}")]
    DiscoveryFailed {
        /// Description from the transport.
        message: String,
    },
}

/// Result alias for device link operations.
pub type LinkResult<T> = std::result::Result<T, LinkError>;

/// Radio transport used to reach the pod.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    /// Bluetooth Low Energy.
    #[default]
    Bluetooth,
    /// Wi-Fi.
    Wifi,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bluetooth => f.write_str("bluetooth"),
            Self::Wifi => f.write_str("wifi"),
        }
    }
}

impl FromStr for Transport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bluetooth" | "ble" => Ok(Self::Bluetooth),
            "wifi" | "wi-fi" => Ok(Self::Wifi),
            other => Err(format!("unknown transport '{other}'")),
        }
    }
}

/// Coarse signal quality bucket derived from RSSI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SignalQuality {
    /// -70 dBm or lower.
    Weak,
    /// Above -70 dBm.
    Fair,
    /// Above -60 dBm.
    Good,
    /// Above -50 dBm.
    Excellent,
}

impl SignalQuality {
    /// Bucket an RSSI reading.
    #[must_use]
    pub const fn from_rssi(rssi_dbm: i16) -> Self {
        if rssi_dbm > -50 {
            Self::Excellent
        } else if rssi_dbm > -60 {
            Self::Good
        } else if rssi_dbm > -70 {
            Self::Fair
        } else {
            Self::Weak
        }
    }

    /// Display label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Weak => "Weak",
            Self::Fair => "Fair",
            Self::Good => "Good",
            Self::Excellent => "Excellent",
        }
    }
}

/// A pod seen during discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DiscoveredDevice {
    /// Stable device identifier.
    #[schema(example = "pod-1")]
    pub id: String,

    /// Advertised name.
    #[schema(example = "Smart Pod #1")]
    pub display_name: String,

    /// Signal strength in dBm.
    #[schema(example = -45)]
    pub rssi_dbm: i16,

    /// How the device was reached.
    pub transport: Transport,
}

impl DiscoveredDevice {
    /// Signal quality bucket for this device.
    #[must_use]
    pub const fn signal_quality(&self) -> SignalQuality {
        SignalQuality::from_rssi(self.rssi_dbm)
    }
}

/// Identifies one established link session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeedHandle {
    /// Unique per connection; a reconnect to the same device gets a new one.
    pub session_id: Uuid,
    /// The connected device.
    pub device_id: String,
}

impl FeedHandle {
    /// Create a handle for a fresh session.
    #[must_use]
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            session_id: Uuid::now_v7(),
            device_id: device_id.into(),
        }
    }
}

/// Stream of discovery results.
pub type DiscoveryStream = BoxStream<'static, DiscoveredDevice>;

/// Stream of raw samples, in arrival order.
pub type SampleStream = BoxStream<'static, RawSample>;

/// An established connection and its sample feed.
///
/// The stream ends when the link closes; an end the connection manager did
/// not ask for is treated as a dropped link.
pub struct RawFeed {
    /// Session identity.
    pub handle: FeedHandle,
    /// Raw samples in arrival order.
    pub samples: SampleStream,
}

impl fmt::Debug for RawFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawFeed")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

/// A radio connection to the pod.
#[async_trait]
pub trait DeviceLink: Send + Sync + 'static {
    /// Start discovering devices reachable over `transport`.
    ///
    /// The stream may never end; the caller bounds it with a timeout.
    async fn discover(&self, transport: Transport) -> LinkResult<DiscoveryStream>;

    /// Connect to a device and open its sample feed.
    async fn connect(&self, device_id: &str) -> LinkResult<RawFeed>;

    /// Close a previously opened feed.
    async fn disconnect(&self, handle: &FeedHandle) -> LinkResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_quality_buckets() {
        assert_eq!(SignalQuality::from_rssi(-45), SignalQuality::Excellent);
        assert_eq!(SignalQuality::from_rssi(-50), SignalQuality::Good);
        assert_eq!(SignalQuality::from_rssi(-55), SignalQuality::Good);
        assert_eq!(SignalQuality::from_rssi(-62), SignalQuality::Fair);
        assert_eq!(SignalQuality::from_rssi(-70), SignalQuality::Weak);
        assert_eq!(SignalQuality::from_rssi(-90).label(), "Weak");
    }

    #[test]
    fn test_transport_parsing() {
        assert_eq!("Bluetooth".parse::<Transport>(), Ok(Transport::Bluetooth));
        assert_eq!("wi-fi".parse::<Transport>(), Ok(Transport::Wifi));
        assert!("zigbee".parse::<Transport>().is_err());
        assert_eq!(Transport::Wifi.to_string(), "wifi");
    }

    #[test]
    fn test_feed_handles_are_unique() {
        let a = FeedHandle::new("pod-1");
        let b = FeedHandle::new("pod-1");
        assert_eq!(a.device_id, b.device_id);
        assert_ne!(a.session_id, b.session_id);
    }

    #[test]
    fn test_link_error_messages() {
        let err = LinkError::DeviceNotFound {
            device_id: "pod-9".into(),
        };
        assert!(err.to_string().contains("pod-9"));

        let err = LinkError::Timeout {
            device_id: "pod-1".into(),
            timeout_ms: 1500,
        };
        assert!(err.to_string().contains("1500 ms"));
    }
}
