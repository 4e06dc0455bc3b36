//! Facade tying configuration, the device link, and the pod core together.
//!
//! [`PodMonitor`] owns one [`HistoryStore`], one [`TelemetryAdapter`] and one
//! [`ConnectionManager`], built from a [`PodConfig`] and any [`DeviceLink`].
//! Front ends talk to the pod only through it.

use std::num::NonZeroUsize;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::info;
use utoipa::ToSchema;

use crate::adapter::{DeviceState, TelemetryAdapter};
use crate::config::PodConfig;
use crate::connection::{ConnectionManager, ConnectionState, ConnectionStatus, LinkSettings};
use crate::error::Result;
use crate::format::{clock_time, relative_age};
use crate::history::{HistoryEvent, HistoryStats, HistoryStore, HistoryWindow};
use crate::link::{DeviceLink, DiscoveredDevice, Transport};
use crate::status::Thresholds;

/// A history event with display labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct HistoryEntry {
    /// The stored event.
    #[serde(flatten)]
    pub event: HistoryEvent,
    /// Readings that triggered it, e.g. "Moisture level: 78%".
    #[schema(example = "Moisture level: 78%")]
    pub summary: String,
    /// How long ago it happened, e.g. "2 hours ago".
    #[schema(example = "2 hours ago")]
    pub age: String,
    /// Local clock time, `HH:MM`.
    #[schema(example = "14:05")]
    pub clock: String,
}

/// Entry point to a single pod.
#[derive(Debug)]
pub struct PodMonitor {
    adapter: Arc<TelemetryAdapter>,
    connection: ConnectionManager,
    default_transport: Transport,
    timezone: RwLock<Tz>,
}

impl PodMonitor {
    /// Build a monitor for `link` using `config`.
    #[must_use]
    pub fn new(config: &PodConfig, link: Arc<dyn DeviceLink>) -> Self {
        let history = Arc::new(HistoryStore::with_retention(
            config.history.retention_cap.and_then(NonZeroUsize::new),
        ));
        let adapter = Arc::new(TelemetryAdapter::new(config.thresholds, history));
        let connection = ConnectionManager::new(
            link,
            Arc::clone(&adapter),
            LinkSettings::from(&config.link),
        );
        info!(%config, "Pod monitor ready");

        Self {
            adapter,
            connection,
            default_transport: config.link.default_transport,
            timezone: RwLock::new(config.display.timezone),
        }
    }

    /// Build a monitor backed by the simulated pod link.
    #[cfg(feature = "simulator")]
    #[must_use]
    pub fn simulated(config: &PodConfig) -> Self {
        let link = crate::simulator::SimulatedLink::new(&config.simulator);
        Self::new(config, Arc::new(link))
    }

    // =========================================================================
    // Device state
    // =========================================================================

    /// Latest device snapshot.
    #[must_use]
    pub fn device_state(&self) -> DeviceState {
        self.adapter.current()
    }

    /// Subscribe to device snapshots.
    #[must_use]
    pub fn subscribe_device(&self) -> watch::Receiver<DeviceState> {
        self.adapter.subscribe()
    }

    /// `HH:MM` label for the last update, in the display timezone.
    #[must_use]
    pub fn last_updated_label(&self) -> Option<String> {
        let tz = *self.timezone.read();
        self.adapter
            .current()
            .last_updated
            .map(|ts| clock_time(ts, tz))
    }

    // =========================================================================
    // Connection
    // =========================================================================

    /// The connection manager.
    #[must_use]
    pub const fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Current connection status.
    #[must_use]
    pub fn connection_status(&self) -> ConnectionStatus {
        self.connection.status()
    }

    /// Scan over `transport`, or the configured default.
    ///
    /// # Errors
    ///
    /// See [`ConnectionManager::request_scan`].
    pub async fn scan(&self, transport: Option<Transport>) -> Result<Vec<DiscoveredDevice>> {
        self.connection
            .request_scan(transport.unwrap_or(self.default_transport))
            .await
    }

    /// Connect to `device_id`.
    ///
    /// # Errors
    ///
    /// See [`ConnectionManager::request_connect`].
    pub async fn connect(&self, device_id: &str) -> Result<ConnectionState> {
        self.connection.request_connect(device_id).await
    }

    /// Retry a failed connection.
    ///
    /// # Errors
    ///
    /// See [`ConnectionManager::retry`].
    pub async fn retry(&self) -> Result<ConnectionState> {
        self.connection.retry().await
    }

    /// Abandon a failed connection.
    ///
    /// # Errors
    ///
    /// See [`ConnectionManager::give_up`].
    pub fn give_up(&self) -> Result<ConnectionState> {
        self.connection.give_up()
    }

    /// Disconnect from the pod.
    pub async fn disconnect(&self) -> ConnectionState {
        self.connection.disconnect().await
    }

    /// Disconnect and forget the pod.
    pub async fn forget(&self) {
        self.connection.forget().await;
    }

    // =========================================================================
    // History
    // =========================================================================

    /// Events in `window`, newest first.
    #[must_use]
    pub fn history(&self, window: HistoryWindow) -> Vec<HistoryEvent> {
        self.adapter.history().query(window)
    }

    /// Events in `window` with display labels, newest first.
    #[must_use]
    pub fn history_entries(&self, window: HistoryWindow) -> Vec<HistoryEntry> {
        self.history_entries_at(window, Utc::now())
    }

    /// Like [`PodMonitor::history_entries`], evaluated at `now`.
    #[must_use]
    pub fn history_entries_at(&self, window: HistoryWindow, now: DateTime<Utc>) -> Vec<HistoryEntry> {
        let tz = *self.timezone.read();
        self.adapter
            .history()
            .query_at(window, now)
            .into_iter()
            .map(|event| HistoryEntry {
                summary: event.summary(),
                age: relative_age(event.timestamp, now),
                clock: clock_time(event.timestamp, tz),
                event,
            })
            .collect()
    }

    /// The underlying event store.
    #[must_use]
    pub fn history_store(&self) -> &Arc<HistoryStore> {
        self.adapter.history()
    }

    /// Statistics over `window`.
    #[must_use]
    pub fn history_stats(&self, window: HistoryWindow) -> HistoryStats {
        self.adapter.history().stats(window)
    }

    // =========================================================================
    // Settings
    // =========================================================================

    /// Thresholds in effect.
    #[must_use]
    pub fn thresholds(&self) -> Thresholds {
        self.adapter.thresholds()
    }

    /// Apply new thresholds from the next sample on.
    ///
    /// Callers validate first; see [`PodConfig::set_thresholds`].
    pub fn set_thresholds(&self, thresholds: Thresholds) {
        self.adapter.set_thresholds(thresholds);
    }

    /// Change the timezone used for clock labels.
    pub fn set_timezone(&self, timezone: Tz) {
        *self.timezone.write() = timezone;
    }
}

#[cfg(all(test, feature = "simulator"))]
mod tests {
    use std::time::Duration;

    use chrono::Duration as ChronoDuration;
    use tokio_test::assert_ok;

    use super::*;
    use crate::history::{EventDetails, EventKind, NewEvent};
    use crate::simulator::SimulatedLink;

    fn monitor(config: &PodConfig) -> PodMonitor {
        let link = SimulatedLink::new(&config.simulator)
            .with_delays(Duration::ZERO, Duration::ZERO)
            .with_sample_interval(Duration::from_millis(5));
        PodMonitor::new(config, Arc::new(link))
    }

    #[tokio::test]
    async fn test_scan_uses_default_transport() {
        let mut config = PodConfig::default();
        config.link.default_transport = Transport::Wifi;
        let monitor = monitor(&config);

        let devices = assert_ok!(monitor.scan(None).await);

        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].transport, Transport::Wifi);
    }

    #[tokio::test]
    async fn test_simulated_feed_populates_state_and_history() {
        let monitor = monitor(&PodConfig::default());
        assert_ok!(monitor.connect("pod-1").await);

        let mut rx = monitor.subscribe_device();
        let waited = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if monitor.history_stats(HistoryWindow::All).count >= 2 {
                    return;
                }
                rx.changed().await.unwrap();
            }
        })
        .await;
        assert!(waited.is_ok());

        let state = monitor.device_state();
        assert_eq!(state.connection, ConnectionState::Connected);
        assert!(state.sample.is_some());
        assert!(monitor.last_updated_label().is_some());

        monitor.forget().await;
        assert_eq!(monitor.device_state(), DeviceState::default());
        assert_eq!(
            monitor.connection_status().state,
            ConnectionState::Disconnected
        );
    }

    #[test]
    fn test_history_entries_carry_labels() {
        let mut config = PodConfig::default();
        config.display.timezone = chrono_tz::America::New_York;
        let monitor = monitor(&config);
        let now = Utc::now();
        monitor.adapter.history().append(NewEvent {
            kind: EventKind::Wet,
            timestamp: now - ChronoDuration::hours(2),
            details: EventDetails {
                moisture: 78.0,
                gas_level: 10.0,
                temperature_c: 36.9,
            },
        });

        let entries = monitor.history_entries_at(HistoryWindow::Today, now);

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].summary, "Moisture level: 78%");
        assert_eq!(entries[0].age, "2 hours ago");
        assert_eq!(
            entries[0].clock,
            clock_time(now - ChronoDuration::hours(2), chrono_tz::America::New_York)
        );
    }

    #[test]
    fn test_threshold_updates_apply_to_adapter() {
        let monitor = monitor(&PodConfig::default());
        let thresholds = Thresholds {
            wet_threshold: 30.0,
            ..Thresholds::default()
        };

        monitor.set_thresholds(thresholds);

        assert_eq!(monitor.thresholds(), thresholds);
    }
}
