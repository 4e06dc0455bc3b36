//! Telemetry stream adapter.
//!
//! Consumes the raw sample feed of the connected pod strictly in arrival
//! order. Each sample is normalized, classified, published as a new
//! [`DeviceState`] and checked for loggable transitions.
//!
//! Invalid samples are logged and dropped; they never end the feed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::connection::ConnectionState;
use crate::history::{EventDetails, EventKind, HistoryEvent, HistoryStore, NewEvent};
use crate::link::SampleStream;
use crate::status::{DiaperStatus, Thresholds};
use crate::telemetry::{RawSample, SampleResult, TelemetrySample};

/// Live snapshot of the pod.
///
/// Published as a whole; readers never see a partially updated record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DeviceState {
    /// The connected or last connected device.
    pub device_id: Option<String>,

    /// The latest normalized sample.
    pub sample: Option<TelemetrySample>,

    /// Classification of the latest sample.
    pub status: DiaperStatus,

    /// Connection state at the time of publishing.
    pub connection: ConnectionState,

    /// Whether the latest position is an unsafe sleeping position.
    pub position_alert: bool,

    /// When the sample was taken.
    pub last_updated: Option<DateTime<Utc>>,
}

/// What processing a single sample produced.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleOutcome {
    /// The published snapshot.
    pub state: DeviceState,
    /// Events appended to history for this sample.
    pub events: Vec<HistoryEvent>,
}

/// Counters for one consumed feed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedSummary {
    /// Samples accepted.
    pub processed: u64,
    /// Samples dropped as invalid.
    pub dropped: u64,
    /// History events emitted.
    pub events: u64,
}

/// Classification memory carried from one sample to the next.
#[derive(Debug, Default)]
struct Memory {
    status: DiaperStatus,
    temperature_spiking: bool,
    last_timestamp: Option<DateTime<Utc>>,
}

/// Turns raw samples into device state and history events.
#[derive(Debug)]
pub struct TelemetryAdapter {
    thresholds: RwLock<Thresholds>,
    history: Arc<HistoryStore>,
    state_tx: watch::Sender<DeviceState>,
    memory: Mutex<Memory>,
}

impl TelemetryAdapter {
    /// Create an adapter writing events into `history`.
    #[must_use]
    pub fn new(thresholds: Thresholds, history: Arc<HistoryStore>) -> Self {
        let (state_tx, _) = watch::channel(DeviceState::default());
        Self {
            thresholds: RwLock::new(thresholds),
            history,
            state_tx,
            memory: Mutex::new(Memory::default()),
        }
    }

    /// The current snapshot.
    #[must_use]
    pub fn current(&self) -> DeviceState {
        self.state_tx.borrow().clone()
    }

    /// Subscribe to snapshot changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<DeviceState> {
        self.state_tx.subscribe()
    }

    /// Thresholds used for the next sample.
    #[must_use]
    pub fn thresholds(&self) -> Thresholds {
        *self.thresholds.read()
    }

    /// Replace the thresholds. Takes effect from the next sample.
    pub fn set_thresholds(&self, thresholds: Thresholds) {
        info!(
            wet = thresholds.wet_threshold,
            gas = thresholds.gas_threshold,
            spike = thresholds.temp_spike_threshold_c,
            "Updated classification thresholds"
        );
        *self.thresholds.write() = thresholds;
    }

    /// The history store events are written to.
    #[must_use]
    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    /// Reflect a connection change in the published snapshot.
    pub fn set_connection(&self, connection: ConnectionState, device_id: Option<&str>) {
        self.state_tx.send_modify(|state| {
            *state = DeviceState {
                device_id: device_id.map(str::to_string).or_else(|| state.device_id.clone()),
                connection,
                ..state.clone()
            };
        });
    }

    /// Prepare for a new feed. Classification memory is kept so a reconnect
    /// does not re-log an unchanged condition.
    pub fn begin_session(&self) {
        self.memory.lock().last_timestamp = None;
    }

    /// Forget the device: clear classification memory and the snapshot.
    pub fn reset(&self) {
        *self.memory.lock() = Memory::default();
        self.state_tx.send_replace(DeviceState::default());
    }

    /// Process one raw sample.
    ///
    /// # Errors
    ///
    /// Returns the [`crate::telemetry::SampleError`] when the sample cannot
    /// be normalized. Nothing is published or logged in that case.
    pub fn process(&self, raw: &RawSample) -> SampleResult<SampleOutcome> {
        let mut sample = TelemetrySample::from_raw(raw)?;
        let thresholds = self.thresholds();
        let mut memory = self.memory.lock();

        if let Some(last) = memory.last_timestamp {
            if sample.timestamp < last {
                warn!(
                    sample_ts = %sample.timestamp,
                    last_ts = %last,
                    "Sample timestamp went backwards, holding at previous"
                );
                sample.timestamp = last;
            }
        }

        let status = thresholds.classify(&sample);
        let spiking = thresholds.is_temperature_spike(sample.temperature_c);
        let details = EventDetails {
            moisture: sample.moisture,
            gas_level: sample.gas_level,
            temperature_c: sample.temperature_c,
        };

        let mut events = Vec::new();
        if status != memory.status {
            info!(from = %memory.status, to = %status, "Diaper status changed");
            if let Some(kind) = EventKind::from_status(status) {
                events.push(self.history.append(NewEvent {
                    kind,
                    timestamp: sample.timestamp,
                    details,
                }));
            }
        }
        if spiking && !memory.temperature_spiking {
            info!(temperature_c = sample.temperature_c, "Temperature spike");
            events.push(self.history.append(NewEvent {
                kind: EventKind::TemperatureSpike,
                timestamp: sample.timestamp,
                details,
            }));
        }

        memory.status = status;
        memory.temperature_spiking = spiking;
        memory.last_timestamp = Some(sample.timestamp);

        let timestamp = sample.timestamp;
        let position_alert = sample.position.is_unsafe();
        self.state_tx.send_modify(|state| {
            *state = DeviceState {
                device_id: state.device_id.clone(),
                sample: Some(sample),
                status,
                connection: state.connection,
                position_alert,
                last_updated: Some(timestamp),
            };
        });
        drop(memory);

        debug!(%status, events = events.len(), "Processed telemetry sample");
        Ok(SampleOutcome {
            state: self.current(),
            events,
        })
    }

    /// Consume a feed until it ends.
    ///
    /// Samples are handled one at a time in arrival order.
    pub async fn run(&self, mut samples: SampleStream) -> FeedSummary {
        let mut summary = FeedSummary::default();
        while let Some(raw) = samples.next().await {
            match self.process(&raw) {
                Ok(outcome) => {
                    summary.processed += 1;
                    summary.events += outcome.events.len() as u64;
                }
                Err(e) => {
                    summary.dropped += 1;
                    warn!(error = %e, "Dropping invalid telemetry sample");
                }
            }
        }
        summary
    }
}
