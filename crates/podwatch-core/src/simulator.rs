//! Simulated device link.
//!
//! Stands in for the radio when no pod hardware is available. Three pods are
//! advertised, two over Bluetooth and one over Wi-Fi. A connected pod replays
//! a fixed cycle of readings that walks through every diaper status, a
//! temperature spike and an unsafe sleeping position.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::{stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::SimulatorConfig;
use crate::link::{
    DeviceLink, DiscoveredDevice, DiscoveryStream, FeedHandle, LinkError, LinkResult, RawFeed,
    Transport,
};
use crate::telemetry::RawSample;

/// Delay before each simulated discovery result.
pub const DEFAULT_DISCOVERY_STEP: Duration = Duration::from_millis(400);

/// Time a simulated connect takes.
pub const DEFAULT_CONNECT_DELAY: Duration = Duration::from_millis(1_500);

/// Battery level of a freshly connected simulated pod.
const START_BATTERY: f64 = 87.0;

struct Reading {
    moisture: f64,
    gas: f64,
    temp_c: f64,
    position: &'static str,
}

const CYCLE: [Reading; 6] = [
    Reading { moisture: 12.0, gas: 8.0, temp_c: 36.5, position: "back" },
    Reading { moisture: 35.0, gas: 15.0, temp_c: 36.8, position: "left_side" },
    Reading { moisture: 78.0, gas: 20.0, temp_c: 37.1, position: "back" },
    Reading { moisture: 85.0, gas: 71.0, temp_c: 37.4, position: "right_side" },
    Reading { moisture: 20.0, gas: 10.0, temp_c: 38.2, position: "stomach" },
    Reading { moisture: 10.0, gas: 5.0, temp_c: 36.6, position: "back" },
];

/// The pods advertised by [`SimulatedLink::new`].
#[must_use]
pub fn default_pods() -> Vec<DiscoveredDevice> {
    let pod = |id: &str, name: &str, rssi_dbm, transport| DiscoveredDevice {
        id: id.to_string(),
        display_name: name.to_string(),
        rssi_dbm,
        transport,
    };
    vec![
        pod("pod-1", "Smart Pod #1", -45, Transport::Bluetooth),
        pod("pod-2", "Smart Pod #2", -62, Transport::Bluetooth),
        pod("pod-wifi", "Smart Pod WiFi", -55, Transport::Wifi),
    ]
}

/// A [`DeviceLink`] backed by timers and a scripted feed.
pub struct SimulatedLink {
    pods: Vec<DiscoveredDevice>,
    discovery_step: Duration,
    connect_delay: Duration,
    sample_interval: Duration,
    sessions: Mutex<HashMap<Uuid, oneshot::Sender<()>>>,
}

impl std::fmt::Debug for SimulatedLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedLink")
            .field("pods", &self.pods.len())
            .field("sample_interval", &self.sample_interval)
            .field("sessions", &self.sessions.lock().len())
            .finish()
    }
}

impl Default for SimulatedLink {
    fn default() -> Self {
        Self::new(&SimulatorConfig::default())
    }
}

impl SimulatedLink {
    /// Create a link advertising the default pods.
    #[must_use]
    pub fn new(config: &SimulatorConfig) -> Self {
        Self {
            pods: default_pods(),
            discovery_step: DEFAULT_DISCOVERY_STEP,
            connect_delay: DEFAULT_CONNECT_DELAY,
            sample_interval: Duration::from_millis(config.sample_interval_ms),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Override discovery and connect delays.
    #[must_use]
    pub const fn with_delays(mut self, discovery_step: Duration, connect_delay: Duration) -> Self {
        self.discovery_step = discovery_step;
        self.connect_delay = connect_delay;
        self
    }

    /// Override the interval between samples.
    #[must_use]
    pub const fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

    /// Number of feeds currently open.
    #[must_use]
    pub fn open_sessions(&self) -> usize {
        self.sessions.lock().len()
    }

    fn feed(&self, handle: &FeedHandle, stop: oneshot::Receiver<()>) -> RawFeed {
        let interval = self.sample_interval;
        let samples = stream::unfold(0_usize, move |step| async move {
            tokio::time::sleep(interval).await;
            Some((scripted_sample(step), step + 1))
        })
        .take_until(stop)
        .boxed();

        RawFeed {
            handle: handle.clone(),
            samples,
        }
    }
}

fn scripted_sample(step: usize) -> RawSample {
    let reading = &CYCLE[step % CYCLE.len()];
    let drained = u32::try_from(step / CYCLE.len()).unwrap_or(u32::MAX);
    RawSample {
        moisture_pct: Some(reading.moisture),
        gas_pct: Some(reading.gas),
        temp_c: Some(reading.temp_c),
        battery_pct: Some((START_BATTERY - f64::from(drained)).max(5.0)),
        position: Some(reading.position.to_string()),
        ts: Some(Utc::now()),
    }
}

#[async_trait]
impl DeviceLink for SimulatedLink {
    async fn discover(&self, transport: Transport) -> LinkResult<DiscoveryStream> {
        let step = self.discovery_step;
        let pods: Vec<DiscoveredDevice> = self
            .pods
            .iter()
            .filter(|pod| pod.transport == transport)
            .cloned()
            .collect();
        debug!(%transport, pods = pods.len(), "Simulating discovery");

        Ok(stream::iter(pods)
            .then(move |pod| async move {
                tokio::time::sleep(step).await;
                pod
            })
            .boxed())
    }

    async fn connect(&self, device_id: &str) -> LinkResult<RawFeed> {
        tokio::time::sleep(self.connect_delay).await;
        if !self.pods.iter().any(|pod| pod.id == device_id) {
            return Err(LinkError::DeviceNotFound {
                device_id: device_id.to_string(),
            });
        }

        let handle = FeedHandle::new(device_id);
        let (stop_tx, stop_rx) = oneshot::channel();
        self.sessions.lock().insert(handle.session_id, stop_tx);
        info!(%device_id, session = %handle.session_id, "Simulated pod connected");
        Ok(self.feed(&handle, stop_rx))
    }

    async fn disconnect(&self, handle: &FeedHandle) -> LinkResult<()> {
        if let Some(stop) = self.sessions.lock().remove(&handle.session_id) {
            let _ = stop.send(());
            info!(device_id = %handle.device_id, "Simulated pod disconnected");
        }
        Ok(())
    }
}
