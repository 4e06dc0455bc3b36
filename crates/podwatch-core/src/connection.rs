//! Connection lifecycle.
//!
//! [`ConnectionState`] and [`ConnectionEvent`] form a pure transition table
//! ([`ConnectionState::next`]). [`ConnectionManager`] drives that table from
//! asynchronous scan and connect operations against a [`DeviceLink`], owns
//! the active feed, and runs the [`TelemetryAdapter`] while connected.
//!
//! # States
//!
//! ```text
//!               StartScan              DeviceChosen
//! disconnected ───────────▶ scanning ───────────────▶ connecting
//!      ▲   ▲                    │                      │      │
//!      │   └──── ScanTimeout ───┘       LinkEstablished│      │LinkError
//!      │                                               ▼      ▼
//!      └────────────── LinkDropped ─────────────── connected  failed
//!      ▲                                                       │ │
//!      └──────────────────────── GiveUp ───────────────────────┘ │Retry
//!                                                   connecting ◀─┘
//! ```
//!
//! `Disconnect` leads from every state to `disconnected`.
//!
//! # Staleness
//!
//! Every scan, connect attempt and disconnect advances an epoch. An
//! operation that finishes after the epoch moved on discards its result, so
//! a late scan or connect never overwrites newer state.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::adapter::{FeedSummary, TelemetryAdapter};
use crate::config::LinkConfig;
use crate::error::{PodError, Result};
use crate::link::{DeviceLink, DiscoveredDevice, FeedHandle, LinkError, RawFeed, Transport};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No link and no operation in progress.
    #[default]
    Disconnected,
    /// Discovery running or results awaiting a choice.
    Scanning,
    /// Link establishment in progress.
    Connecting,
    /// Link established, feed active.
    Connected,
    /// The last connect attempt failed.
    Failed,
}

/// Inputs to the connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionEvent {
    /// A scan was requested.
    StartScan,
    /// A scan ended without finding anything.
    ScanTimeout,
    /// A device was picked for connection.
    DeviceChosen,
    /// The link came up.
    LinkEstablished,
    /// The link could not be established.
    LinkError,
    /// The feed of a connected link ended.
    LinkDropped,
    /// Try the failed device again.
    Retry,
    /// Abandon the failed device.
    GiveUp,
    /// User-initiated teardown.
    Disconnect,
}

impl ConnectionState {
    /// Apply a transition. Returns `None` when `event` is not valid here.
    #[must_use]
    pub const fn next(self, event: ConnectionEvent) -> Option<Self> {
        use ConnectionEvent as E;
        match (self, event) {
            (_, E::Disconnect) => Some(Self::Disconnected),
            (Self::Disconnected | Self::Scanning, E::StartScan) => Some(Self::Scanning),
            (Self::Disconnected | Self::Scanning, E::DeviceChosen) | (Self::Failed, E::Retry) => {
                Some(Self::Connecting)
            }
            (Self::Scanning, E::ScanTimeout)
            | (Self::Connected, E::LinkDropped)
            | (Self::Failed, E::GiveUp) => Some(Self::Disconnected),
            (Self::Connecting, E::LinkEstablished) => Some(Self::Connected),
            (Self::Connecting, E::LinkError) => Some(Self::Failed),
            _ => None,
        }
    }

    /// Snake-case wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Scanning => "scanning",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
        }
    }

    /// Whether a link is being established or is up.
    #[must_use]
    pub const fn is_busy(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::StartScan => "start_scan",
            Self::ScanTimeout => "scan_timeout",
            Self::DeviceChosen => "device_chosen",
            Self::LinkEstablished => "link_established",
            Self::LinkError => "link_error",
            Self::LinkDropped => "link_dropped",
            Self::Retry => "retry",
            Self::GiveUp => "give_up",
            Self::Disconnect => "disconnect",
        };
        f.write_str(name)
    }
}

/// Published view of the connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ConnectionStatus {
    /// Current state.
    pub state: ConnectionState,
    /// Target or connected device.
    pub device_id: Option<String>,
    /// Results of the latest completed scan.
    pub discovered: Vec<DiscoveredDevice>,
    /// Why the link last failed or dropped.
    pub last_error: Option<String>,
    /// When `state` last changed.
    pub changed_at: DateTime<Utc>,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            device_id: None,
            discovered: Vec::new(),
            last_error: None,
            changed_at: Utc::now(),
        }
    }
}

/// Timeouts for link operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSettings {
    /// How long discovery runs before results are returned.
    pub scan_timeout: Duration,
    /// How long a connect attempt may take.
    pub connect_timeout: Duration,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self::from(&LinkConfig::default())
    }
}

impl From<&LinkConfig> for LinkSettings {
    fn from(config: &LinkConfig) -> Self {
        Self {
            scan_timeout: Duration::from_millis(config.scan_timeout_ms),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
        }
    }
}

struct ActiveFeed {
    handle: FeedHandle,
    task: JoinHandle<()>,
}

struct Session {
    status: ConnectionStatus,
    active: Option<ActiveFeed>,
}

struct Inner {
    link: Arc<dyn DeviceLink>,
    adapter: Arc<TelemetryAdapter>,
    settings: LinkSettings,
    session: Mutex<Session>,
    status_tx: watch::Sender<ConnectionStatus>,
    epoch: watch::Sender<u64>,
}

enum ConnectStart {
    Unchanged(ConnectionState),
    Attempt {
        device_id: String,
        epoch: u64,
        cancel: watch::Receiver<u64>,
    },
}

/// Drives the connection state machine against a device link.
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .field("settings", &self.inner.settings)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Create a manager in the `disconnected` state.
    #[must_use]
    pub fn new(
        link: Arc<dyn DeviceLink>,
        adapter: Arc<TelemetryAdapter>,
        settings: LinkSettings,
    ) -> Self {
        let status = ConnectionStatus::default();
        let (status_tx, _) = watch::channel(status.clone());
        let (epoch, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                link,
                adapter,
                settings,
                session: Mutex::new(Session {
                    status,
                    active: None,
                }),
                status_tx,
                epoch,
            }),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.status_tx.borrow().state
    }

    /// Current published status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.inner.status_tx.borrow().clone()
    }

    /// Subscribe to status changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Scan for devices reachable over `transport`.
    ///
    /// Returns the devices found before the scan timeout, strongest signal
    /// first. An empty result is not an error; it returns the machine to
    /// `disconnected`. With results, the machine stays in `scanning` until a
    /// device is chosen.
    ///
    /// # Errors
    ///
    /// - [`PodError::InvalidTransition`] while connecting or connected.
    /// - [`PodError::ScanSuperseded`] if a newer scan, connect or disconnect
    ///   started before this one finished.
    /// - A link error if discovery could not start.
    pub async fn request_scan(&self, transport: Transport) -> Result<Vec<DiscoveredDevice>> {
        let (epoch, mut cancel) = {
            let mut session = self.inner.session.lock();
            let from = session.status.state;
            if from.is_busy() {
                return Err(PodError::InvalidTransition {
                    from,
                    event: ConnectionEvent::StartScan,
                });
            }
            if from == ConnectionState::Failed {
                self.apply(&mut session, ConnectionEvent::GiveUp, |_| {})?;
            }
            let epoch = self.advance_epoch();
            self.apply(&mut session, ConnectionEvent::StartScan, |status| {
                status.discovered.clear();
                status.last_error = None;
            })?;
            (epoch, self.inner.epoch.subscribe())
        };

        info!(%transport, epoch, "Starting device scan");
        let outcome = tokio::select! {
            biased;
            () = superseded(&mut cancel, epoch) => None,
            found = self.discover(transport) => Some(found),
        };

        let mut session = self.inner.session.lock();
        if *self.inner.epoch.borrow() != epoch {
            debug!(epoch, "Discarding results of superseded scan");
            return Err(PodError::ScanSuperseded);
        }
        match outcome {
            None => Err(PodError::ScanSuperseded),
            Some(Ok(devices)) if devices.is_empty() => {
                info!(%transport, "Scan finished without finding a pod");
                self.apply(&mut session, ConnectionEvent::ScanTimeout, |_| {})?;
                Ok(devices)
            }
            Some(Ok(devices)) => {
                info!(%transport, found = devices.len(), "Scan complete");
                session.status.discovered.clone_from(&devices);
                self.publish(&session);
                Ok(devices)
            }
            Some(Err(e)) => {
                warn!(error = %e, "Device discovery failed");
                self.apply(&mut session, ConnectionEvent::ScanTimeout, |status| {
                    status.last_error = Some(e.to_string());
                })?;
                Err(e)
            }
        }
    }

    /// Connect to `device_id`.
    ///
    /// Calling this while already connecting or connected to the same device
    /// returns the current state without starting another attempt.
    ///
    /// # Errors
    ///
    /// - [`PodError::ConnectionBusy`] while connecting or connected to a
    ///   different device.
    /// - A link error if the connection could not be established. The
    ///   machine is then in `failed`.
    pub async fn request_connect(&self, device_id: &str) -> Result<ConnectionState> {
        match self.start_connect(Some(device_id))? {
            ConnectStart::Unchanged(state) => Ok(state),
            ConnectStart::Attempt {
                device_id,
                epoch,
                cancel,
            } => self.establish(device_id, epoch, cancel).await,
        }
    }

    /// Retry the device of a failed attempt.
    ///
    /// # Errors
    ///
    /// [`PodError::InvalidTransition`] unless the machine is in `failed`,
    /// otherwise as [`ConnectionManager::request_connect`].
    pub async fn retry(&self) -> Result<ConnectionState> {
        match self.start_connect(None)? {
            ConnectStart::Unchanged(state) => Ok(state),
            ConnectStart::Attempt {
                device_id,
                epoch,
                cancel,
            } => self.establish(device_id, epoch, cancel).await,
        }
    }

    /// Abandon a failed device.
    ///
    /// # Errors
    ///
    /// [`PodError::InvalidTransition`] unless the machine is in `failed`.
    pub fn give_up(&self) -> Result<ConnectionState> {
        let mut session = self.inner.session.lock();
        self.apply(&mut session, ConnectionEvent::GiveUp, |_| {})
    }

    /// Tear down whatever is in progress and return to `disconnected`.
    ///
    /// A no-op when already disconnected.
    pub async fn disconnect(&self) -> ConnectionState {
        let active = {
            let mut session = self.inner.session.lock();
            if session.status.state == ConnectionState::Disconnected {
                debug!("Disconnect requested while already disconnected");
                return ConnectionState::Disconnected;
            }
            self.advance_epoch();
            let active = session.active.take();
            if let Some(active) = &active {
                active.task.abort();
            }
            // Disconnect is valid from every state.
            let _ = self.apply(&mut session, ConnectionEvent::Disconnect, |status| {
                status.discovered.clear();
            });
            active
        };

        if let Some(active) = active {
            // No sample is processed once this returns.
            let _ = active.task.await;
            self.close_link(&active.handle).await;
        }
        ConnectionState::Disconnected
    }

    /// Disconnect and forget the device and everything learned from it.
    pub async fn forget(&self) {
        self.disconnect().await;
        {
            let mut session = self.inner.session.lock();
            session.status = ConnectionStatus::default();
            self.publish(&session);
        }
        self.inner.adapter.reset();
        info!("Forgot paired device");
    }

    fn start_connect(&self, device_id: Option<&str>) -> Result<ConnectStart> {
        let mut session = self.inner.session.lock();
        let from = session.status.state;

        if from.is_busy() && device_id.is_some() {
            let active = session.status.device_id.clone().unwrap_or_default();
            if device_id == Some(active.as_str()) {
                debug!(device_id = %active, state = %from, "Ignoring duplicate connect request");
                return Ok(ConnectStart::Unchanged(from));
            }
            return Err(PodError::ConnectionBusy { active });
        }

        let event = if from == ConnectionState::Failed {
            ConnectionEvent::Retry
        } else {
            ConnectionEvent::DeviceChosen
        };
        let target = match device_id {
            Some(id) => id.to_string(),
            None if from == ConnectionState::Failed => session
                .status
                .device_id
                .clone()
                .ok_or(PodError::InvalidTransition { from, event })?,
            None => {
                return Err(PodError::InvalidTransition {
                    from,
                    event: ConnectionEvent::Retry,
                })
            }
        };
        if from.next(event).is_none() {
            return Err(PodError::InvalidTransition { from, event });
        }

        let epoch = self.advance_epoch();
        self.apply(&mut session, event, |status| {
            status.device_id = Some(target.clone());
            status.last_error = None;
        })?;
        info!(device_id = %target, epoch, "Connecting to pod");

        Ok(ConnectStart::Attempt {
            device_id: target,
            epoch,
            cancel: self.inner.epoch.subscribe(),
        })
    }

    async fn establish(
        &self,
        device_id: String,
        epoch: u64,
        mut cancel: watch::Receiver<u64>,
    ) -> Result<ConnectionState> {
        let timeout = self.inner.settings.connect_timeout;
        let result = tokio::select! {
            biased;
            () = superseded(&mut cancel, epoch) => {
                debug!(%device_id, "Connect attempt superseded");
                return Ok(self.state());
            }
            result = tokio::time::timeout(timeout, self.inner.link.connect(&device_id)) => {
                result.unwrap_or_else(|_| {
                    Err(LinkError::Timeout {
                        device_id: device_id.clone(),
                        timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    })
                })
            }
        };

        match result {
            Ok(feed) => self.activate(feed, epoch).await,
            Err(e) => {
                let mut session = self.inner.session.lock();
                if *self.inner.epoch.borrow() != epoch {
                    return Ok(session.status.state);
                }
                warn!(%device_id, error = %e, "Connection attempt failed");
                self.apply(&mut session, ConnectionEvent::LinkError, |status| {
                    status.last_error = Some(e.to_string());
                })?;
                Err(e.into())
            }
        }
    }

    async fn activate(&self, feed: RawFeed, epoch: u64) -> Result<ConnectionState> {
        let RawFeed { handle, samples } = feed;
        let accepted = {
            let mut session = self.inner.session.lock();
            if *self.inner.epoch.borrow() == epoch {
                self.inner.adapter.begin_session();
                self.apply(&mut session, ConnectionEvent::LinkEstablished, |status| {
                    status.device_id = Some(handle.device_id.clone());
                    status.last_error = None;
                })?;

                let manager = self.clone();
                let adapter = Arc::clone(&self.inner.adapter);
                let session_id = handle.session_id;
                let task = tokio::spawn(async move {
                    let summary = adapter.run(samples).await;
                    manager.on_feed_ended(session_id, summary).await;
                });
                session.active = Some(ActiveFeed {
                    handle: handle.clone(),
                    task,
                });
                true
            } else {
                false
            }
        };

        if accepted {
            info!(device_id = %handle.device_id, session = %handle.session_id, "Pod connected");
            Ok(ConnectionState::Connected)
        } else {
            debug!(device_id = %handle.device_id, "Closing link of superseded connect attempt");
            self.close_link(&handle).await;
            Ok(self.state())
        }
    }

    async fn on_feed_ended(&self, session_id: uuid::Uuid, summary: FeedSummary) {
        let handle = {
            let mut session = self.inner.session.lock();
            let is_current = session
                .active
                .as_ref()
                .is_some_and(|active| active.handle.session_id == session_id);
            if !is_current {
                return;
            }
            let Some(active) = session.active.take() else {
                return;
            };
            let err = PodError::FeedTerminated(active.handle.device_id.clone());
            warn!(
                device_id = %active.handle.device_id,
                processed = summary.processed,
                dropped = summary.dropped,
                "Telemetry feed terminated unexpectedly"
            );
            self.advance_epoch();
            let _ = self.apply(&mut session, ConnectionEvent::LinkDropped, |status| {
                status.last_error = Some(err.to_string());
            });
            active.handle
        };
        self.close_link(&handle).await;
    }

    async fn discover(&self, transport: Transport) -> Result<Vec<DiscoveredDevice>> {
        let deadline = Instant::now() + self.inner.settings.scan_timeout;
        let Ok(stream) = tokio::time::timeout_at(deadline, self.inner.link.discover(transport)).await
        else {
            return Ok(Vec::new());
        };
        let mut stream = stream?;

        let mut devices: Vec<DiscoveredDevice> = Vec::new();
        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                () = &mut sleep => break,
                next = stream.next() => match next {
                    Some(device) if device.transport == transport => {
                        debug!(id = %device.id, rssi = device.rssi_dbm, "Discovered pod");
                        if let Some(known) = devices.iter_mut().find(|d| d.id == device.id) {
                            *known = device;
                        } else {
                            devices.push(device);
                        }
                    }
                    Some(_) => {}
                    None => break,
                },
            }
        }

        devices.sort_by(|a, b| b.rssi_dbm.cmp(&a.rssi_dbm));
        Ok(devices)
    }

    async fn close_link(&self, handle: &FeedHandle) {
        if let Err(e) = self.inner.link.disconnect(handle).await {
            warn!(device_id = %handle.device_id, error = %e, "Failed to close device link");
        }
    }

    fn advance_epoch(&self) -> u64 {
        let mut current = 0;
        self.inner.epoch.send_modify(|epoch| {
            *epoch += 1;
            current = *epoch;
        });
        current
    }

    fn apply(
        &self,
        session: &mut Session,
        event: ConnectionEvent,
        update: impl FnOnce(&mut ConnectionStatus),
    ) -> Result<ConnectionState> {
        let from = session.status.state;
        let to = from
            .next(event)
            .ok_or(PodError::InvalidTransition { from, event })?;

        session.status.state = to;
        update(&mut session.status);
        if from != to {
            session.status.changed_at = Utc::now();
            info!(%from, %to, %event, "Connection state changed");
        }
        self.publish(session);
        Ok(to)
    }

    fn publish(&self, session: &Session) {
        self.inner.status_tx.send_replace(session.status.clone());
        self.inner
            .adapter
            .set_connection(session.status.state, session.status.device_id.as_deref());
    }
}

/// Resolves once the epoch moves past `epoch`.
async fn superseded(cancel: &mut watch::Receiver<u64>, epoch: u64) {
    loop {
        if *cancel.borrow_and_update() != epoch {
            return;
        }
        if cancel.changed().await.is_err() {
            futures::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use futures::channel::mpsc;
    use futures::stream;
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::history::{EventKind, HistoryStore, HistoryWindow};
    use crate::link::{DiscoveryStream, LinkResult};
    use crate::status::{DiaperStatus, Thresholds};
    use crate::telemetry::RawSample;

    #[derive(Default)]
    struct ScriptedLink {
        devices: Vec<DiscoveredDevice>,
        hanging_discoveries: AtomicUsize,
        failing_connects: AtomicUsize,
        connect_delay: Duration,
        connects: AtomicUsize,
        feeds: Mutex<Vec<mpsc::UnboundedSender<RawSample>>>,
        closed: Mutex<Vec<FeedHandle>>,
    }

    impl ScriptedLink {
        fn with_pods() -> Self {
            Self {
                devices: vec![
                    device("pod-2", -62, Transport::Bluetooth),
                    device("pod-1", -45, Transport::Bluetooth),
                    device("pod-wifi", -55, Transport::Wifi),
                ],
                ..Self::default()
            }
        }

        fn send(&self, sample: RawSample) {
            for feed in self.feeds.lock().iter() {
                let _ = feed.unbounded_send(sample.clone());
            }
        }

        fn end_feeds(&self) {
            self.feeds.lock().clear();
        }
    }

    #[async_trait]
    impl DeviceLink for ScriptedLink {
        async fn discover(&self, _transport: Transport) -> LinkResult<DiscoveryStream> {
            let hang = self
                .hanging_discoveries
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if hang {
                return Ok(stream::pending().boxed());
            }
            Ok(stream::iter(self.devices.clone()).boxed())
        }

        async fn connect(&self, device_id: &str) -> LinkResult<RawFeed> {
            tokio::time::sleep(self.connect_delay).await;
            self.connects.fetch_add(1, Ordering::SeqCst);
            let failing = self
                .failing_connects
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(LinkError::Rejected {
                    device_id: device_id.to_string(),
                    reason: "pairing refused".to_string(),
                });
            }
            if !self.devices.iter().any(|d| d.id == device_id) {
                return Err(LinkError::DeviceNotFound {
                    device_id: device_id.to_string(),
                });
            }
            let (tx, rx) = mpsc::unbounded();
            self.feeds.lock().push(tx);
            Ok(RawFeed {
                handle: FeedHandle::new(device_id),
                samples: rx.boxed(),
            })
        }

        async fn disconnect(&self, handle: &FeedHandle) -> LinkResult<()> {
            self.closed.lock().push(handle.clone());
            Ok(())
        }
    }

    fn device(id: &str, rssi_dbm: i16, transport: Transport) -> DiscoveredDevice {
        DiscoveredDevice {
            id: id.to_string(),
            display_name: format!("Smart Pod {id}"),
            rssi_dbm,
            transport,
        }
    }

    fn settings() -> LinkSettings {
        LinkSettings {
            scan_timeout: Duration::from_millis(200),
            connect_timeout: Duration::from_millis(500),
        }
    }

    fn manager_with(link: &Arc<ScriptedLink>) -> (ConnectionManager, Arc<TelemetryAdapter>) {
        let adapter = Arc::new(TelemetryAdapter::new(
            Thresholds::default(),
            Arc::new(HistoryStore::new()),
        ));
        let link: Arc<dyn DeviceLink> = link.clone();
        (
            ConnectionManager::new(link, Arc::clone(&adapter), settings()),
            adapter,
        )
    }

    fn sample(moisture: f64, gas: f64, offset_secs: i64) -> RawSample {
        RawSample {
            moisture_pct: Some(moisture),
            gas_pct: Some(gas),
            temp_c: Some(36.6),
            battery_pct: Some(90.0),
            position: Some("back".to_string()),
            ts: Some(Utc::now() + ChronoDuration::seconds(offset_secs)),
        }
    }

    async fn wait_for_state(manager: &ConnectionManager, wanted: ConnectionState) {
        let mut rx = manager.subscribe();
        let waited = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if rx.borrow_and_update().state == wanted {
                    return;
                }
                rx.changed().await.unwrap();
            }
        })
        .await;
        assert!(waited.is_ok(), "timed out waiting for {wanted}");
    }

    #[test]
    fn test_transition_table() {
        use ConnectionEvent as E;
        use ConnectionState as S;

        assert_eq!(S::Disconnected.next(E::StartScan), Some(S::Scanning));
        assert_eq!(S::Scanning.next(E::DeviceChosen), Some(S::Connecting));
        assert_eq!(S::Scanning.next(E::ScanTimeout), Some(S::Disconnected));
        assert_eq!(S::Connecting.next(E::LinkEstablished), Some(S::Connected));
        assert_eq!(S::Connecting.next(E::LinkError), Some(S::Failed));
        assert_eq!(S::Connected.next(E::LinkDropped), Some(S::Disconnected));
        assert_eq!(S::Failed.next(E::Retry), Some(S::Connecting));
        assert_eq!(S::Failed.next(E::GiveUp), Some(S::Disconnected));

        assert_eq!(S::Connected.next(E::StartScan), None);
        assert_eq!(S::Connecting.next(E::DeviceChosen), None);
        assert_eq!(S::Disconnected.next(E::LinkEstablished), None);
        assert_eq!(S::Connected.next(E::Retry), None);

        for state in [S::Disconnected, S::Scanning, S::Connecting, S::Connected, S::Failed] {
            assert_eq!(state.next(E::Disconnect), Some(S::Disconnected));
        }
    }

    #[tokio::test]
    async fn test_scan_filters_and_sorts_by_signal() {
        let link = Arc::new(ScriptedLink::with_pods());
        let (manager, _) = manager_with(&link);

        let devices = assert_ok!(manager.request_scan(Transport::Bluetooth).await);

        let ids: Vec<&str> = devices.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["pod-1", "pod-2"]);
        assert_eq!(manager.state(), ConnectionState::Scanning);
        assert_eq!(manager.status().discovered, devices);
    }

    #[tokio::test]
    async fn test_empty_scan_returns_to_disconnected() {
        let link = Arc::new(ScriptedLink::default());
        let (manager, _) = manager_with(&link);

        let devices = assert_ok!(manager.request_scan(Transport::Wifi).await);

        assert!(devices.is_empty());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_hanging_discovery_times_out_empty() {
        let link = Arc::new(ScriptedLink {
            hanging_discoveries: AtomicUsize::new(1),
            ..ScriptedLink::with_pods()
        });
        let (manager, _) = manager_with(&link);

        let devices = assert_ok!(manager.request_scan(Transport::Bluetooth).await);

        assert!(devices.is_empty());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_newer_scan_supersedes_stale_scan() {
        let link = Arc::new(ScriptedLink {
            hanging_discoveries: AtomicUsize::new(1),
            ..ScriptedLink::with_pods()
        });
        let (manager, _) = manager_with(&link);

        let first = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.request_scan(Transport::Bluetooth).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = assert_ok!(manager.request_scan(Transport::Bluetooth).await);

        let first = first.await.unwrap();
        assert!(matches!(first, Err(PodError::ScanSuperseded)));
        assert_eq!(second.len(), 2);
        assert_eq!(manager.status().discovered, second);
        assert_eq!(manager.state(), ConnectionState::Scanning);
    }

    #[tokio::test]
    async fn test_scan_then_connect() {
        let link = Arc::new(ScriptedLink::with_pods());
        let (manager, adapter) = manager_with(&link);

        assert_ok!(manager.request_scan(Transport::Bluetooth).await);
        let state = assert_ok!(manager.request_connect("pod-1").await);

        assert_eq!(state, ConnectionState::Connected);
        assert_eq!(manager.status().device_id.as_deref(), Some("pod-1"));
        assert_eq!(adapter.current().connection, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_duplicate_connect_is_not_reissued() {
        let link = Arc::new(ScriptedLink::with_pods());
        let (manager, _) = manager_with(&link);

        assert_ok!(manager.request_connect("pod-1").await);
        let again = assert_ok!(manager.request_connect("pod-1").await);

        assert_eq!(again, ConnectionState::Connected);
        assert_eq!(link.connects.load(Ordering::SeqCst), 1);
        assert_eq!(link.feeds.lock().len(), 1);

        let other = manager.request_connect("pod-2").await;
        assert!(matches!(other, Err(PodError::ConnectionBusy { .. })));
    }

    #[tokio::test]
    async fn test_connect_while_connecting_same_device() {
        let link = Arc::new(ScriptedLink {
            connect_delay: Duration::from_millis(100),
            ..ScriptedLink::with_pods()
        });
        let (manager, _) = manager_with(&link);

        let first = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.request_connect("pod-1").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = assert_ok!(manager.request_connect("pod-1").await);

        assert_eq!(second, ConnectionState::Connecting);
        assert_eq!(first.await.unwrap().unwrap(), ConnectionState::Connected);
        assert_eq!(link.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_connect_then_retry() {
        let link = Arc::new(ScriptedLink {
            failing_connects: AtomicUsize::new(1),
            ..ScriptedLink::with_pods()
        });
        let (manager, _) = manager_with(&link);

        let err = assert_err!(manager.request_connect("pod-1").await);
        assert!(err.is_link_error());
        assert_eq!(manager.state(), ConnectionState::Failed);
        assert!(manager.status().last_error.is_some());
        assert!(link.feeds.lock().is_empty());

        let state = assert_ok!(manager.retry().await);
        assert_eq!(state, ConnectionState::Connected);
        assert_eq!(manager.status().last_error, None);
    }

    #[tokio::test]
    async fn test_connect_timeout_fails() {
        let link = Arc::new(ScriptedLink {
            connect_delay: Duration::from_secs(5),
            ..ScriptedLink::with_pods()
        });
        let (manager, _) = manager_with(&link);

        let err = assert_err!(manager.request_connect("pod-1").await);

        assert!(matches!(err, PodError::ConnectFailed { .. }));
        assert_eq!(manager.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn test_give_up_and_retry_validation() {
        let link = Arc::new(ScriptedLink::with_pods());
        let (manager, _) = manager_with(&link);

        assert!(matches!(
            manager.retry().await,
            Err(PodError::InvalidTransition { .. })
        ));
        assert!(manager.give_up().is_err());

        assert_err!(manager.request_connect("pod-unknown").await);
        assert_eq!(manager.state(), ConnectionState::Failed);
        assert_eq!(assert_ok!(manager.give_up()), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_scan_rejected_while_connected() {
        let link = Arc::new(ScriptedLink::with_pods());
        let (manager, _) = manager_with(&link);
        assert_ok!(manager.request_connect("pod-1").await);

        let err = assert_err!(manager.request_scan(Transport::Bluetooth).await);

        assert!(matches!(
            err,
            PodError::InvalidTransition {
                from: ConnectionState::Connected,
                event: ConnectionEvent::StartScan
            }
        ));
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let link = Arc::new(ScriptedLink::with_pods());
        let (manager, _) = manager_with(&link);

        assert_eq!(manager.disconnect().await, ConnectionState::Disconnected);
        assert_eq!(manager.disconnect().await, ConnectionState::Disconnected);
        assert!(link.closed.lock().is_empty());

        assert_ok!(manager.request_connect("pod-1").await);
        assert_eq!(manager.disconnect().await, ConnectionState::Disconnected);
        assert_eq!(manager.disconnect().await, ConnectionState::Disconnected);
        assert_eq!(link.closed.lock().len(), 1);
        assert_eq!(manager.status().last_error, None);
    }

    #[tokio::test]
    async fn test_disconnect_during_connect_discards_link() {
        let link = Arc::new(ScriptedLink {
            connect_delay: Duration::from_millis(100),
            ..ScriptedLink::with_pods()
        });
        let (manager, _) = manager_with(&link);

        let attempt = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.request_connect("pod-1").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        manager.disconnect().await;

        assert_eq!(attempt.await.unwrap().unwrap(), ConnectionState::Disconnected);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_during_scan_supersedes_it() {
        let link = Arc::new(ScriptedLink {
            hanging_discoveries: AtomicUsize::new(1),
            ..ScriptedLink::with_pods()
        });
        let (manager, _) = manager_with(&link);

        let scan = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.request_scan(Transport::Bluetooth).await })
        };
        wait_for_state(&manager, ConnectionState::Scanning).await;

        assert_eq!(manager.disconnect().await, ConnectionState::Disconnected);

        let scan = scan.await.unwrap();
        assert!(matches!(scan, Err(PodError::ScanSuperseded)));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.status().discovered.is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_from_failed() {
        let link = Arc::new(ScriptedLink {
            failing_connects: AtomicUsize::new(1),
            ..ScriptedLink::with_pods()
        });
        let (manager, _) = manager_with(&link);
        assert_err!(manager.request_connect("pod-1").await);
        assert_eq!(manager.state(), ConnectionState::Failed);

        assert_eq!(manager.disconnect().await, ConnectionState::Disconnected);

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(link.closed.lock().is_empty());
        assert!(matches!(
            manager.retry().await,
            Err(PodError::InvalidTransition { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_no_samples_processed_after_disconnect_returns() {
        let link = Arc::new(ScriptedLink::with_pods());
        let (manager, adapter) = manager_with(&link);
        assert_ok!(manager.request_connect("pod-1").await);

        for i in 0..2_000 {
            let (moisture, gas) = if i % 2 == 0 { (80.0, 10.0) } else { (10.0, 80.0) };
            link.send(sample(moisture, gas, i));
        }
        manager.disconnect().await;

        let snapshot = adapter.current();
        let logged = adapter.history().len();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(adapter.current(), snapshot);
        assert_eq!(adapter.history().len(), logged);
        assert_eq!(snapshot.connection, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_feed_end_is_link_dropped() {
        let link = Arc::new(ScriptedLink::with_pods());
        let (manager, _) = manager_with(&link);
        assert_ok!(manager.request_connect("pod-1").await);

        link.end_feeds();
        wait_for_state(&manager, ConnectionState::Disconnected).await;

        let status = manager.status();
        assert!(status.last_error.unwrap().contains("terminated"));
        assert_eq!(link.closed.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_end_to_end_status_and_history() {
        let link = Arc::new(ScriptedLink::with_pods());
        let (manager, adapter) = manager_with(&link);

        assert_ok!(manager.request_scan(Transport::Bluetooth).await);
        assert_ok!(manager.request_connect("pod-1").await);
        link.send(sample(60.0, 10.0, 0));
        link.send(sample(60.0, 60.0, 1));
        link.send(sample(10.0, 10.0, 2));
        link.end_feeds();
        wait_for_state(&manager, ConnectionState::Disconnected).await;

        assert_eq!(adapter.current().status, DiaperStatus::Dry);
        let mut events = adapter.history().query(HistoryWindow::All);
        events.reverse();
        let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::Wet, EventKind::Both]);
    }

    #[tokio::test]
    async fn test_forget_resets_everything() {
        let link = Arc::new(ScriptedLink::with_pods());
        let (manager, adapter) = manager_with(&link);
        assert_ok!(manager.request_connect("pod-1").await);

        manager.forget().await;

        let status = manager.status();
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert_eq!(status.device_id, None);
        assert_eq!(adapter.current().device_id, None);
    }
}
