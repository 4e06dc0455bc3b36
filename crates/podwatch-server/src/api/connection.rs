//! Connection control endpoints.
//!
//! Scanning, connecting, retrying, disconnecting and forgetting the pod.
//! Every operation reports the resulting connection state; operations the
//! state machine refuses return 409.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use podwatch_core::{ConnectionState, ConnectionStatus, DiscoveredDevice, SignalQuality, Transport};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

/// Creates the connection router with all endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(get_connection))
        .route("/scan", post(scan))
        .route("/connect", post(connect))
        .route("/retry", post(retry))
        .route("/give-up", post(give_up))
        .route("/disconnect", post(disconnect))
        .route("/forget", post(forget))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// A discovered pod with its signal bucket.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "id": "pod-1",
    "display_name": "Smart Pod #1",
    "rssi_dbm": -45,
    "transport": "bluetooth",
    "signal_quality": "excellent",
    "signal_label": "Excellent"
}))]
pub struct DeviceEntry {
    /// The discovered device.
    #[serde(flatten)]
    pub device: DiscoveredDevice,

    /// Signal bucket.
    pub signal_quality: SignalQuality,

    /// Display label for the signal bucket.
    #[schema(example = "Excellent")]
    pub signal_label: String,
}

impl From<DiscoveredDevice> for DeviceEntry {
    fn from(device: DiscoveredDevice) -> Self {
        let quality = device.signal_quality();
        Self {
            device,
            signal_quality: quality,
            signal_label: quality.label().to_string(),
        }
    }
}

/// Scan request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ScanRequest {
    /// Transport to scan; the configured default when absent.
    pub transport: Option<Transport>,
}

/// Scan results, strongest signal first.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ScanResponse {
    /// Connection state after the scan.
    pub state: ConnectionState,

    /// Pods found.
    pub devices: Vec<DeviceEntry>,
}

/// Connect request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConnectRequest {
    /// Id of the pod to connect to.
    #[schema(example = "pod-1")]
    pub device_id: String,
}

/// Connection state after an operation.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConnectionResponse {
    /// Resulting connection state.
    pub state: ConnectionState,

    /// Target or connected pod.
    #[schema(example = "pod-1")]
    pub device_id: Option<String>,
}

impl From<ConnectionStatus> for ConnectionResponse {
    fn from(status: ConnectionStatus) -> Self {
        Self {
            state: status.state,
            device_id: status.device_id,
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Get the connection status.
#[utoipa::path(
    get,
    path = "/api/connection",
    tag = "connection",
    operation_id = "getConnection",
    summary = "Get connection status",
    description = "Returns the connection state, the target device, the results of the \
        latest scan and the last link error.",
    responses(
        (status = 200, description = "Connection status", body = ConnectionStatus)
    )
)]
pub async fn get_connection(State(state): State<SharedState>) -> Json<ConnectionStatus> {
    Json(state.monitor().connection_status())
}

/// Scan for pods.
#[utoipa::path(
    post,
    path = "/api/connection/scan",
    tag = "connection",
    operation_id = "scanDevices",
    summary = "Scan for pods",
    description = "Runs discovery over the requested transport until the scan timeout. \
        An empty result returns the connection to disconnected.",
    request_body = ScanRequest,
    responses(
        (status = 200, description = "Scan finished", body = ScanResponse),
        (status = 409, description = "Connected, connecting, or superseded by a newer request", body = super::error::ErrorResponse),
        (status = 503, description = "Radio unavailable", body = super::error::ErrorResponse)
    )
)]
pub async fn scan(
    State(state): State<SharedState>,
    Json(request): Json<ScanRequest>,
) -> ApiResult<Json<ScanResponse>> {
    let monitor = state.monitor();
    let devices = monitor.scan(request.transport).await?;

    Ok(Json(ScanResponse {
        state: monitor.connection().state(),
        devices: devices.into_iter().map(DeviceEntry::from).collect(),
    }))
}

/// Connect to a pod.
#[utoipa::path(
    post,
    path = "/api/connection/connect",
    tag = "connection",
    operation_id = "connectDevice",
    summary = "Connect to a pod",
    description = "Establishes the link and starts consuming telemetry. Repeating the \
        request for the pod already in use is a no-op.",
    request_body = ConnectRequest,
    responses(
        (status = 200, description = "Connected", body = ConnectionResponse),
        (status = 400, description = "Empty device id", body = super::error::ErrorResponse),
        (status = 404, description = "Pod not found", body = super::error::ErrorResponse),
        (status = 409, description = "Busy with another pod", body = super::error::ErrorResponse),
        (status = 502, description = "Connection failed", body = super::error::ErrorResponse)
    )
)]
pub async fn connect(
    State(state): State<SharedState>,
    Json(request): Json<ConnectRequest>,
) -> ApiResult<Json<ConnectionResponse>> {
    let device_id = request.device_id.trim();
    if device_id.is_empty() {
        return Err(ApiError::bad_request(
            "invalid_device_id",
            "device_id cannot be empty",
        ));
    }

    state.monitor().connect(device_id).await?;
    Ok(Json(state.monitor().connection_status().into()))
}

/// Retry a failed connection.
#[utoipa::path(
    post,
    path = "/api/connection/retry",
    tag = "connection",
    operation_id = "retryConnection",
    summary = "Retry the failed pod",
    responses(
        (status = 200, description = "Connected", body = ConnectionResponse),
        (status = 409, description = "Not in the failed state", body = super::error::ErrorResponse),
        (status = 502, description = "Connection failed again", body = super::error::ErrorResponse)
    )
)]
pub async fn retry(State(state): State<SharedState>) -> ApiResult<Json<ConnectionResponse>> {
    state.monitor().retry().await?;
    Ok(Json(state.monitor().connection_status().into()))
}

/// Abandon a failed connection.
#[utoipa::path(
    post,
    path = "/api/connection/give-up",
    tag = "connection",
    operation_id = "giveUpConnection",
    summary = "Abandon the failed pod",
    responses(
        (status = 200, description = "Disconnected", body = ConnectionResponse),
        (status = 409, description = "Not in the failed state", body = super::error::ErrorResponse)
    )
)]
pub async fn give_up(State(state): State<SharedState>) -> ApiResult<Json<ConnectionResponse>> {
    state.monitor().give_up()?;
    Ok(Json(state.monitor().connection_status().into()))
}

/// Disconnect from the pod.
#[utoipa::path(
    post,
    path = "/api/connection/disconnect",
    tag = "connection",
    operation_id = "disconnectDevice",
    summary = "Disconnect",
    description = "Cancels any scan or connect in progress and closes the link. \
        Safe to call in any state.",
    responses(
        (status = 200, description = "Disconnected", body = ConnectionResponse)
    )
)]
pub async fn disconnect(State(state): State<SharedState>) -> Json<ConnectionResponse> {
    state.monitor().disconnect().await;
    Json(state.monitor().connection_status().into())
}

/// Forget the pod.
#[utoipa::path(
    post,
    path = "/api/connection/forget",
    tag = "connection",
    operation_id = "forgetDevice",
    summary = "Forget the pod",
    description = "Disconnects and clears the remembered pod and the live device state. \
        History is kept.",
    responses(
        (status = 200, description = "Forgotten", body = ConnectionResponse)
    )
)]
pub async fn forget(State(state): State<SharedState>) -> Json<ConnectionResponse> {
    state.monitor().forget().await;
    info!("Pod forgotten via API");
    Json(state.monitor().connection_status().into())
}
