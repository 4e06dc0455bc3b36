//! OpenAPI specification generation for the podwatch API.
//!
//! The specification is served at `/api/openapi.json` and written to disk by
//! the `gen-openapi` binary for client generation.

use axum::Json;
use utoipa::OpenApi;

use podwatch_core::{
    ConnectionState, ConnectionStatus, DeviceState, DiaperStatus, DiscoveredDevice, EventDetails,
    EventKind, HistoryEntry, HistoryEvent, HistoryStats, HistoryWindow, PodConfig, Position,
    SignalQuality, TelemetrySample, Thresholds, Transport,
};

use super::config::{UpdateThresholdsResponse, UpdateTimezoneRequest, UpdateTimezoneResponse};
use super::connection::{
    ConnectRequest, ConnectionResponse, DeviceEntry, ScanRequest, ScanResponse,
};
use super::device::DeviceResponse;
use super::error::ErrorResponse;
use super::health::HealthResponse;
use super::history::{HistoryResponse, StatsResponse};

/// Serve the OpenAPI specification as JSON.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Returns the OpenAPI specification as pretty-printed JSON.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> Result<String, serde_json::Error> {
    ApiDoc::openapi().to_pretty_json()
}

/// Main OpenAPI document structure for podwatch.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "podwatch API",
        version = "0.1.0",
        description = r"
# podwatch API

podwatch watches a Smart Diaper Pod: a wearable sensor reporting moisture, gas,
temperature, battery and sleeping position.

## Overview

1. **Device**: The latest reading, classified as `dry`, `wet`, `soiled` or `both`
2. **Connection**: Scan for pods, connect, retry, disconnect or forget
3. **History**: Status changes and temperature spikes, by day, week or month
4. **Configuration**: Classification thresholds and display timezone

## Connection lifecycle

`disconnected` → `scanning` → `connecting` → `connected`, with `failed` after an
unsuccessful connect. Requests the lifecycle does not allow return `409`.
",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local podwatch server")
    ),
    tags(
        (name = "system", description = "Health checks"),
        (name = "device", description = "Live pod readings and derived status"),
        (name = "connection", description = "Pod discovery and connection lifecycle"),
        (name = "history", description = "Recorded diaper events and statistics"),
        (name = "config", description = "Thresholds and display settings")
    ),
    paths(
        super::health::health_check,
        super::device::get_device,
        super::connection::get_connection,
        super::connection::scan,
        super::connection::connect,
        super::connection::retry,
        super::connection::give_up,
        super::connection::disconnect,
        super::connection::forget,
        super::history::get_history,
        super::history::get_stats,
        super::config::get_config,
        super::config::update_thresholds,
        super::config::update_timezone,
    ),
    components(
        schemas(
            // Error types
            ErrorResponse,
            // Health types
            HealthResponse,
            // Device types
            DeviceResponse,
            DeviceState,
            DiaperStatus,
            TelemetrySample,
            Position,
            // Connection types
            ConnectionStatus,
            ConnectionState,
            ConnectionResponse,
            ConnectRequest,
            ScanRequest,
            ScanResponse,
            DeviceEntry,
            DiscoveredDevice,
            SignalQuality,
            Transport,
            // History types
            HistoryResponse,
            HistoryEntry,
            HistoryEvent,
            EventKind,
            EventDetails,
            HistoryWindow,
            HistoryStats,
            StatsResponse,
            // Config types
            PodConfig,
            Thresholds,
            UpdateThresholdsResponse,
            UpdateTimezoneRequest,
            UpdateTimezoneResponse,
        )
    )
)]
pub struct ApiDoc;
