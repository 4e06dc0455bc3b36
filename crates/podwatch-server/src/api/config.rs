//! Configuration API endpoints.
//!
//! Provides endpoints for reading the configuration and updating the
//! classification thresholds and display timezone at runtime.

use axum::extract::State;
use axum::routing::{get, put};
use axum::{Json, Router};
use chrono_tz::Tz;
use podwatch_core::{PodConfig, Thresholds};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

/// Creates the config router with all endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(get_config))
        .route("/thresholds", put(update_thresholds))
        .route("/timezone", put(update_timezone))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Response after updating thresholds.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "thresholds": {
        "wet_threshold": 60.0,
        "gas_threshold": 50.0,
        "temp_spike_threshold_c": 37.8
    },
    "persisted": true
}))]
pub struct UpdateThresholdsResponse {
    /// Thresholds now in effect.
    pub thresholds: Thresholds,

    /// Whether the change was written to the configuration file.
    #[schema(example = true)]
    pub persisted: bool,
}

/// Request to change the display timezone.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateTimezoneRequest {
    /// IANA timezone name.
    #[schema(example = "America/New_York")]
    pub timezone: String,
}

/// Response after changing the display timezone.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateTimezoneResponse {
    /// Timezone now in effect.
    #[schema(example = "America/New_York")]
    pub timezone: String,

    /// Whether the change was written to the configuration file.
    #[schema(example = true)]
    pub persisted: bool,
}

// ============================================================================
// Handlers
// ============================================================================

/// Get current configuration.
#[utoipa::path(
    get,
    path = "/api/config",
    tag = "config",
    operation_id = "getConfig",
    summary = "Get current configuration",
    description = "Returns the full configuration: thresholds, link timeouts, \
        history retention, display timezone, simulator and server settings.",
    responses(
        (status = 200, description = "Configuration retrieved", body = PodConfig)
    )
)]
pub async fn get_config(State(state): State<SharedState>) -> Json<PodConfig> {
    Json(state.config().await.clone())
}

/// Update classification thresholds.
#[utoipa::path(
    put,
    path = "/api/config/thresholds",
    tag = "config",
    operation_id = "updateThresholds",
    summary = "Update classification thresholds",
    description = "Replaces the wet, gas and temperature spike thresholds. \
        The new values apply from the next sample on.",
    request_body = Thresholds,
    responses(
        (status = 200, description = "Thresholds updated", body = UpdateThresholdsResponse),
        (status = 422, description = "A threshold is out of range", body = super::error::ErrorResponse)
    )
)]
pub async fn update_thresholds(
    State(state): State<SharedState>,
    Json(thresholds): Json<Thresholds>,
) -> ApiResult<Json<UpdateThresholdsResponse>> {
    let mut config = state.config_mut().await;
    config.set_thresholds(thresholds)?;
    state.monitor().set_thresholds(thresholds);

    let persisted = persist(&state, &config)?;
    info!(
        wet = thresholds.wet_threshold,
        gas = thresholds.gas_threshold,
        spike = thresholds.temp_spike_threshold_c,
        persisted,
        "Thresholds updated"
    );

    Ok(Json(UpdateThresholdsResponse {
        thresholds,
        persisted,
    }))
}

/// Update the display timezone.
#[utoipa::path(
    put,
    path = "/api/config/timezone",
    tag = "config",
    operation_id = "updateTimezone",
    summary = "Update display timezone",
    description = "Sets the IANA timezone used for clock labels in history and device responses.",
    request_body = UpdateTimezoneRequest,
    responses(
        (status = 200, description = "Timezone updated", body = UpdateTimezoneResponse),
        (status = 400, description = "Unknown timezone", body = super::error::ErrorResponse)
    )
)]
pub async fn update_timezone(
    State(state): State<SharedState>,
    Json(request): Json<UpdateTimezoneRequest>,
) -> ApiResult<Json<UpdateTimezoneResponse>> {
    let timezone: Tz = request.timezone.parse().map_err(|_| {
        ApiError::bad_request(
            "invalid_timezone",
            format!("Unknown timezone '{}'. Use an IANA name such as 'Europe/London'.", request.timezone),
        )
    })?;

    let mut config = state.config_mut().await;
    config.display.timezone = timezone;
    state.monitor().set_timezone(timezone);

    let persisted = persist(&state, &config)?;
    info!(timezone = %timezone, persisted, "Timezone updated");

    Ok(Json(UpdateTimezoneResponse {
        timezone: timezone.name().to_string(),
        persisted,
    }))
}

fn persist(state: &SharedState, config: &PodConfig) -> ApiResult<bool> {
    let Some(path) = state.config_path() else {
        return Ok(false);
    };
    config.save(path).map_err(|e| ApiError::InternalError {
        error_code: "config_save_failed".to_string(),
        message: "Failed to save configuration".to_string(),
        details: Some(e.to_string()),
    })?;
    Ok(true)
}
