//! Event history endpoints.

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use podwatch_core::{HistoryEntry, HistoryStats, HistoryWindow};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

/// Creates the history router with all endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(get_history))
        .route("/stats", get(get_stats))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Window selection for history queries.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct WindowQuery {
    /// One of `today`, `week`, `month`, `all`. Defaults to `today`.
    #[param(example = "week")]
    pub window: Option<String>,
}

impl WindowQuery {
    fn parse(&self) -> ApiResult<HistoryWindow> {
        self.window.as_deref().map_or(Ok(HistoryWindow::default()), |raw| {
            raw.parse()
                .map_err(|message: String| ApiError::bad_request("invalid_window", message))
        })
    }
}

/// Events in a window, newest first.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HistoryResponse {
    /// The window queried.
    pub window: HistoryWindow,

    /// Matching events with display labels.
    pub events: Vec<HistoryEntry>,
}

/// Statistics over a window.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "window": "today",
    "count": 3,
    "average_interval_secs": 9000.0,
    "by_kind": { "wet": 2, "both": 1 },
    "average_interval_label": "2h 30m"
}))]
pub struct StatsResponse {
    /// Raw statistics.
    #[serde(flatten)]
    pub stats: HistoryStats,

    /// Mean interval rendered as hours and minutes, when defined.
    #[schema(example = "2h 30m")]
    pub average_interval_label: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

/// List history events.
#[utoipa::path(
    get,
    path = "/api/history",
    tag = "history",
    operation_id = "getHistory",
    summary = "List diaper events",
    description = "Returns status-change and temperature spike events recorded within \
        the window, newest first.",
    params(WindowQuery),
    responses(
        (status = 200, description = "Events in the window", body = HistoryResponse),
        (status = 400, description = "Unknown window", body = super::error::ErrorResponse)
    )
)]
pub async fn get_history(
    State(state): State<SharedState>,
    Query(query): Query<WindowQuery>,
) -> ApiResult<Json<HistoryResponse>> {
    let window = query.parse()?;
    Ok(Json(HistoryResponse {
        window,
        events: state.monitor().history_entries(window),
    }))
}

/// Aggregate statistics over a window.
#[utoipa::path(
    get,
    path = "/api/history/stats",
    tag = "history",
    operation_id = "getHistoryStats",
    summary = "Summarize diaper events",
    description = "Returns the event count, the mean interval between consecutive events, \
        and counts per event kind within the window.",
    params(WindowQuery),
    responses(
        (status = 200, description = "Statistics for the window", body = StatsResponse),
        (status = 400, description = "Unknown window", body = super::error::ErrorResponse)
    )
)]
pub async fn get_stats(
    State(state): State<SharedState>,
    Query(query): Query<WindowQuery>,
) -> ApiResult<Json<StatsResponse>> {
    let window = query.parse()?;
    let stats = state.monitor().history_stats(window);
    let average_interval_label = stats.average_interval().map(|interval| {
        let minutes = interval.num_minutes();
        format!("{}h {}m", minutes / 60, minutes % 60)
    });

    Ok(Json(StatsResponse {
        stats,
        average_interval_label,
    }))
}
