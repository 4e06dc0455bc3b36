//! Live device state endpoint.

use axum::extract::State;
use axum::Json;
use podwatch_core::DeviceState;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::state::SharedState;

/// Current pod snapshot with display labels.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeviceResponse {
    /// The latest snapshot.
    #[serde(flatten)]
    pub state: DeviceState,

    /// Whether the current status calls for a change.
    #[schema(example = true)]
    pub needs_attention: bool,

    /// Time of the last update as `HH:MM` in the display timezone.
    #[schema(example = "14:05")]
    pub last_updated_label: Option<String>,
}

/// Get the current device state.
#[utoipa::path(
    get,
    path = "/api/device",
    tag = "device",
    operation_id = "getDevice",
    summary = "Get live pod state",
    description = "Returns the latest classified reading, the connection state, \
        and whether the pod reports an unsafe sleeping position.",
    responses(
        (status = 200, description = "Current device state", body = DeviceResponse)
    )
)]
pub async fn get_device(State(state): State<SharedState>) -> Json<DeviceResponse> {
    let monitor = state.monitor();
    let device = monitor.device_state();

    Json(DeviceResponse {
        needs_attention: device.status.needs_attention(),
        last_updated_label: monitor.last_updated_label(),
        state: device,
    })
}

#[cfg(all(test, feature = "simulator"))]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use crate::api::create_router;
    use crate::api::testing::{request, test_state};

    #[tokio::test]
    async fn test_device_before_connect() {
        let app = create_router(test_state());

        let (status, body) = request(app, Method::GET, "/api/device", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], json!("dry"));
        assert_eq!(body["connection"], json!("disconnected"));
        assert_eq!(body["needs_attention"], json!(false));
        assert_eq!(body["sample"], json!(null));
    }
}
