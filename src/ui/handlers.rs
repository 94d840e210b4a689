//! HTTP API handlers

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use crate::capture::CaptureStatus;
use crate::config::DeliveryMode;
use crate::error::{InputConfigError, SettingsError};
use crate::input_config::{ApplyRequest, Device, InputOptions};
use crate::media::MjpegBroadcaster;
use crate::settings::{Settings, SettingsPatch, SettingsView};
use crate::ui::server::AppState;

/// API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

type ApiResult<T> = (StatusCode, Json<ApiResponse<T>>);

fn failure<T>(status: StatusCode, msg: impl Into<String>) -> ApiResult<T> {
    (status, Json(ApiResponse::error(msg)))
}

/// Relay status
#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub is_integrating: bool,
    pub capture: CaptureStatus,
    pub delivery: DeliveryMode,
    pub peers: usize,
    pub rooms: usize,
    pub mjpeg_consumers: usize,
    pub started_at: DateTime<Utc>,
    pub uptime_seconds: u64,
}

/// Get relay status
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<ApiResponse<SystemStatus>> {
    let registry = state.relay.registry();
    let status = SystemStatus {
        is_integrating: state.relay.is_integrating(),
        capture: state.supervisor.status(),
        delivery: state.config.capture.delivery,
        peers: registry.len(),
        rooms: registry.room_count(),
        mjpeg_consumers: state.mjpeg.consumer_count(),
        started_at: state.started_at,
        uptime_seconds: state.uptime_seconds(),
    };

    Json(ApiResponse::ok(status))
}

/// Get current capture settings. Served bare, dashboards read the fields
/// straight off the body.
pub async fn get_settings(State(state): State<Arc<AppState>>) -> Json<SettingsView> {
    Json(state.settings.get().into())
}

/// Update capture settings, notify dashboards and restart capture
pub async fn update_settings(
    State(state): State<Arc<AppState>>,
    patch: Result<Json<SettingsPatch>, JsonRejection>,
) -> ApiResult<Settings> {
    let Json(patch) = match patch {
        Ok(patch) => patch,
        Err(e) => return failure(StatusCode::BAD_REQUEST, e.body_text()),
    };
    if patch.is_empty() {
        return failure(StatusCode::BAD_REQUEST, "no settings given");
    }

    let settings = match state.settings.update(&patch).await {
        Ok(settings) => settings,
        Err(e @ SettingsError::ChannelOutOfRange { .. }) => {
            return failure(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(e) => return failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    state.relay.settings_changed(&settings);
    if let Err(e) = state.supervisor.restart() {
        tracing::error!("Capture restart after settings change failed: {}", e);
        return failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }

    (StatusCode::OK, Json(ApiResponse::ok(settings)))
}

#[derive(Debug, Serialize)]
pub struct DeviceList {
    pub devices: Vec<Device>,
}

fn input_config_status(e: &InputConfigError) -> StatusCode {
    match e {
        InputConfigError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        InputConfigError::NonZeroExit { .. } | InputConfigError::Timeout(_) => StatusCode::BAD_GATEWAY,
        InputConfigError::SpawnFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// List capture devices known to the helper as `{devices: [...]}`
pub async fn list_input_devices(State(state): State<Arc<AppState>>) -> Response {
    match state.input_config.devices().await {
        Ok(devices) => Json(DeviceList { devices }).into_response(),
        Err(e) => {
            tracing::warn!("Listing input devices failed: {}", e);
            failure::<()>(input_config_status(&e), e.to_string()).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct OptionsQuery {
    pub device: Option<String>,
}

/// List video/audio inputs of one device as `{videoInputs, audioInputs}`
pub async fn list_input_options(
    State(state): State<Arc<AppState>>,
    Query(query): Query<OptionsQuery>,
) -> Response {
    let Some(device) = query.device.filter(|d| !d.trim().is_empty()) else {
        return failure::<()>(StatusCode::BAD_REQUEST, "device is required").into_response();
    };

    match state.input_config.options(&device).await {
        Ok(options) => Json::<InputOptions>(options).into_response(),
        Err(e) => {
            tracing::warn!(device = %device, "Listing inputs failed: {}", e);
            failure::<()>(input_config_status(&e), e.to_string()).into_response()
        }
    }
}

/// Apply an input selection, then restart capture so it takes effect
pub async fn apply_input_config(
    State(state): State<Arc<AppState>>,
    request: Result<Json<ApplyRequest>, JsonRejection>,
) -> ApiResult<()> {
    let Json(request) = match request {
        Ok(request) => request,
        Err(e) => return failure(StatusCode::BAD_REQUEST, e.body_text()),
    };

    if let Err(e) = state.input_config.apply(&request).await {
        tracing::warn!(device = %request.device, "Applying input configuration failed: {}", e);
        return failure(input_config_status(&e), e.to_string());
    }
    if let Err(e) = state.supervisor.restart() {
        return failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }

    (StatusCode::OK, Json(ApiResponse::ok(())))
}

/// `GET /vectorscope.mjpeg`
pub async fn vectorscope_stream(State(state): State<Arc<AppState>>) -> Response {
    let rx = state.mjpeg.subscribe();
    tracing::debug!(consumers = state.mjpeg.consumer_count(), "MJPEG consumer connected");

    let parts = futures_util::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(part) => return Some((Ok::<_, std::io::Error>(part), rx)),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "MJPEG consumer lagging");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    (
        [
            (header::CONTENT_TYPE, MjpegBroadcaster::content_type()),
            (header::CACHE_CONTROL, "no-cache, no-store".to_string()),
        ],
        Body::from_stream(parts),
    )
        .into_response()
}
