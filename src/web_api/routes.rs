//! API Routes

use axum::{
    extract::{Path, State},
    http::header,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use crate::models::{ApiResponse, DeviceStatus};
use crate::state::AppState;
use crate::store::codec;
use crate::{Error, Result};

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/healthz", get(super::health_check))
        // Devices
        .route("/api/devices", get(list_devices))
        .route("/api/devices/:id/reserve", post(reserve_device))
        // Movements
        .route("/api/movements", get(list_movements))
        // Collected training data
        .route("/api/trainings/raw.csv", get(export_raw_csv))
        // WebSocket
        .route("/ws/device", get(ws_device_handler))
        .route("/ws/viewer", get(ws_viewer_handler))
        .with_state(state)
}

async fn ws_device_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| super::ws_device::handle_device_socket(socket, state))
}

async fn ws_viewer_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| super::ws_viewer::handle_viewer_socket(socket, state))
}

// ========================================
// Device Handlers
// ========================================

async fn list_devices(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let devices = state.store.list_devices().await?;
    Ok(Json(ApiResponse::success(devices)))
}

/// Reserve an idle device ahead of a training run.
async fn reserve_device(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse> {
    let device = state.store.get_device_by_id(id).await?;
    if device.status == DeviceStatus::Streaming {
        return Err(Error::DeviceBusy(format!("device {id} is already streaming")));
    }

    state
        .device_status
        .transition(id, DeviceStatus::Reserved)
        .await?;

    Ok(Json(json!({
        "status": "reserved",
        "device_id": id
    })))
}

// ========================================
// Movement Handlers
// ========================================

async fn list_movements(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let movements = state.store.get_movements().await?;
    Ok(Json(ApiResponse::success(movements)))
}

// ========================================
// Training Data Export
// ========================================

/// Download all collected raw training windows as CSV.
async fn export_raw_csv(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let rows = state.store.get_all_raw_data().await?;

    let mut out = String::from("id,training_id,device_id,movement_id,repetition,timestamp,raw\n");
    for row in rows {
        let samples = codec::decode_samples(&row.raw)
            .iter()
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        out.push_str(&format!(
            "{},{},{},{},{},{},\"{}\"\n",
            row.id,
            row.training_id,
            row.device_id,
            row.movement_id,
            row.repetition,
            row.ts.to_rfc3339(),
            samples
        ));
    }

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"training_raw.csv\"",
            ),
        ],
        out,
    ))
}
