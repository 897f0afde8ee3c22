//! WebAPI - REST + WebSocket Endpoints
//!
//! ## Responsibilities
//!
//! - HTTP API routes (devices, movements, CSV export, reserve)
//! - Device and viewer WebSocket connection loops
//! - Request validation and response formatting

mod routes;
mod ws_device;
mod ws_viewer;

pub use routes::create_router;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::models::HealthResponse;
use crate::state::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let classifier_ok = state.classifier.health_check().await;
    let db_ok = sqlx::query("SELECT 1").execute(&state.pool).await.is_ok();

    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        classifier_connected: classifier_ok,
        db_connected: db_ok,
    };

    Json(response)
}
