// src/routes/dashboard.rs
//! Farm dashboard endpoints.
//!
//! Thin HTTP shims over [`crate::dashboard::DashboardService`]: the summary
//! endpoint powers the per-farm gauge view (averages + severity + gauge
//! ranges), the sensor-data endpoint the trailing time-series charts.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tracing::error;

use crate::AppState;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/dashboard/farm/{farm_id}/summary", get(summary))
        .route("/dashboard/farm/{farm_id}/sensor-data", get(sensor_data))
}

async fn summary(
    Path(farm_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    // ---
    match state.dashboard.farm_summary(&farm_id).await {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(e) => {
            error!("Failed to build summary for farm {farm_id}: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json("Failed to build dashboard summary"),
            )
                .into_response()
        }
    }
}

#[derive(Deserialize)]
struct SensorDataQuery {
    // ---
    /// Trailing window size; defaults to the last 24 hours.
    hours: Option<u32>,
    #[serde(rename = "type")]
    sensor_type: Option<String>,
}

async fn sensor_data(
    Path(farm_id): Path<String>,
    Query(params): Query<SensorDataQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    // ---
    let hours = params.hours.unwrap_or(24);
    match state
        .dashboard
        .farm_sensor_data(&farm_id, hours, params.sensor_type.as_deref())
        .await
    {
        Ok(series) => (StatusCode::OK, Json(series)).into_response(),
        Err(e) => {
            error!("Failed to load sensor data for farm {farm_id}: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json("Failed to load sensor data"),
            )
                .into_response()
        }
    }
}
