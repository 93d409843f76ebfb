// src/routes/thresholds.rs
//! Threshold band configuration endpoints.
//!
//! Reads return persisted bands (or the shipped defaults); the replace
//! endpoint swaps a farm + type's whole band set in one transaction.
//! Unlike per-message ingestion failures, a malformed band list is a
//! synchronous user mistake, so it propagates as 422 instead of being
//! logged and swallowed.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
    Json, Router,
};
use tracing::error;

use crate::thresholds::{default_bands, BandSpec, ReplaceError};
use crate::AppState;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/thresholds/farm/{farm_id}", get(by_farm))
        .route(
            "/thresholds/farm/{farm_id}/sensor/{sensor_type}",
            put(replace).get(for_sensor_type),
        )
        .route("/thresholds/defaults/{sensor_type}", get(defaults))
}

async fn by_farm(Path(farm_id): Path<String>, State(state): State<AppState>) -> impl IntoResponse {
    // ---
    match state.thresholds.thresholds_by_farm(&farm_id).await {
        Ok(bands) => (StatusCode::OK, Json(bands)).into_response(),
        Err(e) => {
            error!("Failed to load thresholds for farm {farm_id}: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json("Failed to load thresholds"),
            )
                .into_response()
        }
    }
}

/// Bands for one farm + type, materializing per-farm defaults on first
/// access so the editor always has something to show.
async fn for_sensor_type(
    Path((farm_id, sensor_type)): Path<(String, String)>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    // ---
    match state
        .thresholds
        .ensure_bands_exist(&farm_id, &sensor_type)
        .await
    {
        Ok(bands) => (StatusCode::OK, Json(bands)).into_response(),
        Err(e) => {
            error!("Failed to load thresholds for farm {farm_id}/{sensor_type}: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json("Failed to load thresholds"),
            )
                .into_response()
        }
    }
}

async fn replace(
    Path((farm_id, sensor_type)): Path<(String, String)>,
    State(state): State<AppState>,
    Json(specs): Json<Vec<BandSpec>>,
) -> impl IntoResponse {
    // ---
    match state
        .thresholds
        .replace_bands(&farm_id, &sensor_type, &specs)
        .await
    {
        Ok(bands) => (StatusCode::OK, Json(bands)).into_response(),
        Err(ReplaceError::Invalid(e)) => {
            (StatusCode::UNPROCESSABLE_ENTITY, Json(e.to_string())).into_response()
        }
        Err(ReplaceError::Store(e)) => {
            error!("Failed to replace thresholds for farm {farm_id}/{sensor_type}: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json("Failed to replace thresholds"),
            )
                .into_response()
        }
    }
}

async fn defaults(Path(sensor_type): Path<String>) -> impl IntoResponse {
    // ---
    Json(default_bands(&sensor_type))
}
