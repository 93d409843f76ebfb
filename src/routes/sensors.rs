// src/routes/sensors.rs
//! Sensor subscription lifecycle endpoints.
//!
//! Sensor CRUD itself lives in a separate service; these endpoints are the
//! sync surface that service calls after it creates, updates, or deletes a
//! sensor row, so the ingestion layer can (re)register or retire the
//! sensor's MQTT topics. The delete notification carries the serial number
//! and type explicitly because the row may already be gone.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use crate::ingest::IngestError;
use crate::AppState;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new().route(
        "/sensors/{id}/subscription",
        post(created).put(updated).delete(deleted),
    )
}

async fn created(Path(id): Path<Uuid>, State(state): State<AppState>) -> impl IntoResponse {
    // ---
    match state.ingest.on_sensor_created(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => subscription_error(id, e),
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct UpdatedBody {
    // ---
    old_serial_number: Option<String>,
}

async fn updated(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(body): Json<UpdatedBody>,
) -> impl IntoResponse {
    // ---
    match state
        .ingest
        .on_sensor_updated(id, body.old_serial_number.as_deref())
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => subscription_error(id, e),
    }
}

#[derive(Deserialize)]
struct DeletedQuery {
    // ---
    #[serde(rename = "serialNumber")]
    serial_number: String,
    #[serde(rename = "type")]
    sensor_type: String,
}

async fn deleted(
    Path(id): Path<Uuid>,
    Query(params): Query<DeletedQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    // ---
    match state
        .ingest
        .on_sensor_deleted(id, &params.serial_number, &params.sensor_type)
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => subscription_error(id, e),
    }
}

fn subscription_error(id: Uuid, e: IngestError) -> axum::response::Response {
    // ---
    match e {
        IngestError::SensorNotFound { .. } => {
            (StatusCode::NOT_FOUND, Json("Sensor not found")).into_response()
        }
        e => {
            error!("Subscription sync failed for sensor {id}: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json("Subscription sync failed"),
            )
                .into_response()
        }
    }
}
