use axum::Router;

use crate::AppState;

mod dashboard;
mod health;
mod sensors;
mod thresholds;

// ---

pub fn router(state: AppState) -> Router {
    // ---
    Router::new()
        .merge(dashboard::router())
        .merge(thresholds::router())
        .merge(sensors::router())
        .merge(health::router())
        .with_state(state)
}
