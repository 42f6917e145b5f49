pub mod transactions;

use crate::health::check_health;
use crate::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};

pub async fn ping() -> &'static str {
    "PONG"
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let health = check_health(&state.health_checkers, state.start_time).await;

    // Return 503 if storage is down, 200 otherwise
    let status_code = if health.status == "unhealthy" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (status_code, Json(health))
}
