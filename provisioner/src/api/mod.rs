use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/admin/flights", get(list_flights))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /healthz
pub async fn healthz() -> &'static str {
    "ok"
}

/// GET /admin/flights: nodes with a step currently running
pub async fn list_flights(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.flights.snapshot();
    Json(serde_json::json!({
        "in_flight": snapshot.in_flight,
        "limit": snapshot.limit,
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}
