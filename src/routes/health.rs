// src/routes/health.rs
//! Liveness endpoint for the forecast gateway.
//!
//! Exports a state-generic subrouter with `GET /health` for the gateway
//! (`mod.rs`) to merge. The handler never touches the served run.

use axum::{routing::get, Json, Router};
use serde::Serialize;

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Handle `GET /health`.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Create a subrouter containing the `/health` route, generic over the
/// gateway state `S`.
pub fn router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/health", get(health))
}
