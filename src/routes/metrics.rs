//! `GET /metrics`: the run summary written as `metrics.json`.

use axum::{extract::State, routing::get, Json, Router};
use tracing::debug;

use super::SharedRun;
use crate::pipeline::RunSummary;

// ---

pub fn router() -> Router<SharedRun> {
    // ---
    Router::new().route("/metrics", get(handler))
}

async fn handler(State(run): State<SharedRun>) -> Json<RunSummary> {
    // ---
    debug!("GET /metrics");
    Json(run.summary.clone())
}
