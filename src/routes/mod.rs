//! Read-only HTTP gateway over one completed forecasting run.
//!
//! Each sibling module exports a subrouter; this gateway merges them and
//! attaches the shared [`ServedRun`] state so `main.rs` only needs
//! [`router`].

use std::sync::Arc;

use axum::Router;

use crate::models::PredictionRecord;
use crate::pipeline::{PipelineContext, RunSummary};

mod health;
mod metrics;
mod predictions;

// ---

/// Artifacts of a finished run, shared by every handler.
#[derive(Debug, Clone)]
pub struct ServedRun {
    pub summary: RunSummary,
    pub predictions: Vec<PredictionRecord>,
}

impl ServedRun {
    pub fn from_context(ctx: &PipelineContext) -> Self {
        ServedRun {
            summary: ctx.summary(),
            predictions: ctx.predictions.clone(),
        }
    }
}

pub type SharedRun = Arc<ServedRun>;

pub fn router(run: ServedRun) -> Router {
    // ---
    Router::new()
        .merge(predictions::router())
        .merge(metrics::router())
        .merge(health::router())
        .with_state(Arc::new(run))
}
