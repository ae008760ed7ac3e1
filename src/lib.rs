//! Temperature forecasting for IoT sensor readings.
//!
//! Raw readings are validated ([`ingest`]), turned into causal features
//! ([`features`]), split chronologically ([`split`]), fitted with a bagged
//! regression-tree ensemble ([`predictor`]) and scored ([`evaluate`]).
//! [`pipeline`] runs the stages in order; [`output`] writes the artifacts and
//! [`routes`] serves them read-only over HTTP.

pub mod config;
pub mod errors;
pub mod evaluate;
pub mod features;
pub mod forest;
pub mod ingest;
pub mod models;
pub mod output;
pub mod pipeline;
pub mod predictor;
pub mod routes;
pub mod split;

pub use config::Config;
pub use errors::{ForecastError, Result};
pub use pipeline::{ForecastPipeline, PipelineConfig, PipelineContext, RunSummary};
pub use predictor::TemperaturePredictor;
