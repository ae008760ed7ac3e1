//! Error types for the forecasting pipeline.
//!
//! Row-level problems (`ValidationError`, `InsufficientHistory`) are counted
//! and excluded by the stage that finds them. Structural problems propagate as
//! [`ForecastError`] and abort the run.

use chrono::{DateTime, Utc};
use thiserror::Error;

// ---

/// The specific constraint a raw input row violated.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    // ---
    MissingSensorId,
    MissingTimestamp,
    MalformedTimestamp(String),
    MissingTemperature,
    MissingHumidity,
    NonFiniteValue { field: &'static str },
    HumidityOutOfRange { value: f64 },
    TemperatureOutOfRange { value: f64, min: f64, max: f64 },
    DuplicateTimestamp { sensor_id: String, timestamp: DateTime<Utc> },
    MalformedRow(String),
}

impl std::fmt::Display for Constraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Constraint::MissingSensorId => write!(f, "sensor_id is missing"),
            Constraint::MissingTimestamp => write!(f, "timestamp is missing"),
            Constraint::MalformedTimestamp(raw) => write!(f, "timestamp '{}' is not a valid instant", raw),
            Constraint::MissingTemperature => write!(f, "temperature is missing"),
            Constraint::MissingHumidity => write!(f, "humidity is missing"),
            Constraint::NonFiniteValue { field } => write!(f, "{} is not a finite number", field),
            Constraint::HumidityOutOfRange { value } => {
                write!(f, "humidity {} is outside [0, 100]", value)
            }
            Constraint::TemperatureOutOfRange { value, min, max } => {
                write!(f, "temperature {} is outside [{}, {}]", value, min, max)
            }
            Constraint::DuplicateTimestamp { sensor_id, timestamp } => write!(
                f,
                "sensor {} already has a reading at {}",
                sensor_id,
                timestamp.to_rfc3339()
            ),
            Constraint::MalformedRow(reason) => write!(f, "malformed row: {}", reason),
        }
    }
}

/// A rejected input row. Row indices are zero-based and exclude the header.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("row {row}: {constraint}")]
pub struct ValidationError {
    pub row: usize,
    pub constraint: Constraint,
}

/// A lag or rolling feature with no causal source reading.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("sensor {sensor_id} at {timestamp}: no history for feature '{feature}'")]
pub struct InsufficientHistory {
    pub sensor_id: String,
    pub timestamp: DateTime<Utc>,
    pub feature: String,
}

/// R² cannot be computed when the actual values have zero variance.
///
/// Non-fatal: MAE and RMSE are still reported alongside it.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct UndefinedMetricWarning {
    pub metric: &'static str,
    pub scope: String,
    pub reason: String,
}

impl std::fmt::Display for UndefinedMetricWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} undefined for {}: {}", self.metric, self.scope, self.reason)
    }
}

/// Errors that abort a pipeline stage.
#[derive(Debug, Error)]
pub enum ForecastError {
    // ---
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Insufficient history: {0}")]
    InsufficientHistory(#[from] InsufficientHistory),

    #[error("Input is missing required column '{0}'")]
    MissingColumn(String),

    #[error("Insufficient data: training partition has {train} records, evaluation partition has {eval}")]
    InsufficientData { train: usize, eval: usize },

    #[error("Model has not been trained")]
    ModelNotTrained,

    #[error("Feature schema mismatch: expected [{}], got [{}]", .expected.join(", "), .found.join(", "))]
    SchemaMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("Evaluation set is empty")]
    EmptyEvaluationSet,

    #[error("Length mismatch: {actual} actual values, {predicted} predicted values")]
    LengthMismatch { actual: usize, predicted: usize },

    #[error("Invalid configuration '{name}': {reason}")]
    InvalidConfig { name: String, reason: String },

    #[error("Worker pool error: {0}")]
    WorkerPool(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ForecastError>;

impl ForecastError {
    // ---
    pub(crate) fn invalid_config(name: &str, reason: impl Into<String>) -> Self {
        ForecastError::InvalidConfig {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}
