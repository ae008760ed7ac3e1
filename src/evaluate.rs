//! Evaluator: accuracy metrics over predicted vs. actual temperatures.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::warn;

use crate::errors::{ForecastError, Result, UndefinedMetricWarning};
use crate::models::{MetricsSummary, PredictionRecord};

// ---

/// Metrics for one scope plus any metric that could not be computed.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub summary: MetricsSummary,
    pub warning: Option<UndefinedMetricWarning>,
}

/// Global and per-sensor metrics for a set of predictions.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub global: MetricsSummary,
    pub per_sensor: BTreeMap<String, MetricsSummary>,
    pub warnings: Vec<UndefinedMetricWarning>,
}

/// Compute MAE, RMSE, R² and the spread of absolute errors.
///
/// `scope` only labels the warning raised when R² is undefined.
pub fn evaluate(actual: &[f64], predicted: &[f64], scope: &str) -> Result<Evaluation> {
    // ---
    if actual.len() != predicted.len() {
        return Err(ForecastError::LengthMismatch {
            actual: actual.len(),
            predicted: predicted.len(),
        });
    }
    if actual.is_empty() {
        return Err(ForecastError::EmptyEvaluationSet);
    }

    let n = actual.len() as f64;
    let mean = actual.iter().sum::<f64>() / n;

    let (mut abs_sum, mut sq_sum, mut ss_tot) = (0.0_f64, 0.0_f64, 0.0_f64);
    let (mut min_abs, mut max_abs) = (f64::INFINITY, 0.0_f64);
    let (mut lowest, mut highest) = (f64::INFINITY, f64::NEG_INFINITY);
    for (a, p) in actual.iter().zip(predicted) {
        let err = (a - p).abs();
        abs_sum += err;
        sq_sum += err * err;
        min_abs = min_abs.min(err);
        max_abs = max_abs.max(err);
        ss_tot += (a - mean) * (a - mean);
        lowest = lowest.min(*a);
        highest = highest.max(*a);
    }
    let mae = abs_sum / n;
    let abs_error_std = (actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| ((a - p).abs() - mae).powi(2))
        .sum::<f64>()
        / n)
        .sqrt();

    // The summed mean of identical values can be off by n ulps
    let noise = n * f64::EPSILON * mean.abs().max(1.0);
    let (r2, warning) = if lowest == highest || ss_tot <= n * noise * noise {
        let warning = UndefinedMetricWarning {
            metric: "r2",
            scope: scope.to_string(),
            reason: "actual values have zero variance".to_string(),
        };
        warn!("{}", warning);
        (None, Some(warning))
    } else {
        (Some(1.0 - sq_sum / ss_tot), None)
    };

    Ok(Evaluation {
        summary: MetricsSummary {
            mae,
            rmse: (sq_sum / n).sqrt(),
            r2,
            min_abs_error: min_abs,
            max_abs_error: max_abs,
            abs_error_std,
            count: actual.len(),
        },
        warning,
    })
}

/// Evaluate all predictions together and each sensor on its own.
pub fn evaluate_predictions(records: &[PredictionRecord]) -> Result<MetricsReport> {
    // ---
    let mut by_sensor: BTreeMap<&str, (Vec<f64>, Vec<f64>)> = BTreeMap::new();
    for record in records {
        let (actual, predicted) = by_sensor.entry(record.sensor_id.as_str()).or_default();
        actual.push(record.actual);
        predicted.push(record.predicted);
    }

    let actual: Vec<f64> = records.iter().map(|r| r.actual).collect();
    let predicted: Vec<f64> = records.iter().map(|r| r.predicted).collect();
    let global = evaluate(&actual, &predicted, "all sensors")?;

    let mut warnings: Vec<UndefinedMetricWarning> = global.warning.into_iter().collect();
    let mut per_sensor = BTreeMap::new();
    for (sensor_id, (actual, predicted)) in by_sensor {
        let eval = evaluate(&actual, &predicted, &format!("sensor {}", sensor_id))?;
        warnings.extend(eval.warning);
        per_sensor.insert(sensor_id.to_string(), eval.summary);
    }

    Ok(MetricsReport {
        global: global.summary,
        per_sensor,
        warnings,
    })
}
