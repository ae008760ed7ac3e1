//! Stage orchestration for one forecasting run.
//!
//! Ingest → split plan → training-period sensor statistics → features →
//! chronological split → train → predict → evaluate → next-reading forecast.
//! Every intermediate result is owned by the [`PipelineContext`] returned at
//! the end; stages never share mutable state.

use std::collections::BTreeMap;
use std::io::Read;

use chrono::TimeDelta;
use serde::Serialize;
use tracing::{debug, info, info_span};
use uuid::Uuid;

use crate::errors::{ForecastError, Result, ValidationError};
use crate::evaluate::{evaluate_predictions, MetricsReport};
use crate::features::{FeatureConfig, FeatureEngineer, FeatureReport, MAX_SPAN};
use crate::forest::{worker_pool, ForestConfig};
use crate::ingest::{group_by_sensor, DataIngestor, IngestConfig, IngestReport};
use crate::models::{
    duration_label, ForecastRecord, MetricsSummary, PredictionRecord, RawSensorRow, SensorReading,
    SensorStats,
};
use crate::predictor::{FeatureImportance, TemperaturePredictor};
use crate::split::{DatasetSplitter, SplitConfig, SplitSummary};

// ---

const LOGGED_IMPORTANCES: usize = 10;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub ingest: IngestConfig,
    pub features: FeatureConfig,
    pub split: SplitConfig,
    pub forest: ForestConfig,
    /// Step past each sensor's last reading for the forecast.
    pub forecast_horizon: TimeDelta,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ingest: IngestConfig::default(),
            features: FeatureConfig::default(),
            split: SplitConfig::default(),
            forest: ForestConfig::default(),
            forecast_horizon: TimeDelta::hours(1),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        // ---
        self.ingest.validate()?;
        self.features.validate()?;
        self.split.validate()?;
        self.forest.validate()?;
        if self.forecast_horizon <= TimeDelta::zero() || self.forecast_horizon > MAX_SPAN {
            return Err(ForecastError::invalid_config(
                "forecast horizon",
                format!("must be positive and at most {}", duration_label(MAX_SPAN)),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestSummary {
    pub rows_read: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub sensors: usize,
}

impl IngestSummary {
    fn from_report(report: &IngestReport) -> Self {
        IngestSummary {
            rows_read: report.rows_read,
            accepted: report.readings.len(),
            rejected: report.rejected_count(),
            sensors: report.sensor_count(),
        }
    }
}

/// Everything one run produced.
pub struct PipelineContext {
    pub run_id: Uuid,
    pub config: PipelineConfig,
    pub ingest: IngestSummary,
    pub rejections: Vec<ValidationError>,
    pub sensor_stats: BTreeMap<String, SensorStats>,
    pub features: FeatureReport,
    pub split: SplitSummary,
    pub predictor: TemperaturePredictor,
    pub predictions: Vec<PredictionRecord>,
    pub forecasts: Vec<ForecastRecord>,
    pub training_metrics: MetricsReport,
    pub metrics: MetricsReport,
    pub importances: Vec<FeatureImportance>,
}

/// The serializable part of a run, written as `metrics.json`.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub ingest: IngestSummary,
    pub features: FeatureReport,
    pub split: SplitSummary,
    pub training: MetricsSummary,
    pub evaluation: MetricsReport,
    pub feature_importances: Vec<FeatureImportance>,
}

impl PipelineContext {
    pub fn summary(&self) -> RunSummary {
        // ---
        RunSummary {
            run_id: self.run_id,
            ingest: self.ingest.clone(),
            features: self.features.clone(),
            split: self.split.clone(),
            training: self.training_metrics.global.clone(),
            evaluation: self.metrics.clone(),
            feature_importances: self.importances.clone(),
        }
    }
}

pub struct ForecastPipeline {
    config: PipelineConfig,
    pool: rayon::ThreadPool,
}

impl ForecastPipeline {
    // ---
    /// Validate `config` and build the worker pool.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        // ---
        config.validate()?;
        let pool = worker_pool(config.forest.workers)?;
        Ok(Self { config, pool })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every stage over a CSV source.
    pub fn run<R: Read>(&self, source: R) -> Result<PipelineContext> {
        // ---
        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline", %run_id);
        let _enter = span.enter();

        let report = info_span!("ingest").in_scope(|| {
            DataIngestor::new(self.config.ingest.clone()).ingest_csv(source)
        })?;
        self.run_stages(run_id, report)
    }

    /// Run every stage over rows that are already in memory.
    pub fn run_rows(&self, rows: &[RawSensorRow]) -> Result<PipelineContext> {
        // ---
        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline", %run_id);
        let _enter = span.enter();

        let report = info_span!("ingest")
            .in_scope(|| DataIngestor::new(self.config.ingest.clone()).ingest_rows(rows));
        self.run_stages(run_id, report)
    }

    fn run_stages(&self, run_id: Uuid, report: IngestReport) -> Result<PipelineContext> {
        // ---
        let ingest = IngestSummary::from_report(&report);
        let IngestReport {
            readings, rejected, ..
        } = report;

        let splitter = DatasetSplitter::new(self.config.split.clone());
        let engineer = FeatureEngineer::new(self.config.features.clone());

        let plan = splitter.plan(&readings)?;
        let sensor_stats = engineer.sensor_statistics(&readings, &plan);
        debug!("Training statistics for {} sensors", sensor_stats.len());

        let table = info_span!("features")
            .in_scope(|| self.pool.install(|| engineer.engineer(&readings, &sensor_stats)));
        let features = table.report;

        let split = info_span!("split").in_scope(|| splitter.split(table.records, &plan))?;

        let mut predictor = TemperaturePredictor::new(self.config.forest.clone());
        info_span!("train").in_scope(|| self.pool.install(|| predictor.train(&split.train)))?;

        let (predictions, training_metrics, metrics) = info_span!("evaluate").in_scope(|| {
            let train_predictions = predictor.predict_records(&split.train)?;
            let training_metrics = evaluate_predictions(&train_predictions)?;
            let predictions = predictor.predict_records(&split.eval)?;
            let metrics = evaluate_predictions(&predictions)?;
            Ok::<_, ForecastError>((predictions, training_metrics, metrics))
        })?;
        log_metrics("Training", &training_metrics.global);
        log_metrics("Evaluation", &metrics.global);
        for (sensor_id, summary) in &metrics.per_sensor {
            info!(
                "Sensor {}: MAE {:.3}, RMSE {:.3} over {} records",
                sensor_id, summary.mae, summary.rmse, summary.count
            );
        }

        let forecasts = info_span!("forecast").in_scope(|| {
            self.forecast_next(&engineer, &predictor, &readings, &sensor_stats)
        })?;

        let importances = predictor.feature_importances()?;
        for (rank, item) in importances.iter().take(LOGGED_IMPORTANCES).enumerate() {
            info!("Feature #{}: {} ({:.4})", rank + 1, item.feature, item.importance);
        }

        Ok(PipelineContext {
            run_id,
            config: self.config.clone(),
            ingest,
            rejections: rejected,
            sensor_stats,
            features,
            split: split.summary(),
            predictor,
            predictions,
            forecasts,
            training_metrics,
            metrics,
            importances,
        })
    }

    /// Predict one step past each sensor's last reading.
    ///
    /// Sensors whose features cannot be completed under the missing-feature
    /// policy get no forecast.
    fn forecast_next(
        &self,
        engineer: &FeatureEngineer,
        predictor: &TemperaturePredictor,
        readings: &[SensorReading],
        stats: &BTreeMap<String, SensorStats>,
    ) -> Result<Vec<ForecastRecord>> {
        // ---
        let horizon = self.config.forecast_horizon;
        let mut forecasts = Vec::new();

        for (sensor_id, history) in group_by_sensor(readings) {
            let Some(last) = history.last() else {
                continue;
            };
            let Some(at) = last.timestamp.checked_add_signed(horizon) else {
                debug!("No forecast for {}: horizon passes the last representable instant", sensor_id);
                continue;
            };
            match engineer.featurize_at(sensor_id, history, at, stats.get(sensor_id)) {
                Ok(features) => forecasts.push(ForecastRecord {
                    timestamp: at,
                    sensor_id: sensor_id.to_string(),
                    predicted: predictor.predict_one(&features)?,
                }),
                Err(gap) => debug!("No {} forecast for {}: {}", duration_label(horizon), sensor_id, gap),
            }
        }

        info!("Forecast {} sensors {} ahead", forecasts.len(), duration_label(horizon));
        Ok(forecasts)
    }
}

fn log_metrics(label: &str, summary: &MetricsSummary) {
    // ---
    let r2 = summary
        .r2
        .map_or_else(|| "undefined".to_string(), |r2| format!("{:.4}", r2));
    info!(
        "{} metrics: MAE {:.3}, RMSE {:.3}, R² {}, abs error min {:.3} max {:.3} std {:.3} ({} records)",
        label,
        summary.mae,
        summary.rmse,
        r2,
        summary.min_abs_error,
        summary.max_abs_error,
        summary.abs_error_std,
        summary.count
    );
}
