use std::f64::consts::PI;
use std::fs::File;

use anyhow::Result;
use chrono::{TimeDelta, TimeZone, Utc};
use sensorflow_forecast::features::{FeatureConfig, FeatureEngineer, MissingFeaturePolicy};
use sensorflow_forecast::forest::ForestConfig;
use sensorflow_forecast::ingest::{DataIngestor, IngestConfig};
use sensorflow_forecast::models::{RawSensorRow, SensorReading};
use sensorflow_forecast::output::{self, METRICS_FILE, PREDICTIONS_FILE};
use sensorflow_forecast::split::{DatasetSplitter, SplitConfig, SplitMode};
use sensorflow_forecast::{ForecastPipeline, PipelineConfig};

// ---

const HOURS: u32 = 240;

/// Daily sinusoid per sensor with a small deterministic wobble.
fn synthetic_rows(sensors: &[(&str, f64)]) -> Vec<RawSensorRow> {
    // ---
    let start = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
    let mut rows = Vec::new();
    for h in 0..HOURS {
        for (i, (sensor, base)) in sensors.iter().enumerate() {
            let phase = 2.0 * PI * (h % 24) as f64 / 24.0;
            let wobble = ((h as usize * 7919 + i * 31) % 13) as f64 / 13.0 * 0.2;
            let ts = start + TimeDelta::hours(h as i64);
            rows.push(RawSensorRow {
                sensor_id: Some(sensor.to_string()),
                timestamp: Some(ts.to_rfc3339()),
                temperature: Some(base + 5.0 * phase.sin() + wobble),
                humidity: Some(50.0 + 10.0 * phase.cos()),
            });
        }
    }
    rows
}

fn default_sensors() -> Vec<RawSensorRow> {
    synthetic_rows(&[("sensor-a", 20.0), ("sensor-b", 15.0), ("sensor-c", 25.0)])
}

fn test_config(workers: usize) -> PipelineConfig {
    // ---
    PipelineConfig {
        features: FeatureConfig {
            lag_offsets: vec![TimeDelta::hours(1), TimeDelta::hours(6)],
            rolling_windows: vec![TimeDelta::hours(3), TimeDelta::hours(6)],
            lag_tolerance: TimeDelta::minutes(5),
            missing_policy: MissingFeaturePolicy::Drop,
        },
        forest: ForestConfig {
            tree_count: 20,
            max_depth: 10,
            workers,
            ..ForestConfig::default()
        },
        ..PipelineConfig::default()
    }
}

fn readings(rows: &[RawSensorRow]) -> Vec<SensorReading> {
    DataIngestor::new(IngestConfig::default()).ingest_rows(rows).readings
}

fn to_csv(rows: &[RawSensorRow]) -> String {
    // ---
    let mut csv = String::from("sensor_id,timestamp,temperature,humidity\n");
    for r in rows {
        csv.push_str(&format!(
            "{},{},{},{}\n",
            r.sensor_id.as_deref().unwrap_or(""),
            r.timestamp.as_deref().unwrap_or(""),
            r.temperature.unwrap_or_default(),
            r.humidity.unwrap_or_default()
        ));
    }
    csv
}

#[test]
fn features_only_use_strictly_earlier_readings() {
    // ---
    let readings = readings(&default_sensors());
    let config = test_config(2);
    let plan = DatasetSplitter::new(SplitConfig::default()).plan(&readings).unwrap();
    let engineer = FeatureEngineer::new(config.features);
    let stats = engineer.sensor_statistics(&readings, &plan);
    let table = engineer.engineer(&readings, &stats);

    assert!(!table.records.is_empty());
    for record in &table.records {
        for lag in &record.features.lags {
            let source = lag.source_timestamp.expect("drop policy never imputes");
            assert!(source < record.timestamp);
            assert!(source <= record.timestamp - lag.offset);
        }
        for roll in &record.features.rolling {
            let (first, last) = roll.source_span.expect("drop policy never imputes");
            assert!(first >= record.timestamp - roll.window);
            assert!(last < record.timestamp);
        }
    }
}

#[test]
fn evaluation_period_values_never_reach_training_features() {
    // ---
    let original = readings(&default_sensors());
    let plan = DatasetSplitter::new(SplitConfig::default()).plan(&original).unwrap();

    // Corrupt every reading in the evaluation period
    let corrupted: Vec<SensorReading> = original
        .iter()
        .map(|r| {
            let mut r = r.clone();
            if !plan.is_training(&r.sensor_id, r.timestamp) {
                r.temperature += 40.0;
                r.humidity = 0.0;
            }
            r
        })
        .collect();

    let engineer = FeatureEngineer::new(test_config(2).features);
    let stats_a = engineer.sensor_statistics(&original, &plan);
    let stats_b = engineer.sensor_statistics(&corrupted, &plan);
    assert_eq!(stats_a, stats_b);

    let train_a: Vec<_> = engineer
        .engineer(&original, &stats_a)
        .records
        .into_iter()
        .filter(|r| plan.is_training(&r.sensor_id, r.timestamp))
        .collect();
    let train_b: Vec<_> = engineer
        .engineer(&corrupted, &stats_b)
        .records
        .into_iter()
        .filter(|r| plan.is_training(&r.sensor_id, r.timestamp))
        .collect();
    assert_eq!(train_a, train_b);
}

#[test]
fn training_period_precedes_evaluation_period() -> Result<()> {
    // ---
    let ctx = ForecastPipeline::new(test_config(2))?.run_rows(&default_sensors())?;

    let train_end = ctx.split.train_end.expect("training records");
    let eval_start = ctx.split.eval_start.expect("evaluation records");
    let cutoff = ctx.split.cutoff.expect("global split");
    assert!(train_end < cutoff);
    assert!(eval_start >= cutoff);
    assert!(ctx.predictions.iter().all(|p| p.timestamp >= cutoff));
    Ok(())
}

#[test]
fn per_sensor_split_keeps_each_sensor_chronological() -> Result<()> {
    // ---
    let mut config = test_config(2);
    config.split = SplitConfig {
        test_fraction: 0.25,
        mode: SplitMode::PerSensor,
    };
    let ctx = ForecastPipeline::new(config)?.run_rows(&default_sensors())?;

    assert!(ctx.split.cutoff.is_none());
    assert_eq!(ctx.metrics.per_sensor.len(), 3);
    Ok(())
}

#[test]
fn same_seed_gives_identical_results_for_any_worker_count() -> Result<()> {
    // ---
    let rows = default_sensors();
    let a = ForecastPipeline::new(test_config(1))?.run_rows(&rows)?;
    let b = ForecastPipeline::new(test_config(4))?.run_rows(&rows)?;

    assert_eq!(a.predictions, b.predictions);
    assert_eq!(a.forecasts, b.forecasts);
    assert_eq!(a.metrics.global, b.metrics.global);
    assert_ne!(a.run_id, b.run_id);
    Ok(())
}

#[test]
fn metrics_are_bounded_and_model_beats_naive_spread() -> Result<()> {
    // ---
    let ctx = ForecastPipeline::new(test_config(2))?.run_rows(&default_sensors())?;
    let global = &ctx.metrics.global;

    assert!(global.mae >= 0.0);
    assert!(global.rmse >= global.mae);
    assert!(global.max_abs_error >= global.rmse);
    assert!(global.min_abs_error <= global.mae);
    assert!(global.abs_error_std <= global.rmse);
    assert!(global.r2.expect("varying actuals") <= 1.0);
    assert_eq!(global.count, ctx.predictions.len());
    // Daily swing is 10 degrees; lag features should do far better than that
    assert!(global.mae < 2.0, "MAE {} too high", global.mae);
    assert!(ctx.training_metrics.global.mae <= global.mae + 1.0);
    Ok(())
}

#[test]
fn forecasts_one_step_past_each_sensor() -> Result<()> {
    // ---
    let config = test_config(2);
    let horizon = config.forecast_horizon;
    let rows = default_sensors();
    let last = readings(&rows).iter().map(|r| r.timestamp).max().unwrap();
    let ctx = ForecastPipeline::new(config)?.run_rows(&rows)?;

    assert_eq!(ctx.forecasts.len(), 3);
    for forecast in &ctx.forecasts {
        assert_eq!(forecast.timestamp, last + horizon);
        assert!((5.0..=35.0).contains(&forecast.predicted));
    }
    Ok(())
}

#[test]
fn constant_sensor_reports_undefined_r2() -> Result<()> {
    // ---
    let mut rows = default_sensors();
    let start = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
    rows.extend((0..HOURS).map(|h| RawSensorRow {
        sensor_id: Some("sensor-flat".to_string()),
        timestamp: Some((start + TimeDelta::hours(h as i64)).to_rfc3339()),
        temperature: Some(21.7),
        humidity: Some(40.0),
    }));
    let ctx = ForecastPipeline::new(test_config(2))?.run_rows(&rows)?;

    let flat = &ctx.metrics.per_sensor["sensor-flat"];
    assert!(flat.count >= 40);
    assert_eq!(flat.r2, None);
    assert!(ctx
        .metrics
        .warnings
        .iter()
        .any(|w| w.scope == "sensor sensor-flat"));
    assert!(ctx.metrics.global.r2.is_some());
    Ok(())
}

#[test]
fn csv_input_to_artifacts() -> Result<()> {
    // ---
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("readings.csv");
    std::fs::write(&input, to_csv(&default_sensors()))?;

    let ctx = ForecastPipeline::new(test_config(2))?.run(File::open(&input)?)?;
    let out = dir.path().join("out");
    output::write_artifacts(&out, &ctx)?;

    let metrics: serde_json::Value = serde_json::from_reader(File::open(out.join(METRICS_FILE))?)?;
    assert_eq!(metrics["run_id"], ctx.run_id.to_string());
    assert_eq!(metrics["ingest"]["accepted"], 3 * HOURS as u64);
    assert!(metrics["evaluation"]["global"]["mae"].is_number());
    assert!(metrics["feature_importances"].as_array().map_or(false, |a| !a.is_empty()));

    let mut reader = csv::Reader::from_path(out.join(PREDICTIONS_FILE))?;
    assert_eq!(
        reader.headers()?.iter().collect::<Vec<_>>(),
        vec!["timestamp", "sensor_id", "actual", "predicted"]
    );
    assert_eq!(reader.records().count(), ctx.predictions.len());
    Ok(())
}

#[test]
fn missing_column_aborts_the_run() -> Result<()> {
    // ---
    let csv = "sensor_id,timestamp,temperature\nS1,2025-03-01T00:00:00Z,20.0\n";
    let result = ForecastPipeline::new(test_config(2))?.run(csv.as_bytes());
    assert!(matches!(
        result,
        Err(sensorflow_forecast::ForecastError::MissingColumn(ref c)) if c == "humidity"
    ));
    Ok(())
}
