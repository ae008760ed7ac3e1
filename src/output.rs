//! Run artifacts: `predictions.csv`, `forecast.csv` and `metrics.json`.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::errors::Result;
use crate::models::{ForecastRecord, PredictionRecord};
use crate::pipeline::{PipelineContext, RunSummary};

// ---

pub const PREDICTIONS_FILE: &str = "predictions.csv";
pub const FORECAST_FILE: &str = "forecast.csv";
pub const METRICS_FILE: &str = "metrics.json";

/// Paths of the files written by [`write_artifacts`].
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    pub predictions: PathBuf,
    pub forecast: PathBuf,
    pub metrics: PathBuf,
}

/// Write all artifacts for `ctx` into `dir`, creating it if needed.
pub fn write_artifacts(dir: &Path, ctx: &PipelineContext) -> Result<ArtifactPaths> {
    // ---
    fs::create_dir_all(dir)?;
    let paths = ArtifactPaths {
        predictions: dir.join(PREDICTIONS_FILE),
        forecast: dir.join(FORECAST_FILE),
        metrics: dir.join(METRICS_FILE),
    };

    write_predictions(File::create(&paths.predictions)?, &ctx.predictions)?;
    write_forecasts(File::create(&paths.forecast)?, &ctx.forecasts)?;
    write_summary(File::create(&paths.metrics)?, &ctx.summary())?;

    info!(
        "Wrote {} predictions and {} forecasts to {}",
        ctx.predictions.len(),
        ctx.forecasts.len(),
        dir.display()
    );
    Ok(paths)
}

/// `timestamp,sensor_id,actual,predicted`
pub fn write_predictions<W: Write>(sink: W, records: &[PredictionRecord]) -> Result<()> {
    write_csv(sink, records)
}

/// `timestamp,sensor_id,predicted`
pub fn write_forecasts<W: Write>(sink: W, records: &[ForecastRecord]) -> Result<()> {
    write_csv(sink, records)
}

pub fn write_summary<W: Write>(sink: W, summary: &RunSummary) -> Result<()> {
    // ---
    let mut writer = BufWriter::new(sink);
    serde_json::to_writer_pretty(&mut writer, summary)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

fn write_csv<W: Write, T: Serialize>(sink: W, records: &[T]) -> Result<()> {
    // ---
    let mut writer = csv::Writer::from_writer(sink);
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_prediction_csv_layout() {
        // ---
        let records = vec![PredictionRecord {
            timestamp: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
            sensor_id: "S1".to_string(),
            actual: 21.5,
            predicted: 21.25,
        }];
        let mut buffer = Vec::new();
        write_predictions(&mut buffer, &records).unwrap();

        let text = String::from_utf8(buffer).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("timestamp,sensor_id,actual,predicted"));
        assert_eq!(lines.next(), Some("2025-03-01T12:00:00Z,S1,21.5,21.25"));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn test_forecast_csv_reads_back() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(FORECAST_FILE);
        let records = vec![
            ForecastRecord {
                timestamp: Utc.with_ymd_and_hms(2025, 3, 2, 0, 0, 0).unwrap(),
                sensor_id: "S1".to_string(),
                predicted: 19.0,
            },
            ForecastRecord {
                timestamp: Utc.with_ymd_and_hms(2025, 3, 2, 1, 0, 0).unwrap(),
                sensor_id: "S2".to_string(),
                predicted: 23.5,
            },
        ];
        write_forecasts(File::create(&path).unwrap(), &records).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let read: Vec<ForecastRecord> = reader.deserialize().collect::<std::result::Result<_, _>>().unwrap();
        assert_eq!(read, records);
    }
}
