//! DataIngestor: raw tabular rows to validated, ordered sensor readings.
//!
//! Rows that fail validation are excluded and reported back as
//! [`ValidationError`]s so the caller can count them. Accepted readings are
//! returned grouped by sensor and sorted by timestamp within each sensor.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::{debug, info};

use crate::errors::{Constraint, ForecastError, Result, ValidationError};
use crate::models::{RawSensorRow, SensorReading};

// ---

const REQUIRED_COLUMNS: [&str; 4] = ["sensor_id", "timestamp", "temperature", "humidity"];

/// Plausibility limits applied to every row.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub temperature_min: f64,
    pub temperature_max: f64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            temperature_min: -40.0,
            temperature_max: 85.0,
        }
    }
}

impl IngestConfig {
    pub fn validate(&self) -> Result<()> {
        // ---
        if !self.temperature_min.is_finite()
            || !self.temperature_max.is_finite()
            || self.temperature_min >= self.temperature_max
        {
            return Err(ForecastError::invalid_config(
                "temperature range",
                format!(
                    "minimum {} must be below maximum {}",
                    self.temperature_min, self.temperature_max
                ),
            ));
        }
        Ok(())
    }
}

/// Result of an ingestion pass.
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    /// Accepted readings, ordered by `(sensor_id, timestamp)`.
    pub readings: Vec<SensorReading>,
    pub rejected: Vec<ValidationError>,
    pub rows_read: usize,
}

impl IngestReport {
    pub fn rejected_count(&self) -> usize {
        self.rejected.len()
    }

    pub fn sensor_count(&self) -> usize {
        group_by_sensor(&self.readings).len()
    }
}

pub struct DataIngestor {
    config: IngestConfig,
}

impl DataIngestor {
    // ---
    pub fn new(config: IngestConfig) -> Self {
        Self { config }
    }

    /// Read CSV with a header row containing at least `sensor_id`,
    /// `timestamp`, `temperature` and `humidity`.
    pub fn ingest_csv<R: Read>(&self, source: R) -> Result<IngestReport> {
        // ---
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(source);

        let headers = reader.headers()?.clone();
        for column in REQUIRED_COLUMNS {
            if !headers.iter().any(|h| h == column) {
                return Err(ForecastError::MissingColumn(column.to_string()));
            }
        }

        let mut rows = Vec::new();
        for result in reader.deserialize::<RawSensorRow>() {
            rows.push(result.map_err(|e| e.to_string()));
        }

        Ok(self.validate_rows(rows))
    }

    /// Validate rows already held in memory. The input is not modified.
    pub fn ingest_rows(&self, rows: &[RawSensorRow]) -> IngestReport {
        // ---
        self.validate_rows(rows.iter().cloned().map(Ok).collect())
    }

    fn validate_rows(&self, rows: Vec<std::result::Result<RawSensorRow, String>>) -> IngestReport {
        // ---
        let rows_read = rows.len();
        let mut accepted: Vec<SensorReading> = Vec::with_capacity(rows_read);
        let mut rejected = Vec::new();
        let mut seen: BTreeSet<(String, DateTime<Utc>)> = BTreeSet::new();

        for (row, parsed) in rows.into_iter().enumerate() {
            let outcome = parsed
                .map_err(Constraint::MalformedRow)
                .and_then(|raw| self.validate(&raw));

            match outcome {
                Ok(reading) => {
                    let key = (reading.sensor_id.clone(), reading.timestamp);
                    if seen.contains(&key) {
                        let error = ValidationError {
                            row,
                            constraint: Constraint::DuplicateTimestamp {
                                sensor_id: key.0,
                                timestamp: key.1,
                            },
                        };
                        debug!("Rejected {}", error);
                        rejected.push(error);
                    } else {
                        seen.insert(key);
                        accepted.push(reading);
                    }
                }
                Err(constraint) => {
                    let error = ValidationError { row, constraint };
                    debug!("Rejected {}", error);
                    rejected.push(error);
                }
            }
        }

        // Stable: equal keys cannot occur after duplicate rejection
        accepted.sort_by(|a, b| {
            a.sensor_id
                .cmp(&b.sensor_id)
                .then(a.timestamp.cmp(&b.timestamp))
        });

        info!(
            "Ingested {} rows: {} accepted, {} rejected",
            rows_read,
            accepted.len(),
            rejected.len()
        );

        IngestReport {
            readings: accepted,
            rejected,
            rows_read,
        }
    }

    fn validate(&self, raw: &RawSensorRow) -> std::result::Result<SensorReading, Constraint> {
        // ---
        let sensor_id = raw
            .sensor_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(Constraint::MissingSensorId)?;

        let raw_ts = raw
            .timestamp
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(Constraint::MissingTimestamp)?;
        let timestamp =
            parse_timestamp(raw_ts).ok_or_else(|| Constraint::MalformedTimestamp(raw_ts.to_string()))?;

        let temperature = raw.temperature.ok_or(Constraint::MissingTemperature)?;
        if !temperature.is_finite() {
            return Err(Constraint::NonFiniteValue { field: "temperature" });
        }
        let humidity = raw.humidity.ok_or(Constraint::MissingHumidity)?;
        if !humidity.is_finite() {
            return Err(Constraint::NonFiniteValue { field: "humidity" });
        }

        if !(0.0..=100.0).contains(&humidity) {
            return Err(Constraint::HumidityOutOfRange { value: humidity });
        }
        if temperature < self.config.temperature_min || temperature > self.config.temperature_max {
            return Err(Constraint::TemperatureOutOfRange {
                value: temperature,
                min: self.config.temperature_min,
                max: self.config.temperature_max,
            });
        }

        Ok(SensorReading {
            sensor_id: sensor_id.to_string(),
            timestamp,
            temperature,
            humidity,
        })
    }
}

/// Parse RFC 3339 instants; naive date-times are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    // ---
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Split readings ordered by `(sensor_id, timestamp)` into per-sensor slices.
pub fn group_by_sensor(readings: &[SensorReading]) -> BTreeMap<&str, &[SensorReading]> {
    // ---
    let mut groups = BTreeMap::new();
    let mut start = 0;
    for end in 1..=readings.len() {
        if end == readings.len() || readings[end].sensor_id != readings[start].sensor_id {
            groups.insert(readings[start].sensor_id.as_str(), &readings[start..end]);
            start = end;
        }
    }
    groups
}
