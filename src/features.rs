//! FeatureEngineer: per-sensor temporal, cyclical, lag and rolling features.
//!
//! Every lag and rolling value for a record at time `t` is taken from readings
//! of the same sensor with a timestamp strictly before `t`. Sensor-level
//! statistics come from a separate pass over training-period readings only,
//! and are then broadcast to every record of that sensor.
//!
//! Lag lookup uses a nearest-prior policy: the source for offset `Δ` is the
//! latest reading in `[t - Δ - tolerance, t - Δ]`. With a zero tolerance this
//! is an exact match on the sampling grid.

use std::borrow::Cow;
use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::errors::{ForecastError, InsufficientHistory, Result};
use crate::ingest::group_by_sensor;
use crate::models::{
    duration_label, CyclicalFeatures, FeatureRecord, FeatureSet, LagFeature, RollingFeature,
    SensorReading, SensorStats, TemporalFeatures,
};
use crate::split::SplitPlan;

// ---

/// What to do with a record whose lag or rolling feature has no source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingFeaturePolicy {
    /// Exclude the record.
    Drop,
    /// Fill from the sensor's training-period means and flag the record.
    Impute,
}

impl std::str::FromStr for MissingFeaturePolicy {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drop" => Ok(MissingFeaturePolicy::Drop),
            "impute" => Ok(MissingFeaturePolicy::Impute),
            other => Err(ForecastError::invalid_config(
                "missing feature policy",
                format!("expected 'drop' or 'impute', got '{}'", other),
            )),
        }
    }
}

/// Longest accepted lag offset, rolling window or tolerance.
pub const MAX_SPAN: TimeDelta = TimeDelta::days(36_500);

#[derive(Debug, Clone)]
pub struct FeatureConfig {
    pub lag_offsets: Vec<TimeDelta>,
    pub rolling_windows: Vec<TimeDelta>,
    pub lag_tolerance: TimeDelta,
    pub missing_policy: MissingFeaturePolicy,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            lag_offsets: [1, 6, 12, 24].into_iter().map(TimeDelta::hours).collect(),
            rolling_windows: [3, 6, 12, 24].into_iter().map(TimeDelta::hours).collect(),
            lag_tolerance: TimeDelta::minutes(5),
            missing_policy: MissingFeaturePolicy::Drop,
        }
    }
}

impl FeatureConfig {
    pub fn validate(&self) -> Result<()> {
        // ---
        let out_of_range = |d: &&TimeDelta| **d <= TimeDelta::zero() || **d > MAX_SPAN;
        if let Some(bad) = self.lag_offsets.iter().find(out_of_range) {
            return Err(ForecastError::invalid_config(
                "lag offsets",
                format!("offset {} must be positive and at most {}", duration_label(*bad), duration_label(MAX_SPAN)),
            ));
        }
        if let Some(bad) = self.rolling_windows.iter().find(out_of_range) {
            return Err(ForecastError::invalid_config(
                "rolling windows",
                format!("window {} must be positive and at most {}", duration_label(*bad), duration_label(MAX_SPAN)),
            ));
        }
        if self.lag_tolerance < TimeDelta::zero() || self.lag_tolerance > MAX_SPAN {
            return Err(ForecastError::invalid_config(
                "lag tolerance",
                format!("must be between 0 and {}", duration_label(MAX_SPAN)),
            ));
        }
        Ok(())
    }
}

/// Counts from a featurization pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeatureReport {
    pub candidates: usize,
    pub records: usize,
    pub dropped: usize,
    pub imputed: usize,
    /// Records of sensors without any training-period readings.
    pub no_training_stats: usize,
    /// Missing lag/rolling values by feature name.
    pub missing_by_feature: BTreeMap<String, usize>,
}

impl FeatureReport {
    fn merge(&mut self, other: FeatureReport) {
        // ---
        self.candidates += other.candidates;
        self.records += other.records;
        self.dropped += other.dropped;
        self.imputed += other.imputed;
        self.no_training_stats += other.no_training_stats;
        for (feature, count) in other.missing_by_feature {
            *self.missing_by_feature.entry(feature).or_insert(0) += count;
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeatureTable {
    /// Ordered by `(sensor_id, timestamp)`.
    pub records: Vec<FeatureRecord>,
    pub report: FeatureReport,
}

/// Lag and rolling values before the missing-feature policy is applied.
struct RawFeatures {
    temporal: TemporalFeatures,
    cyclical: CyclicalFeatures,
    lags: Vec<(TimeDelta, Option<LagFeature>)>,
    rolling: Vec<(TimeDelta, Option<RollingFeature>)>,
}

pub struct FeatureEngineer {
    config: FeatureConfig,
}

impl FeatureEngineer {
    // ---
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// First pass: per-sensor statistics from training-period readings.
    ///
    /// Sensors with no reading before their cutoff get no entry.
    pub fn sensor_statistics(
        &self,
        readings: &[SensorReading],
        plan: &SplitPlan,
    ) -> BTreeMap<String, SensorStats> {
        // ---
        let mut grouped: BTreeMap<&str, Vec<&SensorReading>> = BTreeMap::new();
        for reading in readings
            .iter()
            .filter(|r| plan.is_training(&r.sensor_id, r.timestamp))
        {
            grouped.entry(reading.sensor_id.as_str()).or_default().push(reading);
        }

        grouped
            .into_iter()
            .filter_map(|(sensor_id, training)| {
                let stats = compute_stats(&training)?;
                Some((sensor_id.to_string(), stats))
            })
            .collect()
    }

    /// Second pass: one feature record per reading, sensors in parallel.
    ///
    /// Readings need not be pre-sorted; each sensor's history is ordered by
    /// timestamp before any feature is derived.
    #[tracing::instrument(skip_all, fields(readings = readings.len()))]
    pub fn engineer(
        &self,
        readings: &[SensorReading],
        stats: &BTreeMap<String, SensorStats>,
    ) -> FeatureTable {
        // ---
        let ordered: Cow<[SensorReading]> = if is_sensor_ordered(readings) {
            Cow::Borrowed(readings)
        } else {
            warn!("Readings were not ordered by sensor and timestamp, sorting a copy");
            let mut sorted = readings.to_vec();
            sorted.sort_by(|a, b| {
                a.sensor_id
                    .cmp(&b.sensor_id)
                    .then(a.timestamp.cmp(&b.timestamp))
            });
            Cow::Owned(sorted)
        };

        let groups = group_by_sensor(&ordered);
        let per_sensor: Vec<(Vec<FeatureRecord>, FeatureReport)> = groups
            .par_iter()
            .map(|(sensor_id, history)| self.engineer_sensor(sensor_id, history, stats.get(*sensor_id)))
            .collect();

        let mut records = Vec::with_capacity(ordered.len());
        let mut report = FeatureReport::default();
        for (sensor_records, sensor_report) in per_sensor {
            records.extend(sensor_records);
            report.merge(sensor_report);
        }

        info!(
            "Engineered {} feature records from {} candidates ({} dropped, {} imputed)",
            report.records, report.candidates, report.dropped, report.imputed
        );
        FeatureTable { records, report }
    }

    fn engineer_sensor(
        &self,
        sensor_id: &str,
        history: &[SensorReading],
        stats: Option<&SensorStats>,
    ) -> (Vec<FeatureRecord>, FeatureReport) {
        // ---
        let mut report = FeatureReport {
            candidates: history.len(),
            ..FeatureReport::default()
        };
        let mut records = Vec::with_capacity(history.len());

        for reading in history {
            let raw = self.derive(history, reading.timestamp);
            match self.resolve(sensor_id, reading.timestamp, raw, stats) {
                Ok(features) => {
                    if features.imputed {
                        report.imputed += 1;
                    }
                    records.push(FeatureRecord {
                        sensor_id: sensor_id.to_string(),
                        timestamp: reading.timestamp,
                        features,
                        target: reading.temperature,
                    });
                }
                Err(missing) => {
                    report.dropped += 1;
                    if stats.is_none() {
                        report.no_training_stats += 1;
                    }
                    for gap in missing {
                        *report.missing_by_feature.entry(gap.feature).or_insert(0) += 1;
                    }
                }
            }
        }

        report.records = records.len();
        debug!(
            "Sensor {}: {} records, {} dropped",
            sensor_id, report.records, report.dropped
        );
        (records, report)
    }

    /// Features for an arbitrary instant, e.g. one step past the last
    /// reading. `history` must be one sensor's readings; only those strictly
    /// before `at` are used.
    pub fn featurize_at(
        &self,
        sensor_id: &str,
        history: &[SensorReading],
        at: DateTime<Utc>,
        stats: Option<&SensorStats>,
    ) -> std::result::Result<FeatureSet, InsufficientHistory> {
        // ---
        let mut ordered: Vec<SensorReading> = history
            .iter()
            .filter(|r| r.sensor_id == sensor_id)
            .cloned()
            .collect();
        ordered.sort_by_key(|r| r.timestamp);

        let raw = self.derive(&ordered, at);
        self.resolve(sensor_id, at, raw, stats)
            .map_err(|mut missing| missing.swap_remove(0))
    }

    /// Compute features at `at` from a single sensor's ordered history.
    fn derive(&self, history: &[SensorReading], at: DateTime<Utc>) -> RawFeatures {
        // ---
        let past = &history[..history.partition_point(|r| r.timestamp < at)];
        let temporal = TemporalFeatures::from_timestamp(at);

        let lags = self
            .config
            .lag_offsets
            .iter()
            .map(|&offset| (offset, lag_lookup(past, at, offset, self.config.lag_tolerance)))
            .collect();

        let rolling = self
            .config
            .rolling_windows
            .iter()
            .map(|&window| (window, rolling_stats(past, at, window)))
            .collect();

        RawFeatures {
            temporal,
            cyclical: CyclicalFeatures::from_temporal(&temporal),
            lags,
            rolling,
        }
    }

    /// Apply the missing-feature policy. Returns every gap when the record
    /// cannot be completed.
    fn resolve(
        &self,
        sensor_id: &str,
        at: DateTime<Utc>,
        raw: RawFeatures,
        stats: Option<&SensorStats>,
    ) -> std::result::Result<FeatureSet, Vec<InsufficientHistory>> {
        // ---
        let gap = |feature: String| InsufficientHistory {
            sensor_id: sensor_id.to_string(),
            timestamp: at,
            feature,
        };

        let mut missing: Vec<InsufficientHistory> = raw
            .lags
            .iter()
            .filter(|(_, lag)| lag.is_none())
            .map(|(offset, _)| gap(format!("temp_lag_{}", duration_label(*offset))))
            .chain(
                raw.rolling
                    .iter()
                    .filter(|(_, roll)| roll.is_none())
                    .map(|(window, _)| gap(format!("temp_roll_mean_{}", duration_label(*window)))),
            )
            .collect();

        let Some(stats) = stats else {
            missing.push(gap("sensor_temp_mean".to_string()));
            return Err(missing);
        };

        let imputed = !missing.is_empty();
        if imputed && self.config.missing_policy == MissingFeaturePolicy::Drop {
            return Err(missing);
        }

        let lags = raw
            .lags
            .into_iter()
            .map(|(offset, lag)| {
                lag.unwrap_or(LagFeature {
                    offset,
                    temperature: stats.temperature_mean,
                    humidity: stats.humidity_mean,
                    source_timestamp: None,
                })
            })
            .collect();

        let rolling = raw
            .rolling
            .into_iter()
            .map(|(window, roll)| {
                roll.unwrap_or(RollingFeature {
                    window,
                    mean: stats.temperature_mean,
                    std: stats.temperature_std,
                    humidity_mean: stats.humidity_mean,
                    humidity_std: stats.humidity_std,
                    count: 0,
                    source_span: None,
                })
            })
            .collect();

        Ok(FeatureSet {
            temporal: raw.temporal,
            cyclical: raw.cyclical,
            lags,
            rolling,
            sensor: *stats,
            imputed,
        })
    }
}

/// Latest reading in `[at - offset - tolerance, at - offset]`.
///
/// `past` must be ordered and hold only readings before `at`. A target
/// before the earliest representable instant has no source.
fn lag_lookup(
    past: &[SensorReading],
    at: DateTime<Utc>,
    offset: TimeDelta,
    tolerance: TimeDelta,
) -> Option<LagFeature> {
    // ---
    let target = at.checked_sub_signed(offset)?;
    let earliest = target.checked_sub_signed(tolerance).unwrap_or(DateTime::<Utc>::MIN_UTC);
    let idx = past.partition_point(|r| r.timestamp <= target);
    let source = past[..idx].last().filter(|r| r.timestamp >= earliest)?;

    Some(LagFeature {
        offset,
        temperature: source.temperature,
        humidity: source.humidity,
        source_timestamp: Some(source.timestamp),
    })
}

/// Temperature and humidity mean and std over readings in `[at - window, at)`.
fn rolling_stats(past: &[SensorReading], at: DateTime<Utc>, window: TimeDelta) -> Option<RollingFeature> {
    // ---
    let start = at.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC);
    let inside = &past[past.partition_point(|r| r.timestamp < start)..];
    let (first, last) = (inside.first()?, inside.last()?);
    let (mean, std) = mean_and_std(inside.iter().map(|r| r.temperature));
    let (humidity_mean, humidity_std) = mean_and_std(inside.iter().map(|r| r.humidity));

    Some(RollingFeature {
        window,
        mean,
        std,
        humidity_mean,
        humidity_std,
        count: inside.len(),
        source_span: Some((first.timestamp, last.timestamp)),
    })
}

/// Mean and population standard deviation. Callers pass at least one value.
fn mean_and_std(values: impl Iterator<Item = f64> + Clone) -> (f64, f64) {
    // ---
    let n = values.clone().count() as f64;
    let mean = values.clone().sum::<f64>() / n;
    let variance = values.map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Mean and population standard deviation of the training readings.
fn compute_stats(training: &[&SensorReading]) -> Option<SensorStats> {
    // ---
    let last_timestamp = training.iter().map(|r| r.timestamp).max()?;
    let (temperature_mean, temperature_std) = mean_and_std(training.iter().map(|r| r.temperature));
    let (humidity_mean, humidity_std) = mean_and_std(training.iter().map(|r| r.humidity));

    Some(SensorStats {
        temperature_mean,
        temperature_std,
        humidity_mean,
        humidity_std,
        sample_count: training.len(),
        last_timestamp,
    })
}

fn is_sensor_ordered(readings: &[SensorReading]) -> bool {
    readings.windows(2).all(|w| {
        (w[0].sensor_id.as_str(), w[0].timestamp) <= (w[1].sensor_id.as_str(), w[1].timestamp)
    })
}
