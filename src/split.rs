//! DatasetSplitter: chronological train/evaluation partitioning.
//!
//! The cutoff is placed at `(1 - test_fraction)` of the way through the
//! timeline. Records strictly before the cutoff train the model; records at or
//! after it are held out. Nothing is shuffled.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tracing::info;

use crate::errors::{ForecastError, Result};
use crate::models::{FeatureRecord, SensorReading};

// ---

/// Whether one cutoff covers every sensor or each sensor gets its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitMode {
    Global,
    PerSensor,
}

impl std::str::FromStr for SplitMode {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "global" => Ok(SplitMode::Global),
            "per_sensor" | "per-sensor" => Ok(SplitMode::PerSensor),
            other => Err(ForecastError::invalid_config(
                "split mode",
                format!("expected 'global' or 'per_sensor', got '{}'", other),
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SplitConfig {
    pub test_fraction: f64,
    pub mode: SplitMode,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            test_fraction: 0.2,
            mode: SplitMode::Global,
        }
    }
}

impl SplitConfig {
    pub fn validate(&self) -> Result<()> {
        // ---
        if !(self.test_fraction > 0.0 && self.test_fraction < 1.0) {
            return Err(ForecastError::invalid_config(
                "test fraction",
                format!("{} must be strictly between 0 and 1", self.test_fraction),
            ));
        }
        Ok(())
    }
}

/// Where the training period ends.
#[derive(Debug, Clone, PartialEq)]
pub enum SplitPlan {
    Global {
        cutoff: DateTime<Utc>,
    },
    PerSensor {
        cutoffs: BTreeMap<String, DateTime<Utc>>,
    },
}

impl SplitPlan {
    // ---
    pub fn cutoff_for(&self, sensor_id: &str) -> Option<DateTime<Utc>> {
        match self {
            SplitPlan::Global { cutoff } => Some(*cutoff),
            SplitPlan::PerSensor { cutoffs } => cutoffs.get(sensor_id).copied(),
        }
    }

    /// True when a reading at `timestamp` belongs to the training period.
    pub fn is_training(&self, sensor_id: &str, timestamp: DateTime<Utc>) -> bool {
        self.cutoff_for(sensor_id)
            .map_or(false, |cutoff| timestamp < cutoff)
    }
}

/// The two partitions, each in the order the records were supplied.
#[derive(Debug, Clone)]
pub struct DatasetSplit {
    pub train: Vec<FeatureRecord>,
    pub eval: Vec<FeatureRecord>,
    pub plan: SplitPlan,
}

impl DatasetSplit {
    pub fn summary(&self) -> SplitSummary {
        // ---
        SplitSummary {
            cutoff: match &self.plan {
                SplitPlan::Global { cutoff } => Some(*cutoff),
                SplitPlan::PerSensor { .. } => None,
            },
            train_records: self.train.len(),
            eval_records: self.eval.len(),
            train_end: self.train.iter().map(|r| r.timestamp).max(),
            eval_start: self.eval.iter().map(|r| r.timestamp).min(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SplitSummary {
    /// `None` for per-sensor splits.
    pub cutoff: Option<DateTime<Utc>>,
    pub train_records: usize,
    pub eval_records: usize,
    pub train_end: Option<DateTime<Utc>>,
    pub eval_start: Option<DateTime<Utc>>,
}

pub struct DatasetSplitter {
    config: SplitConfig,
}

impl DatasetSplitter {
    // ---
    pub fn new(config: SplitConfig) -> Self {
        Self { config }
    }

    /// Derive cutoffs from the full reading timeline.
    pub fn plan(&self, readings: &[SensorReading]) -> Result<SplitPlan> {
        // ---
        self.plan_timeline(readings.iter().map(|r| (r.sensor_id.as_str(), r.timestamp)))
    }

    fn plan_timeline<'a>(
        &self,
        stamps: impl Iterator<Item = (&'a str, DateTime<Utc>)>,
    ) -> Result<SplitPlan> {
        // ---
        let mut ranges: BTreeMap<&str, (DateTime<Utc>, DateTime<Utc>)> = BTreeMap::new();
        for (sensor_id, ts) in stamps {
            ranges
                .entry(sensor_id)
                .and_modify(|(first, last)| {
                    *first = (*first).min(ts);
                    *last = (*last).max(ts);
                })
                .or_insert((ts, ts));
        }

        let fraction = self.config.test_fraction;
        let first = ranges.values().map(|(first, _)| *first).min();
        let last = ranges.values().map(|(_, last)| *last).max();
        let (Some(first), Some(last)) = (first, last) else {
            return Err(ForecastError::InsufficientData { train: 0, eval: 0 });
        };

        let plan = match self.config.mode {
            SplitMode::Global => SplitPlan::Global {
                cutoff: cutoff_between(first, last, fraction),
            },
            SplitMode::PerSensor => SplitPlan::PerSensor {
                cutoffs: ranges
                    .into_iter()
                    .map(|(sensor_id, (first, last))| {
                        (sensor_id.to_string(), cutoff_between(first, last, fraction))
                    })
                    .collect(),
            },
        };
        Ok(plan)
    }

    /// Partition featurized records according to `plan`.
    ///
    /// Fails with `InsufficientData` when either partition is empty.
    pub fn split(&self, records: Vec<FeatureRecord>, plan: &SplitPlan) -> Result<DatasetSplit> {
        // ---
        let (train, eval): (Vec<_>, Vec<_>) = records
            .into_iter()
            .partition(|r| plan.is_training(&r.sensor_id, r.timestamp));

        if train.is_empty() || eval.is_empty() {
            return Err(ForecastError::InsufficientData {
                train: train.len(),
                eval: eval.len(),
            });
        }

        let split = DatasetSplit {
            train,
            eval,
            plan: plan.clone(),
        };
        let summary = split.summary();
        info!(
            "Split {} training / {} evaluation records (cutoff {:?})",
            summary.train_records, summary.eval_records, summary.cutoff
        );
        Ok(split)
    }

    /// Plan from the records' own timestamps, then split.
    pub fn split_records(&self, records: Vec<FeatureRecord>) -> Result<DatasetSplit> {
        // ---
        let plan = self.plan_timeline(records.iter().map(|r| (r.sensor_id.as_str(), r.timestamp)))?;
        self.split(records, &plan)
    }
}

/// `first + (last - first) * (1 - test_fraction)`, at millisecond resolution.
fn cutoff_between(first: DateTime<Utc>, last: DateTime<Utc>, test_fraction: f64) -> DateTime<Utc> {
    // ---
    let span_ms = (last - first).num_milliseconds() as f64;
    let train_ms = (span_ms * (1.0 - test_fraction)).round() as i64;
    first + TimeDelta::milliseconds(train_ms)
}
