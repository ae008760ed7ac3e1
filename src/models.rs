//! Value types flowing through the forecasting pipeline.
//!
//! Raw rows come in as [`RawSensorRow`], are validated into immutable
//! [`SensorReading`]s, featurized into [`FeatureRecord`]s, and leave the
//! pipeline as [`PredictionRecord`]s and [`MetricsSummary`] values.

use std::f64::consts::PI;

use chrono::{DateTime, Datelike, TimeDelta, Timelike, Utc};
use serde::{Deserialize, Serialize};

// ---

/// Raw sensor row as read from the input table.
///
/// Every field is optional so that missing values surface as validation
/// errors instead of parse failures.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSensorRow {
    // ---
    pub sensor_id: Option<String>,
    pub timestamp: Option<String>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
}

/// One validated observation. Never mutated after ingestion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReading {
    // ---
    pub sensor_id: String,
    pub timestamp: DateTime<Utc>,
    pub temperature: f64,
    pub humidity: f64,
}

/// Calendar fields of a timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TemporalFeatures {
    pub hour: u32,
    /// Monday = 0
    pub day_of_week: u32,
    pub day_of_month: u32,
    pub month: u32,
    pub quarter: u32,
}

impl TemporalFeatures {
    pub fn from_timestamp(timestamp: DateTime<Utc>) -> Self {
        // ---
        let month = timestamp.month();
        TemporalFeatures {
            hour: timestamp.hour(),
            day_of_week: timestamp.weekday().num_days_from_monday(),
            day_of_month: timestamp.day(),
            month,
            quarter: (month - 1) / 3 + 1,
        }
    }
}

/// Sine/cosine encodings of the periodic calendar fields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CyclicalFeatures {
    pub hour_sin: f64,
    pub hour_cos: f64,
    pub day_of_week_sin: f64,
    pub day_of_week_cos: f64,
    pub month_sin: f64,
    pub month_cos: f64,
}

impl CyclicalFeatures {
    pub fn from_temporal(temporal: &TemporalFeatures) -> Self {
        // ---
        let (hour_sin, hour_cos) = encode_cyclical(temporal.hour, 24);
        let (day_of_week_sin, day_of_week_cos) = encode_cyclical(temporal.day_of_week, 7);
        let (month_sin, month_cos) = encode_cyclical(temporal.month, 12);

        CyclicalFeatures {
            hour_sin,
            hour_cos,
            day_of_week_sin,
            day_of_week_cos,
            month_sin,
            month_cos,
        }
    }
}

/// `(sin(2πx/period), cos(2πx/period))`
pub fn encode_cyclical(value: u32, period: u32) -> (f64, f64) {
    // ---
    let angle = 2.0 * PI * value as f64 / period as f64;
    (angle.sin(), angle.cos())
}

/// Temperature (and humidity) observed `offset` before the record.
#[derive(Debug, Clone, PartialEq)]
pub struct LagFeature {
    // ---
    pub offset: TimeDelta,
    pub temperature: f64,
    pub humidity: f64,
    /// Timestamp of the reading the values came from; `None` when imputed.
    pub source_timestamp: Option<DateTime<Utc>>,
}

/// Temperature and humidity statistics over the trailing window
/// `[t - window, t)`. Standard deviations are population deviations.
#[derive(Debug, Clone, PartialEq)]
pub struct RollingFeature {
    // ---
    pub window: TimeDelta,
    pub mean: f64,
    pub std: f64,
    pub humidity_mean: f64,
    pub humidity_std: f64,
    /// Readings inside the window; zero when imputed.
    pub count: usize,
    /// Earliest and latest source timestamps; `None` when imputed.
    pub source_span: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

/// Per-sensor statistics computed from training-period readings only.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SensorStats {
    pub temperature_mean: f64,
    pub temperature_std: f64,
    pub humidity_mean: f64,
    pub humidity_std: f64,
    pub sample_count: usize,
    /// Latest training reading the statistics were computed from.
    pub last_timestamp: DateTime<Utc>,
}

/// Ordered list of feature names a model was trained on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureSchema {
    names: Vec<String>,
}

impl FeatureSchema {
    // ---
    pub fn new(names: Vec<String>) -> Self {
        FeatureSchema { names }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// The inputs to the regression model for one (sensor, timestamp).
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSet {
    // ---
    pub temporal: TemporalFeatures,
    pub cyclical: CyclicalFeatures,
    pub lags: Vec<LagFeature>,
    pub rolling: Vec<RollingFeature>,
    pub sensor: SensorStats,
    /// Set when at least one lag or rolling value was imputed.
    pub imputed: bool,
}

impl FeatureSet {
    /// Feature names in the same order as [`FeatureSet::to_vector`].
    pub fn schema(&self) -> FeatureSchema {
        // ---
        let mut names: Vec<String> = [
            "hour",
            "day_of_week",
            "day_of_month",
            "month",
            "quarter",
            "hour_sin",
            "hour_cos",
            "day_of_week_sin",
            "day_of_week_cos",
            "month_sin",
            "month_cos",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        for lag in &self.lags {
            names.push(format!("temp_lag_{}", duration_label(lag.offset)));
        }
        for lag in &self.lags {
            names.push(format!("humidity_lag_{}", duration_label(lag.offset)));
        }
        let windows: Vec<String> = self.rolling.iter().map(|r| duration_label(r.window)).collect();
        for prefix in ["temp_roll_mean", "humidity_roll_mean", "temp_roll_std", "humidity_roll_std"] {
            names.extend(windows.iter().map(|w| format!("{}_{}", prefix, w)));
        }
        for name in [
            "sensor_temp_mean",
            "sensor_temp_std",
            "sensor_humidity_mean",
            "sensor_humidity_std",
        ] {
            names.push(name.to_string());
        }

        FeatureSchema::new(names)
    }

    pub fn to_vector(&self) -> Vec<f64> {
        // ---
        let t = &self.temporal;
        let c = &self.cyclical;
        let mut values = vec![
            t.hour as f64,
            t.day_of_week as f64,
            t.day_of_month as f64,
            t.month as f64,
            t.quarter as f64,
            c.hour_sin,
            c.hour_cos,
            c.day_of_week_sin,
            c.day_of_week_cos,
            c.month_sin,
            c.month_cos,
        ];
        values.extend(self.lags.iter().map(|l| l.temperature));
        values.extend(self.lags.iter().map(|l| l.humidity));
        values.extend(self.rolling.iter().map(|r| r.mean));
        values.extend(self.rolling.iter().map(|r| r.humidity_mean));
        values.extend(self.rolling.iter().map(|r| r.std));
        values.extend(self.rolling.iter().map(|r| r.humidity_std));
        values.push(self.sensor.temperature_mean);
        values.push(self.sensor.temperature_std);
        values.push(self.sensor.humidity_mean);
        values.push(self.sensor.humidity_std);
        values
    }
}

/// One training/evaluation unit keyed by (sensor, timestamp).
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRecord {
    // ---
    pub sensor_id: String,
    pub timestamp: DateTime<Utc>,
    pub features: FeatureSet,
    /// The sensor's temperature at `timestamp`.
    pub target: f64,
}

/// Predicted vs. actual temperature for one evaluation record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    // ---
    pub timestamp: DateTime<Utc>,
    pub sensor_id: String,
    pub actual: f64,
    pub predicted: f64,
}

impl PredictionRecord {
    pub fn abs_error(&self) -> f64 {
        (self.actual - self.predicted).abs()
    }
}

/// Predicted temperature for a timestamp past the end of the data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRecord {
    // ---
    pub timestamp: DateTime<Utc>,
    pub sensor_id: String,
    pub predicted: f64,
}

/// Accuracy metrics over a set of predictions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    // ---
    pub mae: f64,
    pub rmse: f64,
    /// `None` when the actual values have zero variance.
    pub r2: Option<f64>,
    pub min_abs_error: f64,
    pub max_abs_error: f64,
    /// Population standard deviation of the absolute errors.
    pub abs_error_std: f64,
    pub count: usize,
}

/// Compact label for an offset or window: `90m`, `6h`, `2d`.
pub fn duration_label(duration: TimeDelta) -> String {
    // ---
    let minutes = duration.num_minutes();
    if minutes != 0 && minutes % (24 * 60) == 0 {
        format!("{}d", minutes / (24 * 60))
    } else if minutes != 0 && minutes % 60 == 0 {
        format!("{}h", minutes / 60)
    } else {
        format!("{}m", minutes)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::TimeZone;

    fn sample_features() -> FeatureSet {
        // ---
        let ts = Utc.with_ymd_and_hms(2025, 3, 26, 18, 0, 0).unwrap();
        let temporal = TemporalFeatures::from_timestamp(ts);
        FeatureSet {
            temporal,
            cyclical: CyclicalFeatures::from_temporal(&temporal),
            lags: vec![LagFeature {
                offset: TimeDelta::hours(1),
                temperature: 20.5,
                humidity: 44.0,
                source_timestamp: Some(ts - TimeDelta::hours(1)),
            }],
            rolling: vec![RollingFeature {
                window: TimeDelta::hours(3),
                mean: 20.25,
                std: 0.4,
                humidity_mean: 46.0,
                humidity_std: 1.5,
                count: 3,
                source_span: Some((ts - TimeDelta::hours(3), ts - TimeDelta::hours(1))),
            }],
            sensor: SensorStats {
                temperature_mean: 21.0,
                temperature_std: 0.5,
                humidity_mean: 45.0,
                humidity_std: 2.0,
                sample_count: 10,
                last_timestamp: ts,
            },
            imputed: false,
        }
    }

    #[test]
    fn test_temporal_fields() {
        // ---
        // 2025-03-26 is a Wednesday
        let ts = Utc.with_ymd_and_hms(2025, 3, 26, 18, 45, 0).unwrap();
        let t = TemporalFeatures::from_timestamp(ts);

        assert_eq!(t.hour, 18);
        assert_eq!(t.day_of_week, 2);
        assert_eq!(t.day_of_month, 26);
        assert_eq!(t.month, 3);
        assert_eq!(t.quarter, 1);

        let dec = TemporalFeatures::from_timestamp(Utc.with_ymd_and_hms(2025, 12, 1, 0, 0, 0).unwrap());
        assert_eq!(dec.quarter, 4);
    }

    #[test]
    fn test_cyclical_encoding_bounds_and_adjacency() {
        // ---
        for hour in 0..24 {
            let (s, c) = encode_cyclical(hour, 24);
            assert!((-1.0..=1.0).contains(&s));
            assert!((-1.0..=1.0).contains(&c));
        }

        // Hour 23 sits next to hour 0 on the circle
        let (s0, c0) = encode_cyclical(0, 24);
        let (s23, c23) = encode_cyclical(23, 24);
        let (s12, c12) = encode_cyclical(12, 24);
        let near = ((s0 - s23).powi(2) + (c0 - c23).powi(2)).sqrt();
        let far = ((s0 - s12).powi(2) + (c0 - c12).powi(2)).sqrt();
        assert!(near < far);
    }

    #[test]
    fn test_schema_matches_vector_length() {
        // ---
        let features = sample_features();
        let schema = features.schema();
        let vector = features.to_vector();

        assert_eq!(schema.len(), vector.len());
        assert!(schema.names().contains(&"temp_lag_1h".to_string()));
        assert!(schema.names().contains(&"humidity_lag_1h".to_string()));
        assert!(schema.names().contains(&"temp_roll_mean_3h".to_string()));

        let value = |name: &str| vector[schema.names().iter().position(|n| n == name).unwrap()];
        assert_eq!(value("temp_lag_1h"), 20.5);
        assert_eq!(value("humidity_roll_mean_3h"), 46.0);
        assert_eq!(value("temp_roll_std_3h"), 0.4);
        assert_eq!(value("humidity_roll_std_3h"), 1.5);
        assert_eq!(value("sensor_humidity_std"), 2.0);
    }

    #[test]
    fn test_duration_labels() {
        // ---
        assert_eq!(duration_label(TimeDelta::hours(6)), "6h");
        assert_eq!(duration_label(TimeDelta::minutes(90)), "90m");
        assert_eq!(duration_label(TimeDelta::hours(48)), "2d");
        assert_eq!(duration_label(TimeDelta::zero()), "0m");
    }

    #[test]
    fn test_prediction_abs_error() {
        // ---
        let record = PredictionRecord {
            timestamp: Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap(),
            sensor_id: "sensor-test".to_string(),
            actual: 20.0,
            predicted: 21.5,
        };
        assert_eq!(record.abs_error(), 1.5);
    }
}
