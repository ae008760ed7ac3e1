//! TemperaturePredictor: the trained regression model behind the pipeline.
//!
//! Wraps a [`RandomForest`] together with the feature schema it was fitted
//! on. Every prediction call checks the incoming schema against the training
//! schema so a reordered or resized feature vector never reaches the trees.

use serde::Serialize;
use tracing::info;

use crate::errors::{ForecastError, Result};
use crate::forest::{ForestConfig, RandomForest};
use crate::models::{FeatureRecord, FeatureSchema, FeatureSet, PredictionRecord};

// ---

/// Share of the total impurity decrease attributed to one feature.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
}

struct TrainedModel {
    forest: RandomForest,
    schema: FeatureSchema,
    training_records: usize,
}

pub struct TemperaturePredictor {
    config: ForestConfig,
    model: Option<TrainedModel>,
}

impl TemperaturePredictor {
    // ---
    pub fn new(config: ForestConfig) -> Self {
        Self {
            config,
            model: None,
        }
    }

    pub fn config(&self) -> &ForestConfig {
        &self.config
    }

    pub fn is_trained(&self) -> bool {
        self.model.is_some()
    }

    /// Schema of the fitted model, if trained.
    pub fn schema(&self) -> Option<&FeatureSchema> {
        self.model.as_ref().map(|m| &m.schema)
    }

    pub fn training_records(&self) -> usize {
        self.model.as_ref().map_or(0, |m| m.training_records)
    }

    /// Fit the forest on `records`, replacing any previously trained model.
    /// Runs on the current rayon pool.
    #[tracing::instrument(skip_all, fields(records = records.len()))]
    pub fn train(&mut self, records: &[FeatureRecord]) -> Result<()> {
        // ---
        let Some(first) = records.first() else {
            return Err(ForecastError::InsufficientData { train: 0, eval: 0 });
        };
        let schema = first.features.schema();

        let mut rows = Vec::with_capacity(records.len());
        let mut targets = Vec::with_capacity(records.len());
        for record in records {
            let found = record.features.schema();
            if found != schema {
                return Err(schema_mismatch(&schema, &found));
            }
            rows.push(record.features.to_vector());
            targets.push(record.target);
        }

        let forest = RandomForest::fit(&rows, &targets, &self.config)?;
        info!(
            "Trained {} trees on {} records x {} features",
            forest.tree_count(),
            records.len(),
            schema.len()
        );

        self.model = Some(TrainedModel {
            forest,
            schema,
            training_records: records.len(),
        });
        Ok(())
    }

    /// One temperature per feature set, in input order.
    pub fn predict(&self, features: &[FeatureSet]) -> Result<Vec<f64>> {
        // ---
        let model = self.trained()?;
        features.iter().map(|f| model.predict(f)).collect()
    }

    pub fn predict_one(&self, features: &FeatureSet) -> Result<f64> {
        self.trained()?.predict(features)
    }

    /// Predict from a raw vector laid out according to `schema`.
    pub fn predict_vector(&self, schema: &FeatureSchema, values: &[f64]) -> Result<f64> {
        // ---
        let model = self.trained()?;
        if *schema != model.schema || values.len() != model.schema.len() {
            return Err(ForecastError::SchemaMismatch {
                expected: model.schema.names().to_vec(),
                found: schema.names().to_vec(),
            });
        }
        Ok(model.forest.predict(values))
    }

    /// Predictions paired with the records' actual temperatures.
    pub fn predict_records(&self, records: &[FeatureRecord]) -> Result<Vec<PredictionRecord>> {
        // ---
        let features: Vec<FeatureSet> = records.iter().map(|r| r.features.clone()).collect();
        let predicted = self.predict(&features)?;

        Ok(records
            .iter()
            .zip(predicted)
            .map(|(record, predicted)| PredictionRecord {
                timestamp: record.timestamp,
                sensor_id: record.sensor_id.clone(),
                actual: record.target,
                predicted,
            })
            .collect())
    }

    /// Importances ranked from most to least influential.
    pub fn feature_importances(&self) -> Result<Vec<FeatureImportance>> {
        // ---
        let model = self.trained()?;
        let mut ranked: Vec<FeatureImportance> = model
            .schema
            .names()
            .iter()
            .zip(model.forest.feature_importances())
            .map(|(feature, importance)| FeatureImportance {
                feature: feature.clone(),
                importance,
            })
            .collect();
        ranked.sort_by(|a, b| b.importance.total_cmp(&a.importance));
        Ok(ranked)
    }

    fn trained(&self) -> Result<&TrainedModel> {
        self.model.as_ref().ok_or(ForecastError::ModelNotTrained)
    }
}

impl TrainedModel {
    fn predict(&self, features: &FeatureSet) -> Result<f64> {
        // ---
        let found = features.schema();
        if found != self.schema {
            return Err(schema_mismatch(&self.schema, &found));
        }
        Ok(self.forest.predict(&features.to_vector()))
    }
}

fn schema_mismatch(expected: &FeatureSchema, found: &FeatureSchema) -> ForecastError {
    ForecastError::SchemaMismatch {
        expected: expected.names().to_vec(),
        found: found.names().to_vec(),
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::{CyclicalFeatures, LagFeature, SensorStats, TemporalFeatures};
    use chrono::{TimeDelta, TimeZone, Utc};

    fn record(hour: i64, lag_temp: f64, target: f64) -> FeatureRecord {
        // ---
        let ts = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + TimeDelta::hours(hour);
        let temporal = TemporalFeatures::from_timestamp(ts);
        FeatureRecord {
            sensor_id: "S1".to_string(),
            timestamp: ts,
            features: FeatureSet {
                temporal,
                cyclical: CyclicalFeatures::from_temporal(&temporal),
                lags: vec![LagFeature {
                    offset: TimeDelta::hours(1),
                    temperature: lag_temp,
                    humidity: 50.0,
                    source_timestamp: Some(ts - TimeDelta::hours(1)),
                }],
                rolling: vec![],
                sensor: SensorStats {
                    temperature_mean: 20.0,
                    temperature_std: 5.0,
                    humidity_mean: 50.0,
                    humidity_std: 8.0,
                    sample_count: 48,
                    last_timestamp: ts,
                },
                imputed: false,
            },
            target,
        }
    }

    fn training_set() -> Vec<FeatureRecord> {
        // ---
        (0..48)
            .map(|h| {
                let lag = 15.0 + (h % 10) as f64;
                record(h, lag, lag + 1.0)
            })
            .collect()
    }

    fn config() -> ForestConfig {
        ForestConfig {
            tree_count: 8,
            max_depth: 8,
            min_samples_leaf: 1,
            min_samples_split: 2,
            seed: 42,
            workers: 2,
        }
    }

    #[test]
    fn test_predict_before_train_fails() {
        // ---
        let predictor = TemperaturePredictor::new(config());
        let r = record(0, 20.0, 21.0);

        assert!(!predictor.is_trained());
        assert!(matches!(
            predictor.predict(&[r.features.clone()]),
            Err(ForecastError::ModelNotTrained)
        ));
        assert!(matches!(
            predictor.predict_one(&r.features),
            Err(ForecastError::ModelNotTrained)
        ));
        assert!(matches!(
            predictor.feature_importances(),
            Err(ForecastError::ModelNotTrained)
        ));
    }

    #[test]
    fn test_train_on_empty_fails() {
        // ---
        let mut predictor = TemperaturePredictor::new(config());
        assert!(matches!(
            predictor.train(&[]),
            Err(ForecastError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_predictions_track_lagged_signal() {
        // ---
        let mut predictor = TemperaturePredictor::new(config());
        predictor.train(&training_set()).unwrap();

        let records = training_set();
        let low = predictor.predict_one(&records[0].features).unwrap();
        let high = predictor.predict_one(&records[9].features).unwrap();
        assert!(low < high);
        assert!((15.0..=26.0).contains(&low));
        assert!((15.0..=26.0).contains(&high));
        assert_eq!(predictor.training_records(), 48);
    }

    #[test]
    fn test_training_is_deterministic() {
        // ---
        let records = training_set();
        let train_on = |workers: usize| {
            let pool = crate::forest::worker_pool(workers).unwrap();
            let mut predictor = TemperaturePredictor::new(config());
            pool.install(|| predictor.train(&records)).unwrap();
            predictor
        };
        let (a, b) = (train_on(1), train_on(3));

        assert_eq!(
            a.predict_records(&records).unwrap(),
            b.predict_records(&records).unwrap()
        );
    }

    #[test]
    fn test_schema_mismatch_is_rejected() {
        // ---
        let mut predictor = TemperaturePredictor::new(config());
        predictor.train(&training_set()).unwrap();

        let mut odd = record(0, 20.0, 21.0).features;
        odd.lags.clear();
        assert!(matches!(
            predictor.predict_one(&odd),
            Err(ForecastError::SchemaMismatch { .. })
        ));
        assert!(matches!(
            predictor.predict(&[odd]),
            Err(ForecastError::SchemaMismatch { .. })
        ));

        let schema = predictor.schema().unwrap().clone();
        assert!(predictor.predict_vector(&schema, &[1.0]).is_err());

        let mut mixed = training_set();
        mixed[5].features.lags.clear();
        assert!(matches!(
            TemperaturePredictor::new(config()).train(&mixed),
            Err(ForecastError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_feature_importances_ranked() {
        // ---
        let mut predictor = TemperaturePredictor::new(config());
        predictor.train(&training_set()).unwrap();
        let importances = predictor.feature_importances().unwrap();

        assert_eq!(importances.len(), predictor.schema().unwrap().len());
        assert!(importances.windows(2).all(|w| w[0].importance >= w[1].importance));
        let total: f64 = importances.iter().map(|i| i.importance).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }
}
