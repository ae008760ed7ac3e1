//! `GET /predictions`: evaluation predictions with optional filters.
//!
//! - `sensor_id`: exact match
//! - `timestamp_range`: `start,end`, both inclusive, any timestamp format the
//!   ingestor accepts
//! - `limit`: maximum rows returned (default 1000)

use axum::{
    extract::Query, extract::State, http::StatusCode, response::IntoResponse, routing::get, Json,
    Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use super::SharedRun;
use crate::ingest::parse_timestamp;
use crate::models::PredictionRecord;

// ---

const DEFAULT_LIMIT: usize = 1000;

pub fn router() -> Router<SharedRun> {
    // ---
    Router::new().route("/predictions", get(handler))
}

/// Query parameters for filtering predictions
#[derive(Debug, Deserialize)]
pub struct PredictionsQuery {
    sensor_id: Option<String>,
    /// e.g. "2025-03-21T00:00:00Z,2025-03-22T00:00:00Z"
    timestamp_range: Option<String>,
    limit: Option<usize>,
}

async fn handler(
    Query(params): Query<PredictionsQuery>,
    State(run): State<SharedRun>,
) -> impl IntoResponse {
    // ---
    let range = match params.timestamp_range.as_deref().map(parse_range).transpose() {
        Ok(range) => range,
        Err(reason) => {
            debug!("GET /predictions - rejecting query: {}", reason);
            return (StatusCode::BAD_REQUEST, Json(reason)).into_response();
        }
    };

    let filtered = apply_filters(&run.predictions, &params, range);
    info!("GET /predictions - returning {} records", filtered.len());
    (StatusCode::OK, Json(filtered)).into_response()
}

fn parse_range(raw: &str) -> Result<(DateTime<Utc>, DateTime<Utc>), String> {
    // ---
    let (start, end) = raw
        .split_once(',')
        .ok_or_else(|| format!("timestamp_range '{}' must be 'start,end'", raw))?;
    let parse = |value: &str| {
        parse_timestamp(value.trim())
            .ok_or_else(|| format!("'{}' is not a valid timestamp", value.trim()))
    };
    let (start, end) = (parse(start)?, parse(end)?);
    if start > end {
        return Err(format!("timestamp_range start {} is after end {}", start, end));
    }
    Ok((start, end))
}

fn apply_filters(
    records: &[PredictionRecord],
    params: &PredictionsQuery,
    range: Option<(DateTime<Utc>, DateTime<Utc>)>,
) -> Vec<PredictionRecord> {
    // ---
    records
        .iter()
        .filter(|r| {
            params
                .sensor_id
                .as_ref()
                .map_or(true, |id| &r.sensor_id == id)
        })
        .filter(|r| range.map_or(true, |(start, end)| start <= r.timestamp && r.timestamp <= end))
        .take(params.limit.unwrap_or(DEFAULT_LIMIT))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::{TimeDelta, TimeZone};

    fn records() -> Vec<PredictionRecord> {
        // ---
        let start = Utc.with_ymd_and_hms(2025, 3, 21, 0, 0, 0).unwrap();
        (0..6)
            .map(|i| PredictionRecord {
                timestamp: start + TimeDelta::hours(i),
                sensor_id: if i % 2 == 0 { "S1" } else { "S2" }.to_string(),
                actual: 20.0,
                predicted: 20.5,
            })
            .collect()
    }

    fn query(sensor_id: Option<&str>, limit: Option<usize>) -> PredictionsQuery {
        PredictionsQuery {
            sensor_id: sensor_id.map(String::from),
            timestamp_range: None,
            limit,
        }
    }

    #[test]
    fn test_sensor_and_limit_filters() {
        // ---
        let filtered = apply_filters(&records(), &query(Some("S2"), None), None);
        assert_eq!(filtered.len(), 3);
        assert!(filtered.iter().all(|r| r.sensor_id == "S2"));

        assert_eq!(apply_filters(&records(), &query(None, Some(2)), None).len(), 2);
    }

    #[test]
    fn test_timestamp_range_is_inclusive() {
        // ---
        let range = parse_range("2025-03-21T01:00:00Z, 2025-03-21 03:00:00").unwrap();
        let filtered = apply_filters(&records(), &query(None, None), Some(range));
        assert_eq!(filtered.len(), 3);
    }

    #[test]
    fn test_bad_ranges_are_rejected() {
        // ---
        assert!(parse_range("2025-03-21T01:00:00Z").is_err());
        assert!(parse_range("yesterday,today").is_err());
        assert!(parse_range("2025-03-22T00:00:00Z,2025-03-21T00:00:00Z").is_err());
    }
}
