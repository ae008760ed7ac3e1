//! Configuration loader for the `sensorflow-forecast` pipeline.
//!
//! All runtime settings come from environment variables (with optional `.env`
//! file support provided by the caller). Values are parsed and validated once
//! at startup; the resulting [`Config`] is immutable for the rest of the run.
//!
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use chrono::TimeDelta;

use crate::features::{FeatureConfig, MissingFeaturePolicy};
use crate::forest::{default_workers, ForestConfig};
use crate::ingest::IngestConfig;
use crate::models::duration_label;
use crate::pipeline::PipelineConfig;
use crate::split::{SplitConfig, SplitMode};

/// Parse an optional environment variable with a default value.
macro_rules! parse_env {
    ($get:expr, $var_name:expr, $ty:ty, $default:expr) => {
        $get($var_name)
            .map(|v| v.trim().parse::<$ty>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse a required string environment variable.
macro_rules! require_env {
    ($get:expr, $var_name:expr) => {
        $get($var_name).ok_or_else(|| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

/// Strongly typed application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// CSV file with `sensor_id,timestamp,temperature,humidity` columns.
    pub input_path: PathBuf,

    /// Directory receiving `predictions.csv`, `forecast.csv` and `metrics.json`.
    pub output_dir: PathBuf,

    /// When set, serve the finished run over HTTP at this address.
    pub serve_addr: Option<SocketAddr>,

    pub pipeline: PipelineConfig,
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `FORECAST_INPUT` – input CSV path
///
/// Optional:
/// - `FORECAST_OUTPUT_DIR` – artifact directory (default: `output`)
/// - `FORECAST_LAG_OFFSETS` – e.g. `1h,6h,12h,24h` (units `m`, `h`, `d`)
/// - `FORECAST_ROLLING_WINDOWS` – e.g. `3h,6h,12h,24h`
/// - `FORECAST_LAG_TOLERANCE` – nearest-prior lag tolerance (default: `5m`)
/// - `FORECAST_TEST_FRACTION` – held-out share of the time range (default: 0.2)
/// - `FORECAST_SPLIT_MODE` – `global` or `per_sensor`
/// - `FORECAST_MISSING_FEATURES` – `drop` or `impute`
/// - `FORECAST_TREE_COUNT`, `FORECAST_MAX_DEPTH`, `FORECAST_MIN_LEAF_SAMPLES`,
///   `FORECAST_MIN_SPLIT_SAMPLES`, `FORECAST_RANDOM_SEED` – ensemble settings
/// - `FORECAST_WORKERS` – worker pool size (default: available parallelism)
/// - `FORECAST_TEMP_MIN` / `FORECAST_TEMP_MAX` – plausible range in °C
/// - `FORECAST_HORIZON` – step for the next-reading forecast (default: `1h`)
/// - `FORECAST_SERVE_ADDR` – e.g. `0.0.0.0:8080`
///
/// Returns an error if any required variable is missing or any value is invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    load_from(|name| env::var(name).ok())
}

/// Load configuration through an arbitrary variable lookup.
pub fn load_from<F>(get: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    // ---
    let input_path = PathBuf::from(require_env!(get, "FORECAST_INPUT"));
    let output_dir = PathBuf::from(get("FORECAST_OUTPUT_DIR").unwrap_or_else(|| "output".into()));
    let serve_addr = get("FORECAST_SERVE_ADDR")
        .map(|v| v.trim().parse::<SocketAddr>())
        .transpose()
        .map_err(|e| anyhow!("Invalid FORECAST_SERVE_ADDR: {}", e))?;

    let defaults = FeatureConfig::default();
    let features = FeatureConfig {
        lag_offsets: duration_list(&get, "FORECAST_LAG_OFFSETS", defaults.lag_offsets)?,
        rolling_windows: duration_list(&get, "FORECAST_ROLLING_WINDOWS", defaults.rolling_windows)?,
        lag_tolerance: duration_var(&get, "FORECAST_LAG_TOLERANCE", defaults.lag_tolerance)?,
        missing_policy: parse_env!(
            get,
            "FORECAST_MISSING_FEATURES",
            MissingFeaturePolicy,
            defaults.missing_policy
        ),
    };

    let split = SplitConfig {
        test_fraction: parse_env!(get, "FORECAST_TEST_FRACTION", f64, 0.2),
        mode: parse_env!(get, "FORECAST_SPLIT_MODE", SplitMode, SplitMode::Global),
    };

    let forest = ForestConfig {
        tree_count: parse_env!(get, "FORECAST_TREE_COUNT", usize, 100),
        max_depth: parse_env!(get, "FORECAST_MAX_DEPTH", usize, 20),
        min_samples_leaf: parse_env!(get, "FORECAST_MIN_LEAF_SAMPLES", usize, 2),
        min_samples_split: parse_env!(get, "FORECAST_MIN_SPLIT_SAMPLES", usize, 5),
        seed: parse_env!(get, "FORECAST_RANDOM_SEED", u64, 42),
        workers: parse_env!(get, "FORECAST_WORKERS", usize, default_workers()),
    };

    let ingest = IngestConfig {
        temperature_min: parse_env!(get, "FORECAST_TEMP_MIN", f64, -40.0),
        temperature_max: parse_env!(get, "FORECAST_TEMP_MAX", f64, 85.0),
    };

    let pipeline = PipelineConfig {
        ingest,
        features,
        split,
        forest,
        forecast_horizon: duration_var(&get, "FORECAST_HORIZON", TimeDelta::hours(1))?,
    };
    pipeline.validate().context("Invalid pipeline configuration")?;

    Ok(Config {
        input_path,
        output_dir,
        serve_addr,
        pipeline,
    })
}

/// Parse `90m`, `6h` or `2d`.
pub fn parse_duration(raw: &str) -> Result<TimeDelta> {
    // ---
    let raw = raw.trim();
    let split_at = raw
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| anyhow!("'{}' is missing a unit (m, h or d)", raw))?;
    let (amount, unit) = raw.split_at(split_at);
    let amount: i64 = amount
        .parse()
        .map_err(|_| anyhow!("'{}' does not start with a whole number", raw))?;

    let delta = match unit {
        "m" => TimeDelta::try_minutes(amount),
        "h" => TimeDelta::try_hours(amount),
        "d" => TimeDelta::try_days(amount),
        other => return Err(anyhow!("unknown duration unit '{}' in '{}'", other, raw)),
    };
    delta.ok_or_else(|| anyhow!("'{}' is out of range", raw))
}

fn duration_var<F>(get: &F, name: &str, default: TimeDelta) -> Result<TimeDelta>
where
    F: Fn(&str) -> Option<String>,
{
    // ---
    match get(name) {
        Some(raw) => parse_duration(&raw).with_context(|| format!("Invalid {}", name)),
        None => Ok(default),
    }
}

fn duration_list<F>(get: &F, name: &str, default: Vec<TimeDelta>) -> Result<Vec<TimeDelta>>
where
    F: Fn(&str) -> Option<String>,
{
    // ---
    let Some(raw) = get(name) else {
        return Ok(default);
    };
    raw.split(',')
        .filter(|part| !part.trim().is_empty())
        .map(|part| parse_duration(part).with_context(|| format!("Invalid {}", name)))
        .collect()
}

fn labels(durations: &[TimeDelta]) -> String {
    durations
        .iter()
        .map(|d| duration_label(*d))
        .collect::<Vec<_>>()
        .join(",")
}

impl Config {
    /// Log the loaded configuration.
    pub fn log_config(&self) {
        // ---
        let p = &self.pipeline;
        tracing::info!("Configuration loaded:");
        tracing::info!("  FORECAST_INPUT            : {}", self.input_path.display());
        tracing::info!("  FORECAST_OUTPUT_DIR       : {}", self.output_dir.display());
        tracing::info!("  FORECAST_LAG_OFFSETS      : {}", labels(&p.features.lag_offsets));
        tracing::info!("  FORECAST_ROLLING_WINDOWS  : {}", labels(&p.features.rolling_windows));
        tracing::info!("  FORECAST_LAG_TOLERANCE    : {}", duration_label(p.features.lag_tolerance));
        tracing::info!("  FORECAST_MISSING_FEATURES : {:?}", p.features.missing_policy);
        tracing::info!("  FORECAST_TEST_FRACTION    : {}", p.split.test_fraction);
        tracing::info!("  FORECAST_SPLIT_MODE       : {:?}", p.split.mode);
        tracing::info!("  FORECAST_TREE_COUNT       : {}", p.forest.tree_count);
        tracing::info!("  FORECAST_MAX_DEPTH        : {}", p.forest.max_depth);
        tracing::info!("  FORECAST_MIN_LEAF_SAMPLES : {}", p.forest.min_samples_leaf);
        tracing::info!("  FORECAST_MIN_SPLIT_SAMPLES: {}", p.forest.min_samples_split);
        tracing::info!("  FORECAST_RANDOM_SEED      : {}", p.forest.seed);
        tracing::info!("  FORECAST_WORKERS          : {}", p.forest.workers);
        tracing::info!(
            "  FORECAST_TEMP_MIN/MAX     : {} / {}",
            p.ingest.temperature_min,
            p.ingest.temperature_max
        );
        tracing::info!("  FORECAST_HORIZON          : {}", duration_label(p.forecast_horizon));
        match self.serve_addr {
            Some(addr) => tracing::info!("  FORECAST_SERVE_ADDR       : {}", addr),
            None => tracing::info!("  FORECAST_SERVE_ADDR       : (not serving)"),
        }
    }
}
