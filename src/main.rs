//! Application entry point for the `sensorflow-forecast` pipeline.
//!
//! Startup sequence:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Running the forecasting pipeline on the input CSV
//! - Writing `predictions.csv`, `forecast.csv` and `metrics.json`
//! - Optionally serving the finished run via the `routes` gateway
//!
//! # Environment Variables
//! - `FORECAST_INPUT` (**required**) – input CSV path
//! - `FORECAST_LOG_LEVEL` (optional) – log verbosity (default: `info`)
//! - `FORECAST_SPAN_EVENTS` (optional) – span event mode for tracing
//!
//! See [`sensorflow_forecast::config`] for the full list.
use std::{env, fs::File, io::BufReader};

use anyhow::{Context, Result};
use dotenvy::dotenv;
use is_terminal::IsTerminal;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use sensorflow_forecast::{config, output, routes, ForecastPipeline};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    init_tracing();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let input = File::open(&cfg.input_path)
        .with_context(|| format!("Failed to open input '{}'", cfg.input_path.display()))?;

    let pipeline = ForecastPipeline::new(cfg.pipeline.clone())?;
    let ctx = tokio::task::spawn_blocking(move || pipeline.run(BufReader::new(input)))
        .await
        .context("Pipeline task panicked")??;

    let paths = output::write_artifacts(&cfg.output_dir, &ctx)
        .with_context(|| format!("Failed to write artifacts to '{}'", cfg.output_dir.display()))?;
    tracing::info!("Metrics written to {}", paths.metrics.display());

    let Some(addr) = cfg.serve_addr else {
        return Ok(());
    };

    // Build app from routes gateway
    let app = routes::router(routes::ServedRun::from_context(&ctx));

    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ---

/// Initialize the global tracing subscriber for structured logging.
///
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by `FORECAST_SPAN_EVENTS`:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level from `RUST_LOG`, else `FORECAST_LOG_LEVEL` (default `info`)
fn init_tracing() {
    // ---
    let span_events = match env::var("FORECAST_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("FORECAST_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "info",
        };
        EnvFilter::new(level)
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
