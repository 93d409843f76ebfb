//! Application entry point for the `aquaflow` backend service.
//!
//! This binary orchestrates the full startup sequence for the water-quality
//! ingestion pipeline, including:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Establishing a PostgreSQL connection pool
//! - Creating the database schema if it does not exist
//! - Connecting to the MQTT broker and spawning the ingestion event loop
//! - Bootstrapping topic subscriptions (wildcard net + known sensors)
//! - Mounting all API routes via the `routes` gateway (EMBP pattern)
//! - Binding the Axum HTTP server and serving requests
//!
//! # Environment Variables
//! - `DATABASE_URL` (**required**) – PostgreSQL connection string
//! - `DB_POOL_MAX` (optional) – maximum number of DB connections (default: 5)
//! - `MQTT_HOST` / `MQTT_PORT` / `MQTT_CLIENT_ID` (optional) – broker settings
//! - `MQTT_TOPIC_ROOT` (optional) – hierarchical topic root (default: `shrimp_farm`)
//! - `READING_RETENTION_DAYS` (optional) – age-based reading cleanup (default: off)
//! - `AQUAFLOW_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `AQUAFLOW_SPAN_EVENTS` (optional) – span event mode for tracing
//!
//! This module follows the Explicit Module Boundary Pattern (EMBP) by
//! delegating schema setup to `schema`, configuration parsing to `config`,
//! and route registration to `routes`.
use std::{env, io::IsTerminal, net::SocketAddr, sync::Arc, time::Duration};

use axum::Router;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use anyhow::Result;

mod config;
mod dashboard;
mod ingest;
mod models;
mod mqtt;
mod payload;
mod registry;
mod routes;
mod schema;
mod store;
mod thresholds;
mod topic;

pub use config::Config;

// These are not used here but they are imported to be used by the sibling
// modules via `crate::`, that way refactoring is easier since the leaf
// modules do not need knowledge of models.rs, only of their parent module
// (main.rs)
pub use models::{ParsedReading, SensorIdentity, SensorReading, SeverityLevel, ThresholdBand};

use dashboard::DashboardService;
use ingest::IngestRouter;
use registry::SubscriptionRegistry;
use store::{PgBandStore, PgReadingStore, PgSensorStore, ReadingStore, SensorStore};
use thresholds::ThresholdEngine;
use topic::TopicCodec;

// ---

/// Shared handles handed to every route handler.
#[derive(Clone)]
pub struct AppState {
    // ---
    pub dashboard: Arc<DashboardService>,
    pub thresholds: Arc<ThresholdEngine>,
    pub ingest: Arc<IngestRouter>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    init_tracing();
    dotenv().ok();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    tracing::info!("Attempting to connect to database");

    let pool = PgPoolOptions::new()
        .max_connections(cfg.db_pool_max)
        .connect(&cfg.db_url)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;

    tracing::info!("Successfully connected to database");

    schema::create_schema(&pool).await?;

    let sensors: Arc<dyn SensorStore> = Arc::new(PgSensorStore::new(pool.clone()));
    let readings: Arc<dyn ReadingStore> = Arc::new(PgReadingStore::new(pool.clone()));
    let bands = Arc::new(PgBandStore::new(pool.clone()));

    // Ingestion pipeline: broker connection, topic registry, router. The
    // event loop must be running before any subscribe call can complete.
    let (transport, event_loop) = mqtt::connect(&cfg);
    let registry = Arc::new(SubscriptionRegistry::new(Arc::new(transport)));
    let ingest = Arc::new(IngestRouter::new(
        TopicCodec::new(cfg.mqtt_topic_root.clone()),
        registry,
        sensors.clone(),
        readings.clone(),
    ));
    mqtt::spawn_event_loop(event_loop, ingest.clone());

    // A broker outage at boot is not fatal: the wildcard net and sensor
    // topics are re-attempted as sensors are touched through the API.
    if let Err(e) = ingest.start().await {
        tracing::error!("MQTT subscription bootstrap failed: {e}");
    }

    let engine = Arc::new(ThresholdEngine::new(bands));
    let dashboard = Arc::new(DashboardService::new(
        sensors.clone(),
        readings.clone(),
        engine.clone(),
    ));

    if cfg.reading_retention_days > 0 {
        spawn_retention_cleanup(readings.clone(), cfg.reading_retention_days);
    }

    // Build app from routes gateway (EMBP)
    let app: Router = routes::router(AppState {
        dashboard,
        thresholds: engine,
        ingest,
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], 8080));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ---

/// Periodically delete readings older than the retention window.
///
/// Runs hourly; a failed sweep is logged and retried on the next tick.
fn spawn_retention_cleanup(readings: Arc<dyn ReadingStore>, retention_days: u32) {
    // ---
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60 * 60));
        loop {
            ticker.tick().await;
            let cutoff = chrono::Utc::now() - chrono::Duration::days(i64::from(retention_days));
            match readings.delete_older_than(cutoff).await {
                Ok(0) => {}
                Ok(removed) => {
                    tracing::info!("Retention cleanup removed {removed} readings before {cutoff}");
                }
                Err(e) => tracing::error!("Retention cleanup failed: {e}"),
            }
        }
    });
}

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `AQUAFLOW_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by the `AQUAFLOW_LOG_LEVEL` env var
///
/// This should be called once at application startup before any logging
/// or tracing macros are invoked. It installs the subscriber globally
/// for the lifetime of the process.
fn init_tracing() {
    // ---
    let span_events = match env::var("AQUAFLOW_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    // Determine if we should use colors
    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    // Use RUST_LOG if available, otherwise fall back to AQUAFLOW_LOG_LEVEL
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("AQUAFLOW_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn,rumqttc=warn"))
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
