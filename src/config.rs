//! Configuration loader for the `aquaflow` backend service.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). By consolidating configuration logic here, we
//! avoid scattering `env::var` calls throughout the codebase.

use std::env;

use anyhow::{anyhow, Result};

/// Parse an optional integer environment variable with a default value.
macro_rules! parse_env_u32 {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.parse::<u32>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse a required string environment variable.
macro_rules! require_env {
    ($var_name:expr) => {
        env::var($var_name)
            .map_err(|_| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

/// Read an optional string environment variable with a default value.
macro_rules! env_or {
    ($var_name:expr, $default:expr) => {
        env::var($var_name).unwrap_or_else(|_| $default.to_string())
    };
}

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// PostgreSQL connection string.
    pub db_url: String,

    /// Maximum number of database connections in the pool.
    pub db_pool_max: u32,

    /// MQTT broker host.
    pub mqtt_host: String,

    /// MQTT broker port.
    pub mqtt_port: u16,

    /// Client id presented to the broker.
    pub mqtt_client_id: String,

    /// Root segment of the hierarchical topic scheme.
    pub mqtt_topic_root: String,

    /// Age-based reading retention in days; 0 disables cleanup.
    pub reading_retention_days: u32,
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `DATABASE_URL` – PostgreSQL connection string
///
/// Optional:
/// - `DB_POOL_MAX` – max DB connections (default: 5)
/// - `MQTT_HOST` – broker host (default: `localhost`)
/// - `MQTT_PORT` – broker port (default: 1883)
/// - `MQTT_CLIENT_ID` – broker client id (default: `aquaflow`)
/// - `MQTT_TOPIC_ROOT` – hierarchical topic root (default: `shrimp_farm`)
/// - `READING_RETENTION_DAYS` – delete readings older than this; 0 keeps
///   everything (default: 0)
///
/// Returns an error if any required variable is missing or invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let db_url = require_env!("DATABASE_URL");
    let db_pool_max = parse_env_u32!("DB_POOL_MAX", 5);
    let mqtt_host = env_or!("MQTT_HOST", "localhost");
    let mqtt_port = u16::try_from(parse_env_u32!("MQTT_PORT", 1883))
        .map_err(|_| anyhow!("Invalid MQTT_PORT: out of range"))?;
    let mqtt_client_id = env_or!("MQTT_CLIENT_ID", "aquaflow");
    let mqtt_topic_root = env_or!("MQTT_TOPIC_ROOT", "shrimp_farm");
    let reading_retention_days = parse_env_u32!("READING_RETENTION_DAYS", 0);

    Ok(Config {
        db_url,
        db_pool_max,
        mqtt_host,
        mqtt_port,
        mqtt_client_id,
        mqtt_topic_root,
        reading_retention_days,
    })
}

impl Config {
    /// Log the loaded configuration for debugging purposes.
    ///
    /// Masks sensitive information like database passwords while showing
    /// all configuration values that were loaded.
    pub fn log_config(&self) {
        // ---
        // Mask the password in the database URL for security
        let masked_db_url = if let Some(at_pos) = self.db_url.rfind('@') {
            if let Some(colon_pos) = self.db_url[..at_pos].rfind(':') {
                format!(
                    "{}:****{}",
                    &self.db_url[..colon_pos],
                    &self.db_url[at_pos..]
                )
            } else {
                self.db_url.clone()
            }
        } else {
            self.db_url.clone()
        };

        tracing::info!("Configuration loaded:");
        tracing::info!("  DATABASE_URL           : {}", masked_db_url);
        tracing::info!("  DB_POOL_MAX            : {}", self.db_pool_max);
        tracing::info!("  MQTT_HOST              : {}", self.mqtt_host);
        tracing::info!("  MQTT_PORT              : {}", self.mqtt_port);
        tracing::info!("  MQTT_CLIENT_ID         : {}", self.mqtt_client_id);
        tracing::info!("  MQTT_TOPIC_ROOT        : {}", self.mqtt_topic_root);
        tracing::info!("  READING_RETENTION_DAYS : {}", self.reading_retention_days);
    }
}
