//! Database schema management for `aquaflow`.
//!
//! Ensures required tables and indexes exist before serving requests.
//! Applied once on startup from `main.rs` (EMBP: single gateway call).

use anyhow::Result;
use sqlx::PgPool;

// ---

/// Create or update the database schema (idempotent).
///
/// Creates the `sensors` catalog, the `sensor_readings` log written by the
/// ingestion router, and the `sensor_thresholds` band configuration. Safe
/// to call on every startup; no-op if objects already exist.
///
/// Errors are propagated if any SQL execution fails.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    // Sensor catalog. Row ownership (farm/device CRUD) belongs to the
    // management service; ingestion only reads the linkage columns.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sensors (
            id            UUID PRIMARY KEY,
            serial_number TEXT NOT NULL UNIQUE,
            sensor_type   TEXT NOT NULL,
            device_id     TEXT NOT NULL,
            farm_id       TEXT NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Reading log appended by the ingestion router.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sensor_readings (
            id        UUID PRIMARY KEY,
            sensor_id UUID NOT NULL REFERENCES sensors (id) ON DELETE CASCADE,
            value     DOUBLE PRECISION NOT NULL,
            timestamp TIMESTAMPTZ NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Severity band configuration, replaced wholesale per farm + type.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sensor_thresholds (
            id                   UUID PRIMARY KEY,
            farm_id              TEXT NOT NULL,
            sensor_type          TEXT NOT NULL,
            severity_level       TEXT NOT NULL,
            range_order          INTEGER NOT NULL,
            min_value            DOUBLE PRECISION,
            max_value            DOUBLE PRECISION,
            notification_enabled BOOLEAN NOT NULL DEFAULT TRUE,
            color_code           TEXT NOT NULL DEFAULT '#4caf50',
            label                TEXT NOT NULL DEFAULT 'Threshold'
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Basic indexes for common queries
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_sensor_readings_sensor_id_timestamp
            ON sensor_readings (sensor_id, timestamp DESC);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_sensors_farm_id
            ON sensors (farm_id);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_sensor_thresholds_band_key
            ON sensor_thresholds (farm_id, sensor_type, severity_level, range_order);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
