//! Persistence collaborators for the ingestion and classification core.
//!
//! The core only sees these traits; production wires the PostgreSQL
//! implementations below, unit tests wire the in-memory doubles from
//! `testing`. Farm/device/user CRUD lives in a separate service and is
//! not modeled here beyond the linkage columns the core needs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use anyhow::Result;

use crate::{SensorIdentity, SensorReading, ThresholdBand};

// ---

/// Read-side of the externally owned sensor catalog.
#[async_trait]
pub trait SensorStore: Send + Sync {
    // ---
    async fn find_by_id(&self, id: Uuid) -> Result<Option<SensorIdentity>>;
    async fn find_by_serial_number(&self, serial: &str) -> Result<Option<SensorIdentity>>;
    /// Page through all sensors; `page` is 1-based.
    async fn list_all(&self, page: u32, limit: u32) -> Result<Vec<SensorIdentity>>;
    async fn list_by_farm(&self, farm_id: &str) -> Result<Vec<SensorIdentity>>;
}

/// Persisted reading log.
#[async_trait]
pub trait ReadingStore: Send + Sync {
    // ---
    async fn insert(
        &self,
        sensor_id: Uuid,
        value: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<SensorReading>;
    async fn query_by_time_range(
        &self,
        sensor_ids: &[Uuid],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SensorReading>>;
    async fn latest_for(&self, sensor_id: Uuid) -> Result<Option<SensorReading>>;
    /// Age-based retention cleanup; returns the number of rows removed.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// Threshold band configuration per farm + sensor type.
#[async_trait]
pub trait BandStore: Send + Sync {
    // ---
    /// Bands for one farm + type, ordered by severity priority then
    /// range order.
    async fn find_for(&self, farm_id: &str, sensor_type: &str) -> Result<Vec<ThresholdBand>>;
    /// All bands for a farm, ordered by type, severity, range order.
    async fn find_by_farm(&self, farm_id: &str) -> Result<Vec<ThresholdBand>>;
    /// Wholesale replacement: delete everything for the farm + type, then
    /// insert `bands`, atomically. A concurrent reader sees either the old
    /// set or the new set, never neither.
    async fn replace(
        &self,
        farm_id: &str,
        sensor_type: &str,
        bands: Vec<ThresholdBand>,
    ) -> Result<Vec<ThresholdBand>>;
}

// ---

const SENSOR_COLUMNS: &str =
    "id AS sensor_id, serial_number, sensor_type, device_id, farm_id";

pub struct PgSensorStore {
    // ---
    pool: PgPool,
}

impl PgSensorStore {
    pub fn new(pool: PgPool) -> Self {
        PgSensorStore { pool }
    }
}

#[async_trait]
impl SensorStore for PgSensorStore {
    // ---
    async fn find_by_id(&self, id: Uuid) -> Result<Option<SensorIdentity>> {
        // ---
        let sensor = sqlx::query_as::<_, SensorIdentity>(&format!(
            "SELECT {SENSOR_COLUMNS} FROM sensors WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(sensor)
    }

    async fn find_by_serial_number(&self, serial: &str) -> Result<Option<SensorIdentity>> {
        // ---
        let sensor = sqlx::query_as::<_, SensorIdentity>(&format!(
            "SELECT {SENSOR_COLUMNS} FROM sensors WHERE serial_number = $1"
        ))
        .bind(serial)
        .fetch_optional(&self.pool)
        .await?;
        Ok(sensor)
    }

    async fn list_all(&self, page: u32, limit: u32) -> Result<Vec<SensorIdentity>> {
        // ---
        let offset = i64::from(page.saturating_sub(1)) * i64::from(limit);
        let sensors = sqlx::query_as::<_, SensorIdentity>(&format!(
            "SELECT {SENSOR_COLUMNS} FROM sensors ORDER BY serial_number LIMIT $1 OFFSET $2"
        ))
        .bind(i64::from(limit))
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(sensors)
    }

    async fn list_by_farm(&self, farm_id: &str) -> Result<Vec<SensorIdentity>> {
        // ---
        let sensors = sqlx::query_as::<_, SensorIdentity>(&format!(
            "SELECT {SENSOR_COLUMNS} FROM sensors WHERE farm_id = $1 ORDER BY serial_number"
        ))
        .bind(farm_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(sensors)
    }
}

pub struct PgReadingStore {
    // ---
    pool: PgPool,
}

impl PgReadingStore {
    pub fn new(pool: PgPool) -> Self {
        PgReadingStore { pool }
    }
}

#[async_trait]
impl ReadingStore for PgReadingStore {
    // ---
    async fn insert(
        &self,
        sensor_id: Uuid,
        value: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<SensorReading> {
        // ---
        let reading = SensorReading {
            id: Uuid::new_v4(),
            sensor_id,
            value,
            timestamp,
        };

        sqlx::query(
            r#"
            INSERT INTO sensor_readings (id, sensor_id, value, timestamp)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(reading.id)
        .bind(reading.sensor_id)
        .bind(reading.value)
        .bind(reading.timestamp)
        .execute(&self.pool)
        .await?;

        Ok(reading)
    }

    async fn query_by_time_range(
        &self,
        sensor_ids: &[Uuid],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SensorReading>> {
        // ---
        let readings = sqlx::query_as::<_, SensorReading>(
            r#"
            SELECT id, sensor_id, value, timestamp
            FROM sensor_readings
            WHERE sensor_id = ANY($1) AND timestamp BETWEEN $2 AND $3
            ORDER BY timestamp
            "#,
        )
        .bind(sensor_ids)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        Ok(readings)
    }

    async fn latest_for(&self, sensor_id: Uuid) -> Result<Option<SensorReading>> {
        // ---
        let reading = sqlx::query_as::<_, SensorReading>(
            r#"
            SELECT id, sensor_id, value, timestamp
            FROM sensor_readings
            WHERE sensor_id = $1
            ORDER BY timestamp DESC
            LIMIT 1
            "#,
        )
        .bind(sensor_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(reading)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        // ---
        let result = sqlx::query("DELETE FROM sensor_readings WHERE timestamp < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

pub struct PgBandStore {
    // ---
    pool: PgPool,
}

impl PgBandStore {
    pub fn new(pool: PgPool) -> Self {
        PgBandStore { pool }
    }
}

const BAND_COLUMNS: &str = "id, farm_id, sensor_type, severity_level, range_order, \
     min_value, max_value, notification_enabled, color_code, label";

#[async_trait]
impl BandStore for PgBandStore {
    // ---
    async fn find_for(&self, farm_id: &str, sensor_type: &str) -> Result<Vec<ThresholdBand>> {
        // ---
        let bands = sqlx::query_as::<_, ThresholdBand>(&format!(
            r#"
            SELECT {BAND_COLUMNS}
            FROM sensor_thresholds
            WHERE farm_id = $1 AND sensor_type = $2
            ORDER BY CASE severity_level
                         WHEN 'critical' THEN 1
                         WHEN 'warning' THEN 2
                         ELSE 3
                     END,
                     range_order
            "#
        ))
        .bind(farm_id)
        .bind(sensor_type)
        .fetch_all(&self.pool)
        .await?;
        Ok(bands)
    }

    async fn find_by_farm(&self, farm_id: &str) -> Result<Vec<ThresholdBand>> {
        // ---
        let bands = sqlx::query_as::<_, ThresholdBand>(&format!(
            r#"
            SELECT {BAND_COLUMNS}
            FROM sensor_thresholds
            WHERE farm_id = $1
            ORDER BY sensor_type, severity_level, range_order
            "#
        ))
        .bind(farm_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(bands)
    }

    async fn replace(
        &self,
        farm_id: &str,
        sensor_type: &str,
        bands: Vec<ThresholdBand>,
    ) -> Result<Vec<ThresholdBand>> {
        // ---
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM sensor_thresholds WHERE farm_id = $1 AND sensor_type = $2")
            .bind(farm_id)
            .bind(sensor_type)
            .execute(&mut *tx)
            .await?;

        for band in &bands {
            sqlx::query(
                r#"
                INSERT INTO sensor_thresholds
                    (id, farm_id, sensor_type, severity_level, range_order,
                     min_value, max_value, notification_enabled, color_code, label)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(band.id)
            .bind(&band.farm_id)
            .bind(&band.sensor_type)
            .bind(band.severity_level)
            .bind(band.range_order)
            .bind(band.min_value)
            .bind(band.max_value)
            .bind(band.notification_enabled)
            .bind(&band.color_code)
            .bind(&band.label)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(bands)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory store doubles for unit tests.
    // ---
    use std::sync::Mutex as StdMutex;

    use super::*;

    #[derive(Default)]
    pub struct MemorySensorStore {
        // ---
        sensors: StdMutex<Vec<SensorIdentity>>,
    }

    impl MemorySensorStore {
        pub fn with(sensors: Vec<SensorIdentity>) -> Self {
            MemorySensorStore {
                sensors: StdMutex::new(sensors),
            }
        }
    }

    #[async_trait]
    impl SensorStore for MemorySensorStore {
        // ---
        async fn find_by_id(&self, id: Uuid) -> Result<Option<SensorIdentity>> {
            let sensors = self.sensors.lock().unwrap();
            Ok(sensors.iter().find(|s| s.sensor_id == id).cloned())
        }

        async fn find_by_serial_number(&self, serial: &str) -> Result<Option<SensorIdentity>> {
            let sensors = self.sensors.lock().unwrap();
            Ok(sensors.iter().find(|s| s.serial_number == serial).cloned())
        }

        async fn list_all(&self, page: u32, limit: u32) -> Result<Vec<SensorIdentity>> {
            let sensors = self.sensors.lock().unwrap();
            let offset = (page.saturating_sub(1) as usize) * limit as usize;
            Ok(sensors
                .iter()
                .skip(offset)
                .take(limit as usize)
                .cloned()
                .collect())
        }

        async fn list_by_farm(&self, farm_id: &str) -> Result<Vec<SensorIdentity>> {
            let sensors = self.sensors.lock().unwrap();
            Ok(sensors
                .iter()
                .filter(|s| s.farm_id == farm_id)
                .cloned()
                .collect())
        }
    }

    #[derive(Default)]
    pub struct MemoryReadingStore {
        // ---
        readings: StdMutex<Vec<SensorReading>>,
    }

    impl MemoryReadingStore {
        pub fn all(&self) -> Vec<SensorReading> {
            self.readings.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ReadingStore for MemoryReadingStore {
        // ---
        async fn insert(
            &self,
            sensor_id: Uuid,
            value: f64,
            timestamp: DateTime<Utc>,
        ) -> Result<SensorReading> {
            let reading = SensorReading {
                id: Uuid::new_v4(),
                sensor_id,
                value,
                timestamp,
            };
            self.readings.lock().unwrap().push(reading.clone());
            Ok(reading)
        }

        async fn query_by_time_range(
            &self,
            sensor_ids: &[Uuid],
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> Result<Vec<SensorReading>> {
            let mut readings: Vec<SensorReading> = self
                .readings
                .lock()
                .unwrap()
                .iter()
                .filter(|r| {
                    sensor_ids.contains(&r.sensor_id) && r.timestamp >= start && r.timestamp <= end
                })
                .cloned()
                .collect();
            readings.sort_by_key(|r| r.timestamp);
            Ok(readings)
        }

        async fn latest_for(&self, sensor_id: Uuid) -> Result<Option<SensorReading>> {
            let readings = self.readings.lock().unwrap();
            Ok(readings
                .iter()
                .filter(|r| r.sensor_id == sensor_id)
                .max_by_key(|r| r.timestamp)
                .cloned())
        }

        async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
            let mut readings = self.readings.lock().unwrap();
            let before = readings.len();
            readings.retain(|r| r.timestamp >= cutoff);
            Ok((before - readings.len()) as u64)
        }
    }

    #[derive(Default)]
    pub struct MemoryBandStore {
        // ---
        bands: StdMutex<Vec<ThresholdBand>>,
    }

    #[async_trait]
    impl BandStore for MemoryBandStore {
        // ---
        async fn find_for(&self, farm_id: &str, sensor_type: &str) -> Result<Vec<ThresholdBand>> {
            let bands = self.bands.lock().unwrap();
            let mut found: Vec<ThresholdBand> = bands
                .iter()
                .filter(|b| b.farm_id == farm_id && b.sensor_type == sensor_type)
                .cloned()
                .collect();
            found.sort_by_key(|b| (b.severity_level.priority(), b.range_order));
            Ok(found)
        }

        async fn find_by_farm(&self, farm_id: &str) -> Result<Vec<ThresholdBand>> {
            let bands = self.bands.lock().unwrap();
            let mut found: Vec<ThresholdBand> = bands
                .iter()
                .filter(|b| b.farm_id == farm_id)
                .cloned()
                .collect();
            found.sort_by(|a, b| {
                (&a.sensor_type, a.severity_level.priority(), a.range_order)
                    .cmp(&(&b.sensor_type, b.severity_level.priority(), b.range_order))
            });
            Ok(found)
        }

        async fn replace(
            &self,
            farm_id: &str,
            sensor_type: &str,
            new_bands: Vec<ThresholdBand>,
        ) -> Result<Vec<ThresholdBand>> {
            let mut bands = self.bands.lock().unwrap();
            bands.retain(|b| !(b.farm_id == farm_id && b.sensor_type == sensor_type));
            bands.extend(new_bands.iter().cloned());
            Ok(new_bands)
        }
    }
}
