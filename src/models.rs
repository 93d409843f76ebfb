//! Core data models for the water-quality pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---

/// Immutable identity of a sensor, as needed to compute its MQTT topics.
///
/// Authoritative storage lives in the sensor store; this is the projection
/// the ingestion layer works with.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct SensorIdentity {
    // ---
    pub sensor_id: Uuid,
    pub serial_number: String,
    /// Open set of type names (`pH`, `Temperature`, ...); lowercased when
    /// embedded in topic strings.
    pub sensor_type: String,
    pub device_id: String,
    pub farm_id: String,
}

/// Normalized result of decoding one inbound message payload.
///
/// Transient: produced by the payload parser, consumed immediately by the
/// ingestion router, never stored as-is.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReading {
    // ---
    /// Always finite.
    pub value: f64,
    /// `None` means "use ingestion time".
    pub timestamp: Option<DateTime<Utc>>,
    pub serial_number: Option<String>,
    pub sensor_type: Option<String>,
    pub device_id: Option<String>,
    pub farm_id: Option<String>,
}

impl ParsedReading {
    /// A reading carrying only a value, as produced by bare-numeric payloads.
    pub fn bare(value: f64) -> Self {
        // ---
        ParsedReading {
            value,
            timestamp: None,
            serial_number: None,
            sensor_type: None,
            device_id: None,
            farm_id: None,
        }
    }
}

/// Persisted sensor reading. Immutable once written; removed only by
/// age-based retention cleanup.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SensorReading {
    // ---
    pub id: Uuid,
    pub sensor_id: Uuid,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

// ---

/// Severity level carried by a configured threshold band.
///
/// Classification outcomes additionally allow "unknown" (no band matched);
/// see `thresholds::Classification`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum SeverityLevel {
    Critical,
    Warning,
    Normal,
}

impl SeverityLevel {
    /// Evaluation priority: critical bands are checked before warning, and
    /// warning before normal, regardless of range width.
    pub fn priority(self) -> u8 {
        // ---
        match self {
            SeverityLevel::Critical => 1,
            SeverityLevel::Warning => 2,
            SeverityLevel::Normal => 3,
        }
    }

}

/// One numeric range bound to a severity level for a farm + sensor type.
///
/// `(farm_id, sensor_type, severity_level, range_order)` is unique;
/// `range_order` disambiguates multiple bands sharing a severity (e.g. a
/// "too cold" and a "too hot" band that are both critical). `None` bounds
/// are unbounded on that side. Band sets for one type need not be
/// contiguous or exhaustive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdBand {
    // ---
    pub id: Uuid,
    pub farm_id: String,
    pub sensor_type: String,
    pub severity_level: SeverityLevel,
    pub range_order: i32,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub notification_enabled: bool,
    pub color_code: String,
    pub label: String,
}

impl ThresholdBand {
    /// Whether `value` falls inside this band. Unset bounds always pass;
    /// both bounds are inclusive.
    pub fn contains(&self, value: f64) -> bool {
        // ---
        let min_ok = self.min_value.is_none_or(|min| value >= min);
        let max_ok = self.max_value.is_none_or(|max| value <= max);
        min_ok && max_ok
    }
}
