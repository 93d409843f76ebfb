//! Severity threshold engine.
//!
//! Turns raw values into categorized, color-coded, notification-eligible
//! states by walking a farm's configured bands in severity-priority order.
//! Farms with no configuration get per-farm copies of the default band
//! tables materialized lazily on first access, so every farm ends up with
//! an editable set instead of perpetually reading shared defaults.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use anyhow::Result;

use crate::store::BandStore;
use crate::{SeverityLevel, ThresholdBand};

// ---

/// Neutral fallback when a value matches no configured band.
const UNKNOWN_COLOR: &str = "#9e9e9e";
const UNKNOWN_LABEL: &str = "Out of Range";

const DEFAULT_COLOR: &str = "#4caf50";
const DEFAULT_LABEL: &str = "Threshold";

/// Classification outcome. Unlike [`SeverityLevel`], allows `unknown` for
/// values outside every configured band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Normal,
    Unknown,
}

impl From<SeverityLevel> for Severity {
    fn from(level: SeverityLevel) -> Self {
        // ---
        match level {
            SeverityLevel::Critical => Severity::Critical,
            SeverityLevel::Warning => Severity::Warning,
            SeverityLevel::Normal => Severity::Normal,
        }
    }
}

/// Result of classifying one value against a band set.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    // ---
    pub severity: Severity,
    pub color: String,
    pub label: String,
    pub notification_enabled: bool,
}

impl Classification {
    fn unknown() -> Self {
        // ---
        Classification {
            severity: Severity::Unknown,
            color: UNKNOWN_COLOR.to_string(),
            label: UNKNOWN_LABEL.to_string(),
            notification_enabled: false,
        }
    }
}

/// Classify `value` against `bands`. Total: always returns a result.
///
/// Bands are walked sorted by severity priority (critical before warning
/// before normal), ties broken by `range_order` ascending; the first band
/// containing the value wins. Severity, not range width, drives precedence:
/// an unbounded "too cold = critical" band beats a "normal" band that also
/// covers the value when ranges are misconfigured to overlap.
pub fn classify(value: f64, bands: &[ThresholdBand]) -> Classification {
    // ---
    let mut sorted: Vec<&ThresholdBand> = bands.iter().collect();
    sorted.sort_by_key(|b| (b.severity_level.priority(), b.range_order));

    for band in sorted {
        if band.contains(value) {
            return Classification {
                severity: band.severity_level.into(),
                color: band.color_code.clone(),
                label: band.label.clone(),
                notification_enabled: band.notification_enabled,
            };
        }
    }

    Classification::unknown()
}

// ---

/// Caller-supplied band description for a wholesale replace. `range_order`
/// is never taken from the caller; it is synthesized from list position.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BandSpec {
    // ---
    pub severity_level: SeverityLevel,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    #[serde(default)]
    pub notification_enabled: Option<bool>,
    #[serde(default)]
    pub color_code: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}

/// Malformed band list, rejected before any write happens.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum BandConfigurationError {
    // ---
    #[error("band list must not be empty")]
    EmptyBandList,
    #[error("band {index}: bound is not a finite number")]
    NonFiniteBound { index: usize },
    #[error("band {index}: min {min} exceeds max {max}")]
    InvertedRange { index: usize, min: f64, max: f64 },
}

/// Validate specs and build the persistable band rows for one farm + type.
///
/// Within each severity group the caller-supplied order is preserved:
/// a band's `range_order` is the count of earlier bands in the same input
/// list sharing its severity, which also keeps the unique key tuple
/// collision-free.
fn materialize(
    farm_id: &str,
    sensor_type: &str,
    specs: &[BandSpec],
) -> Result<Vec<ThresholdBand>, BandConfigurationError> {
    // ---
    if specs.is_empty() {
        return Err(BandConfigurationError::EmptyBandList);
    }

    for (index, spec) in specs.iter().enumerate() {
        let finite = |bound: Option<f64>| bound.is_none_or(f64::is_finite);
        if !finite(spec.min_value) || !finite(spec.max_value) {
            return Err(BandConfigurationError::NonFiniteBound { index });
        }
        if let (Some(min), Some(max)) = (spec.min_value, spec.max_value) {
            if min > max {
                return Err(BandConfigurationError::InvertedRange { index, min, max });
            }
        }
    }

    Ok(specs
        .iter()
        .enumerate()
        .map(|(index, spec)| {
            let range_order = specs[..index]
                .iter()
                .filter(|prior| prior.severity_level == spec.severity_level)
                .count() as i32;

            ThresholdBand {
                id: Uuid::new_v4(),
                farm_id: farm_id.to_string(),
                sensor_type: sensor_type.to_string(),
                severity_level: spec.severity_level,
                range_order,
                min_value: spec.min_value,
                max_value: spec.max_value,
                notification_enabled: spec.notification_enabled.unwrap_or(true),
                color_code: spec
                    .color_code
                    .clone()
                    .unwrap_or_else(|| DEFAULT_COLOR.to_string()),
                label: spec.label.clone().unwrap_or_else(|| DEFAULT_LABEL.to_string()),
            }
        })
        .collect())
}

// ---

struct DefaultBand {
    // ---
    severity: SeverityLevel,
    min: Option<f64>,
    max: Option<f64>,
    color: &'static str,
    label: &'static str,
}

const CRITICAL_COLOR: &str = "#f44336";
const WARNING_COLOR: &str = "#ffeb3b";
const NORMAL_COLOR: &str = "#4caf50";

macro_rules! band {
    ($severity:ident, $min:expr, $max:expr, $color:expr, $label:expr) => {
        DefaultBand {
            severity: SeverityLevel::$severity,
            min: $min,
            max: $max,
            color: $color,
            label: $label,
        }
    };
}

/// Fallback band tables keyed by canonical sensor-type name, matched
/// case-insensitively. Adding a sensor type is a data change here, not a
/// new code path.
fn default_table(sensor_type: &str) -> &'static [DefaultBand] {
    // ---
    match sensor_type.to_lowercase().as_str() {
        "ph" => &[
            band!(Critical, None, Some(7.5), CRITICAL_COLOR, "Critical Acidic"),
            band!(Warning, Some(7.6), Some(7.8), WARNING_COLOR, "Good Low"),
            band!(Normal, Some(7.9), Some(8.2), NORMAL_COLOR, "Optimal"),
            band!(Warning, Some(8.3), Some(8.4), WARNING_COLOR, "Good High"),
            band!(Critical, Some(8.5), None, CRITICAL_COLOR, "Critical Basic"),
        ],
        "temperature" => &[
            band!(Critical, None, Some(24.9), CRITICAL_COLOR, "Critical Cold"),
            band!(Warning, Some(25.0), Some(27.9), WARNING_COLOR, "Below Optimal"),
            band!(Normal, Some(28.0), Some(31.0), NORMAL_COLOR, "Optimal"),
            band!(Warning, Some(31.1), Some(33.0), WARNING_COLOR, "Above Optimal"),
            band!(Critical, Some(33.1), None, CRITICAL_COLOR, "Critical Hot"),
        ],
        "dissolvedoxygen" => &[
            band!(Critical, None, Some(3.0), CRITICAL_COLOR, "Critical Low"),
            band!(Warning, Some(3.1), Some(4.9), WARNING_COLOR, "Low"),
            band!(Normal, Some(5.0), Some(8.0), NORMAL_COLOR, "Optimal"),
            band!(Warning, Some(8.1), Some(10.0), WARNING_COLOR, "High"),
            band!(Critical, Some(10.1), None, CRITICAL_COLOR, "Supersaturated"),
        ],
        "salinity" => &[
            band!(Critical, None, Some(5.0), CRITICAL_COLOR, "Critical Low"),
            band!(Warning, Some(5.1), Some(9.9), WARNING_COLOR, "Low"),
            band!(Normal, Some(10.0), Some(25.0), NORMAL_COLOR, "Optimal"),
            band!(Warning, Some(25.1), Some(30.0), WARNING_COLOR, "High"),
            band!(Critical, Some(30.1), None, CRITICAL_COLOR, "Critical High"),
        ],
        "ammonia" => &[
            band!(Normal, None, Some(0.1), NORMAL_COLOR, "Safe"),
            band!(Warning, Some(0.11), Some(0.5), WARNING_COLOR, "Elevated"),
            band!(Critical, Some(0.51), None, CRITICAL_COLOR, "Toxic"),
        ],
        "nitrite" => &[
            band!(Normal, None, Some(0.25), NORMAL_COLOR, "Safe"),
            band!(Warning, Some(0.26), Some(1.0), WARNING_COLOR, "Elevated"),
            band!(Critical, Some(1.01), None, CRITICAL_COLOR, "Toxic"),
        ],
        "turbidity" => &[
            band!(Normal, None, Some(50.0), NORMAL_COLOR, "Acceptable"),
            band!(Warning, Some(50.1), Some(100.0), WARNING_COLOR, "High"),
            band!(Critical, Some(100.1), None, CRITICAL_COLOR, "Severe"),
        ],
        // Unknown sensor types: everything is normal until configured.
        _ => &[band!(Normal, None, None, NORMAL_COLOR, "Normal")],
    }
}

/// Hardcoded fallback bands for a sensor type, with `range_order`
/// synthesized per severity group. `farm_id` is left empty; callers
/// materializing per-farm copies scope them first.
pub fn default_bands(sensor_type: &str) -> Vec<ThresholdBand> {
    // ---
    let table = default_table(sensor_type);
    table
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let range_order = table[..index]
                .iter()
                .filter(|prior| prior.severity == entry.severity)
                .count() as i32;

            ThresholdBand {
                id: Uuid::new_v4(),
                farm_id: String::new(),
                sensor_type: sensor_type.to_string(),
                severity_level: entry.severity,
                range_order,
                min_value: entry.min,
                max_value: entry.max,
                notification_enabled: true,
                color_code: entry.color.to_string(),
                label: entry.label.to_string(),
            }
        })
        .collect()
}

// ---

/// Band configuration service over the persisted store.
pub struct ThresholdEngine {
    // ---
    bands: Arc<dyn BandStore>,
}

impl ThresholdEngine {
    pub fn new(bands: Arc<dyn BandStore>) -> Self {
        // ---
        ThresholdEngine { bands }
    }

    /// All configured bands for a farm.
    pub async fn thresholds_by_farm(&self, farm_id: &str) -> Result<Vec<ThresholdBand>> {
        // ---
        self.bands.find_by_farm(farm_id).await
    }

    /// Bands for a farm + type, materializing per-farm defaults on first
    /// access when none are configured yet.
    pub async fn ensure_bands_exist(
        &self,
        farm_id: &str,
        sensor_type: &str,
    ) -> Result<Vec<ThresholdBand>> {
        // ---
        let existing = self.bands.find_for(farm_id, sensor_type).await?;
        if !existing.is_empty() {
            return Ok(existing);
        }

        let mut defaults = default_bands(sensor_type);
        for band in &mut defaults {
            band.farm_id = farm_id.to_string();
        }

        self.bands.replace(farm_id, sensor_type, defaults).await
    }

    /// Transactional wholesale replacement of a farm + type's bands.
    /// Validation failures reject the whole list before anything is
    /// written; these propagate to the caller, unlike per-message errors.
    pub async fn replace_bands(
        &self,
        farm_id: &str,
        sensor_type: &str,
        specs: &[BandSpec],
    ) -> Result<Vec<ThresholdBand>, ReplaceError> {
        // ---
        let bands = materialize(farm_id, sensor_type, specs)?;
        self.bands
            .replace(farm_id, sensor_type, bands)
            .await
            .map_err(ReplaceError::Store)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReplaceError {
    // ---
    #[error(transparent)]
    Invalid(#[from] BandConfigurationError),
    #[error("failed to persist bands: {0}")]
    Store(#[source] anyhow::Error),
}
