//! Per-farm dashboard aggregation.
//!
//! Consumes the threshold engine: each sensor type's latest-value average
//! is classified against the farm's bands (materializing defaults on
//! first access), and the band set doubles as the gauge ranges the
//! frontend renders around the averaged value.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use anyhow::Result;

use crate::store::{ReadingStore, SensorStore};
use crate::thresholds::{classify, Classification, Severity, ThresholdEngine};
use crate::{SensorIdentity, SeverityLevel, ThresholdBand};

// ---

/// One band projected for gauge rendering.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GaugeRange {
    // ---
    pub severity: SeverityLevel,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub color: String,
    pub label: String,
}

/// Aggregate block for one sensor type within a farm.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeSummary {
    // ---
    pub average: Option<f64>,
    pub sensors_count: usize,
    pub sensors_with_data_count: usize,
    /// Individual latest values feeding the average.
    pub values: Vec<f64>,
    pub severity: Severity,
    pub severity_color: String,
    pub severity_label: String,
    pub notification_enabled: bool,
    pub threshold_ranges: Vec<GaugeRange>,
    /// Gauge scale bounds: tightest configured band bounds, else the
    /// observed values, else 0..100.
    pub min_value: f64,
    pub max_value: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FarmSummary {
    // ---
    pub latest_timestamp: Option<DateTime<Utc>>,
    pub averages: BTreeMap<String, TypeSummary>,
    pub active_sensors_count: usize,
}

/// One point in a per-type time series.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesPoint {
    // ---
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TypeSeries {
    // ---
    #[serde(rename = "type")]
    pub sensor_type: String,
    pub data: Vec<SeriesPoint>,
}

// ---

pub struct DashboardService {
    // ---
    sensors: Arc<dyn SensorStore>,
    readings: Arc<dyn ReadingStore>,
    engine: Arc<ThresholdEngine>,
}

impl DashboardService {
    pub fn new(
        sensors: Arc<dyn SensorStore>,
        readings: Arc<dyn ReadingStore>,
        engine: Arc<ThresholdEngine>,
    ) -> Self {
        // ---
        DashboardService {
            sensors,
            readings,
            engine,
        }
    }

    /// Current state of a farm: per-type averages of each sensor's latest
    /// reading, classified and decorated with gauge ranges. A farm with no
    /// sensors yields an empty summary rather than an error.
    pub async fn farm_summary(&self, farm_id: &str) -> Result<FarmSummary> {
        // ---
        let sensors = self.sensors.list_by_farm(farm_id).await?;
        if sensors.is_empty() {
            return Ok(FarmSummary {
                latest_timestamp: None,
                averages: BTreeMap::new(),
                active_sensors_count: 0,
            });
        }

        let active_sensors_count = sensors.len();
        let by_type = group_by_type(sensors);

        let mut latest_timestamp: Option<DateTime<Utc>> = None;
        let mut averages = BTreeMap::new();

        for (sensor_type, sensors_of_type) in by_type {
            let mut values = Vec::new();
            for sensor in &sensors_of_type {
                if let Some(reading) = self.readings.latest_for(sensor.sensor_id).await? {
                    values.push(reading.value);
                    latest_timestamp = latest_timestamp
                        .map(|ts| ts.max(reading.timestamp))
                        .or(Some(reading.timestamp));
                }
            }

            let average = if values.is_empty() {
                None
            } else {
                Some(values.iter().sum::<f64>() / values.len() as f64)
            };

            let bands = self.engine.ensure_bands_exist(farm_id, &sensor_type).await?;
            let classification = match average {
                Some(avg) => classify(avg, &bands),
                None => Classification {
                    severity: Severity::Unknown,
                    color: "#9e9e9e".to_string(),
                    label: "No Data".to_string(),
                    notification_enabled: false,
                },
            };

            let threshold_ranges = gauge_ranges(&bands);
            let (min_value, max_value) = gauge_bounds(&threshold_ranges, &values);

            averages.insert(
                sensor_type,
                TypeSummary {
                    average,
                    sensors_count: sensors_of_type.len(),
                    sensors_with_data_count: values.len(),
                    values,
                    severity: classification.severity,
                    severity_color: classification.color,
                    severity_label: classification.label,
                    notification_enabled: classification.notification_enabled,
                    threshold_ranges,
                    min_value,
                    max_value,
                },
            );
        }

        Ok(FarmSummary {
            latest_timestamp,
            averages,
            active_sensors_count,
        })
    }

    /// Per-type reading series over the trailing `hours` window,
    /// optionally restricted to one sensor type.
    pub async fn farm_sensor_data(
        &self,
        farm_id: &str,
        hours: u32,
        sensor_type: Option<&str>,
    ) -> Result<Vec<TypeSeries>> {
        // ---
        let mut sensors = self.sensors.list_by_farm(farm_id).await?;
        if let Some(wanted) = sensor_type {
            sensors.retain(|s| s.sensor_type == wanted);
        }
        if sensors.is_empty() {
            return Ok(Vec::new());
        }

        let end = Utc::now();
        let start = end - Duration::hours(i64::from(hours));

        let mut series = Vec::new();
        for (sensor_type, sensors_of_type) in group_by_type(sensors) {
            let ids: Vec<_> = sensors_of_type.iter().map(|s| s.sensor_id).collect();
            let readings = self.readings.query_by_time_range(&ids, start, end).await?;
            series.push(TypeSeries {
                sensor_type,
                data: readings
                    .into_iter()
                    .map(|r| SeriesPoint {
                        timestamp: r.timestamp,
                        value: r.value,
                    })
                    .collect(),
            });
        }

        Ok(series)
    }
}

// ---

fn group_by_type(sensors: Vec<SensorIdentity>) -> BTreeMap<String, Vec<SensorIdentity>> {
    // ---
    let mut by_type: BTreeMap<String, Vec<SensorIdentity>> = BTreeMap::new();
    for sensor in sensors {
        by_type
            .entry(sensor.sensor_type.clone())
            .or_default()
            .push(sensor);
    }
    by_type
}

/// Bands projected for the gauge, sorted by severity priority so the
/// frontend draws critical arcs first.
fn gauge_ranges(bands: &[ThresholdBand]) -> Vec<GaugeRange> {
    // ---
    let mut ranges: Vec<GaugeRange> = bands
        .iter()
        .map(|band| GaugeRange {
            severity: band.severity_level,
            min: band.min_value,
            max: band.max_value,
            color: band.color_code.clone(),
            label: band.label.clone(),
        })
        .collect();
    ranges.sort_by_key(|r| r.severity.priority());
    ranges
}

/// Scale bounds for the gauge: band bounds when any are set, observed
/// values otherwise, 0..100 when there is nothing at all.
fn gauge_bounds(ranges: &[GaugeRange], values: &[f64]) -> (f64, f64) {
    // ---
    let band_mins: Vec<f64> = ranges.iter().filter_map(|r| r.min).collect();
    let band_maxes: Vec<f64> = ranges.iter().filter_map(|r| r.max).collect();

    let min_value = band_mins
        .iter()
        .copied()
        .fold(f64::INFINITY, f64::min);
    let min_value = if min_value.is_finite() {
        min_value
    } else {
        values.iter().copied().fold(f64::INFINITY, f64::min)
    };
    let min_value = if min_value.is_finite() { min_value } else { 0.0 };

    let max_value = band_maxes
        .iter()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);
    let max_value = if max_value.is_finite() {
        max_value
    } else {
        values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    };
    let max_value = if max_value.is_finite() { max_value } else { 100.0 };

    (min_value, max_value)
}
