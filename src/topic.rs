//! MQTT topic codec for sensor addressing.
//!
//! A sensor is reachable under three independent addressing schemes, so a
//! publisher can use whichever metadata it has on hand:
//! - hierarchical: `{root}/{farm_id}/device/{device_id}/sensor/{type}`
//! - direct by serial: `sensor/{serial_number}`
//! - type-grouped: `sensors/{type}/{serial_number}`
//!
//! `topics_for` expands an identity into all three; `parse_topic` is the
//! best-effort inverse used only when no registry mapping exists for an
//! inbound topic. Pure functions, no state beyond the configured root.

use crate::SensorIdentity;

// ---

/// Partial identity hints recovered from a topic string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicHints {
    // ---
    pub farm_id: Option<String>,
    pub device_id: Option<String>,
    pub sensor_type: Option<String>,
    pub serial_number: Option<String>,
}

/// Topic encoder/decoder parameterized by the hierarchical root segment
/// (e.g. `shrimp_farm`).
#[derive(Debug, Clone)]
pub struct TopicCodec {
    // ---
    root: String,
}

impl TopicCodec {
    pub fn new(root: impl Into<String>) -> Self {
        // ---
        TopicCodec { root: root.into() }
    }

    /// All topics a sensor should be subscribed on, hierarchical scheme
    /// first. Sensor type is lowercased in topic strings.
    pub fn topics_for(&self, identity: &SensorIdentity) -> Vec<String> {
        // ---
        vec![
            format!(
                "{}/{}/device/{}/sensor/{}",
                self.root,
                identity.farm_id,
                identity.device_id,
                identity.sensor_type.to_lowercase()
            ),
            format!("sensor/{}", identity.serial_number),
            format!(
                "sensors/{}/{}",
                identity.sensor_type.to_lowercase(),
                identity.serial_number
            ),
        ]
    }

    /// The three broad wildcard patterns subscribed at startup as a
    /// catch-all net over the per-sensor topics.
    pub fn wildcard_patterns(&self) -> Vec<String> {
        // ---
        vec![
            format!("{}/+/device/+/sensor/+", self.root),
            "sensor/+".to_string(),
            "sensors/+/+".to_string(),
        ]
    }

    /// Parse an inbound topic back into identity hints.
    ///
    /// The three pattern shapes are tried in the same order `topics_for`
    /// emits them; the first structural match (segment count and literal
    /// anchors) wins. Returns empty hints when none match. Best-effort
    /// only: the registry's direct mapping is authoritative when present.
    pub fn parse_topic(&self, topic: &str) -> TopicHints {
        // ---
        let segments: Vec<&str> = topic.split('/').collect();

        match segments.as_slice() {
            [root, farm_id, "device", device_id, "sensor", sensor_type]
                if *root == self.root
                    && !farm_id.is_empty()
                    && !device_id.is_empty()
                    && !sensor_type.is_empty() =>
            {
                TopicHints {
                    farm_id: Some((*farm_id).to_string()),
                    device_id: Some((*device_id).to_string()),
                    sensor_type: Some((*sensor_type).to_string()),
                    serial_number: None,
                }
            }
            ["sensor", serial_number] if !serial_number.is_empty() => TopicHints {
                serial_number: Some((*serial_number).to_string()),
                ..TopicHints::default()
            },
            ["sensors", sensor_type, serial_number]
                if !sensor_type.is_empty() && !serial_number.is_empty() =>
            {
                TopicHints {
                    sensor_type: Some((*sensor_type).to_string()),
                    serial_number: Some((*serial_number).to_string()),
                    ..TopicHints::default()
                }
            }
            _ => TopicHints::default(),
        }
    }
}
