//! Ingestion router: inbound `(topic, payload)` pairs to persisted readings.
//!
//! Resolution is two-path. The registry's topic → sensor mapping is the
//! fast path, avoiding a store round-trip once a sensor is known. When a
//! message arrives on a wildcard-matched topic the registry never indexed
//! (e.g. a device publishing under a serial it wasn't provisioned with
//! yet), the fallback path derives a serial number from payload metadata
//! or topic hints and looks the sensor up in the store.
//!
//! A bad message must never take down the subscriber loop: `handle` logs
//! each failure with its typed reason and drops the message. There is no
//! in-process retry; at-most-once delivery is an accepted tradeoff for
//! high-frequency sensor data.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::payload::{self, ParseError};
use crate::registry::{SubscriptionError, SubscriptionRegistry};
use crate::store::{ReadingStore, SensorStore};
use crate::topic::TopicCodec;
use crate::{ParsedReading, SensorIdentity, SensorReading};

// ---

/// Why a message or lifecycle operation was dropped or rejected.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    // ---
    #[error("payload rejected: {0}")]
    Parse(#[from] ParseError),
    #[error("cannot determine sensor from message or topic: {topic}")]
    UnresolvedSensor { topic: String },
    #[error("no sensor with serial number {serial}")]
    UnknownSerial { serial: String },
    #[error("no sensor with id {sensor_id}")]
    SensorNotFound { sensor_id: Uuid },
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),
    #[error("store failure: {0}")]
    Store(#[source] anyhow::Error),
}

/// Consumes inbound messages and owns the sensor-facing subscription
/// lifecycle. One instance per process, shared with the transport's
/// event loop and the HTTP lifecycle routes.
pub struct IngestRouter {
    // ---
    codec: TopicCodec,
    registry: Arc<SubscriptionRegistry>,
    sensors: Arc<dyn SensorStore>,
    readings: Arc<dyn ReadingStore>,
}

/// Page size used when sweeping the sensor catalog at startup.
const SENSOR_PAGE_SIZE: u32 = 100;

impl IngestRouter {
    pub fn new(
        codec: TopicCodec,
        registry: Arc<SubscriptionRegistry>,
        sensors: Arc<dyn SensorStore>,
        readings: Arc<dyn ReadingStore>,
    ) -> Self {
        // ---
        IngestRouter {
            codec,
            registry,
            sensors,
            readings,
        }
    }

    /// Startup policy: subscribe the broad wildcard patterns as a
    /// catch-all net, then register every known sensor's topics so the
    /// direct-mapping fast path is populated. A sensor that fails to
    /// register is logged and skipped; startup continues.
    pub async fn start(&self) -> Result<(), IngestError> {
        // ---
        for pattern in self.codec.wildcard_patterns() {
            self.registry.subscribe_pattern(&pattern).await?;
        }
        info!("Subscribed to general wildcard patterns");

        self.subscribe_known_sensors().await
    }

    async fn subscribe_known_sensors(&self) -> Result<(), IngestError> {
        // ---
        let mut page = 1;
        let mut total = 0usize;
        loop {
            let sensors = self
                .sensors
                .list_all(page, SENSOR_PAGE_SIZE)
                .await
                .map_err(IngestError::Store)?;
            let fetched = sensors.len();

            for sensor in sensors {
                total += 1;
                if let Err(e) = self.register_topics(&sensor).await {
                    warn!(
                        "Failed to subscribe sensor {}: {e}",
                        sensor.sensor_id
                    );
                }
            }

            if fetched < SENSOR_PAGE_SIZE as usize {
                break;
            }
            page += 1;
        }

        info!(
            "Registered {total} sensors, {} active topics",
            self.registry.len().await
        );
        Ok(())
    }

    // ---

    /// Process one inbound message. Never propagates an error to the
    /// caller: message-bus delivery cannot be blocked on a single bad
    /// message, so every failure is terminal-for-this-message and logged.
    pub async fn handle(&self, topic: &str, raw_payload: &[u8]) {
        // ---
        match self.process(topic, raw_payload).await {
            Ok(reading) => {
                debug!(
                    "Saved reading for sensor {}: {}",
                    reading.sensor_id, reading.value
                );
            }
            Err(IngestError::Store(e)) => {
                error!("Error persisting reading from topic {topic}: {e}");
            }
            Err(e) => {
                warn!("Dropped message on topic {topic}: {e}");
            }
        }
    }

    async fn process(&self, topic: &str, raw_payload: &[u8]) -> Result<SensorReading, IngestError> {
        // ---
        let parsed = payload::parse(raw_payload)?;

        // Fast path: the registry already knows which sensor owns this topic.
        if let Some(sensor_id) = self.registry.resolve(topic).await {
            return self.persist(sensor_id, &parsed).await;
        }

        // Fallback: derive a serial number from the payload, then from the
        // topic shape, and resolve through the sensor store.
        let hints = self.codec.parse_topic(topic);
        let serial = match parsed.serial_number.clone().or(hints.serial_number) {
            Some(serial) => serial,
            None => {
                debug!(
                    "No serial number in payload or topic (hints: farm={:?} device={:?} type={:?})",
                    hints.farm_id, hints.device_id, hints.sensor_type
                );
                return Err(IngestError::UnresolvedSensor {
                    topic: topic.to_string(),
                });
            }
        };

        let sensor = self
            .sensors
            .find_by_serial_number(&serial)
            .await
            .map_err(IngestError::Store)?
            .ok_or(IngestError::UnknownSerial { serial })?;

        if metadata_disagrees(&parsed, &sensor) {
            warn!(
                "Payload metadata disagrees with provisioning of sensor {}",
                sensor.sensor_id
            );
        }

        self.persist(sensor.sensor_id, &parsed).await
    }

    async fn persist(
        &self,
        sensor_id: Uuid,
        parsed: &ParsedReading,
    ) -> Result<SensorReading, IngestError> {
        // ---
        let timestamp = parsed.timestamp.unwrap_or_else(Utc::now);
        self.readings
            .insert(sensor_id, parsed.value, timestamp)
            .await
            .map_err(IngestError::Store)
    }

    // ---

    /// Sensor onboarded: register its three topics.
    pub async fn on_sensor_created(&self, sensor_id: Uuid) -> Result<(), IngestError> {
        // ---
        let sensor = self.require_sensor(sensor_id).await?;
        self.register_topics(&sensor).await
    }

    /// Sensor changed. If the serial number changed, the old serial-based
    /// and type-grouped topics are retired before the new ones are
    /// registered, so no window exists where messages land on a stale
    /// mapping.
    pub async fn on_sensor_updated(
        &self,
        sensor_id: Uuid,
        old_serial_number: Option<&str>,
    ) -> Result<(), IngestError> {
        // ---
        let sensor = self.require_sensor(sensor_id).await?;

        if let Some(old_serial) = old_serial_number {
            if old_serial != sensor.serial_number {
                self.registry.retire(&format!("sensor/{old_serial}")).await?;
                self.registry
                    .retire(&format!(
                        "sensors/{}/{old_serial}",
                        sensor.sensor_type.to_lowercase()
                    ))
                    .await?;
            }
        }

        self.register_topics(&sensor).await
    }

    /// Sensor deleted. The row may already be gone, so topics are rebuilt
    /// from the caller-supplied serial and type, then any registry entries
    /// still pointing at the sensor are swept.
    pub async fn on_sensor_deleted(
        &self,
        sensor_id: Uuid,
        serial_number: &str,
        sensor_type: &str,
    ) -> Result<(), IngestError> {
        // ---
        self.registry
            .retire(&format!("sensor/{serial_number}"))
            .await?;
        self.registry
            .retire(&format!(
                "sensors/{}/{serial_number}",
                sensor_type.to_lowercase()
            ))
            .await?;
        self.registry.retire_all_for_sensor(sensor_id).await?;
        Ok(())
    }

    async fn require_sensor(&self, sensor_id: Uuid) -> Result<SensorIdentity, IngestError> {
        // ---
        self.sensors
            .find_by_id(sensor_id)
            .await
            .map_err(IngestError::Store)?
            .ok_or(IngestError::SensorNotFound { sensor_id })
    }

    async fn register_topics(&self, sensor: &SensorIdentity) -> Result<(), IngestError> {
        // ---
        for topic in self.codec.topics_for(sensor) {
            self.registry
                .ensure_subscribed(&topic, sensor.sensor_id)
                .await?;
        }
        Ok(())
    }
}

/// Whether payload metadata contradicts the provisioned identity of the
/// sensor the serial number resolved to. Usually a sign of a serial
/// collision or a device flashed with the wrong configuration.
fn metadata_disagrees(parsed: &ParsedReading, sensor: &SensorIdentity) -> bool {
    // ---
    parsed
        .sensor_type
        .as_deref()
        .is_some_and(|t| !t.eq_ignore_ascii_case(&sensor.sensor_type))
        || parsed
            .device_id
            .as_deref()
            .is_some_and(|d| d != sensor.device_id)
        || parsed
            .farm_id
            .as_deref()
            .is_some_and(|f| f != sensor.farm_id)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::registry::testing::RecordingTransport;
    use crate::store::testing::{MemoryReadingStore, MemorySensorStore};
    use crate::thresholds::{classify, default_bands, Severity};
    use chrono::{TimeZone, Utc};

    struct Fixture {
        // ---
        transport: Arc<RecordingTransport>,
        readings: Arc<MemoryReadingStore>,
        router: IngestRouter,
        sensor: SensorIdentity,
    }

    fn fixture() -> Fixture {
        // ---
        let sensor = SensorIdentity {
            sensor_id: Uuid::new_v4(),
            serial_number: "SN-100".to_string(),
            sensor_type: "pH".to_string(),
            device_id: "D1".to_string(),
            farm_id: "F1".to_string(),
        };

        let transport = Arc::new(RecordingTransport::default());
        let registry = Arc::new(SubscriptionRegistry::new(transport.clone()));
        let sensors = Arc::new(MemorySensorStore::with(vec![sensor.clone()]));
        let readings = Arc::new(MemoryReadingStore::default());
        let router = IngestRouter::new(
            TopicCodec::new("shrimp_farm"),
            registry,
            sensors,
            readings.clone(),
        );

        Fixture {
            transport,
            readings,
            router,
            sensor,
        }
    }

    #[tokio::test]
    async fn test_start_subscribes_wildcards_then_sensor_topics() {
        // ---
        let f = fixture();
        f.router.start().await.unwrap();

        let subscribed = f.transport.subscribed();
        assert_eq!(
            subscribed,
            vec![
                "shrimp_farm/+/device/+/sensor/+",
                "sensor/+",
                "sensors/+/+",
                "shrimp_farm/F1/device/D1/sensor/ph",
                "sensor/SN-100",
                "sensors/ph/SN-100",
            ]
        );
    }

    #[tokio::test]
    async fn test_fast_path_persists_via_registry_mapping() {
        // ---
        let f = fixture();
        f.router.start().await.unwrap();

        f.router
            .handle("shrimp_farm/F1/device/D1/sensor/ph", br#"{"value": 7.9}"#)
            .await;

        let stored = f.readings.all();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].sensor_id, f.sensor.sensor_id);
        assert_eq!(stored[0].value, 7.9);

        // End to end: the persisted average classifies as normal against
        // the default pH bands.
        let bands = default_bands("pH");
        assert_eq!(classify(stored[0].value, &bands).severity, Severity::Normal);
    }

    #[tokio::test]
    async fn test_fallback_resolves_serial_from_payload() {
        // ---
        let f = fixture();
        // No start(): registry is empty, simulating a wildcard-only match.
        f.router
            .handle(
                "shrimp_farm/F1/device/D1/sensor/ph",
                br#"{"value": 8.0, "serialNumber": "SN-100"}"#,
            )
            .await;

        let stored = f.readings.all();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].sensor_id, f.sensor.sensor_id);
    }

    #[tokio::test]
    async fn test_fallback_resolves_serial_from_topic() {
        // ---
        let f = fixture();
        f.router.handle("sensor/SN-100", b"8.1").await;

        let stored = f.readings.all();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].sensor_id, f.sensor.sensor_id);
        assert_eq!(stored[0].value, 8.1);
    }

    #[tokio::test]
    async fn test_payload_serial_wins_over_topic_serial() {
        // ---
        let f = fixture();
        // Topic names an unknown serial, payload the known one.
        f.router
            .handle("sensor/SN-999", br#"{"value": 1.5, "serialNumber": "SN-100"}"#)
            .await;

        let stored = f.readings.all();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].sensor_id, f.sensor.sensor_id);
    }

    #[tokio::test]
    async fn test_drops_message_with_no_derivable_serial() {
        // ---
        let f = fixture();
        let result = f.router.process("random/topic", br#"{"value": 1.0}"#).await;
        assert!(matches!(result, Err(IngestError::UnresolvedSensor { .. })));
        assert!(f.readings.all().is_empty());
    }

    #[tokio::test]
    async fn test_drops_message_with_unknown_serial() {
        // ---
        let f = fixture();
        let result = f.router.process("sensor/SN-404", b"3.2").await;
        assert!(matches!(
            result,
            Err(IngestError::UnknownSerial { ref serial }) if serial == "SN-404"
        ));
        assert!(f.readings.all().is_empty());
    }

    #[tokio::test]
    async fn test_drops_unparseable_payload() {
        // ---
        let f = fixture();
        f.router.start().await.unwrap();
        f.router
            .handle("shrimp_farm/F1/device/D1/sensor/ph", b"garbage")
            .await;
        assert!(f.readings.all().is_empty());
    }

    #[tokio::test]
    async fn test_timestamp_defaults_to_ingestion_time() {
        // ---
        let f = fixture();
        f.router.start().await.unwrap();

        let before = Utc::now();
        f.router.handle("sensor/SN-100", br#"{"value": 2.0}"#).await;
        let after = Utc::now();

        let stored = f.readings.all();
        assert!(stored[0].timestamp >= before && stored[0].timestamp <= after);

        // An explicit timestamp is preserved.
        f.router
            .handle(
                "sensor/SN-100",
                br#"{"value": 2.5, "timestamp": "2025-05-01T00:00:00Z"}"#,
            )
            .await;
        let stored = f.readings.all();
        assert_eq!(
            stored[1].timestamp,
            Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_serial_change_retires_old_topics_first() {
        // ---
        let sensor = SensorIdentity {
            sensor_id: Uuid::new_v4(),
            serial_number: "SN-NEW".to_string(),
            sensor_type: "pH".to_string(),
            device_id: "D1".to_string(),
            farm_id: "F1".to_string(),
        };
        let transport = Arc::new(RecordingTransport::default());
        let registry = Arc::new(SubscriptionRegistry::new(transport.clone()));
        let sensors = Arc::new(MemorySensorStore::with(vec![sensor.clone()]));
        let readings = Arc::new(MemoryReadingStore::default());
        let router = IngestRouter::new(
            TopicCodec::new("shrimp_farm"),
            registry.clone(),
            sensors,
            readings,
        );

        // Old-serial topics are live from before the rename.
        registry
            .ensure_subscribed("sensor/SN-OLD", sensor.sensor_id)
            .await
            .unwrap();
        registry
            .ensure_subscribed("sensors/ph/SN-OLD", sensor.sensor_id)
            .await
            .unwrap();

        router
            .on_sensor_updated(sensor.sensor_id, Some("SN-OLD"))
            .await
            .unwrap();

        // Stale mappings are gone, current topics are live.
        assert_eq!(registry.resolve("sensor/SN-OLD").await, None);
        assert_eq!(registry.resolve("sensors/ph/SN-OLD").await, None);
        assert_eq!(
            registry.resolve("sensor/SN-NEW").await,
            Some(sensor.sensor_id)
        );

        // Both retirements happen before any new subscription. The first
        // two recorded events are the test's own setup subscribes.
        let events: Vec<_> = transport.events().into_iter().skip(2).collect();
        let first_subscribe = events
            .iter()
            .position(|(action, _)| *action == "subscribe")
            .unwrap();
        let last_unsubscribe = events
            .iter()
            .rposition(|(action, _)| *action == "unsubscribe")
            .unwrap();
        assert!(last_unsubscribe < first_subscribe);
    }

    #[tokio::test]
    async fn test_unchanged_serial_update_only_reregisters() {
        // ---
        let f = fixture();
        f.router.start().await.unwrap();
        f.router
            .on_sensor_updated(f.sensor.sensor_id, Some("SN-100"))
            .await
            .unwrap();

        assert!(f.transport.unsubscribed().is_empty());
        // Idempotent: no duplicate subscribe calls for already-live topics.
        assert_eq!(f.transport.subscribed().len(), 6);
    }

    #[tokio::test]
    async fn test_sensor_deletion_sweeps_all_topics() {
        // ---
        let f = fixture();
        f.router.start().await.unwrap();

        f.router
            .on_sensor_deleted(f.sensor.sensor_id, "SN-100", "pH")
            .await
            .unwrap();

        assert_eq!(f.router.registry.resolve("sensor/SN-100").await, None);
        assert_eq!(f.router.registry.resolve("sensors/ph/SN-100").await, None);
        assert_eq!(
            f.router
                .registry
                .resolve("shrimp_farm/F1/device/D1/sensor/ph")
                .await,
            None
        );
        assert_eq!(f.router.registry.len().await, 0);
    }

    #[test]
    fn test_metadata_disagreement_detection() {
        // ---
        let sensor = SensorIdentity {
            sensor_id: Uuid::new_v4(),
            serial_number: "SN-100".to_string(),
            sensor_type: "pH".to_string(),
            device_id: "D1".to_string(),
            farm_id: "F1".to_string(),
        };

        let mut parsed = ParsedReading::bare(7.0);
        assert!(!metadata_disagrees(&parsed, &sensor));

        // Case differences in the type name are not a disagreement.
        parsed.sensor_type = Some("PH".to_string());
        parsed.device_id = Some("D1".to_string());
        parsed.farm_id = Some("F1".to_string());
        assert!(!metadata_disagrees(&parsed, &sensor));

        parsed.farm_id = Some("F2".to_string());
        assert!(metadata_disagrees(&parsed, &sensor));
    }

    #[tokio::test]
    async fn test_on_sensor_created_registers_three_topics() {
        // ---
        let f = fixture();
        f.router.on_sensor_created(f.sensor.sensor_id).await.unwrap();
        assert_eq!(f.transport.subscribed().len(), 3);

        let missing = f.router.on_sensor_created(Uuid::new_v4()).await;
        assert!(matches!(missing, Err(IngestError::SensorNotFound { .. })));
    }
}
