//! In-memory registry of active topic subscriptions.
//!
//! Owns the process-wide topic → sensor map and the decision of which
//! topics are currently live. The actual broker calls go through the
//! injected [`PubSubTransport`], so tests can supply a recording double
//! and a fresh registry per case instead of sharing ambient state.
//!
//! Invariant: a topic maps to at most one sensor at any time; several
//! topics may map to the same sensor. Lifecycle is process start to
//! shutdown, nothing is persisted.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

// ---

/// A transport subscribe/unsubscribe call failed. The registry leaves its
/// mapping in the pre-call state so the next onboarding attempt can retry.
#[derive(Debug, thiserror::Error)]
#[error("transport {action} failed for topic {topic}: {source}")]
pub struct SubscriptionError {
    // ---
    pub action: &'static str,
    pub topic: String,
    #[source]
    pub source: anyhow::Error,
}

/// Broker-facing side of the registry. Wildcard evaluation (`+`/`#`) is
/// the broker's job; in-process lookups are exact-match only.
#[async_trait]
pub trait PubSubTransport: Send + Sync {
    // ---
    async fn subscribe(&self, topic: &str) -> Result<(), SubscriptionError>;
    async fn unsubscribe(&self, topic: &str) -> Result<(), SubscriptionError>;
}

/// Topic → sensor mapping over a pub/sub transport.
pub struct SubscriptionRegistry {
    // ---
    transport: Arc<dyn PubSubTransport>,
    // Held across the transport await so concurrent ensure_subscribed
    // calls for one topic issue exactly one subscribe.
    topics: Mutex<HashMap<String, Uuid>>,
}

impl SubscriptionRegistry {
    pub fn new(transport: Arc<dyn PubSubTransport>) -> Self {
        // ---
        SubscriptionRegistry {
            transport,
            topics: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe `topic` and record its owning sensor. Idempotent: a
    /// topic that is already active is left untouched and no broker call
    /// is made. On transport failure the mapping is not recorded.
    pub async fn ensure_subscribed(
        &self,
        topic: &str,
        sensor_id: Uuid,
    ) -> Result<(), SubscriptionError> {
        // ---
        let mut topics = self.topics.lock().await;
        if topics.contains_key(topic) {
            debug!("Topic already active, skipping subscribe: {topic}");
            return Ok(());
        }

        self.transport.subscribe(topic).await?;
        topics.insert(topic.to_string(), sensor_id);
        info!("Subscribed to topic: {topic}");
        Ok(())
    }

    /// Subscribe a broad wildcard pattern. Patterns are a transport-level
    /// catch-all net over the per-sensor topics; they map to no single
    /// sensor and are never indexed in the topic map.
    pub async fn subscribe_pattern(&self, pattern: &str) -> Result<(), SubscriptionError> {
        // ---
        self.transport.subscribe(pattern).await?;
        info!("Subscribed to pattern: {pattern}");
        Ok(())
    }

    /// Exact-match lookup of the sensor a topic is registered for.
    pub async fn resolve(&self, topic: &str) -> Option<Uuid> {
        // ---
        self.topics.lock().await.get(topic).copied()
    }

    /// Unsubscribe a topic and drop its mapping. No-op if the topic was
    /// never registered.
    pub async fn retire(&self, topic: &str) -> Result<(), SubscriptionError> {
        // ---
        let mut topics = self.topics.lock().await;
        if !topics.contains_key(topic) {
            return Ok(());
        }

        self.transport.unsubscribe(topic).await?;
        topics.remove(topic);
        info!("Unsubscribed from topic: {topic}");
        Ok(())
    }

    /// Retire every topic still pointing at `sensor_id`. Used on sensor
    /// deletion, after the serial/type topics were retired explicitly.
    pub async fn retire_all_for_sensor(&self, sensor_id: Uuid) -> Result<(), SubscriptionError> {
        // ---
        let stale: Vec<String> = {
            let topics = self.topics.lock().await;
            topics
                .iter()
                .filter(|(_, sid)| **sid == sensor_id)
                .map(|(topic, _)| topic.clone())
                .collect()
        };

        for topic in stale {
            self.retire(&topic).await?;
        }
        Ok(())
    }

    /// Number of active topic mappings.
    pub async fn len(&self) -> usize {
        // ---
        self.topics.lock().await.len()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording transport double shared by registry and router tests.
    // ---
    use std::sync::Mutex as StdMutex;

    use super::*;

    /// Records broker calls in arrival order so tests can assert both the
    /// set of calls and their relative ordering.
    #[derive(Default)]
    pub struct RecordingTransport {
        // ---
        events: StdMutex<Vec<(&'static str, String)>>,
        fail_subscribe: StdMutex<bool>,
    }

    impl RecordingTransport {
        pub fn events(&self) -> Vec<(&'static str, String)> {
            self.events.lock().unwrap().clone()
        }

        pub fn subscribed(&self) -> Vec<String> {
            self.calls("subscribe")
        }

        pub fn unsubscribed(&self) -> Vec<String> {
            self.calls("unsubscribe")
        }

        fn calls(&self, action: &str) -> Vec<String> {
            // ---
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter(|(a, _)| *a == action)
                .map(|(_, topic)| topic.clone())
                .collect()
        }

        pub fn set_fail_subscribe(&self, fail: bool) {
            *self.fail_subscribe.lock().unwrap() = fail;
        }
    }

    #[async_trait]
    impl PubSubTransport for RecordingTransport {
        // ---
        async fn subscribe(&self, topic: &str) -> Result<(), SubscriptionError> {
            if *self.fail_subscribe.lock().unwrap() {
                return Err(SubscriptionError {
                    action: "subscribe",
                    topic: topic.to_string(),
                    source: anyhow::anyhow!("broker unavailable"),
                });
            }
            self.events
                .lock()
                .unwrap()
                .push(("subscribe", topic.to_string()));
            Ok(())
        }

        async fn unsubscribe(&self, topic: &str) -> Result<(), SubscriptionError> {
            self.events
                .lock()
                .unwrap()
                .push(("unsubscribe", topic.to_string()));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::testing::RecordingTransport;
    use super::*;

    fn registry() -> (Arc<RecordingTransport>, SubscriptionRegistry) {
        // ---
        let transport = Arc::new(RecordingTransport::default());
        let registry = SubscriptionRegistry::new(transport.clone());
        (transport, registry)
    }

    #[tokio::test]
    async fn test_ensure_subscribed_is_idempotent() {
        // ---
        let (transport, registry) = registry();
        let sensor = Uuid::new_v4();

        registry.ensure_subscribed("sensor/SN-1", sensor).await.unwrap();
        registry.ensure_subscribed("sensor/SN-1", sensor).await.unwrap();

        // Exactly one external subscribe call despite two registrations.
        assert_eq!(transport.subscribed(), vec!["sensor/SN-1"]);
        assert_eq!(registry.resolve("sensor/SN-1").await, Some(sensor));
    }

    #[tokio::test]
    async fn test_failed_subscribe_records_nothing() {
        // ---
        let (transport, registry) = registry();
        let sensor = Uuid::new_v4();

        transport.set_fail_subscribe(true);
        let result = registry.ensure_subscribed("sensor/SN-1", sensor).await;
        assert!(result.is_err());
        assert_eq!(registry.resolve("sensor/SN-1").await, None);

        // A retry after the broker recovers goes through cleanly.
        transport.set_fail_subscribe(false);
        registry.ensure_subscribed("sensor/SN-1", sensor).await.unwrap();
        assert_eq!(registry.resolve("sensor/SN-1").await, Some(sensor));
    }

    #[tokio::test]
    async fn test_retire_removes_mapping() {
        // ---
        let (transport, registry) = registry();
        let sensor = Uuid::new_v4();

        registry.ensure_subscribed("sensor/SN-1", sensor).await.unwrap();
        registry.retire("sensor/SN-1").await.unwrap();

        assert_eq!(registry.resolve("sensor/SN-1").await, None);
        assert_eq!(transport.unsubscribed(), vec!["sensor/SN-1"]);
    }

    #[tokio::test]
    async fn test_retire_unknown_topic_is_noop() {
        // ---
        let (transport, registry) = registry();

        registry.retire("sensor/never-seen").await.unwrap();
        assert!(transport.unsubscribed().is_empty());
    }

    #[tokio::test]
    async fn test_retire_all_for_sensor() {
        // ---
        let (transport, registry) = registry();
        let doomed = Uuid::new_v4();
        let survivor = Uuid::new_v4();

        registry.ensure_subscribed("sensor/SN-1", doomed).await.unwrap();
        registry.ensure_subscribed("sensors/ph/SN-1", doomed).await.unwrap();
        registry.ensure_subscribed("sensor/SN-2", survivor).await.unwrap();

        registry.retire_all_for_sensor(doomed).await.unwrap();

        assert_eq!(registry.resolve("sensor/SN-1").await, None);
        assert_eq!(registry.resolve("sensors/ph/SN-1").await, None);
        assert_eq!(registry.resolve("sensor/SN-2").await, Some(survivor));

        let mut unsubscribed = transport.unsubscribed();
        unsubscribed.sort();
        assert_eq!(unsubscribed, vec!["sensor/SN-1", "sensors/ph/SN-1"]);
    }
}
