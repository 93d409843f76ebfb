//! MQTT transport adapter over rumqttc.
//!
//! Owns the broker connection: the shared [`AsyncClient`] implements the
//! registry's transport trait, and the event loop pump feeds every inbound
//! publish into the ingestion router. Reconnection is rumqttc's job; the
//! pump just logs connection errors and backs off briefly before polling
//! again.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::ingest::IngestRouter;
use crate::registry::{PubSubTransport, SubscriptionError};
use crate::Config;

// ---

/// Delay before re-polling after a connection-level error.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(3);

/// Broker-facing half of the connection, shared with the registry.
pub struct MqttTransport {
    // ---
    client: AsyncClient,
}

/// Open the broker connection. The returned event loop must be driven by
/// [`spawn_event_loop`] for any subscribe/publish traffic to make progress.
pub fn connect(cfg: &Config) -> (MqttTransport, EventLoop) {
    // ---
    let mut options = MqttOptions::new(
        cfg.mqtt_client_id.clone(),
        cfg.mqtt_host.clone(),
        cfg.mqtt_port,
    );
    options.set_keep_alive(Duration::from_secs(30));

    let (client, event_loop) = AsyncClient::new(options, 64);
    (MqttTransport { client }, event_loop)
}

#[async_trait]
impl PubSubTransport for MqttTransport {
    // ---
    async fn subscribe(&self, topic: &str) -> Result<(), SubscriptionError> {
        // Dropped samples are acceptable; readings are high-frequency, so
        // QoS 0 keeps delivery at-most-once with no broker-side queueing.
        self.client
            .subscribe(topic, QoS::AtMostOnce)
            .await
            .map_err(|e| SubscriptionError {
                action: "subscribe",
                topic: topic.to_string(),
                source: e.into(),
            })
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), SubscriptionError> {
        self.client
            .unsubscribe(topic)
            .await
            .map_err(|e| SubscriptionError {
                action: "unsubscribe",
                topic: topic.to_string(),
                source: e.into(),
            })
    }
}

/// Drive the broker event loop, dispatching each publish to the router.
///
/// Runs until the process exits. The router never propagates per-message
/// errors, so the only failure mode here is the connection itself.
pub fn spawn_event_loop(mut event_loop: EventLoop, router: Arc<IngestRouter>) -> JoinHandle<()> {
    // ---
    tokio::spawn(async move {
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    debug!("Received message on topic {}", publish.topic);
                    router.handle(&publish.topic, &publish.payload).await;
                }
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("Connected to MQTT broker");
                }
                Ok(_) => {}
                Err(e) => {
                    error!(
                        "MQTT connection error: {e}; retrying in {}s",
                        RECONNECT_BACKOFF.as_secs()
                    );
                    tokio::time::sleep(RECONNECT_BACKOFF).await;
                }
            }
        }
    })
}
