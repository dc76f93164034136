//! Broadcast Dispatcher (spec §4.7): consumes one Pub/Sub Bus subscription
//! per active channel and fans each payload out to every local subscriber,
//! never blocking on a single slow client.

use crate::hub::connection::EvictReason;
use crate::hub::registry::{ConnectionRegistry, DeliveryOutcome};
use crate::metrics::Metrics;
use crate::models::match_model::ChannelId;
use crate::pubsub::PubSubBus;
use std::sync::Arc;
use std::time::Instant;
use tokio_stream::StreamExt;
use tracing::warn;

pub struct BroadcastDispatcher {
    registry: Arc<ConnectionRegistry>,
    bus: Arc<dyn PubSubBus>,
    metrics: Arc<Metrics>,
}

impl BroadcastDispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>, bus: Arc<dyn PubSubBus>, metrics: Arc<Metrics>) -> Self {
        Self { registry, bus, metrics }
    }

    /// Runs until its Pub/Sub subscription ends, which happens when the Hub
    /// aborts this task after `channel`'s last local subscriber leaves.
    pub async fn run(&self, channel: ChannelId) {
        let topic = channel.as_topic();
        let mut stream = match self.bus.subscribe(&topic).await {
            Ok(s) => s,
            Err(e) => {
                warn!(channel = %topic, error = %e, "dispatcher failed to subscribe");
                return;
            }
        };

        while let Some(payload) = stream.next().await {
            let start = Instant::now();
            let text = match String::from_utf8(payload) {
                Ok(t) => t,
                Err(e) => {
                    warn!(channel = %topic, error = %e, "dropping non-utf8 broadcast payload");
                    continue;
                }
            };

            for connection_id in self.registry.subscribers(&channel).await {
                match self.registry.deliver(connection_id, text.clone()).await {
                    DeliveryOutcome::Delivered => {}
                    DeliveryOutcome::QueueFull => {
                        warn!(connection_id, channel = %topic, "queue full, evicting slow consumer");
                        self.registry.evict(connection_id, EvictReason::SlowConsumer).await;
                    }
                    DeliveryOutcome::SendTimeout => {
                        warn!(connection_id, channel = %topic, "blocked past send timeout, evicting slow consumer");
                        self.registry.evict(connection_id, EvictReason::SlowConsumer).await;
                    }
                    DeliveryOutcome::Gone => {}
                }
            }

            self.metrics.pubsub_backlog.set(self.bus.backlog());
            self.metrics
                .ws_messages_broadcasted
                .with_label_values(&[&topic])
                .inc();
            self.metrics
                .broadcast_latency_ms
                .observe(start.elapsed().as_secs_f64() * 1000.0);
        }
    }
}
