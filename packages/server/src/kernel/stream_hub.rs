//! In-process pub/sub hub for campaign event streaming.
//!
//! Provides topic-keyed broadcast channels for pushing control-plane events
//! to SSE endpoints. Topics are `campaign:<uuid>` strings; payloads are the
//! serialized [`CampaignEvent`].
//!
//! The control plane publishes only after its transaction commits, and only
//! on the non-cached idempotency path, so a retried command produces at most
//! one notification per idempotency window.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

/// Event emitted after a control-plane command commits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignEvent {
    pub campaign_id: Uuid,
    pub action: String,
    pub current_phase: String,
    pub phase_status: String,
    pub sequence_number: i64,
}

impl CampaignEvent {
    /// Topic string this event is published under.
    pub fn topic(&self) -> String {
        campaign_topic(self.campaign_id)
    }
}

/// Topic for a campaign's event stream.
pub fn campaign_topic(campaign_id: Uuid) -> String {
    format!("campaign:{campaign_id}")
}

/// Topic-keyed broadcast hub.
///
/// Thread-safe, cloneable. Payloads are `serde_json::Value` so the hub has
/// no knowledge of what domains stream through it.
#[derive(Clone)]
pub struct StreamHub {
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<serde_json::Value>>>>,
    capacity: usize,
}

impl StreamHub {
    /// Create a new StreamHub with default capacity (256 messages per channel).
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    /// Create a new StreamHub with the given channel capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            capacity,
        }
    }

    /// Publish a JSON value to a topic. No-op if no subscribers.
    pub async fn publish(&self, topic: &str, value: serde_json::Value) {
        let channels = self.channels.read().await;
        if let Some(tx) = channels.get(topic) {
            // Ignore send errors (no active receivers)
            let _ = tx.send(value);
        }
    }

    /// Publish a campaign event to its own topic.
    pub async fn publish_campaign_event(&self, event: &CampaignEvent) {
        // Serialization of a plain struct cannot fail.
        let value = serde_json::to_value(event).expect("event serialization");
        self.publish(&event.topic(), value).await;
    }

    /// Subscribe to a topic. Creates the channel if it doesn't exist.
    pub async fn subscribe(&self, topic: &str) -> broadcast::Receiver<serde_json::Value> {
        let mut channels = self.channels.write().await;
        let tx = channels
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        tx.subscribe()
    }

    /// Remove channels with zero subscribers (housekeeping).
    pub async fn cleanup(&self) {
        let mut channels = self.channels.write().await;
        channels.retain(|_, tx| tx.receiver_count() > 0);
    }
}

impl Default for StreamHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> CampaignEvent {
        CampaignEvent {
            campaign_id: Uuid::new_v4(),
            action: "pause".to_string(),
            current_phase: "dns_validation".to_string(),
            phase_status: "paused".to_string(),
            sequence_number: 7,
        }
    }

    #[tokio::test]
    async fn publish_subscribe_roundtrip() {
        let hub = StreamHub::new();
        let event = sample_event();
        let mut rx = hub.subscribe(&event.topic()).await;

        hub.publish_campaign_event(&event).await;

        let received = rx.recv().await.unwrap();
        assert_eq!(received["action"], "pause");
        assert_eq!(received["sequence_number"], 7);
    }

    #[tokio::test]
    async fn publish_no_subscribers_is_noop() {
        let hub = StreamHub::new();
        // Should not panic
        hub.publish_campaign_event(&sample_event()).await;
    }

    #[tokio::test]
    async fn cleanup_removes_empty_channels() {
        let hub = StreamHub::new();
        let rx = hub.subscribe("campaign:ephemeral").await;

        assert_eq!(hub.channels.read().await.len(), 1);

        drop(rx);
        hub.cleanup().await;

        assert_eq!(hub.channels.read().await.len(), 0);
    }

    #[tokio::test]
    async fn multiple_subscribers_all_receive() {
        let hub = StreamHub::new();
        let event = sample_event();
        let mut rx1 = hub.subscribe(&event.topic()).await;
        let mut rx2 = hub.subscribe(&event.topic()).await;

        hub.publish_campaign_event(&event).await;

        assert_eq!(rx1.recv().await.unwrap()["action"], "pause");
        assert_eq!(rx2.recv().await.unwrap()["action"], "pause");
    }
}
