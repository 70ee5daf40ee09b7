//! Spot publishing
//!
//! Jobs hold an optional shared publisher. Absent, disconnected and
//! failing publishers all surface as a [`PublishError`] that the job logs
//! and moves past.

mod mqtt;
pub use mqtt::{MqttPublisher, MqttPublisherFactory};

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use wspr_common::{EnrichedSpot, SpotMessage, spot_topic};

use crate::config::PublisherConfig;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("publisher is disabled")]
    Disabled,

    #[error("not connected to broker")]
    NotConnected,

    #[error("failed to serialize spot: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("broker client error: {0}")]
    Client(String),
}

#[async_trait]
pub trait SpotPublisher: Send + Sync {
    /// Global topic prefix from the publisher configuration.
    fn topic_prefix(&self) -> &str;

    async fn publish(&self, topic: &str, payload: String) -> Result<(), PublishError>;

    async fn disconnect(&self);
}

/// Builds the shared publisher from configuration; `None` when disabled.
pub trait PublisherFactory: Send + Sync {
    fn create(&self, config: &PublisherConfig) -> anyhow::Result<Option<Arc<dyn SpotPublisher>>>;
}

/// Serialize one enriched spot and hand it to the publisher.
///
/// `prefix_override` wins over the publisher's prefix when non-empty.
pub async fn publish_spot(
    publisher: Option<&Arc<dyn SpotPublisher>>,
    prefix_override: &str,
    enriched: &EnrichedSpot,
    band: &str,
    dial_khz: f64,
) -> Result<(), PublishError> {
    let publisher = publisher.ok_or(PublishError::Disabled)?;

    let prefix = if prefix_override.is_empty() {
        publisher.topic_prefix()
    } else {
        prefix_override
    };
    let topic = spot_topic(prefix, band);
    let payload = SpotMessage::new(enriched, band, dial_khz).to_json()?;

    publisher.publish(&topic, payload).await
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use wspr_common::{DxccInfo, Spot};

    /// Publisher that keeps everything it was asked to send.
    pub(crate) struct MemoryPublisher {
        pub prefix: String,
        pub sent: Mutex<Vec<(String, String)>>,
        pub connected: AtomicBool,
        pub disconnected: AtomicBool,
    }

    impl MemoryPublisher {
        pub(crate) fn new(prefix: &str) -> Arc<Self> {
            Arc::new(Self {
                prefix: prefix.to_string(),
                sent: Mutex::new(Vec::new()),
                connected: AtomicBool::new(true),
                disconnected: AtomicBool::new(false),
            })
        }

        pub(crate) fn messages(&self) -> Vec<(String, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SpotPublisher for MemoryPublisher {
        fn topic_prefix(&self) -> &str {
            &self.prefix
        }

        async fn publish(&self, topic: &str, payload: String) -> Result<(), PublishError> {
            if !self.connected.load(Ordering::SeqCst) {
                return Err(PublishError::NotConnected);
            }
            self.sent.lock().unwrap().push((topic.to_string(), payload));
            Ok(())
        }

        async fn disconnect(&self) {
            self.disconnected.store(true, Ordering::SeqCst);
        }
    }

    /// Factory handing out [`MemoryPublisher`]s and remembering them.
    #[derive(Default)]
    pub(crate) struct MemoryPublisherFactory {
        pub created: Mutex<Vec<Arc<MemoryPublisher>>>,
        pub calls: AtomicUsize,
    }

    impl MemoryPublisherFactory {
        pub(crate) fn latest(&self) -> Option<Arc<MemoryPublisher>> {
            self.created.lock().unwrap().last().cloned()
        }
    }

    impl PublisherFactory for MemoryPublisherFactory {
        fn create(&self, config: &PublisherConfig) -> anyhow::Result<Option<Arc<dyn SpotPublisher>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !config.enabled {
                return Ok(None);
            }
            let publisher = MemoryPublisher::new(&config.topic_prefix);
            self.created.lock().unwrap().push(publisher.clone());
            Ok(Some(publisher))
        }
    }

    fn enriched() -> EnrichedSpot {
        EnrichedSpot {
            spot: Spot {
                cycle_timestamp: Utc.with_ymd_and_hms(2025, 12, 27, 10, 0, 0).unwrap(),
                snr_db: -15,
                time_offset_s: 0.5,
                frequency_mhz: 14.0971,
                callsign: "W1ABC".to_string(),
                grid_locator: "FN42".to_string(),
                power_dbm: 30,
                drift_hz: 0,
            },
            dxcc: DxccInfo::default(),
        }
    }

    #[tokio::test]
    async fn test_topic_uses_global_prefix() {
        let memory = MemoryPublisher::new("station");
        let publisher: Arc<dyn SpotPublisher> = memory.clone();

        publish_spot(Some(&publisher), "", &enriched(), "20m", 14097.0).await.unwrap();

        let sent = memory.messages();
        assert_eq!(sent[0].0, "station/digital_modes/WSPR/20m");
        let value: serde_json::Value = serde_json::from_str(&sent[0].1).unwrap();
        assert_eq!(value["frequency"], 14_097_000);
        assert_eq!(value["tx_frequency"], 14_097_100);
    }

    #[tokio::test]
    async fn test_receiver_override_wins() {
        let memory = MemoryPublisher::new("station");
        let publisher: Arc<dyn SpotPublisher> = memory.clone();

        publish_spot(Some(&publisher), "remote", &enriched(), "20m", 14097.0).await.unwrap();
        assert_eq!(memory.messages()[0].0, "remote/digital_modes/WSPR/20m");
    }

    #[tokio::test]
    async fn test_missing_or_disconnected_publisher_is_an_error() {
        let result = publish_spot(None, "", &enriched(), "20m", 14097.0).await;
        assert!(matches!(result, Err(PublishError::Disabled)));

        let memory = MemoryPublisher::new("station");
        memory.connected.store(false, Ordering::SeqCst);
        let publisher: Arc<dyn SpotPublisher> = memory.clone();
        let result = publish_spot(Some(&publisher), "", &enriched(), "20m", 14097.0).await;
        assert!(matches!(result, Err(PublishError::NotConnected)));
    }
}
