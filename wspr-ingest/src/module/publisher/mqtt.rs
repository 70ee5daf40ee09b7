//! MQTT publisher with background reconnection

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, NetworkOptions, Outgoing, Packet, QoS, Transport};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Duration, sleep, timeout};

use super::{PublishError, PublisherFactory, SpotPublisher};
use crate::config::PublisherConfig;

const APP_TAG: &str = "wspr-ingest";
const KEEP_ALIVE: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT_SECS: u64 = 5;
const RECONNECT_INITIAL: Duration = Duration::from_secs(10);
const RECONNECT_MAX: Duration = Duration::from_secs(60);
const DISCONNECT_GRACE: Duration = Duration::from_millis(250);
const REQUEST_CAPACITY: usize = 256;

fn qos_from_level(level: u8) -> QoS {
    match level {
        2 => QoS::ExactlyOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::AtMostOnce,
    }
}

fn client_id() -> String {
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}", APP_TAG, &random[..16])
}

/// Exponential backoff step, capped.
fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(RECONNECT_MAX)
}

/// MQTT client shared by all jobs.
pub struct MqttPublisher {
    client: AsyncClient,
    qos: QoS,
    retain: bool,
    topic_prefix: String,
    connected: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl MqttPublisher {
    /// Create the client and start its event loop. Returns immediately;
    /// the connection is established in the background.
    pub fn connect(config: &PublisherConfig) -> Self {
        let id = client_id();
        let mut options = MqttOptions::new(id.clone(), config.host.clone(), config.port);
        options.set_keep_alive(KEEP_ALIVE);
        if !config.username.is_empty() {
            options.set_credentials(config.username.clone(), config.password.clone());
        }
        if config.use_tls {
            options.set_transport(Transport::tls_with_default_config());
        }

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let mut network = NetworkOptions::new();
        network.set_connection_timeout(CONNECT_TIMEOUT_SECS);
        eventloop.set_network_options(network);

        let connected = Arc::new(AtomicBool::new(false));
        let shutdown = Arc::new(AtomicBool::new(false));

        tracing::info!(
            "Connecting to MQTT broker {}:{} as {} (tls: {})",
            config.host,
            config.port,
            id,
            config.use_tls
        );

        let handle = tokio::spawn(run_event_loop(
            eventloop,
            format!("{}:{}", config.host, config.port),
            connected.clone(),
            shutdown.clone(),
        ));

        Self {
            client,
            qos: qos_from_level(config.qos),
            retain: config.retain,
            topic_prefix: config.topic_prefix.clone(),
            connected,
            shutdown,
            event_loop: Mutex::new(Some(handle)),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    broker: String,
    connected: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
) {
    let mut backoff = RECONNECT_INITIAL;

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                connected.store(true, Ordering::SeqCst);
                backoff = RECONNECT_INITIAL;
                tracing::info!("MQTT broker {} connected", broker);
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                connected.store(false, Ordering::SeqCst);
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
            }
            Ok(_) => {}
            Err(e) => {
                let was_connected = connected.swap(false, Ordering::SeqCst);
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                if was_connected {
                    tracing::warn!("MQTT connection to {} lost: {}", broker, e);
                }
                tracing::debug!("MQTT reconnect to {} in {}s", broker, backoff.as_secs());
                sleep(backoff).await;
                backoff = next_backoff(backoff);
            }
        }
    }

    tracing::info!("MQTT event loop for {} stopped", broker);
}

#[async_trait]
impl SpotPublisher for MqttPublisher {
    fn topic_prefix(&self) -> &str {
        &self.topic_prefix
    }

    async fn publish(&self, topic: &str, payload: String) -> Result<(), PublishError> {
        if !self.is_connected() {
            return Err(PublishError::NotConnected);
        }
        self.client
            .try_publish(topic, self.qos, self.retain, payload.into_bytes())
            .map_err(|e| PublishError::Client(e.to_string()))
    }

    async fn disconnect(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Err(e) = self.client.try_disconnect() {
            tracing::debug!("MQTT disconnect request failed: {}", e);
        }

        let handle = self.event_loop.lock().ok().and_then(|mut guard| guard.take());
        if let Some(mut handle) = handle {
            if timeout(DISCONNECT_GRACE, &mut handle).await.is_err() {
                handle.abort();
            }
        }
    }
}

/// Factory for [`MqttPublisher`]. Must be used inside a tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct MqttPublisherFactory;

impl PublisherFactory for MqttPublisherFactory {
    fn create(&self, config: &PublisherConfig) -> anyhow::Result<Option<Arc<dyn SpotPublisher>>> {
        if !config.enabled {
            tracing::info!("Publisher disabled in configuration");
            return Ok(None);
        }
        Ok(Some(Arc::new(MqttPublisher::connect(config))))
    }
}
