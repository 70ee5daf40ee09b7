//! Receiver health polling
//!
//! SDR receivers answer `GET /status` with `key=value` lines. One
//! background task checks every enabled receiver on a fixed interval and
//! keeps the latest results for the status document.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::config::ReceiverConfig;
use crate::module::manager::Manager;

pub const POLL_INTERVAL: Duration = Duration::from_secs(60);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReceiverHealth {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub reachable: bool,
    /// Receiver-reported state, e.g. `active`
    pub status: Option<String>,
    pub users: Option<u32>,
    pub users_max: Option<u32>,
    /// Name the receiver gives itself
    pub server_name: Option<String>,
    pub last_checked: DateTime<Utc>,
    pub error: Option<String>,
}

pub type HealthSnapshot = Arc<RwLock<Vec<ReceiverHealth>>>;

/// Split a status body into its `key=value` pairs.
pub fn parse_status(body: &str) -> HashMap<String, String> {
    body.lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

pub struct HealthPoller {
    client: Client,
    snapshot: HealthSnapshot,
}

impl HealthPoller {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("wspr-ingest/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            snapshot: Arc::new(RwLock::new(Vec::new())),
        })
    }

    /// Shared view of the latest results.
    pub fn snapshot_handle(&self) -> HealthSnapshot {
        self.snapshot.clone()
    }

    async fn fetch(&self, receiver: &ReceiverConfig) -> Result<HashMap<String, String>> {
        let url = format!("http://{}:{}/status", receiver.host, receiver.port);
        let body = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {}", url))?
            .error_for_status()?
            .text()
            .await
            .context("Failed to read status body")?;
        Ok(parse_status(&body))
    }

    pub async fn check(&self, receiver: &ReceiverConfig) -> ReceiverHealth {
        let mut health = ReceiverHealth {
            name: receiver.name.clone(),
            host: receiver.host.clone(),
            port: receiver.port,
            reachable: false,
            status: None,
            users: None,
            users_max: None,
            server_name: None,
            last_checked: Utc::now(),
            error: None,
        };

        match self.fetch(receiver).await {
            Ok(fields) => {
                health.reachable = true;
                health.status = fields.get("status").cloned();
                health.users = fields.get("users").and_then(|v| v.parse().ok());
                health.users_max = fields.get("users_max").and_then(|v| v.parse().ok());
                health.server_name = fields.get("name").cloned();
            }
            Err(e) => {
                tracing::debug!("Receiver {} unreachable: {:#}", receiver.name, e);
                health.error = Some(format!("{:#}", e));
            }
        }
        health
    }

    /// Check all enabled receivers concurrently and store the results.
    pub async fn poll_once(&self, receivers: &[ReceiverConfig]) {
        let checks = receivers
            .iter()
            .filter(|r| r.enabled)
            .map(|r| self.check(r));
        let results = futures::future::join_all(checks).await;

        let down = results.iter().filter(|h| !h.reachable).count();
        if down > 0 {
            tracing::warn!("{} of {} receiver(s) unreachable", down, results.len());
        }
        *self.snapshot.write().await = results;
    }

    /// Poll the manager's current receivers every [`POLL_INTERVAL`].
    pub fn spawn(self: Arc<Self>, manager: Arc<Manager>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(POLL_INTERVAL);
            loop {
                ticker.tick().await;
                let receivers = manager.config().await.receivers;
                self.poll_once(&receivers).await;
            }
        })
    }
}
