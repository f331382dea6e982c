//! Webhook notification fan-out.
//!
//! Webhook endpoints are configured at runtime, persisted to
//! `webhooks.json`, and receive JSON envelopes for the event types they
//! subscribe to (an empty list means all). Producers push [`Notification`]s
//! into an mpsc channel; a background dispatcher task drains it and POSTs.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::alert::Alert;

/// Configuration for a single webhook endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Event types to deliver. Empty means all.
    #[serde(default)]
    pub events: Vec<String>,
    /// Extra request headers sent with every delivery.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Optional HMAC-SHA256 signing secret for `X-Probe-Signature-256`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

impl WebhookConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            url: url.into(),
            enabled: true,
            events: Vec::new(),
            headers: HashMap::new(),
            secret: None,
            created_at: Utc::now(),
        }
    }

    pub fn accepts(&self, event_type: &str) -> bool {
        if self.events.is_empty() {
            return true;
        }
        self.events.iter().any(|e| e == event_type)
    }
}

/// Partial update for an existing webhook.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookUpdate {
    pub name: Option<String>,
    pub url: Option<String>,
    pub enabled: Option<bool>,
    pub events: Option<Vec<String>>,
    pub headers: Option<HashMap<String, String>>,
    pub secret: Option<String>,
}

/// A notification produced by the monitoring side, delivered as a webhook.
#[derive(Debug, Clone)]
pub enum Notification {
    AlertRaised { alert: Alert },
}

impl Notification {
    pub fn event_type(&self) -> &'static str {
        match self {
            Notification::AlertRaised { .. } => "alert_raised",
        }
    }

    fn payload(&self) -> serde_json::Value {
        match self {
            Notification::AlertRaised { alert } => {
                serde_json::to_value(alert).unwrap_or_default()
            }
        }
    }
}

pub fn notification_channel() -> (
    mpsc::UnboundedSender<Notification>,
    mpsc::UnboundedReceiver<Notification>,
) {
    mpsc::unbounded_channel()
}

#[derive(Serialize, Deserialize, Default)]
struct PersistedWebhooks {
    webhooks: Vec<WebhookConfig>,
}

/// Webhook registry plus HTTP delivery.
pub struct WebhookDispatcher {
    webhooks: RwLock<HashMap<String, WebhookConfig>>,
    path: Option<PathBuf>,
    client: Client,
}

impl WebhookDispatcher {
    pub fn new(path: Option<PathBuf>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to build HTTP client");

        let mut webhooks = HashMap::new();
        if let Some(ref p) = path {
            match std::fs::read_to_string(p) {
                Ok(content) => match serde_json::from_str::<PersistedWebhooks>(&content) {
                    Ok(persisted) => {
                        for wh in persisted.webhooks {
                            webhooks.insert(wh.id.clone(), wh);
                        }
                        info!(count = webhooks.len(), "Loaded webhooks from persistence");
                    }
                    Err(e) => warn!(path = %p.display(), error = %e, "Failed to parse webhooks file"),
                },
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %p.display(), error = %e, "Failed to read webhooks file"),
            }
        }

        Self {
            webhooks: RwLock::new(webhooks),
            path,
            client,
        }
    }

    fn save(&self) {
        let Some(ref path) = self.path else {
            return;
        };
        let persisted = {
            let webhooks = self.webhooks.read().expect("webhook lock");
            let mut list: Vec<WebhookConfig> = webhooks.values().cloned().collect();
            list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            PersistedWebhooks { webhooks: list }
        };
        match serde_json::to_string_pretty(&persisted) {
            Ok(json) => {
                if let Some(parent) = path.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                if let Err(e) = std::fs::write(path, json) {
                    warn!(path = %path.display(), error = %e, "Failed to persist webhooks");
                }
            }
            Err(e) => warn!(error = %e, "Failed to serialize webhooks"),
        }
    }

    pub fn add(&self, config: WebhookConfig) -> WebhookConfig {
        {
            let mut webhooks = self.webhooks.write().expect("webhook lock");
            webhooks.insert(config.id.clone(), config.clone());
        }
        self.save();
        info!(name = %config.name, url = %config.url, "Added webhook");
        config
    }

    pub fn update(&self, id: &str, update: WebhookUpdate) -> Option<WebhookConfig> {
        let updated = {
            let mut webhooks = self.webhooks.write().expect("webhook lock");
            let wh = webhooks.get_mut(id)?;
            if let Some(name) = update.name {
                wh.name = name;
            }
            if let Some(url) = update.url {
                wh.url = url;
            }
            if let Some(enabled) = update.enabled {
                wh.enabled = enabled;
            }
            if let Some(events) = update.events {
                wh.events = events;
            }
            if let Some(headers) = update.headers {
                wh.headers = headers;
            }
            if let Some(secret) = update.secret {
                wh.secret = Some(secret);
            }
            wh.clone()
        };
        self.save();
        Some(updated)
    }

    pub fn delete(&self, id: &str) -> bool {
        let removed = {
            let mut webhooks = self.webhooks.write().expect("webhook lock");
            webhooks.remove(id).is_some()
        };
        if removed {
            self.save();
            info!(webhook_id = id, "Deleted webhook");
        }
        removed
    }

    pub fn get(&self, id: &str) -> Option<WebhookConfig> {
        self.webhooks.read().expect("webhook lock").get(id).cloned()
    }

    pub fn list(&self) -> Vec<WebhookConfig> {
        let mut list: Vec<WebhookConfig> = self
            .webhooks
            .read()
            .expect("webhook lock")
            .values()
            .cloned()
            .collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        list
    }

    /// POST an event envelope to every enabled webhook subscribed to
    /// `event_type`. Failures are logged and not retried.
    pub async fn send_event(&self, event_type: &str, payload: serde_json::Value) {
        let targets: Vec<WebhookConfig> = {
            let webhooks = self.webhooks.read().expect("webhook lock");
            webhooks
                .values()
                .filter(|wh| wh.enabled && wh.accepts(event_type))
                .cloned()
                .collect()
        };

        if targets.is_empty() {
            return;
        }

        let envelope = serde_json::json!({
            "event_type": event_type,
            "timestamp": Utc::now(),
            "payload": payload,
        });
        let body = match serde_json::to_vec(&envelope) {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "Failed to serialize webhook envelope");
                return;
            }
        };

        let body: &[u8] = &body;
        let deliveries = targets.iter().map(|wh| {
            async move {
                if let Err(e) = self.deliver(wh, body).await {
                    warn!(name = %wh.name, url = %wh.url, event_type, error = %e, "Webhook delivery failed");
                } else {
                    debug!(name = %wh.name, event_type, "Webhook delivered");
                }
            }
        });
        futures::future::join_all(deliveries).await;
    }

    /// Deliver directly to one webhook regardless of its event filter.
    pub async fn send_test(&self, id: &str) -> Result<(), String> {
        let wh = self.get(id).ok_or_else(|| "Webhook not found".to_string())?;
        let envelope = serde_json::json!({
            "event_type": "test",
            "timestamp": Utc::now(),
            "payload": { "message": "Test delivery", "webhook_id": wh.id },
        });
        let body = serde_json::to_vec(&envelope).map_err(|e| e.to_string())?;
        self.deliver(&wh, &body).await
    }

    async fn deliver(&self, wh: &WebhookConfig, body: &[u8]) -> Result<(), String> {
        let mut request = self
            .client
            .post(&wh.url)
            .header("Content-Type", "application/json")
            .header("User-Agent", "streamprobe/0.1")
            .body(body.to_vec());

        for (key, value) in &wh.headers {
            request = request.header(key, value);
        }

        if let Some(ref secret) = wh.secret {
            let signature = sign_payload(body, secret);
            request = request.header("X-Probe-Signature-256", format!("sha256={}", signature));
        }

        match request.send().await {
            Ok(resp) if resp.status().is_success() => Ok(()),
            Ok(resp) => Err(format!("HTTP {} from {}", resp.status(), wh.url)),
            Err(e) => Err(format!("Request to {} failed: {}", wh.url, e)),
        }
    }

    /// Drain the notification channel, delivering each as a webhook event.
    /// Returns when all senders are dropped.
    pub async fn run(self: std::sync::Arc<Self>, mut rx: mpsc::UnboundedReceiver<Notification>) {
        debug!("Webhook dispatcher started");
        while let Some(notification) = rx.recv().await {
            let event_type = notification.event_type();
            let payload = notification.payload();
            self.send_event(event_type, payload).await;
        }
        debug!("Webhook dispatcher shutting down");
    }
}

fn sign_payload(body: &[u8], secret: &str) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}
