//! Alert dispatch
//!
//! Every alert site goes through [`AlertDispatcher::raise`] with a condition
//! key. A key that is still live in the dedupe cache is suppressed, so a
//! persistent condition pages once per TTL instead of once per loop tick.
//! Conditions that resolve call [`AlertDispatcher::resolve`] so the next
//! occurrence pages again.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::bounded_cache::BoundedHashCache;
use crate::metrics;

const DEDUPE_CACHE_SIZE: usize = 10_000;

/// Key for a transaction escalated to admin review by the recovery engine
pub fn escalation_key(tx_id: &str) -> String {
    format!("escalation:{}", tx_id)
}

/// Key for a transaction an operator parked for manual review
pub fn review_key(tx_id: &str) -> String {
    format!("review:{}", tx_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Destination for operator alerts
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn notify(&self, severity: Severity, message: &str, context: &Value) -> eyre::Result<()>;
}

/// Writes alerts to the log
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn notify(&self, severity: Severity, message: &str, context: &Value) -> eyre::Result<()> {
        match severity {
            Severity::Critical => error!(alert = true, %context, "{}", message),
            Severity::Warning => warn!(alert = true, %context, "{}", message),
            Severity::Info => info!(alert = true, %context, "{}", message),
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    severity: Severity,
    message: &'a str,
    context: &'a Value,
    timestamp: String,
}

/// Posts alerts as JSON to a webhook and mirrors them to the log
pub struct WebhookAlertSink {
    url: String,
    client: Client,
}

impl WebhookAlertSink {
    pub fn new(url: &str, timeout: Duration) -> eyre::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.to_string(),
            client,
        })
    }
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    async fn notify(&self, severity: Severity, message: &str, context: &Value) -> eyre::Result<()> {
        LogAlertSink.notify(severity, message, context).await?;
        self.client
            .post(&self.url)
            .json(&WebhookPayload {
                severity,
                message,
                context,
                timestamp: chrono::Utc::now().to_rfc3339(),
            })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Deduplicating front for an [`AlertSink`]
pub struct AlertDispatcher {
    sink: Arc<dyn AlertSink>,
    seen: Mutex<BoundedHashCache>,
}

impl AlertDispatcher {
    pub fn new(sink: Arc<dyn AlertSink>, dedupe_ttl: Duration) -> Self {
        Self {
            sink,
            seen: Mutex::new(BoundedHashCache::new(DEDUPE_CACHE_SIZE, dedupe_ttl)),
        }
    }

    /// Send an alert unless `key` already fired within the dedupe TTL.
    /// Returns whether the alert was delivered to the sink.
    pub async fn raise(&self, key: &str, severity: Severity, message: &str, context: Value) -> bool {
        let first = match self.seen.lock() {
            Ok(mut seen) => seen.insert(key),
            Err(poisoned) => poisoned.into_inner().insert(key),
        };
        if !first {
            tracing::debug!(key, "Alert suppressed by dedupe");
            return false;
        }

        let kind = key.split(':').next().unwrap_or(key);
        metrics::record_alert(severity.as_str(), kind);
        if let Err(e) = self.sink.notify(severity, message, &context).await {
            // Delivery failed: forget the key so the next occurrence retries
            warn!(key, error = %e, "Failed to deliver alert");
            self.resolve(key);
            return false;
        }
        true
    }

    /// Mark a condition as cleared so it can alert again
    pub fn resolve(&self, key: &str) {
        match self.seen.lock() {
            Ok(mut seen) => seen.remove(key),
            Err(poisoned) => poisoned.into_inner().remove(key),
        };
    }

    /// Clear a transaction's escalation and review conditions once it is
    /// handed back to recovery or settled
    pub fn resolve_escalation(&self, tx_id: &str) {
        self.resolve(&escalation_key(tx_id));
        self.resolve(&review_key(tx_id));
    }
}
