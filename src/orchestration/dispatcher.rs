//! # Delivery Channel Abstractions
//!
//! Outbound responses and the dispatcher registry. The orchestrator calls
//! `dispatch_all` — it never talks to a specific channel directly. Adding a
//! delivery channel is one `ResponseDispatcher` implementation plus one
//! `register` call; nothing in the orchestrator changes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// A message a handler wants delivered to a specific recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundResponse {
    /// e.g. "subject", "proxy:PRX-001", "operator"
    pub recipient: String,
    /// Must match a registered dispatcher's channel name
    pub channel: String,
    pub message: String,
    #[serde(default)]
    pub attachments: Vec<String>,
    /// Channel-specific extras (subject line, template id, flags)
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl OutboundResponse {
    pub fn new(
        recipient: impl Into<String>,
        channel: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            recipient: recipient.into(),
            channel: channel.into(),
            message: message.into(),
            attachments: Vec::new(),
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Outcome of a single delivery attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub success: bool,
    pub channel: String,
    pub recipient: String,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl DeliveryResult {
    pub fn delivered(channel: &str, recipient: &str) -> Self {
        Self {
            success: true,
            channel: channel.to_string(),
            recipient: recipient.to_string(),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(channel: &str, recipient: &str, error: impl Into<String>) -> Self {
        Self {
            success: false,
            channel: channel.to_string(),
            recipient: recipient.to_string(),
            error: Some(error.into()),
            timestamp: Utc::now(),
        }
    }
}

/// Outbound channel contract — delivers responses to one channel.
#[async_trait]
pub trait ResponseDispatcher: Send + Sync {
    /// The channel name responses are routed by.
    fn channel_name(&self) -> &str;

    /// Deliver a single response. Must not panic — failures are reported
    /// through the returned `DeliveryResult`.
    async fn send(&self, response: &OutboundResponse) -> DeliveryResult;
}

/// Registry of active dispatchers, keyed by channel name.
#[derive(Default)]
pub struct DispatcherRegistry {
    dispatchers: DashMap<String, Arc<dyn ResponseDispatcher>>,
}

impl DispatcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, dispatcher: Arc<dyn ResponseDispatcher>) {
        let name = dispatcher.channel_name().to_string();
        info!(channel = %name, "Registered channel dispatcher");
        self.dispatchers.insert(name, dispatcher);
    }

    pub fn unregister(&self, channel_name: &str) {
        self.dispatchers.remove(channel_name);
    }

    pub fn get(&self, channel_name: &str) -> Option<Arc<dyn ResponseDispatcher>> {
        self.dispatchers.get(channel_name).map(|d| Arc::clone(&d))
    }

    pub fn registered_channels(&self) -> Vec<String> {
        self.dispatchers.iter().map(|d| d.key().clone()).collect()
    }

    pub fn channel_count(&self) -> usize {
        self.dispatchers.len()
    }

    /// Route one response to its dispatcher, with a single retry on failure.
    pub async fn dispatch(&self, response: &OutboundResponse) -> DeliveryResult {
        let Some(dispatcher) = self.get(&response.channel) else {
            warn!(
                channel = %response.channel,
                recipient = %response.recipient,
                "No dispatcher for channel — response stored only"
            );
            return DeliveryResult::failed(
                &response.channel,
                &response.recipient,
                format!("no dispatcher registered for channel '{}'", response.channel),
            );
        };

        let first = dispatcher.send(response).await;
        if first.success {
            return first;
        }

        warn!(
            channel = %response.channel,
            recipient = %response.recipient,
            error = first.error.as_deref().unwrap_or(""),
            "Dispatch failed (attempt 1) — retrying"
        );
        tokio::time::sleep(Duration::from_millis(500)).await;
        dispatcher.send(response).await
    }

    /// Dispatch every response in a result set, collecting per-response
    /// outcomes. A failure never affects the delivery of the others.
    pub async fn dispatch_all(&self, responses: &[OutboundResponse]) -> Vec<DeliveryResult> {
        let mut results = Vec::with_capacity(responses.len());
        for response in responses {
            results.push(self.dispatch(response).await);
        }
        results
    }
}
