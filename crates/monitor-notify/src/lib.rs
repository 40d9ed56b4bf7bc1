//! Webhook notification for terminal transaction outcomes.
//!
//! Delivery is best-effort by contract: the monitor fires one notification
//! per terminal transition, logs a failure, and never retries. Consumers
//! that need stronger guarantees should reconcile against the persisted
//! transaction records.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// User agent sent with every delivery.
const USER_AGENT: &str = concat!("sbtc-monitor/", env!("CARGO_PKG_VERSION"));

/// Errors that can occur during webhook delivery.
#[derive(Debug, Error)]
pub enum NotifyError {
	/// Error that occurs during network communication.
	#[error("Network error: {0}")]
	Network(String),
	/// The receiver answered with a non-success status.
	#[error("Webhook rejected: HTTP {0}")]
	Rejected(u16),
	/// Error that occurs during notifier construction.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Terminal outcome identifiers carried in the payload `event` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookEvent {
	/// Transaction reached the confirmation threshold.
	Confirmed,
	/// Transaction was rejected on-chain.
	Failed,
	/// Monitoring gave up without a definitive outcome.
	Timeout,
}

impl std::fmt::Display for WebhookEvent {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let s = match self {
			WebhookEvent::Confirmed => "confirmed",
			WebhookEvent::Failed => "failed",
			WebhookEvent::Timeout => "timeout",
		};
		f.write_str(s)
	}
}

/// JSON body posted to the configured webhook URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
	/// Which terminal outcome occurred.
	pub event: WebhookEvent,
	/// Transaction the outcome applies to.
	pub tx_id: String,
	/// Delivery timestamp, RFC 3339.
	pub timestamp: String,
	/// Outcome details: linked payment id, rejection reason.
	pub data: serde_json::Value,
}

impl WebhookPayload {
	/// Builds a payload stamped with the current time.
	pub fn new(event: WebhookEvent, tx_id: impl Into<String>, data: serde_json::Value) -> Self {
		Self {
			event,
			tx_id: tx_id.into(),
			timestamp: Utc::now().to_rfc3339(),
			data,
		}
	}
}

/// Trait defining the interface for notification senders.
#[async_trait]
pub trait NotifyInterface: Send + Sync {
	/// Delivers one notification.
	async fn deliver(&self, payload: &WebhookPayload) -> Result<(), NotifyError>;
}

/// Notifier that POSTs payloads to a single configured URL.
pub struct WebhookNotifier {
	client: reqwest::Client,
	url: String,
}

impl WebhookNotifier {
	/// Creates a notifier for the given URL with a per-request timeout.
	pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
		let client = reqwest::Client::builder()
			.timeout(timeout)
			.user_agent(USER_AGENT)
			.build()
			.map_err(|e| NotifyError::Configuration(e.to_string()))?;
		Ok(Self {
			client,
			url: url.into(),
		})
	}
}

#[async_trait]
impl NotifyInterface for WebhookNotifier {
	async fn deliver(&self, payload: &WebhookPayload) -> Result<(), NotifyError> {
		let response = self
			.client
			.post(&self.url)
			.json(payload)
			.send()
			.await
			.map_err(|e| NotifyError::Network(e.to_string()))?;

		if !response.status().is_success() {
			return Err(NotifyError::Rejected(response.status().as_u16()));
		}

		tracing::debug!(tx_id = %payload.tx_id, event = %payload.event, "Webhook delivered");
		Ok(())
	}
}
