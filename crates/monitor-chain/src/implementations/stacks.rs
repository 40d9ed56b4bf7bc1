//! Stacks HTTP API chain provider.
//!
//! Queries the extended transaction endpoint for per-transaction status and
//! the block listing endpoint for the tip height. Response bodies are kept
//! as opaque JSON apart from the handful of fields the monitor acts on.

use crate::{ChainError, ChainInterface};
use async_trait::async_trait;
use monitor_types::TxStatusResponse;
use std::time::Duration;

const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Chain provider backed by a Stacks API node.
pub struct StacksChain {
	client: reqwest::Client,
	api_url: String,
}

impl StacksChain {
	/// Creates a provider for the given API base URL.
	pub fn new(api_url: &str, request_timeout: Duration) -> Result<Self, ChainError> {
		let client = reqwest::Client::builder()
			.timeout(request_timeout)
			.build()
			.map_err(|e| ChainError::Configuration(e.to_string()))?;
		Ok(Self {
			client,
			api_url: api_url.trim_end_matches('/').to_string(),
		})
	}

	async fn get_json(&self, url: &str) -> Result<serde_json::Value, ChainError> {
		let response = self
			.client
			.get(url)
			.send()
			.await
			.map_err(|e| ChainError::Network(e.to_string()))?;

		if response.status() == reqwest::StatusCode::NOT_FOUND {
			return Err(ChainError::NotFound(url.to_string()));
		}
		if !response.status().is_success() {
			return Err(ChainError::Network(format!(
				"HTTP {} from {}",
				response.status(),
				url
			)));
		}

		response
			.json()
			.await
			.map_err(|e| ChainError::MalformedResponse(e.to_string()))
	}
}

#[async_trait]
impl ChainInterface for StacksChain {
	async fn transaction_status(&self, tx_id: &str) -> Result<TxStatusResponse, ChainError> {
		let url = format!("{}/extended/v1/tx/{}", self.api_url, tx_id);
		let raw = match self.get_json(&url).await {
			Err(ChainError::NotFound(_)) => return Err(ChainError::NotFound(tx_id.to_string())),
			other => other?,
		};
		TxStatusResponse::from_raw(raw)
			.ok_or_else(|| ChainError::MalformedResponse("response missing tx_status".into()))
	}

	async fn block_height(&self) -> Result<u64, ChainError> {
		let url = format!("{}/extended/v1/block?limit=1", self.api_url);
		let body = self.get_json(&url).await?;
		body.get("results")
			.and_then(|r| r.get(0))
			.and_then(|b| b.get("height"))
			.and_then(|h| h.as_u64())
			.ok_or_else(|| ChainError::MalformedResponse("block listing missing height".into()))
	}
}

/// Factory function to create a Stacks chain provider from configuration.
///
/// Configuration parameters:
/// - `api_url` (required): base URL of the Stacks API node
/// - `request_timeout_ms` (optional): per-request timeout, default 10000
pub fn create_chain(config: &toml::Value) -> Result<Box<dyn ChainInterface>, ChainError> {
	let api_url = config
		.get("api_url")
		.and_then(|v| v.as_str())
		.ok_or_else(|| ChainError::Configuration("api_url is required".into()))?;
	let timeout_ms = config
		.get("request_timeout_ms")
		.and_then(|v| v.as_integer())
		.map(|v| v as u64)
		.unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS);

	let provider = StacksChain::new(api_url, Duration::from_millis(timeout_ms))?;
	Ok(Box::new(provider))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn factory_requires_api_url() {
		let config: toml::Value = toml::from_str("request_timeout_ms = 500").unwrap();
		assert!(matches!(
			create_chain(&config),
			Err(ChainError::Configuration(_))
		));
	}

	#[test]
	fn factory_accepts_minimal_config() {
		let config: toml::Value =
			toml::from_str("api_url = \"https://api.testnet.hiro.so/\"").unwrap();
		assert!(create_chain(&config).is_ok());
	}

	#[test]
	fn trailing_slash_is_stripped() {
		let chain =
			StacksChain::new("https://api.testnet.hiro.so/", Duration::from_secs(1)).unwrap();
		assert_eq!(chain.api_url, "https://api.testnet.hiro.so");
	}
}
