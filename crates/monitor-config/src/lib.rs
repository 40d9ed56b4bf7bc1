//! Configuration for the payment confirmation monitor.
//!
//! Configuration is loaded from a TOML file. Every tunable has a default so
//! a minimal file only needs to name the chain and store backends; the
//! monitor section can be omitted entirely.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error that occurs during file I/O operations.
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	/// Error that occurs when parsing TOML configuration.
	#[error("Configuration error: {0}")]
	Parse(String),
	/// Error that occurs when configuration validation fails.
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// Extract just the message without the input dump
		ConfigError::Parse(err.message().to_string())
	}
}

/// Top-level configuration for the monitor service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	/// Poll cadence and termination bounds.
	#[serde(default)]
	pub monitor: MonitorSettings,
	/// Chain status provider selection and per-implementation settings.
	pub chain: ChainConfig,
	/// Persistence backend selection and per-implementation settings.
	pub store: StoreConfig,
	/// Webhook delivery target. Notifications are disabled when absent.
	pub webhook: Option<WebhookConfig>,
}

/// Poll cadence and termination bounds for the confirmation monitor.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitorSettings {
	/// Confirmations required before a transaction is treated as final.
	#[serde(default = "default_confirmation_threshold")]
	pub confirmation_threshold: u64,
	/// Poll cycles before monitoring gives up on a transaction.
	#[serde(default = "default_max_attempts")]
	pub max_attempts: u32,
	/// Delay between poll cycles, in milliseconds.
	#[serde(default = "default_poll_interval_ms")]
	pub poll_interval_ms: u64,
	/// Delay before the first poll, in milliseconds. Gives a freshly
	/// broadcast transaction time to propagate before the first query.
	#[serde(default = "default_initial_delay_ms")]
	pub initial_delay_ms: u64,
}

fn default_confirmation_threshold() -> u64 {
	1
}

/// 120 cycles at the default 5s interval bounds monitoring at ten minutes.
fn default_max_attempts() -> u32 {
	120
}

fn default_poll_interval_ms() -> u64 {
	5000
}

fn default_initial_delay_ms() -> u64 {
	1000
}

impl Default for MonitorSettings {
	fn default() -> Self {
		Self {
			confirmation_threshold: default_confirmation_threshold(),
			max_attempts: default_max_attempts(),
			poll_interval_ms: default_poll_interval_ms(),
			initial_delay_ms: default_initial_delay_ms(),
		}
	}
}

impl MonitorSettings {
	/// Delay between poll cycles.
	pub fn poll_interval(&self) -> Duration {
		Duration::from_millis(self.poll_interval_ms)
	}

	/// Delay before the first poll.
	pub fn initial_delay(&self) -> Duration {
		Duration::from_millis(self.initial_delay_ms)
	}
}

/// Webhook delivery configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebhookConfig {
	/// URL that receives terminal outcome notifications.
	pub url: String,
	/// Request timeout for a single delivery, in milliseconds.
	#[serde(default = "default_webhook_timeout_ms")]
	pub timeout_ms: u64,
}

fn default_webhook_timeout_ms() -> u64 {
	10_000
}

impl WebhookConfig {
	/// Request timeout for a single delivery.
	pub fn timeout(&self) -> Duration {
		Duration::from_millis(self.timeout_ms)
	}
}

/// Chain status provider configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChainConfig {
	/// Which implementation to use.
	pub primary: String,
	/// Map of implementation names to their configurations.
	#[serde(default)]
	pub implementations: HashMap<String, toml::Value>,
}

/// Persistence backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
	/// Which implementation to use.
	pub primary: String,
	/// Map of implementation names to their configurations.
	#[serde(default)]
	pub implementations: HashMap<String, toml::Value>,
}

impl Config {
	/// Loads and validates configuration from a TOML file.
	pub async fn from_file(path: &str) -> Result<Self, ConfigError> {
		let content = tokio::fs::read_to_string(path).await?;
		content.parse()
	}

	/// Checks the cross-field invariants that serde cannot express.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.monitor.confirmation_threshold == 0 {
			return Err(ConfigError::Validation(
				"monitor.confirmation_threshold must be at least 1".into(),
			));
		}
		if self.monitor.max_attempts == 0 {
			return Err(ConfigError::Validation(
				"monitor.max_attempts must be at least 1".into(),
			));
		}
		if let Some(webhook) = &self.webhook {
			if webhook.url.trim().is_empty() {
				return Err(ConfigError::Validation("webhook.url must not be empty".into()));
			}
		}
		if !self.chain.implementations.contains_key(&self.chain.primary) {
			return Err(ConfigError::Validation(format!(
				"chain.primary '{}' has no matching [chain.implementations.{}] table",
				self.chain.primary, self.chain.primary
			)));
		}
		if !self.store.implementations.contains_key(&self.store.primary) {
			return Err(ConfigError::Validation(format!(
				"store.primary '{}' has no matching [store.implementations.{}] table",
				self.store.primary, self.store.primary
			)));
		}
		Ok(())
	}
}

impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let config: Config = toml::from_str(s)?;
		config.validate()?;
		Ok(config)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs;
	use tempfile::TempDir;

	const MINIMAL: &str = r#"
[chain]
primary = "stacks"
[chain.implementations.stacks]
api_url = "https://api.testnet.hiro.so"

[store]
primary = "memory"
[store.implementations.memory]
"#;

	#[test]
	fn minimal_config_gets_defaults() {
		let config: Config = MINIMAL.parse().unwrap();
		assert_eq!(config.monitor.confirmation_threshold, 1);
		assert_eq!(config.monitor.max_attempts, 120);
		assert_eq!(config.monitor.poll_interval(), Duration::from_secs(5));
		assert_eq!(config.monitor.initial_delay(), Duration::from_secs(1));
		assert!(config.webhook.is_none());
	}

	#[test]
	fn explicit_values_override_defaults() {
		let content = format!(
			r#"
[monitor]
confirmation_threshold = 3
max_attempts = 10
poll_interval_ms = 250
initial_delay_ms = 0

[webhook]
url = "https://example.com/hooks/payments"
{MINIMAL}"#
		);
		let config: Config = content.parse().unwrap();
		assert_eq!(config.monitor.confirmation_threshold, 3);
		assert_eq!(config.monitor.max_attempts, 10);
		assert_eq!(config.monitor.poll_interval(), Duration::from_millis(250));
		assert_eq!(config.monitor.initial_delay(), Duration::ZERO);
		let webhook = config.webhook.unwrap();
		assert_eq!(webhook.url, "https://example.com/hooks/payments");
		assert_eq!(webhook.timeout(), Duration::from_secs(10));
	}

	#[test]
	fn zero_threshold_is_rejected() {
		let content = format!("[monitor]\nconfirmation_threshold = 0\n{MINIMAL}");
		let err = content.parse::<Config>().unwrap_err();
		assert!(matches!(err, ConfigError::Validation(_)));
	}

	#[test]
	fn zero_max_attempts_is_rejected() {
		let content = format!("[monitor]\nmax_attempts = 0\n{MINIMAL}");
		let err = content.parse::<Config>().unwrap_err();
		assert!(matches!(err, ConfigError::Validation(_)));
	}

	#[test]
	fn empty_webhook_url_is_rejected() {
		let content = format!("[webhook]\nurl = \"  \"\n{MINIMAL}");
		let err = content.parse::<Config>().unwrap_err();
		assert!(matches!(err, ConfigError::Validation(_)));
	}

	#[test]
	fn primary_without_implementation_table_is_rejected() {
		let content = r#"
[chain]
primary = "stacks"

[store]
primary = "memory"
[store.implementations.memory]
"#;
		let err = content.parse::<Config>().unwrap_err();
		assert!(matches!(err, ConfigError::Validation(_)));
	}

	#[test]
	fn malformed_toml_reports_parse_error() {
		let err = "[chain".parse::<Config>().unwrap_err();
		assert!(matches!(err, ConfigError::Parse(_)));
	}

	#[tokio::test]
	async fn loads_from_file() {
		let temp_dir = TempDir::new().unwrap();
		let config_path = temp_dir.path().join("config.toml");
		fs::write(&config_path, MINIMAL).unwrap();

		let config = Config::from_file(config_path.to_str().unwrap()).await.unwrap();
		assert_eq!(config.chain.primary, "stacks");
		assert_eq!(config.store.primary, "memory");
	}

	#[tokio::test]
	async fn missing_file_reports_io_error() {
		let err = Config::from_file("/nonexistent/config.toml").await.unwrap_err();
		assert!(matches!(err, ConfigError::Io(_)));
	}
}
