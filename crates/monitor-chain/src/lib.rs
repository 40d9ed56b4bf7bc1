//! Chain status provider boundary for the payment monitor.
//!
//! The monitor consumes the chain as a capability: fetch the status of a
//! transaction and the current tip height. Providers are expected to fail
//! transiently (network errors, a transaction not yet propagated); callers
//! treat every `ChainError` as retryable up to their attempt cap.

use async_trait::async_trait;
use monitor_types::TxStatusResponse;
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod stacks;
}

/// Errors that can occur while querying the chain.
#[derive(Debug, Error)]
pub enum ChainError {
	/// Error that occurs during network communication.
	#[error("Network error: {0}")]
	Network(String),
	/// The provider does not know the transaction. Expected for a short
	/// window after broadcast, so callers treat it like a pending status.
	#[error("Transaction not found: {0}")]
	NotFound(String),
	/// The provider answered with a body the client could not interpret.
	#[error("Malformed response: {0}")]
	MalformedResponse(String),
	/// Error that occurs during provider construction.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Trait defining the interface for chain status providers.
#[async_trait]
pub trait ChainInterface: Send + Sync {
	/// Fetches the current status of a transaction.
	async fn transaction_status(&self, tx_id: &str) -> Result<TxStatusResponse, ChainError>;

	/// Fetches the height of the chain tip.
	async fn block_height(&self) -> Result<u64, ChainError>;
}

/// Type alias for chain provider factory functions.
pub type ChainFactory = fn(&toml::Value) -> Result<Box<dyn ChainInterface>, ChainError>;

/// Service wrapping the configured chain provider.
pub struct ChainService {
	provider: Box<dyn ChainInterface>,
}

impl ChainService {
	/// Creates a new ChainService with the specified provider.
	pub fn new(provider: Box<dyn ChainInterface>) -> Self {
		Self { provider }
	}

	/// Fetches the current status of a transaction.
	pub async fn transaction_status(&self, tx_id: &str) -> Result<TxStatusResponse, ChainError> {
		let status = self.provider.transaction_status(tx_id).await?;
		tracing::trace!(tx_id, tx_status = %status.tx_status, "Fetched transaction status");
		Ok(status)
	}

	/// Fetches the height of the chain tip.
	pub async fn block_height(&self) -> Result<u64, ChainError> {
		self.provider.block_height().await
	}
}
