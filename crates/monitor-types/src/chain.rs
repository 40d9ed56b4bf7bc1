//! Chain status payloads returned by the transaction status provider.
//!
//! The provider's response schema is external and evolving, so only the
//! fields the monitor acts on are typed; the full response is retained as an
//! opaque JSON value on the tracked record.

use serde::{Deserialize, Serialize};

/// Chain statuses that mean the transaction was definitively rejected.
///
/// Anything that is neither `success` nor one of these is treated as still
/// pending, which also covers responses for transactions the provider has
/// not seen yet.
const REJECTED_STATUSES: [&str; 2] = ["abort_by_post_condition", "abort_by_response"];

/// Token transfer details embedded in a transaction status response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenTransfer {
	/// Transferred amount as a decimal string of satoshis.
	#[serde(default)]
	pub amount: Option<String>,
	/// Receiving address.
	#[serde(default)]
	pub recipient_address: Option<String>,
}

/// Typed view over a provider transaction status response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxStatusResponse {
	/// Raw status string as reported by the chain API.
	pub tx_status: String,
	/// Height of the including block, present once mined.
	#[serde(default)]
	pub block_height: Option<u64>,
	/// Sending address.
	#[serde(default)]
	pub sender_address: Option<String>,
	/// Transfer details, present for token transfer transactions.
	#[serde(default)]
	pub token_transfer: Option<TokenTransfer>,
	/// The complete response body, kept for auditing.
	#[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
	pub raw: serde_json::Value,
}

impl TxStatusResponse {
	/// Parses the typed fields out of a raw response body and retains the
	/// body itself. Missing or differently shaped fields degrade to `None`
	/// rather than failing, except for the status string which must exist.
	pub fn from_raw(raw: serde_json::Value) -> Option<Self> {
		let tx_status = raw.get("tx_status")?.as_str()?.to_string();
		let block_height = raw.get("block_height").and_then(|v| v.as_u64());
		let sender_address = raw
			.get("sender_address")
			.and_then(|v| v.as_str())
			.map(str::to_string);
		let token_transfer = raw
			.get("token_transfer")
			.cloned()
			.and_then(|v| serde_json::from_value(v).ok());
		Some(Self {
			tx_status,
			block_height,
			sender_address,
			token_transfer,
			raw,
		})
	}

	/// Returns true if the chain reports the transaction as succeeded.
	pub fn is_success(&self) -> bool {
		self.tx_status == "success"
	}

	/// Returns the raw status string if the chain definitively rejected the
	/// transaction.
	pub fn rejection(&self) -> Option<&str> {
		REJECTED_STATUSES
			.contains(&self.tx_status.as_str())
			.then_some(self.tx_status.as_str())
	}

	/// Transferred amount parsed to satoshis, if reported.
	pub fn transfer_amount(&self) -> Option<u64> {
		self.token_transfer
			.as_ref()
			.and_then(|t| t.amount.as_deref())
			.and_then(|a| a.parse().ok())
	}
}
