//! Tracked transaction records and their lifecycle states.
//!
//! A tracked transaction is the monitor's view of one on-chain transaction
//! under observation. The record is upserted when monitoring starts, mutated
//! on every poll cycle, and frozen once a terminal state is reached. The
//! persisted record outlives the active tracker and serves as an audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a tracked transaction.
///
/// `Pending` is the only non-terminal state. A transaction that has been
/// observed in a block but has not yet reached the confirmation threshold
/// stays `Pending`; inclusion is visible through the record's block height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxState {
	/// Waiting for inclusion or for enough confirmations.
	Pending,
	/// Reached the configured confirmation threshold.
	Confirmed,
	/// Rejected on-chain; retrying can never succeed.
	Failed,
	/// Poll attempts exhausted without a definitive outcome.
	TimedOut,
}

impl TxState {
	/// Returns true if no further transitions are allowed out of this state.
	pub fn is_terminal(&self) -> bool {
		!matches!(self, TxState::Pending)
	}

	/// Checks whether a transition to `next` is allowed.
	///
	/// The only valid transitions are out of `Pending`; terminal states
	/// accept nothing, including transitions to themselves.
	pub fn can_transition(&self, next: TxState) -> bool {
		match self {
			TxState::Pending => next != TxState::Pending,
			_ => false,
		}
	}
}

impl std::fmt::Display for TxState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let s = match self {
			TxState::Pending => "pending",
			TxState::Confirmed => "confirmed",
			TxState::Failed => "failed",
			TxState::TimedOut => "timed_out",
		};
		f.write_str(s)
	}
}

/// Persisted record of one transaction under observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedTransaction {
	/// Chain-assigned transaction id. Immutable, globally unique.
	pub tx_id: String,
	/// Current lifecycle state.
	pub state: TxState,
	/// Domain payment updated on completion, if one is linked.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub payment_id: Option<String>,
	/// Transferred amount in satoshis, once the provider reports it.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub amount: Option<u64>,
	/// Sending address, once the provider reports it.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub sender: Option<String>,
	/// Receiving address, once the provider reports it.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub recipient: Option<String>,
	/// Height of the block that included the transaction.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub block_height: Option<u64>,
	/// Confirmation depth, recomputed from the chain tip on every cycle.
	pub confirmations: u64,
	/// Raw chain status that caused a `Failed` transition.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub failure_reason: Option<String>,
	/// Last raw provider response, kept opaque for audit purposes.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub raw_status: Option<serde_json::Value>,
	/// Number of poll cycles run for this transaction.
	pub attempts: u32,
	/// Timestamp when monitoring started.
	pub created_at: DateTime<Utc>,
	/// Timestamp of the last mutation.
	pub updated_at: DateTime<Utc>,
}

impl TrackedTransaction {
	/// Creates a fresh pending record for a transaction id.
	pub fn new(tx_id: impl Into<String>, payment_id: Option<String>) -> Self {
		let now = Utc::now();
		Self {
			tx_id: tx_id.into(),
			state: TxState::Pending,
			payment_id,
			amount: None,
			sender: None,
			recipient: None,
			block_height: None,
			confirmations: 0,
			failure_reason: None,
			raw_status: None,
			attempts: 0,
			created_at: now,
			updated_at: now,
		}
	}
}

/// Computes confirmation depth from the chain tip and an inclusion height.
///
/// A transaction in the tip block has depth 1. A tip behind the inclusion
/// height (provider lag between the two queries) yields 0 rather than
/// underflowing.
pub fn confirmation_depth(tip: u64, inclusion_height: u64) -> u64 {
	(tip + 1).saturating_sub(inclusion_height)
}
