//! Payment and seller records mutated as confirmation side effects.
//!
//! These entities are owned by the payment API layer; the monitor only
//! performs the status update, completion stamping, and earnings credit
//! that follow from a transaction's terminal outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a domain payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
	/// Awaiting transaction confirmation.
	Pending,
	/// The linked transaction reached the confirmation threshold.
	Completed,
	/// The linked transaction was rejected on-chain.
	Failed,
	/// Monitoring gave up before a definitive outcome.
	Expired,
}

/// A payment awaiting settlement by an on-chain transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
	/// Unique payment id, assigned by the payment API.
	pub id: String,
	/// Seller credited when this payment completes.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub seller_id: Option<String>,
	/// Amount credited to the seller on completion, in satoshis.
	pub net_amount: u64,
	/// Current payment status.
	pub status: PaymentStatus,
	/// Confirmation count recorded at completion.
	pub confirmations: u64,
	/// Timestamp stamped when the payment completed.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub completed_at: Option<DateTime<Utc>>,
	/// Free-form metadata, e.g. failure or timeout details.
	#[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
	pub metadata: serde_json::Value,
	/// Timestamp when the payment was created.
	pub created_at: DateTime<Utc>,
	/// Timestamp of the last mutation.
	pub updated_at: DateTime<Utc>,
}

impl Payment {
	/// Creates a pending payment. Used by tests and tooling; production
	/// payments are created by the API layer.
	pub fn new(id: impl Into<String>, seller_id: Option<String>, net_amount: u64) -> Self {
		let now = Utc::now();
		Self {
			id: id.into(),
			seller_id,
			net_amount,
			status: PaymentStatus::Pending,
			confirmations: 0,
			completed_at: None,
			metadata: serde_json::Value::Null,
			created_at: now,
			updated_at: now,
		}
	}
}

/// Running totals for a seller, credited exactly once per confirmed payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Seller {
	/// Unique seller id.
	pub id: String,
	/// Cumulative earnings in satoshis.
	pub total_earnings: u64,
	/// Number of completed payments.
	pub total_payments: u64,
	/// Timestamp of the last credit.
	pub updated_at: DateTime<Utc>,
}

impl Seller {
	/// Creates a seller record with zeroed totals.
	pub fn new(id: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			total_earnings: 0,
			total_payments: 0,
			updated_at: Utc::now(),
		}
	}
}
