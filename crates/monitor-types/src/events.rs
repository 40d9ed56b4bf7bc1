//! Events published by the confirmation monitor.
//!
//! Observers subscribe through the monitor's event bus and receive one
//! `StatusUpdate` per successful poll plus a single terminal event per
//! transaction.

use crate::chain::TxStatusResponse;
use serde::{Deserialize, Serialize};

/// Events emitted while a transaction is under observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MonitorEvent {
	/// The provider returned a status for a tracked transaction.
	StatusUpdate {
		tx_id: String,
		status: TxStatusResponse,
	},
	/// The transaction reached the confirmation threshold.
	Confirmed {
		tx_id: String,
		confirmations: u64,
		payment_id: Option<String>,
	},
	/// The chain rejected the transaction.
	Failed {
		tx_id: String,
		reason: String,
		payment_id: Option<String>,
	},
	/// Monitoring gave up after exhausting poll attempts.
	TimedOut {
		tx_id: String,
		attempts: u32,
		payment_id: Option<String>,
	},
}

impl MonitorEvent {
	/// The transaction id this event refers to.
	pub fn tx_id(&self) -> &str {
		match self {
			MonitorEvent::StatusUpdate { tx_id, .. }
			| MonitorEvent::Confirmed { tx_id, .. }
			| MonitorEvent::Failed { tx_id, .. }
			| MonitorEvent::TimedOut { tx_id, .. } => tx_id,
		}
	}
}
