//! Terminal outcome handling.
//!
//! Each tracked transaction ends in exactly one of three outcomes. The
//! handler for an outcome runs three independent best-effort steps: freeze
//! the transaction record, apply the payment/seller side effects, and fire
//! the notification. A failure in any step is logged and never prevents the
//! others, and never changes the outcome itself.

use crate::event_bus::EventBus;
use chrono::Utc;
use monitor_notify::{NotifyInterface, WebhookEvent, WebhookPayload};
use monitor_store::StoreService;
use monitor_types::{MonitorEvent, PaymentStatus, TxState};
use serde_json::json;
use std::sync::Arc;

/// How a tracked transaction's observation ended.
#[derive(Debug, Clone)]
pub(crate) enum TerminalOutcome {
	/// Reached the confirmation threshold.
	Confirmed { confirmations: u64 },
	/// Definitively rejected by the chain.
	Rejected { reason: String },
	/// Attempt cap exhausted without a definitive status.
	TimedOut { attempts: u32 },
}

/// Result of attempting to freeze the transaction record.
enum Freeze {
	/// The record moved into the terminal state.
	Applied,
	/// The record was already terminal; the outcome was applied before.
	AlreadyTerminal,
	/// The write failed; the outcome stands but was not persisted.
	WriteFailed,
}

/// Applies the side effects of terminal outcomes.
pub(crate) struct Outcomes {
	store: Arc<StoreService>,
	notifier: Option<Arc<dyn NotifyInterface>>,
	event_bus: EventBus,
}

impl Outcomes {
	pub(crate) fn new(
		store: Arc<StoreService>,
		notifier: Option<Arc<dyn NotifyInterface>>,
		event_bus: EventBus,
	) -> Self {
		Self {
			store,
			notifier,
			event_bus,
		}
	}

	/// Runs the handler for an outcome.
	///
	/// The transaction record transition acts as the once-guard: when the
	/// record is already terminal (a previous observation of the same
	/// transaction completed), the payment and seller side effects are
	/// skipped so they cannot double-apply. A failed record write is a
	/// different case: the outcome still stands, so the remaining steps run
	/// anyway.
	pub(crate) async fn apply(
		&self,
		tx_id: &str,
		payment_id: Option<&str>,
		outcome: TerminalOutcome,
	) {
		if let Freeze::AlreadyTerminal = self.freeze_record(tx_id, &outcome).await {
			tracing::warn!(
				tx_id,
				"Transaction record already terminal, skipping side effects"
			);
			return;
		}

		match &outcome {
			TerminalOutcome::Confirmed { confirmations } => {
				if let Some(payment_id) = payment_id {
					self.complete_payment(tx_id, payment_id, *confirmations).await;
				}
				self.notify(
					tx_id,
					WebhookEvent::Confirmed,
					json!({ "payment_id": payment_id }),
				)
				.await;
				self.event_bus
					.publish(MonitorEvent::Confirmed {
						tx_id: tx_id.to_string(),
						confirmations: *confirmations,
						payment_id: payment_id.map(str::to_string),
					})
					.ok();
			}
			TerminalOutcome::Rejected { reason } => {
				if let Some(payment_id) = payment_id {
					self.fail_payment(tx_id, payment_id, reason).await;
				}
				self.notify(
					tx_id,
					WebhookEvent::Failed,
					json!({ "payment_id": payment_id, "reason": reason }),
				)
				.await;
				self.event_bus
					.publish(MonitorEvent::Failed {
						tx_id: tx_id.to_string(),
						reason: reason.clone(),
						payment_id: payment_id.map(str::to_string),
					})
					.ok();
			}
			TerminalOutcome::TimedOut { attempts } => {
				if let Some(payment_id) = payment_id {
					self.expire_payment(tx_id, payment_id).await;
				}
				self.notify(
					tx_id,
					WebhookEvent::Timeout,
					json!({ "payment_id": payment_id }),
				)
				.await;
				self.event_bus
					.publish(MonitorEvent::TimedOut {
						tx_id: tx_id.to_string(),
						attempts: *attempts,
						payment_id: payment_id.map(str::to_string),
					})
					.ok();
			}
		}
	}

	/// Moves the transaction record into its terminal state.
	async fn freeze_record(&self, tx_id: &str, outcome: &TerminalOutcome) -> Freeze {
		let next = match outcome {
			TerminalOutcome::Confirmed { .. } => TxState::Confirmed,
			TerminalOutcome::Rejected { .. } => TxState::Failed,
			TerminalOutcome::TimedOut { .. } => TxState::TimedOut,
		};

		let mut applied = false;
		let result = self
			.store
			.update_transaction_with(tx_id, |tx| {
				if tx.state.can_transition(next) {
					tx.state = next;
					match outcome {
						TerminalOutcome::Confirmed { confirmations } => {
							tx.confirmations = tx.confirmations.max(*confirmations);
						}
						TerminalOutcome::Rejected { reason } => {
							tx.failure_reason = Some(reason.clone());
						}
						TerminalOutcome::TimedOut { attempts } => {
							tx.attempts = *attempts;
						}
					}
					applied = true;
				}
			})
			.await;

		match result {
			Ok(_) if applied => Freeze::Applied,
			Ok(_) => Freeze::AlreadyTerminal,
			Err(e) => {
				tracing::error!(tx_id, error = %e, "Failed to persist terminal state");
				Freeze::WriteFailed
			}
		}
	}

	async fn complete_payment(&self, tx_id: &str, payment_id: &str, confirmations: u64) {
		let payment = self
			.store
			.update_payment_with(payment_id, |payment| {
				payment.status = PaymentStatus::Completed;
				payment.completed_at = Some(Utc::now());
				payment.confirmations = confirmations;
			})
			.await;

		match payment {
			Ok(payment) => {
				if let Some(seller_id) = &payment.seller_id {
					if let Err(e) = self.store.credit_seller(seller_id, payment.net_amount).await
					{
						tracing::error!(tx_id, payment_id, seller_id = %seller_id, error = %e, "Failed to credit seller");
					}
				}
			}
			Err(e) => {
				tracing::error!(tx_id, payment_id, error = %e, "Failed to complete payment");
			}
		}
	}

	async fn fail_payment(&self, tx_id: &str, payment_id: &str, reason: &str) {
		let result = self
			.store
			.update_payment_with(payment_id, |payment| {
				payment.status = PaymentStatus::Failed;
				payment.metadata = json!({
					"failure_reason": reason,
					"failed_at": Utc::now().to_rfc3339(),
				});
			})
			.await;

		if let Err(e) = result {
			tracing::error!(tx_id, payment_id, error = %e, "Failed to mark payment failed");
		}
	}

	async fn expire_payment(&self, tx_id: &str, payment_id: &str) {
		let result = self
			.store
			.update_payment_with(payment_id, |payment| {
				payment.status = PaymentStatus::Expired;
				payment.metadata = json!({
					"timeout_at": Utc::now().to_rfc3339(),
				});
			})
			.await;

		if let Err(e) = result {
			tracing::error!(tx_id, payment_id, error = %e, "Failed to mark payment expired");
		}
	}

	async fn notify(&self, tx_id: &str, event: WebhookEvent, data: serde_json::Value) {
		let Some(notifier) = &self.notifier else {
			return;
		};
		let payload = WebhookPayload::new(event, tx_id, data);
		if let Err(e) = notifier.deliver(&payload).await {
			tracing::warn!(tx_id, event = %event, error = %e, "Webhook delivery failed");
		}
	}
}
