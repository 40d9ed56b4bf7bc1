//! Confirmation monitor: drives tracked transactions to a terminal outcome.
//!
//! One task per transaction id polls the chain on a fixed interval,
//! classifies the reported status, and on a terminal result applies the
//! outcome side effects and deregisters itself. Cycles for a single id run
//! strictly sequentially; the next poll is scheduled only after the current
//! cycle, including its persistence write, has completed.

use crate::event_bus::EventBus;
use crate::outcomes::{Outcomes, TerminalOutcome};
use monitor_chain::{ChainError, ChainService};
use monitor_config::MonitorSettings;
use monitor_notify::NotifyInterface;
use monitor_store::{StoreError, StoreService};
use monitor_types::{
	transaction::confirmation_depth, MonitorEvent, TrackedTransaction, TxStatusResponse,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

/// Shortens an id for log output.
fn truncate_id(id: &str) -> String {
	if id.len() <= 8 {
		id.to_string()
	} else {
		format!("{}..", &id[..8])
	}
}

/// Cancellation handle for one tracker task.
///
/// `cancelled` is the source of truth; `wake` only shortcuts a sleeping
/// tracker so cancellation does not wait out the poll interval. The flag is
/// always set before the wake so a tracker can never observe the wake
/// without the flag.
struct TrackerHandle {
	cancelled: Arc<AtomicBool>,
	wake: Arc<Notify>,
}

impl TrackerHandle {
	fn cancel(&self) {
		self.cancelled.store(true, Ordering::SeqCst);
		self.wake.notify_waiters();
	}
}

type Registry = Arc<Mutex<HashMap<String, TrackerHandle>>>;

/// Monitors submitted transactions until they confirm, fail, or time out.
///
/// Construct one instance per process with the collaborators injected;
/// tests construct isolated instances with scripted collaborators. The
/// public operations never return errors: faults are logged and converted
/// into state transitions or no-ops.
pub struct ConfirmationMonitor {
	settings: MonitorSettings,
	chain: Arc<ChainService>,
	store: Arc<StoreService>,
	outcomes: Arc<Outcomes>,
	event_bus: EventBus,
	active: Registry,
}

impl ConfirmationMonitor {
	/// Creates a monitor from its configuration and collaborators.
	pub fn new(
		settings: MonitorSettings,
		chain: Arc<ChainService>,
		store: Arc<StoreService>,
		notifier: Option<Arc<dyn NotifyInterface>>,
		event_bus: EventBus,
	) -> Self {
		let outcomes = Arc::new(Outcomes::new(
			store.clone(),
			notifier,
			event_bus.clone(),
		));
		Self {
			settings,
			chain,
			store,
			outcomes,
			event_bus,
			active: Arc::new(Mutex::new(HashMap::new())),
		}
	}

	/// Returns the event bus observers can subscribe to.
	pub fn event_bus(&self) -> &EventBus {
		&self.event_bus
	}

	/// Number of transactions currently under observation.
	pub fn active_count(&self) -> usize {
		self.registry().len()
	}

	fn registry(&self) -> MutexGuard<'_, HashMap<String, TrackerHandle>> {
		self.active.lock().unwrap_or_else(PoisonError::into_inner)
	}

	/// Begins monitoring a transaction, optionally linked to a payment.
	///
	/// Starting an id that is already being monitored is a no-op, which is
	/// what makes the terminal side effects exactly-once. The first poll
	/// runs after the configured initial delay so a freshly broadcast
	/// transaction has time to propagate.
	pub fn start_monitoring(&self, tx_id: &str, payment_id: Option<String>) {
		if tx_id.is_empty() {
			tracing::warn!("Ignoring start request for empty transaction id");
			return;
		}

		let cancelled = Arc::new(AtomicBool::new(false));
		let wake = Arc::new(Notify::new());
		{
			let mut registry = self.registry();
			if registry.contains_key(tx_id) {
				tracing::info!(tx_id = %truncate_id(tx_id), "Already monitoring transaction");
				return;
			}
			registry.insert(
				tx_id.to_string(),
				TrackerHandle {
					cancelled: cancelled.clone(),
					wake: wake.clone(),
				},
			);
		}

		tracing::info!(tx_id = %truncate_id(tx_id), "Starting to monitor transaction");

		let tracker = Tracker {
			tx_id: tx_id.to_string(),
			payment_id,
			settings: self.settings.clone(),
			chain: self.chain.clone(),
			store: self.store.clone(),
			outcomes: self.outcomes.clone(),
			event_bus: self.event_bus.clone(),
			registry: self.active.clone(),
			cancelled,
			wake,
		};
		tokio::spawn(tracker.run());
	}

	/// Stops monitoring a transaction.
	///
	/// A scheduled poll that has not fired is cancelled; a poll that is
	/// mid-cycle completes but acts on nothing. The persisted record is
	/// left untouched. Unknown ids are a no-op.
	pub fn stop_monitoring(&self, tx_id: &str) {
		let handle = self.registry().remove(tx_id);
		if let Some(handle) = handle {
			handle.cancel();
			tracing::info!(tx_id = %truncate_id(tx_id), "Stopped monitoring transaction");
		}
	}

	/// Cancels every active poll. Called at process shutdown; never panics.
	pub fn stop_all(&self) {
		let handles: Vec<(String, TrackerHandle)> = self.registry().drain().collect();
		for (tx_id, handle) in &handles {
			handle.cancel();
			tracing::debug!(tx_id = %truncate_id(tx_id), "Cancelled tracker");
		}
		if !handles.is_empty() {
			tracing::info!(count = handles.len(), "Stopped all transaction monitoring");
		}
	}
}

/// Result of one poll cycle.
enum Cycle {
	/// Poll again after the retry interval.
	Reschedule,
	/// Monitoring is over; run the outcome handler.
	Terminal(TerminalOutcome),
}

/// State for one transaction's monitoring task.
struct Tracker {
	tx_id: String,
	payment_id: Option<String>,
	settings: MonitorSettings,
	chain: Arc<ChainService>,
	store: Arc<StoreService>,
	outcomes: Arc<Outcomes>,
	event_bus: EventBus,
	registry: Registry,
	cancelled: Arc<AtomicBool>,
	wake: Arc<Notify>,
}

impl Tracker {
	async fn run(self) {
		self.seed_record().await;

		if !self.sleep_unless_cancelled(self.settings.initial_delay()).await {
			return;
		}

		let mut attempts: u32 = 0;
		loop {
			attempts += 1;
			let cycle = self.run_cycle(attempts).await;

			// A cancellation that raced the in-flight cycle wins: the
			// tracker must not act on results observed after stop.
			if self.cancelled.load(Ordering::SeqCst) {
				tracing::debug!(tx_id = %truncate_id(&self.tx_id), "Tracker cancelled mid-cycle");
				return;
			}

			match cycle {
				Cycle::Terminal(outcome) => {
					self.outcomes
						.apply(&self.tx_id, self.payment_id.as_deref(), outcome)
						.await;
					self.deregister();
					return;
				}
				Cycle::Reschedule => {
					if !self.sleep_unless_cancelled(self.settings.poll_interval()).await {
						return;
					}
				}
			}
		}
	}

	/// Ensures a pending record exists before the first poll. An existing
	/// record is only touched on its timestamp, preserving whatever history
	/// a previous observation left behind.
	async fn seed_record(&self) {
		let result = match self.store.update_transaction_with(&self.tx_id, |_| {}).await {
			Err(StoreError::NotFound) => {
				let record = TrackedTransaction::new(&self.tx_id, self.payment_id.clone());
				self.store.upsert_transaction(&record).await
			}
			other => other.map(|_| ()),
		};
		if let Err(e) = result {
			tracing::error!(tx_id = %truncate_id(&self.tx_id), error = %e, "Failed to store transaction record");
		}
	}

	/// One poll cycle: query, persist what was observed, classify.
	///
	/// Classification runs before the attempt-cap check, so a definitive
	/// chain status on the final attempt still wins over the timeout.
	async fn run_cycle(&self, attempts: u32) -> Cycle {
		let status = match self.chain.transaction_status(&self.tx_id).await {
			Ok(status) => status,
			Err(e) => {
				match &e {
					// Not known to the provider yet: normal right after
					// broadcast, so poll through it like a pending status.
					ChainError::NotFound(_) => {
						tracing::debug!(tx_id = %truncate_id(&self.tx_id), attempts, "Transaction not yet visible")
					}
					_ => {
						tracing::warn!(tx_id = %truncate_id(&self.tx_id), attempts, error = %e, "Error querying transaction status")
					}
				}
				self.persist_cycle(attempts, None, None).await;
				return self.pending_cycle(attempts);
			}
		};

		self.event_bus
			.publish(MonitorEvent::StatusUpdate {
				tx_id: self.tx_id.clone(),
				status: status.clone(),
			})
			.ok();

		if status.is_success() {
			let confirmations = self.confirmations_for(&status).await;
			self.persist_cycle(attempts, Some(&status), Some(confirmations)).await;

			if confirmations >= self.settings.confirmation_threshold {
				tracing::info!(
					tx_id = %truncate_id(&self.tx_id),
					confirmations,
					"Transaction confirmed"
				);
				return Cycle::Terminal(TerminalOutcome::Confirmed { confirmations });
			}
			tracing::debug!(
				tx_id = %truncate_id(&self.tx_id),
				confirmations,
				threshold = self.settings.confirmation_threshold,
				"Transaction needs more confirmations"
			);
			return self.pending_cycle(attempts);
		}

		if let Some(reason) = status.rejection() {
			let reason = reason.to_string();
			tracing::warn!(tx_id = %truncate_id(&self.tx_id), %reason, "Transaction rejected on-chain");
			self.persist_cycle(attempts, Some(&status), None).await;
			return Cycle::Terminal(TerminalOutcome::Rejected { reason });
		}

		self.persist_cycle(attempts, Some(&status), None).await;
		self.pending_cycle(attempts)
	}

	/// Shared tail for every cycle that did not resolve on-chain: keep
	/// polling until the attempt cap forces the timeout outcome.
	fn pending_cycle(&self, attempts: u32) -> Cycle {
		if attempts >= self.settings.max_attempts {
			tracing::warn!(
				tx_id = %truncate_id(&self.tx_id),
				attempts,
				"Transaction monitoring timed out"
			);
			return Cycle::Terminal(TerminalOutcome::TimedOut { attempts });
		}
		Cycle::Reschedule
	}

	/// Confirmation depth for a success status, recomputed from the tip.
	/// Degrades to zero when the transaction has no height yet or the tip
	/// query fails; the next cycle recomputes from scratch.
	async fn confirmations_for(&self, status: &TxStatusResponse) -> u64 {
		let Some(inclusion_height) = status.block_height else {
			return 0;
		};
		match self.chain.block_height().await {
			Ok(tip) => confirmation_depth(tip, inclusion_height),
			Err(e) => {
				tracing::warn!(tx_id = %truncate_id(&self.tx_id), error = %e, "Error fetching chain tip");
				0
			}
		}
	}

	/// Writes what this cycle observed onto the record. Best-effort: a
	/// failed write is logged and the cycle proceeds, the next write
	/// carries the same data again.
	async fn persist_cycle(
		&self,
		attempts: u32,
		status: Option<&TxStatusResponse>,
		confirmations: Option<u64>,
	) {
		let result = self
			.store
			.update_transaction_with(&self.tx_id, |tx| {
				// A terminal record is frozen; nothing observed later may
				// touch it.
				if tx.state.is_terminal() {
					return;
				}
				tx.attempts = attempts;
				if let Some(confirmations) = confirmations {
					// The recomputed depth can dip when the tip query fails
					// or lags behind the inclusion height; the persisted
					// count never regresses.
					tx.confirmations = tx.confirmations.max(confirmations);
				}
				if let Some(status) = status {
					tx.raw_status = Some(status.raw.clone());
					if let Some(height) = status.block_height {
						tx.block_height = Some(height);
					}
					if let Some(amount) = status.transfer_amount() {
						tx.amount = Some(amount);
					}
					if let Some(sender) = &status.sender_address {
						tx.sender = Some(sender.clone());
					}
					if let Some(recipient) = status
						.token_transfer
						.as_ref()
						.and_then(|t| t.recipient_address.clone())
					{
						tx.recipient = Some(recipient);
					}
				}
			})
			.await;

		if let Err(e) = result {
			tracing::error!(tx_id = %truncate_id(&self.tx_id), error = %e, "Failed to update transaction record");
		}
	}

	/// Sleeps for `delay`, returning false if cancelled before or during.
	async fn sleep_unless_cancelled(&self, delay: Duration) -> bool {
		if self.cancelled.load(Ordering::SeqCst) {
			return false;
		}
		tokio::select! {
			_ = self.wake.notified() => false,
			_ = tokio::time::sleep(delay) => !self.cancelled.load(Ordering::SeqCst),
		}
	}

	/// Removes this tracker's registry entry. Guarded by handle identity so
	/// a stop-and-restart race cannot make an old task evict its successor.
	fn deregister(&self) {
		let mut registry = self
			.registry
			.lock()
			.unwrap_or_else(PoisonError::into_inner);
		if let Some(handle) = registry.get(&self.tx_id) {
			if Arc::ptr_eq(&handle.cancelled, &self.cancelled) {
				registry.remove(&self.tx_id);
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use monitor_chain::ChainInterface;
	use monitor_notify::{NotifyError, NotifyInterface, WebhookEvent, WebhookPayload};
	use monitor_store::implementations::memory::MemoryStore;
	use monitor_store::StoreInterface;
	use monitor_types::{Payment, PaymentStatus, TxState};
	use serde_json::json;
	use std::collections::VecDeque;
	use std::sync::atomic::AtomicUsize;

	/// Chain provider that replays a scripted sequence of responses and tip
	/// heights, counting status queries so tests can assert poll counts.
	#[derive(Clone)]
	struct ScriptedChain(Arc<ChainScript>);

	struct ChainScript {
		responses: Mutex<VecDeque<Result<TxStatusResponse, ChainError>>>,
		tips: Mutex<VecDeque<Result<u64, ChainError>>>,
		status_calls: AtomicUsize,
	}

	impl ScriptedChain {
		fn new(
			responses: Vec<Result<TxStatusResponse, ChainError>>,
			tips: Vec<Result<u64, ChainError>>,
		) -> Self {
			Self(Arc::new(ChainScript {
				responses: Mutex::new(responses.into()),
				tips: Mutex::new(tips.into()),
				status_calls: AtomicUsize::new(0),
			}))
		}

		fn status_calls(&self) -> usize {
			self.0.status_calls.load(Ordering::SeqCst)
		}
	}

	#[async_trait]
	impl ChainInterface for ScriptedChain {
		async fn transaction_status(
			&self,
			_tx_id: &str,
		) -> Result<TxStatusResponse, ChainError> {
			self.0.status_calls.fetch_add(1, Ordering::SeqCst);
			self.0
				.responses
				.lock()
				.unwrap()
				.pop_front()
				.unwrap_or_else(|| Err(ChainError::Network("script exhausted".into())))
		}

		async fn block_height(&self) -> Result<u64, ChainError> {
			self.0
				.tips
				.lock()
				.unwrap()
				.pop_front()
				.unwrap_or_else(|| Err(ChainError::Network("no tip scripted".into())))
		}
	}

	/// Notifier that records every delivery, optionally reporting failure.
	#[derive(Clone)]
	struct RecordingNotifier {
		deliveries: Arc<Mutex<Vec<WebhookPayload>>>,
		fail: bool,
	}

	impl RecordingNotifier {
		fn new(fail: bool) -> Self {
			Self {
				deliveries: Arc::new(Mutex::new(Vec::new())),
				fail,
			}
		}

		fn deliveries(&self) -> Vec<WebhookPayload> {
			self.deliveries.lock().unwrap().clone()
		}
	}

	#[async_trait]
	impl NotifyInterface for RecordingNotifier {
		async fn deliver(&self, payload: &WebhookPayload) -> Result<(), NotifyError> {
			self.deliveries.lock().unwrap().push(payload.clone());
			if self.fail {
				Err(NotifyError::Rejected(500))
			} else {
				Ok(())
			}
		}
	}

	/// Memory store that records every write so tests can assert on the
	/// sequence of persisted record states.
	struct SpyStore {
		inner: MemoryStore,
		writes: Arc<Mutex<Vec<(String, serde_json::Value)>>>,
	}

	#[async_trait]
	impl StoreInterface for SpyStore {
		async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StoreError> {
			self.inner.get_bytes(key).await
		}

		async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
			if let Ok(parsed) = serde_json::from_slice(&value) {
				self.writes.lock().unwrap().push((key.to_string(), parsed));
			}
			self.inner.set_bytes(key, value).await
		}

		async fn delete(&self, key: &str) -> Result<(), StoreError> {
			self.inner.delete(key).await
		}

		async fn exists(&self, key: &str) -> Result<bool, StoreError> {
			self.inner.exists(key).await
		}
	}

	struct Harness {
		monitor: ConfirmationMonitor,
		chain: ScriptedChain,
		store: Arc<StoreService>,
		notifier: RecordingNotifier,
		writes: Arc<Mutex<Vec<(String, serde_json::Value)>>>,
	}

	fn harness(settings: MonitorSettings, chain: ScriptedChain, fail_webhook: bool) -> Harness {
		let writes = Arc::new(Mutex::new(Vec::new()));
		let store = Arc::new(StoreService::new(Box::new(SpyStore {
			inner: MemoryStore::new(),
			writes: writes.clone(),
		})));
		let notifier = RecordingNotifier::new(fail_webhook);
		let monitor = ConfirmationMonitor::new(
			settings,
			Arc::new(ChainService::new(Box::new(chain.clone()))),
			store.clone(),
			Some(Arc::new(notifier.clone())),
			EventBus::new(64),
		);
		Harness {
			monitor,
			chain,
			store,
			notifier,
			writes,
		}
	}

	fn settings(threshold: u64, max_attempts: u32) -> MonitorSettings {
		MonitorSettings {
			confirmation_threshold: threshold,
			max_attempts,
			poll_interval_ms: 5000,
			initial_delay_ms: 1000,
		}
	}

	fn success(height: u64) -> Result<TxStatusResponse, ChainError> {
		Ok(TxStatusResponse::from_raw(json!({
			"tx_status": "success",
			"block_height": height,
			"sender_address": "ST1SENDER",
			"token_transfer": { "amount": "150000", "recipient_address": "ST2RECIPIENT" }
		}))
		.unwrap())
	}

	fn still_pending() -> Result<TxStatusResponse, ChainError> {
		Ok(TxStatusResponse::from_raw(json!({ "tx_status": "pending" })).unwrap())
	}

	fn abort(status: &str) -> Result<TxStatusResponse, ChainError> {
		Ok(TxStatusResponse::from_raw(json!({ "tx_status": status })).unwrap())
	}

	async fn seed_payment(store: &StoreService, id: &str, seller: &str, net_amount: u64) {
		let payment = Payment::new(id, Some(seller.to_string()), net_amount);
		store.store_payment(&payment).await.unwrap();
	}

	/// Lets every tracker run to completion in virtual time.
	async fn settle() {
		tokio::time::sleep(Duration::from_secs(3600)).await;
	}

	#[tokio::test(start_paused = true)]
	async fn starting_twice_registers_one_tracker() {
		let h = harness(
			settings(1, 10),
			ScriptedChain::new(vec![success(100)], vec![Ok(100)]),
			false,
		);

		h.monitor.start_monitoring("tx_a", None);
		h.monitor.start_monitoring("tx_a", None);
		assert_eq!(h.monitor.active_count(), 1);

		settle().await;

		assert_eq!(h.chain.status_calls(), 1);
		assert_eq!(h.monitor.active_count(), 0);
		let record = h.store.transaction("tx_a").await.unwrap();
		assert_eq!(record.state, TxState::Confirmed);
	}

	#[tokio::test(start_paused = true)]
	async fn persisted_confirmations_never_decrease() {
		// Threshold 4 keeps the tracker polling while the tip advances.
		let h = harness(
			settings(4, 10),
			ScriptedChain::new(
				vec![success(100), success(100), success(100)],
				vec![Ok(100), Ok(101), Ok(103)],
			),
			false,
		);

		h.monitor.start_monitoring("tx_a", None);
		settle().await;

		let confirmations: Vec<u64> = h
			.writes
			.lock()
			.unwrap()
			.iter()
			.filter(|(key, _)| key.starts_with("transactions:"))
			.filter_map(|(_, value)| value.get("confirmations").and_then(|c| c.as_u64()))
			.collect();
		assert!(!confirmations.is_empty());
		assert!(confirmations.windows(2).all(|w| w[0] <= w[1]));

		let record = h.store.transaction("tx_a").await.unwrap();
		assert_eq!(record.state, TxState::Confirmed);
		assert_eq!(record.confirmations, 4);
	}

	#[tokio::test(start_paused = true)]
	async fn no_polls_after_terminal_state() {
		let h = harness(
			settings(1, 10),
			ScriptedChain::new(vec![success(100)], vec![Ok(100)]),
			false,
		);

		h.monitor.start_monitoring("tx_a", None);
		settle().await;
		assert_eq!(h.chain.status_calls(), 1);

		// Nothing left in the registry, so more time changes nothing.
		settle().await;
		assert_eq!(h.chain.status_calls(), 1);
		assert_eq!(h.monitor.active_count(), 0);
	}

	#[tokio::test(start_paused = true)]
	async fn seller_credit_applies_exactly_once() {
		let h = harness(
			settings(1, 10),
			ScriptedChain::new(vec![success(100), success(100)], vec![Ok(100), Ok(100)]),
			false,
		);
		seed_payment(&h.store, "pay_1", "seller_1", 700).await;

		h.monitor.start_monitoring("tx_a", Some("pay_1".into()));
		settle().await;

		let seller = h.store.seller("seller_1").await.unwrap();
		assert_eq!(seller.total_earnings, 700);
		assert_eq!(seller.total_payments, 1);

		// Observing the same transaction again finds an already terminal
		// record, so nothing double-applies.
		h.monitor.start_monitoring("tx_a", Some("pay_1".into()));
		settle().await;

		let seller = h.store.seller("seller_1").await.unwrap();
		assert_eq!(seller.total_earnings, 700);
		assert_eq!(seller.total_payments, 1);
		assert_eq!(h.notifier.deliveries().len(), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn threshold_is_inclusive_boundary() {
		// Two confirmations reschedule, the third confirms.
		let h = harness(
			settings(3, 10),
			ScriptedChain::new(vec![success(100), success(100)], vec![Ok(101), Ok(102)]),
			false,
		);

		h.monitor.start_monitoring("tx_a", None);
		settle().await;

		assert_eq!(h.chain.status_calls(), 2);
		let record = h.store.transaction("tx_a").await.unwrap();
		assert_eq!(record.state, TxState::Confirmed);
		assert_eq!(record.confirmations, 3);

		// The below-threshold cycle persisted an included but still
		// pending record.
		let below_threshold = h
			.writes
			.lock()
			.unwrap()
			.iter()
			.any(|(key, value)| {
				key.starts_with("transactions:")
					&& value.get("state").and_then(|s| s.as_str()) == Some("pending")
					&& value.get("confirmations").and_then(|c| c.as_u64()) == Some(2)
					&& value.get("block_height").and_then(|b| b.as_u64()) == Some(100)
			});
		assert!(below_threshold);
	}

	#[tokio::test(start_paused = true)]
	async fn timeout_fires_on_final_attempt_not_after() {
		let h = harness(
			settings(1, 3),
			ScriptedChain::new(
				vec![still_pending(), still_pending(), still_pending()],
				vec![],
			),
			false,
		);
		seed_payment(&h.store, "pay_1", "seller_1", 700).await;

		h.monitor.start_monitoring("tx_a", Some("pay_1".into()));
		settle().await;

		assert_eq!(h.chain.status_calls(), 3);
		let record = h.store.transaction("tx_a").await.unwrap();
		assert_eq!(record.state, TxState::TimedOut);
		assert_eq!(record.attempts, 3);

		let payment = h.store.payment("pay_1").await.unwrap();
		assert_eq!(payment.status, PaymentStatus::Expired);
		assert!(payment.metadata.get("timeout_at").is_some());

		let deliveries = h.notifier.deliveries();
		assert_eq!(deliveries.len(), 1);
		assert_eq!(deliveries[0].event, WebhookEvent::Timeout);
	}

	#[tokio::test(start_paused = true)]
	async fn provider_errors_exhaust_to_timeout() {
		let h = harness(
			settings(1, 3),
			ScriptedChain::new(
				vec![
					Err(ChainError::Network("connection refused".into())),
					Err(ChainError::Network("connection refused".into())),
					Err(ChainError::Network("connection refused".into())),
				],
				vec![],
			),
			false,
		);

		h.monitor.start_monitoring("tx_a", None);
		settle().await;

		assert_eq!(h.chain.status_calls(), 3);
		let record = h.store.transaction("tx_a").await.unwrap();
		assert_eq!(record.state, TxState::TimedOut);
	}

	#[tokio::test(start_paused = true)]
	async fn unknown_transaction_polls_like_pending() {
		let h = harness(
			settings(1, 2),
			ScriptedChain::new(
				vec![
					Err(ChainError::NotFound("tx_a".into())),
					Err(ChainError::NotFound("tx_a".into())),
				],
				vec![],
			),
			false,
		);

		h.monitor.start_monitoring("tx_a", None);
		settle().await;

		assert_eq!(h.chain.status_calls(), 2);
		let record = h.store.transaction("tx_a").await.unwrap();
		assert_eq!(record.state, TxState::TimedOut);
	}

	#[tokio::test(start_paused = true)]
	async fn rejection_wins_over_timeout() {
		// Even with a single allowed attempt, a definitive rejection on
		// that attempt resolves to failed, never to timed out.
		let h = harness(
			settings(1, 1),
			ScriptedChain::new(vec![abort("abort_by_post_condition")], vec![]),
			false,
		);

		h.monitor.start_monitoring("tx_a", None);
		settle().await;

		let record = h.store.transaction("tx_a").await.unwrap();
		assert_eq!(record.state, TxState::Failed);
		assert_eq!(
			record.failure_reason.as_deref(),
			Some("abort_by_post_condition")
		);

		let deliveries = h.notifier.deliveries();
		assert_eq!(deliveries.len(), 1);
		assert_eq!(deliveries[0].event, WebhookEvent::Failed);
	}

	#[tokio::test(start_paused = true)]
	async fn confirms_on_first_cycle_and_completes_payment() {
		let h = harness(
			settings(1, 10),
			ScriptedChain::new(vec![success(100)], vec![Ok(100)]),
			false,
		);
		seed_payment(&h.store, "pay_1", "seller_1", 700).await;

		h.monitor.start_monitoring("tx_a", Some("pay_1".into()));
		settle().await;

		assert_eq!(h.chain.status_calls(), 1);
		let record = h.store.transaction("tx_a").await.unwrap();
		assert_eq!(record.state, TxState::Confirmed);
		assert_eq!(record.confirmations, 1);
		assert_eq!(record.amount, Some(150_000));
		assert_eq!(record.sender.as_deref(), Some("ST1SENDER"));
		assert_eq!(record.recipient.as_deref(), Some("ST2RECIPIENT"));

		let payment = h.store.payment("pay_1").await.unwrap();
		assert_eq!(payment.status, PaymentStatus::Completed);
		assert!(payment.completed_at.is_some());
		assert_eq!(payment.confirmations, 1);

		let deliveries = h.notifier.deliveries();
		assert_eq!(deliveries.len(), 1);
		assert_eq!(deliveries[0].event, WebhookEvent::Confirmed);
		assert_eq!(deliveries[0].data["payment_id"], "pay_1");
	}

	#[tokio::test(start_paused = true)]
	async fn rejection_without_payment_still_notifies() {
		let h = harness(
			settings(1, 10),
			ScriptedChain::new(vec![abort("abort_by_response")], vec![]),
			false,
		);

		h.monitor.start_monitoring("tx_b", None);
		settle().await;

		let record = h.store.transaction("tx_b").await.unwrap();
		assert_eq!(record.state, TxState::Failed);

		let deliveries = h.notifier.deliveries();
		assert_eq!(deliveries.len(), 1);
		assert_eq!(deliveries[0].event, WebhookEvent::Failed);
		assert_eq!(deliveries[0].data["reason"], "abort_by_response");

		// No payment attached, so nothing in the payments namespace.
		let touched_payments = h
			.writes
			.lock()
			.unwrap()
			.iter()
			.any(|(key, _)| key.starts_with("payments:"));
		assert!(!touched_payments);
	}

	#[tokio::test(start_paused = true)]
	async fn stop_cancels_a_scheduled_poll() {
		let h = harness(
			settings(1, 10),
			ScriptedChain::new(vec![success(100)], vec![Ok(100)]),
			false,
		);

		h.monitor.start_monitoring("tx_a", None);
		h.monitor.stop_monitoring("tx_a");
		settle().await;

		assert_eq!(h.chain.status_calls(), 0);
		assert_eq!(h.monitor.active_count(), 0);
		// The record survives the stop.
		assert!(h.store.transaction_exists("tx_a").await.unwrap());
	}

	#[tokio::test(start_paused = true)]
	async fn stop_all_cancels_every_tracker() {
		let h = harness(
			settings(1, 10),
			ScriptedChain::new(vec![], vec![]),
			false,
		);

		h.monitor.start_monitoring("tx_a", None);
		h.monitor.start_monitoring("tx_b", None);
		h.monitor.start_monitoring("tx_c", None);
		assert_eq!(h.monitor.active_count(), 3);

		h.monitor.stop_all();
		settle().await;

		assert_eq!(h.chain.status_calls(), 0);
		assert_eq!(h.monitor.active_count(), 0);
	}

	#[tokio::test(start_paused = true)]
	async fn empty_transaction_id_is_ignored() {
		let h = harness(settings(1, 10), ScriptedChain::new(vec![], vec![]), false);

		h.monitor.start_monitoring("", None);
		assert_eq!(h.monitor.active_count(), 0);
	}

	#[tokio::test(start_paused = true)]
	async fn transient_error_then_success_confirms() {
		let h = harness(
			settings(1, 10),
			ScriptedChain::new(
				vec![
					Err(ChainError::Network("connection reset".into())),
					success(100),
				],
				vec![Ok(100)],
			),
			false,
		);

		h.monitor.start_monitoring("tx_a", None);
		settle().await;

		assert_eq!(h.chain.status_calls(), 2);
		let record = h.store.transaction("tx_a").await.unwrap();
		assert_eq!(record.state, TxState::Confirmed);
		assert_eq!(record.attempts, 2);
	}

	#[tokio::test(start_paused = true)]
	async fn webhook_failure_does_not_block_payment_update() {
		let h = harness(
			settings(1, 10),
			ScriptedChain::new(vec![success(100)], vec![Ok(100)]),
			true,
		);
		seed_payment(&h.store, "pay_1", "seller_1", 700).await;

		h.monitor.start_monitoring("tx_a", Some("pay_1".into()));
		settle().await;

		let payment = h.store.payment("pay_1").await.unwrap();
		assert_eq!(payment.status, PaymentStatus::Completed);
		assert_eq!(h.notifier.deliveries().len(), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn missing_payment_does_not_block_webhook() {
		let h = harness(
			settings(1, 10),
			ScriptedChain::new(vec![success(100)], vec![Ok(100)]),
			false,
		);

		h.monitor.start_monitoring("tx_a", Some("pay_gone".into()));
		settle().await;

		let record = h.store.transaction("tx_a").await.unwrap();
		assert_eq!(record.state, TxState::Confirmed);

		let deliveries = h.notifier.deliveries();
		assert_eq!(deliveries.len(), 1);
		assert_eq!(deliveries[0].event, WebhookEvent::Confirmed);
	}

	#[tokio::test(start_paused = true)]
	async fn tip_query_failure_keeps_polling() {
		// Success status but the tip query fails: confirmations degrade to
		// zero for that cycle and the tracker retries.
		let h = harness(
			settings(1, 10),
			ScriptedChain::new(
				vec![success(100), success(100)],
				vec![Err(ChainError::Network("tip unavailable".into())), Ok(100)],
			),
			false,
		);

		h.monitor.start_monitoring("tx_a", None);
		settle().await;

		assert_eq!(h.chain.status_calls(), 2);
		let record = h.store.transaction("tx_a").await.unwrap();
		assert_eq!(record.state, TxState::Confirmed);
		assert_eq!(record.confirmations, 1);
	}

	#[tokio::test(start_paused = true)]
	async fn persisted_confirmations_survive_tip_regression() {
		// The depth recomputes to zero mid-flight when the tip query fails
		// after earlier progress; the persisted count must not rewind.
		let h = harness(
			settings(5, 10),
			ScriptedChain::new(
				vec![success(100), success(100), success(100)],
				vec![
					Ok(102),
					Err(ChainError::Network("tip unavailable".into())),
					Ok(104),
				],
			),
			false,
		);

		h.monitor.start_monitoring("tx_a", None);
		settle().await;

		assert_eq!(h.chain.status_calls(), 3);

		let confirmations: Vec<u64> = h
			.writes
			.lock()
			.unwrap()
			.iter()
			.filter(|(key, _)| key.starts_with("transactions:"))
			.filter_map(|(_, value)| value.get("confirmations").and_then(|c| c.as_u64()))
			.collect();
		// Depth 3 was persisted on the first cycle and held through the
		// failed-tip cycle.
		assert!(confirmations.contains(&3));
		assert!(confirmations.windows(2).all(|w| w[0] <= w[1]));

		let record = h.store.transaction("tx_a").await.unwrap();
		assert_eq!(record.state, TxState::Confirmed);
		assert_eq!(record.confirmations, 5);
	}

	#[tokio::test(start_paused = true)]
	async fn publishes_status_updates_and_terminal_event() {
		let h = harness(
			settings(1, 10),
			ScriptedChain::new(vec![success(100)], vec![Ok(100)]),
			false,
		);
		let mut events = h.monitor.event_bus().subscribe();

		h.monitor.start_monitoring("tx_a", None);
		settle().await;

		let first = events.try_recv().unwrap();
		assert!(
			matches!(first, MonitorEvent::StatusUpdate { ref tx_id, .. } if tx_id.as_str() == "tx_a")
		);
		let second = events.try_recv().unwrap();
		assert!(matches!(
			second,
			MonitorEvent::Confirmed { confirmations: 1, .. }
		));
	}
}
