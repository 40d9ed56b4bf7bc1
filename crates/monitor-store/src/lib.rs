//! Persistence boundary for the payment monitor.
//!
//! Backends implement a small byte-oriented key-value interface; the typed
//! [`StoreService`] on top exposes the domain writes the monitor performs:
//! upserting tracked transactions, updating payments, and crediting seller
//! totals. All keys are `namespace:id` pairs.

use async_trait::async_trait;
use chrono::Utc;
use monitor_types::{Payment, Seller, StoreKey, TrackedTransaction};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

/// Re-export implementations
pub mod implementations {
	pub mod file;
	pub mod memory;
}

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
	/// Error that occurs when a requested record is not found.
	#[error("Not found")]
	NotFound,
	/// Error that occurs during serialization/deserialization.
	#[error("Serialization error: {0}")]
	Serialization(String),
	/// Error that occurs in the storage backend.
	#[error("Backend error: {0}")]
	Backend(String),
	/// Error that occurs during backend construction.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Trait defining the low-level interface for store backends.
#[async_trait]
pub trait StoreInterface: Send + Sync {
	/// Retrieves raw bytes for the given key.
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StoreError>;

	/// Stores raw bytes, creating or overwriting.
	async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;

	/// Deletes the value associated with the given key.
	async fn delete(&self, key: &str) -> Result<(), StoreError>;

	/// Checks if a key exists.
	async fn exists(&self, key: &str) -> Result<bool, StoreError>;
}

/// Type alias for store backend factory functions.
pub type StoreFactory = fn(&toml::Value) -> Result<Box<dyn StoreInterface>, StoreError>;

/// Typed store over a byte-oriented backend.
///
/// Provides the domain operations the monitor needs. Records are serialized
/// to JSON; `updated_at` stamping happens here so callers cannot forget it.
pub struct StoreService {
	backend: Box<dyn StoreInterface>,
	/// Seller credits are read-modify-write over the backend; they are
	/// serialized so concurrent confirmations cannot lose an increment.
	seller_credit: Mutex<()>,
}

impl StoreService {
	/// Creates a new StoreService with the specified backend.
	pub fn new(backend: Box<dyn StoreInterface>) -> Self {
		Self {
			backend,
			seller_credit: Mutex::new(()),
		}
	}

	fn key(namespace: StoreKey, id: &str) -> String {
		format!("{}:{}", namespace.as_str(), id)
	}

	async fn store<T: Serialize>(
		&self,
		namespace: StoreKey,
		id: &str,
		data: &T,
	) -> Result<(), StoreError> {
		let bytes =
			serde_json::to_vec(data).map_err(|e| StoreError::Serialization(e.to_string()))?;
		self.backend.set_bytes(&Self::key(namespace, id), bytes).await
	}

	async fn retrieve<T: DeserializeOwned>(
		&self,
		namespace: StoreKey,
		id: &str,
	) -> Result<T, StoreError> {
		let bytes = self.backend.get_bytes(&Self::key(namespace, id)).await?;
		serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization(e.to_string()))
	}

	/// Creates or overwrites the record for a tracked transaction.
	pub async fn upsert_transaction(&self, tx: &TrackedTransaction) -> Result<(), StoreError> {
		self.store(StoreKey::Transactions, &tx.tx_id, tx).await
	}

	/// Retrieves a tracked transaction record.
	pub async fn transaction(&self, tx_id: &str) -> Result<TrackedTransaction, StoreError> {
		self.retrieve(StoreKey::Transactions, tx_id).await
	}

	/// Checks whether a tracked transaction record exists.
	pub async fn transaction_exists(&self, tx_id: &str) -> Result<bool, StoreError> {
		self.backend
			.exists(&Self::key(StoreKey::Transactions, tx_id))
			.await
	}

	/// Applies an update to an existing tracked transaction record and
	/// stamps its update time. Fails with `NotFound` if the record does not
	/// exist.
	pub async fn update_transaction_with<F>(
		&self,
		tx_id: &str,
		updater: F,
	) -> Result<TrackedTransaction, StoreError>
	where
		F: FnOnce(&mut TrackedTransaction),
	{
		let mut tx = self.transaction(tx_id).await?;
		updater(&mut tx);
		tx.updated_at = Utc::now();
		self.upsert_transaction(&tx).await?;
		Ok(tx)
	}

	/// Stores a payment record. Payments are created by the API layer; this
	/// is used for seeding and tooling.
	pub async fn store_payment(&self, payment: &Payment) -> Result<(), StoreError> {
		self.store(StoreKey::Payments, &payment.id, payment).await
	}

	/// Retrieves a payment record.
	pub async fn payment(&self, payment_id: &str) -> Result<Payment, StoreError> {
		self.retrieve(StoreKey::Payments, payment_id).await
	}

	/// Applies an update to an existing payment and stamps its update time.
	/// Fails with `NotFound` if the payment does not exist.
	pub async fn update_payment_with<F>(
		&self,
		payment_id: &str,
		updater: F,
	) -> Result<Payment, StoreError>
	where
		F: FnOnce(&mut Payment),
	{
		let mut payment = self.payment(payment_id).await?;
		updater(&mut payment);
		payment.updated_at = Utc::now();
		self.store(StoreKey::Payments, &payment.id, &payment).await?;
		Ok(payment)
	}

	/// Stores a seller record.
	pub async fn store_seller(&self, seller: &Seller) -> Result<(), StoreError> {
		self.store(StoreKey::Sellers, &seller.id, seller).await
	}

	/// Retrieves a seller record.
	pub async fn seller(&self, seller_id: &str) -> Result<Seller, StoreError> {
		self.retrieve(StoreKey::Sellers, seller_id).await
	}

	/// Adds a completed payment to a seller's running totals, creating the
	/// aggregate on first credit. Credits for all sellers share one lock;
	/// contention is bounded by how many transactions confirm at once.
	pub async fn credit_seller(&self, seller_id: &str, amount: u64) -> Result<Seller, StoreError> {
		let _guard = self.seller_credit.lock().await;
		let mut seller = match self.seller(seller_id).await {
			Ok(seller) => seller,
			Err(StoreError::NotFound) => {
				tracing::debug!(seller_id, "Creating seller aggregate on first credit");
				Seller::new(seller_id)
			}
			Err(e) => return Err(e),
		};
		seller.total_earnings = seller.total_earnings.saturating_add(amount);
		seller.total_payments += 1;
		seller.updated_at = Utc::now();
		self.store_seller(&seller).await?;
		Ok(seller)
	}
}
