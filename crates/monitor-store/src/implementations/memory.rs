//! In-memory store backend.
//!
//! Keeps records in a HashMap behind a read-write lock. Nothing survives a
//! restart, which is fine for tests and development.

use crate::{StoreError, StoreInterface};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory store implementation.
pub struct MemoryStore {
	store: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
	/// Creates a new MemoryStore instance.
	pub fn new() -> Self {
		Self {
			store: Arc::new(RwLock::new(HashMap::new())),
		}
	}
}

impl Default for MemoryStore {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl StoreInterface for MemoryStore {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StoreError> {
		let store = self.store.read().await;
		store.get(key).cloned().ok_or(StoreError::NotFound)
	}

	async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
		let mut store = self.store.write().await;
		store.insert(key.to_string(), value);
		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<(), StoreError> {
		let mut store = self.store.write().await;
		store.remove(key);
		Ok(())
	}

	async fn exists(&self, key: &str) -> Result<bool, StoreError> {
		let store = self.store.read().await;
		Ok(store.contains_key(key))
	}
}

/// Factory function to create a memory store backend from configuration.
///
/// Configuration parameters: none.
pub fn create_store(_config: &toml::Value) -> Result<Box<dyn StoreInterface>, StoreError> {
	Ok(Box::new(MemoryStore::new()))
}
