//! File-backed store backend.
//!
//! One JSON file per record under a directory per namespace. Writes go
//! through a temporary file and a rename so a crash mid-write cannot leave a
//! half-written record behind.

use crate::{StoreError, StoreInterface};
use async_trait::async_trait;
use monitor_types::StoreKey;
use std::path::{Path, PathBuf};
use tokio::fs;

/// File-based store implementation.
pub struct FileStore {
	base_path: PathBuf,
}

impl FileStore {
	/// Creates a file store rooted at `base_path`, creating the namespace
	/// directories up front so later writes only touch files.
	pub fn new(base_path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let base_path = base_path.into();
		for namespace in StoreKey::all() {
			std::fs::create_dir_all(base_path.join(namespace.as_str()))
				.map_err(|e| StoreError::Backend(e.to_string()))?;
		}
		Ok(Self { base_path })
	}

	/// Maps a `namespace:id` key to a file path. Id characters outside the
	/// filename-safe set are replaced so chain-assigned ids cannot escape
	/// the storage directory.
	fn path_for(&self, key: &str) -> PathBuf {
		let (namespace, id) = key.split_once(':').unwrap_or(("misc", key));
		let safe_id: String = id
			.chars()
			.map(|c| {
				if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
					c
				} else {
					'_'
				}
			})
			.collect();
		self.base_path.join(namespace).join(format!("{safe_id}.json"))
	}

	async fn ensure_parent(path: &Path) -> Result<(), StoreError> {
		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent)
				.await
				.map_err(|e| StoreError::Backend(e.to_string()))?;
		}
		Ok(())
	}
}

#[async_trait]
impl StoreInterface for FileStore {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StoreError> {
		let path = self.path_for(key);
		match fs::read(&path).await {
			Ok(bytes) => Ok(bytes),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound),
			Err(e) => Err(StoreError::Backend(e.to_string())),
		}
	}

	async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
		let path = self.path_for(key);
		Self::ensure_parent(&path).await?;

		let tmp = path.with_extension("json.tmp");
		if let Err(e) = fs::write(&tmp, &value).await {
			tracing::error!(key, error = %e, "Failed to write record file");
			return Err(StoreError::Backend(e.to_string()));
		}
		if let Err(e) = fs::rename(&tmp, &path).await {
			tracing::error!(key, error = %e, "Failed to finalize record file");
			return Err(StoreError::Backend(e.to_string()));
		}
		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<(), StoreError> {
		let path = self.path_for(key);
		match fs::remove_file(&path).await {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(StoreError::Backend(e.to_string())),
		}
	}

	async fn exists(&self, key: &str) -> Result<bool, StoreError> {
		Ok(fs::try_exists(self.path_for(key)).await.unwrap_or(false))
	}
}

/// Factory function to create a file store backend from configuration.
///
/// Configuration parameters:
/// - `storage_path` (required): directory that holds the record files
pub fn create_store(config: &toml::Value) -> Result<Box<dyn StoreInterface>, StoreError> {
	let storage_path = config
		.get("storage_path")
		.and_then(|v| v.as_str())
		.ok_or_else(|| StoreError::Configuration("storage_path is required".into()))?;
	Ok(Box::new(FileStore::new(storage_path)?))
}
