use pl_utils::{
	error::FileIOError,
	fs::{read_optional, write_atomic},
};

use std::{
	path::{Path, PathBuf},
	sync::Arc,
};

use serde::{Deserialize, Serialize};
use tokio::{sync::watch, task::spawn_blocking};
use tracing::{debug, error, warn};

use crate::record::LocationRecord;

/// Last known position of the peer device, as shown to the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerLocation {
	pub lat: f64,
	pub lon: f64,
	pub time: String,
	/// Key of the log entry this came from
	#[serde(default)]
	pub timestamp: i64,
}

impl From<LocationRecord> for PeerLocation {
	fn from(record: LocationRecord) -> Self {
		Self {
			lat: record.latitude,
			lon: record.longitude,
			time: record.display_time,
			timestamp: record.timestamp,
		}
	}
}

/// Single slot holding the peer's last known location.
///
/// Every update replaces the whole value, so readers never see a position from one fix
/// and a time from another. When a persistence path is set, each update is also written
/// to disk so the value survives restarts.
#[derive(Debug, Clone)]
pub struct PeerLocationCache {
	tx: Arc<watch::Sender<Option<PeerLocation>>>,
	persist_to: Option<Arc<Path>>,
}

impl Default for PeerLocationCache {
	fn default() -> Self {
		Self::new()
	}
}

impl PeerLocationCache {
	#[must_use]
	pub fn new() -> Self {
		let (tx, _rx) = watch::channel(None);

		Self {
			tx: Arc::new(tx),
			persist_to: None,
		}
	}

	/// Cache backed by a JSON file, starting from whatever the file last held.
	///
	/// A corrupted file is logged and ignored; it'll be overwritten on the next update.
	#[must_use]
	pub fn persistent(path: impl Into<PathBuf>) -> Self {
		let path = path.into();

		let initial = match load(&path) {
			Ok(initial) => initial,
			Err(e) => {
				warn!(?e, path = %path.display(), "Ignoring unreadable peer location cache");
				None
			}
		};

		let (tx, _rx) = watch::channel(initial);

		Self {
			tx: Arc::new(tx),
			persist_to: Some(path.into()),
		}
	}

	/// Replace the cached location, persisting it when it actually changed
	pub async fn set(&self, location: PeerLocation) {
		let changed = self.tx.send_if_modified(|current| {
			if current.as_ref() == Some(&location) {
				false
			} else {
				*current = Some(location.clone());
				true
			}
		});

		if !changed {
			return;
		}

		debug!("Updated last known peer location");

		if let Some(path) = &self.persist_to {
			let path = Arc::clone(path);

			match spawn_blocking(move || store(&path, &location)).await {
				Ok(Ok(())) => {}
				Ok(Err(e)) => warn!(?e, "Failed to persist peer location, keeping it in memory only"),
				Err(e) => error!(?e, "Peer location persistence task failed"),
			}
		}
	}

	#[must_use]
	pub fn get(&self) -> Option<PeerLocation> {
		self.tx.borrow().clone()
	}

	#[must_use]
	pub fn reader(&self) -> PeerLocationReader {
		PeerLocationReader {
			rx: self.tx.subscribe(),
		}
	}
}

/// Read-only view handed to the presentation layer
#[derive(Debug, Clone)]
pub struct PeerLocationReader {
	rx: watch::Receiver<Option<PeerLocation>>,
}

impl PeerLocationReader {
	#[must_use]
	pub fn get(&self) -> Option<PeerLocation> {
		self.rx.borrow().clone()
	}

	/// Wait for the next update; `None` once the cache has been dropped
	pub async fn changed(&mut self) -> Option<PeerLocation> {
		self.rx.changed().await.ok()?;
		self.rx.borrow_and_update().clone()
	}
}

/// Read a persisted peer location without starting a cache, for status queries
pub fn load(path: impl AsRef<Path>) -> Result<Option<PeerLocation>, LoadError> {
	let path = path.as_ref();

	read_optional(path)?
		.map(|contents| {
			serde_json::from_str(&contents).map_err(|source| LoadError::Malformed {
				path: path.into(),
				source,
			})
		})
		.transpose()
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
	#[error(transparent)]
	FileIO(#[from] FileIOError),
	#[error("malformed peer location file <path='{}'>: {source}", .path.display())]
	Malformed {
		path: Box<Path>,
		source: serde_json::Error,
	},
}

fn store(path: &Path, location: &PeerLocation) -> Result<(), FileIOError> {
	let contents = serde_json::to_vec_pretty(location).map_err(|e| {
		FileIOError::with_context(path, e.into(), "serializing peer location")
	})?;

	write_atomic(path, &contents)
}

#[cfg(test)]
mod tests {
	use super::*;

	use tempfile::tempdir;

	fn location(lat: f64, timestamp: i64) -> PeerLocation {
		PeerLocation {
			lat,
			lon: -lat,
			time: format!("at {timestamp}"),
			timestamp,
		}
	}

	#[tokio::test]
	async fn starts_empty_and_replaces_wholesale() {
		let cache = PeerLocationCache::new();
		let reader = cache.reader();
		assert!(reader.get().is_none());

		cache.set(location(1.0, 1)).await;
		cache.set(location(2.0, 2)).await;

		assert_eq!(reader.get(), Some(location(2.0, 2)));
		assert_eq!(cache.get(), Some(location(2.0, 2)));
	}

	#[tokio::test]
	async fn persisted_value_survives_restart() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("peer_location.json");

		PeerLocationCache::persistent(&path)
			.set(location(3.0, 3))
			.await;

		let restored = PeerLocationCache::persistent(&path);
		assert_eq!(restored.get(), Some(location(3.0, 3)));
		assert_eq!(load(&path).unwrap(), Some(location(3.0, 3)));
	}

	#[tokio::test]
	async fn unchanged_location_is_not_rewritten() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("peer_location.json");

		let cache = PeerLocationCache::persistent(&path);
		cache.set(location(5.0, 5)).await;
		assert!(path.exists());

		std::fs::remove_file(&path).unwrap();
		cache.set(location(5.0, 5)).await;
		assert!(!path.exists(), "same value must not hit the disk again");

		cache.set(location(6.0, 6)).await;
		assert_eq!(load(&path).unwrap(), Some(location(6.0, 6)));
	}

	#[test]
	fn corrupted_cache_file_is_ignored() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("peer_location.json");
		std::fs::write(&path, "{{{").unwrap();

		assert!(PeerLocationCache::persistent(&path).get().is_none());
		assert!(matches!(load(&path), Err(LoadError::Malformed { .. })));
	}

	#[tokio::test]
	async fn readers_are_notified_of_changes() {
		let cache = PeerLocationCache::new();
		let mut reader = cache.reader();

		let waiter = tokio::spawn(async move { reader.changed().await });
		tokio::task::yield_now().await;

		cache.set(location(4.0, 4)).await;

		assert_eq!(waiter.await.unwrap(), Some(location(4.0, 4)));
	}
}
