use std::{
	io,
	path::{Path, PathBuf},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
	#[serde(rename = "lat")]
	pub latitude: f64,
	#[serde(rename = "lon")]
	pub longitude: f64,
}

#[derive(Debug, Error)]
pub enum LocationError {
	#[error("no permission to access the device location")]
	PermissionDenied,
	#[error("location unavailable: {0}")]
	Unavailable(String),
}

/// Source of the device's current position.
///
/// Implementations answer a single-shot query; the sync engine awaits it without a
/// timeout, so a provider that never answers stalls that cycle.
#[async_trait]
pub trait LocationProvider: Send + Sync + 'static {
	async fn current_location(&self) -> Result<Coordinate, LocationError>;
}

/// Always reports the same coordinate, for stationary installs and tests
#[derive(Debug, Clone, Copy)]
pub struct FixedLocation(pub Coordinate);

#[async_trait]
impl LocationProvider for FixedLocation {
	async fn current_location(&self) -> Result<Coordinate, LocationError> {
		Ok(self.0)
	}
}

/// Reads the latest fix from a JSON file (`{"lat": .., "lon": ..}`) maintained by an
/// external GPS helper
#[derive(Debug, Clone)]
pub struct FileLocation {
	path: PathBuf,
}

impl FileLocation {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	#[must_use]
	pub fn path(&self) -> &Path {
		&self.path
	}
}

#[async_trait]
impl LocationProvider for FileLocation {
	async fn current_location(&self) -> Result<Coordinate, LocationError> {
		let contents = fs::read(&self.path).await.map_err(|e| match e.kind() {
			io::ErrorKind::PermissionDenied => LocationError::PermissionDenied,
			io::ErrorKind::NotFound => {
				LocationError::Unavailable(format!("no fix at '{}'", self.path.display()))
			}
			_ => LocationError::Unavailable(e.to_string()),
		})?;

		let coordinate: Coordinate = serde_json::from_slice(&contents).map_err(|e| {
			LocationError::Unavailable(format!(
				"malformed fix at '{}': {e}",
				self.path.display()
			))
		})?;

		if !coordinate.latitude.is_finite()
			|| !coordinate.longitude.is_finite()
			|| !(-90.0..=90.0).contains(&coordinate.latitude)
			|| !(-180.0..=180.0).contains(&coordinate.longitude)
		{
			return Err(LocationError::Unavailable(format!(
				"out of range fix at '{}'",
				self.path.display()
			)));
		}

		debug!(?coordinate, path = %self.path.display(), "Read location fix");

		Ok(coordinate)
	}
}
