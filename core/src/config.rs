//! Installation configuration

use pl_utils::{error::FileIOError, fs::write_atomic};

use std::{
	env, fs,
	path::{Path, PathBuf},
	time::Duration,
};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
	device::DeviceId,
	location::{Coordinate, FileLocation, FixedLocation, LocationProvider},
	remote::Credentials,
};

pub const CONFIG_FILE_NAME: &str = "peerloc.json";
/// Overrides the token stored in the config file
pub const TOKEN_ENV_VAR: &str = "PEERLOC_GIT_TOKEN";

const CONFIG_VERSION: u32 = 1;
const DEFAULT_INTERVAL_SECS: u64 = 15;

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error(transparent)]
	FileIO(#[from] FileIOError),
	#[error("malformed config file <path='{}'>: {source}", .path.display())]
	Malformed {
		path: Box<Path>,
		source: serde_json::Error,
	},
	#[error("unsupported config version {found}, newest known is {}", CONFIG_VERSION)]
	UnsupportedVersion { found: u32 },
	#[error("failed to serialize config: {0}")]
	Serialize(#[source] serde_json::Error),
	#[error("invalid config: {0}")]
	Invalid(&'static str),
	#[error("could not determine a data directory for this platform")]
	NoDataDir,
}

/// Where the engine gets the device's own position from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "source")]
pub enum LocationSource {
	Fixed {
		lat: f64,
		lon: f64,
	},
	File {
		path: PathBuf,
	},
}

impl LocationSource {
	#[must_use]
	pub fn into_provider(self) -> Box<dyn LocationProvider> {
		match self {
			Self::Fixed { lat, lon } => Box::new(FixedLocation(Coordinate {
				latitude: lat,
				longitude: lon,
			})),
			Self::File { path } => Box::new(FileLocation::new(path)),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
	/// Config schema version
	pub version: u32,

	/// Which log file this installation owns
	pub device: DeviceId,

	/// Shared repository both devices sync through
	pub remote_url: String,

	pub username: String,

	/// Access token; `PEERLOC_GIT_TOKEN` wins when set
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub token: Option<String>,

	/// Seconds between sync cycles
	#[serde(default = "default_interval_secs")]
	pub interval_secs: u64,

	/// Holds the working copy and the persisted peer location
	pub data_dir: PathBuf,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub author_email: Option<String>,

	#[serde(default = "default_log_level")]
	pub log_level: String,

	/// Also write logs to this file when set
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub log_file: Option<PathBuf>,

	pub location: LocationSource,
}

const fn default_interval_secs() -> u64 {
	DEFAULT_INTERVAL_SECS
}

fn default_log_level() -> String {
	"info".to_string()
}

/// Platform data directory, e.g. `~/.local/share/peerloc` on Linux
pub fn default_data_dir() -> Result<PathBuf, ConfigError> {
	ProjectDirs::from("", "", "peerloc")
		.map(|dirs| dirs.data_local_dir().to_path_buf())
		.ok_or(ConfigError::NoDataDir)
}

impl Config {
	pub fn default_with_dir(
		data_dir: PathBuf,
		device: DeviceId,
		remote_url: impl Into<String>,
		username: impl Into<String>,
	) -> Self {
		Self {
			version: CONFIG_VERSION,
			device,
			remote_url: remote_url.into(),
			username: username.into(),
			token: None,
			interval_secs: DEFAULT_INTERVAL_SECS,
			data_dir,
			author_email: None,
			log_level: default_log_level(),
			log_file: None,
			location: LocationSource::File {
				path: PathBuf::from("location.json"),
			},
		}
	}

	/// Load and validate the config at `path`
	pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();

		let json = fs::read_to_string(path)
			.map_err(|e| FileIOError::with_context(path, e, "reading config"))?;

		let config: Self = serde_json::from_str(&json).map_err(|source| ConfigError::Malformed {
			path: path.into(),
			source,
		})?;

		if config.version > CONFIG_VERSION {
			return Err(ConfigError::UnsupportedVersion {
				found: config.version,
			});
		}

		config.validate()?;

		Ok(config)
	}

	/// Save to `path`
	pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
		let path = path.as_ref();

		let json = serde_json::to_vec_pretty(self).map_err(ConfigError::Serialize)?;
		write_atomic(path, &json)?;

		info!("Saved config to {}", path.display());
		Ok(())
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.remote_url.trim().is_empty() {
			return Err(ConfigError::Invalid("remote_url must not be empty"));
		}

		if self.username.trim().is_empty() {
			return Err(ConfigError::Invalid("username must not be empty"));
		}

		if self.interval_secs == 0 {
			return Err(ConfigError::Invalid("interval_secs must be at least 1"));
		}

		Ok(())
	}

	#[must_use]
	pub fn credentials(&self) -> Credentials {
		let token = env::var(TOKEN_ENV_VAR)
			.ok()
			.filter(|token| !token.is_empty())
			.or_else(|| self.token.clone())
			.unwrap_or_else(|| {
				warn!("No access token configured, pushing anonymously");
				String::new()
			});

		Credentials::new(self.username.clone(), token)
	}

	#[must_use]
	pub const fn interval(&self) -> Duration {
		Duration::from_secs(self.interval_secs)
	}

	#[must_use]
	pub fn working_copy_dir(&self) -> PathBuf {
		self.data_dir.join("repo")
	}

	#[must_use]
	pub fn peer_cache_file(&self) -> PathBuf {
		self.data_dir.join("peer_location.json")
	}

	/// Relative location file paths are resolved against the data directory
	#[must_use]
	pub fn location_source(&self) -> LocationSource {
		match &self.location {
			LocationSource::File { path } if path.is_relative() => LocationSource::File {
				path: self.data_dir.join(path),
			},
			other => other.clone(),
		}
	}

	pub fn ensure_directories(&self) -> Result<(), ConfigError> {
		fs::create_dir_all(&self.data_dir)
			.map_err(|e| FileIOError::with_context(&self.data_dir, e, "creating data directory"))?;
		Ok(())
	}
}
