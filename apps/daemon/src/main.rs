use pl_core::{
	cache,
	config::{default_data_dir, CONFIG_FILE_NAME},
	Config, GitRemote, PeerLocation, PeerLocationCache, SyncService,
};
use pl_utils::error::report_error;

use std::{
	path::{Path, PathBuf},
	sync::Arc,
};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};

mod cli;
mod logging;

use cli::{Cli, Command, InitArgs};

const WAITING_FOR_PEER: &str = "Waiting for other device...";

#[tokio::main]
async fn main() -> Result<()> {
	let Cli { config, command } = Cli::parse();

	let config_path = match config {
		Some(path) => path,
		None => default_data_dir()?.join(CONFIG_FILE_NAME),
	};

	match command {
		Command::Init(args) => init(config_path, args),
		Command::Run => run(config_path).await,
		Command::Status => status(config_path),
	}
}

fn init(config_path: PathBuf, args: InitArgs) -> Result<()> {
	if config_path.exists() && !args.force {
		bail!(
			"config already exists at {}, pass --force to overwrite it",
			config_path.display()
		);
	}

	let data_dir = match args.data_dir {
		Some(dir) => dir,
		None => default_data_dir()?,
	};

	let mut config = Config::default_with_dir(data_dir, args.device, args.remote_url, args.username);
	if let Some(interval) = args.interval {
		config.interval_secs = interval;
	}

	config.validate()?;
	config.ensure_directories()?;
	config.save(&config_path)?;

	println!("Wrote config for device {} to {}", config.device, config_path.display());
	println!(
		"Set {} to the access token for {}",
		pl_core::config::TOKEN_ENV_VAR,
		config.remote_url
	);

	Ok(())
}

/// Read the config; logging depends on it, so nothing gets logged in here
fn load_config(config_path: &Path) -> Result<Config> {
	Config::load_from(config_path)
		.with_context(|| format!("failed to load config from {}", config_path.display()))
}

fn log_loaded(config_path: &Path, config: &Config) {
	info!(
		path = %config_path.display(),
		device = %config.device,
		remote_url = %config.remote_url,
		interval_secs = config.interval_secs,
		"Loaded config"
	);
}

async fn run(config_path: PathBuf) -> Result<()> {
	let config = load_config(&config_path)?;

	let _log_guard = logging::init(&config.log_level, config.log_file.as_deref())?;
	log_loaded(&config_path, &config);

	config.ensure_directories()?;

	let service = SyncService::new(
		GitRemote::new().with_author(None, config.author_email.clone()),
		Arc::from(config.location_source().into_provider()),
		config.working_copy_dir(),
		PeerLocationCache::persistent(config.peer_cache_file()),
	);

	let mut peer = service.subscribe();
	announce(peer.get().as_ref());

	service
		.start_syncing(
			config.device,
			config.remote_url.clone(),
			config.credentials(),
			config.interval(),
		)
		.await;

	loop {
		tokio::select! {
			res = tokio::signal::ctrl_c() => {
				if let Err(e) = res {
					warn!(?e, "Failed to listen for ctrl-c, shutting down");
				}
				info!("Shutting down");
				break;
			}
			changed = peer.changed() => match changed {
				Some(location) => announce(Some(&location)),
				None => break,
			}
		}
	}

	service.stop_syncing().await;

	Ok(())
}

fn status(config_path: PathBuf) -> Result<()> {
	let config = load_config(&config_path)?;

	let _log_guard = logging::init(&config.log_level, None)?;
	log_loaded(&config_path, &config);

	let location = report_error(
		cache::load(config.peer_cache_file()),
		"reading last known peer location",
	)
	.ok()
	.flatten();

	println!("{}", describe(location.as_ref()));

	Ok(())
}

fn announce(location: Option<&PeerLocation>) {
	match location {
		Some(location) => info!(
			lat = location.lat,
			lon = location.lon,
			time = %location.time,
			"{}",
			describe(Some(location))
		),
		None => info!("{WAITING_FOR_PEER}"),
	}
}

fn describe(location: Option<&PeerLocation>) -> String {
	location.map_or_else(
		|| WAITING_FOR_PEER.to_string(),
		|location| {
			format!(
				"Other device at {}, {} (last updated {})",
				location.lat, location.lon, location.time
			)
		},
	)
}

#[cfg(test)]
mod tests {
	use super::*;

	use tempfile::tempdir;
	use tracing_test::traced_test;

	#[test]
	fn describes_missing_and_known_peer() {
		assert_eq!(describe(None), WAITING_FOR_PEER);

		let location = PeerLocation {
			lat: 12.5,
			lon: -3.25,
			time: "14 Nov 2023, 10:13:20 PM".to_string(),
			timestamp: 1_700_000_000_000,
		};
		assert_eq!(
			describe(Some(&location)),
			"Other device at 12.5, -3.25 (last updated 14 Nov 2023, 10:13:20 PM)"
		);
	}

	#[test]
	fn init_writes_loadable_config() {
		let dir = tempdir().unwrap();
		let config_path = dir.path().join(CONFIG_FILE_NAME);

		let args = || InitArgs {
			device: pl_core::DeviceId::A,
			remote_url: "https://example.com/loc.git".to_string(),
			username: "sapphire".to_string(),
			data_dir: Some(dir.path().join("data")),
			interval: Some(30),
			force: false,
		};

		init(config_path.clone(), args()).unwrap();

		let config = Config::load_from(&config_path).unwrap();
		assert_eq!(config.interval_secs, 30);
		assert!(config.data_dir.exists());

		assert!(init(config_path, args()).is_err(), "refuses to overwrite");
	}

	#[test]
	#[traced_test]
	fn config_is_logged_once_loaded() {
		let dir = tempdir().unwrap();
		let config_path = dir.path().join(CONFIG_FILE_NAME);

		Config::default_with_dir(
			dir.path().to_path_buf(),
			pl_core::DeviceId::B,
			"https://example.com/loc.git",
			"sapphire",
		)
		.save(&config_path)
		.unwrap();

		let config = load_config(&config_path).unwrap();
		assert!(!logs_contain("Loaded config"));

		log_loaded(&config_path, &config);
		assert!(logs_contain("Loaded config"));
		assert!(logs_contain("device=B"));
	}

	#[test]
	fn missing_config_names_its_path() {
		let dir = tempdir().unwrap();
		let config_path = dir.path().join(CONFIG_FILE_NAME);

		let err = load_config(&config_path).unwrap_err();
		assert!(format!("{err:#}").contains(&config_path.display().to_string()));
	}
}
