use pl_actors::ActorHandle;

use std::{
	path::PathBuf,
	sync::{atomic::AtomicBool, Arc},
	time::Duration,
};

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{
	cache::{PeerLocation, PeerLocationCache, PeerLocationReader},
	device::DeviceId,
	engine::{report_cycle, CycleError, CycleReport, SyncContext, SyncDriver, SyncEngine},
	location::LocationProvider,
	remote::{Credentials, GitRemote, RemoteStore},
};

#[derive(Debug, Error)]
pub enum ServiceError {
	#[error("syncing hasn't been started")]
	NotSyncing,
	#[error(transparent)]
	Cycle(#[from] CycleError),
}

struct Running<S: RemoteStore> {
	engine: Arc<SyncEngine<S>>,
	driver: ActorHandle,
}

/// Entry point for whatever displays the peer's location.
///
/// Owns the working copy and the peer location cache; the presentation side only gets to
/// start and stop syncing and to read the cache.
pub struct SyncService<S: RemoteStore = GitRemote> {
	store: Arc<S>,
	location: Arc<dyn LocationProvider>,
	working_copy: PathBuf,
	cache: PeerLocationCache,
	/// Raised while any cycle touches `working_copy`, whichever engine started it
	cycle_in_flight: Arc<AtomicBool>,
	running: Mutex<Option<Running<S>>>,
}

impl<S: RemoteStore> SyncService<S> {
	pub fn new(
		store: S,
		location: Arc<dyn LocationProvider>,
		working_copy: impl Into<PathBuf>,
		cache: PeerLocationCache,
	) -> Self {
		Self {
			store: Arc::new(store),
			location,
			working_copy: working_copy.into(),
			cache,
			cycle_in_flight: Arc::new(AtomicBool::new(false)),
			running: Mutex::new(None),
		}
	}

	/// Start the periodic cycle; an already running one is stopped first
	pub async fn start_syncing(
		&self,
		device: DeviceId,
		remote_url: impl Into<String>,
		credentials: Credentials,
		interval: Duration,
	) {
		let mut running = self.running.lock().await;

		if let Some(Running { driver, .. }) = running.take() {
			warn!("Sync already running, restarting it with new settings");
			driver.stop().await;
		}

		let engine = Arc::new(SyncEngine::with_cycle_flag(
			SyncContext {
				device,
				remote_url: remote_url.into(),
				credentials,
				working_copy: self.working_copy.clone(),
				cache: self.cache.clone(),
			},
			Arc::clone(&self.store),
			Arc::clone(&self.location),
			Arc::clone(&self.cycle_in_flight),
		));

		let driver = ActorHandle::spawn(SyncDriver {
			engine: Arc::clone(&engine),
			interval,
		});

		info!(
			%device,
			working_copy = %self.working_copy.display(),
			"Started syncing"
		);

		*running = Some(Running { engine, driver });
	}

	/// Run a cycle now instead of waiting for the next tick.
	///
	/// Fails with [`CycleError::InFlight`] when the driver is in the middle of one.
	pub async fn sync_now(&self) -> Result<CycleReport, ServiceError> {
		let engine = self
			.running
			.lock()
			.await
			.as_ref()
			.map(|running| Arc::clone(&running.engine))
			.ok_or(ServiceError::NotSyncing)?;

		let res = engine.run_cycle().await;
		report_cycle(engine.context().device, &res);

		Ok(res?)
	}

	pub async fn stop_syncing(&self) {
		if let Some(Running { driver, .. }) = self.running.lock().await.take() {
			let actor = driver.name();
			driver.stop().await;
			info!(actor, "Stopped syncing");
		}
	}

	pub async fn is_syncing(&self) -> bool {
		self.running
			.lock()
			.await
			.as_ref()
			.is_some_and(|running| running.driver.is_running())
	}

	#[must_use]
	pub fn last_known_peer_location(&self) -> Option<PeerLocation> {
		self.cache.get()
	}

	/// Narrow read-only access for the presentation layer
	#[must_use]
	pub fn subscribe(&self) -> PeerLocationReader {
		self.cache.reader()
	}
}
