//! The sync cycle.
//!
//! One cycle acquires the device position, makes sure the working copy is usable, pulls,
//! appends this device's record, pushes it and finally reads the peer's newest record into
//! the [`PeerLocationCache`]. Any failure aborts the rest of the cycle; the next one starts
//! from scratch, so there's no retry logic in here.

use pl_utils::error::FileIOError;

use std::{
	path::{Path, PathBuf},
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
};

use thiserror::Error;
use tokio::task::{spawn_blocking, JoinError};
use tracing::{debug, info, instrument, warn};

use crate::{
	cache::PeerLocationCache,
	device::DeviceId,
	guard::{guard_working_copy, reset_working_copy, GuardOutcome},
	location::{LocationError, LocationProvider},
	record::{self, append_record, latest_record, LocationRecord},
	remote::{self, Credentials, PullOutcome, RemoteStore},
};

mod driver;

pub(crate) use driver::SyncDriver;

#[derive(Debug, Error)]
pub enum CycleError {
	#[error("previous sync cycle is still in flight")]
	InFlight,
	#[error("no location for this cycle: {0}")]
	Location(#[from] LocationError),
	#[error("failed to guard working copy: {0}")]
	Guard(#[source] FileIOError),
	#[error(transparent)]
	Remote(#[from] remote::Error),
	#[error(transparent)]
	Record(#[from] record::Error),
	#[error("sync task failed to complete: {0}")]
	Join(#[from] JoinError),
}

/// Everything a cycle needs to know about this installation
#[derive(Debug, Clone)]
pub struct SyncContext {
	pub device: DeviceId,
	pub remote_url: String,
	pub credentials: Credentials,
	pub working_copy: PathBuf,
	pub cache: PeerLocationCache,
}

impl SyncContext {
	#[must_use]
	pub fn own_log(&self) -> PathBuf {
		self.working_copy.join(self.device.log_file())
	}

	#[must_use]
	pub fn peer_log(&self) -> PathBuf {
		self.working_copy.join(self.device.peer_log_file())
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
	/// Key of the record this cycle published
	pub timestamp: i64,
	pub working_copy_reset: bool,
	pub pull: PullOutcome,
	pub peer_refreshed: bool,
}

/// Held for the whole duration of a cycle, including its blocking part
#[derive(Debug)]
struct CycleGuard(Arc<AtomicBool>);

impl CycleGuard {
	fn try_acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
		flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
			.ok()
			.map(|_| Self(Arc::clone(flag)))
	}
}

impl Drop for CycleGuard {
	fn drop(&mut self) {
		self.0.store(false, Ordering::Release);
	}
}

struct StoreReport {
	guard: GuardOutcome,
	pull: PullOutcome,
	peer: Result<Option<LocationRecord>, record::Error>,
}

pub struct SyncEngine<S: RemoteStore> {
	ctx: Arc<SyncContext>,
	store: Arc<S>,
	location: Arc<dyn LocationProvider>,
	in_flight: Arc<AtomicBool>,
}

impl<S: RemoteStore> SyncEngine<S> {
	pub fn new(ctx: SyncContext, store: Arc<S>, location: Arc<dyn LocationProvider>) -> Self {
		Self::with_cycle_flag(ctx, store, location, Arc::new(AtomicBool::new(false)))
	}

	/// Engine sharing `in_flight` with every other engine on the same working copy.
	///
	/// A stopped engine may still have git work running in the background, and that work
	/// keeps the flag raised until it's done.
	pub fn with_cycle_flag(
		ctx: SyncContext,
		store: Arc<S>,
		location: Arc<dyn LocationProvider>,
		in_flight: Arc<AtomicBool>,
	) -> Self {
		Self {
			ctx: Arc::new(ctx),
			store,
			location,
			in_flight,
		}
	}

	#[must_use]
	pub fn context(&self) -> &SyncContext {
		&self.ctx
	}

	#[must_use]
	pub fn is_cycle_in_flight(&self) -> bool {
		self.in_flight.load(Ordering::Acquire)
	}

	/// Run one full cycle, unless another one hasn't finished yet.
	///
	/// Dropping the returned future after the location was acquired doesn't interrupt the
	/// git work; the cycle keeps counting as in flight until that work is done.
	#[instrument(skip(self), fields(device = %self.ctx.device))]
	pub async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
		let guard = CycleGuard::try_acquire(&self.in_flight).ok_or(CycleError::InFlight)?;

		let coordinate = self.location.current_location().await?;
		let record = LocationRecord::now(coordinate);
		let timestamp = record.timestamp;

		let StoreReport {
			guard: guard_outcome,
			pull,
			peer,
		} = spawn_blocking({
			let ctx = Arc::clone(&self.ctx);
			let store = Arc::clone(&self.store);

			move || {
				let _guard = guard;
				sync_working_copy(store.as_ref(), &ctx, &record)
			}
		})
		.await??;

		let peer_refreshed = match peer {
			Ok(Some(latest)) => {
				debug!(timestamp = latest.timestamp, "Read peer location");
				self.ctx.cache.set(latest.into()).await;
				true
			}
			Ok(None) => {
				debug!("Peer hasn't published a location yet");
				false
			}
			Err(e) => {
				warn!(?e, "Peer log is unreadable, keeping last known location");
				false
			}
		};

		Ok(CycleReport {
			timestamp,
			working_copy_reset: guard_outcome == GuardOutcome::Reset,
			pull,
			peer_refreshed,
		})
	}
}

/// The blocking half of a cycle: guard, open, pull, write, push, read peer
fn sync_working_copy<S: RemoteStore>(
	store: &S,
	ctx: &SyncContext,
	record: &LocationRecord,
) -> Result<StoreReport, CycleError> {
	let guard = guard_working_copy(&ctx.working_copy).map_err(CycleError::Guard)?;

	let mut handle = store
		.ensure_open(&ctx.working_copy, &ctx.remote_url, &ctx.credentials)
		.map_err(|e| discard_if_untrusted(&ctx.working_copy, e))?;

	let pull = match store.pull(&mut handle, &ctx.credentials) {
		Ok(pull) => pull,
		Err(e) => {
			drop(handle);
			return Err(discard_if_untrusted(&ctx.working_copy, e));
		}
	};

	append_record(ctx.own_log(), record)?;

	store.commit_and_push(
		&mut handle,
		Path::new(ctx.device.log_file()),
		&format!("Device {} @ {}", ctx.device, record.timestamp),
		&ctx.credentials,
	)?;

	info!(
		timestamp = record.timestamp,
		lat = record.latitude,
		lon = record.longitude,
		"Published own location"
	);

	Ok(StoreReport {
		guard,
		pull,
		peer: latest_record(ctx.peer_log()),
	})
}

fn discard_if_untrusted(working_copy: &Path, e: remote::Error) -> CycleError {
	if e.requires_reset() {
		if let Err(reset_err) = reset_working_copy(working_copy) {
			warn!(?reset_err, "Failed to discard untrusted working copy");
		}
	}

	e.into()
}

/// Single place where cycle failures end up; nothing here is fatal
pub(crate) fn report_cycle(device: DeviceId, res: &Result<CycleReport, CycleError>) {
	match res {
		Ok(report) => info!(
			%device,
			timestamp = report.timestamp,
			pull = ?report.pull,
			reset = report.working_copy_reset,
			peer_refreshed = report.peer_refreshed,
			"Sync cycle completed"
		),
		Err(CycleError::InFlight) => debug!(%device, "Previous cycle still running, skipping"),
		Err(CycleError::Location(e)) => info!(%device, %e, "Skipping cycle"),
		Err(CycleError::Remote(remote::Error::NonFastForward)) => warn!(
			%device,
			"Remote moved ahead of us, next cycle will pull it in"
		),
		Err(CycleError::Remote(e)) if e.requires_reset() => warn!(
			%device,
			%e,
			"Discarded working copy, next cycle clones it again"
		),
		Err(e) => warn!(%device, ?e, "Sync cycle aborted"),
	}
}
