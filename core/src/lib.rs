#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::dbg_macro,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

//! Two devices sharing their last known location through a git repository.
//!
//! Each device owns one JSON log file in the shared repository and periodically appends its
//! position to it, pushes, and reads the newest entry of the other device's log. The sync
//! state lives entirely in the repository; the only local state worth keeping is the peer's
//! last known location.

pub mod cache;
pub mod config;
pub mod device;
pub mod engine;
pub mod guard;
pub mod location;
pub mod record;
pub mod remote;
pub mod service;

pub use cache::{PeerLocation, PeerLocationCache, PeerLocationReader};
pub use config::{Config, ConfigError, LocationSource};
pub use device::DeviceId;
pub use engine::{CycleError, CycleReport, SyncContext, SyncEngine};
pub use location::{Coordinate, FileLocation, FixedLocation, LocationError, LocationProvider};
pub use record::LocationRecord;
pub use remote::{Credentials, GitRemote, PullOutcome, RemoteStore};
pub use service::{ServiceError, SyncService};
