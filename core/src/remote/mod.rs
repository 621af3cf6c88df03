use pl_utils::error::FileIOError;

use std::{fmt, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod git;

pub use git::{GitHandle, GitRemote};

#[derive(Debug, Error)]
pub enum Error {
	#[error("transport error talking to the remote: {0}")]
	Transport(#[source] git2::Error),
	#[error("path exists but is not a valid working copy <path='{}'>: {source}", .path.display())]
	CorruptLocalCopy {
		path: Box<Path>,
		source: git2::Error,
	},
	#[error("merge left {conflicted_files} conflicted file(s) in the working copy")]
	Conflict { conflicted_files: usize },
	#[error("remote advanced past the local head, must pull before pushing")]
	NonFastForward,
	#[error("push rejected by the remote: {0}")]
	PushRejected(String),
	#[error("git error: {0}")]
	Git(#[from] git2::Error),
	#[error(transparent)]
	FileIO(#[from] FileIOError),
}

impl Error {
	/// Errors after which the working copy can't be trusted and has to be re-cloned
	#[must_use]
	pub const fn requires_reset(&self) -> bool {
		matches!(self, Self::Conflict { .. } | Self::CorruptLocalCopy { .. })
	}
}

/// Username and access token used for every network operation
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
	pub username: String,
	pub token: String,
}

impl Credentials {
	pub fn new(username: impl Into<String>, token: impl Into<String>) -> Self {
		Self {
			username: username.into(),
			token: token.into(),
		}
	}
}

impl fmt::Debug for Credentials {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Credentials")
			.field("username", &self.username)
			.field("token", &"<redacted>")
			.finish()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
	/// Remote has no commits on the tracked branch yet
	EmptyRemote,
	UpToDate,
	FastForward,
	Merged,
}

/// Client for the shared repository.
///
/// All methods block on disk and network I/O; callers run them off the async runtime.
/// Nothing here is idempotent at the transport level: a retried push may create a second
/// commit with the same content, which is harmless because only file contents matter.
pub trait RemoteStore: Send + Sync + 'static {
	type Handle;

	/// Clone `remote_url` into `local_path` when there's no working copy there yet, open
	/// the existing one otherwise.
	fn ensure_open(
		&self,
		local_path: &Path,
		remote_url: &str,
		credentials: &Credentials,
	) -> Result<Self::Handle, Error>;

	/// Fetch the tracked branch and integrate it into the working copy.
	///
	/// Fails with [`Error::Conflict`] when the merge can't be completed automatically, in
	/// which case the merge state is left on disk.
	fn pull(&self, handle: &mut Self::Handle, credentials: &Credentials)
		-> Result<PullOutcome, Error>;

	/// Stage `path` (relative to the repository root), commit it and push the tracked branch.
	fn commit_and_push(
		&self,
		handle: &mut Self::Handle,
		path: &Path,
		message: &str,
		credentials: &Credentials,
	) -> Result<(), Error>;
}
