use pl_utils::error::FileIOError;

use std::{
	cell::RefCell,
	fs, io,
	path::Path,
};

use git2::{
	build::{CheckoutBuilder, RepoBuilder},
	AnnotatedCommit, Commit, Cred, ErrorClass, ErrorCode, FetchOptions, PushOptions,
	RemoteCallbacks, Repository, Signature,
};
use tracing::{debug, info, instrument, warn};

use crate::guard::reset_working_copy;

use super::{Credentials, Error, PullOutcome, RemoteStore};

const ORIGIN: &str = "origin";
/// libgit2 keeps asking for credentials as long as the callback hands some out
const MAX_CREDENTIAL_ATTEMPTS: usize = 3;

/// [`RemoteStore`] backed by a local git clone of the shared repository
#[derive(Debug, Clone, Default)]
pub struct GitRemote {
	author_name: Option<String>,
	author_email: Option<String>,
}

/// An opened working copy, only usable through [`GitRemote`]
pub struct GitHandle {
	repo: Repository,
}

impl GitRemote {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Commit author; defaults to the credentials' username and a noreply address
	#[must_use]
	pub fn with_author(mut self, name: Option<String>, email: Option<String>) -> Self {
		self.author_name = name;
		self.author_email = email;
		self
	}

	fn signature(&self, credentials: &Credentials) -> Result<Signature<'static>, Error> {
		let name = self
			.author_name
			.as_deref()
			.unwrap_or(&credentials.username);

		let email = self.author_email.clone().unwrap_or_else(|| {
			format!("{}@users.noreply.github.com", credentials.username)
		});

		Ok(Signature::now(name, &email)?)
	}
}

impl RemoteStore for GitRemote {
	type Handle = GitHandle;

	#[instrument(skip(self, local_path, credentials), fields(path = %local_path.display()), err)]
	fn ensure_open(
		&self,
		local_path: &Path,
		remote_url: &str,
		credentials: &Credentials,
	) -> Result<GitHandle, Error> {
		if needs_clone(local_path)? {
			info!(%remote_url, "No working copy found, cloning");

			let mut builder = RepoBuilder::new();
			builder.fetch_options(fetch_options(credentials));

			return match builder.clone(remote_url, local_path) {
				Ok(repo) => Ok(GitHandle { repo }),
				Err(e) => {
					// never leave a half cloned directory behind to be mistaken for a working copy
					if let Err(e) = reset_working_copy(local_path) {
						warn!(?e, "Failed to clean up after failed clone");
					}
					Err(Error::Transport(e))
				}
			};
		}

		let repo = Repository::open(local_path).map_err(|source| Error::CorruptLocalCopy {
			path: local_path.into(),
			source,
		})?;

		if repo.is_bare() {
			return Err(Error::CorruptLocalCopy {
				path: local_path.into(),
				source: git2::Error::from_str("working copy is a bare repository"),
			});
		}

		let url_matches = repo
			.find_remote(ORIGIN)
			.map(|remote| remote.url() == Some(remote_url))
			.map_err(|source| Error::CorruptLocalCopy {
				path: local_path.into(),
				source,
			})?;

		if !url_matches {
			info!(%remote_url, "Remote url changed, updating origin");
			repo.remote_set_url(ORIGIN, remote_url)?;
		}

		debug!("Opened existing working copy");

		Ok(GitHandle { repo })
	}

	#[instrument(skip_all, err)]
	fn pull(&self, handle: &mut GitHandle, credentials: &Credentials) -> Result<PullOutcome, Error> {
		let repo = &handle.repo;
		let branch = current_branch(repo)?;
		let local_ref = format!("refs/heads/{branch}");
		let tracking_ref = format!("refs/remotes/{ORIGIN}/{branch}");

		repo.find_remote(ORIGIN)?
			.fetch(
				&[format!("+{local_ref}:{tracking_ref}")],
				Some(&mut fetch_options(credentials)),
				None,
			)
			.map_err(Error::Transport)?;

		let fetched_oid = match repo.refname_to_id(&tracking_ref) {
			Ok(oid) => oid,
			Err(e) if e.code() == ErrorCode::NotFound => {
				debug!(%branch, "Remote branch doesn't exist yet");
				return Ok(PullOutcome::EmptyRemote);
			}
			Err(e) => return Err(e.into()),
		};

		let fetched = repo.find_annotated_commit(fetched_oid)?;
		let (analysis, _) = repo.merge_analysis(&[&fetched])?;

		let outcome = if analysis.is_up_to_date() {
			PullOutcome::UpToDate
		} else if analysis.is_unborn() {
			repo.reference(&local_ref, fetched_oid, true, "pull: initial checkout")?;
			checkout(repo, &local_ref)?;
			PullOutcome::FastForward
		} else if analysis.is_fast_forward() {
			repo.find_reference(&local_ref)?
				.set_target(fetched_oid, "pull: fast-forward")?;
			checkout(repo, &local_ref)?;
			PullOutcome::FastForward
		} else {
			merge(repo, &fetched, &branch, &self.signature(credentials)?)?;
			PullOutcome::Merged
		};

		debug!(%branch, ?outcome, "Pulled from remote");

		Ok(outcome)
	}

	#[instrument(skip(self, handle, path, credentials), fields(path = %path.display()), err)]
	fn commit_and_push(
		&self,
		handle: &mut GitHandle,
		path: &Path,
		message: &str,
		credentials: &Credentials,
	) -> Result<(), Error> {
		let repo = &handle.repo;

		let mut index = repo.index()?;
		index.add_path(path)?;
		index.write()?;
		let tree = repo.find_tree(index.write_tree()?)?;

		let parent = match repo.head() {
			Ok(head) => Some(head.peel_to_commit()?),
			Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => None,
			Err(e) => return Err(e.into()),
		};
		let parents = parent.iter().collect::<Vec<&Commit<'_>>>();

		let signature = self.signature(credentials)?;
		let commit_oid = repo.commit(
			Some("HEAD"),
			&signature,
			&signature,
			message,
			&tree,
			&parents,
		)?;

		debug!(%commit_oid, "Committed device log");

		push(repo, &current_branch(repo)?, credentials)
	}
}

fn needs_clone(local_path: &Path) -> Result<bool, Error> {
	match fs::read_dir(local_path) {
		Ok(mut entries) => Ok(entries.next().is_none()),
		Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(true),
		Err(e) => Err(FileIOError::with_context(local_path, e, "inspecting working copy").into()),
	}
}

/// Name of the branch HEAD points at, born or not
fn current_branch(repo: &Repository) -> Result<String, Error> {
	let head = repo.find_reference("HEAD")?;

	let target = match head.symbolic_target() {
		Some(target) => target.to_string(),
		None => {
			return Err(git2::Error::from_str("HEAD is detached, expected a branch").into());
		}
	};

	Ok(target
		.strip_prefix("refs/heads/")
		.map_or_else(|| target.clone(), ToString::to_string))
}

fn checkout(repo: &Repository, refname: &str) -> Result<(), Error> {
	repo.set_head(refname)?;
	repo.checkout_head(Some(CheckoutBuilder::default().force()))?;
	Ok(())
}

fn merge(
	repo: &Repository,
	fetched: &AnnotatedCommit<'_>,
	branch: &str,
	signature: &Signature<'_>,
) -> Result<(), Error> {
	if let Err(e) = repo.merge(&[fetched], None, None) {
		return Err(
			if matches!(e.code(), ErrorCode::Conflict | ErrorCode::MergeConflict) {
				Error::Conflict {
					conflicted_files: 0,
				}
			} else {
				e.into()
			},
		);
	}

	let mut index = repo.index()?;
	if index.has_conflicts() {
		// MERGE_HEAD stays on disk, the conflict guard picks it up
		let conflicted_files = index.conflicts()?.count();
		return Err(Error::Conflict { conflicted_files });
	}

	let tree = repo.find_tree(index.write_tree()?)?;
	let local = repo.head()?.peel_to_commit()?;
	let remote = repo.find_commit(fetched.id())?;

	repo.commit(
		Some("HEAD"),
		signature,
		signature,
		&format!("Merge {ORIGIN}/{branch}"),
		&tree,
		&[&local, &remote],
	)?;
	repo.cleanup_state()?;

	Ok(())
}

fn push(repo: &Repository, branch: &str, credentials: &Credentials) -> Result<(), Error> {
	let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");
	let rejection = RefCell::new(None::<String>);

	{
		let mut callbacks = remote_callbacks(credentials);
		callbacks.push_update_reference(|_refname, status| {
			if let Some(message) = status {
				*rejection.borrow_mut() = Some(message.to_string());
			}
			Ok(())
		});

		let mut push_options = PushOptions::new();
		push_options.remote_callbacks(callbacks);

		repo.find_remote(ORIGIN)?
			.push(&[refspec.as_str()], Some(&mut push_options))
			.map_err(classify_push_error)?;
	}

	match rejection.into_inner() {
		Some(message) if is_non_fast_forward(&message) => Err(Error::NonFastForward),
		Some(message) => Err(Error::PushRejected(message)),
		None => {
			debug!(%branch, "Pushed to remote");
			Ok(())
		}
	}
}

fn classify_push_error(e: git2::Error) -> Error {
	if e.code() == ErrorCode::NotFastForward || is_non_fast_forward(e.message()) {
		Error::NonFastForward
	} else if is_transport(&e) {
		Error::Transport(e)
	} else {
		Error::Git(e)
	}
}

fn is_non_fast_forward(message: &str) -> bool {
	let message = message.to_lowercase();
	message.contains("non-fast-forward")
		|| message.contains("not fast-forward")
		|| message.contains("fetch first")
		|| message.contains("non-fastforwardable")
}

fn is_transport(e: &git2::Error) -> bool {
	matches!(
		e.class(),
		ErrorClass::Net | ErrorClass::Http | ErrorClass::Ssh | ErrorClass::Ssl | ErrorClass::Callback
	) || matches!(
		e.code(),
		ErrorCode::Auth | ErrorCode::Certificate | ErrorCode::Eof | ErrorCode::Timeout
	)
}

fn fetch_options(credentials: &Credentials) -> FetchOptions<'_> {
	let mut fetch_options = FetchOptions::new();
	fetch_options.remote_callbacks(remote_callbacks(credentials));
	fetch_options
}

fn remote_callbacks(credentials: &Credentials) -> RemoteCallbacks<'_> {
	let mut attempts = 0;
	let mut callbacks = RemoteCallbacks::new();

	callbacks.credentials(move |_url, username_from_url, allowed| {
		attempts += 1;
		if attempts > MAX_CREDENTIAL_ATTEMPTS {
			return Err(git2::Error::new(
				ErrorCode::Auth,
				ErrorClass::Callback,
				"credentials rejected by the remote",
			));
		}

		if allowed.is_user_pass_plaintext() {
			Cred::userpass_plaintext(&credentials.username, &credentials.token)
		} else if allowed.is_ssh_key() {
			Cred::ssh_key_from_agent(username_from_url.unwrap_or(&credentials.username))
		} else {
			Cred::default()
		}
	});

	callbacks
}
