//! Conflict guard for the local working copy.
//!
//! Each device writes a disjoint file, so the only way a merge can be left half done is a
//! sync attempt that died mid-pull. Content is never merged by hand here: when a merge is
//! in progress the whole working copy is thrown away and the next open re-clones it from
//! the remote, which holds all durable state.

use pl_utils::error::FileIOError;

use std::{fs, io, path::Path};

use tracing::{debug, warn};

/// Written by git for the duration of a merge that hasn't been committed
pub const MERGE_MARKER: &str = ".git/MERGE_HEAD";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardOutcome {
	Clean,
	Reset,
}

#[must_use]
pub fn has_merge_marker(working_copy: impl AsRef<Path>) -> bool {
	working_copy.as_ref().join(MERGE_MARKER).exists()
}

/// Delete the working copy directory; a directory that is already gone is fine
pub fn reset_working_copy(working_copy: impl AsRef<Path>) -> Result<(), FileIOError> {
	let working_copy = working_copy.as_ref();

	match fs::remove_dir_all(working_copy) {
		Ok(()) => {
			warn!(path = %working_copy.display(), "Discarded local working copy");
			Ok(())
		}
		Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
		Err(e) => Err(FileIOError::with_context(
			working_copy,
			e,
			"removing working copy",
		)),
	}
}

/// Reset the working copy if it carries an unresolved merge, otherwise leave it alone
pub fn guard_working_copy(working_copy: impl AsRef<Path>) -> Result<GuardOutcome, FileIOError> {
	let working_copy = working_copy.as_ref();

	if has_merge_marker(working_copy) {
		warn!(path = %working_copy.display(), "Found unresolved merge in working copy");
		reset_working_copy(working_copy)?;
		Ok(GuardOutcome::Reset)
	} else {
		debug!(path = %working_copy.display(), "Working copy is clean");
		Ok(GuardOutcome::Clean)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use tempfile::tempdir;

	#[test]
	fn merge_marker_wipes_working_copy() {
		let dir = tempdir().unwrap();
		let repo = dir.path().join("repo");
		fs::create_dir_all(repo.join(".git")).unwrap();
		fs::write(repo.join(MERGE_MARKER), "deadbeef\n").unwrap();
		fs::write(repo.join("nodeA.json"), "{}").unwrap();

		assert!(has_merge_marker(&repo));
		assert_eq!(guard_working_copy(&repo).unwrap(), GuardOutcome::Reset);
		assert!(!repo.exists());
	}

	#[test]
	fn clean_copy_is_left_alone() {
		let dir = tempdir().unwrap();
		let repo = dir.path().join("repo");
		fs::create_dir_all(repo.join(".git")).unwrap();

		assert_eq!(guard_working_copy(&repo).unwrap(), GuardOutcome::Clean);
		assert!(repo.exists());
	}

	#[test]
	fn resetting_a_missing_copy_is_fine() {
		let dir = tempdir().unwrap();

		reset_working_copy(dir.path().join("never-cloned")).unwrap();
		assert_eq!(
			guard_working_copy(dir.path().join("never-cloned")).unwrap(),
			GuardOutcome::Clean
		);
	}
}
