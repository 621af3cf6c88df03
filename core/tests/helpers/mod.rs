//! Shared setup for the sync integration tests: a bare repository standing in for the
//! hosted remote, plus engines wired to it.

#![allow(dead_code)]

use pl_core::{
	Coordinate, Credentials, DeviceId, FixedLocation, GitRemote, LocationProvider,
	PeerLocationCache, RemoteStore, SyncContext, SyncEngine,
};

use std::{
	fs,
	path::{Path, PathBuf},
	sync::Arc,
};

use git2::{Repository, Signature};

pub const SEED_LOG: &[u8] = b"{}";

/// Create a bare repository under `root` holding empty logs for both devices
pub fn seed_remote(root: &Path) -> PathBuf {
	let path = root.join("remote.git");
	let repo = Repository::init_bare(&path).unwrap();

	let blob = repo.blob(SEED_LOG).unwrap();
	let mut builder = repo.treebuilder(None).unwrap();
	for device in [DeviceId::A, DeviceId::B] {
		builder.insert(device.log_file(), blob, 0o100_644).unwrap();
	}
	let tree = repo.find_tree(builder.write().unwrap()).unwrap();

	let signature = Signature::now("seeder", "seeder@example.com").unwrap();
	repo.commit(
		Some("HEAD"),
		&signature,
		&signature,
		"Initial logs",
		&tree,
		&[],
	)
	.unwrap();

	path
}

/// Bare repository with no commits at all, as freshly created on a hosting service
pub fn empty_remote(root: &Path) -> PathBuf {
	let path = root.join("empty.git");
	Repository::init_bare(&path).unwrap();
	path
}

/// Overwrite `name` in the working copy at `workdir` and commit it on top of HEAD
pub fn commit_file(workdir: &Path, name: &str, contents: &str) {
	let repo = Repository::open(workdir).unwrap();
	fs::write(workdir.join(name), contents).unwrap();

	let mut index = repo.index().unwrap();
	index.add_path(Path::new(name)).unwrap();
	index.write().unwrap();
	let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();

	let parent = repo.head().unwrap().peel_to_commit().unwrap();
	let signature = Signature::now("editor", "editor@example.com").unwrap();
	repo.commit(
		Some("HEAD"),
		&signature,
		&signature,
		&format!("Edit {name}"),
		&tree,
		&[&parent],
	)
	.unwrap();
}

/// Push the current branch of `workdir` to its origin
pub fn push_head(workdir: &Path) {
	let repo = Repository::open(workdir).unwrap();
	let branch = repo.head().unwrap().name().unwrap().to_string();

	repo.find_remote("origin")
		.unwrap()
		.push(&[format!("{branch}:{branch}")], None)
		.unwrap();
}

/// Contents of `name` at the tip of the remote's default branch
pub fn remote_file(remote: &Path, name: &str) -> String {
	let repo = Repository::open_bare(remote).unwrap();
	let tree = repo.head().unwrap().peel_to_tree().unwrap();
	let blob = tree
		.get_path(Path::new(name))
		.unwrap()
		.to_object(&repo)
		.unwrap()
		.peel_to_blob()
		.unwrap();

	String::from_utf8(blob.content().to_vec()).unwrap()
}

/// Commit messages on the remote's default branch, newest first
pub fn remote_messages(remote: &Path) -> Vec<String> {
	let repo = Repository::open_bare(remote).unwrap();
	let mut walk = repo.revwalk().unwrap();
	walk.push_head().unwrap();

	walk.map(|oid| {
		repo.find_commit(oid.unwrap())
			.unwrap()
			.message()
			.unwrap_or_default()
			.trim()
			.to_string()
	})
	.collect()
}

pub fn credentials() -> Credentials {
	Credentials::new("tester", "")
}

pub fn url(remote: &Path) -> String {
	remote.to_str().unwrap().to_string()
}

pub fn context(device: DeviceId, remote: &Path, root: &Path) -> SyncContext {
	SyncContext {
		device,
		remote_url: url(remote),
		credentials: credentials(),
		working_copy: root.join(format!("device-{device}")),
		cache: PeerLocationCache::new(),
	}
}

pub fn coordinate(latitude: f64, longitude: f64) -> Coordinate {
	Coordinate {
		latitude,
		longitude,
	}
}

pub fn fixed(latitude: f64, longitude: f64) -> Arc<dyn LocationProvider> {
	Arc::new(FixedLocation(coordinate(latitude, longitude)))
}

pub fn engine(
	device: DeviceId,
	remote: &Path,
	root: &Path,
	location: Arc<dyn LocationProvider>,
) -> SyncEngine<GitRemote> {
	engine_with_store(device, remote, root, GitRemote::new(), location)
}

pub fn engine_with_store<S: RemoteStore>(
	device: DeviceId,
	remote: &Path,
	root: &Path,
	store: S,
	location: Arc<dyn LocationProvider>,
) -> SyncEngine<S> {
	SyncEngine::new(context(device, remote, root), Arc::new(store), location)
}
