use std::{
	fs,
	io::{self, Write},
	path::Path,
};

use tempfile::NamedTempFile;

use crate::error::FileIOError;

/// Read a file to string, treating a missing file as `None`
pub fn read_optional(path: impl AsRef<Path>) -> Result<Option<String>, FileIOError> {
	let path = path.as_ref();

	match fs::read_to_string(path) {
		Ok(contents) => Ok(Some(contents)),
		Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(FileIOError::with_context(path, e, "reading file")),
	}
}

/// Replace `path` with `contents` so readers see either the old or the new file, never a mix.
///
/// The temporary file is created next to the target, so the final rename stays on the same
/// filesystem.
pub fn write_atomic(path: impl AsRef<Path>, contents: &[u8]) -> Result<(), FileIOError> {
	let path = path.as_ref();
	let dir = match path.parent() {
		Some(parent) if !parent.as_os_str().is_empty() => parent,
		_ => Path::new("."),
	};

	fs::create_dir_all(dir)
		.map_err(|e| FileIOError::with_context(dir, e, "creating parent directory"))?;

	let mut tmp = NamedTempFile::new_in(dir)
		.map_err(|e| FileIOError::with_context(dir, e, "creating temporary file"))?;

	tmp.write_all(contents)
		.and_then(|()| tmp.as_file().sync_all())
		.map_err(|e| FileIOError::with_context(tmp.path(), e, "writing temporary file"))?;

	tmp.persist(path)
		.map_err(|e| FileIOError::with_context(path, e.error, "renaming temporary file"))?;

	Ok(())
}
