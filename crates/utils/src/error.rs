use std::{fmt::Display, io, path::Path};

use thiserror::Error;
use tracing::error;

/// Log the error of a boundary result, if any, and hand the result back untouched
pub fn report_error<T, E: Display>(res: Result<T, E>, context: &str) -> Result<T, E> {
	if let Err(e) = &res {
		error!(%context, "{e:#}");
	}

	res
}

/// File I/O error that keeps the path which caused it
#[derive(Error, Debug)]
pub struct FileIOError {
	pub path: Box<Path>,
	#[source]
	pub source: io::Error,
	pub maybe_context: Option<&'static str>,
}

impl Display for FileIOError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(
			f,
			"file I/O error{}: {}; path: '{}'",
			self.maybe_context
				.map(|ctx| format!(" ({ctx})"))
				.unwrap_or_default(),
			self.source,
			self.path.display()
		)
	}
}

impl FileIOError {
	pub fn from_std_io_err(path: impl AsRef<Path>, source: io::Error) -> Self {
		Self {
			path: path.as_ref().into(),
			source,
			maybe_context: None,
		}
	}

	pub fn with_context(path: impl AsRef<Path>, source: io::Error, ctx: &'static str) -> Self {
		Self {
			path: path.as_ref().into(),
			source,
			maybe_context: Some(ctx),
		}
	}

	#[must_use]
	pub fn kind(&self) -> io::ErrorKind {
		self.source.kind()
	}
}

impl<P: AsRef<Path>> From<(P, io::Error)> for FileIOError {
	fn from((path, source): (P, io::Error)) -> Self {
		Self::from_std_io_err(path, source)
	}
}

impl<P: AsRef<Path>> From<(P, io::Error, &'static str)> for FileIOError {
	fn from((path, source, ctx): (P, io::Error, &'static str)) -> Self {
		Self::with_context(path, source, ctx)
	}
}
