use std::{fs, path::Path};

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Directives used when `RUST_LOG` isn't set
pub fn default_directives(level: &str) -> String {
	format!("{level},pl_core=debug")
}

/// Install the global subscriber: stderr always, plus `log_file` when given.
///
/// The returned guard flushes the file writer and must be kept alive until exit.
pub fn init(level: &str, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
	let filter = EnvFilter::try_from_default_env()
		.or_else(|_| EnvFilter::try_new(default_directives(level)))
		.context("invalid log filter")?;

	let stderr = fmt::layer().with_target(true).with_writer(std::io::stderr);

	let (file, guard) = match log_file {
		Some(path) => {
			let dir = match path.parent() {
				Some(parent) if !parent.as_os_str().is_empty() => parent,
				_ => Path::new("."),
			};
			let file_name = path
				.file_name()
				.with_context(|| format!("log file path has no file name: {}", path.display()))?;

			fs::create_dir_all(dir)
				.with_context(|| format!("failed to create log directory {}", dir.display()))?;

			let (writer, guard) =
				tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));

			(
				Some(
					fmt::layer()
						.with_target(true)
						.with_ansi(false)
						.with_writer(writer)
						.boxed(),
				),
				Some(guard),
			)
		}
		None => (None, None),
	};

	tracing_subscriber::registry()
		.with(filter)
		.with(stderr)
		.with(file)
		.try_init()
		.context("failed to install tracing subscriber")?;

	Ok(guard)
}
