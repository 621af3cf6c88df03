use pl_core::DeviceId;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
	name = "peerloc",
	version,
	about = "Share the last known location of two devices through a git repository"
)]
pub struct Cli {
	/// Config file, defaults to `peerloc.json` in the platform data directory
	#[arg(long, global = true)]
	pub config: Option<PathBuf>,

	#[command(subcommand)]
	pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
	/// Write a fresh config file for this device
	Init(InitArgs),
	/// Sync until interrupted
	Run,
	/// Print the last known location of the other device
	Status,
}

#[derive(Parser, Debug)]
pub struct InitArgs {
	/// Which of the two devices this is (A or B)
	#[arg(long)]
	pub device: DeviceId,

	/// URL of the shared repository
	#[arg(long = "remote")]
	pub remote_url: String,

	#[arg(long)]
	pub username: String,

	/// Where the working copy and the cached peer location live
	#[arg(long)]
	pub data_dir: Option<PathBuf>,

	/// Seconds between sync cycles
	#[arg(long)]
	pub interval: Option<u64>,

	/// Overwrite an existing config file
	#[arg(long, default_value_t = false)]
	pub force: bool,
}
