use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which of the two participants this installation is.
///
/// Each device owns exactly one log file in the shared repository and only ever reads the
/// other one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceId {
	A,
	B,
}

impl DeviceId {
	#[must_use]
	pub const fn peer(self) -> Self {
		match self {
			Self::A => Self::B,
			Self::B => Self::A,
		}
	}

	/// Log file written by this device, relative to the repository root
	#[must_use]
	pub const fn log_file(self) -> &'static str {
		match self {
			Self::A => "nodeA.json",
			Self::B => "nodeB.json",
		}
	}

	/// Log file this device reads to learn where its peer is
	#[must_use]
	pub const fn peer_log_file(self) -> &'static str {
		self.peer().log_file()
	}
}

impl fmt::Display for DeviceId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::A => write!(f, "A"),
			Self::B => write!(f, "B"),
		}
	}
}

#[derive(Debug, Error)]
#[error("unknown device id <id='{0}'>, expected 'A' or 'B'")]
pub struct UnknownDeviceId(pub String);

impl FromStr for DeviceId {
	type Err = UnknownDeviceId;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim() {
			"A" | "a" => Ok(Self::A),
			"B" | "b" => Ok(Self::B),
			other => Err(UnknownDeviceId(other.to_string())),
		}
	}
}
