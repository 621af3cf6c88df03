//! Per-device JSON location logs.
//!
//! A log is a single JSON object whose keys are epoch-millisecond timestamps rendered as
//! strings and whose values are `{"lat": .., "lon": .., "time": ..}` entries:
//!
//! ```json
//! {
//!   "1700000000000": { "lat": 10.0, "lon": 20.0, "time": "14 Nov 2023, 10:13:20 PM" }
//! }
//! ```
//!
//! Only the owning device appends to its log. Entries already present are carried through
//! as opaque JSON values, so an append never rewrites anything but the new key.

use pl_utils::{
	error::FileIOError,
	fs::{read_optional, write_atomic},
};

use std::path::Path;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::trace;

use crate::location::Coordinate;

/// Human readable form used for the `time` field, e.g. `14 Nov 2023, 10:13:20 PM`
pub const DISPLAY_TIME_FORMAT: &str = "%d %b %Y, %I:%M:%S %p";

#[derive(Debug, Error)]
pub enum Error {
	#[error(transparent)]
	FileIO(#[from] FileIOError),
	#[error("malformed device log <path='{}'>: {source}", .path.display())]
	MalformedLog {
		path: Box<Path>,
		source: serde_json::Error,
	},
	#[error("device log is not a JSON object <path='{}'>", .0.display())]
	NotAnObject(Box<Path>),
	#[error("malformed entry <key='{key}'> in device log <path='{}'>: {source}", .path.display())]
	MalformedEntry {
		path: Box<Path>,
		key: String,
		source: serde_json::Error,
	},
	#[error("failed to serialize device log: {0}")]
	Serialize(#[source] serde_json::Error),
}

/// One location sample, keyed in its log by `timestamp`
#[derive(Debug, Clone, PartialEq)]
pub struct LocationRecord {
	/// Epoch milliseconds, also the record's unique key
	pub timestamp: i64,
	pub latitude: f64,
	pub longitude: f64,
	pub display_time: String,
}

impl LocationRecord {
	#[must_use]
	pub fn new(timestamp: i64, coordinate: Coordinate, display_time: impl Into<String>) -> Self {
		Self {
			timestamp,
			latitude: coordinate.latitude,
			longitude: coordinate.longitude,
			display_time: display_time.into(),
		}
	}

	/// Record stamped with the current wall clock, displayed in local time
	#[must_use]
	pub fn now(coordinate: Coordinate) -> Self {
		Self::at(Utc::now(), coordinate)
	}

	#[must_use]
	pub fn at(instant: DateTime<Utc>, coordinate: Coordinate) -> Self {
		Self::new(
			instant.timestamp_millis(),
			coordinate,
			instant
				.with_timezone(&Local)
				.format(DISPLAY_TIME_FORMAT)
				.to_string(),
		)
	}

	#[must_use]
	pub const fn coordinate(&self) -> Coordinate {
		Coordinate {
			latitude: self.latitude,
			longitude: self.longitude,
		}
	}
}

/// On-disk shape of a log entry
#[derive(Debug, Serialize, Deserialize)]
struct Entry {
	lat: f64,
	lon: f64,
	#[serde(alias = "displayTime")]
	time: String,
}

impl From<&LocationRecord> for Entry {
	fn from(record: &LocationRecord) -> Self {
		Self {
			lat: record.latitude,
			lon: record.longitude,
			time: record.display_time.clone(),
		}
	}
}

/// Insert `record` into the log at `path`, creating the log if needed.
///
/// A missing or blank file counts as an empty log. The file is replaced atomically, so a
/// crash mid-write leaves the previous log intact.
pub fn append_record(path: impl AsRef<Path>, record: &LocationRecord) -> Result<(), Error> {
	let path = path.as_ref();

	let mut log = read_log(path)?.unwrap_or_default();

	let entry = serde_json::to_value(Entry::from(record)).map_err(Error::Serialize)?;
	log.insert(record.timestamp.to_string(), entry);

	let contents = serde_json::to_vec_pretty(&Value::Object(log)).map_err(Error::Serialize)?;
	write_atomic(path, &contents)?;

	trace!(path = %path.display(), timestamp = record.timestamp, "Appended location record");

	Ok(())
}

/// The entry with the numerically greatest timestamp key, if any.
///
/// Keys that don't parse as integers are ignored. Keys are never compared as strings:
/// `"999"` is older than `"1000"`.
pub fn latest_record(path: impl AsRef<Path>) -> Result<Option<LocationRecord>, Error> {
	let path = path.as_ref();

	let Some(log) = read_log(path)? else {
		return Ok(None);
	};

	let Some((timestamp, key)) = log
		.keys()
		.filter_map(|key| key.parse::<i64>().ok().map(|ts| (ts, key)))
		.max_by_key(|(ts, _)| *ts)
	else {
		return Ok(None);
	};

	let Entry { lat, lon, time } =
		Entry::deserialize(&log[key]).map_err(|source| Error::MalformedEntry {
			path: path.into(),
			key: key.clone(),
			source,
		})?;

	Ok(Some(LocationRecord {
		timestamp,
		latitude: lat,
		longitude: lon,
		display_time: time,
	}))
}

fn read_log(path: &Path) -> Result<Option<Map<String, Value>>, Error> {
	let Some(contents) = read_optional(path)? else {
		return Ok(None);
	};

	if contents.trim().is_empty() {
		return Ok(Some(Map::new()));
	}

	match serde_json::from_str(&contents) {
		Ok(Value::Object(log)) => Ok(Some(log)),
		Ok(_) => Err(Error::NotAnObject(path.into())),
		Err(source) => Err(Error::MalformedLog {
			path: path.into(),
			source,
		}),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use std::fs;

	use serde_json::json;
	use tempfile::tempdir;

	fn record(timestamp: i64, lat: f64, lon: f64) -> LocationRecord {
		LocationRecord::new(
			timestamp,
			Coordinate {
				latitude: lat,
				longitude: lon,
			},
			format!("t{timestamp}"),
		)
	}

	#[test]
	fn latest_is_numeric_not_lexical() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("nodeA.json");

		append_record(&path, &record(999, 1.0, 1.0)).unwrap();
		append_record(&path, &record(1000, 2.0, 2.0)).unwrap();
		append_record(&path, &record(99, 3.0, 3.0)).unwrap();

		let latest = latest_record(&path).unwrap().unwrap();
		assert_eq!(latest.timestamp, 1000);
		assert_eq!(latest.coordinate().latitude, 2.0);
	}

	#[test]
	fn append_keeps_every_other_entry_untouched() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("nodeB.json");

		fs::write(
			&path,
			json!({
				"1700000000000": { "lat": 1.5, "lon": 2.5, "time": "old", "accuracy": 4 },
				"not-a-timestamp": { "note": "kept" },
			})
			.to_string(),
		)
		.unwrap();

		append_record(&path, &record(1_700_000_000_500, 3.0, 4.0)).unwrap();

		let log: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
		assert_eq!(
			log["1700000000000"],
			json!({ "lat": 1.5, "lon": 2.5, "time": "old", "accuracy": 4 })
		);
		assert_eq!(log["not-a-timestamp"], json!({ "note": "kept" }));
		assert_eq!(
			log["1700000000500"],
			json!({ "lat": 3.0, "lon": 4.0, "time": "t1700000000500" })
		);
		assert_eq!(log.as_object().unwrap().len(), 3);
	}

	#[test]
	fn blank_or_missing_log_starts_empty() {
		let dir = tempdir().unwrap();
		let blank = dir.path().join("nodeA.json");
		fs::write(&blank, "  \n").unwrap();

		assert!(latest_record(&blank).unwrap().is_none());
		assert!(latest_record(dir.path().join("nodeB.json")).unwrap().is_none());

		append_record(&blank, &record(5, 0.0, 0.0)).unwrap();
		assert_eq!(latest_record(&blank).unwrap().unwrap().timestamp, 5);
	}

	#[test]
	fn empty_object_has_no_latest() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("nodeA.json");
		fs::write(&path, "{}").unwrap();

		assert!(latest_record(&path).unwrap().is_none());
	}

	#[test]
	fn reads_the_exact_peer_entry() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("nodeA.json");
		fs::write(
			&path,
			r#"{"1700000000000": {"lat":10.0,"lon":20.0,"time":"14 Nov 2023, 10:13:20 PM"}}"#,
		)
		.unwrap();

		assert_eq!(
			latest_record(&path).unwrap(),
			Some(LocationRecord {
				timestamp: 1_700_000_000_000,
				latitude: 10.0,
				longitude: 20.0,
				display_time: "14 Nov 2023, 10:13:20 PM".to_string(),
			})
		);
	}

	#[test]
	fn accepts_display_time_field_name() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("nodeB.json");
		fs::write(&path, r#"{"42": {"lat":1.0,"lon":2.0,"displayTime":"now"}}"#).unwrap();

		assert_eq!(latest_record(&path).unwrap().unwrap().display_time, "now");
	}

	#[test]
	fn malformed_logs_are_reported() {
		let dir = tempdir().unwrap();

		let garbage = dir.path().join("garbage.json");
		fs::write(&garbage, "{not json").unwrap();
		assert!(matches!(
			latest_record(&garbage),
			Err(Error::MalformedLog { .. })
		));

		let array = dir.path().join("array.json");
		fs::write(&array, "[1, 2]").unwrap();
		assert!(matches!(latest_record(&array), Err(Error::NotAnObject(_))));

		let missing_field = dir.path().join("missing.json");
		fs::write(&missing_field, r#"{"10": {"lat": 1.0}}"#).unwrap();
		assert!(matches!(
			latest_record(&missing_field),
			Err(Error::MalformedEntry { key, .. }) if key == "10"
		));
	}

	#[test]
	fn display_time_uses_twelve_hour_clock() {
		let instant = DateTime::parse_from_rfc3339("2023-11-14T22:13:20Z")
			.unwrap()
			.with_timezone(&Utc);
		let record = LocationRecord::at(
			instant,
			Coordinate {
				latitude: 0.0,
				longitude: 0.0,
			},
		);

		assert_eq!(record.timestamp, 1_700_000_000_000);
		assert!(record.display_time.ends_with("AM") || record.display_time.ends_with("PM"));
	}
}
