// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Queue entry file names.
//!
//! ```text
//! <13-digit epoch ms>_<api key>_<error type codes>_<uuid>_<suffix>.json
//! 1736942400000_0123456789abcdef0123456789abcdef_c,rust_5f0c..._startupcrash.json
//! ```
//!
//! The zero-padded timestamp comes first so that lexicographic order is write
//! order. Everything a delivery decision needs is in the name, so the
//! orchestrator never has to open a file to decide it is stale.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use loom_crash_core::ErrorType;
use uuid::Uuid;

use crate::error::{CrashSdkError, Result};

pub const ENTRY_EXTENSION: &str = ".json";

/// Tag at the end of an entry name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntrySuffix {
	None,
	/// Unhandled crash while the app was still launching.
	StartupCrash,
	/// Recovered from the crash journal rather than written by the panic hook.
	/// Encoded as `not-jvm`.
	Native,
}

impl EntrySuffix {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::None => "",
			Self::StartupCrash => "startupcrash",
			Self::Native => "not-jvm",
		}
	}

	fn parse(s: &str) -> Option<Self> {
		match s {
			"" => Some(Self::None),
			"startupcrash" => Some(Self::StartupCrash),
			// Written by earlier builds.
			"not-jvm" | "native" => Some(Self::Native),
			_ => None,
		}
	}
}

/// Wall-clock milliseconds that never repeat or go backwards within a process.
#[derive(Debug, Default)]
pub struct MonotonicClock {
	last: AtomicU64,
}

impl MonotonicClock {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn now_ms(&self) -> u64 {
		let wall = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
		self.next_after(wall)
	}

	fn next_after(&self, wall: u64) -> u64 {
		let mut last = self.last.load(Ordering::Relaxed);
		loop {
			let next = wall.max(last + 1);
			match self
				.last
				.compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Relaxed)
			{
				Ok(_) => return next,
				Err(actual) => last = actual,
			}
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryFilename {
	pub timestamp_ms: u64,
	pub api_key: String,
	pub error_types: BTreeSet<ErrorType>,
	pub uuid: Uuid,
	pub suffix: EntrySuffix,
}

impl EntryFilename {
	pub fn new(
		clock: &MonotonicClock,
		api_key: impl Into<String>,
		error_types: BTreeSet<ErrorType>,
		suffix: EntrySuffix,
	) -> Self {
		Self {
			timestamp_ms: clock.now_ms(),
			api_key: api_key.into(),
			error_types,
			uuid: Uuid::new_v4(),
			suffix,
		}
	}

	pub fn encode(&self) -> String {
		let codes: Vec<&str> = self.error_types.iter().map(ErrorType::code).collect();
		format!(
			"{:013}_{}_{}_{}_{}{ENTRY_EXTENSION}",
			self.timestamp_ms,
			self.api_key,
			codes.join(","),
			self.uuid,
			self.suffix.as_str()
		)
	}

	pub fn decode(name: &str) -> Result<Self> {
		let invalid = || CrashSdkError::InvalidFilename(name.to_string());

		let stem = name.strip_suffix(ENTRY_EXTENSION).ok_or_else(invalid)?;
		let parts: Vec<&str> = stem.split('_').collect();
		let [timestamp, api_key, codes, uuid, suffix] = parts.as_slice() else {
			return Err(invalid());
		};

		if timestamp.len() < 13 || !timestamp.bytes().all(|b| b.is_ascii_digit()) {
			return Err(invalid());
		}
		let timestamp_ms = timestamp.parse().map_err(|_| invalid())?;
		if api_key.is_empty() {
			return Err(invalid());
		}
		let error_types = if codes.is_empty() {
			BTreeSet::new()
		} else {
			codes
				.split(',')
				.map(|code| code.parse::<ErrorType>().map_err(|_| invalid()))
				.collect::<Result<_>>()?
		};

		Ok(Self {
			timestamp_ms,
			api_key: api_key.to_string(),
			error_types,
			uuid: Uuid::parse_str(uuid).map_err(|_| invalid())?,
			suffix: EntrySuffix::parse(suffix).ok_or_else(invalid)?,
		})
	}

	pub fn timestamp(&self) -> DateTime<Utc> {
		i64::try_from(self.timestamp_ms)
			.ok()
			.and_then(|ms| Utc.timestamp_millis_opt(ms).single())
			.unwrap_or(DateTime::<Utc>::MIN_UTC)
	}

	/// How long before `now` the entry was written; zero if it is in the future.
	pub fn age(&self, now: DateTime<Utc>) -> Duration {
		(now - self.timestamp()).to_std().unwrap_or(Duration::ZERO)
	}

	pub fn is_startup_crash(&self) -> bool {
		self.suffix == EntrySuffix::StartupCrash
	}
}

impl fmt::Display for EntryFilename {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.encode())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	const KEY: &str = "0123456789abcdef0123456789abcdef";

	fn filename(timestamp_ms: u64, suffix: EntrySuffix) -> EntryFilename {
		EntryFilename {
			timestamp_ms,
			api_key: KEY.to_string(),
			error_types: BTreeSet::from([ErrorType::Rust, ErrorType::C]),
			uuid: Uuid::new_v4(),
			suffix,
		}
	}

	#[test]
	fn encodes_the_documented_layout() {
		let name = EntryFilename {
			timestamp_ms: 1_736_942_400_000,
			api_key: KEY.to_string(),
			error_types: BTreeSet::from([ErrorType::Rust, ErrorType::C]),
			uuid: Uuid::nil(),
			suffix: EntrySuffix::StartupCrash,
		}
		.encode();
		assert_eq!(
			name,
			format!("1736942400000_{KEY}_c,rust_00000000-0000-0000-0000-000000000000_startupcrash.json")
		);
	}

	#[test]
	fn recovered_crashes_are_tagged_not_jvm() {
		let name = format!("1736942400000_{KEY}_c_00000000-0000-0000-0000-000000000000_not-jvm.json");
		let decoded = EntryFilename::decode(&name).unwrap();
		assert_eq!(decoded.suffix, EntrySuffix::Native);
		assert_eq!(decoded.error_types, BTreeSet::from([ErrorType::C]));
		assert_eq!(decoded.encode(), name);

		let legacy = name.replace("_not-jvm.json", "_native.json");
		assert_eq!(EntryFilename::decode(&legacy).unwrap().suffix, EntrySuffix::Native);
	}

	#[test]
	fn small_timestamps_are_zero_padded() {
		let name = filename(42, EntrySuffix::None).encode();
		assert!(name.starts_with("0000000000042_"));
		assert!(name.ends_with("_.json"));
	}

	#[test]
	fn decode_reads_back_every_field() {
		for suffix in [EntrySuffix::None, EntrySuffix::StartupCrash, EntrySuffix::Native] {
			let original = filename(1_700_000_000_123, suffix);
			assert_eq!(EntryFilename::decode(&original.encode()).unwrap(), original);
		}
	}

	#[test]
	fn sessions_have_no_error_codes() {
		let mut session = filename(1, EntrySuffix::None);
		session.error_types.clear();
		let decoded = EntryFilename::decode(&session.encode()).unwrap();
		assert!(decoded.error_types.is_empty());
	}

	#[test]
	fn rejects_foreign_names() {
		let names = [
			"notes.txt".to_string(),
			"1700000000000_key_rust_uuid_.json".to_string(),
			"17_key_rust_00000000-0000-0000-0000-000000000000_.json".to_string(),
			format!("1700000000000_{KEY}_jvm_00000000-0000-0000-0000-000000000000_.json"),
			format!("1700000000000_{KEY}_rust_00000000-0000-0000-0000-000000000000_weird.json"),
		];
		for name in &names {
			assert!(EntryFilename::decode(name).is_err(), "{name} should not decode");
		}
	}

	#[test]
	fn clock_never_repeats() {
		let clock = MonotonicClock::new();
		assert_eq!(clock.next_after(100), 100);
		assert_eq!(clock.next_after(100), 101);
		assert_eq!(clock.next_after(50), 102);
		assert_eq!(clock.next_after(500), 500);
	}

	#[test]
	fn age_is_measured_from_the_name() {
		let name = filename(1_700_000_000_000, EntrySuffix::None);
		let now = name.timestamp() + chrono::Duration::days(2);
		assert_eq!(name.age(now), Duration::from_secs(2 * 86_400));
		assert_eq!(name.age(name.timestamp() - chrono::Duration::days(1)), Duration::ZERO);
	}

	proptest! {
		#[test]
		fn name_order_is_timestamp_order(a in 0u64..4_000_000_000_000, b in 0u64..4_000_000_000_000) {
			let left = filename(a, EntrySuffix::None).encode();
			let right = filename(b, EntrySuffix::StartupCrash).encode();
			if a < b {
				prop_assert!(left < right);
			} else if a > b {
				prop_assert!(left > right);
			}
		}

		#[test]
		fn clock_is_strictly_increasing(walls in prop::collection::vec(0u64..1_000, 1..50)) {
			let clock = MonotonicClock::new();
			let mut previous = 0;
			for wall in walls {
				let now = clock.next_after(wall);
				prop_assert!(now > previous);
				previous = now;
			}
		}
	}
}
