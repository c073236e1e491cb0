// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! How the previous run ended.
//!
//! Stored as `key=value` lines:
//!
//! ```text
//! consecutiveLaunchCrashes=2
//! crashed=true
//! crashedDuringLaunch=true
//! ```

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

pub const LAST_RUN_INFO_FILE: &str = "last-run-info";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LastRunInfo {
	pub consecutive_launch_crashes: u32,
	pub crashed: bool,
	pub crashed_during_launch: bool,
}

impl LastRunInfo {
	/// The record to store when this run crashes.
	pub fn after_crash(previous: Option<LastRunInfo>, during_launch: bool) -> Self {
		let consecutive_launch_crashes = if during_launch {
			previous.map_or(0, |p| p.consecutive_launch_crashes).saturating_add(1)
		} else {
			0
		};
		Self {
			consecutive_launch_crashes,
			crashed: true,
			crashed_during_launch: during_launch,
		}
	}

	fn encode(&self) -> String {
		format!(
			"consecutiveLaunchCrashes={}\ncrashed={}\ncrashedDuringLaunch={}\n",
			self.consecutive_launch_crashes, self.crashed, self.crashed_during_launch
		)
	}

	fn decode(content: &str) -> Option<Self> {
		let mut info = Self::default();
		let mut seen = 0;
		for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
			let (key, value) = line.split_once('=')?;
			match key.trim() {
				"consecutiveLaunchCrashes" => info.consecutive_launch_crashes = value.trim().parse().ok()?,
				"crashed" => info.crashed = value.trim().parse().ok()?,
				"crashedDuringLaunch" => info.crashed_during_launch = value.trim().parse().ok()?,
				_ => continue,
			}
			seen += 1;
		}
		(seen > 0).then_some(info)
	}
}

pub struct LastRunInfoStore {
	path: PathBuf,
}

impl LastRunInfoStore {
	pub fn new(dir: &Path) -> Self {
		Self {
			path: dir.join(LAST_RUN_INFO_FILE),
		}
	}

	pub fn load(&self) -> Option<LastRunInfo> {
		let content = match fs::read_to_string(&self.path) {
			Ok(content) => content,
			Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
			Err(e) => {
				warn!(path = %self.path.display(), error = %e, "failed to read last run info");
				return None;
			}
		};
		let info = LastRunInfo::decode(&content);
		if info.is_none() {
			warn!(path = %self.path.display(), "ignoring malformed last run info");
		}
		info
	}

	pub fn persist(&self, info: &LastRunInfo) -> io::Result<()> {
		if let Some(parent) = self.path.parent() {
			fs::create_dir_all(parent)?;
		}
		let tmp_path = self.path.with_extension("tmp");
		{
			let mut file = File::create(&tmp_path)?;
			file.write_all(info.encode().as_bytes())?;
			file.sync_all()?;
		}
		fs::rename(&tmp_path, &self.path)?;
		debug!(?info, "stored last run info");
		Ok(())
	}
}
