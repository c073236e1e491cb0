// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Persistent per-installation device identifier.
//!
//! Several processes of one app may start at once, so the id file is only
//! read or created while holding an exclusive lock on a sibling `.lock` file.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{CrashSdkError, Result};

pub const DEVICE_ID_FILE: &str = "device-id.json";
const LOCK_ATTEMPTS: u32 = 20;
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(25);

#[derive(Debug, Serialize, Deserialize)]
struct DeviceIdFile {
	id: String,
}

pub struct DeviceIdStore {
	path: PathBuf,
	lock_path: PathBuf,
	attempts: u32,
	retry_delay: Duration,
}

impl DeviceIdStore {
	pub fn new(dir: &Path) -> Self {
		Self {
			path: dir.join(DEVICE_ID_FILE),
			lock_path: dir.join(format!("{DEVICE_ID_FILE}.lock")),
			attempts: LOCK_ATTEMPTS,
			retry_delay: LOCK_RETRY_DELAY,
		}
	}

	pub fn with_retry(mut self, attempts: u32, retry_delay: Duration) -> Self {
		self.attempts = attempts.max(1);
		self.retry_delay = retry_delay;
		self
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// The stored id, creating one on first use. `None` if the lock could not
	/// be taken in time or the file is unusable.
	pub fn load_or_create(&self) -> Option<String> {
		for attempt in 1..=self.attempts {
			match self.try_load_or_create() {
				Ok(id) => return Some(id),
				Err(CrashSdkError::LockUnavailable(_)) if attempt < self.attempts => {
					std::thread::sleep(self.retry_delay);
				}
				Err(e) => {
					warn!(path = %self.path.display(), attempt, error = %e, "device id unavailable");
					return None;
				}
			}
		}
		None
	}

	fn try_load_or_create(&self) -> Result<String> {
		if let Some(parent) = self.path.parent() {
			fs::create_dir_all(parent)?;
		}
		let lock = OpenOptions::new()
			.create(true)
			.truncate(false)
			.write(true)
			.open(&self.lock_path)?;
		if let Err(e) = lock.try_lock_exclusive() {
			if e.kind() == fs2::lock_contended_error().kind() {
				return Err(CrashSdkError::LockUnavailable(self.lock_path.clone()));
			}
			return Err(e.into());
		}

		let result = self.read_or_write();
		if let Err(e) = FileExt::unlock(&lock) {
			debug!(error = %e, "failed to release device id lock");
		}
		result
	}

	fn read_or_write(&self) -> Result<String> {
		match fs::read(&self.path) {
			Ok(bytes) => match serde_json::from_slice::<DeviceIdFile>(&bytes) {
				Ok(file) if Uuid::parse_str(&file.id).is_ok() => return Ok(file.id),
				_ => warn!(path = %self.path.display(), "replacing malformed device id file"),
			},
			Err(e) if e.kind() == io::ErrorKind::NotFound => {}
			Err(e) => return Err(e.into()),
		}

		let id = Uuid::new_v4().to_string();
		let tmp_path = self.path.with_extension("json.tmp");
		fs::write(&tmp_path, serde_json::to_vec(&DeviceIdFile { id: id.clone() })?)?;
		File::open(&tmp_path)?.sync_all()?;
		fs::rename(&tmp_path, &self.path)?;
		debug!(path = %self.path.display(), "generated device id");
		Ok(id)
	}
}
