// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Whole-document snapshots written next to the log.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::document::Document;
use crate::error::{JournalError, Result};

fn tmp_path(path: &Path) -> PathBuf {
	let mut name = path.as_os_str().to_os_string();
	name.push(".tmp");
	PathBuf::from(name)
}

/// Writes `document` to `path` atomically: a reader sees either the old or the new snapshot.
pub fn write_snapshot(path: &Path, document: &Document) -> Result<()> {
	let bytes = document.to_json_bytes()?;
	let tmp = tmp_path(path);

	let mut file = File::create(&tmp)?;
	file.write_all(&bytes)?;
	file.sync_all()?;
	drop(file);

	fs::rename(&tmp, path)?;
	debug!(path = %path.display(), bytes = bytes.len(), "journal snapshot written");
	Ok(())
}

/// Reads the snapshot at `path`, checking it was written by a compatible journal.
///
/// Returns `Ok(None)` if there is no snapshot.
pub fn read_snapshot(path: &Path, journal_type: &str, version: u64) -> Result<Option<Document>> {
	let bytes = match fs::read(path) {
		Ok(bytes) => bytes,
		Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
		Err(e) => return Err(e.into()),
	};

	let document = Document::from_value(serde_json::from_slice(&bytes)?)?;
	let expected = format!("{journal_type} v{version}");
	match document.version_info() {
		Some(info) if info.journal_type == journal_type && info.version == version => Ok(Some(document)),
		Some(info) => Err(JournalError::Incompatible {
			expected,
			found: format!("{} v{}", info.journal_type, info.version),
		}),
		None => Err(JournalError::Incompatible {
			expected,
			found: "no version info".to_string(),
		}),
	}
}
