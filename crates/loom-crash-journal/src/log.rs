// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Fixed-size, memory-mapped command log.
//!
//! Records are serialized commands, each followed by a NUL byte. The unused
//! tail of the file is zero-filled, so the first empty segment marks the end
//! of the log. Once [`JournalLog::append`] returns, the record has been
//! flushed to the file and survives the process dying.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::MmapMut;
use tracing::{trace, warn};

use crate::command::Command;
use crate::error::{JournalError, Result};

const TERMINATOR: u8 = 0;

pub struct JournalLog {
	path: PathBuf,
	_file: File,
	map: MmapMut,
	cursor: usize,
}

impl JournalLog {
	/// Creates (or truncates) the log file at `path` with a zeroed buffer of `capacity` bytes.
	pub fn create(path: &Path, capacity: usize) -> Result<Self> {
		let file = OpenOptions::new()
			.read(true)
			.write(true)
			.create(true)
			.truncate(true)
			.open(path)?;
		file.set_len(capacity as u64)?;

		// SAFETY: the file is private to this journal and only ever resized
		// here, before the mapping exists. Other processes do not write to it.
		let map = unsafe { MmapMut::map_mut(&file)? };

		Ok(Self {
			path: path.to_path_buf(),
			_file: file,
			map,
			cursor: 0,
		})
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub fn capacity(&self) -> usize {
		self.map.len()
	}

	/// Bytes used by records written since the last reset.
	pub fn len(&self) -> usize {
		self.cursor
	}

	pub fn is_empty(&self) -> bool {
		self.cursor == 0
	}

	/// Whether a record of `record_len` bytes plus its terminator still fits.
	pub fn fits(&self, record_len: usize) -> bool {
		self.cursor + record_len + 1 <= self.capacity()
	}

	/// Writes one record and flushes it. The cursor only moves once the flush succeeded.
	pub fn append(&mut self, record: &[u8]) -> Result<()> {
		if record.contains(&TERMINATOR) {
			return Err(JournalError::MalformedCommand("record contains a NUL byte".to_string()));
		}
		if !self.fits(record.len()) {
			return Err(JournalError::BufferFull {
				needed: record.len() + 1,
				capacity: self.capacity(),
			});
		}

		let start = self.cursor;
		let end = start + record.len();
		self.map[start..end].copy_from_slice(record);
		self.map[end] = TERMINATOR;

		if let Err(e) = self.map.flush_range(start, record.len() + 1) {
			self.map[start..=end].fill(0);
			return Err(e.into());
		}

		self.cursor = end + 1;
		trace!(bytes = record.len(), cursor = self.cursor, "journal record appended");
		Ok(())
	}

	/// Writes several records back to back with a single flush.
	///
	/// Each record keeps its own terminator, so a crash part-way through still
	/// leaves every fully written record replayable.
	pub fn append_batch(&mut self, records: &[Vec<u8>]) -> Result<()> {
		let needed: usize = records.iter().map(|r| r.len() + 1).sum();
		if records.iter().any(|r| r.contains(&TERMINATOR)) {
			return Err(JournalError::MalformedCommand("record contains a NUL byte".to_string()));
		}
		if self.cursor + needed > self.capacity() {
			return Err(JournalError::BufferFull {
				needed,
				capacity: self.capacity(),
			});
		}

		let start = self.cursor;
		let mut offset = start;
		for record in records {
			self.map[offset..offset + record.len()].copy_from_slice(record);
			offset += record.len();
			self.map[offset] = TERMINATOR;
			offset += 1;
		}

		if needed > 0 {
			if let Err(e) = self.map.flush_range(start, needed) {
				self.map[start..offset].fill(0);
				return Err(e.into());
			}
		}

		self.cursor = offset;
		trace!(records = records.len(), cursor = self.cursor, "journal batch appended");
		Ok(())
	}

	/// Zeroes every written byte and rewinds to the start.
	pub fn reset(&mut self) -> Result<()> {
		let used = self.cursor;
		if used > 0 {
			self.map[..used].fill(0);
			self.map.flush_range(0, used)?;
		}
		self.cursor = 0;
		Ok(())
	}
}

/// Parses raw log bytes back into commands.
///
/// Stops at the first empty segment, drops a trailing record with no
/// terminator, and skips terminated records that do not parse.
pub fn parse_log(bytes: &[u8]) -> Vec<Command> {
	let mut commands = Vec::new();
	let mut rest = bytes;

	while let Some(end) = rest.iter().position(|b| *b == TERMINATOR) {
		let record = &rest[..end];
		if record.is_empty() {
			return commands;
		}
		match Command::from_wire(record) {
			Ok(command) => commands.push(command),
			Err(e) => warn!(error = %e, bytes = record.len(), "skipping unreadable journal record"),
		}
		rest = &rest[end + 1..];
	}

	if !rest.is_empty() {
		warn!(bytes = rest.len(), "dropping unterminated journal record");
	}
	commands
}
