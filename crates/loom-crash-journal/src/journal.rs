// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The journal: a document kept in memory and mirrored to a snapshot plus a live log.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::command::Command;
use crate::document::{Document, VersionInfo};
use crate::error::{JournalError, Result};
use crate::log::{parse_log, JournalLog};
use crate::snapshot::{read_snapshot, write_snapshot};

/// Path of the header command that starts every log generation.
pub const GENERATION_PATH: &str = "version-info.generation";

#[derive(Debug, Clone)]
pub struct JournalConfig {
	/// Files live at `<base_path>.journal` and `<base_path>.snapshot`.
	pub base_path: PathBuf,
	pub journal_type: String,
	pub version: u64,
	/// Size of the memory-mapped log in bytes.
	pub buffer_size: usize,
	/// Live log size above which housekeeping snapshots.
	pub high_water_mark: usize,
}

impl JournalConfig {
	pub const DEFAULT_BUFFER_SIZE: usize = 262_144;
	pub const DEFAULT_HIGH_WATER_MARK: usize = 196_608;

	pub fn new(base_path: impl Into<PathBuf>, journal_type: impl Into<String>, version: u64) -> Self {
		Self {
			base_path: base_path.into(),
			journal_type: journal_type.into(),
			version,
			buffer_size: Self::DEFAULT_BUFFER_SIZE,
			high_water_mark: Self::DEFAULT_HIGH_WATER_MARK,
		}
	}

	pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
		self.buffer_size = buffer_size;
		self
	}

	pub fn with_high_water_mark(mut self, high_water_mark: usize) -> Self {
		self.high_water_mark = high_water_mark;
		self
	}

	pub fn journal_path(&self) -> PathBuf {
		with_suffix(&self.base_path, ".journal")
	}

	pub fn snapshot_path(&self) -> PathBuf {
		with_suffix(&self.base_path, ".snapshot")
	}

	fn version_info(&self, generation: u64) -> VersionInfo {
		VersionInfo {
			journal_type: self.journal_type.clone(),
			version: self.version,
			generation,
		}
	}
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
	let mut name = base.as_os_str().to_os_string();
	name.push(suffix);
	PathBuf::from(name)
}

fn generation_header(generation: u64) -> Result<Vec<u8>> {
	Command::set(GENERATION_PATH, generation)?.to_wire()
}

struct Inner {
	/// `None` once the journal is degraded.
	log: Option<JournalLog>,
	document: Arc<Document>,
	generation: u64,
}

/// A crash-safe journal of document mutations.
///
/// All writes go through one lock, so commands from concurrent callers never
/// interleave in the log. Readers get an immutable [`Document`] handle.
pub struct Journal {
	config: JournalConfig,
	inner: Mutex<Inner>,
}

impl Journal {
	/// Creates a fresh journal seeded with `seed`, replacing any files at the
	/// configured location. Call [`load_previous_document`] first to recover
	/// what a previous run left behind.
	///
	/// Never fails: if the files can't be created the journal runs degraded.
	pub fn open(config: JournalConfig, seed: Document) -> Self {
		let generation = 1;
		let mut document = seed;
		document.set_version_info(&config.version_info(generation));

		let log = match create_files(&config, &document, generation) {
			Ok(log) => {
				info!(
					path = %config.journal_path().display(),
					capacity = log.capacity(),
					"journal opened"
				);
				Some(log)
			}
			Err(e) => {
				error!(
					path = %config.base_path.display(),
					error = %e,
					"failed to create journal, running degraded"
				);
				None
			}
		};

		Self {
			config,
			inner: Mutex::new(Inner {
				log,
				document: Arc::new(document),
				generation,
			}),
		}
	}

	pub fn config(&self) -> &JournalConfig {
		&self.config
	}

	/// Durably records `command` and applies it to the document.
	///
	/// Returns false if the command was dropped; the reason is logged.
	pub fn append(&self, command: Command) -> bool {
		self.append_batch(std::iter::once(command))
	}

	/// Records several commands under one lock. They land contiguously in the log.
	pub fn append_batch(&self, commands: impl IntoIterator<Item = Command>) -> bool {
		let commands: Vec<Command> = commands.into_iter().collect();
		self.append_with(move |_| commands)
	}

	/// Like [`Journal::append_batch`], with the commands built from the
	/// current document while the journal lock is held. No other writer can
	/// land between the read and the append.
	///
	/// `build` must not call back into the journal.
	pub fn append_with(&self, build: impl FnOnce(&Document) -> Vec<Command>) -> bool {
		let mut inner = self.inner.lock();
		let leaves: Vec<Command> = build(inner.document.as_ref())
			.into_iter()
			.flat_map(|c| c.flatten())
			.filter(|leaf| {
				let addressable = leaf.path().is_addressable();
				if !addressable {
					warn!(path = %leaf.path(), "dropping journal command with an empty key");
				}
				addressable
			})
			.collect();
		if leaves.is_empty() {
			return true;
		}
		if inner.log.is_none() {
			error!(commands = leaves.len(), "journal is degraded, dropping commands");
			return false;
		}

		match self.append_locked(&mut inner, &leaves) {
			Ok(()) => true,
			Err(e) => {
				error!(error = %e, commands = leaves.len(), "failed to append to journal");
				false
			}
		}
	}

	fn append_locked(&self, inner: &mut Inner, leaves: &[Command]) -> Result<()> {
		let records = leaves.iter().map(Command::to_wire).collect::<Result<Vec<_>>>()?;
		let needed: usize = records.iter().map(|r| r.len() + 1).sum();

		let log = inner.log.as_mut().ok_or(JournalError::Degraded)?;
		if log.len() + needed <= log.capacity() {
			log.append_batch(&records)?;
			for leaf in leaves {
				apply(inner, leaf);
			}
			return Ok(());
		}

		for (leaf, record) in leaves.iter().zip(&records) {
			self.write_record(inner, record)?;
			apply(inner, leaf);
		}
		Ok(())
	}

	/// Writes one record, compacting first if the log is full.
	fn write_record(&self, inner: &mut Inner, record: &[u8]) -> Result<()> {
		let log = inner.log.as_ref().ok_or(JournalError::Degraded)?;
		if record.len() + 1 > log.capacity() {
			return Err(JournalError::BufferFull {
				needed: record.len() + 1,
				capacity: log.capacity(),
			});
		}
		if !log.fits(record.len()) {
			debug!("journal log full, compacting");
			if let Err(e) = self.snapshot_locked(inner) {
				error!(error = %e, "journal log full and compaction failed, running degraded");
				inner.log = None;
				return Err(e);
			}
		}
		inner.log.as_mut().ok_or(JournalError::Degraded)?.append(record)
	}

	/// The document as of the last applied command.
	pub fn current_document(&self) -> Arc<Document> {
		Arc::clone(&self.inner.lock().document)
	}

	/// Writes the document to the snapshot file and empties the live log.
	pub fn snapshot(&self) -> bool {
		match self.try_snapshot() {
			Ok(()) => true,
			Err(e) => {
				error!(error = %e, "journal snapshot failed");
				false
			}
		}
	}

	pub fn try_snapshot(&self) -> Result<()> {
		let mut inner = self.inner.lock();
		self.snapshot_locked(&mut inner)
	}

	/// Snapshots if the live log has grown past the high-water mark.
	pub fn snapshot_if_high_water(&self) -> bool {
		match self.try_snapshot_if_high_water() {
			Ok(snapshotted) => snapshotted,
			Err(e) => {
				error!(error = %e, "journal snapshot failed");
				false
			}
		}
	}

	/// Like [`Journal::snapshot_if_high_water`] but surfaces the error.
	/// Returns whether a snapshot was taken.
	pub fn try_snapshot_if_high_water(&self) -> Result<bool> {
		let mut inner = self.inner.lock();
		let Some(log) = inner.log.as_ref() else {
			return Ok(false);
		};
		if log.len() <= self.config.high_water_mark {
			return Ok(false);
		}
		self.snapshot_locked(&mut inner)?;
		Ok(true)
	}

	fn snapshot_locked(&self, inner: &mut Inner) -> Result<()> {
		let Inner {
			log,
			document,
			generation,
		} = inner;
		let Some(active) = log.as_mut() else {
			return Err(JournalError::Degraded);
		};

		let next = *generation + 1;
		let previous = document.version_info();
		Arc::make_mut(document).set_version_info(&self.config.version_info(next));

		if let Err(e) = write_snapshot(&self.config.snapshot_path(), &**document) {
			if let Some(previous) = previous {
				Arc::make_mut(document).set_version_info(&previous);
			}
			return Err(e);
		}

		// The new snapshot already covers everything in the log, so a crash
		// from here on replays at most a stale generation, which is skipped.
		let reset = active
			.reset()
			.and_then(|()| generation_header(next))
			.and_then(|header| active.append(&header));
		if let Err(e) = reset {
			error!(error = %e, "failed to reset journal log, running degraded");
			*log = None;
			*generation = next;
			return Err(e);
		}

		*generation = next;
		debug!(generation = next, "journal compacted");
		Ok(())
	}

	pub fn is_degraded(&self) -> bool {
		self.inner.lock().log.is_none()
	}

	/// Bytes used in the live log.
	pub fn log_len(&self) -> usize {
		self.inner.lock().log.as_ref().map_or(0, JournalLog::len)
	}

	pub fn generation(&self) -> u64 {
		self.inner.lock().generation
	}

	/// Stops journaling and removes the files, e.g. on clean shutdown.
	pub fn discard(&self) {
		let mut inner = self.inner.lock();
		inner.log = None;
		if let Err(e) = remove_journal_files(&self.config) {
			warn!(error = %e, "failed to remove journal files");
		}
	}
}

fn apply(inner: &mut Inner, command: &Command) {
	if let Err(e) = Arc::make_mut(&mut inner.document).apply(command) {
		warn!(path = %command.path(), error = %e, "journal command not applied");
	}
}

fn create_files(config: &JournalConfig, document: &Document, generation: u64) -> Result<JournalLog> {
	if let Some(parent) = config.base_path.parent() {
		fs::create_dir_all(parent)?;
	}
	write_snapshot(&config.snapshot_path(), document)?;
	let mut log = JournalLog::create(&config.journal_path(), config.buffer_size)?;
	log.append(&generation_header(generation)?)?;
	Ok(log)
}

/// Reconstructs the document a previous run left on disk.
///
/// Returns `Ok(None)` if there is no previous journal. An incompatible
/// snapshot is reported as an error and should be treated as absent.
pub fn load_previous_document(config: &JournalConfig) -> Result<Option<Document>> {
	let Some(mut document) = read_snapshot(&config.snapshot_path(), &config.journal_type, config.version)? else {
		return Ok(None);
	};
	let snapshot_generation = document.version_info().map_or(0, |v| v.generation);

	let bytes = match fs::read(config.journal_path()) {
		Ok(bytes) => bytes,
		Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
		Err(e) => return Err(e.into()),
	};
	let commands = parse_log(&bytes);

	let log_generation = commands
		.first()
		.filter(|c| c.path().to_string() == GENERATION_PATH)
		.and_then(|c| c.value().as_u64());

	match log_generation {
		Some(g) if g >= snapshot_generation => {
			let skipped = document.apply_all(&commands);
			debug!(
				commands = commands.len(),
				skipped,
				generation = g,
				"replayed previous journal log"
			);
		}
		Some(g) => {
			debug!(
				log_generation = g,
				snapshot_generation, "previous journal log already compacted"
			);
		}
		None if commands.is_empty() => {}
		None => {
			warn!(
				commands = commands.len(),
				"previous journal log has no generation header, ignoring it"
			);
		}
	}

	Ok(Some(document))
}

/// Deletes the snapshot and log. Missing files are not an error.
pub fn remove_journal_files(config: &JournalConfig) -> Result<()> {
	for path in [config.journal_path(), config.snapshot_path()] {
		match fs::remove_file(&path) {
			Ok(()) => {}
			Err(e) if e.kind() == io::ErrorKind::NotFound => {}
			Err(e) => return Err(e.into()),
		}
	}
	Ok(())
}
