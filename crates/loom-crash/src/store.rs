// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Bounded on-disk delivery queue.
//!
//! One JSON file per payload, named by [`EntryFilename`]. Writes go to
//! `<name>.tmp` and are renamed into place, so a listing never sees a partial
//! file. The oldest entries are evicted before a write would exceed the bound.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::filename::{EntryFilename, ENTRY_EXTENSION};

const TMP_EXTENSION: &str = ".tmp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
	Events,
	Sessions,
}

impl QueueKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Events => "events",
			Self::Sessions => "sessions",
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
	/// Older than the retention period.
	Stale,
	/// Larger than the payload ceiling.
	Oversized,
	/// Rejected by a send filter.
	Filtered,
	/// Unreadable name or payload.
	Corrupt,
	/// Pushed out by newer entries.
	Evicted,
}

/// What observers learn about a dropped entry. Never the payload itself.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscardedEntry {
	pub kind: QueueKind,
	pub file_name: String,
	pub api_key: Option<String>,
	pub timestamp: Option<DateTime<Utc>>,
	pub reason: DiscardReason,
}

pub trait QueueObserver: Send + Sync {
	fn on_discard(&self, _entry: &DiscardedEntry) {}

	/// A flush left the queue with nothing in it.
	fn on_queue_empty(&self, _kind: QueueKind) {}
}

pub struct NoopObserver;

impl QueueObserver for NoopObserver {}

/// A file currently in the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreEntry {
	pub path: PathBuf,
	pub name: String,
	/// `None` when the name does not decode.
	pub filename: Option<EntryFilename>,
}

impl StoreEntry {
	fn from_name(dir: &Path, name: String) -> Self {
		Self {
			path: dir.join(&name),
			filename: EntryFilename::decode(&name).ok(),
			name,
		}
	}

	pub fn discarded(&self, kind: QueueKind, reason: DiscardReason) -> DiscardedEntry {
		DiscardedEntry {
			kind,
			file_name: self.name.clone(),
			api_key: self.filename.as_ref().map(|f| f.api_key.clone()),
			timestamp: self.filename.as_ref().map(EntryFilename::timestamp),
			reason,
		}
	}
}

/// Marks an entry as being delivered. Released on drop.
pub struct Claim {
	name: String,
	in_flight: Arc<Mutex<HashSet<String>>>,
}

impl Drop for Claim {
	fn drop(&mut self) {
		self.in_flight.lock().remove(&self.name);
	}
}

pub struct BoundedFileStore {
	dir: PathBuf,
	max_entries: usize,
	kind: QueueKind,
	lock: RwLock<()>,
	in_flight: Arc<Mutex<HashSet<String>>>,
	observer: Arc<dyn QueueObserver>,
}

impl BoundedFileStore {
	pub fn new(
		dir: impl Into<PathBuf>,
		max_entries: usize,
		kind: QueueKind,
		observer: Arc<dyn QueueObserver>,
	) -> Self {
		let dir = dir.into();
		if let Err(e) = fs::create_dir_all(&dir) {
			warn!(dir = %dir.display(), error = %e, "failed to create queue directory");
		}
		remove_stale_temp_files(&dir, kind);
		Self {
			dir,
			max_entries,
			kind,
			lock: RwLock::new(()),
			in_flight: Arc::new(Mutex::new(HashSet::new())),
			observer,
		}
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}

	pub fn kind(&self) -> QueueKind {
		self.kind
	}

	pub fn max_entries(&self) -> usize {
		self.max_entries
	}

	pub fn observer(&self) -> &Arc<dyn QueueObserver> {
		&self.observer
	}

	/// Writes `bytes` as a new entry, evicting the oldest entries first.
	///
	/// Failures are logged and reported as `None`; callers are never blocked
	/// on queue trouble.
	pub fn write(&self, filename: &EntryFilename, bytes: &[u8]) -> Option<PathBuf> {
		match self.try_write(filename, bytes) {
			Ok(path) => path,
			Err(e) => {
				warn!(kind = self.kind.as_str(), file = %filename, error = %e, "failed to write queue entry");
				None
			}
		}
	}

	fn try_write(&self, filename: &EntryFilename, bytes: &[u8]) -> io::Result<Option<PathBuf>> {
		let _guard = self.lock.write();
		fs::create_dir_all(&self.dir)?;

		let entries = self.scan()?;
		let keep = self.max_entries.saturating_sub(1);
		if entries.len() > keep {
			self.evict_oldest(&entries, entries.len() - keep);
		}

		if self.max_entries == 0 {
			debug!(kind = self.kind.as_str(), "queue bound is zero, not writing");
			return Ok(None);
		}

		let name = filename.encode();
		let path = self.dir.join(&name);
		let tmp_path = self.dir.join(format!("{name}{TMP_EXTENSION}"));
		{
			let mut file = File::create(&tmp_path)?;
			file.write_all(bytes)?;
			file.sync_all()?;
		}
		if let Err(e) = fs::rename(&tmp_path, &path) {
			let _ = fs::remove_file(&tmp_path);
			return Err(e);
		}

		debug!(kind = self.kind.as_str(), file = %name, bytes = bytes.len(), "queued entry");
		Ok(Some(path))
	}

	/// Evicts up to `excess` of the oldest entries, skipping those a delivery
	/// has claimed. Claims are held off until the victims are gone.
	fn evict_oldest(&self, entries: &[StoreEntry], excess: usize) {
		let mut evicted = Vec::with_capacity(excess);
		{
			let in_flight = self.in_flight.lock();
			let mut victims = entries.iter().filter(|e| !in_flight.contains(&e.name));
			let mut removed = 0;
			while removed < excess {
				let Some(victim) = victims.next() else {
					debug!(
						kind = self.kind.as_str(),
						over = excess - removed,
						"claimed entries keep the queue over its bound"
					);
					break;
				};
				match fs::remove_file(&victim.path) {
					Ok(()) => {
						evicted.push(victim);
						removed += 1;
					}
					Err(e) if e.kind() == io::ErrorKind::NotFound => removed += 1,
					Err(e) => warn!(file = %victim.name, error = %e, "failed to evict queue entry"),
				}
			}
		}

		for entry in evicted {
			info!(kind = self.kind.as_str(), file = %entry.name, "evicted oldest queue entry");
			self.observer
				.on_discard(&entry.discarded(self.kind, DiscardReason::Evicted));
		}
	}

	pub fn is_empty(&self) -> bool {
		self.list_entries().is_empty()
	}

	/// Completed entries, oldest first.
	pub fn list_entries(&self) -> Vec<StoreEntry> {
		let _guard = self.lock.read();
		self.scan().unwrap_or_else(|e| {
			warn!(kind = self.kind.as_str(), error = %e, "failed to list queue");
			Vec::new()
		})
	}

	fn scan(&self) -> io::Result<Vec<StoreEntry>> {
		let read_dir = match fs::read_dir(&self.dir) {
			Ok(read_dir) => read_dir,
			Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(e) => return Err(e),
		};

		let mut names = Vec::new();
		for entry in read_dir {
			let entry = entry?;
			if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
				continue;
			}
			let Ok(name) = entry.file_name().into_string() else {
				continue;
			};
			if name.ends_with(ENTRY_EXTENSION) {
				names.push(name);
			}
		}
		names.sort();
		Ok(names
			.into_iter()
			.map(|name| StoreEntry::from_name(&self.dir, name))
			.collect())
	}

	/// Calls `action` on every entry, oldest first.
	pub fn process_enqueued_files(&self, mut action: impl FnMut(&StoreEntry)) {
		for entry in self.list_entries() {
			action(&entry);
		}
	}

	/// Runs `action` on the newest entry matching `predicate`, if any.
	pub fn process_last_file<R>(
		&self,
		predicate: impl Fn(&StoreEntry) -> bool,
		action: impl FnOnce(&StoreEntry) -> R,
	) -> Option<R> {
		self.list_entries().iter().rev().find(|e| predicate(e)).map(action)
	}

	pub fn read(&self, entry: &StoreEntry) -> io::Result<Vec<u8>> {
		let _guard = self.lock.read();
		fs::read(&entry.path)
	}

	/// Removes an entry. Deleting an entry that is already gone succeeds.
	pub fn delete(&self, entry: &StoreEntry) -> bool {
		let _guard = self.lock.write();
		match fs::remove_file(&entry.path) {
			Ok(()) => {
				debug!(kind = self.kind.as_str(), file = %entry.name, "deleted queue entry");
				true
			}
			Err(e) if e.kind() == io::ErrorKind::NotFound => true,
			Err(e) => {
				warn!(kind = self.kind.as_str(), file = %entry.name, error = %e, "failed to delete queue entry");
				false
			}
		}
	}

	/// Marks `entry` as in flight. `None` if another delivery already holds it.
	pub fn claim(&self, entry: &StoreEntry) -> Option<Claim> {
		let mut in_flight = self.in_flight.lock();
		if !in_flight.insert(entry.name.clone()) {
			return None;
		}
		Some(Claim {
			name: entry.name.clone(),
			in_flight: Arc::clone(&self.in_flight),
		})
	}
}

/// Removes `*.tmp` files a previous run left behind mid-write.
fn remove_stale_temp_files(dir: &Path, kind: QueueKind) {
	let Ok(read_dir) = fs::read_dir(dir) else {
		return;
	};
	for entry in read_dir.flatten() {
		let path = entry.path();
		if !path.to_str().is_some_and(|p| p.ends_with(TMP_EXTENSION)) {
			continue;
		}
		match fs::remove_file(&path) {
			Ok(()) => debug!(kind = kind.as_str(), file = %path.display(), "removed stale temp file"),
			Err(e) if e.kind() == io::ErrorKind::NotFound => {}
			Err(e) => warn!(file = %path.display(), error = %e, "failed to remove stale temp file"),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::filename::{EntrySuffix, MonotonicClock};
	use loom_crash_core::ErrorType;
	use std::collections::BTreeSet;
	use tempfile::TempDir;

	const KEY: &str = "0123456789abcdef0123456789abcdef";

	#[derive(Default)]
	struct Recorder(Mutex<Vec<DiscardedEntry>>);

	impl QueueObserver for Recorder {
		fn on_discard(&self, entry: &DiscardedEntry) {
			self.0.lock().push(entry.clone());
		}
	}

	fn store(dir: &TempDir, max: usize) -> (BoundedFileStore, Arc<Recorder>) {
		let recorder = Arc::new(Recorder::default());
		let store = BoundedFileStore::new(dir.path().join("events"), max, QueueKind::Events, recorder.clone());
		(store, recorder)
	}

	fn name(clock: &MonotonicClock) -> EntryFilename {
		EntryFilename::new(clock, KEY, BTreeSet::from([ErrorType::Rust]), EntrySuffix::None)
	}

	#[test]
	fn keeps_only_the_newest_entries() {
		let dir = TempDir::new().unwrap();
		let (store, recorder) = store(&dir, 5);
		let clock = MonotonicClock::new();

		let written: Vec<String> = (0..7)
			.map(|i| {
				let filename = name(&clock);
				store.write(&filename, format!("{{\"n\":{i}}}").as_bytes()).unwrap();
				filename.encode()
			})
			.collect();

		let remaining: Vec<String> = store.list_entries().into_iter().map(|e| e.name).collect();
		assert_eq!(remaining, written[2..]);

		let evicted = recorder.0.lock();
		assert_eq!(evicted.len(), 2);
		assert!(evicted.iter().all(|e| e.reason == DiscardReason::Evicted));
		assert_eq!(evicted[0].file_name, written[0]);
	}

	#[test]
	fn zero_bound_never_keeps_files() {
		let dir = TempDir::new().unwrap();
		let (store, _) = store(&dir, 0);
		let clock = MonotonicClock::new();
		for _ in 0..3 {
			assert!(store.write(&name(&clock), b"{}").is_none());
		}
		assert!(store.is_empty());
	}

	#[test]
	fn temp_and_foreign_files_are_not_entries() {
		let dir = TempDir::new().unwrap();
		let (store, _) = store(&dir, 5);
		fs::write(store.dir().join("partial.json.tmp"), b"{").unwrap();
		fs::write(store.dir().join("README"), b"hi").unwrap();
		assert!(store.is_empty());

		fs::write(store.dir().join("garbage.json"), b"{}").unwrap();
		let entries = store.list_entries();
		assert_eq!(entries.len(), 1);
		assert!(entries[0].filename.is_none());
	}

	#[test]
	fn write_leaves_no_temp_file_behind() {
		let dir = TempDir::new().unwrap();
		let (store, _) = store(&dir, 5);
		let path = store.write(&name(&MonotonicClock::new()), b"{\"a\":1}").unwrap();
		assert_eq!(fs::read(&path).unwrap(), b"{\"a\":1}");
		let all: Vec<_> = fs::read_dir(store.dir()).unwrap().collect();
		assert_eq!(all.len(), 1);
	}

	#[test]
	fn delete_is_idempotent() {
		let dir = TempDir::new().unwrap();
		let (store, _) = store(&dir, 5);
		store.write(&name(&MonotonicClock::new()), b"{}").unwrap();
		let entry = store.list_entries().remove(0);
		assert!(store.delete(&entry));
		assert!(store.delete(&entry));
		assert!(store.is_empty());
	}

	#[test]
	fn claims_are_exclusive_until_dropped() {
		let dir = TempDir::new().unwrap();
		let (store, _) = store(&dir, 5);
		store.write(&name(&MonotonicClock::new()), b"{}").unwrap();
		let entry = store.list_entries().remove(0);

		let claim = store.claim(&entry).unwrap();
		assert!(store.claim(&entry).is_none());
		drop(claim);
		assert!(store.claim(&entry).is_some());
	}

	#[test]
	fn process_last_file_picks_the_newest_match() {
		let dir = TempDir::new().unwrap();
		let (store, _) = store(&dir, 5);
		let clock = MonotonicClock::new();
		let crash = EntryFilename::new(&clock, KEY, BTreeSet::new(), EntrySuffix::StartupCrash);
		store.write(&crash, b"{}").unwrap();
		store.write(&name(&clock), b"{}").unwrap();

		let newest = store.process_last_file(|_| true, |e| e.name.clone()).unwrap();
		assert_ne!(newest, crash.encode());
		let newest_crash = store.process_last_file(
			|e| e.filename.as_ref().is_some_and(EntryFilename::is_startup_crash),
			|e| e.name.clone(),
		);
		assert_eq!(newest_crash, Some(crash.encode()));

		let mut visited = 0;
		store.process_enqueued_files(|_| visited += 1);
		assert_eq!(visited, 2);
	}

	#[test]
	fn claimed_entries_are_not_evicted() {
		let dir = TempDir::new().unwrap();
		let (store, recorder) = store(&dir, 3);
		let clock = MonotonicClock::new();
		let written: Vec<String> = (0..3)
			.map(|_| {
				let filename = name(&clock);
				store.write(&filename, b"{}").unwrap();
				filename.encode()
			})
			.collect();

		let oldest = store.list_entries().remove(0);
		let claim = store.claim(&oldest).unwrap();
		store.write(&name(&clock), b"{}").unwrap();

		assert_eq!(store.read(&oldest).unwrap(), b"{}");
		let remaining: Vec<String> = store.list_entries().into_iter().map(|e| e.name).collect();
		assert_eq!(remaining.len(), 3);
		assert_eq!(remaining[0], written[0]);
		assert!(!remaining.contains(&written[1]));
		let evicted = recorder.0.lock().clone();
		assert_eq!(evicted.len(), 1);
		assert_eq!(evicted[0].file_name, written[1]);

		drop(claim);
		store.write(&name(&clock), b"{}").unwrap();
		assert!(!store.list_entries().iter().any(|e| e.name == written[0]));
	}

	#[test]
	fn stale_temp_files_are_removed_on_open() {
		let dir = TempDir::new().unwrap();
		let queue = dir.path().join("events");
		fs::create_dir_all(&queue).unwrap();
		fs::write(queue.join("1700000000000_key_rust_uuid_.json.tmp"), b"{\"trunc").unwrap();
		fs::write(queue.join("kept.json"), b"{}").unwrap();

		let (store, _) = store(&dir, 5);
		let names: Vec<String> = fs::read_dir(store.dir())
			.unwrap()
			.map(|e| e.unwrap().file_name().into_string().unwrap())
			.collect();
		assert_eq!(names, ["kept.json"]);
	}

	#[test]
	fn eviction_races_with_delivery_without_losing_claimed_entries() {
		let dir = TempDir::new().unwrap();
		let (store, recorder) = store(&dir, 4);
		let store = Arc::new(store);
		let clock = Arc::new(MonotonicClock::new());
		let done = Arc::new(std::sync::atomic::AtomicBool::new(false));

		let writer = {
			let (store, clock, done) = (Arc::clone(&store), Arc::clone(&clock), Arc::clone(&done));
			std::thread::spawn(move || {
				for _ in 0..200 {
					store.write(&name(&clock), b"{\"n\":1}");
				}
				done.store(true, std::sync::atomic::Ordering::SeqCst);
			})
		};
		let delivered = {
			let (store, done) = (Arc::clone(&store), Arc::clone(&done));
			std::thread::spawn(move || {
				let mut delivered = Vec::new();
				while !done.load(std::sync::atomic::Ordering::SeqCst) {
					for entry in store.list_entries() {
						let Some(_claim) = store.claim(&entry) else {
							continue;
						};
						match store.read(&entry) {
							Ok(bytes) => {
								assert_eq!(bytes, b"{\"n\":1}");
								assert!(store.delete(&entry));
								delivered.push(entry.name);
							}
							// Evicted between the listing and the claim.
							Err(e) => assert_eq!(e.kind(), io::ErrorKind::NotFound),
						}
					}
				}
				delivered
			})
		};
		writer.join().unwrap();
		let delivered = delivered.join().unwrap();

		assert!(store.list_entries().len() <= 4);
		let evicted: HashSet<String> = recorder.0.lock().iter().map(|e| e.file_name.clone()).collect();
		assert!(delivered.iter().all(|name| !evicted.contains(name)));
	}

	#[test]
	fn missing_directory_lists_as_empty() {
		let dir = TempDir::new().unwrap();
		let (store, _) = store(&dir, 5);
		fs::remove_dir(store.dir()).unwrap();
		assert!(store.list_entries().is_empty());
		assert!(store.write(&name(&MonotonicClock::new()), b"{}").is_some());
	}
}
