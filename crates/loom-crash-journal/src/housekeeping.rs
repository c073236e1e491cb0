// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Background compaction of a [`Journal`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::journal::Journal;

pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(200);

/// Polls [`Journal::try_snapshot_if_high_water`] on an interval.
///
/// The loop ends for good on the first snapshot failure; the journal keeps
/// logging, just without compaction.
pub struct Housekeeper {
	shutdown: Arc<Notify>,
	running: Arc<AtomicBool>,
	handle: JoinHandle<()>,
}

impl Housekeeper {
	pub fn spawn(journal: Arc<Journal>, interval: Duration, runtime: &Handle) -> Self {
		let shutdown = Arc::new(Notify::new());
		let running = Arc::new(AtomicBool::new(true));

		let handle = runtime.spawn(run(journal, interval, Arc::clone(&shutdown), Arc::clone(&running)));

		Self {
			shutdown,
			running,
			handle,
		}
	}

	/// Asks the loop to exit. Does not wait for it.
	pub fn stop(&self) {
		self.shutdown.notify_one();
	}

	pub fn is_running(&self) -> bool {
		self.running.load(Ordering::SeqCst) && !self.handle.is_finished()
	}
}

impl Drop for Housekeeper {
	fn drop(&mut self) {
		self.stop();
	}
}

async fn run(journal: Arc<Journal>, interval: Duration, shutdown: Arc<Notify>, running: Arc<AtomicBool>) {
	debug!(interval_ms = interval.as_millis() as u64, "journal housekeeping started");

	loop {
		tokio::select! {
			_ = shutdown.notified() => {
				info!("journal housekeeping stopped");
				break;
			}
			_ = tokio::time::sleep(interval) => {
				match journal.try_snapshot_if_high_water() {
					Ok(true) => debug!(generation = journal.generation(), "housekeeping compacted journal"),
					Ok(false) => {}
					Err(e) => {
						error!(error = %e, "journal snapshot failed, housekeeping terminated");
						break;
					}
				}
			}
		}
	}

	running.store(false, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::command::Command;
	use crate::document::Document;
	use crate::journal::JournalConfig;
	use std::fs;
	use tempfile::TempDir;

	fn journal(dir: &TempDir) -> Arc<Journal> {
		let config = JournalConfig::new(dir.path().join("state"), "loom-crash", 1)
			.with_buffer_size(4096)
			.with_high_water_mark(256);
		Arc::new(Journal::open(config, Document::new()))
	}

	async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
		for _ in 0..200 {
			if condition() {
				return true;
			}
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
		false
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn compacts_once_past_high_water() {
		let dir = TempDir::new().unwrap();
		let journal = journal(&dir);
		let housekeeper = Housekeeper::spawn(Arc::clone(&journal), Duration::from_millis(10), &Handle::current());

		for i in 0..32 {
			journal.append(Command::set(&format!("k{i}"), i).unwrap());
		}

		assert!(wait_until(|| journal.generation() > 1).await);
		assert!(journal.log_len() <= 256);
		assert!(housekeeper.is_running());
		housekeeper.stop();
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn stop_ends_the_loop() {
		let dir = TempDir::new().unwrap();
		let housekeeper = Housekeeper::spawn(journal(&dir), Duration::from_millis(10), &Handle::current());
		housekeeper.stop();
		assert!(wait_until(|| !housekeeper.is_running()).await);
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn snapshot_failure_terminates_permanently() {
		let dir = TempDir::new().unwrap();
		let journal = journal(&dir);
		let snapshot_path = journal.config().snapshot_path();

		// A directory in place of the snapshot makes the rename fail.
		fs::remove_file(&snapshot_path).unwrap();
		fs::create_dir(&snapshot_path).unwrap();
		fs::write(snapshot_path.join("occupied"), b"x").unwrap();

		let housekeeper = Housekeeper::spawn(Arc::clone(&journal), Duration::from_millis(10), &Handle::current());
		for i in 0..32 {
			journal.append(Command::set(&format!("k{i}"), i).unwrap());
		}

		assert!(wait_until(|| !housekeeper.is_running()).await);
		assert!(!journal.is_degraded());
		assert!(journal.append(Command::set("after", true).unwrap()));
	}
}
