// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Event queue.

use std::path::PathBuf;
use std::sync::Arc;

use loom_crash_core::Event;
use tracing::warn;

use crate::filename::{EntryFilename, EntrySuffix, MonotonicClock};
use crate::store::{BoundedFileStore, QueueKind, QueueObserver};

pub struct EventStore {
	store: BoundedFileStore,
	clock: Arc<MonotonicClock>,
}

impl EventStore {
	pub fn new(
		dir: impl Into<PathBuf>,
		max_entries: usize,
		clock: Arc<MonotonicClock>,
		observer: Arc<dyn QueueObserver>,
	) -> Self {
		Self {
			store: BoundedFileStore::new(dir, max_entries, QueueKind::Events, observer),
			clock,
		}
	}

	pub fn store(&self) -> &BoundedFileStore {
		&self.store
	}

	/// The suffix an event is queued under when nothing more specific applies.
	pub fn suffix_for(event: &Event) -> EntrySuffix {
		if event.is_launch_crash() {
			EntrySuffix::StartupCrash
		} else {
			EntrySuffix::None
		}
	}

	/// Serializes and queues `event`. Runs synchronously on the calling thread.
	pub fn write(&self, event: &Event, suffix: EntrySuffix) -> Option<PathBuf> {
		let bytes = match serde_json::to_vec(event) {
			Ok(bytes) => bytes,
			Err(e) => {
				warn!(event_id = %event.id, error = %e, "failed to serialize event");
				return None;
			}
		};
		let filename = EntryFilename::new(&self.clock, &event.api_key, event.error_types(), suffix);
		self.store.write(&filename, &bytes)
	}
}
