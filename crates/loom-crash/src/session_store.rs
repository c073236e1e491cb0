// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use loom_crash_core::Session;
use tracing::warn;

use crate::filename::{EntryFilename, EntrySuffix, MonotonicClock};
use crate::store::{BoundedFileStore, QueueKind, QueueObserver};

/// Session queue. Same policy as events, delivered to the sessions endpoint.
pub struct SessionStore {
	store: BoundedFileStore,
	clock: Arc<MonotonicClock>,
}

impl SessionStore {
	pub fn new(
		dir: impl Into<PathBuf>,
		max_entries: usize,
		clock: Arc<MonotonicClock>,
		observer: Arc<dyn QueueObserver>,
	) -> Self {
		Self {
			store: BoundedFileStore::new(dir, max_entries, QueueKind::Sessions, observer),
			clock,
		}
	}

	pub fn store(&self) -> &BoundedFileStore {
		&self.store
	}

	pub fn write(&self, session: &Session) -> Option<PathBuf> {
		let bytes = match serde_json::to_vec(session) {
			Ok(bytes) => bytes,
			Err(e) => {
				warn!(session_id = %session.id, error = %e, "failed to serialize session");
				return None;
			}
		};
		let filename = EntryFilename::new(&self.clock, &session.api_key, BTreeSet::new(), EntrySuffix::None);
		self.store.write(&filename, &bytes)
	}
}
