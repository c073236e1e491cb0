// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Turning the previous run's journal into a queued event.

use std::path::PathBuf;

use loom_crash_core::EventId;
use loom_crash_journal::{load_previous_document, remove_journal_files, JournalConfig};
use tracing::{info, warn};

use crate::event_mapper::document_to_event;
use crate::event_store::EventStore;
use crate::filename::EntrySuffix;

#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryOutcome {
	/// No journal was left behind.
	NoPriorJournal,
	/// The previous run left state but no unreported crash.
	NoCrash,
	/// The crash was written to the event queue.
	Recovered {
		event_id: EventId,
		suffix: EntrySuffix,
		path: Option<PathBuf>,
	},
	/// The journal could not be used and was thrown away.
	Invalid { reason: String },
}

pub struct CrashRecoveryLoader<'a> {
	journal_config: &'a JournalConfig,
	events: &'a EventStore,
}

impl<'a> CrashRecoveryLoader<'a> {
	pub fn new(journal_config: &'a JournalConfig, events: &'a EventStore) -> Self {
		Self {
			journal_config,
			events,
		}
	}

	/// Queues the crash recorded by the previous run, if any, then removes
	/// that run's journal files. Never fails.
	pub fn recover(&self) -> RecoveryOutcome {
		let outcome = self.load_and_queue();
		match &outcome {
			RecoveryOutcome::NoPriorJournal => return outcome,
			RecoveryOutcome::Recovered { event_id, suffix, .. } => {
				info!(event_id = %event_id, suffix = suffix.as_str(), "recovered crash from previous run");
			}
			RecoveryOutcome::NoCrash => info!("previous run left no unreported crash"),
			RecoveryOutcome::Invalid { reason } => warn!(reason = %reason, "discarding previous crash journal"),
		}

		if let Err(e) = remove_journal_files(self.journal_config) {
			warn!(error = %e, "failed to remove previous crash journal");
		}
		outcome
	}

	fn load_and_queue(&self) -> RecoveryOutcome {
		let document = match load_previous_document(self.journal_config) {
			Ok(Some(document)) => document,
			Ok(None) => return RecoveryOutcome::NoPriorJournal,
			Err(e) => {
				return RecoveryOutcome::Invalid {
					reason: e.to_string(),
				}
			}
		};

		let event = match document_to_event(&document) {
			Ok(Some(event)) => event,
			Ok(None) => return RecoveryOutcome::NoCrash,
			Err(e) => {
				return RecoveryOutcome::Invalid {
					reason: e.to_string(),
				}
			}
		};

		let suffix = if event.is_launch_crash() {
			EntrySuffix::StartupCrash
		} else {
			EntrySuffix::Native
		};
		let path = self.events.write(&event, suffix);
		RecoveryOutcome::Recovered {
			event_id: event.id,
			suffix,
			path,
		}
	}
}
