// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Delivery and retry policy for the queues.
//!
//! | Transport says     | Entry                                             |
//! |--------------------|---------------------------------------------------|
//! | `Delivered`        | deleted                                           |
//! | `Undelivered`      | kept, unless stale or oversized: then discarded   |
//! | `PermanentFailure` | deleted, observers are not told                   |
//!
//! Send filters run first and may skip or discard an event without the
//! transport ever seeing it.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::background::{TaskRunner, TaskType};
use crate::config::CrashConfig;
use crate::delivery::{DeliveryParams, DeliveryStatus, Transport};
use crate::event_store::EventStore;
use crate::filename::EntryFilename;
use crate::filter::{run_filters, SendDecision, SendFilter};
use crate::session_store::SessionStore;
use crate::store::{BoundedFileStore, DiscardReason, QueueKind, StoreEntry};

#[derive(Debug, Clone)]
pub struct DeliveryPolicy {
	pub notify_endpoint: String,
	pub sessions_endpoint: String,
	/// Undelivered entries older than this are given up on.
	pub retention: Duration,
	/// Undelivered entries larger than this are given up on.
	pub max_payload_bytes: u64,
	pub launch_crash_timeout: Duration,
}

impl DeliveryPolicy {
	pub fn from_config(config: &CrashConfig) -> Self {
		Self {
			notify_endpoint: config.notify_endpoint.clone(),
			sessions_endpoint: config.sessions_endpoint.clone(),
			retention: config.retention(),
			max_payload_bytes: config.max_payload_bytes,
			launch_crash_timeout: config.launch_crash_timeout(),
		}
	}

	fn endpoint(&self, kind: QueueKind) -> &str {
		match kind {
			QueueKind::Events => &self.notify_endpoint,
			QueueKind::Sessions => &self.sessions_endpoint,
		}
	}
}

/// What happened to one entry during a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOutcome {
	Delivered,
	/// Still queued for a later attempt.
	Retained,
	/// Deleted after a permanent failure.
	Rejected,
	Discarded(DiscardReason),
	/// A send filter asked to keep it queued without sending.
	Skipped,
	/// Another delivery holds it.
	Busy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushSummary {
	pub delivered: usize,
	pub retained: usize,
	pub rejected: usize,
	pub discarded: usize,
	pub skipped: usize,
}

impl FlushSummary {
	fn record(&mut self, outcome: EntryOutcome) {
		match outcome {
			EntryOutcome::Delivered => self.delivered += 1,
			EntryOutcome::Retained => self.retained += 1,
			EntryOutcome::Rejected => self.rejected += 1,
			EntryOutcome::Discarded(_) => self.discarded += 1,
			EntryOutcome::Skipped | EntryOutcome::Busy => self.skipped += 1,
		}
	}

	fn merge(mut self, other: FlushSummary) -> Self {
		self.delivered += other.delivered;
		self.retained += other.retained;
		self.rejected += other.rejected;
		self.discarded += other.discarded;
		self.skipped += other.skipped;
		self
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchFlushOutcome {
	/// The newest queued event is not a launch crash.
	NoLaunchCrash,
	/// The attempt finished within the budget.
	Completed(EntryOutcome),
	/// The budget ran out first. The attempt keeps going in the background.
	TimedOut,
	/// Startup already took longer than the whole budget.
	BudgetExhausted,
	/// The delivery context is gone.
	Unavailable,
}

pub struct DeliveryOrchestrator {
	transport: Arc<dyn Transport>,
	policy: DeliveryPolicy,
	filters: Vec<Arc<dyn SendFilter>>,
}

impl DeliveryOrchestrator {
	pub fn new(transport: Arc<dyn Transport>, policy: DeliveryPolicy, filters: Vec<Arc<dyn SendFilter>>) -> Self {
		Self {
			transport,
			policy,
			filters,
		}
	}

	pub fn policy(&self) -> &DeliveryPolicy {
		&self.policy
	}

	/// One delivery attempt for `entry`, with the outcome applied to `store`.
	pub async fn deliver_entry(&self, store: &BoundedFileStore, entry: &StoreEntry) -> EntryOutcome {
		let Some(_claim) = store.claim(entry) else {
			debug!(file = %entry.name, "entry already in flight");
			return EntryOutcome::Busy;
		};
		let Some(filename) = &entry.filename else {
			return discard(store, entry, DiscardReason::Corrupt);
		};

		let bytes = match store.read(entry) {
			Ok(bytes) => bytes,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				debug!(file = %entry.name, "entry vanished before delivery");
				return EntryOutcome::Delivered;
			}
			Err(e) => {
				warn!(file = %entry.name, error = %e, "failed to read queue entry");
				return EntryOutcome::Retained;
			}
		};
		let payload: Value = match serde_json::from_slice(&bytes) {
			Ok(payload) => payload,
			Err(e) => {
				warn!(file = %entry.name, error = %e, "queue entry is not valid JSON");
				return discard(store, entry, DiscardReason::Corrupt);
			}
		};

		if store.kind() == QueueKind::Events {
			match run_filters(self.filters.iter().map(|f| f.as_ref()), &payload) {
				SendDecision::Send => {}
				SendDecision::Skip => return EntryOutcome::Skipped,
				SendDecision::Discard => return discard(store, entry, DiscardReason::Filtered),
			}
		}

		let params = DeliveryParams::new(
			self.policy.endpoint(store.kind()),
			store.kind(),
			&filename.api_key,
			&bytes,
		);
		let status = self.transport.deliver(&bytes, &params).await;
		self.apply_status(store, entry, filename, status, bytes.len() as u64)
	}

	fn apply_status(
		&self,
		store: &BoundedFileStore,
		entry: &StoreEntry,
		filename: &EntryFilename,
		status: DeliveryStatus,
		size: u64,
	) -> EntryOutcome {
		match status {
			DeliveryStatus::Delivered => {
				store.delete(entry);
				info!(kind = store.kind().as_str(), file = %entry.name, "delivered queue entry");
				EntryOutcome::Delivered
			}
			DeliveryStatus::PermanentFailure => {
				store.delete(entry);
				warn!(kind = store.kind().as_str(), file = %entry.name, "server rejected entry, deleting it");
				EntryOutcome::Rejected
			}
			DeliveryStatus::Undelivered => {
				if filename.age(Utc::now()) > self.policy.retention {
					discard(store, entry, DiscardReason::Stale)
				} else if size > self.policy.max_payload_bytes {
					discard(store, entry, DiscardReason::Oversized)
				} else {
					debug!(file = %entry.name, "delivery failed, keeping entry for retry");
					EntryOutcome::Retained
				}
			}
		}
	}

	/// Sweeps every entry of `store`, oldest first.
	pub async fn flush_store(&self, store: &BoundedFileStore) -> FlushSummary {
		let entries = store.list_entries();
		if entries.is_empty() {
			return FlushSummary::default();
		}

		let mut summary = FlushSummary::default();
		for entry in &entries {
			summary.record(self.deliver_entry(store, entry).await);
		}

		info!(
			kind = store.kind().as_str(),
			delivered = summary.delivered,
			retained = summary.retained,
			rejected = summary.rejected,
			discarded = summary.discarded,
			skipped = summary.skipped,
			"queue flush finished"
		);
		if store.is_empty() {
			store.observer().on_queue_empty(store.kind());
		}
		summary
	}

	/// Schedules a sweep of both queues on the delivery context.
	pub fn flush_async(
		self: &Arc<Self>,
		runner: &TaskRunner,
		events: Arc<EventStore>,
		sessions: Arc<SessionStore>,
	) -> Option<JoinHandle<FlushSummary>> {
		let orchestrator = Arc::clone(self);
		runner.submit(TaskType::Delivery, async move {
			let events = orchestrator.flush_store(events.store()).await;
			let sessions = orchestrator.flush_store(sessions.store()).await;
			events.merge(sessions)
		})
	}

	/// Delivers the newest event if it is a launch crash, blocking the caller
	/// for at most the launch budget minus `elapsed_since_start`.
	///
	/// Must not be called from the delivery context itself.
	pub fn flush_on_launch(
		self: &Arc<Self>,
		runner: &TaskRunner,
		events: Arc<EventStore>,
		elapsed_since_start: Duration,
	) -> LaunchFlushOutcome {
		let newest = events.store().process_last_file(|_| true, StoreEntry::clone);
		let Some(entry) = newest.filter(|e| e.filename.as_ref().is_some_and(EntryFilename::is_startup_crash))
		else {
			return LaunchFlushOutcome::NoLaunchCrash;
		};

		let budget = self.policy.launch_crash_timeout.saturating_sub(elapsed_since_start);
		if budget.is_zero() {
			info!(file = %entry.name, "no launch budget left, leaving launch crash for async flush");
			return LaunchFlushOutcome::BudgetExhausted;
		}

		let (tx, rx) = mpsc::sync_channel(1);
		let orchestrator = Arc::clone(self);
		let submitted = runner.submit(TaskType::Delivery, async move {
			let outcome = orchestrator.deliver_entry(events.store(), &entry).await;
			let _ = tx.send(outcome);
		});
		if submitted.is_none() {
			return LaunchFlushOutcome::Unavailable;
		}

		match rx.recv_timeout(budget) {
			Ok(outcome) => {
				info!(?outcome, "launch crash flush finished");
				LaunchFlushOutcome::Completed(outcome)
			}
			Err(mpsc::RecvTimeoutError::Timeout) => {
				warn!(budget_ms = budget.as_millis() as u64, "launch crash flush timed out");
				LaunchFlushOutcome::TimedOut
			}
			Err(mpsc::RecvTimeoutError::Disconnected) => LaunchFlushOutcome::Unavailable,
		}
	}
}

fn discard(store: &BoundedFileStore, entry: &StoreEntry, reason: DiscardReason) -> EntryOutcome {
	store.delete(entry);
	warn!(kind = store.kind().as_str(), file = %entry.name, ?reason, "discarded queue entry");
	store.observer().on_discard(&entry.discarded(store.kind(), reason));
	EntryOutcome::Discarded(reason)
}
