// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Client state changes and the sinks that observe them.
//!
//! Every mutation of client state is expressed as a [`StateEvent`] and fanned
//! out to each registered [`StateSink`]. [`MemoryState`] keeps the live values
//! used to build events; [`JournalSink`] records the same changes in the crash
//! journal so they survive a crash.

use std::collections::VecDeque;
use std::sync::Arc;

use loom_crash_core::{
	Breadcrumb, Event, Exception, Metadata, SessionSummary, Severity, SeverityReason, Thread,
	UserContext,
};
use loom_crash_journal::{Command, Document, DocumentPath, Journal};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::warn;

use crate::event_mapper::{
	breadcrumb_to_value, session_to_value, thread_to_value, user_to_value, API_KEY,
	APP, BREADCRUMBS, CONTEXT, DEVICE, EXCEPTIONS, METADATA, SESSION, THREADS, USER,
};

#[derive(Debug, Clone, PartialEq)]
pub enum StateEvent {
	Install {
		api_key: String,
		app: Map<String, Value>,
		device: Map<String, Value>,
		user: UserContext,
	},
	AddBreadcrumb(Breadcrumb),
	UpdateUser(UserContext),
	UpdateContext(Option<String>),
	AddMetadata {
		section: String,
		key: String,
		value: Value,
	},
	ClearMetadataSection(String),
	ClearMetadataValue {
		section: String,
		key: String,
	},
	StartSession(SessionSummary),
	PauseSession,
	NotifyHandled,
	NotifyUnhandled,
	UpdateLaunching(bool),
	UpdateThreads(Vec<Thread>),
	/// The crash in the journal has been written to the event queue.
	CrashPersisted,
}

pub trait StateSink: Send + Sync {
	fn on_state_change(&self, event: &StateEvent);
}

#[derive(Debug, Default)]
struct Snapshot {
	api_key: String,
	app: Map<String, Value>,
	device: Map<String, Value>,
	user: UserContext,
	context: Option<String>,
	metadata: Metadata,
	breadcrumbs: VecDeque<Breadcrumb>,
	session: Option<SessionSummary>,
	threads: Vec<Thread>,
}

/// In-memory view of client state.
pub struct MemoryState {
	max_breadcrumbs: usize,
	inner: RwLock<Snapshot>,
}

impl MemoryState {
	pub fn new(max_breadcrumbs: usize) -> Self {
		Self {
			max_breadcrumbs,
			inner: RwLock::new(Snapshot::default()),
		}
	}

	pub fn is_launching(&self) -> bool {
		self.inner
			.read()
			.app
			.get("isLaunching")
			.and_then(Value::as_bool)
			.unwrap_or(false)
	}

	pub fn user(&self) -> UserContext {
		self.inner.read().user.clone()
	}

	pub fn session(&self) -> Option<SessionSummary> {
		self.inner.read().session.clone()
	}

	pub fn breadcrumbs(&self) -> Vec<Breadcrumb> {
		self.inner.read().breadcrumbs.iter().cloned().collect()
	}

	/// An event for `exception` carrying everything currently known.
	pub fn build_event(&self, exception: Exception, unhandled: bool) -> Event {
		let state = self.inner.read();
		let mut event = Event::new(state.api_key.clone(), exception);
		if unhandled {
			event.unhandled = true;
			event.severity = Severity::Error;
			event.severity_reason = SeverityReason::new("unhandledPanic");
		}
		event.app = state.app.clone();
		event.device = state.device.clone();
		event.user = state.user.clone();
		event.context = state.context.clone();
		event.metadata = state.metadata.clone();
		event.breadcrumbs = state.breadcrumbs.iter().cloned().collect();
		event.threads = state.threads.clone();
		event.session = state.session.clone();
		event
	}
}

impl StateSink for MemoryState {
	fn on_state_change(&self, event: &StateEvent) {
		let mut state = self.inner.write();
		match event {
			StateEvent::Install {
				api_key,
				app,
				device,
				user,
			} => {
				state.api_key = api_key.clone();
				state.app = app.clone();
				state.device = device.clone();
				state.user = user.clone();
			}
			StateEvent::AddBreadcrumb(breadcrumb) => {
				if self.max_breadcrumbs == 0 {
					return;
				}
				while state.breadcrumbs.len() >= self.max_breadcrumbs {
					state.breadcrumbs.pop_front();
				}
				state.breadcrumbs.push_back(breadcrumb.clone());
			}
			StateEvent::UpdateUser(user) => state.user = user.clone(),
			StateEvent::UpdateContext(context) => state.context = context.clone(),
			StateEvent::AddMetadata { section, key, value } => {
				if value.is_null() {
					if let Some(values) = state.metadata.get_mut(section) {
						values.remove(key);
					}
				} else {
					state
						.metadata
						.entry(section.clone())
						.or_default()
						.insert(key.clone(), value.clone());
				}
			}
			StateEvent::ClearMetadataSection(section) => {
				state.metadata.remove(section);
			}
			StateEvent::ClearMetadataValue { section, key } => {
				if let Some(values) = state.metadata.get_mut(section) {
					values.remove(key);
				}
			}
			StateEvent::StartSession(session) => state.session = Some(session.clone()),
			StateEvent::PauseSession => state.session = None,
			StateEvent::NotifyHandled => {
				if let Some(session) = state.session.as_mut() {
					session.events.handled += 1;
				}
			}
			StateEvent::NotifyUnhandled => {
				if let Some(session) = state.session.as_mut() {
					session.events.unhandled += 1;
				}
			}
			StateEvent::UpdateLaunching(launching) => {
				state.app.insert("isLaunching".to_string(), Value::Bool(*launching));
			}
			StateEvent::UpdateThreads(threads) => state.threads = threads.clone(),
			StateEvent::CrashPersisted => {}
		}
	}
}

/// Records state changes in the crash journal.
pub struct JournalSink {
	journal: Arc<Journal>,
	max_breadcrumbs: usize,
}

impl JournalSink {
	pub fn new(journal: Arc<Journal>, max_breadcrumbs: usize) -> Self {
		Self {
			journal,
			max_breadcrumbs,
		}
	}

	pub fn journal(&self) -> &Arc<Journal> {
		&self.journal
	}

	/// The journal commands for `event` given the journal's current `document`.
	pub fn commands_for(&self, event: &StateEvent, document: &Document) -> Vec<Command> {
		match self.try_commands_for(event, document) {
			Ok(commands) => commands,
			Err(e) => {
				warn!(error = %e, "failed to translate state change into journal commands");
				Vec::new()
			}
		}
	}

	fn try_commands_for(&self, event: &StateEvent, document: &Document) -> loom_crash_journal::Result<Vec<Command>> {
		let commands = match event {
			StateEvent::Install {
				api_key,
				app,
				device,
				user,
			} => vec![
				Command::set(API_KEY, api_key.as_str())?,
				Command::set(APP, Value::Object(app.clone()))?,
				Command::set(DEVICE, Value::Object(device.clone()))?,
				Command::set(USER, user_to_value(user))?,
			],
			StateEvent::AddBreadcrumb(breadcrumb) => {
				if self.max_breadcrumbs == 0 {
					return Ok(Vec::new());
				}
				let current = document
					.get(BREADCRUMBS)
					.and_then(Value::as_array)
					.map_or(0, Vec::len);
				let mut commands = vec![Command::append(BREADCRUMBS, breadcrumb_to_value(breadcrumb))?];
				for _ in self.max_breadcrumbs..current + 1 {
					commands.push(Command::delete(&format!("{BREADCRUMBS}.0"))?);
				}
				commands
			}
			StateEvent::UpdateUser(user) => vec![Command::set(USER, user_to_value(user))?],
			StateEvent::UpdateContext(context) => {
				let value = context.clone().map_or(Value::Null, Value::String);
				vec![Command::set(CONTEXT, value)?]
			}
			StateEvent::AddMetadata { section, key, value } => vec![Command::from_parts(
				DocumentPath::key(METADATA).child(section.clone()).child(key.clone()),
				value.clone(),
			)],
			StateEvent::ClearMetadataSection(section) => vec![Command::from_parts(
				DocumentPath::key(METADATA).child(section.clone()),
				Value::Null,
			)],
			StateEvent::ClearMetadataValue { section, key } => vec![Command::from_parts(
				DocumentPath::key(METADATA).child(section.clone()).child(key.clone()),
				Value::Null,
			)],
			StateEvent::StartSession(session) => vec![
				Command::delete(SESSION)?,
				Command::set(SESSION, session_to_value(session))?,
			],
			StateEvent::PauseSession => vec![Command::delete(SESSION)?],
			StateEvent::NotifyHandled => session_increment(document, "handled")?,
			StateEvent::NotifyUnhandled => session_increment(document, "unhandled")?,
			StateEvent::UpdateLaunching(launching) => {
				vec![Command::set(&format!("{APP}.isLaunching"), *launching)?]
			}
			StateEvent::UpdateThreads(threads) => {
				let threads: Vec<Value> = threads.iter().map(thread_to_value).collect();
				vec![Command::set(THREADS, threads)?]
			}
			StateEvent::CrashPersisted => vec![Command::delete(EXCEPTIONS)?],
		};
		Ok(commands)
	}
}

fn session_increment(document: &Document, counter: &str) -> loom_crash_journal::Result<Vec<Command>> {
	if document.get(SESSION).is_none() {
		return Ok(Vec::new());
	}
	Ok(vec![Command::increment(&format!("{SESSION}.events.{counter}"), 1)?])
}

impl StateSink for JournalSink {
	fn on_state_change(&self, event: &StateEvent) {
		// The trim count and session check read the document under the
		// journal lock, so concurrent changes can't overshoot the ring.
		if !self.journal.append_with(|document| self.commands_for(event, document)) {
			warn!("journal rejected state change");
		}
	}
}
