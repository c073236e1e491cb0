// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Crash event types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::breadcrumb::Breadcrumb;
use crate::context::UserContext;
use crate::error::CrashError;
use crate::error_type::ErrorType;

/// Metadata sections keyed by section name.
pub type Metadata = BTreeMap<String, serde_json::Map<String, serde_json::Value>>;

/// Unique identifier for a crash event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
	pub fn new() -> Self {
		Self(Uuid::now_v7())
	}
}

impl Default for EventId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for EventId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for EventId {
	type Err = uuid::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(Self(Uuid::parse_str(s)?))
	}
}

/// How serious an event is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
	Error,
	Warning,
	Info,
}

impl fmt::Display for Severity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Error => write!(f, "error"),
			Self::Warning => write!(f, "warning"),
			Self::Info => write!(f, "info"),
		}
	}
}

impl FromStr for Severity {
	type Err = CrashError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"error" => Ok(Self::Error),
			"warning" => Ok(Self::Warning),
			"info" => Ok(Self::Info),
			_ => Err(CrashError::InvalidSeverity(s.to_string())),
		}
	}
}

/// Why an event has the severity it has (e.g. `"unhandledPanic"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityReason {
	#[serde(rename = "type")]
	pub reason_type: String,
	#[serde(default)]
	pub unhandled_overridden: bool,
}

impl SeverityReason {
	pub fn new(reason_type: impl Into<String>) -> Self {
		Self {
			reason_type: reason_type.into(),
			unhandled_overridden: false,
		}
	}
}

/// A single stack frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
	/// Function/method name
	#[serde(skip_serializing_if = "Option::is_none")]
	pub function: Option<String>,
	/// Module/crate path
	#[serde(skip_serializing_if = "Option::is_none")]
	pub module: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub filename: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub lineno: Option<u32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub colno: Option<u32>,
	/// User code vs dependency
	#[serde(default)]
	pub in_app: bool,
}

/// One error in the causal chain of an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exception {
	pub error_class: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub message: Option<String>,
	#[serde(rename = "type")]
	pub error_type: ErrorType,
	#[serde(default)]
	pub stacktrace: Vec<Frame>,
}

/// A thread that was alive when the event was captured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
	pub id: String,
	pub name: String,
	#[serde(rename = "type")]
	pub error_type: ErrorType,
	#[serde(default)]
	pub error_reporting_thread: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub state: Option<String>,
	#[serde(default)]
	pub stacktrace: Vec<Frame>,
}

/// Handled/unhandled counters of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCounts {
	pub handled: u32,
	pub unhandled: u32,
}

/// The session an event was captured in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
	pub id: String,
	pub started_at: DateTime<Utc>,
	pub events: EventCounts,
}

/// A fully-formed error event ready to be queued for delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
	pub id: EventId,
	pub api_key: String,
	pub timestamp: DateTime<Utc>,
	pub severity: Severity,
	pub severity_reason: SeverityReason,
	pub unhandled: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub context: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub grouping_hash: Option<String>,
	#[serde(default)]
	pub user: UserContext,
	#[serde(default)]
	pub app: serde_json::Map<String, serde_json::Value>,
	#[serde(default)]
	pub device: serde_json::Map<String, serde_json::Value>,
	#[serde(default)]
	pub metadata: Metadata,
	#[serde(default)]
	pub breadcrumbs: Vec<Breadcrumb>,
	#[serde(default)]
	pub threads: Vec<Thread>,
	pub exceptions: Vec<Exception>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub session: Option<SessionSummary>,
}

impl Event {
	/// Creates a handled, warning-severity event with one exception.
	pub fn new(api_key: impl Into<String>, exception: Exception) -> Self {
		Self {
			id: EventId::new(),
			api_key: api_key.into(),
			timestamp: Utc::now(),
			severity: Severity::Warning,
			severity_reason: SeverityReason::new("handledError"),
			unhandled: false,
			context: None,
			grouping_hash: None,
			user: UserContext::default(),
			app: serde_json::Map::new(),
			device: serde_json::Map::new(),
			metadata: Metadata::new(),
			breadcrumbs: Vec::new(),
			threads: Vec::new(),
			exceptions: vec![exception],
			session: None,
		}
	}

	/// Error type codes of every exception and thread in the event.
	pub fn error_types(&self) -> BTreeSet<ErrorType> {
		self
			.exceptions
			.iter()
			.map(|e| e.error_type)
			.chain(self.threads.iter().map(|t| t.error_type))
			.collect()
	}

	/// Whether the app reported itself as still launching when this happened.
	pub fn is_launch_crash(&self) -> bool {
		self.unhandled
			&& self
				.app
				.get("isLaunching")
				.and_then(|v| v.as_bool())
				.unwrap_or(false)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	fn panic_exception() -> Exception {
		Exception {
			error_class: "panic".to_string(),
			message: Some("boom".to_string()),
			error_type: ErrorType::Rust,
			stacktrace: Vec::new(),
		}
	}

	proptest! {
		#[test]
		fn event_id_roundtrip(uuid_bytes in any::<[u8; 16]>()) {
			let id = EventId(Uuid::from_bytes(uuid_bytes));
			let parsed: EventId = id.to_string().parse().unwrap();
			prop_assert_eq!(id, parsed);
		}
	}

	#[test]
	fn error_types_are_collected_from_exceptions_and_threads() {
		let mut event = Event::new("key", panic_exception());
		event.threads.push(Thread {
			id: "1".to_string(),
			name: "main".to_string(),
			error_type: ErrorType::C,
			error_reporting_thread: true,
			state: None,
			stacktrace: Vec::new(),
		});

		let types: Vec<_> = event.error_types().into_iter().collect();
		assert_eq!(types, vec![ErrorType::Rust, ErrorType::C]);
	}

	#[test]
	fn launch_crash_requires_unhandled_and_launching() {
		let mut event = Event::new("key", panic_exception());
		event
			.app
			.insert("isLaunching".to_string(), serde_json::Value::Bool(true));
		assert!(!event.is_launch_crash());

		event.unhandled = true;
		assert!(event.is_launch_crash());
	}

	#[test]
	fn event_json_roundtrip_preserves_fields() {
		let mut event = Event::new("key", panic_exception());
		event.context = Some("checkout".to_string());
		let json = serde_json::to_string(&event).unwrap();
		let parsed: Event = serde_json::from_str(&json).unwrap();
		assert_eq!(parsed, event);
	}
}
