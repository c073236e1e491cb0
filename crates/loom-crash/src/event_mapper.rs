// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Translation between [`Event`]s and the crash journal document.
//!
//! The journal uses camelCase keys (`apiKey`, `metaData`, `errorClass`) and
//! stores breadcrumbs with the message under `name`. All timestamps are RFC
//! 3339 strings with millisecond precision.

use chrono::{DateTime, SecondsFormat, Utc};
use loom_crash_core::{
	Breadcrumb, BreadcrumbType, ErrorType, Event, EventCounts, EventId, Exception, Frame, Metadata,
	SessionSummary, Severity, SeverityReason, Thread, UserContext,
};
use loom_crash_journal::{Command, Document};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::error::{CrashSdkError, Result};

pub const API_KEY: &str = "apiKey";
pub const APP: &str = "app";
pub const DEVICE: &str = "device";
pub const USER: &str = "user";
pub const CONTEXT: &str = "context";
pub const METADATA: &str = "metaData";
pub const BREADCRUMBS: &str = "breadcrumbs";
pub const SESSION: &str = "session";
pub const EXCEPTIONS: &str = "exceptions";
pub const THREADS: &str = "threads";
pub const SEVERITY: &str = "severity";
pub const SEVERITY_REASON: &str = "severityReason";
pub const UNHANDLED: &str = "unhandled";
pub const TIMESTAMP: &str = "timestamp";

pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
	ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
	let raw = value?.as_str()?;
	DateTime::parse_from_rfc3339(raw)
		.ok()
		.map(|ts| ts.with_timezone(&Utc))
}

fn string_at(object: &Map<String, Value>, key: &str) -> Option<String> {
	object.get(key).and_then(Value::as_str).map(str::to_string)
}

fn u32_at(object: &Map<String, Value>, key: &str) -> Option<u32> {
	object
		.get(key)
		.and_then(Value::as_u64)
		.and_then(|n| u32::try_from(n).ok())
}

fn object_at(object: &Map<String, Value>, key: &str) -> Map<String, Value> {
	object
		.get(key)
		.and_then(Value::as_object)
		.cloned()
		.unwrap_or_default()
}

pub(crate) fn breadcrumb_to_value(breadcrumb: &Breadcrumb) -> Value {
	json!({
		"name": breadcrumb.message,
		"type": breadcrumb.breadcrumb_type.as_str(),
		"timestamp": format_timestamp(&breadcrumb.timestamp),
		"metaData": breadcrumb.metadata,
	})
}

fn breadcrumb_from_value(value: &Value) -> Option<Breadcrumb> {
	let object = value.as_object()?;
	let breadcrumb_type = match object.get("type").and_then(Value::as_str) {
		Some(raw) => match BreadcrumbType::parse_journaled(raw) {
			Ok(t) => t,
			Err(e) => {
				debug!(error = %e, "dropping breadcrumb with unknown type");
				return None;
			}
		},
		None => return None,
	};
	Some(Breadcrumb {
		message: string_at(object, "name")?,
		breadcrumb_type,
		timestamp: parse_timestamp(object.get("timestamp"))?,
		metadata: object_at(object, "metaData"),
	})
}

pub(crate) fn user_to_value(user: &UserContext) -> Value {
	let mut object = Map::new();
	for (key, value) in [("id", &user.id), ("email", &user.email), ("name", &user.name)] {
		object.insert(key.to_string(), value.clone().map_or(Value::Null, Value::String));
	}
	Value::Object(object)
}

fn user_from_value(value: Option<&Value>) -> UserContext {
	let Some(object) = value.and_then(Value::as_object) else {
		return UserContext::default();
	};
	UserContext {
		id: string_at(object, "id"),
		email: string_at(object, "email"),
		name: string_at(object, "name"),
	}
}

pub(crate) fn session_to_value(session: &SessionSummary) -> Value {
	json!({
		"id": session.id,
		"startedAt": format_timestamp(&session.started_at),
		"events": {"handled": session.events.handled, "unhandled": session.events.unhandled},
	})
}

fn session_from_value(value: Option<&Value>) -> Option<SessionSummary> {
	let object = value?.as_object()?;
	let events = object_at(object, "events");
	Some(SessionSummary {
		id: string_at(object, "id")?,
		started_at: parse_timestamp(object.get("startedAt"))?,
		events: EventCounts {
			handled: u32_at(&events, "handled").unwrap_or(0),
			unhandled: u32_at(&events, "unhandled").unwrap_or(0),
		},
	})
}

fn frame_to_value(frame: &Frame) -> Value {
	let mut object = Map::new();
	if let Some(function) = &frame.function {
		object.insert("function".to_string(), json!(function));
	}
	if let Some(module) = &frame.module {
		object.insert("module".to_string(), json!(module));
	}
	if let Some(file) = &frame.filename {
		object.insert("file".to_string(), json!(file));
	}
	if let Some(line) = frame.lineno {
		object.insert("lineNumber".to_string(), json!(line));
	}
	if let Some(column) = frame.colno {
		object.insert("columnNumber".to_string(), json!(column));
	}
	object.insert("inProject".to_string(), json!(frame.in_app));
	Value::Object(object)
}

fn frames_from_value(value: Option<&Value>) -> Vec<Frame> {
	let Some(frames) = value.and_then(Value::as_array) else {
		return Vec::new();
	};
	frames
		.iter()
		.filter_map(Value::as_object)
		.map(|object| Frame {
			function: string_at(object, "function"),
			module: string_at(object, "module"),
			filename: string_at(object, "file"),
			lineno: u32_at(object, "lineNumber"),
			colno: u32_at(object, "columnNumber"),
			in_app: object.get("inProject").and_then(Value::as_bool).unwrap_or(false),
		})
		.collect()
}

fn error_type_at(object: &Map<String, Value>) -> Result<ErrorType> {
	match object.get("type").and_then(Value::as_str) {
		None => Ok(ErrorType::C),
		Some(code) => code
			.parse()
			.map_err(|_| CrashSdkError::InvalidDocument(format!("unknown error type {code:?}"))),
	}
}

fn exception_to_value(exception: &Exception) -> Value {
	json!({
		"errorClass": exception.error_class,
		"message": exception.message,
		"type": exception.error_type.code(),
		"stacktrace": exception.stacktrace.iter().map(frame_to_value).collect::<Vec<_>>(),
	})
}

fn exception_from_value(value: &Value) -> Result<Exception> {
	let object = value
		.as_object()
		.ok_or_else(|| CrashSdkError::InvalidDocument("exception is not an object".to_string()))?;
	let error_class = string_at(object, "errorClass")
		.ok_or_else(|| CrashSdkError::InvalidDocument("exception without errorClass".to_string()))?;
	Ok(Exception {
		error_class,
		message: string_at(object, "message"),
		error_type: error_type_at(object)?,
		stacktrace: frames_from_value(object.get("stacktrace")),
	})
}

pub(crate) fn thread_to_value(thread: &Thread) -> Value {
	json!({
		"id": thread.id,
		"name": thread.name,
		"type": thread.error_type.code(),
		"errorReportingThread": thread.error_reporting_thread,
		"state": thread.state,
		"stacktrace": thread.stacktrace.iter().map(frame_to_value).collect::<Vec<_>>(),
	})
}

fn thread_from_value(value: &Value) -> Option<Thread> {
	let object = value.as_object()?;
	let id = match object.get("id")? {
		Value::String(id) => id.clone(),
		Value::Number(id) => id.to_string(),
		_ => return None,
	};
	Some(Thread {
		id,
		name: string_at(object, "name").unwrap_or_default(),
		error_type: error_type_at(object).ok()?,
		error_reporting_thread: object
			.get("errorReportingThread")
			.and_then(Value::as_bool)
			.unwrap_or(false),
		state: string_at(object, "state"),
		stacktrace: frames_from_value(object.get("stacktrace")),
	})
}

/// Commands recording the crash-specific parts of `event`.
///
/// Context such as breadcrumbs and the user is already in the journal from
/// earlier state changes and is not repeated.
pub fn event_to_commands(event: &Event) -> Result<Vec<Command>> {
	let exceptions: Vec<Value> = event.exceptions.iter().map(exception_to_value).collect();
	let threads: Vec<Value> = event.threads.iter().map(thread_to_value).collect();
	let commands = vec![
		Command::set(EXCEPTIONS, exceptions)?,
		Command::set(THREADS, threads)?,
		Command::set(SEVERITY, event.severity.to_string())?,
		Command::set(
			SEVERITY_REASON,
			json!({
				"type": event.severity_reason.reason_type,
				"unhandledOverridden": event.severity_reason.unhandled_overridden,
			}),
		)?,
		Command::set(UNHANDLED, event.unhandled)?,
		Command::set(TIMESTAMP, format_timestamp(&event.timestamp))?,
	];
	Ok(commands)
}

/// Rebuilds the event a previous run was about to report.
///
/// `Ok(None)` means the document holds no crash: the previous run either
/// ended cleanly or already persisted its crash to the queue.
pub fn document_to_event(document: &Document) -> Result<Option<Event>> {
	let api_key = document
		.get(API_KEY)
		.and_then(Value::as_str)
		.filter(|key| !key.is_empty())
		.ok_or_else(|| CrashSdkError::InvalidDocument("missing apiKey".to_string()))?
		.to_string();

	let Some(raw_exceptions) = document
		.get(EXCEPTIONS)
		.and_then(Value::as_array)
		.filter(|list| !list.is_empty())
	else {
		return Ok(None);
	};
	let exceptions = raw_exceptions
		.iter()
		.map(exception_from_value)
		.collect::<Result<Vec<_>>>()?;

	let breadcrumbs: Vec<Breadcrumb> = document
		.get(BREADCRUMBS)
		.and_then(Value::as_array)
		.map(|list| list.iter().filter_map(breadcrumb_from_value).collect())
		.unwrap_or_default();
	let threads: Vec<Thread> = document
		.get(THREADS)
		.and_then(Value::as_array)
		.map(|list| list.iter().filter_map(thread_from_value).collect())
		.unwrap_or_default();

	let mut metadata = Metadata::new();
	if let Some(sections) = document.get(METADATA).and_then(Value::as_object) {
		for (section, values) in sections {
			match values.as_object() {
				Some(values) => {
					metadata.insert(section.clone(), values.clone());
				}
				None => warn!(section = %section, "skipping metadata section that is not a map"),
			}
		}
	}

	let severity = document
		.get(SEVERITY)
		.and_then(Value::as_str)
		.and_then(|s| s.parse::<Severity>().ok())
		.unwrap_or(Severity::Error);
	let severity_reason = document
		.get(SEVERITY_REASON)
		.and_then(Value::as_object)
		.map(|reason| SeverityReason {
			reason_type: string_at(reason, "type").unwrap_or_else(|| "unhandledException".to_string()),
			unhandled_overridden: reason
				.get("unhandledOverridden")
				.and_then(Value::as_bool)
				.unwrap_or(false),
		})
		.unwrap_or_else(|| SeverityReason::new("unhandledException"));

	let map_at = |key: &str| {
		document
			.get(key)
			.and_then(Value::as_object)
			.cloned()
			.unwrap_or_default()
	};

	Ok(Some(Event {
		id: EventId::new(),
		api_key,
		timestamp: parse_timestamp(document.get(TIMESTAMP)).unwrap_or_else(Utc::now),
		severity,
		severity_reason,
		unhandled: document.get(UNHANDLED).and_then(Value::as_bool).unwrap_or(true),
		context: document.get(CONTEXT).and_then(Value::as_str).map(str::to_string),
		grouping_hash: None,
		user: user_from_value(document.get(USER)),
		app: map_at(APP),
		device: map_at(DEVICE),
		metadata,
		breadcrumbs,
		threads,
		exceptions,
		session: session_from_value(document.get(SESSION)),
	}))
}
