// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Journal commands: a path plus the value to store there.
//!
//! On the wire a command is a one-entry JSON object `{"<path>": <value>}`.

use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{JournalError, Result};
use crate::path::DocumentPath;

#[derive(Debug, Clone, PartialEq)]
pub struct Command {
	path: DocumentPath,
	value: Value,
}

impl Command {
	pub fn new(path: &str, value: impl Into<Value>) -> Result<Self> {
		let path = DocumentPath::parse(path)?;
		let value = value.into();
		if path.is_increment() && !value.is_number() {
			return Err(JournalError::NonNumericIncrement {
				path: path.to_string(),
			});
		}
		Ok(Self { path, value })
	}

	/// Alias of [`Command::new`] that reads better next to `delete`/`increment`.
	pub fn set(path: &str, value: impl Into<Value>) -> Result<Self> {
		Self::new(path, value)
	}

	pub fn delete(path: &str) -> Result<Self> {
		Self::new(path, Value::Null)
	}

	pub fn increment(path: &str, by: i64) -> Result<Self> {
		Self::new(&format!("{path}+"), by)
	}

	/// Appends `value` to the list at `path`.
	pub fn append(path: &str, value: impl Into<Value>) -> Result<Self> {
		Self::new(&format!("{path}.-1"), value)
	}

	pub fn from_parts(path: DocumentPath, value: Value) -> Self {
		Self { path, value }
	}

	pub fn path(&self) -> &DocumentPath {
		&self.path
	}

	pub fn value(&self) -> &Value {
		&self.value
	}

	pub fn is_delete(&self) -> bool {
		self.value.is_null()
	}

	/// Splits a map value into one command per leaf.
	///
	/// Commands whose path appends to a list are never split, since every
	/// leaf would otherwise land in its own new element.
	pub fn flatten(&self) -> Vec<Command> {
		let mut out = Vec::new();
		self.flatten_into(&mut out);
		out
	}

	fn flatten_into(&self, out: &mut Vec<Command>) {
		let map = match &self.value {
			Value::Object(map) if !map.is_empty() && !self.path.has_append() && !self.path.is_increment() => map,
			_ => {
				out.push(self.clone());
				return;
			}
		};

		for (key, value) in map {
			if key.is_empty() {
				warn!(path = %self.path, "dropping empty map key from journal command");
				continue;
			}
			Command::from_parts(self.path.child(key.clone()), value.clone()).flatten_into(out);
		}
	}

	pub fn to_wire(&self) -> Result<Vec<u8>> {
		if !self.path.is_addressable() {
			return Err(JournalError::InvalidPath {
				path: self.path.to_string(),
				reason: "empty key cannot be addressed".to_string(),
			});
		}
		let mut map = Map::new();
		map.insert(self.path.to_string(), self.value.clone());
		Ok(serde_json::to_vec(&Value::Object(map))?)
	}

	pub fn from_wire(bytes: &[u8]) -> Result<Self> {
		let value: Value = serde_json::from_slice(bytes)?;
		let Value::Object(map) = value else {
			return Err(JournalError::MalformedCommand("not a JSON object".to_string()));
		};
		if map.len() != 1 {
			return Err(JournalError::MalformedCommand(format!(
				"expected one entry, found {}",
				map.len()
			)));
		}
		let Some((path, value)) = map.into_iter().next() else {
			return Err(JournalError::MalformedCommand("empty object".to_string()));
		};
		Self::new(&path, value)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn wire_form_is_a_single_entry_object() {
		let command = Command::set("user.name", "ada").unwrap();
		let wire = command.to_wire().unwrap();
		assert_eq!(wire, br#"{"user.name":"ada"}"#);
		assert_eq!(Command::from_wire(&wire).unwrap(), command);
	}

	#[test]
	fn from_wire_rejects_non_commands() {
		assert!(Command::from_wire(b"[1]").is_err());
		assert!(Command::from_wire(br#"{"a":1,"b":2}"#).is_err());
		assert!(Command::from_wire(br#"{"":1}"#).is_err());
		assert!(Command::from_wire(b"{\"a\":").is_err());
	}

	#[test]
	fn to_wire_rejects_empty_keys() {
		let path = DocumentPath::key("metaData").child("http").child("");
		let command = Command::from_parts(path, json!("x"));
		assert!(matches!(command.to_wire(), Err(JournalError::InvalidPath { .. })));
	}

	#[test]
	fn increment_requires_a_number() {
		assert!(Command::new("count+", "x").is_err());
		let command = Command::increment("session.events.handled", 1).unwrap();
		assert_eq!(command.path().to_string(), "session.events.handled+");
	}

	#[test]
	fn flatten_splits_nested_maps_into_leaves() {
		let command = Command::set("app", json!({"name": "demo", "build": {"id": 7}, "v.1": true})).unwrap();
		let paths: Vec<String> = command.flatten().iter().map(|c| c.path().to_string()).collect();
		assert_eq!(paths, vec!["app.build.id", "app.name", r"app.v\.1"]);
	}

	#[test]
	fn flatten_keeps_appended_maps_whole() {
		let command = Command::append("breadcrumbs", json!({"name": "tap", "type": "user"})).unwrap();
		let flattened = command.flatten();
		assert_eq!(flattened, vec![command]);
	}

	#[test]
	fn flatten_keeps_empty_maps() {
		let command = Command::set("metaData", json!({})).unwrap();
		assert_eq!(command.flatten(), vec![command]);
	}
}
