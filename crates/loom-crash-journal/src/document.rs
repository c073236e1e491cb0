// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The in-memory document a journal maintains.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use tracing::warn;

use crate::command::Command;
use crate::error::{JournalError, Result};
use crate::path::PathSegment;

/// Top-level key holding [`VersionInfo`].
pub const VERSION_INFO_KEY: &str = "version-info";

/// Identifies which journal wrote a document and which compaction generation it is in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
	#[serde(rename = "type")]
	pub journal_type: String,
	pub version: u64,
	#[serde(default)]
	pub generation: u64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
	root: Value,
}

enum Op<'a> {
	Set(&'a Value),
	Delete,
	Merge(&'a Map<String, Value>),
	Increment(&'a Number),
}

impl Document {
	pub fn new() -> Self {
		Self {
			root: Value::Object(Map::new()),
		}
	}

	pub fn with_seed(seed: Map<String, Value>) -> Self {
		Self {
			root: Value::Object(seed),
		}
	}

	pub fn from_value(value: Value) -> Result<Self> {
		match value {
			Value::Object(map) => Ok(Self::with_seed(map)),
			other => Err(JournalError::TypeMismatch {
				path: String::new(),
				expected: "map",
				found: kind(&other),
			}),
		}
	}

	pub fn as_value(&self) -> &Value {
		&self.root
	}

	pub fn into_map(self) -> Map<String, Value> {
		match self.root {
			Value::Object(map) => map,
			_ => Map::new(),
		}
	}

	pub fn get(&self, key: &str) -> Option<&Value> {
		self.root.get(key)
	}

	/// Looks up a value by dotted path, e.g. `session.events.handled`.
	pub fn pointer(&self, dotted: &str) -> Option<&Value> {
		let path = crate::path::DocumentPath::parse(dotted).ok()?;
		let mut node = &self.root;
		for segment in path.segments() {
			node = match (segment, node) {
				(PathSegment::Key(key), Value::Object(map)) => map.get(key)?,
				(PathSegment::Index(index), Value::Array(list)) => list.get(*index)?,
				_ => return None,
			};
		}
		Some(node)
	}

	pub fn version_info(&self) -> Option<VersionInfo> {
		self
			.get(VERSION_INFO_KEY)
			.and_then(|v| serde_json::from_value(v.clone()).ok())
	}

	pub fn set_version_info(&mut self, info: &VersionInfo) {
		if let (Value::Object(map), Ok(value)) = (&mut self.root, serde_json::to_value(info)) {
			map.insert(VERSION_INFO_KEY.to_string(), value);
		}
	}

	pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
		Ok(serde_json::to_vec(&self.root)?)
	}

	/// Applies a single command. On error the document is unchanged.
	pub fn apply(&mut self, command: &Command) -> Result<()> {
		let op = match command.value() {
			Value::Null => Op::Delete,
			Value::Object(map) if !command.path().is_increment() => Op::Merge(map),
			Value::Number(n) if command.path().is_increment() => Op::Increment(n),
			_ if command.path().is_increment() => {
				return Err(JournalError::NonNumericIncrement {
					path: command.path().to_string(),
				})
			}
			value => Op::Set(value),
		};
		let display = command.path().to_string();
		apply_at(&mut self.root, command.path().segments(), &op, &display)
	}

	/// Applies commands in order, logging and skipping the ones that fail.
	///
	/// Returns how many commands were skipped.
	pub fn apply_all<'a>(&mut self, commands: impl IntoIterator<Item = &'a Command>) -> usize {
		let mut skipped = 0;
		for command in commands {
			if let Err(e) = self.apply(command) {
				warn!(path = %command.path(), error = %e, "skipping journal command");
				skipped += 1;
			}
		}
		skipped
	}
}

fn kind(value: &Value) -> &'static str {
	match value {
		Value::Null => "null",
		Value::Bool(_) => "bool",
		Value::Number(_) => "number",
		Value::String(_) => "string",
		Value::Array(_) => "list",
		Value::Object(_) => "map",
	}
}

/// Makes `node` the container `segment` needs. Scalars are replaced, a
/// container of the other kind is an error.
fn ensure_container(node: &mut Value, segment: &PathSegment, path: &str) -> Result<()> {
	match (segment.addresses_list(), &*node) {
		(false, Value::Object(_)) | (true, Value::Array(_)) => Ok(()),
		(false, Value::Array(_)) => Err(JournalError::TypeMismatch {
			path: path.to_string(),
			expected: "map",
			found: "list",
		}),
		(true, Value::Object(_)) => Err(JournalError::TypeMismatch {
			path: path.to_string(),
			expected: "list",
			found: "map",
		}),
		(is_list, _) => {
			*node = if is_list {
				Value::Array(Vec::new())
			} else {
				Value::Object(Map::new())
			};
			Ok(())
		}
	}
}

fn fits(node: &Value, segment: &PathSegment) -> bool {
	match node {
		Value::Object(_) => !segment.addresses_list(),
		Value::Array(_) => segment.addresses_list(),
		_ => false,
	}
}

fn pad(list: &mut Vec<Value>, index: usize) {
	if list.len() <= index {
		list.resize(index + 1, Value::Null);
	}
}

fn apply_at(node: &mut Value, segments: &[PathSegment], op: &Op<'_>, path: &str) -> Result<()> {
	let Some((segment, rest)) = segments.split_first() else {
		return Ok(());
	};

	// Nothing to delete below a scalar or a container of the other kind.
	if matches!(op, Op::Delete) && !fits(node, segment) {
		return Ok(());
	}
	ensure_container(node, segment, path)?;

	if rest.is_empty() {
		return apply_leaf(node, segment, op, path);
	}

	let child = match (segment, node) {
		(PathSegment::Key(key), Value::Object(map)) => {
			if matches!(op, Op::Delete) && !map.contains_key(key) {
				return Ok(());
			}
			map.entry(key.clone()).or_insert(Value::Null)
		}
		(PathSegment::Index(index), Value::Array(list)) => {
			if matches!(op, Op::Delete) && *index >= list.len() {
				return Ok(());
			}
			pad(list, *index);
			&mut list[*index]
		}
		(PathSegment::Append, Value::Array(list)) => {
			if matches!(op, Op::Delete) {
				return Ok(());
			}
			list.push(Value::Null);
			let last = list.len() - 1;
			&mut list[last]
		}
		_ => return Ok(()),
	};

	if !matches!(op, Op::Delete) {
		// Commands that would fail further down must not leave new
		// intermediate nodes behind, so check the rest of the path first.
		check_path(child, rest, path)?;
	}
	apply_at(child, rest, op, path)
}

/// Verifies that no existing container along `segments` has the wrong kind.
fn check_path(node: &Value, segments: &[PathSegment], path: &str) -> Result<()> {
	let Some((segment, rest)) = segments.split_first() else {
		return Ok(());
	};
	let next = match (segment, node) {
		(PathSegment::Key(_), Value::Array(_)) => {
			return Err(JournalError::TypeMismatch {
				path: path.to_string(),
				expected: "map",
				found: "list",
			})
		}
		(PathSegment::Index(_) | PathSegment::Append, Value::Object(_)) => {
			return Err(JournalError::TypeMismatch {
				path: path.to_string(),
				expected: "list",
				found: "map",
			})
		}
		(PathSegment::Key(key), Value::Object(map)) => map.get(key),
		(PathSegment::Index(index), Value::Array(list)) => list.get(*index),
		_ => None,
	};
	match next {
		Some(next) => check_path(next, rest, path),
		None => Ok(()),
	}
}

fn apply_leaf(node: &mut Value, segment: &PathSegment, op: &Op<'_>, path: &str) -> Result<()> {
	match (segment, node) {
		(PathSegment::Key(key), Value::Object(map)) => match op {
			Op::Set(value) => {
				map.insert(key.clone(), (*value).clone());
				Ok(())
			}
			Op::Delete => {
				map.remove(key);
				Ok(())
			}
			Op::Merge(source) => {
				let slot = map.entry(key.clone()).or_insert(Value::Null);
				merge(slot, source, path)
			}
			Op::Increment(delta) => {
				let sum = add(map.get(key), delta, path)?;
				map.insert(key.clone(), sum);
				Ok(())
			}
		},
		(PathSegment::Index(index), Value::Array(list)) => match op {
			Op::Set(value) => {
				pad(list, *index);
				list[*index] = (*value).clone();
				Ok(())
			}
			Op::Delete => {
				if *index < list.len() {
					list.remove(*index);
				}
				Ok(())
			}
			Op::Merge(source) => {
				pad(list, *index);
				merge(&mut list[*index], source, path)
			}
			Op::Increment(delta) => {
				let sum = add(list.get(*index), delta, path)?;
				pad(list, *index);
				list[*index] = sum;
				Ok(())
			}
		},
		(PathSegment::Append, Value::Array(list)) => match op {
			Op::Set(value) => {
				list.push((*value).clone());
				Ok(())
			}
			Op::Merge(source) => {
				let mut element = Value::Null;
				merge_unchecked(&mut element, source);
				list.push(element);
				Ok(())
			}
			Op::Delete => Ok(()),
			Op::Increment(_) => Err(JournalError::InvalidPath {
				path: path.to_string(),
				reason: "cannot increment an appended element".to_string(),
			}),
		},
		_ => Ok(()),
	}
}

/// Deep-merges `source` into `target`, which becomes a map if it was a scalar.
fn merge(target: &mut Value, source: &Map<String, Value>, path: &str) -> Result<()> {
	check_merge(target, source, path)?;
	merge_unchecked(target, source);
	Ok(())
}

fn check_merge(target: &Value, source: &Map<String, Value>, path: &str) -> Result<()> {
	match target {
		Value::Array(_) => Err(JournalError::TypeMismatch {
			path: path.to_string(),
			expected: "map",
			found: "list",
		}),
		Value::Object(existing) => {
			for (key, value) in source {
				if let (Value::Object(nested), Some(current)) = (value, existing.get(key)) {
					check_merge(current, nested, path)?;
				}
			}
			Ok(())
		}
		_ => Ok(()),
	}
}

fn merge_unchecked(target: &mut Value, source: &Map<String, Value>) {
	if !target.is_object() {
		*target = Value::Object(Map::new());
	}
	let Value::Object(existing) = target else {
		return;
	};
	for (key, value) in source {
		match value {
			Value::Null => {
				existing.remove(key);
			}
			Value::Object(nested) => {
				let slot = existing.entry(key.clone()).or_insert(Value::Null);
				merge_unchecked(slot, nested);
			}
			other => {
				existing.insert(key.clone(), other.clone());
			}
		}
	}
}

fn add(current: Option<&Value>, delta: &Number, path: &str) -> Result<Value> {
	let current = match current {
		None | Some(Value::Null) => return Ok(Value::Number(delta.clone())),
		Some(Value::Number(n)) => n,
		Some(_) => {
			return Err(JournalError::NonNumericIncrement {
				path: path.to_string(),
			})
		}
	};

	if let (Some(a), Some(b)) = (current.as_i64(), delta.as_i64()) {
		return a
			.checked_add(b)
			.map(|sum| Value::Number(sum.into()))
			.ok_or_else(|| JournalError::IncrementOverflow {
				path: path.to_string(),
			});
	}

	let sum = current.as_f64().unwrap_or(0.0) + delta.as_f64().unwrap_or(0.0);
	Number::from_f64(sum)
		.map(Value::Number)
		.ok_or_else(|| JournalError::IncrementOverflow {
			path: path.to_string(),
		})
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn apply(doc: &mut Document, path: &str, value: Value) -> Result<()> {
		doc.apply(&Command::new(path, value).unwrap())
	}

	#[test]
	fn set_creates_intermediate_maps() {
		let mut doc = Document::new();
		apply(&mut doc, "app.build.id", json!(7)).unwrap();
		assert_eq!(doc.as_value(), &json!({"app": {"build": {"id": 7}}}));
	}

	#[test]
	fn index_past_end_pads_with_null() {
		let mut doc = Document::new();
		apply(&mut doc, "list.2", json!("c")).unwrap();
		assert_eq!(doc.as_value(), &json!({"list": [null, null, "c"]}));
	}

	#[test]
	fn append_pushes_new_elements() {
		let mut doc = Document::new();
		apply(&mut doc, "crumbs.-1", json!({"name": "a"})).unwrap();
		apply(&mut doc, "crumbs.", json!({"name": "b"})).unwrap();
		assert_eq!(doc.as_value(), &json!({"crumbs": [{"name": "a"}, {"name": "b"}]}));
	}

	#[test]
	fn delete_removes_keys_and_elements() {
		let mut doc = Document::with_seed(
			json!({"a": {"b": 1, "c": 2}, "l": [1, 2, 3]})
				.as_object()
				.cloned()
				.unwrap(),
		);
		apply(&mut doc, "a.b", Value::Null).unwrap();
		apply(&mut doc, "l.1", Value::Null).unwrap();
		apply(&mut doc, "missing.deep", Value::Null).unwrap();
		apply(&mut doc, "l.-1", Value::Null).unwrap();
		assert_eq!(doc.as_value(), &json!({"a": {"c": 2}, "l": [1, 3]}));
	}

	#[test]
	fn increment_defaults_absent_to_zero() {
		let mut doc = Document::new();
		apply(&mut doc, "session.events.handled+", json!(1)).unwrap();
		apply(&mut doc, "session.events.handled+", json!(2)).unwrap();
		assert_eq!(doc.pointer("session.events.handled"), Some(&json!(3)));

		apply(&mut doc, "ratio+", json!(0.5)).unwrap();
		apply(&mut doc, "ratio+", json!(1)).unwrap();
		assert_eq!(doc.pointer("ratio"), Some(&json!(1.5)));
	}

	#[test]
	fn increment_of_non_number_fails_without_change() {
		let mut doc = Document::new();
		apply(&mut doc, "name", json!("x")).unwrap();
		let before = doc.clone();
		assert!(matches!(
			apply(&mut doc, "name+", json!(1)),
			Err(JournalError::NonNumericIncrement { .. })
		));
		assert_eq!(doc, before);
	}

	#[test]
	fn increment_overflow_is_an_error() {
		let mut doc = Document::new();
		apply(&mut doc, "n", json!(i64::MAX)).unwrap();
		assert!(matches!(
			apply(&mut doc, "n+", json!(1)),
			Err(JournalError::IncrementOverflow { .. })
		));
	}

	#[test]
	fn scalars_are_replaced_by_containers() {
		let mut doc = Document::new();
		apply(&mut doc, "a", json!(1)).unwrap();
		apply(&mut doc, "a.b.0", json!(1)).unwrap();
		apply(&mut doc, "b.0.0", json!("x")).unwrap();
		assert_eq!(doc.as_value(), &json!({"a": {"b": [1]}, "b": [["x"]]}));
	}

	#[test]
	fn container_kind_mismatch_fails_without_change() {
		let mut doc = Document::new();
		apply(&mut doc, "m.k", json!(1)).unwrap();
		apply(&mut doc, "l.0", json!(1)).unwrap();
		let before = doc.clone();

		assert!(matches!(apply(&mut doc, "m.0", json!(2)), Err(JournalError::TypeMismatch { .. })));
		assert!(matches!(apply(&mut doc, "l.k", json!(2)), Err(JournalError::TypeMismatch { .. })));
		assert_eq!(doc, before);
	}

	#[test]
	fn delete_through_mismatched_container_is_a_no_op() {
		let mut doc = Document::new();
		apply(&mut doc, "l.0", json!(1)).unwrap();
		let before = doc.clone();
		apply(&mut doc, "l.k", Value::Null).unwrap();
		apply(&mut doc, "l.0.x", Value::Null).unwrap();
		assert_eq!(doc, before);
	}

	#[test]
	fn failing_command_leaves_no_new_intermediates() {
		let mut doc = Document::new();
		apply(&mut doc, "a.l.0", json!(1)).unwrap();
		let before = doc.clone();
		assert!(apply(&mut doc, "a.l.k", json!({"x": 1})).is_err());
		assert_eq!(doc, before);
	}

	#[test]
	fn merging_a_map_matches_its_flattened_form() {
		let seed = json!({"app": {"name": "old", "keep": true}});
		let value = json!({"name": "new", "build": {"id": 7}, "keep": null});

		let mut merged = Document::from_value(seed.clone()).unwrap();
		apply(&mut merged, "app", value.clone()).unwrap();

		let mut flattened = Document::from_value(seed).unwrap();
		let command = Command::new("app", value).unwrap();
		assert_eq!(flattened.apply_all(&command.flatten()), 0);

		assert_eq!(merged, flattened);
		assert_eq!(merged.as_value(), &json!({"app": {"name": "new", "build": {"id": 7}}}));
	}

	#[test]
	fn version_info_roundtrips() {
		let mut doc = Document::new();
		let info = VersionInfo {
			journal_type: "loom-crash".to_string(),
			version: 1,
			generation: 3,
		};
		doc.set_version_info(&info);
		assert_eq!(doc.version_info(), Some(info));
		assert_eq!(doc.pointer("version-info.generation"), Some(&json!(3)));
	}
}
