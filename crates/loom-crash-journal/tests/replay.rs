// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::fs;

use loom_crash_journal::log::parse_log;
use loom_crash_journal::{escape_key, load_previous_document, Command, Document, Journal, JournalConfig};
use proptest::prelude::*;
use serde_json::{json, Value};
use tempfile::TempDir;

fn config(dir: &TempDir) -> JournalConfig {
	JournalConfig::new(dir.path().join("loom-crash"), "loom-crash", 1)
		.with_buffer_size(64 * 1024)
		.with_high_water_mark(48 * 1024)
}

const KEYS: &[&str] = &["a", "b", "user", "metaData", "count"];

/// Literal map keys that collide with path syntax unless escaped.
const AWKWARD_KEYS: &[&str] = &["x.request.id", r"C:\tmp", "404", "-1", "a+", "+", ".", "0"];

fn arb_key() -> impl Strategy<Value = String> {
	prop_oneof![
		3 => prop::sample::select(KEYS).prop_map(str::to_string),
		1 => prop::sample::select(AWKWARD_KEYS).prop_map(str::to_string),
		1 => "[a-z.+\\\\0-9-]{1,6}",
	]
	.prop_map(|key| escape_key(&key))
}

fn arb_command() -> impl Strategy<Value = Command> {
	let segment = prop_oneof![
		2 => arb_key(),
		1 => (0usize..3).prop_map(|i| i.to_string()),
		1 => Just("-1".to_string()),
	];
	let path = (arb_key(), prop::collection::vec(segment, 0..3)).prop_map(|(head, tail)| {
		std::iter::once(head)
			.chain(tail)
			.collect::<Vec<_>>()
			.join(".")
	})
	.boxed();
	let value = prop_oneof![
		Just(Value::Null),
		any::<bool>().prop_map(Value::from),
		(-100i64..100).prop_map(Value::from),
		"[a-z]{0,4}".prop_map(Value::from),
	];

	prop_oneof![
		(path.clone(), value).prop_map(|(p, v)| Command::new(&p, v).unwrap()),
		(path, -5i64..5).prop_filter_map("appends cannot be incremented", |(p, n)| {
			Command::new(&format!("{p}+"), n).ok()
		}),
	]
}

fn replay(commands: &[Command]) -> Document {
	let mut doc = Document::new();
	doc.apply_all(commands);
	doc
}

#[test]
fn end_to_end_scenario() {
	let dir = TempDir::new().unwrap();
	let config = config(&dir);
	let journal = Journal::open(config.clone(), Document::new());

	journal.append(Command::new("a", 1).unwrap());
	journal.append(Command::new("a.b.-1", 1).unwrap());
	journal.append(Command::new("b.-1.", "x").unwrap());

	let mut expected = json!({"a": {"b": [1]}, "b": [["x"]]});
	let doc = journal.current_document();
	let version_info = doc.get("version-info").cloned().unwrap();
	expected["version-info"] = version_info;
	assert_eq!(doc.as_value(), &expected);

	let loaded = load_previous_document(&config).unwrap().unwrap();
	assert_eq!(loaded.as_value(), &expected);
}

#[test]
fn recovery_after_kill_restores_event_fields() {
	let dir = TempDir::new().unwrap();
	let config = config(&dir);

	{
		let journal = Journal::open(config.clone(), Document::new());
		journal.append(Command::set("apiKey", "0123456789abcdef0123456789abcdef").unwrap());
		journal.append(Command::set("user", json!({"id": "u-1", "email": "ada@example.com"})).unwrap());
		for i in 0..3 {
			journal.append(
				Command::append(
					"breadcrumbs",
					json!({
						"name": format!("crumb {i}"),
						"type": "navigation",
						"timestamp": "2025-01-01T00:00:00Z",
						"metaData": {"step": i},
					}),
				)
				.unwrap(),
			);
		}
		// Dropped without snapshot or discard, as a killed process would be.
	}

	let loaded = load_previous_document(&config).unwrap().unwrap();
	assert_eq!(loaded.get("apiKey"), Some(&json!("0123456789abcdef0123456789abcdef")));
	assert_eq!(loaded.pointer("user.email"), Some(&json!("ada@example.com")));
	let breadcrumbs = loaded.get("breadcrumbs").and_then(Value::as_array).unwrap();
	assert_eq!(breadcrumbs.len(), 3);
	assert_eq!(breadcrumbs[2]["name"], json!("crumb 2"));
	assert_eq!(breadcrumbs[2]["metaData"]["step"], json!(2));
}

#[test]
fn torn_tail_in_the_log_file_is_ignored() {
	let dir = TempDir::new().unwrap();
	let config = config(&dir);
	let journal = Journal::open(config.clone(), Document::new());
	journal.append(Command::set("kept", true).unwrap());
	let expected = journal.current_document();
	let used = journal.log_len();
	drop(journal);

	let mut bytes = fs::read(config.journal_path()).unwrap();
	let torn = br#"{"lost":tru"#;
	bytes[used..used + torn.len()].copy_from_slice(torn);
	fs::write(config.journal_path(), &bytes).unwrap();

	let loaded = load_previous_document(&config).unwrap().unwrap();
	assert_eq!(&loaded, expected.as_ref());
}

proptest! {
	#![proptest_config(ProptestConfig::with_cases(64))]

	#[test]
	fn replay_is_deterministic(commands in prop::collection::vec(arb_command(), 0..24)) {
		let first = replay(&commands).to_json_bytes().unwrap();
		let second = replay(&commands).to_json_bytes().unwrap();
		prop_assert_eq!(first, second);
	}

	#[test]
	fn truncated_logs_replay_a_prefix(
		commands in prop::collection::vec(arb_command(), 1..16),
		cut in any::<prop::sample::Index>(),
	) {
		let mut bytes = Vec::new();
		let mut record_ends = Vec::new();
		for command in &commands {
			bytes.extend(command.to_wire().unwrap());
			record_ends.push(bytes.len());
			bytes.push(0);
		}

		let cut = cut.index(bytes.len() + 1);
		let mut truncated = bytes[..cut].to_vec();
		truncated.resize(bytes.len() + 16, 0);

		let complete = record_ends.iter().filter(|end| **end <= cut).count();
		let parsed = parse_log(&truncated);
		prop_assert_eq!(&parsed[..], &commands[..complete]);
		prop_assert_eq!(replay(&parsed), replay(&commands[..complete]));
	}

	#[test]
	fn live_document_equals_the_replayed_one(commands in prop::collection::vec(arb_command(), 1..24)) {
		let dir = TempDir::new().unwrap();
		let config = config(&dir);
		let journal = Journal::open(config.clone(), Document::new());
		for command in &commands {
			journal.append(command.clone());
		}

		let loaded = load_previous_document(&config).unwrap().unwrap();
		let current = journal.current_document();
		prop_assert_eq!(&loaded, current.as_ref());
	}

	#[test]
	fn snapshot_then_tail_equals_full_replay(
		commands in prop::collection::vec(arb_command(), 1..24),
		split in any::<prop::sample::Index>(),
	) {
		let split = split.index(commands.len() + 1);
		let dir = TempDir::new().unwrap();
		let config = config(&dir);

		let journal = Journal::open(config.clone(), Document::new());
		journal.append_batch(commands[..split].iter().cloned());
		prop_assert!(journal.snapshot());
		journal.append_batch(commands[split..].iter().cloned());

		let loaded = load_previous_document(&config).unwrap().unwrap();
		let mut expected = replay(&commands);
		if let Some(info) = loaded.version_info() {
			expected.set_version_info(&info);
		}
		prop_assert_eq!(loaded, expected);
	}
}
