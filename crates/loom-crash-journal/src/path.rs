// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Dotted paths addressing a location inside a journal document.
//!
//! Grammar:
//!
//! - segments are separated by `.`
//! - `\` escapes the next character, so `\.` is a literal dot and `\\` a
//!   literal backslash; an escaped segment is always a map key
//! - an unescaped non-negative integer addresses a list index
//! - an unescaped `-1` or empty segment appends to a list
//! - an unescaped trailing `+` marks the command as a numeric increment

use std::fmt;

use crate::error::{JournalError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
	Key(String),
	Index(usize),
	Append,
}

impl PathSegment {
	/// Whether this segment needs a list (as opposed to a map) to apply to.
	pub fn addresses_list(&self) -> bool {
		!matches!(self, Self::Key(_))
	}
}

/// A parsed command path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentPath {
	segments: Vec<PathSegment>,
	increment: bool,
}

impl DocumentPath {
	pub fn parse(raw: &str) -> Result<Self> {
		if raw.is_empty() {
			return Err(JournalError::EmptyPath);
		}

		let invalid = |reason: &str| JournalError::InvalidPath {
			path: raw.to_string(),
			reason: reason.to_string(),
		};

		let mut segments = Vec::new();
		let mut current = String::new();
		let mut escaped = false;
		let mut increment = false;
		let mut chars = raw.chars().peekable();

		while let Some(c) = chars.next() {
			match c {
				'\\' => match chars.next() {
					Some(next) => {
						current.push(next);
						escaped = true;
					}
					None => return Err(invalid("dangling escape")),
				},
				'.' => {
					segments.push(classify(std::mem::take(&mut current), escaped, raw)?);
					escaped = false;
				}
				'+' if chars.peek().is_none() => increment = true,
				_ => current.push(c),
			}
		}
		segments.push(classify(current, escaped, raw)?);

		match segments.first() {
			Some(PathSegment::Key(_)) => {}
			_ => return Err(invalid("path must start with a key")),
		}
		if increment && matches!(segments.last(), Some(PathSegment::Append)) {
			return Err(invalid("cannot increment an appended element"));
		}

		Ok(Self {
			segments,
			increment,
		})
	}

	/// A single-segment path addressing a top-level key.
	pub fn key(key: impl Into<String>) -> Self {
		Self {
			segments: vec![PathSegment::Key(key.into())],
			increment: false,
		}
	}

	/// This path extended by one more map key.
	pub fn child(&self, key: impl Into<String>) -> Self {
		let mut segments = self.segments.clone();
		segments.push(PathSegment::Key(key.into()));
		Self {
			segments,
			increment: false,
		}
	}

	pub fn segments(&self) -> &[PathSegment] {
		&self.segments
	}

	pub fn is_increment(&self) -> bool {
		self.increment
	}

	pub fn has_append(&self) -> bool {
		self.segments.iter().any(|s| *s == PathSegment::Append)
	}

	/// False if any key is empty. Such a path has no written form that
	/// parses back to it, so it can't be journaled.
	pub fn is_addressable(&self) -> bool {
		!self
			.segments
			.iter()
			.any(|s| matches!(s, PathSegment::Key(key) if key.is_empty()))
	}
}

fn classify(text: String, escaped: bool, raw: &str) -> Result<PathSegment> {
	if escaped {
		return Ok(PathSegment::Key(text));
	}
	if text.is_empty() || text == "-1" {
		return Ok(PathSegment::Append);
	}
	if text.bytes().all(|b| b.is_ascii_digit()) {
		return text
			.parse::<usize>()
			.map(PathSegment::Index)
			.map_err(|_| JournalError::InvalidPath {
				path: raw.to_string(),
				reason: format!("index {text} out of range"),
			});
	}
	Ok(PathSegment::Key(text))
}

/// Escapes a literal map key so it survives a round trip through [`DocumentPath::parse`].
///
/// Empty keys have no escaped form and cannot be addressed by a path.
pub fn escape_key(key: &str) -> String {
	let mut out = String::with_capacity(key.len() + 1);
	let looks_special = key == "-1" || (!key.is_empty() && key.bytes().all(|b| b.is_ascii_digit()));
	if looks_special {
		out.push('\\');
	}
	for c in key.chars() {
		if matches!(c, '.' | '\\' | '+') {
			out.push('\\');
		}
		out.push(c);
	}
	out
}

impl fmt::Display for DocumentPath {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		for (i, segment) in self.segments.iter().enumerate() {
			if i > 0 {
				f.write_str(".")?;
			}
			match segment {
				PathSegment::Key(key) => f.write_str(&escape_key(key))?,
				PathSegment::Index(index) => write!(f, "{index}")?,
				PathSegment::Append => f.write_str("-1")?,
			}
		}
		if self.increment {
			f.write_str("+")?;
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	fn key(k: &str) -> PathSegment {
		PathSegment::Key(k.to_string())
	}

	#[test]
	fn parses_keys_indexes_and_appends() {
		let path = DocumentPath::parse("breadcrumbs.-1").unwrap();
		assert_eq!(path.segments(), &[key("breadcrumbs"), PathSegment::Append]);
		assert!(path.has_append());

		let path = DocumentPath::parse("threads.2.name").unwrap();
		assert_eq!(path.segments(), &[key("threads"), PathSegment::Index(2), key("name")]);

		let path = DocumentPath::parse("a.").unwrap();
		assert_eq!(path.segments(), &[key("a"), PathSegment::Append]);
	}

	#[test]
	fn trailing_plus_marks_increment() {
		let path = DocumentPath::parse("session.events.handled+").unwrap();
		assert!(path.is_increment());
		assert_eq!(path.segments().last(), Some(&key("handled")));
	}

	#[test]
	fn escapes_produce_literal_keys() {
		let path = DocumentPath::parse(r"metaData.com\.example.size\+").unwrap();
		assert!(!path.is_increment());
		assert_eq!(path.segments(), &[key("metaData"), key("com.example"), key("size+")]);

		let path = DocumentPath::parse(r"codes.\404").unwrap();
		assert_eq!(path.segments(), &[key("codes"), key("404")]);
		assert_eq!(escape_key("404"), r"\404");
		assert_eq!(escape_key("-1"), r"\-1");
	}

	#[test]
	fn rejects_bad_paths() {
		assert!(matches!(DocumentPath::parse(""), Err(JournalError::EmptyPath)));
		assert!(DocumentPath::parse("0.a").is_err());
		assert!(DocumentPath::parse("-1").is_err());
		assert!(DocumentPath::parse(r"a\").is_err());
		assert!(DocumentPath::parse("list.-1+").is_err());
	}

	#[test]
	fn empty_keys_are_not_addressable() {
		assert!(DocumentPath::key("metaData").child("http").is_addressable());
		assert!(!DocumentPath::key("metaData").child("").is_addressable());
		assert!(!DocumentPath::key("").is_addressable());
		assert!(DocumentPath::parse("list.-1").unwrap().is_addressable());
	}

	proptest! {
		#[test]
		fn escaped_keys_roundtrip(parts in proptest::collection::vec(".{1,8}", 1..4)) {
			let raw = parts.iter().map(|p| escape_key(p)).collect::<Vec<_>>().join(".");
			let parsed = DocumentPath::parse(&raw).unwrap();
			let expected: Vec<_> = parts.iter().map(|p| key(p)).collect();
			prop_assert_eq!(parsed.segments(), &expected[..]);
			prop_assert!(!parsed.is_increment());
			prop_assert_eq!(parsed.to_string(), raw);
		}
	}
}
