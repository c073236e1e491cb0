// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the crash journal.

use thiserror::Error;

/// Result type alias for journal operations.
pub type Result<T> = std::result::Result<T, JournalError>;

/// Errors that can occur while writing, compacting or replaying a journal.
#[derive(Debug, Error)]
pub enum JournalError {
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	/// An empty path would replace the whole document.
	#[error("command path must not be empty")]
	EmptyPath,

	#[error("invalid command path {path:?}: {reason}")]
	InvalidPath { path: String, reason: String },

	/// A serialized command was not a single-key JSON object.
	#[error("malformed command: {0}")]
	MalformedCommand(String),

	/// An existing container at `path` is not the kind the segment needs.
	#[error("type mismatch at {path:?}: expected {expected}, found {found}")]
	TypeMismatch {
		path: String,
		expected: &'static str,
		found: &'static str,
	},

	#[error("cannot increment non-numeric value at {path:?}")]
	NonNumericIncrement { path: String },

	#[error("increment at {path:?} overflowed")]
	IncrementOverflow { path: String },

	#[error("command of {needed} bytes does not fit in a {capacity} byte journal")]
	BufferFull { needed: usize, capacity: usize },

	#[error("incompatible journal: expected {expected}, found {found}")]
	Incompatible { expected: String, found: String },

	#[error("journal is in degraded mode")]
	Degraded,
}
