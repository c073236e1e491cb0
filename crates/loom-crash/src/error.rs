// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the crash SDK.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for crash operations.
pub type Result<T> = std::result::Result<T, CrashSdkError>;

/// Errors that can occur in the crash SDK.
#[derive(Debug, Error)]
pub enum CrashSdkError {
	/// The client has been shut down.
	#[error("crash client has been shut down")]
	ClientShutdown,

	/// Invalid API key format.
	#[error("invalid API key format")]
	InvalidApiKey,

	#[error("configuration error: {0}")]
	Config(#[from] ConfigError),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// Failed to serialize or parse a payload.
	#[error("serialization error: {0}")]
	SerializationError(#[from] serde_json::Error),

	#[error("journal error: {0}")]
	Journal(#[from] loom_crash_journal::JournalError),

	/// HTTP request failed before a response arrived.
	#[error("HTTP request failed: {0}")]
	RequestFailed(#[from] reqwest::Error),

	/// A queue file name does not follow the entry naming scheme.
	#[error("invalid queue file name: {0}")]
	InvalidFilename(String),

	/// A recovered journal document cannot be turned into an event.
	#[error("invalid journal document: {0}")]
	InvalidDocument(String),

	/// An OS file lock could not be acquired in time.
	#[error("failed to acquire lock on {0}")]
	LockUnavailable(PathBuf),

	#[error("background task runner is shut down")]
	RunnerShutdown,
}

/// Errors raised while loading or validating [`crate::CrashConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("TOML parse error in {path}: {source}")]
	TomlParse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},

	#[error("Validation error: {0}")]
	Validation(String),

	#[error("Missing required field: {0}")]
	MissingField(String),

	#[error("Invalid value for {field}: {message}")]
	InvalidValue { field: String, message: String },

	#[error("Could not determine a state directory")]
	StateDirNotFound,
}

impl ConfigError {
	pub fn validation(msg: impl Into<String>) -> Self {
		Self::Validation(msg.into())
	}

	pub fn missing_field(field: impl Into<String>) -> Self {
		Self::MissingField(field.into())
	}

	pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
		Self::InvalidValue {
			field: field.into(),
			message: message.into(),
		}
	}
}
