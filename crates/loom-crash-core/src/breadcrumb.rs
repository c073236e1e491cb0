// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Breadcrumb types for crash events (events leading up to crash).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CrashError;

/// A breadcrumb representing an event leading up to the crash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breadcrumb {
	pub message: String,
	#[serde(rename = "type")]
	pub breadcrumb_type: BreadcrumbType,
	pub timestamp: DateTime<Utc>,
	#[serde(default)]
	pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Breadcrumb {
	/// Creates a breadcrumb timestamped now.
	pub fn new(message: impl Into<String>, breadcrumb_type: BreadcrumbType) -> Self {
		Self {
			message: message.into(),
			breadcrumb_type,
			timestamp: Utc::now(),
			metadata: serde_json::Map::new(),
		}
	}

	/// Attaches a metadata value to the breadcrumb.
	pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
		self.metadata.insert(key.into(), value);
		self
	}
}

impl Default for Breadcrumb {
	fn default() -> Self {
		Self::new(String::new(), BreadcrumbType::Manual)
	}
}

/// Category of a breadcrumb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreadcrumbType {
	Error,
	Log,
	Manual,
	Navigation,
	Process,
	Request,
	State,
	User,
}

impl BreadcrumbType {
	pub const ALL: [BreadcrumbType; 8] = [
		Self::Error,
		Self::Log,
		Self::Manual,
		Self::Navigation,
		Self::Process,
		Self::Request,
		Self::State,
		Self::User,
	];

	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Error => "error",
			Self::Log => "log",
			Self::Manual => "manual",
			Self::Navigation => "navigation",
			Self::Process => "process",
			Self::Request => "request",
			Self::State => "state",
			Self::User => "user",
		}
	}

	/// Parses a type string read back from the crash journal.
	///
	/// An exact match yields that type. A known type written with different
	/// casing (`"Navigation"`, `"LOG"`) lands in [`BreadcrumbType::Manual`].
	/// Anything else is rejected so the breadcrumb is dropped rather than
	/// shown under the wrong category.
	pub fn parse_journaled(s: &str) -> Result<Self, CrashError> {
		if let Ok(exact) = s.parse() {
			return Ok(exact);
		}
		if Self::ALL.iter().any(|t| t.as_str().eq_ignore_ascii_case(s)) {
			return Ok(Self::Manual);
		}
		Err(CrashError::InvalidBreadcrumbType(s.to_string()))
	}
}

impl fmt::Display for BreadcrumbType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for BreadcrumbType {
	type Err = CrashError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::ALL
			.iter()
			.copied()
			.find(|t| t.as_str() == s)
			.ok_or_else(|| CrashError::InvalidBreadcrumbType(s.to_string()))
	}
}
