// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error type codes identifying which layer produced a stack trace.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CrashError;

/// The runtime layer an exception or thread originated from.
///
/// The short codes are part of queue filenames, so they must stay stable and
/// free of `_` and `,`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
	/// Rust code running under the SDK's panic hook.
	Rust,
	/// Native code (signals, aborts) outside the managed panic path.
	C,
}

impl ErrorType {
	pub fn code(&self) -> &'static str {
		match self {
			Self::Rust => "rust",
			Self::C => "c",
		}
	}
}

impl fmt::Display for ErrorType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.code())
	}
}

impl FromStr for ErrorType {
	type Err = CrashError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"rust" => Ok(Self::Rust),
			"c" => Ok(Self::C),
			_ => Err(CrashError::InvalidErrorType(s.to_string())),
		}
	}
}
