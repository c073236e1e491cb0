// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for crash payloads.

use thiserror::Error;

/// Errors raised while parsing or validating payload values.
#[derive(Debug, Error)]
pub enum CrashError {
	#[error("invalid breadcrumb type: {0}")]
	InvalidBreadcrumbType(String),

	#[error("invalid error type code: {0}")]
	InvalidErrorType(String),

	#[error("invalid severity: {0}")]
	InvalidSeverity(String),

	#[error("invalid timestamp: {0}")]
	InvalidTimestamp(String),

	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}

/// Result type for payload operations.
pub type Result<T> = std::result::Result<T, CrashError>;
