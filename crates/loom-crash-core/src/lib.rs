// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Payload types for the Loom crash SDK.
//!
//! These are the fully-formed values that are written into the on-disk
//! delivery queue and later sent to the notify and sessions endpoints:
//!
//! - [`Event`]: an error or crash with its diagnostic context
//! - [`Session`]: a user engagement period with handled/unhandled counters
//! - [`Breadcrumb`]: a timestamped record of something that happened before an event
//!
//! The crash journal stores the same information as a flattened document and
//! the recovery loader in `loom-crash` rebuilds these types from it.

pub mod breadcrumb;
pub mod context;
pub mod error;
pub mod error_type;
pub mod event;
pub mod session;

pub use breadcrumb::{Breadcrumb, BreadcrumbType};
pub use context::UserContext;
pub use error::{CrashError, Result};
pub use error_type::ErrorType;
pub use event::{
	Event, EventCounts, EventId, Exception, Frame, Metadata, SessionSummary, Severity,
	SeverityReason, Thread,
};
pub use session::Session;
