// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Crash-safe state journal for the Loom crash SDK.
//!
//! The journal records every change to the client's state as a small JSON
//! command in a memory-mapped log, so the state immediately before a crash can
//! be rebuilt on the next launch:
//!
//! ```text
//! document = snapshot + commands written since that snapshot
//! ```
//!
//! - [`path`] and [`command`] define what a command is and how it is addressed
//! - [`document`] applies commands to an in-memory JSON document
//! - [`log`] is the fixed-size, NUL-delimited on-disk log
//! - [`journal`] ties them together and compacts into [`snapshot`]s
//! - [`housekeeping`] compacts in the background

pub mod command;
pub mod document;
pub mod error;
pub mod housekeeping;
pub mod journal;
pub mod log;
pub mod path;
pub mod snapshot;

pub use command::Command;
pub use document::{Document, VersionInfo, VERSION_INFO_KEY};
pub use error::{JournalError, Result};
pub use housekeeping::Housekeeper;
pub use journal::{load_previous_document, remove_journal_files, Journal, JournalConfig};
pub use path::{escape_key, DocumentPath, PathSegment};
