// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Crash reporting SDK for Rust applications.
//!
//! Nothing a crash reveals is lost to the crash itself:
//!
//! - client state is journaled in [`loom_crash_journal`] as it changes, and a
//!   crash left in the previous run's journal is queued on the next launch by
//!   [`recovery`]
//! - events and sessions are queued as files in bounded on-disk stores
//!   ([`event_store`], [`session_store`]) before delivery is attempted
//! - [`orchestrator`] delivers queued files and decides, per HTTP outcome,
//!   whether each one is deleted or retried later
//! - a crash during launch gets a bounded synchronous delivery attempt on the
//!   following launch so a crash loop still reports
//!
//! # Example
//!
//! ```no_run
//! use loom_crash::{BreadcrumbType, CrashClient};
//!
//! let client = CrashClient::builder()
//!     .api_key("0123456789abcdef0123456789abcdef")
//!     .release_stage("production")
//!     .build()?;
//!
//! client.leave_breadcrumb("opened settings", BreadcrumbType::Navigation);
//! client.mark_launch_completed();
//! # Ok::<(), loom_crash::CrashSdkError>(())
//! ```

pub mod background;
pub mod backtrace;
pub mod client;
pub mod config;
pub mod delivery;
pub mod device_id;
pub mod error;
pub mod event_mapper;
pub mod event_store;
pub mod filename;
pub mod filter;
pub mod last_run_info;
pub mod orchestrator;
pub mod panic_hook;
pub mod recovery;
pub mod session_store;
pub mod state;
pub mod store;

pub use client::{CrashClient, CrashClientBuilder};
pub use config::CrashConfig;
pub use delivery::{DeliveryParams, DeliveryStatus, HttpTransport, Transport};
pub use error::{ConfigError, CrashSdkError, Result};
pub use filename::{EntryFilename, EntrySuffix};
pub use filter::{SendDecision, SendFilter};
pub use last_run_info::LastRunInfo;
pub use orchestrator::{EntryOutcome, FlushSummary, LaunchFlushOutcome};
pub use recovery::RecoveryOutcome;
pub use state::{StateEvent, StateSink};
pub use store::{DiscardReason, DiscardedEntry, QueueKind, QueueObserver};

pub use loom_crash_core::{
	Breadcrumb, BreadcrumbType, ErrorType, Event, EventId, Exception, Frame, Session, Severity,
	Thread, UserContext,
};
