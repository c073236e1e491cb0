// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Process-wide panic hook.

use std::any::Any;
use std::cell::Cell;
use std::panic;
use std::sync::Weak;

use loom_crash_core::Frame;
use tracing::debug;

use crate::backtrace::capture_frames;

/// What is known about a panic at the moment it happens.
#[derive(Debug, Clone)]
pub struct PanicReport {
	pub message: String,
	/// `file:line:column` of the panic site.
	pub location: Option<String>,
	pub thread_name: Option<String>,
	pub thread_id: String,
	pub frames: Vec<Frame>,
}

pub trait PanicHandler: Send + Sync {
	fn on_panic(&self, report: PanicReport);
}

thread_local! {
	static IN_HOOK: Cell<bool> = const { Cell::new(false) };
}

/// Chains a hook in front of the current one that reports to `handler` while
/// it is alive. The previous hook always runs afterwards.
pub fn install(handler: Weak<dyn PanicHandler>) {
	let previous = panic::take_hook();
	panic::set_hook(Box::new(move |info| {
		// A panic inside the handler would otherwise recurse.
		if !IN_HOOK.with(|flag| flag.replace(true)) {
			if let Some(handler) = handler.upgrade() {
				let current = std::thread::current();
				handler.on_panic(PanicReport {
					message: payload_message(info.payload()),
					location: info
						.location()
						.map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column())),
					thread_name: current.name().map(str::to_string),
					thread_id: format!("{:?}", current.id()),
					frames: capture_frames(),
				});
			} else {
				debug!("crash client dropped, skipping panic report");
			}
			IN_HOOK.with(|flag| flag.set(false));
		}
		previous(info);
	}));
}

fn payload_message(payload: &(dyn Any + Send)) -> String {
	if let Some(s) = payload.downcast_ref::<&str>() {
		(*s).to_string()
	} else if let Some(s) = payload.downcast_ref::<String>() {
		s.clone()
	} else {
		"Box<dyn Any>".to_string()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use parking_lot::Mutex;
	use std::sync::Arc;

	#[derive(Default)]
	struct Recorder(Mutex<Vec<PanicReport>>);

	impl PanicHandler for Recorder {
		fn on_panic(&self, report: PanicReport) {
			self.0.lock().push(report);
		}
	}

	#[test]
	fn payload_messages() {
		assert_eq!(payload_message(&"static"), "static");
		assert_eq!(payload_message(&"owned".to_string()), "owned");
		assert_eq!(payload_message(&42u8), "Box<dyn Any>");
	}

	#[test]
	fn reports_panics_then_chains() {
		let recorder = Arc::new(Recorder::default());
		let handler: Arc<dyn PanicHandler> = recorder.clone();
		install(Arc::downgrade(&handler));

		let result = std::thread::Builder::new()
			.name("doomed".to_string())
			.spawn(|| panic!("checkout failed"))
			.unwrap()
			.join();
		assert!(result.is_err());

		let reports = recorder.0.lock();
		let report = reports
			.iter()
			.find(|r| r.message == "checkout failed")
			.expect("panic was reported");
		assert_eq!(report.thread_name.as_deref(), Some("doomed"));
		assert!(report.location.as_deref().is_some_and(|l| l.contains("panic_hook.rs")));
	}
}
