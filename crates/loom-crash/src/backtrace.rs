// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Backtrace capture for panics.

use std::backtrace::Backtrace;

use loom_crash_core::Frame;
use rustc_demangle::demangle;

/// Captures the current thread's stack, innermost frame first.
pub fn capture_frames() -> Vec<Frame> {
	parse_backtrace(&format!("{}", Backtrace::force_capture()))
}

/// Parses the `Display` output of [`Backtrace`]:
///
/// ```text
///    4: my_app::checkout::submit
///              at ./src/checkout.rs:42:9
/// ```
pub fn parse_backtrace(text: &str) -> Vec<Frame> {
	let mut frames: Vec<Frame> = Vec::new();

	for line in text.lines().map(str::trim) {
		if let Some(location) = line.strip_prefix("at ") {
			if let Some(frame) = frames.last_mut().filter(|f| f.filename.is_none()) {
				apply_location(frame, location);
			}
			continue;
		}

		let Some((index, symbol)) = line.split_once(':') else {
			continue;
		};
		if index.trim().parse::<u32>().is_err() {
			continue;
		}
		let symbol = symbol.trim();
		if symbol.is_empty() {
			continue;
		}
		frames.push(symbol_frame(symbol));
	}

	frames
}

fn symbol_frame(symbol: &str) -> Frame {
	let function = format!("{:#}", demangle(symbol));
	let module = function
		.rfind("::")
		.map(|idx| function[..idx].trim_start_matches('<').to_string())
		.filter(|m| !m.is_empty());
	Frame {
		in_app: is_in_app_frame(&function),
		function: Some(function),
		module,
		..Frame::default()
	}
}

/// `path:line:column`, where the path itself may contain `:`.
fn apply_location(frame: &mut Frame, location: &str) {
	let mut parts = location.rsplitn(3, ':');
	let column = parts.next();
	let line = parts.next();
	match (parts.next(), line, column) {
		(Some(file), Some(line), Some(column)) => {
			frame.filename = Some(file.to_string());
			frame.lineno = line.parse().ok();
			frame.colno = column.parse().ok();
		}
		_ => frame.filename = Some(location.to_string()),
	}
}

/// Whether a frame belongs to application code rather than the runtime.
fn is_in_app_frame(function: &str) -> bool {
	const SYSTEM_PREFIXES: &[&str] = &[
		"std::",
		"core::",
		"alloc::",
		"tokio::",
		"futures::",
		"async_trait::",
		"tracing::",
		"panic_unwind::",
		"loom_crash::",
		"rust_begin_unwind",
		"rust_panic",
		"__rust_",
		"_rust_",
	];
	const SYSTEM_CONTAINS: &[&str] = &["::panicking::", "::rt::", "::sys_common::", "::sys::"];

	let function = function.trim_start_matches('<');
	!SYSTEM_PREFIXES.iter().any(|p| function.starts_with(p))
		&& !SYSTEM_CONTAINS.iter().any(|c| function.contains(c))
}

#[cfg(test)]
mod tests {
	use super::*;

	const SAMPLE: &str = "   0: std::backtrace::Backtrace::force_capture
             at /rustc/abc/library/std/src/backtrace.rs:331:13
   1: loom_crash::panic_hook::install::{{closure}}
             at ./crates/loom-crash/src/panic_hook.rs:40:22
   2: my_app::checkout::submit
             at ./src/checkout.rs:42:9
   3: <my_app::Cart as core::ops::Drop>::drop
   4: main
";

	#[test]
	fn parses_frames_and_locations() {
		let frames = parse_backtrace(SAMPLE);
		assert_eq!(frames.len(), 5);

		let submit = &frames[2];
		assert_eq!(submit.function.as_deref(), Some("my_app::checkout::submit"));
		assert_eq!(submit.module.as_deref(), Some("my_app::checkout"));
		assert_eq!(submit.filename.as_deref(), Some("./src/checkout.rs"));
		assert_eq!(submit.lineno, Some(42));
		assert_eq!(submit.colno, Some(9));
		assert!(submit.in_app);

		assert_eq!(frames[3].filename, None);
		assert_eq!(frames[4].module, None);
	}

	#[test]
	fn runtime_and_sdk_frames_are_not_in_app() {
		let frames = parse_backtrace(SAMPLE);
		assert!(!frames[0].in_app);
		assert!(!frames[1].in_app);
		assert!(frames[3].in_app);
		assert!(!is_in_app_frame("<tokio::runtime::Runtime>::block_on"));
		assert!(!is_in_app_frame("app::worker::rt::spawn"));
	}

	#[test]
	fn windows_paths_keep_their_drive() {
		let mut frame = Frame::default();
		apply_location(&mut frame, r"C:\src\main.rs:7:1");
		assert_eq!(frame.filename.as_deref(), Some(r"C:\src\main.rs"));
		assert_eq!(frame.lineno, Some(7));
	}

	#[test]
	fn capture_does_not_panic() {
		let _frames = capture_frames();
	}
}
