// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Dedicated background execution contexts.
//!
//! Each [`TaskType`] gets its own single-threaded tokio runtime, so queue
//! writes and deliveries are serialized within their context and never run on
//! the caller's thread.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskType {
	/// Disk work: queue writes, journal housekeeping.
	Io,
	/// Network work: flushing queues through the transport.
	Delivery,
}

impl TaskType {
	pub fn thread_name(&self) -> &'static str {
		match self {
			Self::Io => "loom-crash-io",
			Self::Delivery => "loom-crash-delivery",
		}
	}
}

pub struct TaskRunner {
	io: Mutex<Option<Runtime>>,
	delivery: Mutex<Option<Runtime>>,
}

impl TaskRunner {
	pub fn new() -> std::io::Result<Self> {
		Ok(Self {
			io: Mutex::new(Some(build_runtime(TaskType::Io)?)),
			delivery: Mutex::new(Some(build_runtime(TaskType::Delivery)?)),
		})
	}

	fn slot(&self, task_type: TaskType) -> &Mutex<Option<Runtime>> {
		match task_type {
			TaskType::Io => &self.io,
			TaskType::Delivery => &self.delivery,
		}
	}

	/// Handle to the runtime for `task_type`, or `None` after shutdown.
	pub fn handle(&self, task_type: TaskType) -> Option<Handle> {
		self.slot(task_type).lock().as_ref().map(|rt| rt.handle().clone())
	}

	/// Spawns `future` on the given context. Never blocks.
	pub fn submit<F>(&self, task_type: TaskType, future: F) -> Option<JoinHandle<F::Output>>
	where
		F: Future + Send + 'static,
		F::Output: Send + 'static,
	{
		match self.handle(task_type) {
			Some(handle) => Some(handle.spawn(future)),
			None => {
				warn!(context = task_type.thread_name(), "task submitted after shutdown, dropping it");
				None
			}
		}
	}

	pub fn is_shutdown(&self) -> bool {
		self.io.lock().is_none() && self.delivery.lock().is_none()
	}

	/// Stops both runtimes, giving running tasks up to `timeout` each to finish.
	///
	/// Safe to call from inside an async context: the runtimes are dropped on
	/// a separate thread.
	pub fn shutdown(&self, timeout: Duration) {
		let runtimes: Vec<Runtime> = [self.io.lock().take(), self.delivery.lock().take()]
			.into_iter()
			.flatten()
			.collect();
		if runtimes.is_empty() {
			return;
		}

		let joiner = std::thread::Builder::new()
			.name("loom-crash-shutdown".to_string())
			.spawn(move || {
				for runtime in runtimes {
					runtime.shutdown_timeout(timeout);
				}
			});
		match joiner {
			Ok(joiner) => {
				if joiner.join().is_err() {
					warn!("background runtime shutdown panicked");
				}
			}
			Err(e) => warn!(error = %e, "failed to spawn shutdown thread"),
		}
		debug!("background runtimes stopped");
	}
}

impl Drop for TaskRunner {
	fn drop(&mut self) {
		for slot in [&self.io, &self.delivery] {
			if let Some(runtime) = slot.lock().take() {
				runtime.shutdown_background();
			}
		}
	}
}

fn build_runtime(task_type: TaskType) -> std::io::Result<Runtime> {
	Builder::new_multi_thread()
		.worker_threads(1)
		.thread_name(task_type.thread_name())
		.enable_all()
		.build()
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::mpsc;

	#[test]
	fn tasks_run_on_their_named_context() {
		let runner = TaskRunner::new().unwrap();
		let (tx, rx) = mpsc::channel();

		for task_type in [TaskType::Io, TaskType::Delivery] {
			let tx = tx.clone();
			runner.submit(task_type, async move {
				let name = std::thread::current().name().map(str::to_string);
				tx.send((task_type, name)).unwrap();
			});
		}

		let mut seen: Vec<_> = (0..2).map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap()).collect();
		seen.sort_by_key(|(t, _)| t.thread_name());
		assert_eq!(seen[0], (TaskType::Delivery, Some("loom-crash-delivery".to_string())));
		assert_eq!(seen[1], (TaskType::Io, Some("loom-crash-io".to_string())));
		runner.shutdown(Duration::from_secs(1));
	}

	#[test]
	fn submit_after_shutdown_returns_none() {
		let runner = TaskRunner::new().unwrap();
		runner.shutdown(Duration::from_millis(100));
		assert!(runner.is_shutdown());
		assert!(runner.submit(TaskType::Io, async {}).is_none());
		runner.shutdown(Duration::from_millis(100));
	}

	#[tokio::test]
	async fn dropping_inside_a_runtime_does_not_panic() {
		let runner = TaskRunner::new().unwrap();
		runner.submit(TaskType::Io, async {});
		drop(runner);
	}
}
