// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Crash reporting client.
//!
//! Start-up order matters:
//!
//! 1. the previous run's journal is recovered into the event queue
//! 2. a fresh journal is opened and housekeeping starts
//! 3. a launch crash from the previous run gets a bounded synchronous flush
//! 4. everything else is flushed in the background

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use loom_crash_core::{
	Breadcrumb, BreadcrumbType, ErrorType, EventId, Exception, Session, SessionSummary, Thread,
	UserContext,
};
use loom_crash_journal::{Document, Housekeeper, Journal, JournalConfig};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::background::{TaskRunner, TaskType};
use crate::config::{validate_api_key, CrashConfig};
use crate::delivery::{HttpTransport, Transport};
use crate::device_id::DeviceIdStore;
use crate::error::{CrashSdkError, Result};
use crate::event_mapper::event_to_commands;
use crate::event_store::EventStore;
use crate::filename::{EntrySuffix, MonotonicClock};
use crate::filter::{DiscardClasses, DiscardHandled, SendFilter};
use crate::last_run_info::{LastRunInfo, LastRunInfoStore};
use crate::orchestrator::{DeliveryOrchestrator, DeliveryPolicy, LaunchFlushOutcome};
use crate::panic_hook::{self, PanicHandler, PanicReport};
use crate::recovery::{CrashRecoveryLoader, RecoveryOutcome};
use crate::session_store::SessionStore;
use crate::state::{JournalSink, MemoryState, StateEvent, StateSink};
use crate::store::{NoopObserver, QueueObserver};

const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const JOURNAL_TYPE: &str = "loom-crash";
pub const JOURNAL_VERSION: u64 = 1;

const JOURNAL_BASE_NAME: &str = "state";
const EVENTS_DIR: &str = "events";
const SESSIONS_DIR: &str = "sessions";

pub struct CrashClientBuilder {
	config: CrashConfig,
	transport: Option<Arc<dyn Transport>>,
	observer: Option<Arc<dyn QueueObserver>>,
	filters: Vec<Arc<dyn SendFilter>>,
	sinks: Vec<Arc<dyn StateSink>>,
	process_started_at: Instant,
	install_panic_hook: bool,
}

impl CrashClientBuilder {
	pub fn new() -> Self {
		Self {
			config: CrashConfig::default(),
			transport: None,
			observer: None,
			filters: Vec::new(),
			sinks: Vec::new(),
			process_started_at: Instant::now(),
			install_panic_hook: true,
		}
	}

	/// Replaces the whole configuration, e.g. one from [`CrashConfig::load`].
	pub fn config(mut self, config: CrashConfig) -> Self {
		self.config = config;
		self
	}

	pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
		self.config.api_key = api_key.into();
		self
	}

	pub fn persistence_dir(mut self, dir: impl Into<PathBuf>) -> Self {
		self.config.persistence_dir = Some(dir.into());
		self
	}

	pub fn app_version(mut self, version: impl Into<String>) -> Self {
		self.config.app_version = Some(version.into());
		self
	}

	/// Example: `production`, `staging`, `development`
	pub fn release_stage(mut self, stage: impl Into<String>) -> Self {
		self.config.release_stage = Some(stage.into());
		self
	}

	/// Defaults to [`HttpTransport`].
	pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
		self.transport = Some(transport);
		self
	}

	pub fn observer(mut self, observer: Arc<dyn QueueObserver>) -> Self {
		self.observer = Some(observer);
		self
	}

	/// Adds a filter after the ones derived from the configuration.
	pub fn send_filter(mut self, filter: Arc<dyn SendFilter>) -> Self {
		self.filters.push(filter);
		self
	}

	pub fn state_sink(mut self, sink: Arc<dyn StateSink>) -> Self {
		self.sinks.push(sink);
		self
	}

	/// When the process started. The launch flush budget is measured from here.
	pub fn process_started_at(mut self, started_at: Instant) -> Self {
		self.process_started_at = started_at;
		self
	}

	pub fn install_panic_hook(mut self, install: bool) -> Self {
		self.install_panic_hook = install;
		self
	}

	pub fn build(self) -> Result<CrashClient> {
		let config = self.config;
		validate_api_key(&config.api_key).map_err(|_| CrashSdkError::InvalidApiKey)?;
		config.validate()?;

		let dir = config.resolve_persistence_dir()?;
		if let Err(e) = std::fs::create_dir_all(&dir) {
			warn!(dir = %dir.display(), error = %e, "persistence directory unavailable, crash data will not survive restarts");
		}

		let runner = TaskRunner::new()?;
		let observer = self.observer.unwrap_or_else(|| Arc::new(NoopObserver));
		let clock = Arc::new(MonotonicClock::new());
		let events = Arc::new(EventStore::new(
			dir.join(EVENTS_DIR),
			config.max_persisted_events,
			Arc::clone(&clock),
			Arc::clone(&observer),
		));
		let sessions = Arc::new(SessionStore::new(
			dir.join(SESSIONS_DIR),
			config.max_persisted_sessions,
			clock,
			observer,
		));

		let device_id = DeviceIdStore::new(&dir).load_or_create();
		let last_run_store = LastRunInfoStore::new(&dir);
		let last_run = last_run_store.load();

		let journal_config = JournalConfig::new(dir.join(JOURNAL_BASE_NAME), JOURNAL_TYPE, JOURNAL_VERSION)
			.with_buffer_size(config.journal_buffer_bytes)
			.with_high_water_mark(config.journal_high_water_bytes);
		let recovery = CrashRecoveryLoader::new(&journal_config, &events).recover();

		let journal = Arc::new(Journal::open(journal_config, Document::new()));
		let housekeeper = runner
			.handle(TaskType::Io)
			.map(|io| Housekeeper::spawn(Arc::clone(&journal), config.housekeeping_interval(), &io));

		let transport = match self.transport {
			Some(transport) => transport,
			None => Arc::new(HttpTransport::new()?),
		};
		let mut filters: Vec<Arc<dyn SendFilter>> = Vec::new();
		if config.discard_handled {
			filters.push(Arc::new(DiscardHandled));
		}
		if !config.discard_classes.is_empty() {
			filters.push(Arc::new(DiscardClasses::new(config.discard_classes.iter().cloned())));
		}
		filters.extend(self.filters);
		let orchestrator = Arc::new(DeliveryOrchestrator::new(
			transport,
			DeliveryPolicy::from_config(&config),
			filters,
		));

		let memory = Arc::new(MemoryState::new(config.max_breadcrumbs));
		let journal_sink = Arc::new(JournalSink::new(Arc::clone(&journal), config.max_breadcrumbs));
		let memory_sink: Arc<dyn StateSink> = memory.clone();
		let mut sinks: Vec<Arc<dyn StateSink>> = vec![memory_sink, journal_sink];
		sinks.extend(self.sinks);

		let inner = Arc::new(ClientInner {
			app: app_section(&config),
			device: device_section(device_id.as_deref()),
			config,
			dir,
			runner,
			journal,
			housekeeper: Mutex::new(housekeeper),
			memory,
			sinks,
			events,
			sessions,
			orchestrator,
			last_run,
			last_run_store,
			device_id,
			recovery,
			launch_flush: Mutex::new(None),
			session: Mutex::new(None),
			closed: AtomicBool::new(false),
			stop: Arc::new(Notify::new()),
		});

		inner.dispatch(StateEvent::Install {
			api_key: inner.config.api_key.clone(),
			app: inner.app.clone(),
			device: inner.device.clone(),
			user: UserContext::default(),
		});
		inner.dispatch(StateEvent::UpdateLaunching(true));

		if self.install_panic_hook {
			let handler: Arc<dyn PanicHandler> = inner.clone();
			panic_hook::install(Arc::downgrade(&handler));
		}

		let launch_flush = inner.orchestrator.flush_on_launch(
			&inner.runner,
			Arc::clone(&inner.events),
			self.process_started_at.elapsed(),
		);
		*inner.launch_flush.lock() = Some(launch_flush);

		let client = CrashClient { inner };
		client.spawn_periodic_flush();
		client.spawn_launch_timer();
		client.flush();

		info!(
			dir = %client.inner.dir.display(),
			recovery = ?client.inner.recovery,
			?launch_flush,
			"crash client started"
		);
		Ok(client)
	}
}

impl Default for CrashClientBuilder {
	fn default() -> Self {
		Self::new()
	}
}

fn app_section(config: &CrashConfig) -> Map<String, Value> {
	let mut app = Map::new();
	if let Some(version) = &config.app_version {
		app.insert("version".to_string(), json!(version));
	}
	if let Some(stage) = &config.release_stage {
		app.insert("releaseStage".to_string(), json!(stage));
	}
	app.insert("isLaunching".to_string(), json!(true));
	app
}

fn device_section(device_id: Option<&str>) -> Map<String, Value> {
	let mut device = Map::new();
	if let Some(id) = device_id {
		device.insert("id".to_string(), json!(id));
	}
	device.insert("osName".to_string(), json!(std::env::consts::OS));
	device.insert("cpuArch".to_string(), json!(std::env::consts::ARCH));
	device.insert("runtimeVersions".to_string(), json!({ "loomCrash": SDK_VERSION }));
	device
}

struct ClientInner {
	config: CrashConfig,
	dir: PathBuf,
	app: Map<String, Value>,
	device: Map<String, Value>,
	runner: TaskRunner,
	journal: Arc<Journal>,
	housekeeper: Mutex<Option<Housekeeper>>,
	memory: Arc<MemoryState>,
	sinks: Vec<Arc<dyn StateSink>>,
	events: Arc<EventStore>,
	sessions: Arc<SessionStore>,
	orchestrator: Arc<DeliveryOrchestrator>,
	last_run: Option<LastRunInfo>,
	last_run_store: LastRunInfoStore,
	device_id: Option<String>,
	recovery: RecoveryOutcome,
	launch_flush: Mutex<Option<LaunchFlushOutcome>>,
	session: Mutex<Option<Session>>,
	closed: AtomicBool,
	stop: Arc<Notify>,
}

impl ClientInner {
	fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	fn dispatch(&self, event: StateEvent) {
		if self.is_closed() {
			return;
		}
		for sink in &self.sinks {
			sink.on_state_change(&event);
		}
	}

	fn mark_launch_completed(&self) {
		if !self.memory.is_launching() {
			return;
		}
		self.dispatch(StateEvent::UpdateLaunching(false));
		if let Err(e) = self.last_run_store.persist(&LastRunInfo::default()) {
			warn!(error = %e, "failed to reset last run info");
		}
		debug!("launch completed");
	}
}

impl PanicHandler for ClientInner {
	fn on_panic(&self, report: PanicReport) {
		if self.is_closed() {
			return;
		}
		let launching = self.memory.is_launching();
		self.dispatch(StateEvent::NotifyUnhandled);

		let exception = Exception {
			error_class: "panic".to_string(),
			message: Some(report.message),
			error_type: ErrorType::Rust,
			stacktrace: report.frames.clone(),
		};
		let mut event = self.memory.build_event(exception, true);
		event.threads = vec![Thread {
			id: report.thread_id,
			name: report.thread_name.unwrap_or_else(|| "<unnamed>".to_string()),
			error_type: ErrorType::Rust,
			error_reporting_thread: true,
			state: None,
			stacktrace: report.frames,
		}];
		if let Some(location) = report.location {
			event
				.metadata
				.entry("panic".to_string())
				.or_default()
				.insert("location".to_string(), json!(location));
		}

		// Durable first: the journal survives even if the queue write below
		// never completes.
		match event_to_commands(&event) {
			Ok(commands) => {
				self.journal.append_batch(commands);
			}
			Err(e) => warn!(error = %e, "failed to journal panic"),
		}

		if self.events.write(&event, EventStore::suffix_for(&event)).is_some() {
			self.dispatch(StateEvent::CrashPersisted);
		}

		let info = LastRunInfo::after_crash(self.last_run, launching);
		if let Err(e) = self.last_run_store.persist(&info) {
			warn!(error = %e, "failed to record last run info");
		}
		info!(event_id = %event.id, launching, "panic captured");
	}
}

/// Handle to the crash reporter. Cheap to clone.
#[derive(Clone)]
pub struct CrashClient {
	inner: Arc<ClientInner>,
}

impl CrashClient {
	pub fn builder() -> CrashClientBuilder {
		CrashClientBuilder::new()
	}

	fn spawn_periodic_flush(&self) {
		let interval = self.inner.config.flush_interval();
		if interval.is_zero() {
			return;
		}
		let weak = Arc::downgrade(&self.inner);
		let stop = Arc::clone(&self.inner.stop);
		self.inner.runner.submit(TaskType::Delivery, async move {
			loop {
				tokio::select! {
					_ = stop.notified() => break,
					_ = tokio::time::sleep(interval) => {
						let Some(inner) = weak.upgrade() else { break };
						inner.orchestrator.flush_store(inner.events.store()).await;
						inner.orchestrator.flush_store(inner.sessions.store()).await;
					}
				}
			}
			debug!("periodic flush stopped");
		});
	}

	fn spawn_launch_timer(&self) {
		let Some(duration) = self.inner.config.launch_duration() else {
			return;
		};
		let weak = Arc::downgrade(&self.inner);
		self.inner.runner.submit(TaskType::Io, async move {
			tokio::time::sleep(duration).await;
			if let Some(inner) = weak.upgrade() {
				inner.mark_launch_completed();
			}
		});
	}

	pub fn leave_breadcrumb(&self, message: impl Into<String>, breadcrumb_type: BreadcrumbType) {
		self.add_breadcrumb(Breadcrumb::new(message, breadcrumb_type));
	}

	pub fn add_breadcrumb(&self, breadcrumb: Breadcrumb) {
		self.inner.dispatch(StateEvent::AddBreadcrumb(breadcrumb));
	}

	pub fn set_user(&self, user: UserContext) {
		self.inner.dispatch(StateEvent::UpdateUser(user));
	}

	pub fn set_context(&self, context: Option<String>) {
		self.inner.dispatch(StateEvent::UpdateContext(context));
	}

	pub fn add_metadata(&self, section: impl Into<String>, key: impl Into<String>, value: Value) {
		self.inner.dispatch(StateEvent::AddMetadata {
			section: section.into(),
			key: key.into(),
			value,
		});
	}

	pub fn clear_metadata(&self, section: impl Into<String>, key: impl Into<String>) {
		self.inner.dispatch(StateEvent::ClearMetadataValue {
			section: section.into(),
			key: key.into(),
		});
	}

	pub fn clear_metadata_section(&self, section: impl Into<String>) {
		self.inner.dispatch(StateEvent::ClearMetadataSection(section.into()));
	}

	/// Starts a new session and queues it for delivery. Returns its id.
	pub fn start_session(&self) -> Result<String> {
		if self.inner.is_closed() {
			return Err(CrashSdkError::ClientShutdown);
		}
		let mut session = Session::new(self.inner.config.api_key.clone(), self.inner.memory.user());
		session.app = self.inner.app.clone();
		session.device = self.inner.device.clone();
		let id = session.id.clone();

		self.inner.dispatch(StateEvent::StartSession(session.summary()));
		*self.inner.session.lock() = Some(session.clone());

		let sessions = Arc::clone(&self.inner.sessions);
		self.inner
			.runner
			.submit(TaskType::Io, async move {
				sessions.write(&session);
			})
			.ok_or(CrashSdkError::RunnerShutdown)?;
		info!(session_id = %id, "session started");
		Ok(id)
	}

	pub fn pause_session(&self) {
		if self.inner.session.lock().take().is_some() {
			self.inner.dispatch(StateEvent::PauseSession);
		}
	}

	/// Queues a handled event for `exception`.
	pub fn notify(&self, exception: Exception) -> Result<EventId> {
		if self.inner.is_closed() {
			return Err(CrashSdkError::ClientShutdown);
		}
		self.inner.dispatch(StateEvent::NotifyHandled);
		let event = self.inner.memory.build_event(exception, false);
		let id = event.id;

		let events = Arc::clone(&self.inner.events);
		self.inner
			.runner
			.submit(TaskType::Io, async move {
				events.write(&event, EntrySuffix::None);
			})
			.ok_or(CrashSdkError::RunnerShutdown)?;
		debug!(event_id = %id, "handled event queued");
		Ok(id)
	}

	/// Queues a handled event for `error` and its source chain.
	pub fn notify_error<E>(&self, error: &E) -> Result<EventId>
	where
		E: std::error::Error + ?Sized,
	{
		let mut exception = Exception {
			error_class: std::any::type_name::<E>().to_string(),
			message: Some(error.to_string()),
			error_type: ErrorType::Rust,
			stacktrace: crate::backtrace::capture_frames(),
		};
		let mut source = error.source();
		let mut causes = Vec::new();
		while let Some(cause) = source {
			causes.push(cause.to_string());
			source = cause.source();
		}
		if !causes.is_empty() {
			let message = exception.message.take().unwrap_or_default();
			exception.message = Some(format!("{message}: {}", causes.join(": ")));
		}
		self.notify(exception)
	}

	/// Replaces the thread list recorded with a native crash.
	pub fn update_threads(&self, threads: Vec<Thread>) {
		self.inner.dispatch(StateEvent::UpdateThreads(threads));
	}

	/// Ends the launch window early. The launch window also ends on its own
	/// after `launch_duration_ms`.
	pub fn mark_launch_completed(&self) {
		self.inner.mark_launch_completed();
	}

	pub fn is_launching(&self) -> bool {
		self.inner.memory.is_launching()
	}

	/// Schedules a background flush of both queues.
	pub fn on_connectivity_restored(&self) {
		info!("connectivity restored, flushing queues");
		self.flush();
	}

	/// Schedules a background flush of both queues. `false` after shutdown.
	pub fn flush(&self) -> bool {
		self.inner
			.orchestrator
			.flush_async(
				&self.inner.runner,
				Arc::clone(&self.inner.events),
				Arc::clone(&self.inner.sessions),
			)
			.is_some()
	}

	/// Breadcrumbs that would be attached to an event raised now, oldest first.
	pub fn breadcrumbs(&self) -> Vec<Breadcrumb> {
		self.inner.memory.breadcrumbs()
	}

	pub fn current_session(&self) -> Option<SessionSummary> {
		self.inner.memory.session()
	}

	pub fn last_run_info(&self) -> Option<LastRunInfo> {
		self.inner.last_run
	}

	pub fn device_id(&self) -> Option<&str> {
		self.inner.device_id.as_deref()
	}

	pub fn recovery_outcome(&self) -> &RecoveryOutcome {
		&self.inner.recovery
	}

	pub fn launch_flush_outcome(&self) -> Option<LaunchFlushOutcome> {
		*self.inner.launch_flush.lock()
	}

	pub fn persistence_dir(&self) -> &Path {
		&self.inner.dir
	}

	/// The journal's current view of client state.
	pub fn journal_document(&self) -> Arc<Document> {
		self.inner.journal.current_document()
	}

	pub fn event_store(&self) -> &EventStore {
		&self.inner.events
	}

	pub fn session_store(&self) -> &SessionStore {
		&self.inner.sessions
	}

	pub fn is_closed(&self) -> bool {
		self.inner.is_closed()
	}

	/// Stops background work and removes the journal: a clean exit leaves no
	/// crash to recover. Pending queue entries stay on disk for the next run.
	pub fn shutdown(&self, timeout: Duration) {
		if self.inner.closed.swap(true, Ordering::SeqCst) {
			return;
		}
		self.inner.stop.notify_one();
		if let Some(housekeeper) = self.inner.housekeeper.lock().take() {
			housekeeper.stop();
		}
		self.inner.journal.discard();
		self.inner.runner.shutdown(timeout);
		info!("crash client shut down");
	}
}
