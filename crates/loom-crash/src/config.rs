// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Client configuration.
//!
//! Values are layered with increasing precedence:
//! - built-in defaults
//! - a TOML file ([`CrashConfig::from_file`])
//! - `LOOM_CRASH_*` environment variables
//! - overrides set on [`crate::CrashClientBuilder`]

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

pub const DEFAULT_NOTIFY_ENDPOINT: &str = "https://notify.loom.dev/v1/events";
pub const DEFAULT_SESSIONS_ENDPOINT: &str = "https://sessions.loom.dev/v1/sessions";

const MIN_JOURNAL_BUFFER_BYTES: usize = 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrashConfig {
	/// 32 hex characters identifying the project.
	pub api_key: String,
	pub notify_endpoint: String,
	pub sessions_endpoint: String,
	/// Root of all persisted files. Resolved from the XDG state directory when unset.
	pub persistence_dir: Option<PathBuf>,
	pub max_persisted_events: usize,
	pub max_persisted_sessions: usize,
	pub max_breadcrumbs: usize,
	/// How long after start the app counts as launching. 0 means until
	/// [`crate::CrashClient::mark_launch_completed`] is called.
	pub launch_duration_ms: u64,
	pub launch_crash_timeout_ms: u64,
	pub retention_days: u32,
	pub max_payload_bytes: u64,
	pub journal_buffer_bytes: usize,
	pub journal_high_water_bytes: usize,
	pub housekeeping_interval_ms: u64,
	pub flush_interval_secs: u64,
	/// Error classes that are never sent.
	pub discard_classes: Vec<String>,
	pub discard_handled: bool,
	pub release_stage: Option<String>,
	pub app_version: Option<String>,
}

impl Default for CrashConfig {
	fn default() -> Self {
		Self {
			api_key: String::new(),
			notify_endpoint: DEFAULT_NOTIFY_ENDPOINT.to_string(),
			sessions_endpoint: DEFAULT_SESSIONS_ENDPOINT.to_string(),
			persistence_dir: None,
			max_persisted_events: 32,
			max_persisted_sessions: 128,
			max_breadcrumbs: 100,
			launch_duration_ms: 5000,
			launch_crash_timeout_ms: 2000,
			retention_days: 60,
			max_payload_bytes: 1_048_576,
			journal_buffer_bytes: 262_144,
			journal_high_water_bytes: 196_608,
			housekeeping_interval_ms: 200,
			flush_interval_secs: 60,
			discard_classes: Vec::new(),
			discard_handled: false,
			release_stage: None,
			app_version: None,
		}
	}
}

impl CrashConfig {
	pub fn new(api_key: impl Into<String>) -> Self {
		Self {
			api_key: api_key.into(),
			..Self::default()
		}
	}

	/// Reads a TOML file on top of the defaults. Does not validate.
	pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
		let content = std::fs::read_to_string(path)?;
		let config = toml::from_str(&content).map_err(|source| ConfigError::TomlParse {
			path: path.to_path_buf(),
			source,
		})?;
		debug!(path = %path.display(), "loaded crash config file");
		Ok(config)
	}

	/// Defaults, then `path` if given, then the environment; validated.
	pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
		let mut config = match path {
			Some(path) => Self::from_file(path)?,
			None => Self::default(),
		};
		config.apply_env_from(|key| std::env::var(key).ok())?;
		config.validate()?;
		Ok(config)
	}

	/// Applies `LOOM_CRASH_*` overrides using `lookup` to read variables.
	pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
		if let Some(v) = lookup("LOOM_CRASH_API_KEY") {
			self.api_key = v;
		}
		if let Some(v) = lookup("LOOM_CRASH_NOTIFY_ENDPOINT") {
			self.notify_endpoint = v;
		}
		if let Some(v) = lookup("LOOM_CRASH_SESSIONS_ENDPOINT") {
			self.sessions_endpoint = v;
		}
		if let Some(v) = lookup("LOOM_CRASH_PERSISTENCE_DIR") {
			self.persistence_dir = Some(PathBuf::from(v));
		}
		if let Some(v) = lookup("LOOM_CRASH_MAX_PERSISTED_EVENTS") {
			self.max_persisted_events = parse_env("LOOM_CRASH_MAX_PERSISTED_EVENTS", &v)?;
		}
		if let Some(v) = lookup("LOOM_CRASH_MAX_PERSISTED_SESSIONS") {
			self.max_persisted_sessions = parse_env("LOOM_CRASH_MAX_PERSISTED_SESSIONS", &v)?;
		}
		if let Some(v) = lookup("LOOM_CRASH_RELEASE_STAGE") {
			self.release_stage = Some(v);
		}
		Ok(())
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		validate_api_key(&self.api_key)?;

		for (field, url) in [
			("notify_endpoint", &self.notify_endpoint),
			("sessions_endpoint", &self.sessions_endpoint),
		] {
			if !(url.starts_with("https://") || url.starts_with("http://")) {
				return Err(ConfigError::invalid_value(field, "must be an http(s) URL"));
			}
		}

		if self.journal_buffer_bytes < MIN_JOURNAL_BUFFER_BYTES {
			return Err(ConfigError::invalid_value(
				"journal_buffer_bytes",
				format!("must be at least {MIN_JOURNAL_BUFFER_BYTES}"),
			));
		}
		if self.journal_high_water_bytes >= self.journal_buffer_bytes {
			return Err(ConfigError::validation(
				"journal_high_water_bytes must be smaller than journal_buffer_bytes",
			));
		}
		if self.housekeeping_interval_ms == 0 {
			return Err(ConfigError::invalid_value("housekeeping_interval_ms", "must be positive"));
		}
		Ok(())
	}

	/// The configured persistence directory, or `$XDG_STATE_HOME/loom/crash`.
	pub fn resolve_persistence_dir(&self) -> Result<PathBuf, ConfigError> {
		if let Some(dir) = &self.persistence_dir {
			return Ok(dir.clone());
		}
		dirs::state_dir()
			.or_else(dirs::data_local_dir)
			.map(|base| base.join("loom").join("crash"))
			.ok_or(ConfigError::StateDirNotFound)
	}

	pub fn launch_duration(&self) -> Option<Duration> {
		(self.launch_duration_ms > 0).then(|| Duration::from_millis(self.launch_duration_ms))
	}

	pub fn launch_crash_timeout(&self) -> Duration {
		Duration::from_millis(self.launch_crash_timeout_ms)
	}

	pub fn retention(&self) -> Duration {
		Duration::from_secs(u64::from(self.retention_days) * 24 * 60 * 60)
	}

	pub fn housekeeping_interval(&self) -> Duration {
		Duration::from_millis(self.housekeeping_interval_ms)
	}

	pub fn flush_interval(&self) -> Duration {
		Duration::from_secs(self.flush_interval_secs)
	}
}

/// API keys are 32 hex characters. They appear in queue file names, so this
/// also rules out the `_` separator.
pub fn validate_api_key(api_key: &str) -> Result<(), ConfigError> {
	if api_key.is_empty() {
		return Err(ConfigError::missing_field("api_key"));
	}
	if api_key.len() != 32 || !api_key.bytes().all(|b| b.is_ascii_hexdigit()) {
		return Err(ConfigError::invalid_value("api_key", "must be 32 hex characters"));
	}
	Ok(())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
	value
		.trim()
		.parse()
		.map_err(|_| ConfigError::invalid_value(key, format!("cannot parse {value:?}")))
}
