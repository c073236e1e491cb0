// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Example: crash, then report the crash on the next launch.
//!
//! Run with:
//!   cargo run --example capture -p loom-crash -- --crash
//!   cargo run --example capture -p loom-crash

use std::time::Duration;

use loom_crash::{BreadcrumbType, CrashClient, CrashConfig, RecoveryOutcome, UserContext};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("loom_crash=debug,info")))
		.init();

	let mut config = CrashConfig::default();
	config.apply_env_from(|key| std::env::var(key).ok())?;
	if config.api_key.is_empty() {
		config.api_key = "0123456789abcdef0123456789abcdef".to_string();
	}
	if config.persistence_dir.is_none() {
		config.persistence_dir = Some(std::env::temp_dir().join("loom-crash-example"));
	}

	let client = CrashClient::builder()
		.config(config)
		.app_version("0.1.0-example")
		.release_stage("development")
		.build()?;

	println!("Persistence dir: {}", client.persistence_dir().display());
	println!("Device ID: {}", client.device_id().unwrap_or("<none>"));
	if let Some(info) = client.last_run_info() {
		println!("Last run: {info:?}");
	}
	match client.recovery_outcome() {
		RecoveryOutcome::Recovered { event_id, suffix, .. } => {
			println!("Recovered crash {event_id} from previous run ({})", suffix.as_str());
		}
		other => println!("Recovery: {other:?}"),
	}
	println!("Launch flush: {:?}", client.launch_flush_outcome());

	client.set_user(UserContext {
		id: Some("user_example_123".to_string()),
		email: Some("example@example.com".to_string()),
		name: Some("Example User".to_string()),
	});
	client.start_session()?;
	client.leave_breadcrumb("Application started", BreadcrumbType::State);
	client.add_metadata("example", "mode", "capture".into());

	if std::env::args().any(|arg| arg == "--crash") {
		client.leave_breadcrumb("About to crash", BreadcrumbType::Error);
		panic!("example crash during launch");
	}

	client.mark_launch_completed();
	client.notify_error(&std::io::Error::other("example handled error"))?;
	client.flush();

	std::thread::sleep(Duration::from_secs(2));
	client.shutdown(Duration::from_secs(5));
	println!("Client shutdown complete.");
	Ok(())
}
