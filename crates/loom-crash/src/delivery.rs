// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Sending queued payloads.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use reqwest::Client;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::Result;
use crate::store::QueueKind;

pub const EVENTS_PAYLOAD_VERSION: &str = "4.0";
pub const SESSIONS_PAYLOAD_VERSION: &str = "1.0";

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
	/// Accepted; the entry can be deleted.
	Delivered,
	/// Worth retrying later.
	Undelivered,
	/// Rejected for good; retrying cannot help.
	PermanentFailure,
}

impl DeliveryStatus {
	/// Maps an HTTP status. `0` stands for "no response at all".
	pub fn from_http_status(status: u16) -> Self {
		match status {
			200..=299 => Self::Delivered,
			0 | 408 | 429 => Self::Undelivered,
			400..=499 => Self::PermanentFailure,
			_ => Self::Undelivered,
		}
	}
}

/// Endpoint and headers for one payload.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryParams {
	pub endpoint: String,
	pub headers: Vec<(String, String)>,
}

impl DeliveryParams {
	pub fn new(endpoint: impl Into<String>, kind: QueueKind, api_key: &str, payload: &[u8]) -> Self {
		let payload_version = match kind {
			QueueKind::Events => EVENTS_PAYLOAD_VERSION,
			QueueKind::Sessions => SESSIONS_PAYLOAD_VERSION,
		};
		let headers = vec![
			("Loom-Api-Key".to_string(), api_key.to_string()),
			("Loom-Payload-Version".to_string(), payload_version.to_string()),
			(
				"Loom-Sent-At".to_string(),
				Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
			),
			("Loom-Integrity".to_string(), integrity(payload)),
			("Content-Type".to_string(), "application/json".to_string()),
		];
		Self {
			endpoint: endpoint.into(),
			headers,
		}
	}

	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers
			.iter()
			.find(|(k, _)| k.eq_ignore_ascii_case(name))
			.map(|(_, v)| v.as_str())
	}
}

/// `sha256 <hex digest>` of the exact bytes sent.
pub fn integrity(payload: &[u8]) -> String {
	format!("sha256 {}", hex::encode(Sha256::digest(payload)))
}

#[async_trait]
pub trait Transport: Send + Sync {
	/// Sends `payload`. Must not panic; failures are expressed as a status.
	async fn deliver(&self, payload: &[u8], params: &DeliveryParams) -> DeliveryStatus;
}

pub struct HttpTransport {
	client: Client,
}

impl HttpTransport {
	pub fn new() -> Result<Self> {
		Self::with_timeout(DEFAULT_REQUEST_TIMEOUT)
	}

	pub fn with_timeout(timeout: Duration) -> Result<Self> {
		let client = Client::builder()
			.user_agent(concat!("loom-crash-rust/", env!("CARGO_PKG_VERSION")))
			.timeout(timeout)
			.build()?;
		Ok(Self { client })
	}
}

#[async_trait]
impl Transport for HttpTransport {
	async fn deliver(&self, payload: &[u8], params: &DeliveryParams) -> DeliveryStatus {
		let mut request = self.client.post(&params.endpoint).body(payload.to_vec());
		for (name, value) in &params.headers {
			request = request.header(name.as_str(), value.as_str());
		}

		match request.send().await {
			Ok(response) => {
				let code = response.status().as_u16();
				let status = DeliveryStatus::from_http_status(code);
				debug!(endpoint = %params.endpoint, code, ?status, "delivery attempt finished");
				status
			}
			Err(e) => {
				warn!(endpoint = %params.endpoint, error = %e, "delivery request failed");
				DeliveryStatus::from_http_status(0)
			}
		}
	}
}
