// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use loom_crash::{DeliveryParams, DeliveryStatus, Transport};
use parking_lot::Mutex;
use serde_json::Value;

pub const KEY: &str = "0123456789abcdef0123456789abcdef";

#[derive(Debug, Clone)]
pub struct Delivery {
	pub endpoint: String,
	pub payload_version: Option<String>,
	pub payload: Value,
}

/// Answers every request with `status`, after `delay`.
pub struct RecordingTransport {
	status: DeliveryStatus,
	delay: Duration,
	deliveries: Mutex<Vec<Delivery>>,
}

impl RecordingTransport {
	pub fn new(status: DeliveryStatus) -> Arc<Self> {
		Self::slow(status, Duration::ZERO)
	}

	pub fn slow(status: DeliveryStatus, delay: Duration) -> Arc<Self> {
		Arc::new(Self {
			status,
			delay,
			deliveries: Mutex::new(Vec::new()),
		})
	}

	pub fn deliveries(&self) -> Vec<Delivery> {
		self.deliveries.lock().clone()
	}
}

#[async_trait]
impl Transport for RecordingTransport {
	async fn deliver(&self, payload: &[u8], params: &DeliveryParams) -> DeliveryStatus {
		if !self.delay.is_zero() {
			tokio::time::sleep(self.delay).await;
		}
		self.deliveries.lock().push(Delivery {
			endpoint: params.endpoint.clone(),
			payload_version: params.header("Loom-Payload-Version").map(str::to_string),
			payload: serde_json::from_slice(payload).unwrap_or(Value::Null),
		});
		self.status
	}
}

/// Polls `condition` for up to five seconds.
pub fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
	for _ in 0..500 {
		if condition() {
			return true;
		}
		std::thread::sleep(Duration::from_millis(10));
	}
	false
}
