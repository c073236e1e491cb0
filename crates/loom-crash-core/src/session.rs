// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Session payloads for release health.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::UserContext;
use crate::event::{EventCounts, SessionSummary};

/// A user engagement period, queued and delivered like an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
	pub id: String,
	pub api_key: String,
	pub started_at: DateTime<Utc>,
	#[serde(default)]
	pub user: UserContext,
	#[serde(default)]
	pub app: serde_json::Map<String, serde_json::Value>,
	#[serde(default)]
	pub device: serde_json::Map<String, serde_json::Value>,
	#[serde(default)]
	pub events: EventCounts,
}

impl Session {
	pub fn new(api_key: impl Into<String>, user: UserContext) -> Self {
		Self {
			id: Uuid::now_v7().to_string(),
			api_key: api_key.into(),
			started_at: Utc::now(),
			user,
			app: serde_json::Map::new(),
			device: serde_json::Map::new(),
			events: EventCounts::default(),
		}
	}

	/// The subset attached to events captured during this session.
	pub fn summary(&self) -> SessionSummary {
		SessionSummary {
			id: self.id.clone(),
			started_at: self.started_at,
			events: self.events,
		}
	}
}
