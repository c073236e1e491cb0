// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Client-side rules that run before a queued event reaches the transport.

use std::collections::HashSet;

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendDecision {
	Send,
	/// Leave the entry queued and try again on a later flush.
	Skip,
	/// Drop the entry without sending it.
	Discard,
}

/// Decides over the parsed event payload. The first non-`Send` decision wins.
pub trait SendFilter: Send + Sync {
	fn decide(&self, payload: &Value) -> SendDecision;
}

impl<F> SendFilter for F
where
	F: Fn(&Value) -> SendDecision + Send + Sync,
{
	fn decide(&self, payload: &Value) -> SendDecision {
		self(payload)
	}
}

/// Discards every handled event.
pub struct DiscardHandled;

impl SendFilter for DiscardHandled {
	fn decide(&self, payload: &Value) -> SendDecision {
		match payload.get("unhandled").and_then(Value::as_bool) {
			Some(false) => SendDecision::Discard,
			_ => SendDecision::Send,
		}
	}
}

/// Discards events whose outermost exception has one of the given classes.
pub struct DiscardClasses {
	classes: HashSet<String>,
}

impl DiscardClasses {
	pub fn new(classes: impl IntoIterator<Item = impl Into<String>>) -> Self {
		Self {
			classes: classes.into_iter().map(Into::into).collect(),
		}
	}
}

impl SendFilter for DiscardClasses {
	fn decide(&self, payload: &Value) -> SendDecision {
		let class = payload
			.pointer("/exceptions/0/error_class")
			.and_then(Value::as_str);
		match class {
			Some(class) if self.classes.contains(class) => SendDecision::Discard,
			_ => SendDecision::Send,
		}
	}
}

pub fn run_filters<'a>(
	filters: impl IntoIterator<Item = &'a dyn SendFilter>,
	payload: &Value,
) -> SendDecision {
	filters
		.into_iter()
		.map(|filter| filter.decide(payload))
		.find(|decision| *decision != SendDecision::Send)
		.unwrap_or(SendDecision::Send)
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn discard_handled_keeps_crashes() {
		assert_eq!(DiscardHandled.decide(&json!({"unhandled": false})), SendDecision::Discard);
		assert_eq!(DiscardHandled.decide(&json!({"unhandled": true})), SendDecision::Send);
		assert_eq!(DiscardHandled.decide(&json!({})), SendDecision::Send);
	}

	#[test]
	fn discard_classes_matches_the_first_exception() {
		let filter = DiscardClasses::new(["Timeout"]);
		let timeout = json!({"exceptions": [{"error_class": "Timeout"}]});
		let other = json!({"exceptions": [{"error_class": "panic"}, {"error_class": "Timeout"}]});
		assert_eq!(filter.decide(&timeout), SendDecision::Discard);
		assert_eq!(filter.decide(&other), SendDecision::Send);
	}

	#[test]
	fn first_non_send_decision_wins() {
		let classes = DiscardClasses::new(["x"]);
		let skip = |_: &Value| SendDecision::Skip;
		let filters: Vec<&dyn SendFilter> = vec![&classes, &skip, &DiscardHandled];
		assert_eq!(run_filters(filters, &json!({"unhandled": false})), SendDecision::Skip);
		assert_eq!(run_filters(Vec::new(), &json!({})), SendDecision::Send);
	}
}
