// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Host side of the capability objects a script sees.
//!
//! The isolate only exchanges JSON strings with these types. Each instance
//! belongs to exactly one execution and is dropped with its isolate.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use warden_common_core::Function;
use warden_common_secret::SecretString;

use crate::network::{FetchError, FetchRequest, FetchTransport, NetworkPolicy};

/// Secret values bound for one execution, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct SecretBindings {
	values: BTreeMap<String, SecretString>,
}

impl SecretBindings {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert(&mut self, name: impl Into<String>, value: SecretString) {
		self.values.insert(name.into(), value);
	}

	pub fn get(&self, name: &str) -> Option<&SecretString> {
		self.values.get(name)
	}

	pub fn len(&self) -> usize {
		self.values.len()
	}

	pub fn is_empty(&self) -> bool {
		self.values.is_empty()
	}

	pub fn names(&self) -> impl Iterator<Item = &str> {
		self.values.keys().map(String::as_str)
	}

	pub fn values(&self) -> impl Iterator<Item = &SecretString> {
		self.values.values()
	}

	/// Only the bindings `function` declares.
	pub fn restricted_to(&self, function: &Function) -> Self {
		Self {
			values: self
				.values
				.iter()
				.filter(|(name, _)| function.declares_secret(name))
				.map(|(name, value)| (name.clone(), value.clone()))
				.collect(),
		}
	}

	/// The `secrets` object handed to the script, as JSON.
	pub(crate) fn script_json(&self) -> String {
		let object: serde_json::Map<String, serde_json::Value> = self
			.values
			.iter()
			.map(|(name, value)| (name.clone(), serde_json::Value::String(value.expose().clone())))
			.collect();
		serde_json::Value::Object(object).to_string()
	}
}

impl FromIterator<(String, SecretString)> for SecretBindings {
	fn from_iter<I: IntoIterator<Item = (String, SecretString)>>(iter: I) -> Self {
		Self {
			values: iter.into_iter().collect(),
		}
	}
}

/// Bounded capture of console output.
#[derive(Debug)]
pub(crate) struct LogSink {
	lines: Vec<String>,
	max_lines: usize,
	max_line_bytes: usize,
	dropped: usize,
}

impl LogSink {
	pub(crate) fn new(max_lines: usize, max_line_bytes: usize) -> Self {
		Self {
			lines: Vec::new(),
			max_lines,
			max_line_bytes,
			dropped: 0,
		}
	}

	pub(crate) fn push(&mut self, level: &str, message: &str) {
		if self.lines.len() >= self.max_lines {
			self.dropped += 1;
			return;
		}

		let mut line = match level {
			"log" => message.to_string(),
			other => format!("[{other}] {message}"),
		};
		if line.len() > self.max_line_bytes {
			let mut cut = self.max_line_bytes;
			while !line.is_char_boundary(cut) {
				cut -= 1;
			}
			line.truncate(cut);
			line.push_str("…[truncated]");
		}
		self.lines.push(line);
	}

	pub(crate) fn finish(mut self) -> Vec<String> {
		if self.dropped > 0 {
			self.lines
				.push(format!("[warden] {} log lines dropped", self.dropped));
		}
		self.lines
	}
}

#[derive(Debug, Default, Deserialize)]
struct FetchInit {
	#[serde(default)]
	method: Option<String>,
	#[serde(default)]
	headers: HashMap<String, String>,
	#[serde(default)]
	body: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FetchReply {
	status: u16,
	status_text: String,
	url: String,
	headers: BTreeMap<String, String>,
	body: String,
}

/// Runs a script's `fetch` calls on the engine's tokio runtime.
pub(crate) struct FetchBridge {
	policy: Arc<NetworkPolicy>,
	transport: Arc<dyn FetchTransport>,
	handle: Handle,
	deadline: Instant,
	fetch_timeout: Duration,
	violations: Vec<String>,
}

impl FetchBridge {
	pub(crate) fn new(
		policy: Arc<NetworkPolicy>,
		transport: Arc<dyn FetchTransport>,
		handle: Handle,
		deadline: Instant,
		fetch_timeout: Duration,
	) -> Self {
		Self {
			policy,
			transport,
			handle,
			deadline,
			fetch_timeout,
			violations: Vec::new(),
		}
	}

	/// Policy messages this execution has been refused with.
	pub(crate) fn violations(&self) -> &[String] {
		&self.violations
	}

	/// Perform one `fetch`. Returns the JSON the script-side facade turns
	/// into a response object or a rejection: `{"error": ...}` on failure.
	pub(crate) fn call(&mut self, url: &str, init_json: &str) -> String {
		let init: FetchInit = if init_json.is_empty() {
			FetchInit::default()
		} else {
			match serde_json::from_str(init_json) {
				Ok(init) => init,
				Err(_) => return error_reply("Invalid fetch options"),
			}
		};
		let method = init
			.method
			.as_deref()
			.unwrap_or("GET")
			.trim()
			.to_ascii_uppercase();

		let url = match self.policy.check(url, &method) {
			Ok(url) => url,
			Err(violation) => {
				let message = violation.to_string();
				warn!(method = %method, violation = %message, "Blocked fetch from script");
				self.violations.push(message.clone());
				return error_reply(&message);
			}
		};

		let remaining = self.deadline.saturating_duration_since(Instant::now());
		if remaining.is_zero() {
			return error_reply("fetch aborted: execution deadline reached");
		}
		let timeout = remaining.min(self.fetch_timeout);

		let request = FetchRequest {
			url,
			method,
			headers: init.headers.into_iter().collect(),
			body: init.body,
			timeout,
		};
		debug!(url = %request.url, method = %request.method, "Script fetch");

		let transport = Arc::clone(&self.transport);
		let outcome = self
			.handle
			.block_on(async move { tokio::time::timeout(timeout, transport.send(request)).await });

		match outcome {
			Ok(Ok(response)) => serde_json::to_string(&FetchReply {
				status: response.status,
				status_text: response.status_text,
				url: response.url,
				headers: response.headers,
				body: response.body,
			})
			.unwrap_or_else(|_| error_reply("fetch failed: unreadable response")),
			Ok(Err(err)) => error_reply(&format!("fetch failed: {err}")),
			Err(_) => error_reply(&format!("fetch failed: {}", FetchError::Timeout)),
		}
	}
}

fn error_reply(message: &str) -> String {
	json!({ "error": message }).to_string()
}
