// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Engine limits and network allowlist.

use std::time::Duration;

use tracing::instrument;
use warden_common_config::{parse_env, parse_env_duration_ms, parse_env_list};
use warden_common_core::Function;

use crate::error::{SandboxError, SandboxResult};

const MIB: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxConfig {
	/// Budget for functions that do not request one.
	pub default_timeout: Duration,
	/// Upper bound a function's requested timeout is clamped to.
	pub max_timeout: Duration,
	pub default_memory_mb: u32,
	pub max_memory_mb: u32,
	/// How long past the deadline the supervisor waits for a worker before
	/// abandoning it.
	pub interrupt_grace: Duration,
	pub max_concurrent: usize,
	/// Abandoned workers that may keep running outside the concurrency
	/// limit. Once this many are still running, further abandoned workers
	/// keep their execution slot until they return.
	pub max_abandoned: usize,

	/// Hosts `fetch` may reach. `*.example.com` matches any subdomain.
	pub allowed_hosts: Vec<String>,
	pub allowed_methods: Vec<String>,
	pub fetch_timeout: Duration,
	pub max_response_bytes: usize,

	pub max_log_lines: usize,
	pub max_log_line_bytes: usize,
	pub max_result_bytes: usize,
}

impl Default for SandboxConfig {
	fn default() -> Self {
		let cpus = std::thread::available_parallelism()
			.map(|n| n.get())
			.unwrap_or(1);

		Self {
			default_timeout: Duration::from_millis(5_000),
			max_timeout: Duration::from_millis(60_000),
			default_memory_mb: 64,
			max_memory_mb: 256,
			interrupt_grace: Duration::from_millis(250),
			max_concurrent: cpus * 4,
			max_abandoned: cpus,
			allowed_hosts: Vec::new(),
			allowed_methods: vec!["GET".to_string(), "POST".to_string()],
			fetch_timeout: Duration::from_millis(10_000),
			max_response_bytes: MIB,
			max_log_lines: 1_000,
			max_log_line_bytes: 4 * 1024,
			max_result_bytes: MIB,
		}
	}
}

impl SandboxConfig {
	/// Load configuration from `WARDEN_SANDBOX_*` environment variables,
	/// falling back to defaults for anything unset.
	#[instrument(skip_all)]
	pub fn from_env() -> SandboxResult<Self> {
		let defaults = Self::default();

		let config = Self {
			default_timeout: parse_env_duration_ms("WARDEN_SANDBOX_DEFAULT_TIMEOUT_MS")?
				.unwrap_or(defaults.default_timeout),
			max_timeout: parse_env_duration_ms("WARDEN_SANDBOX_MAX_TIMEOUT_MS")?
				.unwrap_or(defaults.max_timeout),
			default_memory_mb: parse_env("WARDEN_SANDBOX_DEFAULT_MEMORY_MB")?
				.unwrap_or(defaults.default_memory_mb),
			max_memory_mb: parse_env("WARDEN_SANDBOX_MAX_MEMORY_MB")?.unwrap_or(defaults.max_memory_mb),
			interrupt_grace: parse_env_duration_ms("WARDEN_SANDBOX_INTERRUPT_GRACE_MS")?
				.unwrap_or(defaults.interrupt_grace),
			max_concurrent: parse_env("WARDEN_SANDBOX_MAX_CONCURRENT")?
				.unwrap_or(defaults.max_concurrent),
			max_abandoned: parse_env("WARDEN_SANDBOX_MAX_ABANDONED")?.unwrap_or(defaults.max_abandoned),
			allowed_hosts: parse_env_list("WARDEN_SANDBOX_ALLOWED_HOSTS")
				.unwrap_or(defaults.allowed_hosts),
			allowed_methods: parse_env_list("WARDEN_SANDBOX_ALLOWED_METHODS")
				.unwrap_or(defaults.allowed_methods),
			fetch_timeout: parse_env_duration_ms("WARDEN_SANDBOX_FETCH_TIMEOUT_MS")?
				.unwrap_or(defaults.fetch_timeout),
			max_response_bytes: parse_env("WARDEN_SANDBOX_MAX_RESPONSE_BYTES")?
				.unwrap_or(defaults.max_response_bytes),
			max_log_lines: parse_env("WARDEN_SANDBOX_MAX_LOG_LINES")?.unwrap_or(defaults.max_log_lines),
			max_log_line_bytes: parse_env("WARDEN_SANDBOX_MAX_LOG_LINE_BYTES")?
				.unwrap_or(defaults.max_log_line_bytes),
			max_result_bytes: parse_env("WARDEN_SANDBOX_MAX_RESULT_BYTES")?
				.unwrap_or(defaults.max_result_bytes),
		};

		config.validate()?;
		Ok(config)
	}

	pub fn validate(&self) -> SandboxResult<()> {
		if self.default_timeout.is_zero() || self.max_timeout.is_zero() {
			return Err(SandboxError::Configuration(
				"timeouts must be greater than zero".to_string(),
			));
		}
		if self.default_timeout > self.max_timeout {
			return Err(SandboxError::Configuration(
				"default timeout exceeds maximum timeout".to_string(),
			));
		}
		if self.default_memory_mb == 0 || self.default_memory_mb > self.max_memory_mb {
			return Err(SandboxError::Configuration(
				"default memory limit must be between 1 MB and the maximum".to_string(),
			));
		}
		if self.max_concurrent == 0 {
			return Err(SandboxError::Configuration(
				"max concurrent executions must be at least 1".to_string(),
			));
		}
		if self.max_log_line_bytes == 0 || self.max_result_bytes == 0 {
			return Err(SandboxError::Configuration(
				"output limits must be greater than zero".to_string(),
			));
		}
		Ok(())
	}

	/// Wall-clock budget for `function`, clamped to the configured maximum.
	pub fn timeout_for(&self, function: &Function) -> Duration {
		match function.timeout_seconds {
			Some(secs) if secs > 0 => Duration::from_secs(u64::from(secs)).min(self.max_timeout),
			_ => self.default_timeout,
		}
	}

	/// Heap ceiling for `function` in bytes, clamped to the configured maximum.
	pub fn memory_limit_for(&self, function: &Function) -> usize {
		let mb = match function.memory_limit_mb {
			Some(mb) if mb > 0 => mb.min(self.max_memory_mb),
			_ => self.default_memory_mb,
		};
		mb as usize * MIB
	}
}
