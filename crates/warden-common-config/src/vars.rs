// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Typed, non-secret environment settings.
//!
//! Unset or empty variables yield `Ok(None)` so callers can fall back to a
//! default; malformed values are errors rather than silently ignored.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
#[error("invalid value for {var}: {value:?} ({reason})")]
pub struct EnvParseError {
	pub var: String,
	pub value: String,
	pub reason: String,
}

fn read(var: &str) -> Option<String> {
	env::var(var)
		.ok()
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty())
}

/// Parse `var` with [`FromStr`].
pub fn parse_env<T>(var: &str) -> Result<Option<T>, EnvParseError>
where
	T: FromStr,
	T::Err: std::fmt::Display,
{
	let Some(raw) = read(var) else {
		return Ok(None);
	};
	raw.parse::<T>().map(Some).map_err(|e| EnvParseError {
		var: var.to_string(),
		value: raw.clone(),
		reason: e.to_string(),
	})
}

/// Parse `var` as a whole number of milliseconds.
pub fn parse_env_duration_ms(var: &str) -> Result<Option<Duration>, EnvParseError> {
	Ok(parse_env::<u64>(var)?.map(Duration::from_millis))
}

/// Parse `var` as a whole number of seconds.
pub fn parse_env_duration_secs(var: &str) -> Result<Option<Duration>, EnvParseError> {
	Ok(parse_env::<u64>(var)?.map(Duration::from_secs))
}

/// Parse `var` as a comma-separated list, trimming entries and dropping
/// empty ones.
pub fn parse_env_list(var: &str) -> Option<Vec<String>> {
	read(var).map(|raw| {
		raw
			.split(',')
			.map(str::trim)
			.filter(|s| !s.is_empty())
			.map(str::to_string)
			.collect()
	})
}
