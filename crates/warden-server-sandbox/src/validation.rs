// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Pre-execution scan of call parameters.
//!
//! Params often end up rendered by a downstream consumer, so markup that
//! could be interpreted as script there is rejected before the isolate is
//! built. Object keys are scanned as well as string values.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

pub const MAX_PARAMS_DEPTH: usize = 64;
pub const MAX_PARAMS_BYTES: usize = 1024 * 1024;

static SCRIPT_TAG: Lazy<Regex> =
	Lazy::new(|| Regex::new(r"(?i)<\s*/?\s*script\b").expect("valid regex"));
static EVENT_HANDLER: Lazy<Regex> =
	Lazy::new(|| Regex::new(r#"(?i)(?:^|[\s"'/<;])on[a-z]{3,}\s*="#).expect("valid regex"));
static JAVASCRIPT_URI: Lazy<Regex> =
	Lazy::new(|| Regex::new(r"(?i)javascript\s*:").expect("valid regex"));
static VBSCRIPT_URI: Lazy<Regex> =
	Lazy::new(|| Regex::new(r"(?i)vbscript\s*:").expect("valid regex"));
static PLAIN_KEY: Lazy<Regex> =
	Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,63}$").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
	#[error("validation failed: {path} contains {pattern}")]
	Injection { path: String, pattern: &'static str },

	#[error("validation failed: params nested deeper than {max} levels")]
	TooDeep { max: usize },

	#[error("validation failed: params exceed {max} bytes")]
	TooLarge { max: usize },

	#[error("validation failed: {0}")]
	Other(String),
}

fn injection_in(text: &str) -> Option<&'static str> {
	if SCRIPT_TAG.is_match(text) {
		Some("a script tag")
	} else if EVENT_HANDLER.is_match(text) {
		Some("an event handler attribute")
	} else if JAVASCRIPT_URI.is_match(text) {
		Some("a javascript URI")
	} else if VBSCRIPT_URI.is_match(text) {
		Some("a vbscript URI")
	} else {
		None
	}
}

/// Reject params that carry markup injection or exceed the size limits.
pub fn validate_params(params: &Value) -> Result<(), ValidationError> {
	let size = serde_json::to_vec(params)
		.map_err(|e| ValidationError::Other(e.to_string()))?
		.len();
	if size > MAX_PARAMS_BYTES {
		return Err(ValidationError::TooLarge {
			max: MAX_PARAMS_BYTES,
		});
	}

	let mut path = String::from("$");
	scan(params, &mut path, 0)
}

fn scan(value: &Value, path: &mut String, depth: usize) -> Result<(), ValidationError> {
	if depth > MAX_PARAMS_DEPTH {
		return Err(ValidationError::TooDeep {
			max: MAX_PARAMS_DEPTH,
		});
	}

	match value {
		Value::String(text) => check(text, path),
		Value::Array(items) => {
			for (index, item) in items.iter().enumerate() {
				let len = path.len();
				path.push_str(&format!("[{index}]"));
				scan(item, path, depth + 1)?;
				path.truncate(len);
			}
			Ok(())
		}
		Value::Object(map) => {
			for (position, (key, item)) in map.iter().enumerate() {
				let len = path.len();
				push_key(path, key, position);
				check(key, path)?;
				scan(item, path, depth + 1)?;
				path.truncate(len);
			}
			Ok(())
		}
		Value::Null | Value::Bool(_) | Value::Number(_) => Ok(()),
	}
}

/// Paths are echoed in the error, so only identifier-like keys are spelled
/// out. Anything else is named by its position in the object.
fn push_key(path: &mut String, key: &str, position: usize) {
	if PLAIN_KEY.is_match(key) {
		path.push('.');
		path.push_str(key);
	} else {
		path.push_str(&format!("[key #{position}]"));
	}
}

fn check(text: &str, path: &str) -> Result<(), ValidationError> {
	match injection_in(text) {
		Some(pattern) => Err(ValidationError::Injection {
			path: path.to_string(),
			pattern,
		}),
		None => Ok(()),
	}
}
