// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Loading credentials from the environment.
//!
//! Secret-valued settings (the store's root key in particular) may be given
//! directly as `VAR` or as a path in `VAR_FILE`, the layout Docker and
//! Kubernetes use for mounted secrets. The file form wins when both are set.

use std::path::PathBuf;
use std::{env, fs};

use thiserror::Error;
use warden_common_secret::SecretString;

/// Errors that can occur when loading secrets from environment variables.
#[derive(Debug, Error)]
pub enum SecretEnvError {
	#[error("failed to read secret file at {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("secret file path in {var} is empty")]
	EmptyPath { var: String },
}

/// Load a secret from `{var}_FILE` or `{var}`.
///
/// A single trailing newline is stripped from file content. Returns
/// `Ok(None)` when neither variable is set.
///
/// ```no_run
/// use warden_common_config::load_secret_env;
///
/// if let Some(key) = load_secret_env("WARDEN_SECRETS_MASTER_KEY")? {
///     println!("root key configured: {key}"); // prints "[REDACTED]"
/// }
/// # Ok::<(), warden_common_config::SecretEnvError>(())
/// ```
pub fn load_secret_env(var: &str) -> Result<Option<SecretString>, SecretEnvError> {
	let file_var = format!("{var}_FILE");

	if let Ok(path_str) = env::var(&file_var) {
		if path_str.is_empty() {
			return Err(SecretEnvError::EmptyPath { var: file_var });
		}

		let path = PathBuf::from(&path_str);
		let content = fs::read_to_string(&path).map_err(|e| SecretEnvError::Io {
			path: path.clone(),
			source: e,
		})?;

		let secret = content.strip_suffix('\n').unwrap_or(&content).to_string();
		return Ok(Some(SecretString::new(secret)));
	}

	match env::var(var) {
		Ok(value) if !value.is_empty() => Ok(Some(SecretString::new(value))),
		_ => Ok(None),
	}
}

/// Load a secret that must be present.
pub fn require_secret_env(var: &str) -> Result<SecretString, RequiredSecretError> {
	load_secret_env(var)
		.map_err(RequiredSecretError::Load)?
		.ok_or_else(|| RequiredSecretError::Missing {
			var: var.to_string(),
			file_var: format!("{var}_FILE"),
		})
}

/// Error returned when a required secret is not found.
#[derive(Debug, Error)]
pub enum RequiredSecretError {
	#[error("required secret not found: set either {var} or {file_var}")]
	Missing { var: String, file_var: String },

	#[error(transparent)]
	Load(#[from] SecretEnvError),
}
