// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration for the secret store.
//!
//! - Root key (KEK) for envelope encryption
//! - DEK rotation interval
//! - Audit retention per tenant

use std::time::Duration;

use tracing::instrument;
use warden_common_config::{
	parse_env, parse_env_duration_secs, require_secret_env, RequiredSecretError,
};
use warden_common_secret::SecretString;

use crate::error::{SecretsError, SecretsResult};
use crate::key_backend::SoftwareKeyBackend;

/// Default DEK rotation interval (90 days).
const DEFAULT_KEY_ROTATION_SECS: u64 = 90 * 24 * 60 * 60;

/// Default number of audit entries kept per tenant.
const DEFAULT_AUDIT_RETENTION: usize = 10_000;

pub const MASTER_KEY_VAR: &str = "WARDEN_SECRETS_MASTER_KEY";
pub const KEY_ROTATION_VAR: &str = "WARDEN_SECRETS_KEY_ROTATION_SECS";
pub const AUDIT_RETENTION_VAR: &str = "WARDEN_SECRETS_AUDIT_RETENTION";

#[derive(Clone)]
pub struct SecretsConfig {
	/// Base64-encoded 32-byte root key.
	master_key: SecretString,

	/// How long a DEK stays active. Zero rotates on every write.
	key_rotation_interval: Duration,

	audit_retention: usize,
}

impl SecretsConfig {
	/// Create a new secret store configuration.
	///
	/// # Arguments
	/// * `master_key` - base64-encoded 32-byte root key
	/// * `key_rotation_interval` - defaults to 90 days
	/// * `audit_retention` - entries kept per tenant, defaults to 10 000
	pub fn new(
		master_key: SecretString,
		key_rotation_interval: Option<Duration>,
		audit_retention: Option<usize>,
	) -> SecretsResult<Self> {
		SoftwareKeyBackend::from_base64(&master_key)?;

		let audit_retention = audit_retention.unwrap_or(DEFAULT_AUDIT_RETENTION);
		if audit_retention == 0 {
			return Err(SecretsError::Configuration(
				"audit retention must be at least 1".to_string(),
			));
		}

		Ok(Self {
			master_key,
			key_rotation_interval: key_rotation_interval
				.unwrap_or(Duration::from_secs(DEFAULT_KEY_ROTATION_SECS)),
			audit_retention,
		})
	}

	/// Load configuration from environment variables.
	///
	/// Environment variables:
	/// - `WARDEN_SECRETS_MASTER_KEY` - root key (base64)
	/// - `WARDEN_SECRETS_MASTER_KEY_FILE` - path to a file containing the root key
	/// - `WARDEN_SECRETS_KEY_ROTATION_SECS` - DEK rotation interval (default: 90 days)
	/// - `WARDEN_SECRETS_AUDIT_RETENTION` - audit entries kept per tenant (default: 10000)
	#[instrument(skip_all)]
	pub fn from_env() -> SecretsResult<Self> {
		let master_key = require_secret_env(MASTER_KEY_VAR).map_err(|e| match e {
			RequiredSecretError::Missing { .. } => SecretsError::MasterKeyNotConfigured,
			RequiredSecretError::Load(e) => SecretsError::Configuration(e.to_string()),
		})?;

		let rotation = parse_env_duration_secs(KEY_ROTATION_VAR)
			.map_err(|e| SecretsError::Configuration(e.to_string()))?;
		let retention = parse_env::<usize>(AUDIT_RETENTION_VAR)
			.map_err(|e| SecretsError::Configuration(e.to_string()))?;

		Self::new(master_key, rotation, retention)
	}

	pub fn master_key(&self) -> &SecretString {
		&self.master_key
	}

	pub fn key_rotation_interval(&self) -> Duration {
		self.key_rotation_interval
	}

	pub fn audit_retention(&self) -> usize {
		self.audit_retention
	}

	/// The in-process root key backend for this configuration.
	pub fn key_backend(&self) -> SecretsResult<SoftwareKeyBackend> {
		SoftwareKeyBackend::from_base64(&self.master_key)
	}
}

impl std::fmt::Debug for SecretsConfig {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SecretsConfig")
			.field("master_key", &"[REDACTED]")
			.field("key_rotation_interval", &self.key_rotation_interval)
			.field("audit_retention", &self.audit_retention)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
	use std::io::Write;
	use tempfile::NamedTempFile;

	fn key() -> SecretString {
		SecretString::new(BASE64.encode([42u8; 32]))
	}

	#[test]
	fn defaults_apply() {
		let config = SecretsConfig::new(key(), None, None).unwrap();
		assert_eq!(
			config.key_rotation_interval(),
			Duration::from_secs(DEFAULT_KEY_ROTATION_SECS)
		);
		assert_eq!(config.audit_retention(), DEFAULT_AUDIT_RETENTION);
	}

	#[test]
	fn short_master_key_is_rejected() {
		let result = SecretsConfig::new(SecretString::new(BASE64.encode([1u8; 8])), None, None);
		assert!(matches!(result, Err(SecretsError::Configuration(_))));
	}

	#[test]
	fn non_base64_master_key_is_rejected() {
		let result = SecretsConfig::new(SecretString::new("not base64!".to_string()), None, None);
		assert!(result.is_err());
	}

	#[test]
	fn zero_retention_is_rejected() {
		let result = SecretsConfig::new(key(), None, Some(0));
		assert!(result.unwrap_err().to_string().contains("at least 1"));
	}

	#[test]
	fn zero_rotation_is_allowed() {
		let config = SecretsConfig::new(key(), Some(Duration::ZERO), None).unwrap();
		assert_eq!(config.key_rotation_interval(), Duration::ZERO);
	}

	#[test]
	fn debug_redacts_master_key() {
		let encoded = BASE64.encode([42u8; 32]);
		let config = SecretsConfig::new(SecretString::new(encoded.clone()), None, None).unwrap();
		let debug = format!("{config:?}");
		assert!(!debug.contains(&encoded));
		assert!(debug.contains("[REDACTED]"));
	}

	// The only test that touches the WARDEN_SECRETS_* variables.
	#[test]
	fn from_env_reads_file_and_typed_settings() {
		std::env::remove_var(MASTER_KEY_VAR);
		std::env::remove_var(format!("{MASTER_KEY_VAR}_FILE"));
		assert!(matches!(
			SecretsConfig::from_env(),
			Err(SecretsError::MasterKeyNotConfigured)
		));

		let mut file = NamedTempFile::new().unwrap();
		writeln!(file, "{}", BASE64.encode([9u8; 32])).unwrap();
		std::env::set_var(format!("{MASTER_KEY_VAR}_FILE"), file.path());
		std::env::set_var(KEY_ROTATION_VAR, "3600");
		std::env::set_var(AUDIT_RETENTION_VAR, "50");

		let config = SecretsConfig::from_env().unwrap();
		assert_eq!(config.key_rotation_interval(), Duration::from_secs(3600));
		assert_eq!(config.audit_retention(), 50);
		assert!(config.key_backend().is_ok());

		std::env::set_var(KEY_ROTATION_VAR, "soon");
		assert!(matches!(
			SecretsConfig::from_env(),
			Err(SecretsError::Configuration(_))
		));

		std::env::remove_var(format!("{MASTER_KEY_VAR}_FILE"));
		std::env::remove_var(KEY_ROTATION_VAR);
		std::env::remove_var(AUDIT_RETENTION_VAR);
	}
}
