// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the secret store.

use thiserror::Error;

use crate::types::KeyId;

/// Result type alias for secrets operations.
pub type SecretsResult<T> = Result<T, SecretsError>;

/// Errors returned by direct secret store calls.
#[derive(Debug, Error)]
pub enum SecretsError {
	// =========================================================================
	// Configuration Errors
	// =========================================================================
	#[error("configuration error: {0}")]
	Configuration(String),

	#[error("master key not configured")]
	MasterKeyNotConfigured,

	// =========================================================================
	// Encryption Errors
	// =========================================================================
	#[error("encryption failed: {0}")]
	Encryption(String),

	#[error("decryption failed: {0}")]
	Decryption(String),

	#[error("invalid key size: expected {expected}, got {actual}")]
	InvalidKeySize { expected: usize, actual: usize },

	#[error("key version mismatch: expected {expected}, got {actual}")]
	KeyVersionMismatch { expected: u32, actual: u32 },

	#[error("data encryption key not found: {0}")]
	KeyNotFound(KeyId),

	#[error("invalid nonce: {0}")]
	InvalidNonce(String),

	// =========================================================================
	// Secret Access Errors
	// =========================================================================
	#[error("secret not found: {0}")]
	SecretNotFound(String),

	#[error("invalid secret name: {0}")]
	InvalidSecretName(String),

	#[error("invalid tag: {0}")]
	InvalidTag(String),

	#[error("secret value too large: {actual} bytes (max {max})")]
	ValueTooLarge { max: usize, actual: usize },

	// =========================================================================
	// Export / Import Errors
	// =========================================================================
	#[error("invalid export: {0}")]
	InvalidExport(String),

	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	// =========================================================================
	// Infrastructure Errors
	// =========================================================================
	#[error("internal error: {0}")]
	Internal(String),
}

impl SecretsError {
	/// Returns true if this error should be logged at error level.
	pub fn is_internal(&self) -> bool {
		matches!(
			self,
			SecretsError::Internal(_)
				| SecretsError::Configuration(_)
				| SecretsError::MasterKeyNotConfigured
				| SecretsError::Encryption(_)
		)
	}

	/// Returns the HTTP status code an API layer should map this error to.
	pub fn status_code(&self) -> u16 {
		match self {
			SecretsError::SecretNotFound(_) => 404,

			SecretsError::InvalidSecretName(_)
			| SecretsError::InvalidTag(_)
			| SecretsError::InvalidExport(_)
			| SecretsError::Serialization(_) => 400,

			SecretsError::ValueTooLarge { .. } => 413,

			// A record whose key cannot be resolved or whose ciphertext fails
			// authentication is corrupt server-side state.
			SecretsError::Decryption(_)
			| SecretsError::KeyNotFound(_)
			| SecretsError::InvalidNonce(_)
			| SecretsError::InvalidKeySize { .. }
			| SecretsError::KeyVersionMismatch { .. } => 500,

			SecretsError::Configuration(_)
			| SecretsError::MasterKeyNotConfigured
			| SecretsError::Encryption(_)
			| SecretsError::Internal(_) => 500,
		}
	}

	/// True for the cipher/key failures grouped as encryption errors.
	pub fn is_encryption_failure(&self) -> bool {
		matches!(
			self,
			SecretsError::Encryption(_)
				| SecretsError::Decryption(_)
				| SecretsError::InvalidKeySize { .. }
				| SecretsError::KeyVersionMismatch { .. }
				| SecretsError::KeyNotFound(_)
				| SecretsError::InvalidNonce(_)
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn secret_not_found_is_404() {
		assert_eq!(
			SecretsError::SecretNotFound("api-key".into()).status_code(),
			404
		);
	}

	#[test]
	fn oversized_value_is_413() {
		let err = SecretsError::ValueTooLarge {
			max: 10,
			actual: 11,
		};
		assert_eq!(err.status_code(), 413);
	}

	#[test]
	fn internal_errors_are_flagged() {
		assert!(SecretsError::Internal("lock".into()).is_internal());
		assert!(!SecretsError::SecretNotFound("x".into()).is_internal());
	}

	#[test]
	fn key_failures_are_encryption_failures() {
		assert!(SecretsError::KeyNotFound(KeyId::generate()).is_encryption_failure());
		assert!(SecretsError::Decryption("tag".into()).is_encryption_failure());
		assert!(!SecretsError::InvalidTag("x".into()).is_encryption_failure());
	}
}
