// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Root key abstraction.
//!
//! The root key (KEK) only ever wraps and unwraps data encryption keys. It is
//! kept behind [`KeyBackend`] so an HSM or KMS implementation can replace the
//! in-process [`SoftwareKeyBackend`] without touching the rest of the store.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use warden_common_secret::SecretString;

use crate::encryption::{self, EncryptedData, KEY_SIZE, NONCE_SIZE};
use crate::error::{SecretsError, SecretsResult};
use crate::types::{base64_bytes, KeyId};

/// A DEK sealed under the root key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WrappedDek {
	#[serde(with = "base64_bytes")]
	pub encrypted_key: Vec<u8>,
	#[serde(with = "base64_bytes")]
	pub nonce: Vec<u8>,
	pub kek_version: u32,
}

#[async_trait]
pub trait KeyBackend: Send + Sync {
	/// Wrap a DEK under the root key, bound to `key_id`.
	async fn wrap_dek(&self, key_id: &KeyId, dek: &[u8; KEY_SIZE]) -> SecretsResult<WrappedDek>;

	/// Unwrap a DEK previously produced by [`KeyBackend::wrap_dek`] for the
	/// same `key_id`.
	async fn unwrap_dek(
		&self,
		key_id: &KeyId,
		wrapped: &WrappedDek,
	) -> SecretsResult<Zeroizing<[u8; KEY_SIZE]>>;

	fn kek_version(&self) -> u32;
}

/// In-process root key.
pub struct SoftwareKeyBackend {
	kek: Zeroizing<[u8; KEY_SIZE]>,
	kek_version: u32,
}

impl SoftwareKeyBackend {
	pub fn new(kek: Zeroizing<[u8; KEY_SIZE]>) -> Self {
		Self {
			kek,
			kek_version: 1,
		}
	}

	/// Create from a base64-encoded 32-byte key.
	pub fn from_base64(kek_base64: &SecretString) -> SecretsResult<Self> {
		let kek_bytes: Zeroizing<Vec<u8>> = Zeroizing::new(
			BASE64
				.decode(kek_base64.expose().trim().as_bytes())
				.map_err(|e| SecretsError::Configuration(format!("invalid KEK base64: {e}")))?,
		);

		if kek_bytes.len() != KEY_SIZE {
			return Err(SecretsError::Configuration(format!(
				"KEK must be {} bytes, got {}",
				KEY_SIZE,
				kek_bytes.len()
			)));
		}

		let mut kek = Zeroizing::new([0u8; KEY_SIZE]);
		kek.copy_from_slice(&kek_bytes);
		Ok(Self::new(kek))
	}

	/// A backend with a freshly generated root key. Everything sealed under it
	/// is lost when it drops.
	pub fn ephemeral() -> Self {
		Self::new(encryption::generate_key())
	}
}

#[async_trait]
impl KeyBackend for SoftwareKeyBackend {
	async fn wrap_dek(&self, key_id: &KeyId, dek: &[u8; KEY_SIZE]) -> SecretsResult<WrappedDek> {
		let sealed = encryption::encrypt_dek(&self.kek, dek, &encryption::dek_aad(key_id))?;

		Ok(WrappedDek {
			encrypted_key: sealed.ciphertext,
			nonce: sealed.nonce.to_vec(),
			kek_version: self.kek_version,
		})
	}

	async fn unwrap_dek(
		&self,
		key_id: &KeyId,
		wrapped: &WrappedDek,
	) -> SecretsResult<Zeroizing<[u8; KEY_SIZE]>> {
		if wrapped.kek_version != self.kek_version {
			return Err(SecretsError::KeyVersionMismatch {
				expected: self.kek_version,
				actual: wrapped.kek_version,
			});
		}

		let nonce: [u8; NONCE_SIZE] = wrapped.nonce.as_slice().try_into().map_err(|_| {
			SecretsError::InvalidNonce(format!(
				"wrapped DEK nonce must be {NONCE_SIZE} bytes, got {}",
				wrapped.nonce.len()
			))
		})?;
		let sealed = EncryptedData {
			ciphertext: wrapped.encrypted_key.clone(),
			nonce,
		};

		encryption::decrypt_dek(&self.kek, &sealed, &encryption::dek_aad(key_id))
	}

	fn kek_version(&self) -> u32 {
		self.kek_version
	}
}

impl std::fmt::Debug for SoftwareKeyBackend {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SoftwareKeyBackend")
			.field("kek", &"[REDACTED]")
			.field("kek_version", &self.kek_version)
			.finish()
	}
}
