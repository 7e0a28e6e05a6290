// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! AEAD primitives for envelope encryption.
//!
//! AES-256-GCM seals both layers: data encryption keys under the root key and
//! secret payloads under a data encryption key. Every seal takes associated
//! data that binds the ciphertext to where it belongs, so a ciphertext moved
//! to another record fails authentication instead of decrypting.

use aes_gcm::{
	aead::{Aead, KeyInit, OsRng, Payload},
	Aes256Gcm, Key, Nonce,
};
use rand::RngCore;
use zeroize::{Zeroize, Zeroizing};

use warden_common_core::TenantId;

use crate::error::{SecretsError, SecretsResult};
use crate::types::KeyId;

/// Size of encryption keys in bytes (256 bits for AES-256).
pub const KEY_SIZE: usize = 32;

/// Size of AES-GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;

/// Ciphertext (with appended GCM tag) and the nonce it was sealed with.
#[derive(Debug, Clone)]
pub struct EncryptedData {
	pub ciphertext: Vec<u8>,
	pub nonce: [u8; NONCE_SIZE],
}

/// Generate a random encryption key.
pub fn generate_key() -> Zeroizing<[u8; KEY_SIZE]> {
	let mut key = Zeroizing::new([0u8; KEY_SIZE]);
	OsRng.fill_bytes(key.as_mut());
	key
}

/// Generate a random 96-bit nonce.
///
/// The same (key, nonce) pair must never be reused. Random nonces stay safe
/// well past the write volume a single DEK sees before rotation.
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
	let mut nonce = [0u8; NONCE_SIZE];
	OsRng.fill_bytes(&mut nonce);
	nonce
}

/// Associated data for a secret payload: `"{tenant}/{name}"`.
pub fn secret_aad(tenant: TenantId, name: &str) -> Vec<u8> {
	format!("{tenant}/{name}").into_bytes()
}

/// Associated data for a wrapped DEK: its key id.
pub fn dek_aad(key_id: &KeyId) -> Vec<u8> {
	format!("dek/{key_id}").into_bytes()
}

fn seal(key: &[u8; KEY_SIZE], plaintext: &[u8], aad: &[u8]) -> Result<EncryptedData, aes_gcm::Error> {
	let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
	let nonce_bytes = generate_nonce();
	let ciphertext = cipher.encrypt(
		Nonce::from_slice(&nonce_bytes),
		Payload {
			msg: plaintext,
			aad,
		},
	)?;
	Ok(EncryptedData {
		ciphertext,
		nonce: nonce_bytes,
	})
}

fn open(
	key: &[u8; KEY_SIZE],
	encrypted: &EncryptedData,
	aad: &[u8],
) -> Result<Zeroizing<Vec<u8>>, aes_gcm::Error> {
	let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
	let plaintext = cipher.decrypt(
		Nonce::from_slice(&encrypted.nonce),
		Payload {
			msg: encrypted.ciphertext.as_slice(),
			aad,
		},
	)?;
	Ok(Zeroizing::new(plaintext))
}

/// Wrap a DEK under the root key.
pub fn encrypt_dek(
	kek: &[u8; KEY_SIZE],
	dek: &[u8; KEY_SIZE],
	aad: &[u8],
) -> SecretsResult<EncryptedData> {
	seal(kek, dek.as_slice(), aad)
		.map_err(|e| SecretsError::Encryption(format!("DEK encryption failed: {e}")))
}

/// Unwrap a DEK with the root key.
pub fn decrypt_dek(
	kek: &[u8; KEY_SIZE],
	encrypted: &EncryptedData,
	aad: &[u8],
) -> SecretsResult<Zeroizing<[u8; KEY_SIZE]>> {
	let mut plaintext = open(kek, encrypted, aad)
		.map_err(|e| SecretsError::Decryption(format!("DEK decryption failed: {e}")))?;

	if plaintext.len() != KEY_SIZE {
		return Err(SecretsError::InvalidKeySize {
			expected: KEY_SIZE,
			actual: plaintext.len(),
		});
	}

	let mut dek = Zeroizing::new([0u8; KEY_SIZE]);
	dek.copy_from_slice(&plaintext);
	plaintext.zeroize();
	Ok(dek)
}

/// Seal a secret value with a DEK.
pub fn encrypt_secret_value(
	dek: &[u8; KEY_SIZE],
	plaintext: &[u8],
	aad: &[u8],
) -> SecretsResult<EncryptedData> {
	seal(dek, plaintext, aad)
		.map_err(|e| SecretsError::Encryption(format!("secret encryption failed: {e}")))
}

/// Open a secret value with a DEK.
pub fn decrypt_secret_value(
	dek: &[u8; KEY_SIZE],
	encrypted: &EncryptedData,
	aad: &[u8],
) -> SecretsResult<Zeroizing<Vec<u8>>> {
	open(dek, encrypted, aad)
		.map_err(|e| SecretsError::Decryption(format!("secret decryption failed: {e}")))
}

/// Rebuild an [`EncryptedData`] from a persisted nonce of unchecked length.
pub fn encrypted_data(ciphertext: &[u8], nonce: &[u8]) -> SecretsResult<EncryptedData> {
	let nonce: [u8; NONCE_SIZE] = nonce.try_into().map_err(|_| {
		SecretsError::InvalidNonce(format!(
			"expected {NONCE_SIZE}-byte nonce, got {} bytes",
			nonce.len()
		))
	})?;
	Ok(EncryptedData {
		ciphertext: ciphertext.to_vec(),
		nonce,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	const AAD: &[u8] = b"7/api-key";

	#[test]
	fn key_generation_produces_unique_keys() {
		let key1 = generate_key();
		let key2 = generate_key();
		assert_ne!(key1.as_slice(), key2.as_slice());
	}

	#[test]
	fn dek_wrapping_roundtrip() {
		let kek = generate_key();
		let dek = generate_key();

		let wrapped = encrypt_dek(&kek, &dek, b"dek/1").unwrap();
		let unwrapped = decrypt_dek(&kek, &wrapped, b"dek/1").unwrap();

		assert_eq!(dek.as_slice(), unwrapped.as_slice());
	}

	#[test]
	fn wrapped_dek_is_bound_to_its_id() {
		let kek = generate_key();
		let dek = generate_key();

		let wrapped = encrypt_dek(&kek, &dek, b"dek/1").unwrap();
		assert!(decrypt_dek(&kek, &wrapped, b"dek/2").is_err());
	}

	#[test]
	fn secret_is_bound_to_tenant_and_name() {
		let dek = generate_key();
		let sealed = encrypt_secret_value(&dek, b"v1", &secret_aad(TenantId::new(1), "k")).unwrap();

		assert!(decrypt_secret_value(&dek, &sealed, &secret_aad(TenantId::new(2), "k")).is_err());
		assert!(decrypt_secret_value(&dek, &sealed, &secret_aad(TenantId::new(1), "j")).is_err());
		let opened = decrypt_secret_value(&dek, &sealed, &secret_aad(TenantId::new(1), "k")).unwrap();
		assert_eq!(opened.as_slice(), b"v1");
	}

	#[test]
	fn wrong_key_fails_decryption() {
		let kek1 = generate_key();
		let kek2 = generate_key();
		let dek = generate_key();

		let wrapped = encrypt_dek(&kek1, &dek, AAD).unwrap();
		assert!(decrypt_dek(&kek2, &wrapped, AAD).is_err());
	}

	#[test]
	fn persisted_nonce_length_is_checked() {
		assert!(encrypted_data(b"ct", &[0u8; NONCE_SIZE]).is_ok());
		assert!(matches!(
			encrypted_data(b"ct", &[0u8; 8]),
			Err(SecretsError::InvalidNonce(_))
		));
	}

	proptest! {
		#[test]
		fn prop_secret_roundtrip(plaintext in proptest::collection::vec(any::<u8>(), 0..4096)) {
			let dek = generate_key();

			let sealed = encrypt_secret_value(&dek, &plaintext, AAD).unwrap();
			let opened = decrypt_secret_value(&dek, &sealed, AAD).unwrap();

			prop_assert_eq!(plaintext, opened.as_slice());
		}

		#[test]
		fn prop_ciphertext_never_equals_plaintext(plaintext in proptest::collection::vec(any::<u8>(), 0..1024)) {
			let dek = generate_key();
			let sealed = encrypt_secret_value(&dek, &plaintext, AAD).unwrap();

			prop_assert_ne!(&sealed.ciphertext, &plaintext);
			prop_assert_eq!(sealed.nonce.len(), NONCE_SIZE);
		}

		#[test]
		fn prop_same_plaintext_seals_differently(plaintext in proptest::collection::vec(any::<u8>(), 1..512)) {
			let dek = generate_key();

			let first = encrypt_secret_value(&dek, &plaintext, AAD).unwrap();
			let second = encrypt_secret_value(&dek, &plaintext, AAD).unwrap();

			prop_assert_ne!(first.nonce, second.nonce);
			prop_assert_ne!(first.ciphertext, second.ciphertext);
		}

		#[test]
		fn prop_tampered_ciphertext_fails(
			plaintext in proptest::collection::vec(any::<u8>(), 1..512),
			tamper_idx in 0usize..1024usize,
		) {
			let dek = generate_key();

			let mut sealed = encrypt_secret_value(&dek, &plaintext, AAD).unwrap();
			let idx = tamper_idx % sealed.ciphertext.len();
			sealed.ciphertext[idx] ^= 0xFF;

			prop_assert!(decrypt_secret_value(&dek, &sealed, AAD).is_err());
		}
	}
}
