// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Persisted secret records and their non-secret projections.
//!
//! No type in this module carries plaintext. [`EncryptedSecret`] is the
//! persisted layout; [`SecretMetadata`] is what metadata queries return.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use warden_common_core::TenantId;

use crate::encryption::NONCE_SIZE;

/// Identifier of a data encryption key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyId(Uuid);

impl KeyId {
	pub fn new(id: Uuid) -> Self {
		Self(id)
	}

	pub fn generate() -> Self {
		Self(Uuid::new_v4())
	}

	pub fn as_uuid(&self) -> &Uuid {
		&self.0
	}
}

impl fmt::Display for KeyId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// A payload freshly sealed under a DEK, before the store assigns it a
/// version.
#[derive(Debug, Clone)]
pub struct SealedValue {
	pub ciphertext: Vec<u8>,
	pub nonce: [u8; NONCE_SIZE],
	pub key_id: KeyId,
}

/// One tenant's named secret as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedSecret {
	#[serde(rename = "tenantID")]
	pub tenant_id: TenantId,
	pub name: String,
	#[serde(with = "base64_bytes")]
	pub ciphertext: Vec<u8>,
	#[serde(with = "base64_bytes")]
	pub nonce: Vec<u8>,
	#[serde(rename = "keyID")]
	pub key_id: KeyId,
	/// Starts at 1 and increases by one on every value write.
	pub version: u32,
	#[serde(default)]
	pub tags: Vec<String>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl EncryptedSecret {
	pub fn metadata(&self) -> SecretMetadata {
		SecretMetadata {
			name: self.name.clone(),
			version: self.version,
			tags: self.tags.clone(),
			key_id: self.key_id,
			created_at: self.created_at,
			updated_at: self.updated_at,
		}
	}
}

/// The non-secret projection of an [`EncryptedSecret`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretMetadata {
	pub name: String,
	pub version: u32,
	pub tags: Vec<String>,
	#[serde(rename = "keyID")]
	pub key_id: KeyId,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

pub(crate) mod base64_bytes {
	use base64::{engine::general_purpose::STANDARD, Engine};
	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(&STANDARD.encode(bytes))
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
	where
		D: Deserializer<'de>,
	{
		let s = String::deserialize(deserializer)?;
		STANDARD.decode(&s).map_err(serde::de::Error::custom)
	}
}
