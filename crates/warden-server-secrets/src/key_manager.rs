// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Data encryption key table and rotation.
//!
//! Exactly one DEK is active at a time. A write asks for the active key; if
//! it is older than the rotation interval a new DEK is generated first and the
//! old one retired. Retired keys are never dropped, so every record's
//! `keyID` keeps resolving.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};
use zeroize::Zeroizing;

use crate::encryption::{self, KEY_SIZE};
use crate::error::{SecretsError, SecretsResult};
use crate::key_backend::{KeyBackend, WrappedDek};
use crate::types::KeyId;

/// Table entry for one DEK. Holds only the wrapped key bytes.
#[derive(Debug, Clone)]
struct DataEncryptionKey {
	wrapped: WrappedDek,
	created_at: DateTime<Utc>,
	retired_at: Option<DateTime<Utc>>,
}

/// Non-secret view of a DEK.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyInfo {
	#[serde(rename = "keyID")]
	pub key_id: KeyId,
	pub created_at: DateTime<Utc>,
	pub retired_at: Option<DateTime<Utc>>,
	pub active: bool,
}

/// A wrapped DEK as carried in an export blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedKey {
	#[serde(rename = "keyID")]
	pub key_id: KeyId,
	pub wrapped: WrappedDek,
	pub created_at: DateTime<Utc>,
}

struct KeyRing {
	keys: HashMap<KeyId, DataEncryptionKey>,
	active: Option<KeyId>,
	rotation_interval: Duration,
}

pub struct KeyManager<K: KeyBackend> {
	backend: K,
	ring: RwLock<KeyRing>,
}

fn rotation_due(created_at: DateTime<Utc>, now: DateTime<Utc>, interval: Duration) -> bool {
	let age = (now - created_at).to_std().unwrap_or(Duration::ZERO);
	age >= interval
}

impl<K: KeyBackend> KeyManager<K> {
	pub fn new(backend: K, rotation_interval: Duration) -> Self {
		Self {
			backend,
			ring: RwLock::new(KeyRing {
				keys: HashMap::new(),
				active: None,
				rotation_interval,
			}),
		}
	}

	pub fn backend(&self) -> &K {
		&self.backend
	}

	/// Change how long a DEK stays active. Zero rotates on every write.
	pub async fn set_rotation_interval(&self, interval: Duration) {
		let mut ring = self.ring.write().await;
		ring.rotation_interval = interval;
		info!(interval_secs = interval.as_secs(), "Key rotation interval updated");
	}

	pub async fn rotation_interval(&self) -> Duration {
		self.ring.read().await.rotation_interval
	}

	pub async fn active_key_id(&self) -> Option<KeyId> {
		self.ring.read().await.active
	}

	/// The DEK new writes must use, rotating first when the active one is due.
	#[instrument(skip(self))]
	pub async fn key_for_write(&self) -> SecretsResult<(KeyId, Zeroizing<[u8; KEY_SIZE]>)> {
		let mut ring = self.ring.write().await;
		let now = Utc::now();

		let current = ring
			.active
			.and_then(|id| ring.keys.get(&id).map(|key| (id, key.created_at)));
		let key_id = match current {
			Some((id, created_at)) if !rotation_due(created_at, now, ring.rotation_interval) => id,
			_ => self.rotate_locked(&mut ring, now).await?,
		};

		let entry = ring
			.keys
			.get(&key_id)
			.ok_or(SecretsError::KeyNotFound(key_id))?;
		let dek = self.backend.unwrap_dek(&key_id, &entry.wrapped).await?;
		Ok((key_id, dek))
	}

	/// The DEK a record sealed under `key_id` needs, active or retired.
	pub async fn key_for_read(&self, key_id: &KeyId) -> SecretsResult<Zeroizing<[u8; KEY_SIZE]>> {
		let wrapped = {
			let ring = self.ring.read().await;
			ring
				.keys
				.get(key_id)
				.map(|key| key.wrapped.clone())
				.ok_or(SecretsError::KeyNotFound(*key_id))?
		};
		debug!(key_id = %key_id, "Resolving data encryption key");
		self.backend.unwrap_dek(key_id, &wrapped).await
	}

	/// Retire the active DEK and create a new one immediately.
	pub async fn rotate_now(&self) -> SecretsResult<KeyId> {
		let mut ring = self.ring.write().await;
		self.rotate_locked(&mut ring, Utc::now()).await
	}

	async fn rotate_locked(&self, ring: &mut KeyRing, now: DateTime<Utc>) -> SecretsResult<KeyId> {
		let key_id = KeyId::generate();
		let dek = encryption::generate_key();
		let wrapped = self.backend.wrap_dek(&key_id, &dek).await?;

		let previous = ring.active.take();
		if let Some(previous) = previous {
			if let Some(old) = ring.keys.get_mut(&previous) {
				old.retired_at = Some(now);
			}
		}

		ring.keys.insert(
			key_id,
			DataEncryptionKey {
				wrapped,
				created_at: now,
				retired_at: None,
			},
		);
		ring.active = Some(key_id);

		info!(
			key_id = %key_id,
			retired_key_id = ?previous.map(|id| id.to_string()),
			"Rotated data encryption key"
		);
		Ok(key_id)
	}

	pub async fn key_infos(&self) -> Vec<KeyInfo> {
		let ring = self.ring.read().await;
		let mut infos: Vec<KeyInfo> = ring
			.keys
			.iter()
			.map(|(id, key)| KeyInfo {
				key_id: *id,
				created_at: key.created_at,
				retired_at: key.retired_at,
				active: ring.active == Some(*id),
			})
			.collect();
		infos.sort_by_key(|info| info.created_at);
		infos
	}

	/// Wrapped copies of the given keys, for an export blob.
	pub async fn export_keys(&self, ids: &BTreeSet<KeyId>) -> SecretsResult<Vec<ExportedKey>> {
		let ring = self.ring.read().await;
		ids
			.iter()
			.map(|id| {
				ring
					.keys
					.get(id)
					.map(|key| ExportedKey {
						key_id: *id,
						wrapped: key.wrapped.clone(),
						created_at: key.created_at,
					})
					.ok_or(SecretsError::KeyNotFound(*id))
			})
			.collect()
	}

	/// Register keys from an export blob that this table does not know yet.
	///
	/// Every key must unwrap under this backend's root key; nothing is
	/// registered unless all of them do. Imported keys are retired on arrival.
	pub async fn import_keys(&self, keys: &[ExportedKey]) -> SecretsResult<usize> {
		let mut ring = self.ring.write().await;
		let unknown: Vec<&ExportedKey> = keys
			.iter()
			.filter(|key| !ring.keys.contains_key(&key.key_id))
			.collect();

		for key in &unknown {
			self
				.backend
				.unwrap_dek(&key.key_id, &key.wrapped)
				.await
				.map_err(|e| {
					SecretsError::InvalidExport(format!(
						"key {} does not unwrap under this store's root key: {e}",
						key.key_id
					))
				})?;
		}

		let now = Utc::now();
		for key in &unknown {
			ring.keys.insert(
				key.key_id,
				DataEncryptionKey {
					wrapped: key.wrapped.clone(),
					created_at: key.created_at,
					retired_at: Some(now),
				},
			);
		}

		if !unknown.is_empty() {
			info!(count = unknown.len(), "Registered imported data encryption keys");
		}
		Ok(unknown.len())
	}
}
