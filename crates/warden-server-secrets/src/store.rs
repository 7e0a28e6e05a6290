// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Storage of sealed secret records, keyed by `(tenant, name)`.
//!
//! The store never sees plaintext or key material. [`InMemorySecretStore`]
//! keeps one map per tenant behind its own reader/writer lock, so writes for
//! one tenant do not block reads for another; the outer lock is only held to
//! find or create a tenant's map.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use warden_common_core::TenantId;

use crate::error::SecretsResult;
use crate::types::{EncryptedSecret, SealedValue};

#[async_trait]
pub trait SecretStore: Send + Sync {
	async fn get(&self, tenant: TenantId, name: &str) -> SecretsResult<Option<EncryptedSecret>>;

	/// Store a freshly sealed value. Creates the record at version 1 or
	/// replaces the payload of the existing one and bumps its version; tags
	/// and creation time are kept.
	async fn upsert(
		&self,
		tenant: TenantId,
		name: &str,
		sealed: SealedValue,
	) -> SecretsResult<EncryptedSecret>;

	/// Returns whether a record was removed.
	async fn delete(&self, tenant: TenantId, name: &str) -> SecretsResult<bool>;

	/// Names of the tenant's secrets, sorted.
	async fn list_names(&self, tenant: TenantId) -> SecretsResult<Vec<String>>;

	async fn update_tags(
		&self,
		tenant: TenantId,
		name: &str,
		tags: Vec<String>,
	) -> SecretsResult<Option<EncryptedSecret>>;

	/// Every record the tenant owns, sorted by name.
	async fn all(&self, tenant: TenantId) -> SecretsResult<Vec<EncryptedSecret>>;

	/// Put records back exactly as given, replacing same-named ones.
	async fn restore(&self, tenant: TenantId, records: Vec<EncryptedSecret>) -> SecretsResult<()>;
}

type TenantSecrets = Arc<RwLock<HashMap<String, EncryptedSecret>>>;

#[derive(Default)]
pub struct InMemorySecretStore {
	tenants: RwLock<HashMap<TenantId, TenantSecrets>>,
}

impl InMemorySecretStore {
	pub fn new() -> Self {
		Self::default()
	}

	async fn tenant(&self, tenant: TenantId) -> Option<TenantSecrets> {
		self.tenants.read().await.get(&tenant).cloned()
	}

	async fn tenant_or_create(&self, tenant: TenantId) -> TenantSecrets {
		if let Some(existing) = self.tenant(tenant).await {
			return existing;
		}
		self.tenants.write().await.entry(tenant).or_default().clone()
	}
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
	async fn get(&self, tenant: TenantId, name: &str) -> SecretsResult<Option<EncryptedSecret>> {
		let Some(secrets) = self.tenant(tenant).await else {
			return Ok(None);
		};
		let found = secrets.read().await.get(name).cloned();
		Ok(found)
	}

	async fn upsert(
		&self,
		tenant: TenantId,
		name: &str,
		sealed: SealedValue,
	) -> SecretsResult<EncryptedSecret> {
		let secrets = self.tenant_or_create(tenant).await;
		let mut secrets = secrets.write().await;
		let now = Utc::now();

		let record = match secrets.get(name) {
			Some(existing) => EncryptedSecret {
				ciphertext: sealed.ciphertext,
				nonce: sealed.nonce.to_vec(),
				key_id: sealed.key_id,
				version: existing.version.saturating_add(1),
				updated_at: now,
				..existing.clone()
			},
			None => EncryptedSecret {
				tenant_id: tenant,
				name: name.to_string(),
				ciphertext: sealed.ciphertext,
				nonce: sealed.nonce.to_vec(),
				key_id: sealed.key_id,
				version: 1,
				tags: Vec::new(),
				created_at: now,
				updated_at: now,
			},
		};

		secrets.insert(name.to_string(), record.clone());
		debug!(tenant_id = %tenant, secret_name = %name, version = record.version, "Stored secret record");
		Ok(record)
	}

	async fn delete(&self, tenant: TenantId, name: &str) -> SecretsResult<bool> {
		let Some(secrets) = self.tenant(tenant).await else {
			return Ok(false);
		};
		let removed = secrets.write().await.remove(name).is_some();
		Ok(removed)
	}

	async fn list_names(&self, tenant: TenantId) -> SecretsResult<Vec<String>> {
		let Some(secrets) = self.tenant(tenant).await else {
			return Ok(Vec::new());
		};
		let mut names: Vec<String> = secrets.read().await.keys().cloned().collect();
		names.sort();
		Ok(names)
	}

	async fn update_tags(
		&self,
		tenant: TenantId,
		name: &str,
		tags: Vec<String>,
	) -> SecretsResult<Option<EncryptedSecret>> {
		let Some(secrets) = self.tenant(tenant).await else {
			return Ok(None);
		};
		let mut secrets = secrets.write().await;
		let Some(record) = secrets.get_mut(name) else {
			return Ok(None);
		};
		record.tags = tags;
		record.updated_at = Utc::now();
		Ok(Some(record.clone()))
	}

	async fn all(&self, tenant: TenantId) -> SecretsResult<Vec<EncryptedSecret>> {
		let Some(secrets) = self.tenant(tenant).await else {
			return Ok(Vec::new());
		};
		let mut records: Vec<EncryptedSecret> = secrets.read().await.values().cloned().collect();
		records.sort_by(|a, b| a.name.cmp(&b.name));
		Ok(records)
	}

	async fn restore(&self, tenant: TenantId, records: Vec<EncryptedSecret>) -> SecretsResult<()> {
		let secrets = self.tenant_or_create(tenant).await;
		let mut secrets = secrets.write().await;
		for record in records {
			secrets.insert(record.name.clone(), record);
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::KeyId;

	fn sealed(byte: u8) -> SealedValue {
		SealedValue {
			ciphertext: vec![byte; 24],
			nonce: [byte; 12],
			key_id: KeyId::generate(),
		}
	}

	#[tokio::test]
	async fn upsert_bumps_version_and_keeps_tags() {
		let store = InMemorySecretStore::new();
		let tenant = TenantId::new(1);

		let first = store.upsert(tenant, "k", sealed(1)).await.unwrap();
		assert_eq!(first.version, 1);
		store
			.update_tags(tenant, "k", vec!["prod".into()])
			.await
			.unwrap();

		let second = store.upsert(tenant, "k", sealed(2)).await.unwrap();
		assert_eq!(second.version, 2);
		assert_eq!(second.tags, vec!["prod"]);
		assert_eq!(second.created_at, first.created_at);
		assert_eq!(second.ciphertext, vec![2; 24]);
	}

	#[tokio::test]
	async fn tenants_do_not_share_names() {
		let store = InMemorySecretStore::new();
		store.upsert(TenantId::new(1), "api-key", sealed(1)).await.unwrap();
		store.upsert(TenantId::new(2), "api-key", sealed(2)).await.unwrap();

		assert!(store.delete(TenantId::new(1), "api-key").await.unwrap());
		assert!(store.get(TenantId::new(1), "api-key").await.unwrap().is_none());
		let other = store.get(TenantId::new(2), "api-key").await.unwrap().unwrap();
		assert_eq!(other.version, 1);
		assert_eq!(other.tenant_id, TenantId::new(2));
	}

	#[tokio::test]
	async fn unknown_tenant_is_empty() {
		let store = InMemorySecretStore::new();
		let tenant = TenantId::new(99);
		assert!(store.list_names(tenant).await.unwrap().is_empty());
		assert!(!store.delete(tenant, "x").await.unwrap());
		assert!(store.update_tags(tenant, "x", vec![]).await.unwrap().is_none());
	}

	#[tokio::test]
	async fn list_is_sorted() {
		let store = InMemorySecretStore::new();
		let tenant = TenantId::new(3);
		for name in ["zeta", "alpha", "mid"] {
			store.upsert(tenant, name, sealed(0)).await.unwrap();
		}
		assert_eq!(
			store.list_names(tenant).await.unwrap(),
			vec!["alpha", "mid", "zeta"]
		);
	}

	#[tokio::test]
	async fn concurrent_writers_never_lose_a_version() {
		let store = Arc::new(InMemorySecretStore::new());
		let tenant = TenantId::new(5);

		let mut handles = Vec::new();
		for i in 0..32u8 {
			let store = Arc::clone(&store);
			handles.push(tokio::spawn(async move {
				store.upsert(tenant, "counter", sealed(i)).await.unwrap();
			}));
		}
		for handle in handles {
			handle.await.unwrap();
		}

		let record = store.get(tenant, "counter").await.unwrap().unwrap();
		assert_eq!(record.version, 32);
	}
}
