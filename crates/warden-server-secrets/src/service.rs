// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Secret store service layer.
//!
//! Every operation is scoped to one tenant, validates its input, seals or
//! opens values through the [`KeyManager`] and records an audit entry for the
//! outcome. Callers never see key material; plaintext only leaves through
//! [`SecretsService::get_secret`] wrapped in a [`SecretString`].

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, instrument, warn};
use zeroize::Zeroizing;

use warden_common_core::TenantId;
use warden_common_secret::SecretString;

use crate::audit::{AuditAction, AuditLog, AuditLogEntry};
use crate::config::SecretsConfig;
use crate::encryption::{self, KEY_SIZE};
use crate::error::{SecretsError, SecretsResult};
use crate::key_backend::{KeyBackend, SoftwareKeyBackend};
use crate::key_manager::{KeyInfo, KeyManager};
use crate::store::{InMemorySecretStore, SecretStore};
use crate::transfer::SecretExport;
use crate::types::{EncryptedSecret, KeyId, SealedValue, SecretMetadata};

const MAX_SECRET_NAME_LEN: usize = 128;
const MAX_SECRET_VALUE_SIZE: usize = 64 * 1024;
const MAX_TAGS: usize = 32;
const MAX_TAG_LEN: usize = 64;

/// Audit name used for failures that concern a whole import blob rather
/// than one secret.
const WHOLE_EXPORT: &str = "*";

pub struct SecretsService<K: KeyBackend, S: SecretStore> {
	keys: KeyManager<K>,
	store: Arc<S>,
	audit: AuditLog,
}

impl SecretsService<SoftwareKeyBackend, InMemorySecretStore> {
	/// A service over an in-memory store, keyed by the configured root key.
	pub fn in_memory(config: &SecretsConfig) -> SecretsResult<Self> {
		Ok(Self::new(
			config.key_backend()?,
			Arc::new(InMemorySecretStore::new()),
			config.key_rotation_interval(),
			config.audit_retention(),
		))
	}
}

impl<K: KeyBackend, S: SecretStore> SecretsService<K, S> {
	pub fn new(backend: K, store: Arc<S>, rotation_interval: Duration, audit_retention: usize) -> Self {
		Self {
			keys: KeyManager::new(backend, rotation_interval),
			store,
			audit: AuditLog::new(audit_retention),
		}
	}

	pub fn store(&self) -> &Arc<S> {
		&self.store
	}

	pub fn key_manager(&self) -> &KeyManager<K> {
		&self.keys
	}

	/// Seal `value` under the active DEK and store it, creating the secret at
	/// version 1 or bumping the version of the existing one.
	#[instrument(skip_all, fields(tenant_id = %tenant, secret_name = %name))]
	pub async fn set_secret(
		&self,
		tenant: TenantId,
		name: &str,
		value: &SecretString,
	) -> SecretsResult<SecretMetadata> {
		let result = self.seal_and_store(tenant, name, value).await;

		let action = match &result {
			Ok(meta) if meta.version == 1 => AuditAction::Create,
			Ok(_) => AuditAction::Update,
			Err(_) => self.write_action(tenant, name).await,
		};
		self.record_outcome(tenant, name, action, &result).await;

		if let Ok(meta) = &result {
			info!(version = meta.version, key_id = %meta.key_id, "Stored secret");
		}
		result
	}

	async fn seal_and_store(
		&self,
		tenant: TenantId,
		name: &str,
		value: &SecretString,
	) -> SecretsResult<SecretMetadata> {
		validate_secret_name(name)?;
		let plaintext = value.expose().as_bytes();
		if plaintext.len() > MAX_SECRET_VALUE_SIZE {
			return Err(SecretsError::ValueTooLarge {
				max: MAX_SECRET_VALUE_SIZE,
				actual: plaintext.len(),
			});
		}

		let (key_id, dek) = self.keys.key_for_write().await?;
		let sealed =
			encryption::encrypt_secret_value(&dek, plaintext, &encryption::secret_aad(tenant, name))?;

		let record = self
			.store
			.upsert(
				tenant,
				name,
				SealedValue {
					ciphertext: sealed.ciphertext,
					nonce: sealed.nonce,
					key_id,
				},
			)
			.await?;
		Ok(record.metadata())
	}

	async fn write_action(&self, tenant: TenantId, name: &str) -> AuditAction {
		match self.store.get(tenant, name).await {
			Ok(Some(_)) => AuditAction::Update,
			_ => AuditAction::Create,
		}
	}

	/// Decrypt the tenant's secret. Another tenant's secret of the same name
	/// is reported exactly like a missing one.
	#[instrument(skip_all, fields(tenant_id = %tenant, secret_name = %name))]
	pub async fn get_secret(&self, tenant: TenantId, name: &str) -> SecretsResult<SecretString> {
		let result = self.read_secret(tenant, name).await;
		self.record_outcome(tenant, name, AuditAction::Read, &result).await;
		result
	}

	#[instrument(skip_all, fields(tenant_id = %tenant, secret_name = %name))]
	pub async fn delete_secret(&self, tenant: TenantId, name: &str) -> SecretsResult<()> {
		let result = match self.store.delete(tenant, name).await {
			Ok(true) => Ok(()),
			Ok(false) => Err(SecretsError::SecretNotFound(name.to_string())),
			Err(e) => Err(e),
		};
		self.record_outcome(tenant, name, AuditAction::Delete, &result).await;
		if result.is_ok() {
			info!("Deleted secret");
		}
		result
	}

	pub async fn list_secrets(&self, tenant: TenantId) -> SecretsResult<Vec<String>> {
		self.store.list_names(tenant).await
	}

	pub async fn get_secret_metadata(
		&self,
		tenant: TenantId,
		name: &str,
	) -> SecretsResult<SecretMetadata> {
		Ok(self.require(tenant, name).await?.metadata())
	}

	/// Replace the secret's tags. Tags are stored sorted and de-duplicated.
	#[instrument(skip_all, fields(tenant_id = %tenant, secret_name = %name))]
	pub async fn update_secret_tags(
		&self,
		tenant: TenantId,
		name: &str,
		tags: Vec<String>,
	) -> SecretsResult<SecretMetadata> {
		let result = self.retag_secret(tenant, name, tags).await;
		self.record_outcome(tenant, name, AuditAction::Update, &result).await;
		result
	}

	async fn retag_secret(
		&self,
		tenant: TenantId,
		name: &str,
		tags: Vec<String>,
	) -> SecretsResult<SecretMetadata> {
		let tags = normalize_tags(tags)?;
		self
			.store
			.update_tags(tenant, name, tags)
			.await?
			.map(|record| record.metadata())
			.ok_or_else(|| SecretsError::SecretNotFound(name.to_string()))
	}

	/// The tenant's most recent audit entries, newest first. A limit of 0
	/// returns the default page size.
	pub async fn get_audit_log(&self, tenant: TenantId, limit: usize) -> Vec<AuditLogEntry> {
		self.audit.recent(tenant, limit).await
	}

	/// Serialize the tenant's sealed records and the wrapped DEKs they need.
	#[instrument(skip_all, fields(tenant_id = %tenant))]
	pub async fn export_secrets(&self, tenant: TenantId) -> SecretsResult<Vec<u8>> {
		let secrets = self.store.all(tenant).await?;
		let key_ids: BTreeSet<KeyId> = secrets.iter().map(|s| s.key_id).collect();
		let keys = self.keys.export_keys(&key_ids).await?;

		let names: Vec<String> = secrets.iter().map(|s| s.name.clone()).collect();

		let blob = SecretExport::new(tenant, keys, secrets).to_bytes()?;
		for name in &names {
			self
				.audit
				.record(tenant, name, AuditAction::Export, true, None)
				.await;
		}

		info!(count = names.len(), "Exported secrets");
		Ok(blob)
	}

	/// Restore an export of this tenant's secrets.
	///
	/// Every record is checked to decrypt under this store's root key before
	/// anything is written; a blob with a single bad record changes nothing.
	/// Returns the number of secrets restored.
	#[instrument(skip_all, fields(tenant_id = %tenant))]
	pub async fn import_secrets(&self, tenant: TenantId, blob: &[u8]) -> SecretsResult<usize> {
		let export = match SecretExport::parse(blob, tenant) {
			Ok(export) => export,
			Err(e) => {
				warn!(error = %e, "Rejected secret import");
				self
					.audit
					.record(tenant, WHOLE_EXPORT, AuditAction::Import, false, Some(e.to_string()))
					.await;
				return Err(e);
			}
		};

		if let Err((name, e)) = self.verify_import(&export).await {
			warn!(secret_name = %name, error = %e, "Rejected secret import");
			self
				.audit
				.record(tenant, &name, AuditAction::Import, false, Some(e.to_string()))
				.await;
			return Err(e);
		}

		self.keys.import_keys(&export.keys).await?;
		let count = export.secrets.len();
		let names: Vec<String> = export.secrets.iter().map(|s| s.name.clone()).collect();
		self.store.restore(tenant, export.secrets).await?;

		for name in &names {
			self
				.audit
				.record(tenant, name, AuditAction::Import, true, None)
				.await;
		}
		info!(count, "Imported secrets");
		Ok(count)
	}

	async fn verify_import(&self, export: &SecretExport) -> Result<(), (String, SecretsError)> {
		let mut deks: HashMap<KeyId, Zeroizing<[u8; KEY_SIZE]>> = HashMap::new();

		for record in &export.secrets {
			let fail = |e: SecretsError| {
				(
					record.name.clone(),
					SecretsError::InvalidExport(format!("secret {:?} cannot be restored: {e}", record.name)),
				)
			};

			validate_secret_name(&record.name).map_err(fail)?;
			if !deks.contains_key(&record.key_id) {
				let dek = self.import_dek(export, &record.key_id).await.map_err(fail)?;
				deks.insert(record.key_id, dek);
			}
			let dek = deks
				.get(&record.key_id)
				.ok_or_else(|| fail(SecretsError::KeyNotFound(record.key_id)))?;
			open_with(dek, record).map_err(fail)?;
		}
		Ok(())
	}

	/// Resolve a DEK an import references, from this store or from the blob.
	async fn import_dek(
		&self,
		export: &SecretExport,
		key_id: &KeyId,
	) -> SecretsResult<Zeroizing<[u8; KEY_SIZE]>> {
		match self.keys.key_for_read(key_id).await {
			Ok(dek) => Ok(dek),
			Err(SecretsError::KeyNotFound(_)) => {
				let exported = export
					.keys
					.iter()
					.find(|key| key.key_id == *key_id)
					.ok_or(SecretsError::KeyNotFound(*key_id))?;
				self.keys.backend().unwrap_dek(key_id, &exported.wrapped).await
			}
			Err(e) => Err(e),
		}
	}

	/// Change how long a DEK stays active. Zero rotates on the next write.
	pub async fn set_key_rotation_interval(&self, interval: Duration) {
		self.keys.set_rotation_interval(interval).await;
	}

	pub async fn rotate_key_now(&self) -> SecretsResult<KeyId> {
		self.keys.rotate_now().await
	}

	pub async fn key_infos(&self) -> Vec<KeyInfo> {
		self.keys.key_infos().await
	}

	async fn require(&self, tenant: TenantId, name: &str) -> SecretsResult<EncryptedSecret> {
		self
			.store
			.get(tenant, name)
			.await?
			.ok_or_else(|| SecretsError::SecretNotFound(name.to_string()))
	}

	async fn read_secret(&self, tenant: TenantId, name: &str) -> SecretsResult<SecretString> {
		let record = self.require(tenant, name).await?;
		self.open(&record).await
	}

	async fn open(&self, record: &EncryptedSecret) -> SecretsResult<SecretString> {
		let dek = self.keys.key_for_read(&record.key_id).await?;
		debug!(key_id = %record.key_id, version = record.version, "Opening secret");
		open_with(&dek, record)
	}

	async fn record_outcome<T>(
		&self,
		tenant: TenantId,
		name: &str,
		action: AuditAction,
		result: &SecretsResult<T>,
	) {
		let detail = match result {
			Ok(_) => None,
			Err(e) => {
				if e.is_internal() {
					error!(error = %e, action = %action, "Secret operation failed");
				} else if matches!(
					e,
					SecretsError::InvalidSecretName(_)
						| SecretsError::InvalidTag(_)
						| SecretsError::ValueTooLarge { .. }
				) {
					warn!(error = %e, action = %action, "Rejected secret request");
				}
				Some(e.to_string())
			}
		};
		self
			.audit
			.record(tenant, name, action, result.is_ok(), detail)
			.await;
	}
}

fn open_with(dek: &[u8; KEY_SIZE], record: &EncryptedSecret) -> SecretsResult<SecretString> {
	let sealed = encryption::encrypted_data(&record.ciphertext, &record.nonce)?;
	let plaintext = encryption::decrypt_secret_value(
		dek,
		&sealed,
		&encryption::secret_aad(record.tenant_id, &record.name),
	)?;
	let value = String::from_utf8(plaintext.to_vec())
		.map_err(|_| SecretsError::Decryption("secret value is not valid UTF-8".to_string()))?;
	Ok(SecretString::new(value))
}

fn validate_secret_name(name: &str) -> SecretsResult<()> {
	if name.is_empty() || name.len() > MAX_SECRET_NAME_LEN {
		return Err(SecretsError::InvalidSecretName(format!(
			"name must be 1-{MAX_SECRET_NAME_LEN} characters"
		)));
	}

	if !name
		.chars()
		.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
	{
		return Err(SecretsError::InvalidSecretName(
			"name must contain only letters, digits, '-', '_' and '.'".to_string(),
		));
	}

	Ok(())
}

fn normalize_tags(tags: Vec<String>) -> SecretsResult<Vec<String>> {
	let mut unique = BTreeSet::new();
	for tag in tags {
		let len = tag.chars().count();
		if len == 0 || len > MAX_TAG_LEN {
			return Err(SecretsError::InvalidTag(format!(
				"tags must be 1-{MAX_TAG_LEN} characters"
			)));
		}
		if tag.chars().any(char::is_control) {
			return Err(SecretsError::InvalidTag(
				"tags must not contain control characters".to_string(),
			));
		}
		unique.insert(tag);
	}

	if unique.len() > MAX_TAGS {
		return Err(SecretsError::InvalidTag(format!(
			"at most {MAX_TAGS} tags per secret"
		)));
	}
	Ok(unique.into_iter().collect())
}

#[cfg(test)]
mod tests {
	use super::*;

	fn service() -> SecretsService<SoftwareKeyBackend, InMemorySecretStore> {
		SecretsService::new(
			SoftwareKeyBackend::ephemeral(),
			Arc::new(InMemorySecretStore::new()),
			Duration::from_secs(3600),
			100,
		)
	}

	mod names {
		use super::*;

		#[test]
		fn valid_secret_names() {
			assert!(validate_secret_name("api-key").is_ok());
			assert!(validate_secret_name("STRIPE_API_KEY").is_ok());
			assert!(validate_secret_name("db.password").is_ok());
			assert!(validate_secret_name("a").is_ok());
			assert!(validate_secret_name(&"x".repeat(128)).is_ok());
		}

		#[test]
		fn invalid_secret_names() {
			assert!(validate_secret_name("").is_err());
			assert!(validate_secret_name(&"x".repeat(129)).is_err());
			assert!(validate_secret_name("api key").is_err());
			assert!(validate_secret_name("../etc/passwd").is_err());
			assert!(validate_secret_name("key/other").is_err());
		}
	}

	mod tags {
		use super::*;

		#[test]
		fn tags_are_sorted_and_deduplicated() {
			let tags = normalize_tags(vec!["prod".into(), "billing".into(), "prod".into()]).unwrap();
			assert_eq!(tags, vec!["billing", "prod"]);
		}

		#[test]
		fn tag_limits_are_enforced() {
			assert!(normalize_tags(vec![String::new()]).is_err());
			assert!(normalize_tags(vec!["t".repeat(65)]).is_err());
			let many: Vec<String> = (0..33).map(|i| format!("t{i}")).collect();
			assert!(matches!(normalize_tags(many), Err(SecretsError::InvalidTag(_))));
		}
	}

	#[tokio::test]
	async fn oversized_value_is_rejected_and_audited() {
		let service = service();
		let tenant = TenantId::new(1);
		let value = SecretString::new("v".repeat(MAX_SECRET_VALUE_SIZE + 1));

		let result = service.set_secret(tenant, "big", &value).await;
		assert!(matches!(result, Err(SecretsError::ValueTooLarge { .. })));

		let log = service.get_audit_log(tenant, 10).await;
		assert_eq!(log.len(), 1);
		assert_eq!(log[0].action, AuditAction::Create);
		assert!(!log[0].success);
	}

	#[tokio::test]
	async fn tags_survive_value_update() {
		let service = service();
		let tenant = TenantId::new(1);
		service
			.set_secret(tenant, "k", &SecretString::from("v1"))
			.await
			.unwrap();
		service
			.update_secret_tags(tenant, "k", vec!["prod".into()])
			.await
			.unwrap();
		let meta = service
			.set_secret(tenant, "k", &SecretString::from("v2"))
			.await
			.unwrap();

		assert_eq!(meta.version, 2);
		assert_eq!(meta.tags, vec!["prod"]);
	}

	#[tokio::test]
	async fn tagging_a_missing_secret_is_not_found() {
		let service = service();
		let result = service
			.update_secret_tags(TenantId::new(1), "absent", vec!["x".into()])
			.await;
		assert!(matches!(result, Err(SecretsError::SecretNotFound(_))));
	}

	#[tokio::test]
	async fn relabelled_record_does_not_decrypt() {
		let service = service();
		let tenant = TenantId::new(1);
		service
			.set_secret(tenant, "original", &SecretString::from("hunter2"))
			.await
			.unwrap();

		let mut copy = service
			.store()
			.get(tenant, "original")
			.await
			.unwrap()
			.unwrap();
		copy.name = "copied".to_string();
		service.store().restore(tenant, vec![copy]).await.unwrap();

		assert!(matches!(
			service.get_secret(tenant, "copied").await,
			Err(SecretsError::Decryption(_))
		));
	}

	#[tokio::test]
	async fn failed_read_is_audited_without_value() {
		let service = service();
		let tenant = TenantId::new(1);
		assert!(service.get_secret(tenant, "missing").await.is_err());

		let log = service.get_audit_log(tenant, 0).await;
		assert_eq!(log[0].action, AuditAction::Read);
		assert!(!log[0].success);
		assert_eq!(log[0].detail.as_deref(), Some("secret not found: missing"));
	}
}
