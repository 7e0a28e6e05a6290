// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;

use warden_common_core::TenantId;
use warden_common_secret::SecretString;
use warden_server_secrets::{KeyBackend, SecretStore, SecretsError, SecretsResult, SecretsService};

/// Where the coordinator looks up a function's declared secrets.
#[async_trait]
pub trait SecretSource: Send + Sync {
	/// The value of `name` for `tenant`, or `None` if the tenant has no such
	/// secret.
	async fn resolve(&self, tenant: TenantId, name: &str) -> SecretsResult<Option<SecretString>>;
}

#[async_trait]
impl<K, S> SecretSource for SecretsService<K, S>
where
	K: KeyBackend + 'static,
	S: SecretStore + 'static,
{
	async fn resolve(&self, tenant: TenantId, name: &str) -> SecretsResult<Option<SecretString>> {
		match self.get_secret(tenant, name).await {
			Ok(value) => Ok(Some(value)),
			Err(SecretsError::SecretNotFound(_)) => Ok(None),
			Err(err) => Err(err),
		}
	}
}
