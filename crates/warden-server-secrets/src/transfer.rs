// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Export blob layout for backup and migration.
//!
//! An export carries a tenant's sealed records together with the wrapped DEKs
//! they reference. Nothing in it is plaintext; it can only be opened by a
//! store holding the same root key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use warden_common_core::TenantId;

use crate::error::{SecretsError, SecretsResult};
use crate::key_manager::ExportedKey;
use crate::types::EncryptedSecret;

pub const EXPORT_FORMAT: &str = "warden-secrets-export";
pub const EXPORT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretExport {
	pub format: String,
	pub version: u32,
	#[serde(rename = "tenantID")]
	pub tenant_id: TenantId,
	pub exported_at: DateTime<Utc>,
	pub keys: Vec<ExportedKey>,
	pub secrets: Vec<EncryptedSecret>,
}

impl SecretExport {
	pub fn new(tenant_id: TenantId, keys: Vec<ExportedKey>, secrets: Vec<EncryptedSecret>) -> Self {
		Self {
			format: EXPORT_FORMAT.to_string(),
			version: EXPORT_VERSION,
			tenant_id,
			exported_at: Utc::now(),
			keys,
			secrets,
		}
	}

	pub fn to_bytes(&self) -> SecretsResult<Vec<u8>> {
		Ok(serde_json::to_vec_pretty(self)?)
	}

	/// Parse a blob and check it is an export for `tenant` this build can read.
	pub fn parse(blob: &[u8], tenant: TenantId) -> SecretsResult<Self> {
		let export: SecretExport = serde_json::from_slice(blob)
			.map_err(|e| SecretsError::InvalidExport(format!("malformed export: {e}")))?;

		if export.format != EXPORT_FORMAT {
			return Err(SecretsError::InvalidExport(format!(
				"unexpected format {:?}",
				export.format
			)));
		}
		if export.version != EXPORT_VERSION {
			return Err(SecretsError::InvalidExport(format!(
				"unsupported version {}",
				export.version
			)));
		}
		if export.tenant_id != tenant {
			return Err(SecretsError::InvalidExport(
				"export belongs to a different tenant".to_string(),
			));
		}
		if let Some(stray) = export.secrets.iter().find(|s| s.tenant_id != tenant) {
			return Err(SecretsError::InvalidExport(format!(
				"record {:?} belongs to a different tenant",
				stray.name
			)));
		}

		Ok(export)
	}
}
