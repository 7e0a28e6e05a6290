// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-tenant audit trail of secret operations.
//!
//! Entries are append-only and bounded per tenant; once a tenant reaches the
//! retention cap the oldest entry is dropped. Each entry is also emitted as a
//! `tracing` event on the `warden::audit` target.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use warden_common_core::TenantId;

/// Entries returned by [`AuditLog::recent`] when the caller passes a limit of 0.
pub const DEFAULT_AUDIT_QUERY_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
	Create,
	Read,
	Update,
	Delete,
	Export,
	Import,
}

impl AuditAction {
	pub fn as_str(&self) -> &'static str {
		match self {
			AuditAction::Create => "create",
			AuditAction::Read => "read",
			AuditAction::Update => "update",
			AuditAction::Delete => "delete",
			AuditAction::Export => "export",
			AuditAction::Import => "import",
		}
	}
}

impl fmt::Display for AuditAction {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
	#[serde(rename = "tenantID")]
	pub tenant_id: TenantId,
	pub secret_name: String,
	pub action: AuditAction,
	pub success: bool,
	pub timestamp: DateTime<Utc>,
	/// Short failure reason. Never contains secret material.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub detail: Option<String>,
}

pub struct AuditLog {
	retention: usize,
	entries: RwLock<HashMap<TenantId, VecDeque<AuditLogEntry>>>,
}

impl AuditLog {
	pub fn new(retention: usize) -> Self {
		Self {
			retention: retention.max(1),
			entries: RwLock::new(HashMap::new()),
		}
	}

	pub fn retention(&self) -> usize {
		self.retention
	}

	pub async fn record(
		&self,
		tenant: TenantId,
		secret_name: &str,
		action: AuditAction,
		success: bool,
		detail: Option<String>,
	) {
		let entry = AuditLogEntry {
			tenant_id: tenant,
			secret_name: secret_name.to_string(),
			action,
			success,
			timestamp: Utc::now(),
			detail,
		};

		info!(
			target: "warden::audit",
			tenant_id = %entry.tenant_id,
			secret_name = %entry.secret_name,
			action = %entry.action,
			success = entry.success,
			detail = entry.detail.as_deref().unwrap_or(""),
			"secret audit event"
		);

		let mut entries = self.entries.write().await;
		let log = entries.entry(tenant).or_default();
		if log.len() >= self.retention {
			log.pop_front();
		}
		log.push_back(entry);
	}

	/// Up to `limit` of the tenant's entries, newest first. A limit of 0
	/// means [`DEFAULT_AUDIT_QUERY_LIMIT`].
	pub async fn recent(&self, tenant: TenantId, limit: usize) -> Vec<AuditLogEntry> {
		let limit = if limit == 0 {
			DEFAULT_AUDIT_QUERY_LIMIT
		} else {
			limit
		};
		let entries = self.entries.read().await;
		entries
			.get(&tenant)
			.map(|log| log.iter().rev().take(limit).cloned().collect())
			.unwrap_or_default()
	}
}

impl fmt::Debug for AuditLog {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("AuditLog")
			.field("retention", &self.retention)
			.finish_non_exhaustive()
	}
}
