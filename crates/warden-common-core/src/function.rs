// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::{Deserialize, Serialize};

use crate::ids::{FunctionId, TenantId};

/// A tenant-owned script as handed to the engine by the function-management
/// layer.
///
/// Only the *names* of the secrets the script may read are recorded here;
/// values are resolved per execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Function {
	pub id: FunctionId,
	#[serde(rename = "tenantID")]
	pub tenant_id: TenantId,
	#[serde(default)]
	pub name: String,
	pub source_code: String,
	/// Requested wall-clock budget. `None` uses the engine default.
	#[serde(default)]
	pub timeout_seconds: Option<u32>,
	/// Requested heap ceiling. `None` uses the engine default.
	#[serde(default, rename = "memoryLimitMB")]
	pub memory_limit_mb: Option<u32>,
	#[serde(default)]
	pub declared_secret_names: Vec<String>,
}

impl Function {
	pub fn new(tenant_id: TenantId, name: impl Into<String>, source_code: impl Into<String>) -> Self {
		Self {
			id: FunctionId::generate(),
			tenant_id,
			name: name.into(),
			source_code: source_code.into(),
			timeout_seconds: None,
			memory_limit_mb: None,
			declared_secret_names: Vec::new(),
		}
	}

	pub fn with_timeout_seconds(mut self, seconds: u32) -> Self {
		self.timeout_seconds = Some(seconds);
		self
	}

	pub fn with_memory_limit_mb(mut self, megabytes: u32) -> Self {
		self.memory_limit_mb = Some(megabytes);
		self
	}

	pub fn with_secrets<I, S>(mut self, names: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.declared_secret_names = names.into_iter().map(Into::into).collect();
		self
	}

	pub fn declares_secret(&self, name: &str) -> bool {
		self.declared_secret_names.iter().any(|n| n == name)
	}
}
