// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Execution records and the structured result of one sandboxed call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;
use crate::ids::{ExecutionId, FunctionId, TenantId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
	Running,
	Success,
	Error,
}

impl ExecutionStatus {
	pub fn is_terminal(self) -> bool {
		!matches!(self, ExecutionStatus::Running)
	}
}

impl fmt::Display for ExecutionStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			ExecutionStatus::Running => "running",
			ExecutionStatus::Success => "success",
			ExecutionStatus::Error => "error",
		};
		f.write_str(s)
	}
}

/// Why a call ended with `status = error`. Exactly one applies per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionErrorKind {
	/// Rejected before the script ran.
	Validation,
	/// `fetch` target, scheme or method outside the allowlist.
	PolicyViolation,
	/// Uncaught script exception.
	Runtime,
	Timeout,
	MemoryLimit,
}

impl ExecutionErrorKind {
	pub fn is_resource_limit(self) -> bool {
		matches!(
			self,
			ExecutionErrorKind::Timeout | ExecutionErrorKind::MemoryLimit
		)
	}
}

/// What the engine hands back for every call, whatever the outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
	#[serde(rename = "executionID")]
	pub execution_id: ExecutionId,
	#[serde(rename = "functionID")]
	pub function_id: FunctionId,
	pub status: ExecutionStatus,
	pub start_time: DateTime<Utc>,
	pub end_time: DateTime<Utc>,
	pub duration_ms: u64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub result: Option<serde_json::Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error_kind: Option<ExecutionErrorKind>,
	#[serde(default)]
	pub logs: Vec<String>,
}

impl ExecutionResult {
	pub fn is_success(&self) -> bool {
		self.status == ExecutionStatus::Success
	}
}

/// The persisted view of one invocation.
///
/// Created in [`ExecutionStatus::Running`] and moved to a terminal status
/// exactly once by [`Execution::complete`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
	pub id: ExecutionId,
	#[serde(rename = "functionID")]
	pub function_id: FunctionId,
	#[serde(rename = "tenantID")]
	pub tenant_id: TenantId,
	pub status: ExecutionStatus,
	pub start_time: DateTime<Utc>,
	#[serde(default)]
	pub end_time: Option<DateTime<Utc>>,
	#[serde(default)]
	pub duration_ms: Option<u64>,
	#[serde(default)]
	pub result: Option<serde_json::Value>,
	#[serde(default)]
	pub error: Option<String>,
	#[serde(default)]
	pub error_kind: Option<ExecutionErrorKind>,
	#[serde(default)]
	pub logs: Vec<String>,
}

impl Execution {
	pub fn start(id: ExecutionId, function_id: FunctionId, tenant_id: TenantId) -> Self {
		Self {
			id,
			function_id,
			tenant_id,
			status: ExecutionStatus::Running,
			start_time: Utc::now(),
			end_time: None,
			duration_ms: None,
			result: None,
			error: None,
			error_kind: None,
			logs: Vec::new(),
		}
	}

	/// Record the terminal outcome.
	pub fn complete(&mut self, outcome: &ExecutionResult) -> Result<(), CoreError> {
		if self.status.is_terminal() {
			return Err(CoreError::ExecutionAlreadyFinished(self.id));
		}
		if outcome.execution_id != self.id {
			return Err(CoreError::ExecutionMismatch {
				expected: self.id,
				actual: outcome.execution_id,
			});
		}

		self.status = outcome.status;
		self.end_time = Some(outcome.end_time);
		self.duration_ms = Some(outcome.duration_ms);
		self.result = outcome.result.clone();
		self.error = outcome.error.clone();
		self.error_kind = outcome.error_kind;
		self.logs = outcome.logs.clone();
		Ok(())
	}
}

/// Identity of the running call as seen by the script.
///
/// Built fresh for each execution and dropped with its isolate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
	pub function_id: FunctionId,
	pub tenant_id: TenantId,
	pub execution_id: ExecutionId,
	pub start_time: DateTime<Utc>,
}

/// The frozen object exposed to scripts as `executionContext`.
///
/// `userID` carries the tenant for scripts written against the account-level
/// naming.
#[derive(Debug, Clone, Serialize)]
pub struct ScriptExecutionContext {
	#[serde(rename = "functionID")]
	pub function_id: String,
	#[serde(rename = "tenantID")]
	pub tenant_id: i64,
	#[serde(rename = "userID")]
	pub user_id: i64,
	#[serde(rename = "executionID")]
	pub execution_id: String,
	#[serde(rename = "startTime")]
	pub start_time: String,
}

impl ExecutionContext {
	pub fn script_view(&self) -> ScriptExecutionContext {
		ScriptExecutionContext {
			function_id: self.function_id.to_string(),
			tenant_id: self.tenant_id.get(),
			user_id: self.tenant_id.get(),
			execution_id: self.execution_id.to_string(),
			start_time: self.start_time.to_rfc3339(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn finished(execution: &Execution, status: ExecutionStatus) -> ExecutionResult {
		ExecutionResult {
			execution_id: execution.id,
			function_id: execution.function_id,
			status,
			start_time: execution.start_time,
			end_time: Utc::now(),
			duration_ms: 3,
			result: Some(serde_json::json!({"price": 10})),
			error: None,
			error_kind: None,
			logs: vec!["fetched".to_string()],
		}
	}

	#[test]
	fn execution_completes_exactly_once() {
		let mut execution = Execution::start(
			ExecutionId::generate(),
			FunctionId::generate(),
			TenantId::new(1),
		);
		let outcome = finished(&execution, ExecutionStatus::Success);

		execution.complete(&outcome).unwrap();
		assert_eq!(execution.status, ExecutionStatus::Success);
		assert_eq!(execution.logs, vec!["fetched"]);

		let again = execution.complete(&outcome);
		assert!(matches!(again, Err(CoreError::ExecutionAlreadyFinished(_))));
	}

	#[test]
	fn foreign_result_is_rejected() {
		let mut execution = Execution::start(
			ExecutionId::generate(),
			FunctionId::generate(),
			TenantId::new(1),
		);
		let mut outcome = finished(&execution, ExecutionStatus::Error);
		outcome.execution_id = ExecutionId::generate();

		assert!(matches!(
			execution.complete(&outcome),
			Err(CoreError::ExecutionMismatch { .. })
		));
		assert_eq!(execution.status, ExecutionStatus::Running);
	}

	#[test]
	fn result_uses_external_field_names() {
		let execution = Execution::start(
			ExecutionId::generate(),
			FunctionId::generate(),
			TenantId::new(1),
		);
		let json = serde_json::to_value(finished(&execution, ExecutionStatus::Success)).unwrap();
		assert!(json.get("executionID").is_some());
		assert!(json.get("functionID").is_some());
		assert!(json.get("durationMs").is_some());
		assert_eq!(json["status"], "success");
		assert!(json.get("error").is_none());
	}

	#[test]
	fn script_view_mirrors_tenant_as_user() {
		let context = ExecutionContext {
			function_id: FunctionId::generate(),
			tenant_id: TenantId::new(9),
			execution_id: ExecutionId::generate(),
			start_time: Utc::now(),
		};
		let view = serde_json::to_value(context.script_view()).unwrap();
		assert_eq!(view["tenantID"], 9);
		assert_eq!(view["userID"], 9);
		assert_eq!(view["executionID"], context.execution_id.to_string());
	}

	#[test]
	fn resource_limit_kinds() {
		assert!(ExecutionErrorKind::Timeout.is_resource_limit());
		assert!(ExecutionErrorKind::MemoryLimit.is_resource_limit());
		assert!(!ExecutionErrorKind::PolicyViolation.is_resource_limit());
	}
}
