// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, error, info, instrument, Instrument};

use warden_common_core::{
	Execution, ExecutionErrorKind, ExecutionId, ExecutionResult, ExecutionStatus, Function,
	TenantId,
};
use warden_server_sandbox::{SandboxEngine, SecretBindings};

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::repository::ExecutionRepository;
use crate::secrets::SecretSource;

const SECRET_RESOLUTION_FAILED: &str = "failed to resolve function secrets";
const HOST_FAULT: &str = "internal error: sandbox unavailable";

/// Runs functions in the sandbox with their declared secrets bound, and keeps
/// a record of every execution.
#[derive(Clone)]
pub struct ExecutionCoordinator {
	engine: SandboxEngine,
	secrets: Arc<dyn SecretSource>,
	repository: Arc<dyn ExecutionRepository>,
}

impl ExecutionCoordinator {
	pub fn new(
		engine: SandboxEngine,
		secrets: Arc<dyn SecretSource>,
		repository: Arc<dyn ExecutionRepository>,
	) -> Self {
		Self {
			engine,
			secrets,
			repository,
		}
	}

	pub fn engine(&self) -> &SandboxEngine {
		&self.engine
	}

	/// Run `function` and wait for its result.
	#[instrument(skip(self, function, params), fields(tenant_id = %tenant, function_id = %function.id))]
	pub async fn execute(
		&self,
		tenant: TenantId,
		function: &Function,
		params: &Value,
	) -> CoordinatorResult<ExecutionResult> {
		let id = ExecutionId::generate();
		self.repository
			.insert(Execution::start(id, function.id, tenant))
			.await?;
		self.run(id, tenant, function, params).await
	}

	/// Start `function` in the background and return its execution ID at
	/// once. Poll [`get_execution`](Self::get_execution) for the outcome.
	#[instrument(skip(self, function, params), fields(tenant_id = %tenant, function_id = %function.id))]
	pub async fn dispatch(
		&self,
		tenant: TenantId,
		function: Function,
		params: Value,
	) -> CoordinatorResult<ExecutionId> {
		let id = ExecutionId::generate();
		self.repository
			.insert(Execution::start(id, function.id, tenant))
			.await?;

		let coordinator = self.clone();
		let span = tracing::info_span!("dispatched_execution", execution_id = %id);
		tokio::spawn(
			async move {
				if let Err(err) = coordinator.run(id, tenant, &function, &params).await {
					error!(error = %err, "Dispatched execution failed");
				}
			}
			.instrument(span),
		);

		info!(execution_id = %id, "Execution dispatched");
		Ok(id)
	}

	pub async fn get_execution(&self, id: ExecutionId) -> CoordinatorResult<Execution> {
		self.repository
			.get(id)
			.await?
			.ok_or(CoordinatorError::NotFound(id))
	}

	pub async fn list_executions(&self, function: &Function, limit: usize) -> CoordinatorResult<Vec<Execution>> {
		self.repository.list_for_function(function.id, limit).await
	}

	async fn run(
		&self,
		id: ExecutionId,
		tenant: TenantId,
		function: &Function,
		params: &Value,
	) -> CoordinatorResult<ExecutionResult> {
		let started = Utc::now();

		let result = match self.bind_secrets(tenant, function).await {
			Some(bindings) => {
				match self
					.engine
					.execute_with_id(id, tenant, function, params, bindings)
					.await
				{
					Ok(result) => result,
					Err(err) => {
						let failed = failure(id, function, started, HOST_FAULT);
						self.repository.complete(id, &failed).await?;
						return Err(err.into());
					}
				}
			}
			None => failure(id, function, started, SECRET_RESOLUTION_FAILED),
		};

		self.repository.complete(id, &result).await?;
		Ok(result)
	}

	/// Resolve the function's declared names for `tenant`. Names the tenant
	/// has not set are left unbound. `None` if the store failed.
	async fn bind_secrets(&self, tenant: TenantId, function: &Function) -> Option<SecretBindings> {
		let mut bindings = SecretBindings::new();
		// The engine rejects a foreign function; don't read secrets for one.
		if function.tenant_id != tenant {
			return Some(bindings);
		}

		let names: BTreeSet<&str> = function
			.declared_secret_names
			.iter()
			.map(String::as_str)
			.collect();
		for name in names {
			match self.secrets.resolve(tenant, name).await {
				Ok(Some(value)) => bindings.insert(name, value),
				Ok(None) => debug!(secret_name = %name, "Declared secret is not set"),
				Err(err) => {
					error!(secret_name = %name, error = %err, "Failed to resolve declared secret");
					return None;
				}
			}
		}
		Some(bindings)
	}
}

fn failure(
	id: ExecutionId,
	function: &Function,
	started: chrono::DateTime<Utc>,
	message: &str,
) -> ExecutionResult {
	let end_time = Utc::now();
	ExecutionResult {
		execution_id: id,
		function_id: function.id,
		status: ExecutionStatus::Error,
		start_time: started,
		end_time,
		duration_ms: u64::try_from((end_time - started).num_milliseconds()).unwrap_or(0),
		result: None,
		error: Some(message.to_string()),
		error_kind: Some(ExecutionErrorKind::Runtime),
		logs: Vec::new(),
	}
}
