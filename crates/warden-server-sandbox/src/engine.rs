// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};
use tracing::{error, info, instrument, warn};

use warden_common_core::{
	ExecutionContext, ExecutionErrorKind, ExecutionId, ExecutionResult, ExecutionStatus, Function,
	FunctionId, TenantId,
};
use warden_common_secret::redact_values;

use crate::config::SandboxConfig;
use crate::error::{SandboxError, SandboxResult};
use crate::facades::{FetchBridge, SecretBindings};
use crate::isolate::{self, IsolateJob, IsolateReport, Outcome};
use crate::network::{FetchTransport, NetworkPolicy, ReqwestTransport};
use crate::validation::validate_params;

/// Runs tenant scripts, one fresh isolate per call.
///
/// Cheap to clone; clones share the concurrency limit and the transport.
///
/// Each isolate runs on its own thread. A worker that is still running after
/// its deadline and grace period is abandoned: the caller gets a timeout
/// result and the worker moves from an execution slot to one of
/// `max_abandoned` quarantine slots until its thread returns.
#[derive(Clone)]
pub struct SandboxEngine {
	config: Arc<SandboxConfig>,
	policy: Arc<NetworkPolicy>,
	transport: Arc<dyn FetchTransport>,
	permits: Arc<Semaphore>,
	abandoned: Arc<Semaphore>,
}

impl std::fmt::Debug for SandboxEngine {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SandboxEngine")
			.field("config", &self.config)
			.field("available_permits", &self.permits.available_permits())
			.field("abandoned_capacity", &self.abandoned.available_permits())
			.finish_non_exhaustive()
	}
}

impl SandboxEngine {
	/// Build an engine whose `fetch` goes out over `reqwest`.
	pub fn new(config: SandboxConfig) -> SandboxResult<Self> {
		config.validate()?;
		let policy = Arc::new(NetworkPolicy::new(
			&config.allowed_hosts,
			&config.allowed_methods,
		));
		let transport = ReqwestTransport::new(Arc::clone(&policy), config.max_response_bytes)?;
		Ok(Self::assemble(config, policy, Arc::new(transport)))
	}

	/// Build an engine with a caller-supplied transport. The network policy
	/// is still enforced before `transport` sees a request.
	pub fn with_transport(
		config: SandboxConfig,
		transport: Arc<dyn FetchTransport>,
	) -> SandboxResult<Self> {
		config.validate()?;
		let policy = Arc::new(NetworkPolicy::new(
			&config.allowed_hosts,
			&config.allowed_methods,
		));
		Ok(Self::assemble(config, policy, transport))
	}

	fn assemble(
		config: SandboxConfig,
		policy: Arc<NetworkPolicy>,
		transport: Arc<dyn FetchTransport>,
	) -> Self {
		let permits = Arc::new(Semaphore::new(config.max_concurrent));
		let abandoned = Arc::new(Semaphore::new(config.max_abandoned));
		Self {
			config: Arc::new(config),
			policy,
			transport,
			permits,
			abandoned,
		}
	}

	pub fn config(&self) -> &SandboxConfig {
		&self.config
	}

	pub fn policy(&self) -> &NetworkPolicy {
		&self.policy
	}

	/// Execute `function` for `tenant_id` under a fresh execution ID.
	pub async fn execute(
		&self,
		tenant_id: TenantId,
		function: &Function,
		params: &Value,
		secrets: SecretBindings,
	) -> SandboxResult<ExecutionResult> {
		self.execute_with_id(ExecutionId::generate(), tenant_id, function, params, secrets)
			.await
	}

	/// Execute `function` for `tenant_id`.
	///
	/// Every in-script outcome, including rejected params, policy violations,
	/// timeouts and heap exhaustion, comes back as `Ok` with
	/// `status = error`. `Err` means the host itself failed.
	///
	/// Only the bindings `function` declares are exposed to the script.
	#[instrument(
		skip(self, function, params, secrets),
		fields(tenant_id = %tenant_id, function_id = %function.id, execution_id = %execution_id)
	)]
	pub async fn execute_with_id(
		&self,
		execution_id: ExecutionId,
		tenant_id: TenantId,
		function: &Function,
		params: &Value,
		secrets: SecretBindings,
	) -> SandboxResult<ExecutionResult> {
		let started_at = Utc::now();
		let clock = Instant::now();

		if function.tenant_id != tenant_id {
			warn!(owner = %function.tenant_id, "Function executed for a tenant that does not own it");
			let outcome = Outcome::failure(
				ExecutionErrorKind::Validation,
				"validation failed: function does not belong to tenant",
			);
			return Ok(finish(execution_id, function.id, started_at, clock, outcome, Vec::new()));
		}

		if let Err(err) = validate_params(params) {
			warn!(error = %err, "Rejected execution params");
			let outcome = Outcome::failure(ExecutionErrorKind::Validation, err.to_string());
			return Ok(finish(execution_id, function.id, started_at, clock, outcome, Vec::new()));
		}

		let secrets = secrets.restricted_to(function);
		let timeout = self.config.timeout_for(function);

		// Waiting for a slot is bounded by the same budget as the script.
		let permit = match tokio::time::timeout(timeout, Arc::clone(&self.permits).acquire_owned()).await {
			Ok(Ok(permit)) => permit,
			Ok(Err(_)) => return Err(SandboxError::HostFault("execution slots closed".to_string())),
			Err(_) => {
				warn!(
					timeout_ms = duration_ms(timeout),
					"No execution slot became free before the deadline"
				);
				let outcome = Outcome::failure(
					ExecutionErrorKind::Timeout,
					format!(
						"execution timeout: no execution slot became available within {}ms",
						timeout.as_millis()
					),
				);
				return Ok(finish(execution_id, function.id, started_at, clock, outcome, Vec::new()));
			}
		};

		let context = ExecutionContext {
			function_id: function.id,
			tenant_id,
			execution_id,
			start_time: started_at,
		};
		let context_json = serde_json::to_string(&context.script_view())
			.map_err(|e| SandboxError::HostFault(format!("failed to encode execution context: {e}")))?;

		// The budget starts once a slot is held, not while queueing for one.
		let deadline = Instant::now() + timeout;
		let cancel = Arc::new(AtomicBool::new(false));
		let job = IsolateJob {
			source: function.source_code.clone(),
			params_json: params.to_string(),
			secrets_json: secrets.script_json(),
			context_json,
			memory_limit: self.config.memory_limit_for(function),
			timeout,
			deadline,
			cancel: Arc::clone(&cancel),
			fetch: FetchBridge::new(
				Arc::clone(&self.policy),
				Arc::clone(&self.transport),
				Handle::current(),
				deadline,
				self.config.fetch_timeout,
			),
			max_log_lines: self.config.max_log_lines,
			max_log_line_bytes: self.config.max_log_line_bytes,
			max_result_bytes: self.config.max_result_bytes,
		};

		// The slot travels with the worker thread, so it stays taken even if
		// this future is dropped before the worker returns.
		let slot = Arc::new(WorkerSlot::new(permit));
		let (report_tx, report_rx) = oneshot::channel();
		let worker_slot = Arc::clone(&slot);
		std::thread::Builder::new()
			.name("warden-isolate".to_string())
			.spawn(move || {
				let release = ReleaseOnExit(worker_slot);
				let report = isolate::run(job);
				drop(release);
				let _ = report_tx.send(report);
			})
			.map_err(|e| SandboxError::HostFault(format!("failed to start isolate worker: {e}")))?;

		let report = match tokio::time::timeout(timeout + self.config.interrupt_grace, report_rx).await {
			Ok(Ok(Ok(report))) => report,
			Ok(Ok(Err(err))) => {
				error!(error = %err, "Isolate could not be started");
				return Err(err);
			}
			Ok(Err(_)) => {
				error!("Isolate worker exited without a report");
				return Err(SandboxError::HostFault(
					"isolate worker exited without a report".to_string(),
				));
			}
			Err(_) => {
				cancel.store(true, Ordering::Relaxed);
				self.abandon(&slot, timeout);
				IsolateReport {
					outcome: Outcome::timeout(timeout),
					logs: Vec::new(),
				}
			}
		};

		let logs = report
			.logs
			.iter()
			.map(|line| redact_values(line, secrets.values()).into_owned())
			.collect();
		let outcome = match report.outcome {
			Outcome::Failure { kind, message } => Outcome::Failure {
				kind,
				message: redact_values(&message, secrets.values()).into_owned(),
			},
			success => success,
		};

		Ok(finish(execution_id, function.id, started_at, clock, outcome, logs))
	}

	/// Move a worker that missed its deadline out of the concurrency limit
	/// and into quarantine. With quarantine full it keeps its execution slot.
	fn abandon(&self, slot: &WorkerSlot, timeout: Duration) {
		match Arc::clone(&self.abandoned).try_acquire_owned() {
			Ok(quarantine) => {
				if slot.swap(quarantine) {
					warn!(
						timeout_ms = duration_ms(timeout),
						quarantine_free = self.abandoned.available_permits(),
						"Abandoned isolate worker that did not yield after its deadline"
					);
				}
			}
			Err(_) => error!(
				timeout_ms = duration_ms(timeout),
				"Abandoned isolate worker keeps its execution slot, quarantine is full"
			),
		}
	}
}

/// The permit a worker thread holds while it runs.
struct WorkerSlot {
	state: Mutex<SlotState>,
}

struct SlotState {
	permit: Option<OwnedSemaphorePermit>,
	finished: bool,
}

impl WorkerSlot {
	fn new(permit: OwnedSemaphorePermit) -> Self {
		Self {
			state: Mutex::new(SlotState {
				permit: Some(permit),
				finished: false,
			}),
		}
	}

	/// Called by the worker when its thread is done with the isolate.
	fn release(&self) {
		let mut state = self.lock();
		state.finished = true;
		state.permit = None;
	}

	/// Replace the held permit, releasing the old one. Returns `false`, and
	/// drops `permit`, if the worker has already finished.
	fn swap(&self, permit: OwnedSemaphorePermit) -> bool {
		let mut state = self.lock();
		if state.finished {
			return false;
		}
		state.permit = Some(permit);
		true
	}

	fn lock(&self) -> MutexGuard<'_, SlotState> {
		self.state.lock().unwrap_or_else(PoisonError::into_inner)
	}
}

/// Releases the worker's slot when its thread is done, including by panic.
struct ReleaseOnExit(Arc<WorkerSlot>);

impl Drop for ReleaseOnExit {
	fn drop(&mut self) {
		self.0.release();
	}
}

fn finish(
	execution_id: ExecutionId,
	function_id: FunctionId,
	start_time: DateTime<Utc>,
	clock: Instant,
	outcome: Outcome,
	logs: Vec<String>,
) -> ExecutionResult {
	let elapsed = clock.elapsed();
	let mut result = ExecutionResult {
		execution_id,
		function_id,
		status: ExecutionStatus::Success,
		start_time,
		end_time: Utc::now(),
		duration_ms: duration_ms(elapsed),
		result: None,
		error: None,
		error_kind: None,
		logs,
	};

	match outcome {
		Outcome::Success(value) => {
			info!(duration_ms = result.duration_ms, "Execution finished");
			result.result = Some(value);
		}
		Outcome::Failure { kind, message } => {
			match kind {
				ExecutionErrorKind::Runtime | ExecutionErrorKind::Validation => {
					info!(duration_ms = result.duration_ms, error_kind = ?kind, "Execution failed")
				}
				_ => warn!(duration_ms = result.duration_ms, error_kind = ?kind, error = %message, "Execution stopped"),
			}
			result.status = ExecutionStatus::Error;
			result.error = Some(message);
			result.error_kind = Some(kind);
		}
	}
	result
}

fn duration_ms(duration: Duration) -> u64 {
	u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn failure_fills_error_fields() {
		let result = finish(
			ExecutionId::generate(),
			FunctionId::generate(),
			Utc::now(),
			Instant::now(),
			Outcome::failure(ExecutionErrorKind::Runtime, "Error: boom"),
			vec!["line".to_string()],
		);
		assert_eq!(result.status, ExecutionStatus::Error);
		assert_eq!(result.error.as_deref(), Some("Error: boom"));
		assert_eq!(result.error_kind, Some(ExecutionErrorKind::Runtime));
		assert!(result.result.is_none());
		assert_eq!(result.logs, vec!["line"]);
	}

	#[test]
	fn success_fills_result() {
		let result = finish(
			ExecutionId::generate(),
			FunctionId::generate(),
			Utc::now(),
			Instant::now(),
			Outcome::Success(serde_json::json!(42)),
			Vec::new(),
		);
		assert!(result.is_success());
		assert_eq!(result.result, Some(serde_json::json!(42)));
		assert!(result.end_time >= result.start_time);
	}

	#[test]
	fn swapping_a_running_slot_frees_its_execution_permit() {
		let permits = Arc::new(Semaphore::new(1));
		let quarantine = Arc::new(Semaphore::new(1));
		let slot = WorkerSlot::new(Arc::clone(&permits).try_acquire_owned().unwrap());
		assert_eq!(permits.available_permits(), 0);

		assert!(slot.swap(Arc::clone(&quarantine).try_acquire_owned().unwrap()));
		assert_eq!(permits.available_permits(), 1);
		assert_eq!(quarantine.available_permits(), 0);

		slot.release();
		assert_eq!(quarantine.available_permits(), 1);
	}

	#[test]
	fn swapping_a_finished_slot_returns_the_new_permit() {
		let permits = Arc::new(Semaphore::new(1));
		let quarantine = Arc::new(Semaphore::new(1));
		let slot = WorkerSlot::new(Arc::clone(&permits).try_acquire_owned().unwrap());
		slot.release();
		assert_eq!(permits.available_permits(), 1);

		assert!(!slot.swap(Arc::clone(&quarantine).try_acquire_owned().unwrap()));
		assert_eq!(quarantine.available_permits(), 1);
	}

	#[test]
	fn invalid_config_is_rejected() {
		let config = SandboxConfig {
			max_concurrent: 0,
			..SandboxConfig::default()
		};
		assert!(matches!(
			SandboxEngine::new(config),
			Err(SandboxError::Configuration(_))
		));
	}
}
