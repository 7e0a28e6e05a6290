// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::instrument;

use warden_common_core::{Execution, ExecutionId, ExecutionResult, FunctionId};

use crate::error::{CoordinatorError, CoordinatorResult};

/// Persistence for execution records.
#[async_trait]
pub trait ExecutionRepository: Send + Sync {
	/// Record a new execution. Fails if the ID is already taken.
	async fn insert(&self, execution: Execution) -> CoordinatorResult<()>;

	/// Move a running execution to its terminal state.
	async fn complete(&self, id: ExecutionId, outcome: &ExecutionResult) -> CoordinatorResult<Execution>;

	async fn get(&self, id: ExecutionId) -> CoordinatorResult<Option<Execution>>;

	/// Executions of `function_id`, newest first.
	async fn list_for_function(&self, function_id: FunctionId, limit: usize) -> CoordinatorResult<Vec<Execution>>;
}

/// Finished records kept by [`InMemoryExecutionRepository::new`].
pub const DEFAULT_RETENTION: usize = 10_000;

/// Process-local store with bounded retention. Once more than `retention`
/// records are held, the oldest finished ones are dropped; running
/// executions are never evicted.
#[derive(Debug)]
pub struct InMemoryExecutionRepository {
	records: RwLock<Records>,
	retention: usize,
}

#[derive(Debug, Default)]
struct Records {
	by_id: HashMap<ExecutionId, Execution>,
	/// Insertion order, oldest first.
	order: VecDeque<ExecutionId>,
}

impl Records {
	fn evict(&mut self, retention: usize) {
		while self.by_id.len() > retention {
			let oldest_finished = self.order.iter().position(|id| {
				self.by_id
					.get(id)
					.map_or(true, |execution| execution.status.is_terminal())
			});
			let Some(position) = oldest_finished else {
				break;
			};
			if let Some(id) = self.order.remove(position) {
				self.by_id.remove(&id);
			}
		}
	}
}

impl Default for InMemoryExecutionRepository {
	fn default() -> Self {
		Self::with_retention(DEFAULT_RETENTION)
	}
}

impl InMemoryExecutionRepository {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_retention(retention: usize) -> Self {
		Self {
			records: RwLock::new(Records::default()),
			retention: retention.max(1),
		}
	}
}

#[async_trait]
impl ExecutionRepository for InMemoryExecutionRepository {
	#[instrument(skip(self, execution), fields(execution_id = %execution.id))]
	async fn insert(&self, execution: Execution) -> CoordinatorResult<()> {
		let mut records = self.records.write().await;
		if records.by_id.contains_key(&execution.id) {
			return Err(CoordinatorError::Duplicate(execution.id));
		}
		records.order.push_back(execution.id);
		records.by_id.insert(execution.id, execution);
		records.evict(self.retention);
		Ok(())
	}

	#[instrument(skip(self, outcome))]
	async fn complete(&self, id: ExecutionId, outcome: &ExecutionResult) -> CoordinatorResult<Execution> {
		let mut records = self.records.write().await;
		let execution = records
			.by_id
			.get_mut(&id)
			.ok_or(CoordinatorError::NotFound(id))?;
		execution.complete(outcome)?;
		let completed = execution.clone();
		records.evict(self.retention);
		Ok(completed)
	}

	async fn get(&self, id: ExecutionId) -> CoordinatorResult<Option<Execution>> {
		Ok(self.records.read().await.by_id.get(&id).cloned())
	}

	async fn list_for_function(&self, function_id: FunctionId, limit: usize) -> CoordinatorResult<Vec<Execution>> {
		let records = self.records.read().await;
		let mut matching: Vec<Execution> = records
			.by_id
			.values()
			.filter(|e| e.function_id == function_id)
			.cloned()
			.collect();
		matching.sort_by(|a, b| b.start_time.cmp(&a.start_time));
		matching.truncate(limit);
		Ok(matching)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::Utc;
	use warden_common_core::{ExecutionStatus, TenantId};

	fn finished(execution: &Execution) -> ExecutionResult {
		ExecutionResult {
			execution_id: execution.id,
			function_id: execution.function_id,
			status: ExecutionStatus::Success,
			start_time: execution.start_time,
			end_time: Utc::now(),
			duration_ms: 1,
			result: Some(serde_json::json!(1)),
			error: None,
			error_kind: None,
			logs: Vec::new(),
		}
	}

	#[tokio::test]
	async fn insert_then_complete() {
		let repo = InMemoryExecutionRepository::new();
		let execution = Execution::start(ExecutionId::generate(), FunctionId::generate(), TenantId::new(1));
		repo.insert(execution.clone()).await.unwrap();

		let stored = repo.complete(execution.id, &finished(&execution)).await.unwrap();
		assert_eq!(stored.status, ExecutionStatus::Success);
		assert_eq!(repo.get(execution.id).await.unwrap(), Some(stored));
	}

	#[tokio::test]
	async fn duplicate_insert_is_rejected() {
		let repo = InMemoryExecutionRepository::new();
		let execution = Execution::start(ExecutionId::generate(), FunctionId::generate(), TenantId::new(1));
		repo.insert(execution.clone()).await.unwrap();
		assert!(matches!(
			repo.insert(execution).await,
			Err(CoordinatorError::Duplicate(_))
		));
	}

	#[tokio::test]
	async fn completing_twice_fails() {
		let repo = InMemoryExecutionRepository::new();
		let execution = Execution::start(ExecutionId::generate(), FunctionId::generate(), TenantId::new(1));
		repo.insert(execution.clone()).await.unwrap();
		repo.complete(execution.id, &finished(&execution)).await.unwrap();

		assert!(matches!(
			repo.complete(execution.id, &finished(&execution)).await,
			Err(CoordinatorError::Record(_))
		));
	}

	#[tokio::test]
	async fn unknown_execution_cannot_complete() {
		let repo = InMemoryExecutionRepository::new();
		let execution = Execution::start(ExecutionId::generate(), FunctionId::generate(), TenantId::new(1));
		assert!(matches!(
			repo.complete(execution.id, &finished(&execution)).await,
			Err(CoordinatorError::NotFound(_))
		));
	}

	#[tokio::test]
	async fn list_is_scoped_to_function_and_bounded() {
		let repo = InMemoryExecutionRepository::new();
		let function_id = FunctionId::generate();
		for _ in 0..3 {
			repo.insert(Execution::start(ExecutionId::generate(), function_id, TenantId::new(1)))
				.await
				.unwrap();
		}
		repo.insert(Execution::start(ExecutionId::generate(), FunctionId::generate(), TenantId::new(1)))
			.await
			.unwrap();

		assert_eq!(repo.list_for_function(function_id, 10).await.unwrap().len(), 3);
		assert_eq!(repo.list_for_function(function_id, 2).await.unwrap().len(), 2);
	}

	#[tokio::test]
	async fn oldest_finished_records_are_evicted() {
		let repo = InMemoryExecutionRepository::with_retention(2);
		let function_id = FunctionId::generate();
		let running = Execution::start(ExecutionId::generate(), function_id, TenantId::new(1));
		repo.insert(running.clone()).await.unwrap();

		let mut finished_ids = Vec::new();
		for _ in 0..3 {
			let execution = Execution::start(ExecutionId::generate(), function_id, TenantId::new(1));
			repo.insert(execution.clone()).await.unwrap();
			repo.complete(execution.id, &finished(&execution)).await.unwrap();
			finished_ids.push(execution.id);
		}

		assert!(repo.get(running.id).await.unwrap().is_some());
		assert!(repo.get(finished_ids[0]).await.unwrap().is_none());
		assert!(repo.get(finished_ids[1]).await.unwrap().is_none());
		assert!(repo.get(finished_ids[2]).await.unwrap().is_some());

		repo.complete(running.id, &finished(&running)).await.unwrap();
		assert_eq!(repo.list_for_function(function_id, 10).await.unwrap().len(), 2);
	}

	#[tokio::test]
	async fn running_records_are_never_evicted() {
		let repo = InMemoryExecutionRepository::with_retention(1);
		let ids: Vec<ExecutionId> = (0..3).map(|_| ExecutionId::generate()).collect();
		for id in &ids {
			repo.insert(Execution::start(*id, FunctionId::generate(), TenantId::new(1)))
				.await
				.unwrap();
		}
		for id in &ids {
			assert!(repo.get(*id).await.unwrap().is_some());
		}
	}
}
