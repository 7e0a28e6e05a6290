// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use warden_common_core::{CoreError, ExecutionId};
use warden_server_sandbox::SandboxError;

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
	#[error("Execution not found: {0}")]
	NotFound(ExecutionId),

	#[error("Execution already recorded: {0}")]
	Duplicate(ExecutionId),

	#[error("Execution record error: {0}")]
	Record(#[from] CoreError),

	#[error("Sandbox error: {0}")]
	Sandbox(#[from] SandboxError),
}

pub type CoordinatorResult<T> = std::result::Result<T, CoordinatorError>;
