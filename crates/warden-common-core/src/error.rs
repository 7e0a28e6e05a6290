// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

use crate::ids::ExecutionId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
	#[error("execution {0} has already finished")]
	ExecutionAlreadyFinished(ExecutionId),

	#[error("result belongs to execution {actual}, not {expected}")]
	ExecutionMismatch {
		expected: ExecutionId,
		actual: ExecutionId,
	},

	#[error("invalid tenant id: {0}")]
	InvalidTenantId(String),
}
