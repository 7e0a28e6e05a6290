// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Host-side failures of the engine itself.
//!
//! Anything that goes wrong inside a script is not an error here: it comes
//! back as an [`ExecutionResult`](warden_common_core::ExecutionResult) with
//! `status = error`.

use thiserror::Error;

pub type SandboxResult<T> = Result<T, SandboxError>;

#[derive(Debug, Error)]
pub enum SandboxError {
	#[error("invalid sandbox configuration: {0}")]
	Configuration(String),

	#[error("failed to build fetch transport: {0}")]
	Transport(#[from] reqwest::Error),

	/// The isolate worker died without producing an outcome.
	#[error("sandbox host fault: {0}")]
	HostFault(String),
}

impl From<warden_common_config::EnvParseError> for SandboxError {
	fn from(err: warden_common_config::EnvParseError) -> Self {
		SandboxError::Configuration(err.to_string())
	}
}
