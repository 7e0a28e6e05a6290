// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Sandboxed execution of tenant scripts.
//!
//! Each call to [`SandboxEngine::execute`] runs in a fresh QuickJS runtime on
//! a blocking worker thread:
//!
//! 1. Params are scanned for markup injection ([`validation`]).
//! 2. A new runtime is created with the function's heap ceiling and an
//!    interrupt hook bound to its deadline.
//! 3. `executionContext`, the declared `secrets` and a policy-checked `fetch`
//!    are installed; `eval` and function constructors are removed and the
//!    built-ins frozen.
//! 4. The script runs; its `main(params)` result (or completion value) is
//!    returned as JSON together with captured console output.
//!
//! Whatever the script does, the caller gets an
//! [`ExecutionResult`](warden_common_core::ExecutionResult). [`SandboxError`]
//! is only for faults in the host.

pub mod config;
pub mod engine;
pub mod error;
pub mod facades;
mod isolate;
pub mod network;
pub mod validation;

pub use config::SandboxConfig;
pub use engine::SandboxEngine;
pub use error::{SandboxError, SandboxResult};
pub use facades::SecretBindings;
pub use network::{
	FetchError, FetchRequest, FetchResponse, FetchTransport, NetworkPolicy, PolicyViolation,
	ReqwestTransport,
};
pub use validation::{validate_params, ValidationError};
