// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Execution coordinator.
//!
//! Sits between callers and the sandbox: it resolves the secret names a
//! function declares against that function's tenant, hands only those values
//! to the engine, and records each execution from running to its terminal
//! state.

pub mod coordinator;
pub mod error;
pub mod repository;
pub mod secrets;

pub use coordinator::ExecutionCoordinator;
pub use error::{CoordinatorError, CoordinatorResult};
pub use repository::{ExecutionRepository, InMemoryExecutionRepository};
pub use secrets::SecretSource;
