// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Identities and records shared by the secret store, the sandbox engine and
//! the execution coordinator.

pub mod error;
pub mod execution;
pub mod function;
pub mod ids;

pub use error::*;
pub use execution::*;
pub use function::*;
pub use ids::*;
