// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Environment configuration helpers shared by the warden services.
//!
//! - [`load_secret_env`] / [`require_secret_env`] read credentials using the
//!   `VAR` / `VAR_FILE` convention.
//! - [`parse_env`], [`parse_env_duration_ms`] and [`parse_env_list`] read typed
//!   settings and report the offending variable when a value is malformed.

pub mod env;
pub mod vars;

pub use env::{load_secret_env, require_secret_env, RequiredSecretError, SecretEnvError};
pub use vars::{
	parse_env, parse_env_duration_ms, parse_env_duration_secs, parse_env_list, EnvParseError,
};
