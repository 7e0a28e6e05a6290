// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Type-safe identifiers.
//!
//! Tenants are numbered accounts; functions and executions are random UUIDs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CoreError;

macro_rules! define_id_type {
	($name:ident, $doc:expr) => {
		#[doc = $doc]
		#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
		#[serde(transparent)]
		pub struct $name(Uuid);

		impl $name {
			pub fn new(id: Uuid) -> Self {
				Self(id)
			}

			/// Generate a new random ID.
			pub fn generate() -> Self {
				Self(Uuid::new_v4())
			}

			pub fn into_inner(self) -> Uuid {
				self.0
			}

			pub fn as_uuid(&self) -> &Uuid {
				&self.0
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				write!(f, "{}", self.0)
			}
		}

		impl From<Uuid> for $name {
			fn from(id: Uuid) -> Self {
				Self(id)
			}
		}

		impl From<$name> for Uuid {
			fn from(id: $name) -> Self {
				id.0
			}
		}
	};
}

define_id_type!(FunctionId, "Unique identifier for a tenant-owned function.");
define_id_type!(
	ExecutionId,
	"Unique identifier for one invocation of a function. Never reused."
);

/// The owning account whose functions and secrets are isolated from every
/// other account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(i64);

impl TenantId {
	pub const fn new(id: i64) -> Self {
		Self(id)
	}

	pub fn get(self) -> i64 {
		self.0
	}
}

impl fmt::Display for TenantId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl From<i64> for TenantId {
	fn from(id: i64) -> Self {
		Self(id)
	}
}

impl FromStr for TenantId {
	type Err = CoreError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		s.trim()
			.parse::<i64>()
			.map(Self)
			.map_err(|_| CoreError::InvalidTenantId(s.to_string()))
	}
}
