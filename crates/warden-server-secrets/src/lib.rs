// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-tenant secret store with envelope encryption.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   wraps    ┌────────────────────┐   seals   ┌──────────────────┐
//! │ Root key     │──────────▶│ Data encryption    │─────────▶│ Secret payloads  │
//! │ (KeyBackend) │            │ keys (KeyManager)  │           │ (SecretStore)    │
//! └──────────────┘            └────────────────────┘           └──────────────────┘
//! ```
//!
//! - Every secret is sealed with AES-256-GCM under the currently active DEK,
//!   with a fresh nonce and the owning tenant and name as associated data.
//! - DEKs are stored only in wrapped form; the root key never leaves the
//!   [`KeyBackend`].
//! - Rotation retires the active DEK and creates a new one; retired DEKs are
//!   kept so older records stay readable. Nothing is re-encrypted eagerly.
//! - Every lookup is keyed by `(tenant, name)`. Another tenant's secret of the
//!   same name is indistinguishable from a missing one.
//!
//! [`SecretsService`] is the entry point; it ties the key manager, the store
//! and the [`AuditLog`] together.

pub mod audit;
pub mod config;
pub mod encryption;
pub mod error;
pub mod key_backend;
pub mod key_manager;
pub mod service;
pub mod store;
pub mod transfer;
pub mod types;

pub use audit::{AuditAction, AuditLog, AuditLogEntry};
pub use config::SecretsConfig;
pub use error::{SecretsError, SecretsResult};
pub use key_backend::{KeyBackend, SoftwareKeyBackend, WrappedDek};
pub use key_manager::{KeyInfo, KeyManager};
pub use service::SecretsService;
pub use store::{InMemorySecretStore, SecretStore};
pub use transfer::SecretExport;
pub use types::{EncryptedSecret, KeyId, SealedValue, SecretMetadata};

pub use warden_common_secret::SecretString;
