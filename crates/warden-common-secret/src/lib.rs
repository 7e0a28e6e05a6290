// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Redacting wrapper for tenant credentials and key material.
//!
//! [`Secret<T>`] carries values that must never reach a log line, an error
//! message or a serialized payload: decrypted tenant secrets, the root key
//! loaded from the environment, and the secret bindings handed to a sandboxed
//! script. A wrapped value:
//!
//! - prints as `[REDACTED]` through `Debug` and `Display`
//! - serializes as `"[REDACTED]"`
//! - is zeroized when dropped
//! - is only reachable through an explicit `.expose()`
//!
//! ```
//! use warden_common_secret::SecretString;
//!
//! let api_key = SecretString::new("sk-tenant-7".to_string());
//!
//! assert_eq!(format!("{api_key}"), "[REDACTED]");
//! assert_eq!(format!("{api_key:?}"), "Secret(\"[REDACTED]\")");
//! assert_eq!(api_key.expose(), "sk-tenant-7");
//! ```
//!
//! [`redact_values`] scrubs already-exposed values out of free text, for
//! output that a script produced after it was handed its credentials.

use std::borrow::Cow;
use std::fmt;
use zeroize::Zeroize;

/// The redaction placeholder used in all output.
pub const REDACTED: &str = "[REDACTED]";

/// A wrapper for sensitive values that prevents accidental exposure.
///
/// There is no `Deref`: call sites opt in with [`Secret::expose`], which keeps
/// every read of a credential visible in review.
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct Secret<T>
where
	T: Zeroize,
{
	inner: T,
}

/// Convenience alias for the common case of secret strings.
pub type SecretString = Secret<String>;

/// Raw key material or sealed payloads that must be wiped after use.
pub type SecretBytes = Secret<Vec<u8>>;

impl<T> Secret<T>
where
	T: Zeroize,
{
	pub fn new(inner: T) -> Self {
		Self { inner }
	}

	/// Explicitly access the inner value.
	pub fn expose(&self) -> &T {
		&self.inner
	}

	/// Clone the inner value out of the wrapper.
	///
	/// The wrapper's own copy is still zeroized when it drops.
	pub fn into_inner(self) -> T
	where
		T: Clone,
	{
		self.inner.clone()
	}
}

impl<T> Clone for Secret<T>
where
	T: Zeroize + Clone,
{
	fn clone(&self) -> Self {
		Self {
			inner: self.inner.clone(),
		}
	}
}

impl<T> fmt::Debug for Secret<T>
where
	T: Zeroize,
{
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("Secret").field(&REDACTED).finish()
	}
}

impl<T> fmt::Display for Secret<T>
where
	T: Zeroize,
{
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(REDACTED)
	}
}

impl<T> PartialEq for Secret<T>
where
	T: Zeroize + PartialEq,
{
	fn eq(&self, other: &Self) -> bool {
		self.inner == other.inner
	}
}

impl<T> Eq for Secret<T> where T: Zeroize + Eq {}

impl From<String> for SecretString {
	fn from(value: String) -> Self {
		Self::new(value)
	}
}

impl From<&str> for SecretString {
	fn from(value: &str) -> Self {
		Self::new(value.to_string())
	}
}

/// Replace every occurrence of any of `values` in `text` with [`REDACTED`].
///
/// Empty values are ignored. Longer values are replaced first so a value that
/// contains another one is scrubbed whole.
pub fn redact_values<'a, I>(text: &'a str, values: I) -> Cow<'a, str>
where
	I: IntoIterator<Item = &'a SecretString>,
{
	let mut needles: Vec<&str> = values
		.into_iter()
		.map(|v| v.expose().as_str())
		.filter(|v| !v.is_empty())
		.collect();
	needles.sort_by_key(|v| std::cmp::Reverse(v.len()));

	let mut out = Cow::Borrowed(text);
	for needle in needles {
		if out.contains(needle) {
			out = Cow::Owned(out.replace(needle, REDACTED));
		}
	}
	out
}

#[cfg(feature = "serde")]
mod serde_impl {
	use super::{Secret, REDACTED};
	use serde::{Deserialize, Deserializer, Serialize, Serializer};
	use zeroize::Zeroize;

	impl<T> Serialize for Secret<T>
	where
		T: Serialize + Zeroize,
	{
		fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
		where
			S: Serializer,
		{
			serializer.serialize_str(REDACTED)
		}
	}

	impl<'de, T> Deserialize<'de> for Secret<T>
	where
		T: Deserialize<'de> + Zeroize,
	{
		fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
		where
			D: Deserializer<'de>,
		{
			let inner = T::deserialize(deserializer)?;
			Ok(Secret::new(inner))
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	mod secret_type {
		use super::*;

		#[test]
		fn debug_is_redacted() {
			let secret = SecretString::from("tenant-api-key");
			let debug_output = format!("{secret:?}");

			assert!(!debug_output.contains("tenant-api-key"));
			assert!(debug_output.contains(REDACTED));
		}

		#[test]
		fn display_is_redacted() {
			let secret = SecretString::from("tenant-api-key");
			assert_eq!(format!("{secret}"), REDACTED);
		}

		#[test]
		fn expose_returns_inner_value() {
			let secret = SecretString::from("tenant-api-key");
			assert_eq!(secret.expose(), "tenant-api-key");
		}

		#[test]
		fn secret_bytes_are_redacted() {
			let key = SecretBytes::new(vec![0xde, 0xad, 0xbe, 0xef]);
			assert_eq!(format!("{key}"), REDACTED);
			assert_eq!(key.expose().len(), 4);
		}

		#[test]
		fn option_secret_debug_is_redacted() {
			let secret: Option<SecretString> = Some(SecretString::from("hidden-value"));
			let debug = format!("{secret:?}");
			assert!(debug.contains(REDACTED));
			assert!(!debug.contains("hidden-value"));
		}

		#[cfg(feature = "serde")]
		#[test]
		fn serialize_is_redacted() {
			let secret = SecretString::from("tenant-api-key");
			let json = serde_json::to_string(&secret).unwrap();
			assert_eq!(json, format!("\"{REDACTED}\""));
		}

		#[cfg(feature = "serde")]
		#[test]
		fn deserialize_populates_secret() {
			let secret: SecretString = serde_json::from_str(r#""from-config""#).unwrap();
			assert_eq!(secret.expose(), "from-config");
		}
	}

	mod redaction {
		use super::*;

		#[test]
		fn replaces_every_occurrence() {
			let secrets = vec![SecretString::from("s3cr3t")];
			let text = "token=s3cr3t, again s3cr3t";
			assert_eq!(
				redact_values(text, &secrets),
				"token=[REDACTED], again [REDACTED]"
			);
		}

		#[test]
		fn leaves_clean_text_borrowed() {
			let secrets = vec![SecretString::from("s3cr3t")];
			assert!(matches!(
				redact_values("nothing here", &secrets),
				Cow::Borrowed(_)
			));
		}

		#[test]
		fn longer_values_win_over_their_prefixes() {
			let secrets = vec![SecretString::from("abc"), SecretString::from("abcdef")];
			assert_eq!(redact_values("x abcdef y", &secrets), "x [REDACTED] y");
		}

		#[test]
		fn empty_values_are_ignored() {
			let secrets = vec![SecretString::from("")];
			assert_eq!(redact_values("unchanged", &secrets), "unchanged");
		}
	}

	proptest! {
		#[test]
		fn debug_never_contains_secret(inner in "[a-zA-Z0-9!@#$%^&*_+=;:,.<>?/-]{3,50}") {
			prop_assume!(!inner.contains("REDACTED"));
			prop_assume!(!inner.contains("Secret"));

			let secret = Secret::new(inner.clone());
			let debug = format!("{secret:?}");
			prop_assert!(!debug.contains(&inner));
		}

		#[test]
		fn redacted_text_never_contains_secret(
			prefix in "[a-z ]{0,20}",
			inner in "[A-Z0-9]{4,24}",
			suffix in "[a-z ]{0,20}",
		) {
			let secrets = vec![SecretString::new(inner.clone())];
			let text = format!("{prefix}{inner}{suffix}");
			let redacted = redact_values(&text, &secrets);
			prop_assert!(!redacted.contains(&inner));
		}
	}
}
