// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use reqwest::{Client, ClientBuilder};

/// Creates a client builder carrying the standard warden User-Agent.
///
/// Use this when the client needs further customisation (redirect policy,
/// connection limits).
pub fn builder() -> ClientBuilder {
	Client::builder().user_agent(user_agent())
}

/// Returns the standard User-Agent string.
///
/// Format: `warden/{version} ({os}-{arch})`
pub fn user_agent() -> String {
	format!(
		"warden/{} ({}-{})",
		env!("CARGO_PKG_VERSION"),
		std::env::consts::OS,
		std::env::consts::ARCH
	)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn user_agent_has_correct_format() {
		let ua = user_agent();
		assert!(ua.starts_with("warden/"));
		assert!(ua.contains(env!("CARGO_PKG_VERSION")));
		assert!(ua.ends_with(')'));
	}

	#[test]
	fn builder_produces_a_client() {
		assert!(builder().build().is_ok());
	}
}
