// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Network policy and the transport behind the script's `fetch`.
//!
//! The policy is checked before a request reaches the transport, so a
//! rejected call never opens a connection. The transport is a trait so tests
//! can record requests instead of touching the network.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::redirect;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Redirect hops followed before giving up.
const MAX_REDIRECTS: usize = 5;

/// Why a `fetch` was refused. The messages are what the script sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PolicyViolation {
	#[error("Invalid URL")]
	InvalidUrl,

	#[error("Only HTTPS URLs are allowed")]
	InsecureScheme,

	#[error("Domain not in allowlist")]
	HostNotAllowed,

	#[error("Invalid HTTP method")]
	MethodNotAllowed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum HostPattern {
	Exact(String),
	/// `*.example.com`; stored as `.example.com`.
	Subdomain(String),
}

impl HostPattern {
	fn parse(raw: &str) -> Option<Self> {
		let raw = raw.trim().trim_end_matches('.').to_ascii_lowercase();
		if raw.is_empty() {
			return None;
		}
		match raw.strip_prefix("*.") {
			Some(suffix) if !suffix.is_empty() => Some(HostPattern::Subdomain(format!(".{suffix}"))),
			Some(_) => None,
			None => Some(HostPattern::Exact(raw)),
		}
	}

	fn matches(&self, host: &str) -> bool {
		match self {
			HostPattern::Exact(exact) => host == exact,
			HostPattern::Subdomain(suffix) => host.len() > suffix.len() && host.ends_with(suffix.as_str()),
		}
	}
}

#[derive(Debug, Clone, Default)]
pub struct NetworkPolicy {
	hosts: Vec<HostPattern>,
	methods: BTreeSet<String>,
}

impl NetworkPolicy {
	pub fn new<H, M>(hosts: H, methods: M) -> Self
	where
		H: IntoIterator,
		H::Item: AsRef<str>,
		M: IntoIterator,
		M::Item: AsRef<str>,
	{
		Self {
			hosts: hosts
				.into_iter()
				.filter_map(|h| HostPattern::parse(h.as_ref()))
				.collect(),
			methods: methods
				.into_iter()
				.map(|m| m.as_ref().trim().to_ascii_uppercase())
				.filter(|m| !m.is_empty())
				.collect(),
		}
	}

	/// A policy that refuses every request.
	pub fn deny_all() -> Self {
		Self::default()
	}

	pub fn allows_host(&self, host: &str) -> bool {
		let host = host.trim_end_matches('.').to_ascii_lowercase();
		self.hosts.iter().any(|pattern| pattern.matches(&host))
	}

	pub fn allows_method(&self, method: &str) -> bool {
		self.methods.contains(&method.to_ascii_uppercase())
	}

	/// Check a request against the policy: URL shape, then scheme, then host,
	/// then method.
	pub fn check(&self, raw_url: &str, method: &str) -> Result<Url, PolicyViolation> {
		let url = Url::parse(raw_url).map_err(|_| PolicyViolation::InvalidUrl)?;
		if url.scheme() != "https" {
			return Err(PolicyViolation::InsecureScheme);
		}
		let host = url.host_str().ok_or(PolicyViolation::InvalidUrl)?;
		if !self.allows_host(host) {
			return Err(PolicyViolation::HostNotAllowed);
		}
		if !self.allows_method(method) {
			return Err(PolicyViolation::MethodNotAllowed);
		}
		Ok(url)
	}
}

/// A request that has already passed the policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
	pub url: Url,
	pub method: String,
	pub headers: BTreeMap<String, String>,
	pub body: Option<String>,
	pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
	pub status: u16,
	pub status_text: String,
	pub url: String,
	pub headers: BTreeMap<String, String>,
	pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
	#[error("request timed out")]
	Timeout,

	#[error("response body exceeds {max} bytes")]
	ResponseTooLarge { max: usize },

	#[error("request failed: {0}")]
	Transport(String),
}

#[async_trait]
pub trait FetchTransport: Send + Sync {
	async fn send(&self, request: FetchRequest) -> Result<FetchResponse, FetchError>;
}

/// `reqwest`-backed transport. Redirects are followed only to https hosts
/// the policy allows.
pub struct ReqwestTransport {
	client: reqwest::Client,
	max_response_bytes: usize,
}

impl ReqwestTransport {
	pub fn new(policy: Arc<NetworkPolicy>, max_response_bytes: usize) -> reqwest::Result<Self> {
		let redirects = redirect::Policy::custom(move |attempt| {
			if attempt.previous().len() >= MAX_REDIRECTS {
				return attempt.error("too many redirects");
			}
			let allowed = attempt.url().scheme() == "https"
				&& attempt
					.url()
					.host_str()
					.is_some_and(|host| policy.allows_host(host));
			if allowed {
				attempt.follow()
			} else {
				attempt.stop()
			}
		});

		let client = warden_common_http::builder().redirect(redirects).build()?;
		Ok(Self {
			client,
			max_response_bytes,
		})
	}
}

#[async_trait]
impl FetchTransport for ReqwestTransport {
	async fn send(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
		let method = reqwest::Method::from_bytes(request.method.as_bytes())
			.map_err(|e| FetchError::Transport(e.to_string()))?;

		let mut builder = self
			.client
			.request(method, request.url.clone())
			.timeout(request.timeout);
		for (name, value) in &request.headers {
			builder = builder.header(name.as_str(), value.as_str());
		}
		if let Some(body) = request.body {
			builder = builder.body(body);
		}

		let mut response = builder.send().await.map_err(classify)?;

		let status = response.status();
		let url = response.url().to_string();
		let headers = response
			.headers()
			.iter()
			.filter_map(|(name, value)| {
				value
					.to_str()
					.ok()
					.map(|v| (name.as_str().to_string(), v.to_string()))
			})
			.collect();

		let mut body = Vec::new();
		while let Some(chunk) = response.chunk().await.map_err(classify)? {
			if body.len() + chunk.len() > self.max_response_bytes {
				return Err(FetchError::ResponseTooLarge {
					max: self.max_response_bytes,
				});
			}
			body.extend_from_slice(&chunk);
		}

		debug!(status = status.as_u16(), bytes = body.len(), "Fetch completed");
		Ok(FetchResponse {
			status: status.as_u16(),
			status_text: status.canonical_reason().unwrap_or("").to_string(),
			url,
			headers,
			body: String::from_utf8_lossy(&body).into_owned(),
		})
	}
}

fn classify(err: reqwest::Error) -> FetchError {
	if err.is_timeout() {
		FetchError::Timeout
	} else {
		FetchError::Transport(err.without_url().to_string())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn policy() -> NetworkPolicy {
		NetworkPolicy::new(["api.example.com", "*.trusted.io"], ["GET", "post"])
	}

	#[test]
	fn allowlisted_https_get_passes() {
		let url = policy().check("https://api.example.com/v1/price", "GET").unwrap();
		assert_eq!(url.path(), "/v1/price");
	}

	#[test]
	fn http_is_rejected_before_host() {
		assert_eq!(
			policy().check("http://evil.test/", "GET"),
			Err(PolicyViolation::InsecureScheme)
		);
		assert_eq!(
			policy().check("http://api.example.com/", "GET"),
			Err(PolicyViolation::InsecureScheme)
		);
	}

	#[test]
	fn unknown_host_is_rejected() {
		assert_eq!(
			policy().check("https://evil.test/", "GET"),
			Err(PolicyViolation::HostNotAllowed)
		);
		assert_eq!(
			policy().check("https://api.example.com.evil.test/", "GET"),
			Err(PolicyViolation::HostNotAllowed)
		);
	}

	#[test]
	fn wildcard_matches_subdomains_only() {
		assert!(policy().check("https://a.trusted.io/", "GET").is_ok());
		assert!(policy().check("https://deep.a.trusted.io/", "GET").is_ok());
		assert_eq!(
			policy().check("https://trusted.io/", "GET"),
			Err(PolicyViolation::HostNotAllowed)
		);
		assert_eq!(
			policy().check("https://nottrusted.io/", "GET"),
			Err(PolicyViolation::HostNotAllowed)
		);
	}

	#[test]
	fn host_match_ignores_case() {
		assert!(policy().check("https://API.Example.COM/", "GET").is_ok());
	}

	#[test]
	fn methods_are_case_insensitive_and_enforced() {
		assert!(policy().check("https://api.example.com/", "post").is_ok());
		assert_eq!(
			policy().check("https://api.example.com/", "DELETE"),
			Err(PolicyViolation::MethodNotAllowed)
		);
	}

	#[test]
	fn garbage_url_is_invalid() {
		assert_eq!(
			policy().check("not a url", "GET"),
			Err(PolicyViolation::InvalidUrl)
		);
	}

	#[test]
	fn deny_all_refuses_everything() {
		assert_eq!(
			NetworkPolicy::deny_all().check("https://api.example.com/", "GET"),
			Err(PolicyViolation::HostNotAllowed)
		);
	}

	#[test]
	fn violations_read_as_script_messages() {
		assert_eq!(PolicyViolation::InvalidUrl.to_string(), "Invalid URL");
		assert_eq!(
			PolicyViolation::InsecureScheme.to_string(),
			"Only HTTPS URLs are allowed"
		);
		assert_eq!(
			PolicyViolation::HostNotAllowed.to_string(),
			"Domain not in allowlist"
		);
		assert_eq!(
			PolicyViolation::MethodNotAllowed.to_string(),
			"Invalid HTTP method"
		);
	}
}
