// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! `warden` - run a script through the sandbox from the command line.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use warden_common_config::load_secret_env;
use warden_common_core::{Function, TenantId};
use warden_common_secret::SecretString;
use warden_server_functions::{ExecutionCoordinator, InMemoryExecutionRepository};
use warden_server_sandbox::{SandboxConfig, SandboxEngine};
use warden_server_secrets::config::MASTER_KEY_VAR;
use warden_server_secrets::encryption::generate_key;
use warden_server_secrets::{InMemorySecretStore, SecretsConfig, SecretsService, SoftwareKeyBackend};

/// Warden - sandboxed script execution harness.
#[derive(Parser, Debug)]
#[command(name = "warden", about = "Run tenant scripts in the warden sandbox", version)]
struct Args {
	/// Log output format
	#[arg(long, value_enum, default_value_t = LogFormat::Compact, global = true)]
	log_format: LogFormat,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Execute a script file and print its execution result as JSON
	Run(RunArgs),
	/// Print a fresh base64 root key for WARDEN_SECRETS_MASTER_KEY
	Keygen,
}

#[derive(clap::Args, Debug)]
struct RunArgs {
	/// Script file to execute
	script: PathBuf,

	/// JSON params passed to `main`
	#[arg(long, default_value = "{}")]
	params: String,

	/// Tenant the function belongs to and runs as
	#[arg(long, default_value_t = 1)]
	tenant: i64,

	/// Secret to store and declare, as NAME=VALUE (repeatable)
	#[arg(long = "secret", value_parser = parse_secret)]
	secrets: Vec<(String, String)>,

	/// Name the function declares without storing a value (repeatable)
	#[arg(long = "declare")]
	declared: Vec<String>,

	/// Wall-clock budget in seconds
	#[arg(long)]
	timeout_secs: Option<u32>,

	/// Heap ceiling in MiB
	#[arg(long)]
	memory_mb: Option<u32>,

	/// Host `fetch` may reach; overrides WARDEN_SANDBOX_ALLOWED_HOSTS (repeatable)
	#[arg(long = "allow-host")]
	allowed_hosts: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
	Compact,
	Json,
}

fn parse_secret(raw: &str) -> Result<(String, String), String> {
	match raw.split_once('=') {
		Some((name, value)) if !name.trim().is_empty() => Ok((name.trim().to_string(), value.to_string())),
		_ => Err(format!("expected NAME=VALUE, got `{raw}`")),
	}
}

fn init_tracing(format: LogFormat) {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warden=info"));
	let registry = tracing_subscriber::registry().with(filter);
	match format {
		LogFormat::Compact => registry
			.with(tracing_subscriber::fmt::layer().compact().with_writer(std::io::stderr))
			.init(),
		LogFormat::Json => registry
			.with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
			.init(),
	}
}

type Service = SecretsService<SoftwareKeyBackend, InMemorySecretStore>;

fn secrets_service() -> Result<Service> {
	let configured = load_secret_env(MASTER_KEY_VAR).context("failed to read root key")?;
	if configured.is_some() {
		let config = SecretsConfig::from_env().context("invalid secret store configuration")?;
		return SecretsService::in_memory(&config).context("failed to open secret store");
	}

	debug!("No root key configured, using an ephemeral one");
	let defaults = SecretsConfig::new(
		SecretString::new(STANDARD.encode(*generate_key())),
		None,
		None,
	)
	.context("failed to build ephemeral secret store configuration")?;
	SecretsService::in_memory(&defaults).context("failed to open secret store")
}

async fn run(args: RunArgs) -> Result<ExitCode> {
	let source = std::fs::read_to_string(&args.script)
		.with_context(|| format!("failed to read script {}", args.script.display()))?;
	let params: serde_json::Value =
		serde_json::from_str(&args.params).context("--params must be valid JSON")?;
	let tenant = TenantId::new(args.tenant);

	let mut sandbox = SandboxConfig::from_env().context("invalid sandbox configuration")?;
	if !args.allowed_hosts.is_empty() {
		sandbox.allowed_hosts = args.allowed_hosts.clone();
	}
	let engine = SandboxEngine::new(sandbox).context("failed to start sandbox")?;

	let service = Arc::new(secrets_service()?);
	for (name, value) in &args.secrets {
		service
			.set_secret(tenant, name, &SecretString::from(value.as_str()))
			.await
			.with_context(|| format!("failed to store secret {name}"))?;
	}

	let name = args
		.script
		.file_stem()
		.map(|s| s.to_string_lossy().into_owned())
		.unwrap_or_else(|| "script".to_string());
	let mut function = Function::new(tenant, name, source).with_secrets(
		args.secrets
			.iter()
			.map(|(name, _)| name.clone())
			.chain(args.declared.iter().cloned()),
	);
	if let Some(secs) = args.timeout_secs {
		function = function.with_timeout_seconds(secs);
	}
	if let Some(mb) = args.memory_mb {
		function = function.with_memory_limit_mb(mb);
	}

	let coordinator =
		ExecutionCoordinator::new(engine, service, Arc::new(InMemoryExecutionRepository::new()));
	let result = coordinator
		.execute(tenant, &function, &params)
		.await
		.context("execution failed")?;

	info!(
		execution_id = %result.execution_id,
		status = %result.status,
		duration_ms = result.duration_ms,
		"Script finished"
	);
	println!("{}", serde_json::to_string_pretty(&result)?);

	Ok(if result.is_success() {
		ExitCode::SUCCESS
	} else {
		ExitCode::FAILURE
	})
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
	let args = Args::parse();
	init_tracing(args.log_format);

	match args.command {
		Command::Run(run_args) => {
			if run_args.tenant <= 0 {
				bail!("--tenant must be a positive integer");
			}
			run(run_args).await
		}
		Command::Keygen => {
			println!("{}", STANDARD.encode(*generate_key()));
			Ok(ExitCode::SUCCESS)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use clap::CommandFactory;
	use proptest::prelude::*;

	#[test]
	fn cli_definition_is_consistent() {
		Args::command().debug_assert();
	}

	#[test]
	fn run_accepts_repeated_secrets() {
		let args = Args::try_parse_from([
			"warden",
			"run",
			"price.js",
			"--secret",
			"API_KEY=abc=def",
			"--secret",
			"OTHER=",
			"--allow-host",
			"api.example.com",
		])
		.unwrap();

		let Command::Run(run) = args.command else {
			panic!("expected run");
		};
		assert_eq!(
			run.secrets,
			vec![
				("API_KEY".to_string(), "abc=def".to_string()),
				("OTHER".to_string(), String::new()),
			]
		);
		assert_eq!(run.allowed_hosts, vec!["api.example.com"]);
		assert_eq!(run.tenant, 1);
		assert_eq!(args.log_format, LogFormat::Compact);
	}

	#[test]
	fn secret_without_separator_is_rejected() {
		assert!(parse_secret("API_KEY").is_err());
		assert!(parse_secret("=value").is_err());
	}

	proptest! {
		#[test]
		fn secret_value_is_everything_after_first_equals(
			name in "[A-Z_]{1,16}",
			value in "[ -~]{0,32}",
		) {
			let (n, v) = parse_secret(&format!("{name}={value}")).unwrap();
			prop_assert_eq!(n, name);
			prop_assert_eq!(v, value);
		}
	}
}
