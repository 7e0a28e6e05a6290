// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! One script environment, built and torn down on a single worker thread.
//!
//! A fresh QuickJS runtime and context are created for every call and freed
//! before [`run`] returns, so nothing a script does (globals, prototype
//! changes, pending promises) can be observed by another call. The runtime's
//! interrupt hook enforces the deadline and a counting allocator enforces the
//! heap ceiling.
//!
//! Hitting the ceiling is final: the allocator remembers it, the interrupt
//! hook then stops the script, and the call fails with a memory error even if
//! the script caught the engine's `out of memory` exception.

use std::cell::RefCell;
use std::ptr;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rquickjs::allocator::{Allocator, RustAllocator};
use rquickjs::{Context, Ctx, Function, Object, Runtime, Value};
use tracing::debug;

use warden_common_core::ExecutionErrorKind;

use crate::error::{SandboxError, SandboxResult};
use crate::facades::{FetchBridge, LogSink};

const PRELUDE: &str = include_str!("prelude.js");

const MAX_STACK_BYTES: usize = 512 * 1024;

const OUT_OF_MEMORY: &str = "out of memory";

/// Everything a worker needs to run one script. Built on the engine side and
/// moved onto the worker thread.
pub(crate) struct IsolateJob {
	pub source: String,
	pub params_json: String,
	pub secrets_json: String,
	pub context_json: String,
	pub memory_limit: usize,
	pub timeout: Duration,
	pub deadline: Instant,
	/// Set by the supervisor when it gives up on this worker.
	pub cancel: Arc<AtomicBool>,
	pub fetch: FetchBridge,
	pub max_log_lines: usize,
	pub max_log_line_bytes: usize,
	pub max_result_bytes: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Outcome {
	Success(serde_json::Value),
	Failure {
		kind: ExecutionErrorKind,
		message: String,
	},
}

impl Outcome {
	pub(crate) fn failure(kind: ExecutionErrorKind, message: impl Into<String>) -> Self {
		Outcome::Failure {
			kind,
			message: message.into(),
		}
	}

	pub(crate) fn memory_limit(limit: usize) -> Self {
		Outcome::failure(
			ExecutionErrorKind::MemoryLimit,
			format!("memory limit exceeded: heap ceiling of {limit} bytes reached"),
		)
	}

	pub(crate) fn timeout(timeout: Duration) -> Self {
		Outcome::failure(
			ExecutionErrorKind::Timeout,
			format!("execution timeout: script exceeded {}ms", timeout.as_millis()),
		)
	}
}

#[derive(Debug)]
pub(crate) struct IsolateReport {
	pub outcome: Outcome,
	pub logs: Vec<String>,
}

/// Allocator for one runtime. Tracks the bytes the runtime holds and refuses
/// any allocation that would take them past `limit`.
struct HeapCeiling {
	limit: usize,
	used: usize,
	exhausted: Arc<AtomicBool>,
}

impl HeapCeiling {
	fn new(limit: usize, exhausted: Arc<AtomicBool>) -> Self {
		Self {
			limit,
			used: 0,
			exhausted,
		}
	}

	fn admit(&mut self, extra: usize) -> bool {
		if self.used.saturating_add(extra) > self.limit {
			self.exhausted.store(true, Ordering::Relaxed);
			return false;
		}
		true
	}

	fn record(&mut self, block: *mut u8) -> *mut u8 {
		if !block.is_null() {
			self.used = self.used.saturating_add(unsafe { RustAllocator::usable_size(block) });
		}
		block
	}
}

unsafe impl Allocator for HeapCeiling {
	fn alloc(&mut self, size: usize) -> *mut u8 {
		if !self.admit(size) {
			return ptr::null_mut();
		}
		let block = RustAllocator.alloc(size);
		self.record(block)
	}

	fn calloc(&mut self, count: usize, size: usize) -> *mut u8 {
		let Some(total) = count.checked_mul(size) else {
			return ptr::null_mut();
		};
		if total == 0 || !self.admit(total) {
			return ptr::null_mut();
		}
		let block = RustAllocator.calloc(count, size);
		self.record(block)
	}

	unsafe fn dealloc(&mut self, block: *mut u8) {
		unsafe {
			self.used = self.used.saturating_sub(RustAllocator::usable_size(block));
			RustAllocator.dealloc(block);
		}
	}

	unsafe fn realloc(&mut self, block: *mut u8, new_size: usize) -> *mut u8 {
		let old_size = unsafe { RustAllocator::usable_size(block) };
		if new_size > old_size && !self.admit(new_size - old_size) {
			return ptr::null_mut();
		}
		let moved = unsafe { RustAllocator.realloc(block, new_size) };
		if !moved.is_null() {
			self.used = self.used.saturating_sub(old_size);
		}
		self.record(moved)
	}

	unsafe fn usable_size(block: *mut u8) -> usize {
		unsafe { RustAllocator::usable_size(block) }
	}
}

/// Host state shared by the functions installed into the context.
struct HostState {
	logs: RefCell<LogSink>,
	fetch: RefCell<FetchBridge>,
	settlement: RefCell<Option<(bool, String)>>,
}

/// Run one script to completion, deadline or failure. Blocks the calling
/// thread; call it from a blocking worker.
pub(crate) fn run(job: IsolateJob) -> SandboxResult<IsolateReport> {
	let exhausted = Arc::new(AtomicBool::new(false));
	let runtime = Runtime::new_with_alloc(HeapCeiling::new(job.memory_limit, Arc::clone(&exhausted)))
		.map_err(|e| SandboxError::HostFault(format!("failed to create script runtime: {e}")))?;
	runtime.set_max_stack_size(MAX_STACK_BYTES);

	let interrupted = Arc::new(AtomicBool::new(false));
	{
		let deadline = job.deadline;
		let cancel = Arc::clone(&job.cancel);
		let exhausted = Arc::clone(&exhausted);
		let interrupted = Arc::clone(&interrupted);
		runtime.set_interrupt_handler(Some(Box::new(move || {
			if exhausted.load(Ordering::Relaxed) {
				return true;
			}
			if cancel.load(Ordering::Relaxed) || Instant::now() >= deadline {
				interrupted.store(true, Ordering::Relaxed);
				return true;
			}
			false
		})));
	}

	let IsolateJob {
		source,
		params_json,
		secrets_json,
		context_json,
		memory_limit,
		timeout,
		deadline,
		cancel,
		fetch,
		max_log_lines,
		max_log_line_bytes,
		max_result_bytes,
		..
	} = job;

	let state = Rc::new(HostState {
		logs: RefCell::new(LogSink::new(max_log_lines, max_log_line_bytes)),
		fetch: RefCell::new(fetch),
		settlement: RefCell::new(None),
	});

	let context = Context::full(&runtime).map_err(|e| engine_failure(&e));
	let started = match &context {
		Ok(context) => context.with(|ctx| {
			start(
				&ctx,
				&state,
				&source,
				params_json,
				secrets_json,
				context_json,
			)
		}),
		Err(message) => Err(message.clone()),
	};

	let mut job_error = None;
	if started.is_ok() {
		loop {
			if state.settlement.borrow().is_some() || exhausted.load(Ordering::Relaxed) {
				break;
			}
			if cancel.load(Ordering::Relaxed) || Instant::now() >= deadline {
				interrupted.store(true, Ordering::Relaxed);
				break;
			}
			if !runtime.is_job_pending() {
				break;
			}
			if runtime.execute_pending_job().is_err() {
				if interrupted.load(Ordering::Relaxed) {
					break;
				}
				job_error = Some("uncaught exception in pending job".to_string());
			}
		}
	}

	let settlement = state.settlement.borrow_mut().take();
	let violations = state.fetch.borrow().violations().to_vec();

	let outcome = match settlement {
		_ if exhausted.load(Ordering::Relaxed) => Outcome::memory_limit(memory_limit),
		Some((true, payload)) => parse_result(&payload, max_result_bytes),
		Some((false, message)) => classify(message, &violations),
		None if interrupted.load(Ordering::Relaxed) => Outcome::timeout(timeout),
		None => match started {
			Err(message) => classify(message, &violations),
			Ok(()) => match job_error {
				Some(message) => classify(message, &violations),
				None => Outcome::failure(ExecutionErrorKind::Runtime, "script promise never settled"),
			},
		},
	};

	drop(context);
	drop(runtime);
	debug!(interrupted = interrupted.load(Ordering::Relaxed), "Isolate torn down");

	let logs = match Rc::try_unwrap(state) {
		Ok(state) => state.logs.into_inner().finish(),
		Err(shared) => shared.logs.replace(LogSink::new(0, 1)).finish(),
	};

	Ok(IsolateReport { outcome, logs })
}

/// Install host functions, evaluate the prelude and tenant source, and call
/// the entry point. Returns the description of an uncaught exception.
fn start<'js>(
	ctx: &Ctx<'js>,
	state: &Rc<HostState>,
	source: &str,
	params_json: String,
	secrets_json: String,
	context_json: String,
) -> Result<(), String> {
	let host_log = {
		let state = Rc::clone(state);
		Function::new(ctx.clone(), move |level: String, message: String| {
			state.logs.borrow_mut().push(&level, &message);
		})
		.map_err(|e| caught(ctx, e))?
	};

	let host_fetch = {
		let state = Rc::clone(state);
		Function::new(ctx.clone(), move |url: String, init: String| -> String {
			state.fetch.borrow_mut().call(&url, &init)
		})
		.map_err(|e| caught(ctx, e))?
	};

	let host_settle = {
		let state = Rc::clone(state);
		Function::new(ctx.clone(), move |ok: bool, payload: String| {
			let mut settlement = state.settlement.borrow_mut();
			if settlement.is_none() {
				*settlement = Some((ok, payload));
			}
		})
		.map_err(|e| caught(ctx, e))?
	};

	let prelude: Function = ctx.eval(PRELUDE).map_err(|e| caught(ctx, e))?;
	let api: Object = prelude
		.call((host_log, host_fetch, host_settle, secrets_json, context_json))
		.map_err(|e| caught(ctx, e))?;
	let entry_point: Function = api.get("run").map_err(|e| caught(ctx, e))?;

	// Same line as the first line of tenant code, so reported line numbers match.
	let completion: Value = ctx
		.eval(format!("\"use strict\";{source}"))
		.map_err(|e| caught(ctx, e))?;
	let main: Value = ctx
		.eval("typeof main === \"function\" ? main : undefined")
		.map_err(|e| caught(ctx, e))?;

	entry_point
		.call::<_, ()>((params_json, main, completion))
		.map_err(|e| caught(ctx, e))
}

fn caught(ctx: &Ctx<'_>, err: rquickjs::Error) -> String {
	match err {
		rquickjs::Error::Exception => describe_value(&ctx.catch()),
		other => engine_failure(&other),
	}
}

fn engine_failure(err: &rquickjs::Error) -> String {
	match err {
		rquickjs::Error::Allocation => format!("InternalError: {OUT_OF_MEMORY}"),
		other => format!("InternalError: {other}"),
	}
}

fn describe_value(value: &Value<'_>) -> String {
	if let Some(exception) = value.as_exception() {
		let name = exception
			.get::<_, String>("name")
			.unwrap_or_else(|_| "Error".to_string());
		let message = exception.message().unwrap_or_default();
		return format!("{name}: {message}");
	}
	if let Some(text) = value.as_string() {
		if let Ok(text) = text.to_string() {
			return text;
		}
	}
	format!("uncaught exception ({:?})", value.type_of())
}

fn classify(message: String, violations: &[String]) -> Outcome {
	let kind = if message.contains(OUT_OF_MEMORY) {
		ExecutionErrorKind::MemoryLimit
	} else if violations.iter().any(|v| message.ends_with(v.as_str())) {
		ExecutionErrorKind::PolicyViolation
	} else {
		ExecutionErrorKind::Runtime
	};

	let message = if kind == ExecutionErrorKind::MemoryLimit {
		format!("memory limit exceeded: {message}")
	} else {
		message
	};
	Outcome::Failure { kind, message }
}

fn parse_result(payload: &str, max_bytes: usize) -> Outcome {
	if payload.len() > max_bytes {
		return Outcome::failure(
			ExecutionErrorKind::Runtime,
			format!("result exceeds {max_bytes} bytes"),
		);
	}
	match serde_json::from_str(payload) {
		Ok(value) => Outcome::Success(value),
		Err(_) => Outcome::failure(ExecutionErrorKind::Runtime, "result is not serializable"),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn out_of_memory_is_a_memory_failure() {
		let outcome = classify("InternalError: out of memory".to_string(), &[]);
		assert!(matches!(
			outcome,
			Outcome::Failure { kind: ExecutionErrorKind::MemoryLimit, ref message } if message.starts_with("memory limit exceeded")
		));
	}

	#[test]
	fn heap_ceiling_refuses_growth_past_the_limit() {
		let exhausted = Arc::new(AtomicBool::new(false));
		let mut heap = HeapCeiling::new(256, Arc::clone(&exhausted));

		let block = heap.alloc(128);
		assert!(!block.is_null());
		assert!(!exhausted.load(Ordering::Relaxed));

		assert!(heap.alloc(512).is_null());
		assert!(exhausted.load(Ordering::Relaxed));

		unsafe { heap.dealloc(block) };
		assert_eq!(heap.used, 0);
	}

	#[test]
	fn heap_ceiling_counts_reallocation() {
		let exhausted = Arc::new(AtomicBool::new(false));
		let mut heap = HeapCeiling::new(1024, Arc::clone(&exhausted));

		let block = heap.alloc(64);
		let grown = unsafe { heap.realloc(block, 512) };
		assert!(!grown.is_null());
		assert!(heap.used >= 512);
		assert!(unsafe { heap.realloc(grown, 4096) }.is_null());
		assert!(exhausted.load(Ordering::Relaxed));

		unsafe { heap.dealloc(grown) };
		assert_eq!(heap.used, 0);
	}

	#[test]
	fn uncaught_policy_rejection_is_a_violation() {
		let violations = vec!["Domain not in allowlist".to_string()];
		assert!(matches!(
			classify("Error: Domain not in allowlist".to_string(), &violations),
			Outcome::Failure {
				kind: ExecutionErrorKind::PolicyViolation,
				..
			}
		));
		assert!(matches!(
			classify("Error: Domain not in allowlist".to_string(), &[]),
			Outcome::Failure {
				kind: ExecutionErrorKind::Runtime,
				..
			}
		));
	}

	#[test]
	fn oversized_result_is_rejected() {
		assert!(matches!(
			parse_result("\"0123456789\"", 4),
			Outcome::Failure {
				kind: ExecutionErrorKind::Runtime,
				..
			}
		));
		assert_eq!(
			parse_result("{\"a\":1}", 100),
			Outcome::Success(serde_json::json!({"a": 1}))
		);
	}

	#[test]
	fn timeout_message_names_the_budget() {
		let Outcome::Failure { kind, message } = Outcome::timeout(Duration::from_millis(1500)) else {
			panic!("timeout must be a failure");
		};
		assert_eq!(kind, ExecutionErrorKind::Timeout);
		assert_eq!(message, "execution timeout: script exceeded 1500ms");
	}
}
