//! Best effort restart of the store runtime, for dev tooling and recovery flows.
//!
//! Stopping the runtime with mutations still in the outbox is known to hang, so the reset first
//! gives the outbox a chance to drain and then runs every lifecycle step under its own timeout.
//! Whether a timed out step aborts the reset or is shrugged off is decided per step.

use std::{future::Future, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::{sync::broadcast, time::timeout};
use tracing::{error, info, warn};

use super::{
	hub::{wait_for_outbox_empty, DEFAULT_OUTBOX_TIMEOUT},
	HubEvent, StoreError, StoreLifecycle,
};

pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LifecycleStep {
	Stop,
	Clear,
	Start,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ResetMode {
	#[default]
	Restart,
	/// Stop, drop every local record, start again.
	ClearAndRestart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
	Ok,
	Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepTimeout {
	pub timeout: Duration,
	/// Carry on with the next step when this one times out, instead of failing the reset.
	pub proceed: bool,
}

impl StepTimeout {
	#[must_use]
	pub const fn new(timeout: Duration, proceed: bool) -> Self {
		Self { timeout, proceed }
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetOptions {
	pub mode: ResetMode,
	/// How long to wait for the outbox to drain before stopping. `None` doesn't wait at all.
	pub outbox_timeout: Option<Duration>,
	pub stop: StepTimeout,
	pub clear: StepTimeout,
	pub start: StepTimeout,
}

impl Default for ResetOptions {
	fn default() -> Self {
		Self {
			mode: ResetMode::default(),
			outbox_timeout: Some(DEFAULT_OUTBOX_TIMEOUT),
			stop: StepTimeout::new(DEFAULT_STEP_TIMEOUT, true),
			clear: StepTimeout::new(DEFAULT_STEP_TIMEOUT, false),
			start: StepTimeout::new(DEFAULT_STEP_TIMEOUT, false),
		}
	}
}

impl ResetOptions {
	#[must_use]
	pub fn with_mode(mode: ResetMode) -> Self {
		Self {
			mode,
			..Default::default()
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetReport {
	pub outbox_empty_observed: bool,
	pub stop: StepOutcome,
	/// `None` when the mode doesn't clear.
	pub clear: Option<StepOutcome>,
	pub start: StepOutcome,
}

/// Stops the store, optionally clears it, and starts it again.
///
/// `hub` must be subscribed before anything that could drain the outbox, an `outboxStatus`
/// published before the subscription is never seen. Fails with [`StoreError::TimedOut`] when a
/// step that may not proceed times out, or with whatever error a step returned.
pub async fn reset_store<S: StoreLifecycle + ?Sized>(
	store: &S,
	hub: broadcast::Receiver<HubEvent>,
	options: &ResetOptions,
) -> Result<ResetReport, StoreError> {
	let outbox_empty_observed = match options.outbox_timeout {
		Some(outbox_timeout) => wait_for_outbox_empty(hub, outbox_timeout).await,
		None => false,
	};

	info!(mode = %options.mode, outbox_empty_observed, "Resetting store");

	let stop = run_step(LifecycleStep::Stop, store.stop(), options.stop).await?;

	let clear = match options.mode {
		ResetMode::ClearAndRestart => {
			Some(run_step(LifecycleStep::Clear, store.clear(), options.clear).await?)
		}
		ResetMode::Restart => None,
	};

	let start = run_step(LifecycleStep::Start, store.start(), options.start).await?;

	let report = ResetReport {
		outbox_empty_observed,
		stop,
		clear,
		start,
	};

	info!(mode = %options.mode, ?report, "Store reset finished");

	Ok(report)
}

async fn run_step(
	step: LifecycleStep,
	action: impl Future<Output = Result<(), StoreError>> + Send,
	StepTimeout {
		timeout: step_timeout,
		proceed,
	}: StepTimeout,
) -> Result<StepOutcome, StoreError> {
	match timeout(step_timeout, action).await {
		Ok(res) => res.map(|()| StepOutcome::Ok),
		Err(_) if proceed => {
			warn!(%step, timeout = ?step_timeout, "Lifecycle step timed out, proceeding");
			Ok(StepOutcome::Timeout)
		}
		Err(_) => {
			error!(%step, timeout = ?step_timeout, "Lifecycle step timed out;");
			Err(StoreError::TimedOut {
				step,
				timeout: step_timeout,
			})
		}
	}
}
