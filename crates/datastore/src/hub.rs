//! Lifecycle events published by the replicated store
//!
//! The runtime reports its lifecycle (initial sync finished or failed, outbox drained, network
//! up/down) on a loosely typed "hub" channel. Event names differ between runtime versions, so
//! everything read from the hub goes through [`normalize_event_name`] before being compared.
//!
//! [`HubBus`] is the in-process side of that channel; the `wait_for_*` helpers are best effort and
//! never fail, callers get an outcome and decide what to do with it.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::{
	sync::broadcast,
	time::{timeout_at, Instant},
};
use tracing::{debug, warn};

pub const SYNC_QUERIES_READY: &str = "syncQueriesReady";
pub const SYNC_QUERIES_ERROR: &str = "syncQueriesError";
pub const OUTBOX_STATUS: &str = "outboxStatus";

pub const DEFAULT_INITIAL_SYNC_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_OUTBOX_TIMEOUT: Duration = Duration::from_secs(2);

/// Maps legacy and alternative event names onto a single spelling.
///
/// Some runtime versions emit `ready` instead of `syncQueriesReady`, and some failure paths emit
/// `syncQueriesFailed` instead of `syncQueriesError`.
pub fn normalize_event_name(name: &str) -> &str {
	match name {
		"ready" => SYNC_QUERIES_READY,
		"syncQueriesFailed" => SYNC_QUERIES_ERROR,
		other => other,
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubEvent {
	pub name: String,
	#[serde(default)]
	pub data: Value,
}

impl HubEvent {
	pub fn new(name: impl Into<String>, data: Value) -> Self {
		Self {
			name: name.into(),
			data,
		}
	}

	/// Parses a raw hub message of the form `{ "payload": { "event": "...", "data": ... } }`.
	///
	/// Returns `None` for anything that doesn't carry a non blank event name.
	pub fn parse(raw: &Value) -> Option<Self> {
		let payload = raw.get("payload")?.as_object()?;
		let name = payload.get("event")?.as_str()?;

		if name.trim().is_empty() {
			return None;
		}

		Some(Self::new(
			name,
			payload.get("data").cloned().unwrap_or(Value::Null),
		))
	}

	pub fn normalized_name(&self) -> &str {
		normalize_event_name(&self.name)
	}
}

/// Broadcast bus carrying [`HubEvent`]s to every interested listener.
#[derive(Debug, Clone)]
pub struct HubBus {
	sender: broadcast::Sender<HubEvent>,
}

impl HubBus {
	pub fn new() -> Self {
		Self::with_capacity(1024)
	}

	pub fn with_capacity(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	/// Returns how many listeners received the event.
	pub fn emit(&self, event: HubEvent) -> usize {
		let name = event.name.clone();

		self.sender.send(event).map_or_else(
			|_| {
				debug!(event = %name, "Hub event emitted but no listeners");
				0
			},
			|count| {
				debug!(event = %name, listeners = count, "Hub event emitted");
				count
			},
		)
	}

	/// Parses and emits a raw hub message, dropping anything unparseable.
	pub fn emit_raw(&self, raw: &Value) -> usize {
		HubEvent::parse(raw).map_or(0, |event| self.emit(event))
	}

	pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
		self.sender.subscribe()
	}

	pub fn subscriber_count(&self) -> usize {
		self.sender.receiver_count()
	}
}

impl Default for HubBus {
	fn default() -> Self {
		Self::new()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialSyncOutcome {
	Ready,
	Failed,
	Timeout,
}

#[derive(Debug, Clone)]
pub struct WaitForInitialSync {
	pub timeout: Duration,
	pub ready_events: Vec<String>,
	pub failure_events: Vec<String>,
}

impl Default for WaitForInitialSync {
	fn default() -> Self {
		Self {
			timeout: DEFAULT_INITIAL_SYNC_TIMEOUT,
			ready_events: vec!["ready".to_string(), SYNC_QUERIES_READY.to_string()],
			failure_events: vec![
				"syncQueriesFailed".to_string(),
				SYNC_QUERIES_ERROR.to_string(),
			],
		}
	}
}

/// Waits until the hub reports the initial sync as ready or failed, or until the timeout.
///
/// Returns the outcome together with the normalized name of the event that decided it.
pub async fn wait_for_initial_sync(
	mut rx: broadcast::Receiver<HubEvent>,
	options: &WaitForInitialSync,
) -> (InitialSyncOutcome, Option<String>) {
	let ready = options
		.ready_events
		.iter()
		.map(|name| normalize_event_name(name))
		.collect::<Vec<_>>();
	let failed = options
		.failure_events
		.iter()
		.map(|name| normalize_event_name(name))
		.collect::<Vec<_>>();

	let deadline = Instant::now() + options.timeout;

	loop {
		match timeout_at(deadline, rx.recv()).await {
			Ok(Ok(event)) => {
				let name = event.normalized_name();
				if ready.iter().any(|ready| *ready == name) {
					return (InitialSyncOutcome::Ready, Some(name.to_string()));
				}
				if failed.iter().any(|failed| *failed == name) {
					return (InitialSyncOutcome::Failed, Some(name.to_string()));
				}
			}
			Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
				warn!(%skipped, "Hub listener lagged while waiting for initial sync");
			}
			Ok(Err(broadcast::error::RecvError::Closed)) => {
				warn!("Hub closed while waiting for initial sync");
				return (InitialSyncOutcome::Timeout, None);
			}
			Err(_) => {
				debug!(timeout = ?options.timeout, "Timed out waiting for initial sync");
				return (InitialSyncOutcome::Timeout, None);
			}
		}
	}
}

/// Waits for an `outboxStatus` event reporting an empty outbox.
///
/// Stopping the runtime with pending outbox mutations is known to hang, so callers drain first.
/// Returns `false` on timeout.
pub async fn wait_for_outbox_empty(
	mut rx: broadcast::Receiver<HubEvent>,
	timeout: Duration,
) -> bool {
	let deadline = Instant::now() + timeout;

	loop {
		match timeout_at(deadline, rx.recv()).await {
			Ok(Ok(event)) => {
				if event.normalized_name() != OUTBOX_STATUS {
					continue;
				}

				let is_empty = event.data.get("isEmpty").and_then(Value::as_bool);
				debug!(?is_empty, "Observed outbox status");

				if is_empty == Some(true) {
					return true;
				}
			}
			Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
				warn!(%skipped, "Hub listener lagged while waiting for outbox");
			}
			Ok(Err(broadcast::error::RecvError::Closed)) | Err(_) => {
				warn!(?timeout, "Timed out waiting for outbox to drain");
				return false;
			}
		}
	}
}
