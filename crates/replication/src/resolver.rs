//! Merge rules applied when the replication runtime detects that a write collides with the
//! server's copy. Everything here is pure: the runtime calls [`ConflictResolver::resolve`]
//! synchronously on its write path, so no I/O and no panics.

use tq_datastore::{ConflictEvent, ConflictHandler, EntityType, OperationKind, Record};

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, trace};

use crate::registry::{Completeness, EntityRegistry, MergePolicy};

pub const STATUS: &str = "status";
pub const START_TIME: &str = "startTime";
pub const EXPIRE_TIME: &str = "expireTime";
pub const END_TIME: &str = "endTime";
pub const ACTIVITY_ANSWER: &str = "activityAnswer";
pub const ACTIVITY_RESPONSE: &str = "activityResponse";

/// Fields only the server assigns authoritatively.
const SERVER_TIMING_FIELDS: [&str; 3] = [START_TIME, EXPIRE_TIME, END_TIME];
/// Fields the user produced on this device.
const LOCAL_WORK_FIELDS: [&str; 2] = [ACTIVITY_ANSWER, ACTIVITY_RESPONSE];

type MergeFn = fn(Completeness, Option<Record>, Option<Record>, OperationKind) -> Option<Record>;

impl MergePolicy {
	const fn merge_fn(self) -> MergeFn {
		match self {
			Self::StatusPreferring => merge_status_preferring,
			Self::CompletenessGuarded | Self::KeyRepairingGeneric => merge_delete_guarded,
			Self::DefaultRemote => merge_default,
		}
	}
}

#[derive(Debug, Clone, Default)]
pub struct ConflictResolver {
	registry: Arc<EntityRegistry>,
}

impl ConflictResolver {
	#[must_use]
	pub const fn new(registry: Arc<EntityRegistry>) -> Self {
		Self { registry }
	}

	/// Picks the record the runtime should persist. `None` only when both sides are absent.
	#[must_use]
	pub fn resolve(&self, event: ConflictEvent) -> Option<Record> {
		let ConflictEvent {
			model_name,
			local,
			remote,
			operation,
			attempts,
		} = event;

		// Unregistered models merge remote-wins, which never looks at completeness.
		let (policy, completeness) = model_name
			.parse::<EntityType>()
			.ok()
			.and_then(|entity| self.registry.descriptor(entity))
			.map_or(
				(MergePolicy::DefaultRemote, Completeness::CompositeKey),
				|descriptor| (descriptor.policy, descriptor.completeness),
			);

		debug!(
			model = %model_name,
			%operation,
			attempts,
			policy = policy.as_ref(),
			"Resolving conflict",
		);

		(policy.merge_fn())(completeness, local, remote, operation)
	}

	/// Wraps the resolver into the callback shape the store runtime accepts.
	#[must_use]
	pub fn into_handler(self: Arc<Self>) -> ConflictHandler {
		Arc::new(move |event| self.resolve(event))
	}
}

fn merge_status_preferring(
	completeness: Completeness,
	local: Option<Record>,
	remote: Option<Record>,
	operation: OperationKind,
) -> Option<Record> {
	match operation {
		OperationKind::Update => merge_task_update(local, remote),
		OperationKind::Delete => resolve_delete(completeness, local, remote),
		OperationKind::Insert => keep_remote(local, remote),
	}
}

fn merge_delete_guarded(
	completeness: Completeness,
	local: Option<Record>,
	remote: Option<Record>,
	operation: OperationKind,
) -> Option<Record> {
	match operation {
		OperationKind::Delete => resolve_delete(completeness, local, remote),
		OperationKind::Insert | OperationKind::Update => keep_remote(local, remote),
	}
}

fn merge_default(
	_: Completeness,
	local: Option<Record>,
	remote: Option<Record>,
	_: OperationKind,
) -> Option<Record> {
	keep_remote(local, remote)
}

/// Remote wins, with whatever key halves it lacks taken from local.
fn keep_remote(local: Option<Record>, remote: Option<Record>) -> Option<Record> {
	match remote {
		Some(remote) => Some(remote.with_key_from(local.as_ref())),
		None => local,
	}
}

/// `primary`'s value when it carries one, otherwise `secondary`'s value as is.
fn prefer(primary: Option<&Record>, secondary: Option<&Record>, field: &str) -> Option<Value> {
	primary
		.and_then(|record| record.present_field(field))
		.or_else(|| secondary.and_then(|record| record.field(field)))
		.cloned()
}

fn merge_task_update(local: Option<Record>, remote: Option<Record>) -> Option<Record> {
	let mut merged = match (&remote, &local) {
		(Some(remote), _) => remote.clone(),
		(None, Some(local)) => Record::new(local.id),
		(None, None) => return None,
	};

	let (local, remote) = (local.as_ref(), remote.as_ref());

	merged.set_field(STATUS, prefer(local, remote, STATUS));
	for field in SERVER_TIMING_FIELDS {
		merged.set_field(field, prefer(remote, local, field));
	}
	for field in LOCAL_WORK_FIELDS {
		merged.set_field(field, prefer(local, remote, field));
	}

	Some(merged.with_key_from(local))
}

/// Shared delete rule, first match wins:
/// a remote tombstone is kept, an incomplete local copy never fabricates data, otherwise the
/// local copy (usually a tombstone itself) goes through.
fn resolve_delete(
	completeness: Completeness,
	local: Option<Record>,
	remote: Option<Record>,
) -> Option<Record> {
	if let Some(remote) = remote.as_ref().filter(|remote| remote.deleted) {
		trace!(id = %remote.id, "Remote already tombstoned");
		return Some(remote.clone().with_key_from(local.as_ref()));
	}

	if completeness.is_incomplete(local.as_ref()) {
		return match remote {
			Some(remote) => {
				trace!(id = %remote.id, "Local copy incomplete, tombstoning remote");
				Some(remote.tombstoned().with_key_from(local.as_ref()))
			}
			None => local,
		};
	}

	local.map(|local| local.with_key_from(remote.as_ref()))
}
