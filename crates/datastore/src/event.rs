use serde::{Deserialize, Serialize};

use super::{EntityType, OperationKind, Record};

/// A local and a remote write racing for the same record, as handed over by the runtime.
///
/// `model_name` is the runtime's raw name: it is not guaranteed to be one of our [`EntityType`]s.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictEvent {
	pub model_name: String,
	pub local: Option<Record>,
	pub remote: Option<Record>,
	pub operation: OperationKind,
	pub attempts: u32,
}

impl ConflictEvent {
	pub fn new(
		model_name: impl Into<String>,
		local: Option<Record>,
		remote: Option<Record>,
		operation: OperationKind,
	) -> Self {
		Self {
			model_name: model_name.into(),
			local,
			remote,
			operation,
			attempts: 1,
		}
	}

	#[must_use]
	pub const fn with_attempts(mut self, attempts: u32) -> Self {
		self.attempts = attempts;
		self
	}
}

/// Who originated a raw change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum OperationSource {
	Local,
	RemoteSync,
}

/// One item of the raw per-record change feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
	pub entity: EntityType,
	pub element: Record,
	pub operation: OperationKind,
}

impl ChangeEvent {
	/// A delete that already carries its tombstone was committed locally; anything else came in
	/// through sync.
	pub const fn source(&self) -> OperationSource {
		if self.element.deleted {
			OperationSource::Local
		} else {
			OperationSource::RemoteSync
		}
	}
}

/// One item of the reconciled snapshot feed: the full visible set plus the sync boundary flag.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Snapshot {
	pub items: Vec<Record>,
	pub is_synced: bool,
}
