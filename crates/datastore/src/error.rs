use std::time::Duration;

use uuid::Uuid;

use super::{EntityType, LifecycleStep};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
	#[error("store rejected write to {entity} <id='{id}'>: {reason}")]
	Rejected {
		entity: EntityType,
		id: Uuid,
		reason: String,
	},
	#[error("record not found: {entity} <id='{id}'>")]
	NotFound { entity: EntityType, id: Uuid },
	#[error("store unavailable: {0}")]
	Unavailable(String),
	#[error("notification receiver lagged, skipped {0} messages")]
	Lagged(u64),
	#[error("store {step} timed out after {timeout:?}")]
	TimedOut {
		step: LifecycleStep,
		timeout: Duration,
	},
}
