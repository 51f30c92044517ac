use std::{io, path::PathBuf};

use tq_datastore::EntityType;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
	#[error("circular dependency detected: {0}")]
	CircularDependency(String),
	#[error("unknown dependency: {0} references {1} which is not registered")]
	UnknownDependency(EntityType, EntityType),
	#[error("no entity types registered")]
	NoEntities,
	#[error("{entity} (rank {rank}) references {referenced} (rank {referenced_rank}) but doesn't rank below it")]
	RankViolation {
		entity: EntityType,
		rank: u8,
		referenced: EntityType,
		referenced_rank: u8,
	},
	#[error("{0} and {1} share rank {2}")]
	DuplicateRank(EntityType, EntityType, u8),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("failed to read config <path='{}'>: {source}", .path.display())]
	Io {
		path: PathBuf,
		#[source]
		source: io::Error,
	},
	#[error("failed to parse config: {0}")]
	Parse(#[from] serde_json::Error),
	#[error("invalid config: {0}")]
	Invalid(&'static str),
}
