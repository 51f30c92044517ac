use tq_datastore::{
	hub::WaitForInitialSync,
	reset::StepTimeout,
	EntityType, ResetMode, ResetOptions,
};

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;

use crate::ConfigError;

/// Tunables of the replication layer. Every field has a default, so a partial (or empty) JSON
/// document is valid.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
	pub cleanup: CleanupConfig,
	pub hub: HubConfig,
	pub reset: ResetConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
	/// Records deleted concurrently per batch.
	pub batch_size: usize,
	/// Pause between two batches of the same family.
	pub batch_pause_ms: u64,
	/// Pause after a family has been fully processed.
	pub tier_pause_ms: u64,
	/// Passes made over the families in `retry_entities`.
	pub retry_attempts: u32,
	/// Settle time before the final verification query.
	pub verification_pause_ms: u64,
	pub retry_entities: Vec<EntityType>,
	pub verified_entities: Vec<EntityType>,
}

impl Default for CleanupConfig {
	fn default() -> Self {
		Self {
			batch_size: 10,
			batch_pause_ms: 100,
			tier_pause_ms: 1000,
			retry_attempts: 3,
			verification_pause_ms: 2000,
			retry_entities: vec![EntityType::TaskAnswer],
			verified_entities: vec![
				EntityType::TaskAnswer,
				EntityType::TaskResult,
				EntityType::TaskHistory,
				EntityType::Task,
			],
		}
	}
}

impl CleanupConfig {
	pub const fn batch_pause(&self) -> Duration {
		Duration::from_millis(self.batch_pause_ms)
	}

	pub const fn tier_pause(&self) -> Duration {
		Duration::from_millis(self.tier_pause_ms)
	}

	pub const fn verification_pause(&self) -> Duration {
		Duration::from_millis(self.verification_pause_ms)
	}

	pub fn retries(&self, entity: EntityType) -> bool {
		self.retry_entities.contains(&entity)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
	pub initial_sync_timeout_ms: u64,
	pub outbox_timeout_ms: u64,
}

impl Default for HubConfig {
	fn default() -> Self {
		Self {
			initial_sync_timeout_ms: 15_000,
			outbox_timeout_ms: 2_000,
		}
	}
}

impl HubConfig {
	pub const fn initial_sync_timeout(&self) -> Duration {
		Duration::from_millis(self.initial_sync_timeout_ms)
	}

	pub const fn outbox_timeout(&self) -> Duration {
		Duration::from_millis(self.outbox_timeout_ms)
	}

	/// Wait options for [`tq_datastore::hub::wait_for_initial_sync`] with the configured timeout.
	pub fn initial_sync(&self) -> WaitForInitialSync {
		WaitForInitialSync {
			timeout: self.initial_sync_timeout(),
			..Default::default()
		}
	}
}

/// Timeouts of the store reset. The outbox wait uses [`HubConfig::outbox_timeout_ms`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResetConfig {
	pub wait_for_outbox: bool,
	pub stop_timeout_ms: u64,
	pub clear_timeout_ms: u64,
	pub start_timeout_ms: u64,
	pub proceed_on_stop_timeout: bool,
	pub proceed_on_clear_timeout: bool,
	pub proceed_on_start_timeout: bool,
}

impl Default for ResetConfig {
	fn default() -> Self {
		Self {
			wait_for_outbox: true,
			stop_timeout_ms: 5_000,
			clear_timeout_ms: 5_000,
			start_timeout_ms: 5_000,
			proceed_on_stop_timeout: true,
			proceed_on_clear_timeout: false,
			proceed_on_start_timeout: false,
		}
	}
}

impl ReplicationConfig {
	/// Options for [`tq_datastore::reset_store`] in `mode`.
	pub fn reset_options(&self, mode: ResetMode) -> ResetOptions {
		let reset = &self.reset;

		ResetOptions {
			mode,
			outbox_timeout: reset.wait_for_outbox.then(|| self.hub.outbox_timeout()),
			stop: StepTimeout::new(
				Duration::from_millis(reset.stop_timeout_ms),
				reset.proceed_on_stop_timeout,
			),
			clear: StepTimeout::new(
				Duration::from_millis(reset.clear_timeout_ms),
				reset.proceed_on_clear_timeout,
			),
			start: StepTimeout::new(
				Duration::from_millis(reset.start_timeout_ms),
				reset.proceed_on_start_timeout,
			),
		}
	}

	pub fn from_json(json: &str) -> Result<Self, ConfigError> {
		let config = serde_json::from_str::<Self>(json)?;
		config.validate()?;
		Ok(config)
	}

	/// Reads the config at `path`, falling back to defaults when the file doesn't exist.
	pub async fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();

		match fs::read_to_string(path).await {
			Ok(json) => {
				debug!(path = %path.display(), "Loading replication config");
				Self::from_json(&json)
			}
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				debug!(path = %path.display(), "No replication config found, using defaults");
				Ok(Self::default())
			}
			Err(source) => Err(ConfigError::Io {
				path: path.to_path_buf(),
				source,
			}),
		}
	}

	/// Writes the config to `path` as pretty printed JSON.
	pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
		let path = path.as_ref();
		let json = serde_json::to_string_pretty(self)?;

		fs::write(path, json)
			.await
			.map_err(|source| ConfigError::Io {
				path: path.to_path_buf(),
				source,
			})
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.cleanup.batch_size == 0 {
			return Err(ConfigError::Invalid("cleanup.batch_size must be at least 1"));
		}

		if self.cleanup.retry_attempts == 0 {
			return Err(ConfigError::Invalid(
				"cleanup.retry_attempts must be at least 1",
			));
		}

		Ok(())
	}
}
