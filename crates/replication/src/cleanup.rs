//! Wipes every replicated family of the task module, children before parents, then the
//! appointments.
//!
//! Deletes are tombstones that still have to travel through replication, so the orchestrator
//! paces itself: records go out in small concurrent batches with a short pause between batches
//! and a longer one after each family. Nothing in here fails hard. Individual delete failures are
//! logged and collected into the [`CleanupReport`], and an unreadable family counts as empty.

use tq_datastore::{AppointmentStore, EntityType, Record, ReplicatedStore, StoreError};

use std::{
	collections::{BTreeMap, BTreeSet},
	sync::Arc,
};

use futures_concurrency::future::Join;
use serde::Serialize;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{config::CleanupConfig, registry::EntityRegistry};

/// Ids logged per warning, the rest is only counted.
const LOGGED_IDS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteFailure {
	pub entity: EntityType,
	pub id: Uuid,
	/// Passes over the family that tried, and failed, to delete this record.
	pub attempts: u32,
	pub error: String,
}

/// Outcome of a [`CleanupOrchestrator::clear_all`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
	/// Successful deletes per family.
	pub deleted: BTreeMap<EntityType, usize>,
	/// Records still not deleted once their family was done with.
	pub failures: Vec<DeleteFailure>,
	/// Families that couldn't be queried, and were treated as empty.
	pub unreadable: BTreeSet<EntityType>,
	/// Live records found by the final verification.
	pub remaining: BTreeMap<EntityType, usize>,
	/// Verified families whose verification query failed, so nothing is known about them.
	pub unverified: BTreeSet<EntityType>,
	/// Whether the appointments collaborator reported success.
	pub cleared: bool,
}

impl CleanupReport {
	pub fn total_deleted(&self) -> usize {
		self.deleted.values().sum()
	}

	pub fn is_fully_clean(&self) -> bool {
		self.cleared
			&& self.failures.is_empty()
			&& self.unreadable.is_empty()
			&& self.unverified.is_empty()
			&& self.remaining.values().all(|count| *count == 0)
	}
}

/// What a single family's deletion produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FamilyOutcome {
	pub deleted: usize,
	pub failures: Vec<DeleteFailure>,
	pub unreadable: bool,
}

pub struct CleanupOrchestrator {
	store: Arc<dyn ReplicatedStore>,
	appointments: Arc<dyn AppointmentStore>,
	registry: Arc<EntityRegistry>,
	config: CleanupConfig,
}

impl CleanupOrchestrator {
	pub fn new(
		store: Arc<dyn ReplicatedStore>,
		appointments: Arc<dyn AppointmentStore>,
		registry: Arc<EntityRegistry>,
		config: CleanupConfig,
	) -> Self {
		Self {
			store,
			appointments,
			registry,
			config,
		}
	}

	pub const fn config(&self) -> &CleanupConfig {
		&self.config
	}

	/// Deletes every registered family by ascending rank, clears the appointments and verifies
	/// what is left. Never fails, see the report for what didn't work out.
	pub async fn clear_all(&self) -> CleanupReport {
		let order = self.registry.deletion_order();
		info!(families = order.len(), "Clearing all seeded data");

		let mut report = CleanupReport::default();

		for (step, entity) in order.into_iter().enumerate() {
			info!(step = step + 1, %entity, "Deleting family");

			let outcome = if self.config.retries(entity) {
				self.delete_family_with_retry(entity).await
			} else {
				self.delete_family(entity).await
			};

			info!(%entity, deleted = outcome.deleted, failed = outcome.failures.len(), "Family done");

			report.deleted.insert(entity, outcome.deleted);
			report.failures.extend(outcome.failures);
			if outcome.unreadable {
				report.unreadable.insert(entity);
			}
		}

		info!("Clearing appointments");
		report.cleared = match self.appointments.clear().await {
			Ok(()) => true,
			Err(e) => {
				error!(?e, "Failed to clear appointments;");
				false
			}
		};

		(report.remaining, report.unverified) = self.verify().await;

		info!(
			total_deleted = report.total_deleted(),
			failures = report.failures.len(),
			unverified = report.unverified.len(),
			cleared = report.cleared,
			"Finished clearing seeded data",
		);

		report
	}

	/// One pass over `entity`: query, delete in batches, then let replication settle.
	pub async fn delete_family(&self, entity: EntityType) -> FamilyOutcome {
		let Ok(records) = self.query(entity).await else {
			return FamilyOutcome {
				unreadable: true,
				..Default::default()
			};
		};

		if records.is_empty() {
			debug!(%entity, "Nothing to delete");
			return FamilyOutcome::default();
		}

		let (deleted, failures) = self.delete_batches(entity, &records).await;
		sleep(self.config.tier_pause()).await;

		FamilyOutcome {
			deleted,
			failures,
			unreadable: false,
		}
	}

	/// Repeats the pass until the family reads back empty or the attempts run out. Records that
	/// fail once and go through on a later pass don't end up in the failures.
	pub async fn delete_family_with_retry(&self, entity: EntityType) -> FamilyOutcome {
		let max_attempts = self.config.retry_attempts;
		let mut outcome = FamilyOutcome::default();
		let mut pending = BTreeMap::<Uuid, DeleteFailure>::new();

		for attempt in 1..=max_attempts {
			debug!(%entity, attempt, max_attempts, "Deletion attempt");

			let records = match self.query(entity).await {
				Ok(records) => records,
				Err(_) => {
					outcome.unreadable = true;
					break;
				}
			};

			if records.is_empty() {
				debug!(%entity, attempt, "Nothing left to delete");
				break;
			}

			let (deleted, failures) = self.delete_batches(entity, &records).await;
			outcome.deleted += deleted;

			// Anything that failed before and wasn't reported again is gone.
			let mut previous = std::mem::take(&mut pending);
			for failure in failures {
				let attempts = previous
					.remove(&failure.id)
					.map_or(1, |earlier| earlier.attempts + 1);
				pending.insert(failure.id, DeleteFailure { attempts, ..failure });
			}

			sleep(self.config.tier_pause()).await;

			match self.store.query(entity).await {
				Ok(remaining) if remaining.is_empty() => {
					info!(%entity, attempt, "All records deleted");
					break;
				}
				Ok(remaining) => warn!(
					%entity,
					attempt,
					remaining = remaining.len(),
					remaining_ids = ?first_ids(&remaining),
					"Records remain after attempt",
				),
				Err(e) => warn!(%entity, attempt, ?e, "Failed to recheck family;"),
			}
		}

		match self.store.query(entity).await {
			Ok(remaining) if !remaining.is_empty() => warn!(
				%entity,
				remaining = remaining.len(),
				remaining_ids = ?remaining.iter().map(|record| record.id).collect::<Vec<_>>(),
				"Records remain after all attempts",
			),
			Ok(_) => {}
			Err(e) => warn!(%entity, ?e, "Failed to run final check;"),
		}

		outcome.failures = pending.into_values().collect();
		outcome
	}

	async fn query(&self, entity: EntityType) -> Result<Vec<Record>, StoreError> {
		self.store
			.query(entity)
			.await
			.inspect(|records| {
				debug!(
					%entity,
					count = records.len(),
					ids = ?first_ids(records),
					"Found records to delete",
				);
			})
			.inspect_err(|e| error!(%entity, ?e, "Failed to query family, treating it as empty;"))
	}

	/// Deletes `records` in concurrent batches. Returns the success count and the failures.
	async fn delete_batches(
		&self,
		entity: EntityType,
		records: &[Record],
	) -> (usize, Vec<DeleteFailure>) {
		let batch_size = self.config.batch_size.max(1);
		let batches = records.len().div_ceil(batch_size);

		let mut deleted = 0;
		let mut failures = Vec::new();

		for (index, batch) in records.chunks(batch_size).enumerate() {
			let results = batch
				.iter()
				.map(|record| async move {
					self.store
						.delete(entity, record)
						.await
						.map_err(|e| (record.id, e))
				})
				.collect::<Vec<_>>()
				.join()
				.await;

			let mut batch_failures = 0;
			for result in results {
				match result {
					Ok(()) => deleted += 1,
					Err((id, e)) => {
						warn!(%entity, %id, ?e, "Failed to delete record;");
						batch_failures += 1;
						failures.push(DeleteFailure {
							entity,
							id,
							attempts: 1,
							error: e.to_string(),
						});
					}
				}
			}

			debug!(
				%entity,
				batch = index + 1,
				batches,
				size = batch.len(),
				failed = batch_failures,
				"Batch processed",
			);

			if index + 1 < batches {
				sleep(self.config.batch_pause()).await;
			}
		}

		(deleted, failures)
	}

	/// Counts what survived in the verified families. Families that can't be read come back in
	/// the second set instead.
	async fn verify(&self) -> (BTreeMap<EntityType, usize>, BTreeSet<EntityType>) {
		sleep(self.config.verification_pause()).await;

		let mut remaining = BTreeMap::new();
		let mut unverified = BTreeSet::new();

		for &entity in &self.config.verified_entities {
			match self.store.query(entity).await {
				Ok(records) => {
					if !records.is_empty() {
						warn!(
							%entity,
							remaining = records.len(),
							remaining_ids = ?first_ids(&records),
							"Records survived cleanup",
						);
					}
					remaining.insert(entity, records.len());
				}
				Err(e) => {
					error!(%entity, ?e, "Failed to verify family;");
					unverified.insert(entity);
				}
			}
		}

		if unverified.is_empty() && remaining.values().all(|count| *count == 0) {
			info!("All task related records verified deleted");
		}

		(remaining, unverified)
	}
}

fn first_ids(records: &[Record]) -> Vec<Uuid> {
	records
		.iter()
		.take(LOGGED_IDS)
		.map(|record| record.id)
		.collect()
}
