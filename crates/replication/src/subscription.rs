//! Live view of one entity family for UI consumers.
//!
//! The runtime's reconciled snapshot feed is known to under-report deletes in some versions, so
//! every subscription also listens to the raw change feed and re-queries the family whenever a
//! delete goes by. Both channels feed the same callback, which therefore has to treat every call
//! as "replace the whole set". A delete may be reported twice, once per channel.

use tq_datastore::{EntityType, OperationKind, Record, ReplicatedStore, Snapshot};

use std::sync::Arc;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

/// Receives the visible set of records and whether it reflects the server.
pub trait SnapshotCallback: Fn(Vec<Record>, bool) + Send + Sync + 'static {}

impl<F> SnapshotCallback for F where F: Fn(Vec<Record>, bool) + Send + Sync + 'static {}

/// Handle over both channels of a subscription. Dropping it closes them too.
#[derive(Debug)]
#[must_use = "dropping the subscription closes it right away"]
pub struct Subscription {
	entity: EntityType,
	snapshot_pump: Option<JoinHandle<()>>,
	delete_pump: Option<JoinHandle<()>>,
}

impl Subscription {
	pub const fn entity(&self) -> EntityType {
		self.entity
	}

	/// Whether either channel is still being pumped.
	pub fn is_active(&self) -> bool {
		[&self.snapshot_pump, &self.delete_pump]
			.into_iter()
			.flatten()
			.any(|pump| !pump.is_finished())
	}

	/// Closes both channels together.
	pub fn unsubscribe(mut self) {
		self.close();
	}

	fn close(&mut self) {
		let pumps = [self.snapshot_pump.take(), self.delete_pump.take()];
		if pumps.iter().all(Option::is_none) {
			return;
		}

		for pump in pumps.into_iter().flatten() {
			pump.abort();
		}

		debug!(entity = %self.entity, "Subscription closed");
	}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		self.close();
	}
}

fn visible(items: Vec<Record>) -> Vec<Record> {
	items.into_iter().filter(|record| !record.deleted).collect()
}

/// Subscribes `callback` to the visible set of `entity` records. Must be called within a tokio
/// runtime.
pub fn subscribe<S>(
	store: Arc<S>,
	entity: EntityType,
	callback: impl SnapshotCallback,
) -> Subscription
where
	S: ReplicatedStore + ?Sized,
{
	let callback = Arc::new(callback);

	// Both feeds are opened before either pump starts so nothing slips between them.
	let mut snapshots = store.observe_query(entity);
	let mut changes = store.observe(entity);

	let snapshot_pump = tokio::spawn({
		let callback = Arc::clone(&callback);

		async move {
			while let Some(next) = snapshots.next().await {
				match next {
					Ok(Snapshot { items, is_synced }) => {
						let items = visible(items);
						trace!(%entity, count = items.len(), is_synced, "Snapshot received");
						callback(items, is_synced);
					}
					Err(e) => {
						error!(%entity, ?e, "Snapshot feed failed;");
						callback(Vec::new(), false);
					}
				}
			}

			debug!(%entity, "Snapshot feed ended");
		}
	});

	let delete_pump = tokio::spawn(async move {
		while let Some(next) = changes.next().await {
			match next {
				Ok(change) if change.operation == OperationKind::Delete => {
					debug!(
						%entity,
						id = %change.element.id,
						source = %change.source(),
						"Delete observed, refreshing",
					);

					match store.query(entity).await {
						Ok(items) => callback(visible(items), true),
						Err(e) => error!(%entity, ?e, "Failed to refresh after delete;"),
					}
				}
				Ok(_) => {}
				Err(e) => warn!(%entity, ?e, "Change feed error;"),
			}
		}

		debug!(%entity, "Change feed ended");
	});

	Subscription {
		entity,
		snapshot_pump: Some(snapshot_pump),
		delete_pump: Some(delete_pump),
	}
}

/// Per family entry point, for consumers that keep the store and the family together.
#[derive(Debug)]
pub struct SubscriptionAggregator<S: ?Sized> {
	store: Arc<S>,
	entity: EntityType,
}

impl<S: ?Sized> Clone for SubscriptionAggregator<S> {
	fn clone(&self) -> Self {
		Self {
			store: Arc::clone(&self.store),
			entity: self.entity,
		}
	}
}

impl<S: ReplicatedStore + ?Sized> SubscriptionAggregator<S> {
	pub const fn new(store: Arc<S>, entity: EntityType) -> Self {
		Self { store, entity }
	}

	pub const fn entity(&self) -> EntityType {
		self.entity
	}

	pub fn subscribe(&self, callback: impl SnapshotCallback) -> Subscription {
		subscribe(Arc::clone(&self.store), self.entity, callback)
	}
}
