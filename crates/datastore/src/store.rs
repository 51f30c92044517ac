use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::sync::broadcast;

use super::{ChangeEvent, ConflictEvent, EntityType, HubEvent, Record, Snapshot, StoreError};

/// Callback the runtime invokes synchronously, on its write path, for every conflicting write.
pub type ConflictHandler = Arc<dyn Fn(ConflictEvent) -> Option<Record> + Send + Sync>;

pub type SnapshotStream = BoxStream<'static, Result<Snapshot, StoreError>>;
pub type ChangeStream = BoxStream<'static, Result<ChangeEvent, StoreError>>;

/// Resolver installation hook of the replicated store runtime.
pub trait ConflictHook: Send + Sync {
	fn register_conflict_handler(&self, handler: ConflictHandler);
}

/// The query, delete and notification primitives of the replicated store runtime.
#[async_trait]
pub trait ReplicatedStore: Send + Sync + 'static {
	/// Every non tombstoned record of `entity` visible locally.
	async fn query(&self, entity: EntityType) -> Result<Vec<Record>, StoreError>;

	/// Tombstones `record`. The tombstone then propagates through replication.
	async fn delete(&self, entity: EntityType, record: &Record) -> Result<(), StoreError>;

	/// Reconciled snapshot feed: emits the visible set whenever it changes or whenever the
	/// synced boundary flips.
	fn observe_query(&self, entity: EntityType) -> SnapshotStream;

	/// Raw change feed: one event per mutation of `entity`.
	fn observe(&self, entity: EntityType) -> ChangeStream;

	/// Lifecycle hub of the runtime.
	fn hub(&self) -> broadcast::Receiver<HubEvent>;
}

/// The separately owned appointments family, cleared through its own collaborator.
#[async_trait]
pub trait AppointmentStore: Send + Sync {
	async fn clear(&self) -> Result<(), StoreError>;
}

/// Lifecycle controls of the replicated store runtime, driven by [`crate::reset::reset_store`].
#[async_trait]
pub trait StoreLifecycle: Send + Sync {
	async fn start(&self) -> Result<(), StoreError>;

	/// May hang while the outbox still holds mutations.
	async fn stop(&self) -> Result<(), StoreError>;

	/// Drops every locally stored record.
	async fn clear(&self) -> Result<(), StoreError>;
}
