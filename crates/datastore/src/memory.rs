use std::{
	collections::{BTreeMap, HashMap, HashSet},
	fmt,
	sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use futures::{future, stream, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use strum::IntoEnumIterator;
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{debug, trace};
use uuid::Uuid;

use super::{
	AppointmentStore, ChangeEvent, ChangeStream, ConflictEvent, ConflictHandler, ConflictHook,
	EntityType, HubBus, HubEvent, LifecycleStep, OperationKind, Record, ReplicatedStore, Snapshot,
	SnapshotStream, StoreError, StoreLifecycle,
};

#[derive(Debug, Clone)]
pub struct MemoryStoreOptions {
	/// Don't publish a snapshot after a delete. Reproduces runtimes whose reconciled feed is slow
	/// to report deletions.
	pub snapshot_skips_deletes: bool,
	pub channel_capacity: usize,
}

impl Default for MemoryStoreOptions {
	fn default() -> Self {
		Self {
			snapshot_skips_deletes: false,
			channel_capacity: 1024,
		}
	}
}

/// `child.field` holds the id of a `parent` record.
#[derive(Debug, Clone, Copy)]
struct Link {
	child: EntityType,
	field: &'static str,
	parent: EntityType,
}

#[derive(Debug, Default)]
struct State {
	tables: HashMap<EntityType, BTreeMap<Uuid, Record>>,
	links: Vec<Link>,
	failing_deletes: HashMap<Uuid, usize>,
	failing_queries: HashSet<EntityType>,
	deletion_log: Vec<(EntityType, Uuid)>,
	delete_attempts: usize,
	is_synced: bool,
	stopped: bool,
	hanging: HashSet<LifecycleStep>,
	lifecycle_log: Vec<LifecycleStep>,
	clock: i64,
}

impl State {
	fn tick(&mut self) -> i64 {
		self.clock += 1;
		self.clock
	}

	fn live(&self, entity: EntityType) -> Vec<Record> {
		self.tables
			.get(&entity)
			.map(|table| table.values().filter(|r| !r.deleted).cloned().collect())
			.unwrap_or_default()
	}

	fn snapshot(&self, entity: EntityType) -> Snapshot {
		Snapshot {
			items: self.live(entity),
			is_synced: self.is_synced,
		}
	}

	fn blocking_child(&self, parent: EntityType, id: Uuid) -> Option<(EntityType, Uuid)> {
		let id = id.to_string();

		self.links
			.iter()
			.filter(|link| link.parent == parent)
			.find_map(|link| {
				self.tables.get(&link.child)?.values().find_map(|child| {
					(!child.deleted
						&& child.field(link.field).and_then(Value::as_str) == Some(id.as_str()))
					.then_some((link.child, child.id))
				})
			})
	}

	/// Consumes one injected failure for `id`, if any is pending.
	fn take_delete_failure(&mut self, id: Uuid) -> bool {
		let Some(remaining) = self.failing_deletes.get_mut(&id) else {
			return false;
		};

		let fails = *remaining > 0;
		*remaining = remaining.saturating_sub(1);

		if *remaining == 0 {
			self.failing_deletes.remove(&id);
		}

		fails
	}
}

/// In-process replica honouring the [`ReplicatedStore`] and [`ConflictHook`] contracts.
///
/// Deletes tombstone instead of removing, every mutation is published on both the snapshot and
/// the change feed, and the registered conflict handler decides what a remote write turns into.
/// Links between entity families and injectable failures make it possible to reproduce the
/// partial failures the cleanup path has to survive.
pub struct MemoryStore {
	state: Mutex<State>,
	handler: Mutex<Option<ConflictHandler>>,
	registrations: AtomicUsize,
	snapshots: broadcast::Sender<(EntityType, Result<Snapshot, StoreError>)>,
	changes: broadcast::Sender<ChangeEvent>,
	hub: HubBus,
	options: MemoryStoreOptions,
}

impl fmt::Debug for MemoryStore {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("MemoryStore")
			.field("options", &self.options)
			.finish_non_exhaustive()
	}
}

impl Default for MemoryStore {
	fn default() -> Self {
		Self::new()
	}
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::with_options(MemoryStoreOptions::default())
	}

	pub fn with_options(options: MemoryStoreOptions) -> Self {
		let (snapshots, _) = broadcast::channel(options.channel_capacity);
		let (changes, _) = broadcast::channel(options.channel_capacity);

		Self {
			state: Mutex::default(),
			handler: Mutex::default(),
			registrations: AtomicUsize::new(0),
			snapshots,
			changes,
			hub: HubBus::with_capacity(options.channel_capacity),
			options,
		}
	}

	/// Local create or update, as a CRUD wrapper would issue it.
	pub fn save(&self, entity: EntityType, mut record: Record) -> Record {
		let (operation, snapshot) = {
			let mut state = self.state.lock();
			record.version = Some(record.version.unwrap_or(0) + 1);
			record.last_changed_at = Some(state.tick());

			let operation = if state
				.tables
				.entry(entity)
				.or_default()
				.insert(record.id, record.clone())
				.is_some()
			{
				OperationKind::Update
			} else {
				OperationKind::Insert
			};

			(operation, state.snapshot(entity))
		};

		trace!(%entity, id = %record.id, %operation, "Saved record");

		self.publish_change(ChangeEvent {
			entity,
			element: record.clone(),
			operation,
		});
		self.publish_snapshot(entity, Ok(snapshot));

		record
	}

	pub fn seed(&self, entity: EntityType, records: impl IntoIterator<Item = Record>) -> Vec<Record> {
		records
			.into_iter()
			.map(|record| self.save(entity, record))
			.collect()
	}

	/// The stored record, tombstoned or not.
	pub fn get(&self, entity: EntityType, id: Uuid) -> Option<Record> {
		self.state
			.lock()
			.tables
			.get(&entity)
			.and_then(|table| table.get(&id))
			.cloned()
	}

	pub fn live_count(&self, entity: EntityType) -> usize {
		self.state.lock().live(entity).len()
	}

	/// Flips the synced boundary and publishes a fresh snapshot for every entity.
	pub fn set_synced(&self, is_synced: bool) {
		let snapshots = {
			let mut state = self.state.lock();
			state.is_synced = is_synced;
			EntityType::iter()
				.map(|entity| (entity, state.snapshot(entity)))
				.collect::<Vec<_>>()
		};

		for (entity, snapshot) in snapshots {
			self.publish_snapshot(entity, Ok(snapshot));
		}
	}

	/// Refuse deleting a `parent` record while a live `child` record names it in `field`.
	pub fn link(&self, child: EntityType, field: &'static str, parent: EntityType) {
		self.state.lock().links.push(Link {
			child,
			field,
			parent,
		});
	}

	pub fn fail_delete(&self, id: Uuid) {
		self.fail_delete_times(id, usize::MAX);
	}

	pub fn fail_delete_times(&self, id: Uuid, times: usize) {
		self.state.lock().failing_deletes.insert(id, times);
	}

	pub fn fail_queries(&self, entity: EntityType) {
		self.state.lock().failing_queries.insert(entity);
	}

	pub fn restore_queries(&self, entity: EntityType) {
		self.state.lock().failing_queries.remove(&entity);
	}

	/// Publishes an error on the snapshot feed of `entity`.
	pub fn fail_snapshot(&self, entity: EntityType, reason: impl Into<String>) {
		self.publish_snapshot(entity, Err(StoreError::Unavailable(reason.into())));
	}

	/// Successful deletes, in the order they were committed.
	pub fn deletion_log(&self) -> Vec<(EntityType, Uuid)> {
		self.state.lock().deletion_log.clone()
	}

	pub fn delete_attempts(&self) -> usize {
		self.state.lock().delete_attempts
	}

	/// Makes every later call of `step` hang forever.
	pub fn hang_on(&self, step: LifecycleStep) {
		self.state.lock().hanging.insert(step);
	}

	pub fn is_running(&self) -> bool {
		!self.state.lock().stopped
	}

	/// Lifecycle steps in the order they were called, hanging ones included.
	pub fn lifecycle_log(&self) -> Vec<LifecycleStep> {
		self.state.lock().lifecycle_log.clone()
	}

	pub fn registrations(&self) -> usize {
		self.registrations.load(Ordering::Acquire)
	}

	pub fn hub_bus(&self) -> &HubBus {
		&self.hub
	}

	/// Applies a remote write that raced a local one.
	///
	/// The registered conflict handler gets the stored local copy and the incoming remote copy and
	/// its answer is what gets stored. Without a handler the remote copy wins.
	///
	/// The handler runs while the store is locked, so no local write can slip in between the read
	/// it was shown and the write of its answer. It must not call back into the store.
	pub fn reconcile_remote(
		&self,
		entity: EntityType,
		remote: Record,
		operation: OperationKind,
		attempts: u32,
	) -> Option<Record> {
		let handler = self.handler.lock().clone();
		let id = remote.id;

		let (stored, snapshot) = {
			let mut state = self.state.lock();
			let local = state
				.tables
				.get(&entity)
				.and_then(|table| table.get(&id))
				.cloned();
			let previous_version = local
				.as_ref()
				.and_then(|local| local.version)
				.max(remote.version);

			let mut stored = match handler {
				Some(handler) => handler(
					ConflictEvent::new(entity.to_string(), local, Some(remote), operation)
						.with_attempts(attempts),
				),
				None => Some(remote),
			}?;

			stored.id = id;
			stored.version = Some(previous_version.unwrap_or(0) + 1);
			stored.last_changed_at = Some(state.tick());

			state
				.tables
				.entry(entity)
				.or_default()
				.insert(id, stored.clone());

			(stored, state.snapshot(entity))
		};

		debug!(%entity, %id, %operation, deleted = stored.deleted, "Reconciled remote write");

		self.publish_change(ChangeEvent {
			entity,
			element: stored.clone(),
			operation: if stored.deleted {
				OperationKind::Delete
			} else {
				operation
			},
		});
		self.publish_snapshot(entity, Ok(snapshot));

		Some(stored)
	}

	pub fn emit_hub(&self, event: HubEvent) -> usize {
		self.hub.emit(event)
	}

	async fn enter(&self, step: LifecycleStep) {
		let hangs = {
			let mut state = self.state.lock();
			state.lifecycle_log.push(step);
			state.hanging.contains(&step)
		};

		if hangs {
			debug!(%step, "Lifecycle step hanging");
			future::pending::<()>().await;
		}
	}

	fn publish_change(&self, event: ChangeEvent) {
		if self.changes.send(event).is_err() {
			trace!("No change feed listeners");
		}
	}

	fn publish_snapshot(&self, entity: EntityType, snapshot: Result<Snapshot, StoreError>) {
		if self.snapshots.send((entity, snapshot)).is_err() {
			trace!(%entity, "No snapshot feed listeners");
		}
	}
}

impl ConflictHook for MemoryStore {
	fn register_conflict_handler(&self, handler: ConflictHandler) {
		*self.handler.lock() = Some(handler);
		self.registrations.fetch_add(1, Ordering::AcqRel);
	}
}

#[async_trait]
impl ReplicatedStore for MemoryStore {
	async fn query(&self, entity: EntityType) -> Result<Vec<Record>, StoreError> {
		let res = {
			let state = self.state.lock();
			if state.failing_queries.contains(&entity) {
				Err(StoreError::Unavailable(format!("query for {entity} failed")))
			} else {
				Ok(state.live(entity))
			}
		};

		tokio::task::yield_now().await;

		res
	}

	async fn delete(&self, entity: EntityType, record: &Record) -> Result<(), StoreError> {
		let res = {
			let mut guard = self.state.lock();
			let state = &mut *guard;
			state.delete_attempts += 1;

			if state.take_delete_failure(record.id) {
				Err(StoreError::Unavailable(format!(
					"outbox refused delete of {entity} <id='{}'>",
					record.id
				)))
			} else if let Some((child, child_id)) = state.blocking_child(entity, record.id) {
				Err(StoreError::Rejected {
					entity,
					id: record.id,
					reason: format!("still referenced by {child} <id='{child_id}'>"),
				})
			} else {
				let tick = state.tick();
				match state
					.tables
					.get_mut(&entity)
					.and_then(|table| table.get_mut(&record.id))
					.filter(|stored| !stored.deleted)
				{
					Some(stored) => {
						stored.deleted = true;
						stored.version = Some(stored.version.unwrap_or(0) + 1);
						stored.last_changed_at = Some(tick);
						let element = stored.clone();
						state.deletion_log.push((entity, record.id));
						Ok((element, state.snapshot(entity)))
					}
					None => Err(StoreError::NotFound {
						entity,
						id: record.id,
					}),
				}
			}
		};

		tokio::task::yield_now().await;

		let (element, snapshot) = res?;

		self.publish_change(ChangeEvent {
			entity,
			element,
			operation: OperationKind::Delete,
		});

		if !self.options.snapshot_skips_deletes {
			self.publish_snapshot(entity, Ok(snapshot));
		}

		Ok(())
	}

	fn observe_query(&self, entity: EntityType) -> SnapshotStream {
		// Subscribe before reading the current state so nothing published in between is lost.
		let rx = self.snapshots.subscribe();

		let initial = {
			let state = self.state.lock();
			if state.failing_queries.contains(&entity) {
				Err(StoreError::Unavailable(format!("query for {entity} failed")))
			} else {
				Ok(state.snapshot(entity))
			}
		};

		let updates = BroadcastStream::new(rx).filter_map(move |item| {
			future::ready(match item {
				Ok((for_entity, snapshot)) => (for_entity == entity).then_some(snapshot),
				Err(BroadcastStreamRecvError::Lagged(skipped)) => {
					Some(Err(StoreError::Lagged(skipped)))
				}
			})
		});

		stream::once(future::ready(initial)).chain(updates).boxed()
	}

	fn observe(&self, entity: EntityType) -> ChangeStream {
		BroadcastStream::new(self.changes.subscribe())
			.filter_map(move |item| {
				future::ready(match item {
					Ok(event) => (event.entity == entity).then_some(Ok(event)),
					Err(BroadcastStreamRecvError::Lagged(skipped)) => {
						Some(Err(StoreError::Lagged(skipped)))
					}
				})
			})
			.boxed()
	}

	fn hub(&self) -> broadcast::Receiver<HubEvent> {
		self.hub.subscribe()
	}
}

#[async_trait]
impl StoreLifecycle for MemoryStore {
	async fn start(&self) -> Result<(), StoreError> {
		self.enter(LifecycleStep::Start).await;
		self.state.lock().stopped = false;
		Ok(())
	}

	async fn stop(&self) -> Result<(), StoreError> {
		self.enter(LifecycleStep::Stop).await;
		self.state.lock().stopped = true;
		Ok(())
	}

	async fn clear(&self) -> Result<(), StoreError> {
		self.enter(LifecycleStep::Clear).await;

		let snapshots = {
			let mut state = self.state.lock();
			state.tables.clear();
			EntityType::iter()
				.map(|entity| (entity, state.snapshot(entity)))
				.collect::<Vec<_>>()
		};

		debug!("Cleared local records");

		for (entity, snapshot) in snapshots {
			self.publish_snapshot(entity, Ok(snapshot));
		}

		Ok(())
	}
}

/// In-memory appointments collaborator.
#[derive(Debug, Default)]
pub struct MemoryAppointments {
	stored: AtomicUsize,
	clears: AtomicUsize,
	fail_next: AtomicBool,
}

impl MemoryAppointments {
	pub fn new(stored: usize) -> Self {
		Self {
			stored: AtomicUsize::new(stored),
			..Default::default()
		}
	}

	pub fn fail_next_clear(&self) {
		self.fail_next.store(true, Ordering::Release);
	}

	pub fn remaining(&self) -> usize {
		self.stored.load(Ordering::Acquire)
	}

	pub fn clear_calls(&self) -> usize {
		self.clears.load(Ordering::Acquire)
	}
}

#[async_trait]
impl AppointmentStore for MemoryAppointments {
	async fn clear(&self) -> Result<(), StoreError> {
		self.clears.fetch_add(1, Ordering::AcqRel);

		if self.fail_next.swap(false, Ordering::AcqRel) {
			return Err(StoreError::Unavailable(
				"appointment storage unavailable".to_string(),
			));
		}

		self.stored.store(0, Ordering::Release);
		Ok(())
	}
}
