#![allow(dead_code)]

use tq_datastore::{
	ChangeStream, EntityType, HubEvent, MemoryStore, Record, ReplicatedStore, SnapshotStream,
	StoreError,
};

use std::sync::{
	atomic::{AtomicUsize, Ordering},
	Arc, Mutex,
};

use async_trait::async_trait;
use strum::IntoEnumIterator;
use tokio::{sync::broadcast, time::Instant};

pub const TASK_ID: &str = "taskId";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
	Query,
	DeleteIssued,
	Deleted,
	DeleteFailed,
}

#[derive(Debug, Clone, Copy)]
pub struct Step {
	pub at: Instant,
	pub entity: EntityType,
	pub kind: StepKind,
}

/// Delegates to a [`MemoryStore`] while keeping a timeline of every query and delete.
#[derive(Debug)]
pub struct RecordingStore {
	pub inner: Arc<MemoryStore>,
	steps: Mutex<Vec<Step>>,
}

impl RecordingStore {
	pub fn new(inner: Arc<MemoryStore>) -> Arc<Self> {
		Arc::new(Self {
			inner,
			steps: Mutex::new(Vec::new()),
		})
	}

	pub fn steps(&self) -> Vec<Step> {
		self.steps.lock().unwrap().clone()
	}

	fn push(&self, entity: EntityType, kind: StepKind) {
		self.steps.lock().unwrap().push(Step {
			at: Instant::now(),
			entity,
			kind,
		});
	}
}

#[async_trait]
impl ReplicatedStore for RecordingStore {
	async fn query(&self, entity: EntityType) -> Result<Vec<Record>, StoreError> {
		self.push(entity, StepKind::Query);
		self.inner.query(entity).await
	}

	async fn delete(&self, entity: EntityType, record: &Record) -> Result<(), StoreError> {
		self.push(entity, StepKind::DeleteIssued);
		let res = self.inner.delete(entity, record).await;
		self.push(
			entity,
			if res.is_ok() {
				StepKind::Deleted
			} else {
				StepKind::DeleteFailed
			},
		);
		res
	}

	fn observe_query(&self, entity: EntityType) -> SnapshotStream {
		self.inner.observe_query(entity)
	}

	fn observe(&self, entity: EntityType) -> ChangeStream {
		self.inner.observe(entity)
	}

	fn hub(&self) -> broadcast::Receiver<HubEvent> {
		self.inner.hub()
	}
}

/// Lets the first `allowed` queries of one family through, then fails every later one.
#[derive(Debug)]
pub struct ExhaustedQueries {
	pub inner: Arc<MemoryStore>,
	entity: EntityType,
	allowed: AtomicUsize,
}

impl ExhaustedQueries {
	pub fn new(inner: Arc<MemoryStore>, entity: EntityType, allowed: usize) -> Arc<Self> {
		Arc::new(Self {
			inner,
			entity,
			allowed: AtomicUsize::new(allowed),
		})
	}
}

#[async_trait]
impl ReplicatedStore for ExhaustedQueries {
	async fn query(&self, entity: EntityType) -> Result<Vec<Record>, StoreError> {
		if entity == self.entity
			&& self
				.allowed
				.fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| left.checked_sub(1))
				.is_err()
		{
			return Err(StoreError::Unavailable(format!("no more queries for {entity}")));
		}

		self.inner.query(entity).await
	}

	async fn delete(&self, entity: EntityType, record: &Record) -> Result<(), StoreError> {
		self.inner.delete(entity, record).await
	}

	fn observe_query(&self, entity: EntityType) -> SnapshotStream {
		self.inner.observe_query(entity)
	}

	fn observe(&self, entity: EntityType) -> ChangeStream {
		self.inner.observe(entity)
	}

	fn hub(&self) -> broadcast::Receiver<HubEvent> {
		self.inner.hub()
	}
}

pub fn task(title: &str) -> Record {
	Record::generate()
		.with_key(format!("TASK#{title}"), "META")
		.with_field("title", title)
}

pub fn child_of(task: &Record, sk: &str) -> Record {
	Record::generate()
		.with_key(task.pk.clone().unwrap_or_default(), sk)
		.with_field(TASK_ID, task.id.to_string())
}

/// A store where answers, results and history rows point at their task and can't outlive it.
pub fn linked_store() -> Arc<MemoryStore> {
	let store = Arc::new(MemoryStore::new());

	for child in [
		EntityType::TaskAnswer,
		EntityType::TaskResult,
		EntityType::TaskHistory,
	] {
		store.link(child, TASK_ID, EntityType::Task);
	}

	store
}

/// Two tasks with a few children each, plus a couple of records for every other family.
pub fn seed_everything(store: &MemoryStore) {
	for title in ["Morning check-in", "Weekly survey"] {
		let task = store.save(EntityType::Task, task(title));

		store.seed(
			EntityType::TaskAnswer,
			(0..3).map(|i| child_of(&task, &format!("ANSWER#{i}"))),
		);
		store.save(EntityType::TaskResult, child_of(&task, "RESULT"));
		store.save(EntityType::TaskHistory, child_of(&task, "HISTORY#1"));
	}

	for entity in EntityType::iter().filter(|entity| {
		!matches!(
			entity,
			EntityType::Task
				| EntityType::TaskAnswer
				| EntityType::TaskResult
				| EntityType::TaskHistory
		)
	}) {
		store.seed(
			entity,
			(0..2).map(|i| Record::generate().with_key(format!("{entity}#{i}"), "META")),
		);
	}
}
