use tq_datastore::{EntityType, MemoryAppointments, MemoryStore, Record, ReplicatedStore};
use tq_replication::{CleanupConfig, CleanupOrchestrator, EntityRegistry, SyncContext};

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use tokio::time::Instant;
use tracing_test::traced_test;

mod common;

use common::{
	child_of, linked_store, seed_everything, task, ExhaustedQueries, RecordingStore, StepKind,
};

fn orchestrator(
	store: &Arc<RecordingStore>,
	appointments: &Arc<MemoryAppointments>,
) -> CleanupOrchestrator {
	SyncContext::default().cleanup(
		store.clone(),
		appointments.clone(),
		CleanupConfig::default(),
	)
}

fn answers(store: &MemoryStore, count: usize) -> Vec<Record> {
	let task = store.save(EntityType::Task, task("Daily diary"));
	store.seed(
		EntityType::TaskAnswer,
		(0..count).map(|i| child_of(&task, &format!("ANSWER#{i:02}"))),
	)
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn clears_children_before_parents() {
	let memory = linked_store();
	seed_everything(&memory);

	let store = RecordingStore::new(Arc::clone(&memory));
	let appointments = Arc::new(MemoryAppointments::new(3));

	let report = orchestrator(&store, &appointments).clear_all().await;

	assert!(report.is_fully_clean(), "{report:#?}");
	assert_eq!(report.deleted[&EntityType::TaskAnswer], 6);
	assert_eq!(report.deleted[&EntityType::Task], 2);
	assert_eq!(report.deleted[&EntityType::DataPointInstance], 2);
	assert_eq!(report.total_deleted(), 20);
	assert_eq!(appointments.remaining(), 0);
	assert_eq!(
		report.remaining,
		BTreeMap::from([
			(EntityType::Task, 0),
			(EntityType::TaskAnswer, 0),
			(EntityType::TaskResult, 0),
			(EntityType::TaskHistory, 0),
		])
	);

	// No delete of a family may start before every delete of a lower ranked family resolved.
	let registry = EntityRegistry::default();
	let delete_ranks = store
		.steps()
		.into_iter()
		.filter(|step| step.kind != StepKind::Query)
		.map(|step| registry.rank(step.entity).unwrap())
		.collect::<Vec<_>>();

	assert!(!delete_ranks.is_empty());
	assert!(delete_ranks.windows(2).all(|pair| pair[0] <= pair[1]));

	assert!(logs_contain("Finished clearing seeded data"));
}

#[tokio::test(start_paused = true)]
async fn answers_go_out_in_paced_batches() {
	let memory = Arc::new(MemoryStore::new());
	answers(&memory, 23);

	let queried = memory.query(EntityType::TaskAnswer).await.unwrap();
	let flaky = [queried[12].id, queried[15].id];
	for id in flaky {
		memory.fail_delete_times(id, 1);
	}

	let store = RecordingStore::new(Arc::clone(&memory));
	let outcome = orchestrator(&store, &Arc::new(MemoryAppointments::new(0)))
		.delete_family(EntityType::TaskAnswer)
		.await;

	assert_eq!(outcome.deleted, 21);
	assert!(!outcome.unreadable);
	let mut failed = outcome
		.failures
		.iter()
		.map(|failure| failure.id)
		.collect::<Vec<_>>();
	failed.sort_unstable();
	let mut expected = flaky.to_vec();
	expected.sort_unstable();
	assert_eq!(failed, expected);

	let steps = store.steps();

	let first_twenty = steps
		.iter()
		.filter(|step| matches!(step.kind, StepKind::Deleted | StepKind::DeleteFailed))
		.take(20)
		.filter(|step| step.kind == StepKind::Deleted)
		.count();
	assert_eq!(first_twenty, 18);

	let mut batches = Vec::<(Instant, usize)>::new();
	for step in steps.iter().filter(|step| step.kind == StepKind::DeleteIssued) {
		match batches.last_mut() {
			Some((at, size)) if *at == step.at => *size += 1,
			_ => batches.push((step.at, 1)),
		}
	}

	assert_eq!(
		batches.iter().map(|(_, size)| *size).collect::<Vec<_>>(),
		vec![10, 10, 3]
	);
	for pair in batches.windows(2) {
		assert_eq!(pair[1].0 - pair[0].0, Duration::from_millis(100));
	}
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn retry_picks_up_leftover_answers() {
	let memory = Arc::new(MemoryStore::new());
	answers(&memory, 23);

	let queried = memory.query(EntityType::TaskAnswer).await.unwrap();
	memory.fail_delete_times(queried[12].id, 1);
	memory.fail_delete_times(queried[15].id, 1);

	let store = RecordingStore::new(Arc::clone(&memory));
	let outcome = orchestrator(&store, &Arc::new(MemoryAppointments::new(0)))
		.delete_family_with_retry(EntityType::TaskAnswer)
		.await;

	assert_eq!(outcome.deleted, 23);
	assert!(outcome.failures.is_empty());
	assert_eq!(memory.live_count(EntityType::TaskAnswer), 0);
	assert_eq!(memory.delete_attempts(), 25);

	// first pass, recheck, second pass, recheck, final check
	let queries = store
		.steps()
		.iter()
		.filter(|step| step.kind == StepKind::Query)
		.count();
	assert_eq!(queries, 5);

	assert!(logs_contain("Records remain after attempt"));
	assert!(logs_contain("All records deleted"));
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn stubborn_answer_is_reported_with_its_task() {
	let memory = linked_store();
	seed_everything(&memory);

	let stubborn = memory.query(EntityType::TaskAnswer).await.unwrap()[0].clone();
	memory.fail_delete(stubborn.id);

	let store = RecordingStore::new(Arc::clone(&memory));
	let report = orchestrator(&store, &Arc::new(MemoryAppointments::new(1)))
		.clear_all()
		.await;

	assert!(!report.is_fully_clean());
	assert!(report.cleared);
	assert_eq!(report.deleted[&EntityType::TaskAnswer], 5);
	assert_eq!(report.deleted[&EntityType::Task], 1);
	assert_eq!(report.failures.len(), 2);

	let answer_failure = &report.failures[0];
	assert_eq!(answer_failure.entity, EntityType::TaskAnswer);
	assert_eq!(answer_failure.id, stubborn.id);
	assert_eq!(answer_failure.attempts, 3);

	let task_failure = &report.failures[1];
	assert_eq!(task_failure.entity, EntityType::Task);
	assert_eq!(
		Some(task_failure.id.to_string().as_str()),
		stubborn.field("taskId").and_then(|value| value.as_str())
	);

	assert_eq!(report.remaining[&EntityType::TaskAnswer], 1);
	assert_eq!(report.remaining[&EntityType::Task], 1);
	assert_eq!(report.remaining[&EntityType::TaskResult], 0);

	assert!(logs_contain("Records remain after all attempts"));
	assert!(logs_contain("Records survived cleanup"));
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn unreadable_family_counts_as_empty() {
	let memory = linked_store();
	seed_everything(&memory);
	memory.fail_queries(EntityType::Activity);

	let store = RecordingStore::new(Arc::clone(&memory));
	let report = orchestrator(&store, &Arc::new(MemoryAppointments::new(0)))
		.clear_all()
		.await;

	assert_eq!(report.deleted[&EntityType::Activity], 0);
	assert!(report.unreadable.contains(&EntityType::Activity));
	assert!(report.failures.is_empty());
	assert_eq!(report.deleted[&EntityType::Question], 2);
	assert_eq!(memory.live_count(EntityType::Question), 0);
	assert!(!report.is_fully_clean());

	assert!(logs_contain("Failed to query family"));
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn failed_verification_is_not_reported_clean() {
	let memory = Arc::new(MemoryStore::new());
	memory.save(EntityType::Task, task("Evening reflection"));

	// The deletion pass reads Task once, verification is the second read.
	let store = ExhaustedQueries::new(Arc::clone(&memory), EntityType::Task, 1);
	let report = SyncContext::default()
		.cleanup(
			store,
			Arc::new(MemoryAppointments::new(0)),
			CleanupConfig::default(),
		)
		.clear_all()
		.await;

	assert_eq!(report.deleted[&EntityType::Task], 1);
	assert_eq!(memory.live_count(EntityType::Task), 0);
	assert!(report.unreadable.is_empty());
	assert!(report.failures.is_empty());
	assert!(report.cleared);

	assert!(!report.remaining.contains_key(&EntityType::Task));
	assert!(report.remaining.values().all(|count| *count == 0));
	assert_eq!(
		report.unverified.iter().copied().collect::<Vec<_>>(),
		vec![EntityType::Task]
	);
	assert!(!report.is_fully_clean());

	assert!(logs_contain("Failed to verify family"));
	assert!(!logs_contain("All task related records verified deleted"));
}

#[tokio::test(start_paused = true)]
async fn appointment_failure_only_flips_cleared() {
	let memory = linked_store();
	seed_everything(&memory);

	let appointments = Arc::new(MemoryAppointments::new(3));
	appointments.fail_next_clear();

	let store = RecordingStore::new(Arc::clone(&memory));
	let report = orchestrator(&store, &appointments).clear_all().await;

	assert!(!report.cleared);
	assert!(report.failures.is_empty());
	assert_eq!(report.total_deleted(), 20);
	assert_eq!(appointments.remaining(), 3);
	assert!(!report.is_fully_clean());
}

#[tokio::test(start_paused = true)]
async fn empty_store_only_waits_for_verification() {
	let store = RecordingStore::new(Arc::new(MemoryStore::new()));
	let started = Instant::now();

	let report = orchestrator(&store, &Arc::new(MemoryAppointments::new(0)))
		.clear_all()
		.await;

	assert!(report.is_fully_clean());
	assert!(report.unverified.is_empty());
	assert_eq!(report.total_deleted(), 0);
	assert_eq!(started.elapsed(), Duration::from_secs(2));
}
