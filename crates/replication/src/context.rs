use tq_datastore::{AppointmentStore, ConflictHook, ReplicatedStore};

use std::sync::{
	atomic::{AtomicBool, Ordering},
	Arc,
};

use tracing::{debug, info};

use crate::{
	cleanup::CleanupOrchestrator, config::CleanupConfig, registry::EntityRegistry,
	resolver::ConflictResolver,
};

/// Owns the entity registry and the conflict resolver built on it, and makes sure the resolver is
/// handed to the store runtime only once per process, however many call sites ask for it.
///
/// Meant to be created once at the application root and shared by reference.
#[derive(Debug)]
pub struct SyncContext {
	registry: Arc<EntityRegistry>,
	resolver: Arc<ConflictResolver>,
	configured: AtomicBool,
}

impl Default for SyncContext {
	fn default() -> Self {
		Self::new(EntityRegistry::default())
	}
}

impl SyncContext {
	#[must_use]
	pub fn new(registry: EntityRegistry) -> Self {
		let registry = Arc::new(registry);

		Self {
			resolver: Arc::new(ConflictResolver::new(Arc::clone(&registry))),
			registry,
			configured: AtomicBool::new(false),
		}
	}

	/// Installs the conflict resolver on `store`. Returns whether this call did the registration.
	pub fn configure<H: ConflictHook + ?Sized>(&self, store: &H) -> bool {
		if self
			.configured
			.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
			.is_err()
		{
			debug!("Conflict resolution already configured, skipping");
			return false;
		}

		store.register_conflict_handler(Arc::clone(&self.resolver).into_handler());
		info!(
			entity_types = self.registry.len(),
			"Conflict resolution configured"
		);

		true
	}

	pub fn is_configured(&self) -> bool {
		self.configured.load(Ordering::Acquire)
	}

	pub fn registry(&self) -> &Arc<EntityRegistry> {
		&self.registry
	}

	pub fn resolver(&self) -> &Arc<ConflictResolver> {
		&self.resolver
	}

	/// Cleanup over this context's registry.
	pub fn cleanup(
		&self,
		store: Arc<dyn ReplicatedStore>,
		appointments: Arc<dyn AppointmentStore>,
		config: CleanupConfig,
	) -> CleanupOrchestrator {
		CleanupOrchestrator::new(store, appointments, Arc::clone(&self.registry), config)
	}

	/// Lets test harnesses register again against a fresh store.
	#[doc(hidden)]
	pub fn reset_for_testing(&self) {
		self.configured.store(false, Ordering::Release);
	}
}
