//!
//! # Datastore boundary
//!
//! Everything the replication policy layer needs to know about the replicated store it sits on:
//! the [`Record`] shape shared by every entity, the closed set of [`EntityType`]s, the events the
//! runtime hands us (conflicts, raw changes, reconciled snapshots and lifecycle hub events) and
//! the traits through which the store is reached.
//!
//! The store itself (transport, persistence, outbox) is somebody else's problem. [`MemoryStore`]
//! is an in-process replica that honours the same contracts, so the policy layer can be exercised
//! without a backend.

#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

mod entity;
mod error;
mod event;
pub mod hub;
mod memory;
mod record;
pub mod reset;
mod store;

pub use entity::{EntityType, OperationKind};
pub use error::StoreError;
pub use event::{ChangeEvent, ConflictEvent, OperationSource, Snapshot};
pub use hub::{HubBus, HubEvent, InitialSyncOutcome};
pub use memory::{MemoryAppointments, MemoryStore, MemoryStoreOptions};
pub use record::{is_present, Record};
pub use reset::{
	reset_store, LifecycleStep, ResetMode, ResetOptions, ResetReport, StepOutcome, StepTimeout,
};
pub use store::{
	AppointmentStore, ChangeStream, ConflictHandler, ConflictHook, ReplicatedStore, SnapshotStream,
	StoreLifecycle,
};
