//!
//! # Replication policy
//!
//! The layer between the task module and its replicated store: which copy of a record wins when
//! a write collides with the server's ([`ConflictResolver`]), how a UI keeps an accurate live view
//! of a family even when the store under-reports deletes ([`subscribe`]), and how every family is
//! wiped without tripping over references between them ([`CleanupOrchestrator`]).
//!
//! Per family behaviour lives in the [`EntityRegistry`]. A [`SyncContext`] created at the
//! application root owns the registry and installs the resolver on the store exactly once.

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

pub mod cleanup;
pub mod config;
mod context;
pub mod dependency;
mod error;
pub mod registry;
pub mod resolver;
pub mod subscription;

pub use cleanup::{CleanupOrchestrator, CleanupReport, DeleteFailure};
pub use config::{CleanupConfig, HubConfig, ReplicationConfig, ResetConfig};
pub use context::SyncContext;
pub use error::{ConfigError, RegistryError};
pub use registry::{Completeness, EntityDescriptor, EntityRegistry, MergePolicy};
pub use resolver::ConflictResolver;
pub use subscription::{subscribe, Subscription, SubscriptionAggregator};
