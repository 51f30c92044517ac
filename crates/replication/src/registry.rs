use tq_datastore::{EntityType, Record};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

use crate::{dependency::compute_deletion_order, RegistryError};

/// How conflicting writes of an entity family get merged.
#[derive(
	Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MergePolicy {
	/// Local workflow status wins on update, server confirmed timing fields win.
	StatusPreferring,
	/// Shared delete rule, completeness judged by descriptive fields.
	CompletenessGuarded,
	/// Shared delete rule, completeness judged by the composite key.
	KeyRepairingGeneric,
	/// Remote wins, missing key halves backfilled from local.
	DefaultRemote,
}

/// Signal telling whether a local copy is too incomplete to be trusted on delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completeness {
	/// Incomplete when none of these fields carries a value.
	AnyField(&'static [&'static str]),
	/// Incomplete when both halves of the composite key are missing.
	CompositeKey,
}

impl Completeness {
	/// An absent record is always incomplete.
	#[must_use]
	pub fn is_incomplete(&self, record: Option<&Record>) -> bool {
		let Some(record) = record else {
			return true;
		};

		match self {
			Self::AnyField(fields) => !fields.iter().any(|field| record.has_value(field)),
			Self::CompositeKey => record.lacks_key(),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityDescriptor {
	pub entity: EntityType,
	pub policy: MergePolicy,
	pub completeness: Completeness,
	/// Deletion rank, lower ranks are emptied first.
	pub rank: u8,
	/// Families this one points at. They must outrank it.
	pub references: &'static [EntityType],
}

const TASK_FIELDS: &[&str] = &["title", "description"];
const ACTIVITY_FIELDS: &[&str] = &["name", "title"];
const QUESTION_FIELDS: &[&str] = &["question", "questionId"];
const TASK_CHILD_REFERENCES: &[EntityType] = &[EntityType::Task];
const NO_REFERENCES: &[EntityType] = &[];

impl EntityDescriptor {
	/// The built-in descriptor for `entity`.
	#[must_use]
	pub const fn builtin(entity: EntityType) -> Self {
		use EntityType::{
			Activity, DataPoint, DataPointInstance, Question, Task, TaskAnswer, TaskHistory,
			TaskResult,
		};

		let (policy, completeness, rank, references) = match entity {
			TaskAnswer => (
				MergePolicy::KeyRepairingGeneric,
				Completeness::CompositeKey,
				0,
				TASK_CHILD_REFERENCES,
			),
			TaskResult => (
				MergePolicy::KeyRepairingGeneric,
				Completeness::CompositeKey,
				1,
				TASK_CHILD_REFERENCES,
			),
			TaskHistory => (
				MergePolicy::KeyRepairingGeneric,
				Completeness::CompositeKey,
				2,
				TASK_CHILD_REFERENCES,
			),
			Task => (
				MergePolicy::StatusPreferring,
				Completeness::AnyField(TASK_FIELDS),
				3,
				NO_REFERENCES,
			),
			Activity => (
				MergePolicy::CompletenessGuarded,
				Completeness::AnyField(ACTIVITY_FIELDS),
				4,
				NO_REFERENCES,
			),
			Question => (
				MergePolicy::CompletenessGuarded,
				Completeness::AnyField(QUESTION_FIELDS),
				5,
				NO_REFERENCES,
			),
			DataPoint => (
				MergePolicy::KeyRepairingGeneric,
				Completeness::CompositeKey,
				6,
				NO_REFERENCES,
			),
			DataPointInstance => (
				MergePolicy::KeyRepairingGeneric,
				Completeness::CompositeKey,
				7,
				NO_REFERENCES,
			),
		};

		Self {
			entity,
			policy,
			completeness,
			rank,
			references,
		}
	}
}

/// Per entity family merge policy, completeness signal and deletion rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRegistry {
	descriptors: BTreeMap<EntityType, EntityDescriptor>,
}

impl Default for EntityRegistry {
	fn default() -> Self {
		Self::from_descriptors(EntityType::iter().map(EntityDescriptor::builtin))
	}
}

impl EntityRegistry {
	/// Builds a registry out of arbitrary descriptors, later ones replacing earlier ones for the
	/// same family. Nothing is checked here, see [`EntityRegistry::validate`].
	pub fn from_descriptors(descriptors: impl IntoIterator<Item = EntityDescriptor>) -> Self {
		Self {
			descriptors: descriptors
				.into_iter()
				.map(|descriptor| (descriptor.entity, descriptor))
				.collect(),
		}
	}

	#[must_use]
	pub fn descriptor(&self, entity: EntityType) -> Option<&EntityDescriptor> {
		self.descriptors.get(&entity)
	}

	#[must_use]
	pub fn rank(&self, entity: EntityType) -> Option<u8> {
		self.descriptor(entity).map(|descriptor| descriptor.rank)
	}

	/// Registered families by ascending rank.
	#[must_use]
	pub fn deletion_order(&self) -> Vec<EntityType> {
		let mut descriptors = self.descriptors.values().collect::<Vec<_>>();
		descriptors.sort_by_key(|descriptor| (descriptor.rank, descriptor.entity));
		descriptors
			.into_iter()
			.map(|descriptor| descriptor.entity)
			.collect()
	}

	pub fn iter(&self) -> impl Iterator<Item = &EntityDescriptor> {
		self.descriptors.values()
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.descriptors.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.descriptors.is_empty()
	}

	/// Checks that the ranks form a valid deletion order over the reference edges and returns
	/// that order.
	pub fn validate(&self) -> Result<Vec<EntityType>, RegistryError> {
		compute_deletion_order(
			self.descriptors
				.values()
				.map(|descriptor| (descriptor.entity, descriptor.references)),
		)?;

		let mut ranks = BTreeMap::new();
		for descriptor in self.descriptors.values() {
			if let Some(other) = ranks.insert(descriptor.rank, descriptor.entity) {
				return Err(RegistryError::DuplicateRank(
					other,
					descriptor.entity,
					descriptor.rank,
				));
			}

			for &referenced in descriptor.references {
				let referenced_rank = self
					.rank(referenced)
					.ok_or(RegistryError::UnknownDependency(descriptor.entity, referenced))?;

				if descriptor.rank >= referenced_rank {
					return Err(RegistryError::RankViolation {
						entity: descriptor.entity,
						rank: descriptor.rank,
						referenced,
						referenced_rank,
					});
				}
			}
		}

		Ok(self.deletion_order())
	}
}

impl<'a> IntoIterator for &'a EntityRegistry {
	type Item = &'a EntityDescriptor;
	type IntoIter = std::collections::btree_map::Values<'a, EntityType, EntityDescriptor>;

	fn into_iter(self) -> Self::IntoIter {
		self.descriptors.values()
	}
}
