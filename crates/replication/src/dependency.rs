//! Deletion ordering for entity families
//!
//! A family that references another (an answer row names its task) has to be emptied before the
//! family it points at, otherwise the store refuses, or silently drops, the delete of a record
//! that is still referenced. This computes that order as a topological sort over the reference
//! edges.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tq_datastore::EntityType;

use crate::RegistryError;

/// Orders entity families so that every family comes before the families it references.
///
/// # Example
/// ```
/// use tq_datastore::EntityType;
/// use tq_replication::dependency::compute_deletion_order;
///
/// let order = compute_deletion_order(
/// 	[
/// 		(EntityType::Task, &[][..]),
/// 		(EntityType::TaskAnswer, &[EntityType::Task][..]),
/// 	]
/// 	.into_iter(),
/// )
/// .unwrap();
///
/// assert_eq!(order, vec![EntityType::TaskAnswer, EntityType::Task]);
/// ```
pub fn compute_deletion_order<'a>(
	entities: impl Iterator<Item = (EntityType, &'a [EntityType])>,
) -> Result<Vec<EntityType>, RegistryError> {
	// referenced -> the families that have to be gone before it
	let mut blocks: BTreeMap<EntityType, Vec<EntityType>> = BTreeMap::new();
	let mut in_degree: BTreeMap<EntityType, usize> = BTreeMap::new();
	let mut registered = BTreeSet::new();
	let mut edges = Vec::new();

	for (entity, references) in entities {
		registered.insert(entity);
		in_degree.entry(entity).or_insert(0);

		for &referenced in references {
			edges.push((entity, referenced));
			blocks.entry(entity).or_default().push(referenced);
			*in_degree.entry(referenced).or_insert(0) += 1;
		}
	}

	if registered.is_empty() {
		return Err(RegistryError::NoEntities);
	}

	if let Some(&(entity, referenced)) = edges
		.iter()
		.find(|(_, referenced)| !registered.contains(referenced))
	{
		return Err(RegistryError::UnknownDependency(entity, referenced));
	}

	// Kahn's algorithm
	let mut queue = in_degree
		.iter()
		.filter(|(_, &degree)| degree == 0)
		.map(|(&entity, _)| entity)
		.collect::<VecDeque<_>>();

	let mut order = Vec::with_capacity(registered.len());

	while let Some(entity) = queue.pop_front() {
		order.push(entity);

		if let Some(referenced) = blocks.get(&entity) {
			for next in referenced {
				if let Some(degree) = in_degree.get_mut(next) {
					*degree -= 1;
					if *degree == 0 {
						queue.push_back(*next);
					}
				}
			}
		}
	}

	if order.len() != registered.len() {
		let unsorted = registered
			.iter()
			.filter(|entity| !order.contains(entity))
			.map(ToString::to_string)
			.collect::<Vec<_>>();

		return Err(RegistryError::CircularDependency(format!(
			"entity types involved in cycle: {}",
			unsorted.join(", ")
		)));
	}

	Ok(order)
}
