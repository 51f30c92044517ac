use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// The entity families replicated by the task module.
///
/// String forms match the runtime's model names, so a conflict arriving for `"TaskAnswer"` parses
/// straight into [`EntityType::TaskAnswer`] and anything else fails to parse.
#[derive(
	Debug,
	Clone,
	Copy,
	PartialEq,
	Eq,
	PartialOrd,
	Ord,
	Hash,
	Serialize,
	Deserialize,
	Display,
	EnumString,
	EnumIter,
	AsRefStr,
)]
pub enum EntityType {
	Task,
	TaskAnswer,
	TaskResult,
	TaskHistory,
	Activity,
	Question,
	DataPoint,
	DataPointInstance,
}

#[derive(
	Debug,
	Clone,
	Copy,
	PartialEq,
	Eq,
	Hash,
	Serialize,
	Deserialize,
	Display,
	EnumString,
	EnumIter,
	AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
	Insert,
	Update,
	Delete,
}

#[cfg(test)]
mod tests {
	use super::*;
	use strum::IntoEnumIterator;

	#[test]
	fn model_names_round_trip() {
		for entity in EntityType::iter() {
			assert_eq!(entity.to_string().parse::<EntityType>().unwrap(), entity);
		}

		assert_eq!("TaskAnswer".parse::<EntityType>().unwrap(), EntityType::TaskAnswer);
		assert!("Appointment".parse::<EntityType>().is_err());
		assert!("task".parse::<EntityType>().is_err());
	}

	#[test]
	fn operation_names() {
		assert_eq!(OperationKind::Delete.to_string(), "DELETE");
		assert_eq!("UPDATE".parse::<OperationKind>().unwrap(), OperationKind::Update);
	}
}
