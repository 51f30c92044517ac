use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// A replicated unit of data.
///
/// The bookkeeping attributes the runtime maintains (`_version`, `_deleted`, `_lastChangedAt`)
/// are typed; everything entity specific lives in `fields` and is flattened back into the record
/// on the wire, so a `Task` and a `TaskAnswer` share this one shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
	pub id: Uuid,

	/// Partition half of the composite natural key.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub pk: Option<String>,

	/// Sort half of the composite natural key.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub sk: Option<String>,

	#[serde(rename = "_version", default, skip_serializing_if = "Option::is_none")]
	pub version: Option<u64>,

	/// Tombstone flag. A deleted record stays around until the tombstone has propagated.
	#[serde(rename = "_deleted", default)]
	pub deleted: bool,

	#[serde(
		rename = "_lastChangedAt",
		default,
		skip_serializing_if = "Option::is_none"
	)]
	pub last_changed_at: Option<i64>,

	#[serde(flatten)]
	pub fields: Map<String, Value>,
}

/// Whether a payload value counts as "set".
///
/// `null`, `false`, `0` and the empty string all count as absent, which is how the merge rules
/// decide which replica a field is taken from.
#[must_use]
pub fn is_present(value: &Value) -> bool {
	match value {
		Value::Null | Value::Bool(false) => false,
		Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
		Value::String(s) => !s.is_empty(),
		Value::Bool(true) | Value::Array(_) | Value::Object(_) => true,
	}
}

impl Record {
	#[must_use]
	pub fn new(id: Uuid) -> Self {
		Self {
			id,
			pk: None,
			sk: None,
			version: None,
			deleted: false,
			last_changed_at: None,
			fields: Map::new(),
		}
	}

	#[must_use]
	pub fn generate() -> Self {
		Self::new(Uuid::new_v4())
	}

	#[must_use]
	pub fn with_key(mut self, pk: impl Into<String>, sk: impl Into<String>) -> Self {
		self.pk = Some(pk.into());
		self.sk = Some(sk.into());
		self
	}

	#[must_use]
	pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
		self.fields.insert(name.into(), value.into());
		self
	}

	pub fn field(&self, name: &str) -> Option<&Value> {
		self.fields.get(name)
	}

	/// The field value, only if it is [present](is_present).
	pub fn present_field(&self, name: &str) -> Option<&Value> {
		self.field(name).filter(|value| is_present(value))
	}

	pub fn has_value(&self, name: &str) -> bool {
		self.present_field(name).is_some()
	}

	/// Sets `name`, or removes it when `value` is `None`.
	pub fn set_field(&mut self, name: &str, value: Option<Value>) {
		match value {
			Some(value) => {
				self.fields.insert(name.to_string(), value);
			}
			None => {
				self.fields.remove(name);
			}
		}
	}

	pub fn composite_key(&self) -> Option<(&str, &str)> {
		self.pk.as_deref().zip(self.sk.as_deref())
	}

	pub const fn has_any_key(&self) -> bool {
		self.pk.is_some() || self.sk.is_some()
	}

	/// Neither half of the composite key carries a usable value.
	pub fn lacks_key(&self) -> bool {
		self.pk.as_deref().map_or(true, str::is_empty)
			&& self.sk.as_deref().map_or(true, str::is_empty)
	}

	#[must_use]
	pub fn tombstoned(mut self) -> Self {
		self.deleted = true;
		self
	}

	/// Backfills whichever half of the composite key is missing from `fallback`.
	///
	/// Keys already on `self` always win; a key present on either side is never dropped.
	#[must_use]
	pub fn with_key_from(mut self, fallback: Option<&Self>) -> Self {
		if let Some(fallback) = fallback {
			if self.pk.as_deref().map_or(true, str::is_empty) && fallback.pk.is_some() {
				self.pk.clone_from(&fallback.pk);
			}
			if self.sk.as_deref().map_or(true, str::is_empty) && fallback.sk.is_some() {
				self.sk.clone_from(&fallback.sk);
			}
		}
		self
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn presence_follows_truthiness() {
		assert!(!is_present(&json!(null)));
		assert!(!is_present(&json!(false)));
		assert!(!is_present(&json!(0)));
		assert!(!is_present(&json!(0.0)));
		assert!(!is_present(&json!("")));

		assert!(is_present(&json!(true)));
		assert!(is_present(&json!(2000)));
		assert!(is_present(&json!("OPEN")));
		assert!(is_present(&json!([])));
		assert!(is_present(&json!({})));
	}

	#[test]
	fn key_repair_backfills_only_missing_halves() {
		let kept = Record::generate().with_field("name", "kept");
		let mut other = Record::generate().with_key("P", "S");
		other.sk = None;

		let repaired = kept.clone().with_key_from(Some(&other));
		assert_eq!(repaired.pk.as_deref(), Some("P"));
		assert_eq!(repaired.sk, None);

		let both = kept.with_key("A", "B").with_key_from(Some(&other));
		assert_eq!(both.composite_key(), Some(("A", "B")));

		let untouched = Record::generate().with_key_from(None);
		assert!(!untouched.has_any_key());
	}

	#[test]
	fn wire_shape_uses_runtime_field_names() {
		let id = Uuid::new_v4();
		let mut record = Record::new(id).with_key("P", "S").with_field("title", "T");
		record.version = Some(3);
		record.deleted = true;

		let value = serde_json::to_value(&record).unwrap();
		assert_eq!(value["_version"], json!(3));
		assert_eq!(value["_deleted"], json!(true));
		assert_eq!(value["title"], json!("T"));
		assert!(value.get("_lastChangedAt").is_none());

		let back: Record = serde_json::from_value(value).unwrap();
		assert_eq!(back, record);
	}

	#[test]
	fn lacks_key_treats_empty_strings_as_missing() {
		let mut record = Record::generate();
		assert!(record.lacks_key());

		record.pk = Some(String::new());
		assert!(record.lacks_key());

		record.sk = Some("S".to_string());
		assert!(!record.lacks_key());
	}
}
