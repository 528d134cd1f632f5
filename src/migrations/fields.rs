//! Field handlers
//!
//! Every field stored in a [`Schema`](super::Schema) carries a `type_key`.
//! The [`FieldHandlerRegistry`] maps that key to a [`FieldHandler`], which
//! knows the parameter skeleton of the field type, how to turn a configured
//! default into a stored value, and whether the field embeds another document
//! type.

use bson::oid::ObjectId;
use bson::{Bson, DateTime};
use serde_json::{Value, json};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use super::schema::{FieldParams, Schema, json_to_bson};
use super::{SchemaError, SchemaResult};

/// How an embedding field holds its target document type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Embedding {
	/// The field holds one embedded document
	Single,
	/// The field holds a list of embedded documents
	Many,
}

/// Stored-value conversion applied when a field changes type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Converter {
	ToString,
	ToInt32,
	ToInt64,
	ToDouble,
	ToBool,
	ItemToList,
}

impl Converter {
	/// Convert one stored value; `None` means the value cannot be converted
	pub fn convert(self, value: &Bson) -> Option<Bson> {
		if matches!(value, Bson::Null) {
			return Some(Bson::Null);
		}
		match self {
			Converter::ToString => match value {
				Bson::String(_) => Some(value.clone()),
				Bson::Int32(i) => Some(Bson::String(i.to_string())),
				Bson::Int64(i) => Some(Bson::String(i.to_string())),
				Bson::Double(f) => Some(Bson::String(f.to_string())),
				Bson::Boolean(b) => Some(Bson::String(b.to_string())),
				Bson::ObjectId(oid) => Some(Bson::String(oid.to_hex())),
				_ => None,
			},
			Converter::ToInt32 => to_i64(value)
				.and_then(|i| i32::try_from(i).ok())
				.map(Bson::Int32),
			Converter::ToInt64 => to_i64(value).map(Bson::Int64),
			Converter::ToDouble => match value {
				Bson::Double(_) => Some(value.clone()),
				Bson::Int32(i) => Some(Bson::Double(f64::from(*i))),
				Bson::Int64(i) => Some(Bson::Double(*i as f64)),
				Bson::String(s) => s.trim().parse().ok().map(Bson::Double),
				Bson::Boolean(b) => Some(Bson::Double(if *b { 1.0 } else { 0.0 })),
				_ => None,
			},
			Converter::ToBool => match value {
				Bson::Boolean(_) => Some(value.clone()),
				Bson::Int32(i) => Some(Bson::Boolean(*i != 0)),
				Bson::Int64(i) => Some(Bson::Boolean(*i != 0)),
				Bson::Double(f) => Some(Bson::Boolean(*f != 0.0)),
				Bson::String(s) => match s.trim().to_ascii_lowercase().as_str() {
					"true" | "1" => Some(Bson::Boolean(true)),
					"false" | "0" | "" => Some(Bson::Boolean(false)),
					_ => None,
				},
				_ => None,
			},
			Converter::ItemToList => match value {
				Bson::Array(_) => Some(value.clone()),
				other => Some(Bson::Array(vec![other.clone()])),
			},
		}
	}
}

fn to_i64(value: &Bson) -> Option<i64> {
	match value {
		Bson::Int32(i) => Some(i64::from(*i)),
		Bson::Int64(i) => Some(*i),
		Bson::Double(f) if f.is_finite() => Some(f.trunc() as i64),
		Bson::String(s) => s.trim().parse().ok(),
		Bson::Boolean(b) => Some(i64::from(*b)),
		_ => None,
	}
}

/// Behavior of one field type
pub trait FieldHandler: Send + Sync {
	/// The `type_key` this handler is registered under
	fn type_key(&self) -> &str;

	/// Parameters specific to this type, with their defaults
	fn extra_skel(&self) -> FieldParams {
		FieldParams::new()
	}

	/// Every parameter key a field of this type carries, with defaults
	fn schema_skel(&self) -> FieldParams {
		let mut skel = common_skel(self.type_key());
		skel.extend(self.extra_skel());
		skel
	}

	/// Turn a configured default into the value written to documents
	fn coerce_default(&self, value: &Value) -> SchemaResult<Bson>;

	/// Embedded document type held by a field with these parameters
	fn embedded_target<'a>(&self, _params: &'a FieldParams) -> Option<(&'a str, Embedding)> {
		None
	}

	/// Converter used when another field type changes into this one
	fn converter(&self) -> Option<Converter> {
		None
	}
}

fn common_skel(type_key: &str) -> FieldParams {
	[
		("db_field", Value::Null),
		("required", json!(false)),
		("default", Value::Null),
		("unique", json!(false)),
		("unique_with", Value::Null),
		("primary_key", json!(false)),
		("choices", Value::Null),
		("null", json!(false)),
		("sparse", json!(false)),
		("type_key", json!(type_key)),
	]
	.into_iter()
	.map(|(key, value)| (key.to_string(), value))
	.collect()
}

fn skel(pairs: &[&str]) -> FieldParams {
	pairs
		.iter()
		.map(|key| (key.to_string(), Value::Null))
		.collect()
}

fn invalid_default(type_key: &str, value: &Value) -> SchemaError {
	SchemaError::InvalidDefault {
		field: type_key.to_string(),
		message: format!("{} is not a valid {} value", value, type_key),
	}
}

pub struct StringFieldHandler;

impl FieldHandler for StringFieldHandler {
	fn type_key(&self) -> &str {
		"StringField"
	}

	fn extra_skel(&self) -> FieldParams {
		skel(&["max_length", "min_length", "regex"])
	}

	fn coerce_default(&self, value: &Value) -> SchemaResult<Bson> {
		value
			.as_str()
			.map(|s| Bson::String(s.to_string()))
			.ok_or_else(|| invalid_default(self.type_key(), value))
	}

	fn converter(&self) -> Option<Converter> {
		Some(Converter::ToString)
	}
}

/// Stored representation of a numeric field type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericKind {
	Int32,
	Int64,
	Double,
}

pub struct NumericFieldHandler {
	type_key: &'static str,
	kind: NumericKind,
}

impl NumericFieldHandler {
	pub const fn new(type_key: &'static str, kind: NumericKind) -> Self {
		Self { type_key, kind }
	}
}

impl FieldHandler for NumericFieldHandler {
	fn type_key(&self) -> &str {
		self.type_key
	}

	fn extra_skel(&self) -> FieldParams {
		skel(&["min_value", "max_value"])
	}

	fn coerce_default(&self, value: &Value) -> SchemaResult<Bson> {
		let coerced = match self.kind {
			NumericKind::Int32 => value
				.as_i64()
				.and_then(|i| i32::try_from(i).ok())
				.map(Bson::Int32),
			NumericKind::Int64 => value.as_i64().map(Bson::Int64),
			NumericKind::Double => value.as_f64().map(Bson::Double),
		};
		coerced.ok_or_else(|| invalid_default(self.type_key, value))
	}

	fn converter(&self) -> Option<Converter> {
		Some(match self.kind {
			NumericKind::Int32 => Converter::ToInt32,
			NumericKind::Int64 => Converter::ToInt64,
			NumericKind::Double => Converter::ToDouble,
		})
	}
}

pub struct BooleanFieldHandler;

impl FieldHandler for BooleanFieldHandler {
	fn type_key(&self) -> &str {
		"BooleanField"
	}

	fn coerce_default(&self, value: &Value) -> SchemaResult<Bson> {
		value
			.as_bool()
			.map(Bson::Boolean)
			.ok_or_else(|| invalid_default(self.type_key(), value))
	}

	fn converter(&self) -> Option<Converter> {
		Some(Converter::ToBool)
	}
}

/// Accepts RFC 3339 strings or milliseconds since the epoch
pub struct DateTimeFieldHandler;

impl FieldHandler for DateTimeFieldHandler {
	fn type_key(&self) -> &str {
		"DateTimeField"
	}

	fn coerce_default(&self, value: &Value) -> SchemaResult<Bson> {
		match value {
			Value::String(s) => DateTime::parse_rfc3339_str(s)
				.map(Bson::DateTime)
				.map_err(|_| invalid_default(self.type_key(), value)),
			Value::Number(n) => n
				.as_i64()
				.map(|millis| Bson::DateTime(DateTime::from_millis(millis)))
				.ok_or_else(|| invalid_default(self.type_key(), value)),
			_ => Err(invalid_default(self.type_key(), value)),
		}
	}
}

/// Object id fields; also used for references, which store the target id
pub struct ObjectIdFieldHandler {
	type_key: &'static str,
}

impl ObjectIdFieldHandler {
	pub const fn new(type_key: &'static str) -> Self {
		Self { type_key }
	}
}

impl FieldHandler for ObjectIdFieldHandler {
	fn type_key(&self) -> &str {
		self.type_key
	}

	fn extra_skel(&self) -> FieldParams {
		if self.type_key == "ReferenceField" {
			skel(&["target_doctype"])
		} else {
			FieldParams::new()
		}
	}

	fn coerce_default(&self, value: &Value) -> SchemaResult<Bson> {
		value
			.as_str()
			.and_then(|s| ObjectId::parse_str(s).ok())
			.map(Bson::ObjectId)
			.ok_or_else(|| invalid_default(self.type_key, value))
	}
}

pub struct ListFieldHandler;

impl FieldHandler for ListFieldHandler {
	fn type_key(&self) -> &str {
		"ListField"
	}

	fn extra_skel(&self) -> FieldParams {
		skel(&["max_length"])
	}

	fn coerce_default(&self, value: &Value) -> SchemaResult<Bson> {
		match value {
			Value::Array(_) => Ok(json_to_bson(value)),
			_ => Err(invalid_default(self.type_key(), value)),
		}
	}

	fn converter(&self) -> Option<Converter> {
		Some(Converter::ItemToList)
	}
}

pub struct DictFieldHandler;

impl FieldHandler for DictFieldHandler {
	fn type_key(&self) -> &str {
		"DictField"
	}

	fn coerce_default(&self, value: &Value) -> SchemaResult<Bson> {
		match value {
			Value::Object(_) => Ok(json_to_bson(value)),
			_ => Err(invalid_default(self.type_key(), value)),
		}
	}
}

pub struct EmbeddedDocumentFieldHandler {
	embedding: Embedding,
}

impl EmbeddedDocumentFieldHandler {
	pub const fn single() -> Self {
		Self {
			embedding: Embedding::Single,
		}
	}

	pub const fn many() -> Self {
		Self {
			embedding: Embedding::Many,
		}
	}
}

impl FieldHandler for EmbeddedDocumentFieldHandler {
	fn type_key(&self) -> &str {
		match self.embedding {
			Embedding::Single => "EmbeddedDocumentField",
			Embedding::Many => "EmbeddedDocumentListField",
		}
	}

	fn extra_skel(&self) -> FieldParams {
		match self.embedding {
			Embedding::Single => skel(&["target_doctype"]),
			Embedding::Many => skel(&["target_doctype", "max_length"]),
		}
	}

	fn coerce_default(&self, value: &Value) -> SchemaResult<Bson> {
		let valid = match (self.embedding, value) {
			(Embedding::Single, Value::Object(_)) => true,
			(Embedding::Many, Value::Array(items)) => items.iter().all(Value::is_object),
			_ => false,
		};
		if valid {
			Ok(json_to_bson(value))
		} else {
			Err(invalid_default(self.type_key(), value))
		}
	}

	fn embedded_target<'a>(&self, params: &'a FieldParams) -> Option<(&'a str, Embedding)> {
		params
			.get("target_doctype")
			.and_then(Value::as_str)
			.map(|target| (target, self.embedding))
	}
}

/// Registry mapping `type_key` strings to handlers
///
/// # Example
///
/// ```rust,ignore
/// use reinhardt_nosql_migrations::migrations::FieldHandlerRegistry;
/// use serde_json::json;
///
/// let registry = FieldHandlerRegistry::with_defaults();
/// let params = registry.build_params("StringField", [("required", json!(true))])?;
/// assert_eq!(params["type_key"], json!("StringField"));
/// ```
#[derive(Clone, Default)]
pub struct FieldHandlerRegistry {
	handlers: HashMap<String, Arc<dyn FieldHandler>>,
}

impl std::fmt::Debug for FieldHandlerRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let keys: BTreeSet<&String> = self.handlers.keys().collect();
		f.debug_struct("FieldHandlerRegistry")
			.field("type_keys", &keys)
			.finish()
	}
}

impl FieldHandlerRegistry {
	/// Create an empty registry
	pub fn new() -> Self {
		Self::default()
	}

	/// Create a registry with every built-in field type
	pub fn with_defaults() -> Self {
		let mut registry = Self::new();
		registry.register(StringFieldHandler);
		registry.register(NumericFieldHandler::new("IntField", NumericKind::Int32));
		registry.register(NumericFieldHandler::new("LongField", NumericKind::Int64));
		registry.register(NumericFieldHandler::new("FloatField", NumericKind::Double));
		registry.register(NumericFieldHandler::new("DecimalField", NumericKind::Double));
		registry.register(BooleanFieldHandler);
		registry.register(DateTimeFieldHandler);
		registry.register(ObjectIdFieldHandler::new("ObjectIdField"));
		registry.register(ObjectIdFieldHandler::new("ReferenceField"));
		registry.register(ListFieldHandler);
		registry.register(DictFieldHandler);
		registry.register(EmbeddedDocumentFieldHandler::single());
		registry.register(EmbeddedDocumentFieldHandler::many());
		registry
	}

	/// Register a handler, replacing any previous one with the same key
	pub fn register<H: FieldHandler + 'static>(&mut self, handler: H) {
		self.handlers
			.insert(handler.type_key().to_string(), Arc::new(handler));
	}

	/// Look up a handler by type key
	pub fn get(&self, type_key: &str) -> SchemaResult<&dyn FieldHandler> {
		self.handlers
			.get(type_key)
			.map(|handler| handler.as_ref())
			.ok_or_else(|| SchemaError::UnknownTypeKey(type_key.to_string()))
	}

	/// Look up the handler of a field from its `type_key` parameter
	pub fn handler_for(
		&self,
		document_type: &str,
		field: &str,
		params: &FieldParams,
	) -> SchemaResult<&dyn FieldHandler> {
		let type_key = params
			.get("type_key")
			.and_then(Value::as_str)
			.ok_or_else(|| SchemaError::MalformedField {
				document_type: document_type.to_string(),
				field: field.to_string(),
				message: "missing type_key".to_string(),
			})?;
		self.get(type_key)
	}

	/// Field parameters for `type_key`: the skeleton with `overrides` applied
	///
	/// Overriding a key outside the skeleton is an error.
	pub fn build_params<'k, I>(&self, type_key: &str, overrides: I) -> SchemaResult<FieldParams>
	where
		I: IntoIterator<Item = (&'k str, Value)>,
	{
		let mut params = self.get(type_key)?.schema_skel();
		for (key, value) in overrides {
			match params.get_mut(key) {
				Some(slot) => *slot = value,
				None => {
					return Err(SchemaError::MalformedField {
						document_type: String::new(),
						field: String::new(),
						message: format!("{} has no parameter {}", type_key, key),
					});
				}
			}
		}
		Ok(params)
	}

	/// Check a field carries exactly its handler's skeleton keys
	pub fn validate_field(
		&self,
		document_type: &str,
		field: &str,
		params: &FieldParams,
	) -> SchemaResult<()> {
		let handler = self.handler_for(document_type, field, params)?;
		let expected: BTreeSet<String> = handler.schema_skel().into_keys().collect();
		let actual: BTreeSet<String> = params.keys().cloned().collect();
		if expected == actual {
			return Ok(());
		}
		let missing: Vec<&String> = expected.difference(&actual).collect();
		let extra: Vec<&String> = actual.difference(&expected).collect();
		Err(SchemaError::MalformedField {
			document_type: document_type.to_string(),
			field: field.to_string(),
			message: format!("missing keys {:?}, unexpected keys {:?}", missing, extra),
		})
	}

	/// Validate every field of every document type
	pub fn validate_schema(&self, schema: &Schema) -> SchemaResult<()> {
		for (document_type, document) in schema.iter() {
			for (field, params) in &document.fields {
				self.validate_field(document_type, field, params)?;
			}
		}
		Ok(())
	}

	/// Stored default of a field, or `None` when no default is configured
	pub fn default_value(
		&self,
		document_type: &str,
		field: &str,
		params: &FieldParams,
	) -> SchemaResult<Option<Bson>> {
		match params.get("default") {
			None | Some(Value::Null) => Ok(None),
			Some(value) => self
				.handler_for(document_type, field, params)?
				.coerce_default(value)
				.map(Some)
				.map_err(|err| match err {
					SchemaError::InvalidDefault { message, .. } => SchemaError::InvalidDefault {
						field: format!("{}.{}", document_type, field),
						message,
					},
					other => other,
				}),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::{fixture, rstest};

	#[fixture]
	fn registry() -> FieldHandlerRegistry {
		FieldHandlerRegistry::with_defaults()
	}

	#[rstest]
	fn test_unknown_type_key(registry: FieldHandlerRegistry) {
		assert_eq!(
			registry.get("GeoPointField").err(),
			Some(SchemaError::UnknownTypeKey("GeoPointField".to_string()))
		);
	}

	#[rstest]
	fn test_string_skel(registry: FieldHandlerRegistry) {
		let skel = registry.get("StringField").unwrap().schema_skel();
		for key in [
			"db_field",
			"required",
			"default",
			"unique",
			"unique_with",
			"primary_key",
			"choices",
			"null",
			"sparse",
			"type_key",
			"max_length",
			"min_length",
			"regex",
		] {
			assert!(skel.contains_key(key), "missing {}", key);
		}
		assert_eq!(skel.len(), 13);
		assert_eq!(skel["type_key"], json!("StringField"));
	}

	#[rstest]
	#[case("StringField", json!("x"), Bson::String("x".to_string()))]
	#[case("IntField", json!(5), Bson::Int32(5))]
	#[case("LongField", json!(5), Bson::Int64(5))]
	#[case("FloatField", json!(1.5), Bson::Double(1.5))]
	#[case("BooleanField", json!(true), Bson::Boolean(true))]
	#[case("ListField", json!([1]), Bson::Array(vec![Bson::Int32(1)]))]
	fn test_coerce_default(
		registry: FieldHandlerRegistry,
		#[case] type_key: &str,
		#[case] value: Value,
		#[case] expected: Bson,
	) {
		let coerced = registry.get(type_key).unwrap().coerce_default(&value).unwrap();
		assert_eq!(coerced, expected);
	}

	#[rstest]
	#[case("IntField", json!("five"))]
	#[case("IntField", json!(5_000_000_000_i64))]
	#[case("ObjectIdField", json!("not-an-id"))]
	#[case("EmbeddedDocumentListField", json!([1, 2]))]
	fn test_coerce_default_rejects(
		registry: FieldHandlerRegistry,
		#[case] type_key: &str,
		#[case] value: Value,
	) {
		let result = registry.get(type_key).unwrap().coerce_default(&value);
		assert!(matches!(result, Err(SchemaError::InvalidDefault { .. })));
	}

	#[rstest]
	fn test_embedded_target(registry: FieldHandlerRegistry) {
		let params = registry
			.build_params(
				"EmbeddedDocumentListField",
				[("target_doctype", json!("~Item"))],
			)
			.unwrap();
		let handler = registry.get("EmbeddedDocumentListField").unwrap();
		assert_eq!(handler.embedded_target(&params), Some(("~Item", Embedding::Many)));
	}

	#[rstest]
	fn test_validate_field_rejects_partial_params(registry: FieldHandlerRegistry) {
		let mut params = registry.build_params("IntField", []).unwrap();
		params.remove("min_value");
		params.insert("bogus".to_string(), Value::Null);

		let result = registry.validate_field("Doc", "count", &params);

		assert!(matches!(result, Err(SchemaError::MalformedField { .. })));
	}

	#[rstest]
	fn test_build_params_rejects_unknown_key(registry: FieldHandlerRegistry) {
		let result = registry.build_params("BooleanField", [("max_length", json!(3))]);
		assert!(result.is_err());
	}

	#[rstest]
	#[case(Converter::ToString, Bson::Int32(3), Some(Bson::String("3".to_string())))]
	#[case(Converter::ToInt32, Bson::String(" 42 ".to_string()), Some(Bson::Int32(42)))]
	#[case(Converter::ToInt32, Bson::Int64(i64::MAX), None)]
	#[case(Converter::ToDouble, Bson::Int64(2), Some(Bson::Double(2.0)))]
	#[case(Converter::ToBool, Bson::String("yes".to_string()), None)]
	#[case(Converter::ItemToList, Bson::Int32(1), Some(Bson::Array(vec![Bson::Int32(1)])))]
	#[case(Converter::ToInt64, Bson::Null, Some(Bson::Null))]
	fn test_converters(#[case] converter: Converter, #[case] value: Bson, #[case] expected: Option<Bson>) {
		assert_eq!(converter.convert(&value), expected);
	}
}
