//! Schema snapshots
//!
//! A [`Schema`] maps document type names to [`DocumentSchema`] entries. Each
//! entry holds the field parameter mappings of that type, document-level
//! parameters such as the backing collection name, and the named indexes of
//! the collection. Embedded document types carry the
//! [`EMBEDDED_DOCUMENT_PREFIX`] and have neither a collection nor indexes.
//!
//! Equality is structural: field order does not matter.

use bson::{Bson, Document};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

use super::patch::SchemaPatch;
use super::{SchemaError, SchemaResult};

/// Prefix that marks a document type as embedded
pub const EMBEDDED_DOCUMENT_PREFIX: &str = "~";

/// Parameter mapping of a single field, keyed by the handler's schema skeleton
pub type FieldParams = BTreeMap<String, Value>;

/// Parameters of a named index: `fields` as `[key, direction]` pairs plus
/// index options such as `unique` or `sparse`
pub type IndexParams = BTreeMap<String, Value>;

/// Returns `true` if `document_type` names an embedded document type
pub fn is_embedded(document_type: &str) -> bool {
	document_type.starts_with(EMBEDDED_DOCUMENT_PREFIX)
}

/// Schema entry of one document type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentSchema {
	#[serde(default)]
	pub fields: IndexMap<String, FieldParams>,
	#[serde(default)]
	pub parameters: BTreeMap<String, Value>,
	#[serde(default)]
	pub indexes: BTreeMap<String, IndexParams>,
}

impl DocumentSchema {
	pub fn new() -> Self {
		Self::default()
	}

	/// Add a field (builder style)
	pub fn with_field(mut self, name: impl Into<String>, params: FieldParams) -> Self {
		self.fields.insert(name.into(), params);
		self
	}

	/// Set a document parameter (builder style)
	pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
		self.parameters.insert(key.into(), value.into());
		self
	}

	/// Add an index (builder style)
	pub fn with_index(mut self, name: impl Into<String>, params: IndexParams) -> Self {
		self.indexes.insert(name.into(), params);
		self
	}

	/// Name of the backing collection, if declared
	pub fn collection(&self) -> Option<&str> {
		self.parameters.get("collection").and_then(Value::as_str)
	}

	/// Whether documents may carry keys not declared in the schema
	pub fn is_dynamic(&self) -> bool {
		self.parameters
			.get("dynamic")
			.and_then(Value::as_bool)
			.unwrap_or(false)
	}

	/// Stored key of every declared field
	pub fn db_fields(&self) -> Vec<String> {
		self.fields
			.iter()
			.map(|(name, params)| db_field(name, params).to_string())
			.collect()
	}
}

/// Stored key of a field: its `db_field` parameter, or the field name
pub fn db_field<'a>(name: &'a str, params: &'a FieldParams) -> &'a str {
	params
		.get("db_field")
		.and_then(Value::as_str)
		.unwrap_or(name)
}

/// Snapshot of every document type known to a migration history
///
/// # Example
///
/// ```rust,ignore
/// use reinhardt_nosql_migrations::migrations::{DocumentSchema, Schema};
///
/// let schema = Schema::new().with_document(
///     "User",
///     DocumentSchema::new().with_parameter("collection", "user"),
/// );
/// assert_eq!(schema.get("User")?.collection(), Some("user"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
	documents: BTreeMap<String, DocumentSchema>,
}

impl Schema {
	pub fn new() -> Self {
		Self::default()
	}

	/// Add a document type (builder style)
	pub fn with_document(mut self, document_type: impl Into<String>, document: DocumentSchema) -> Self {
		self.documents.insert(document_type.into(), document);
		self
	}

	/// Get a document type or fail with [`SchemaError::DocumentNotFound`]
	pub fn get(&self, document_type: &str) -> SchemaResult<&DocumentSchema> {
		self.documents
			.get(document_type)
			.ok_or_else(|| SchemaError::DocumentNotFound(document_type.to_string()))
	}

	pub(crate) fn get_mut(&mut self, document_type: &str) -> SchemaResult<&mut DocumentSchema> {
		self.documents
			.get_mut(document_type)
			.ok_or_else(|| SchemaError::DocumentNotFound(document_type.to_string()))
	}

	/// Get a field's parameters or fail with a [`SchemaError`]
	pub fn field(&self, document_type: &str, field: &str) -> SchemaResult<&FieldParams> {
		self.get(document_type)?
			.fields
			.get(field)
			.ok_or_else(|| SchemaError::FieldNotFound {
				document_type: document_type.to_string(),
				field: field.to_string(),
			})
	}

	pub fn contains(&self, document_type: &str) -> bool {
		self.documents.contains_key(document_type)
	}

	/// Document type names in lexicographic order
	pub fn document_types(&self) -> impl Iterator<Item = &str> {
		self.documents.keys().map(String::as_str)
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &DocumentSchema)> {
		self.documents.iter().map(|(name, doc)| (name.as_str(), doc))
	}

	pub fn len(&self) -> usize {
		self.documents.len()
	}

	pub fn is_empty(&self) -> bool {
		self.documents.is_empty()
	}

	pub(crate) fn insert(&mut self, document_type: String, document: DocumentSchema) {
		self.documents.insert(document_type, document);
	}

	pub(crate) fn remove(&mut self, document_type: &str) -> Option<DocumentSchema> {
		self.documents.remove(document_type)
	}

	/// Apply a patch, returning the new snapshot
	///
	/// The receiver is never modified, so a failing patch leaves no trace.
	pub fn apply_patch(&self, patch: &SchemaPatch) -> SchemaResult<Schema> {
		patch.apply(self)
	}

	/// Encode the snapshot for storage in a document store
	pub fn to_bson(&self) -> Bson {
		let mut root = Document::new();
		for (name, document) in &self.documents {
			let mut fields = Document::new();
			for (field, params) in &document.fields {
				fields.insert(field.clone(), map_to_bson(params));
			}
			let mut entry = Document::new();
			entry.insert("fields", fields);
			entry.insert("parameters", map_to_bson(&document.parameters));
			if !document.indexes.is_empty() {
				let indexes: Document = document
					.indexes
					.iter()
					.map(|(name, params)| (name.clone(), Bson::Document(map_to_bson(params))))
					.collect();
				entry.insert("indexes", indexes);
			}
			root.insert(name.clone(), entry);
		}
		Bson::Document(root)
	}

	/// Decode a snapshot written by [`Schema::to_bson`]
	pub fn from_bson(value: &Bson) -> SchemaResult<Schema> {
		let malformed = |document_type: &str, message: &str| SchemaError::MalformedDocument {
			document_type: document_type.to_string(),
			message: message.to_string(),
		};
		let Bson::Document(root) = value else {
			return Err(malformed("<schema>", "stored schema is not a document"));
		};
		let mut schema = Schema::new();
		for (name, entry) in root {
			let Bson::Document(entry) = entry else {
				return Err(malformed(name, "entry is not a document"));
			};
			let mut document = DocumentSchema::new();
			if let Some(Bson::Document(fields)) = entry.get("fields") {
				for (field, params) in fields {
					let Value::Object(params) = bson_to_json(params) else {
						return Err(malformed(name, "field parameters are not a document"));
					};
					document.fields.insert(field.clone(), params.into_iter().collect());
				}
			}
			if let Some(Value::Object(parameters)) = entry.get("parameters").map(bson_to_json) {
				document.parameters = parameters.into_iter().collect();
			}
			if let Some(Bson::Document(indexes)) = entry.get("indexes") {
				for (index, params) in indexes {
					let Value::Object(params) = bson_to_json(params) else {
						return Err(malformed(name, "index parameters are not a document"));
					};
					document.indexes.insert(index.clone(), params.into_iter().collect());
				}
			}
			schema.insert(name.clone(), document);
		}
		Ok(schema)
	}
}

fn map_to_bson(map: &BTreeMap<String, Value>) -> Document {
	map.iter()
		.map(|(key, value)| (key.clone(), json_to_bson(value)))
		.collect()
}

/// Convert a schema parameter value into its stored representation
pub fn json_to_bson(value: &Value) -> Bson {
	match value {
		Value::Null => Bson::Null,
		Value::Bool(b) => Bson::Boolean(*b),
		Value::Number(n) => {
			if let Some(i) = n.as_i64() {
				i32::try_from(i).map_or(Bson::Int64(i), Bson::Int32)
			} else {
				Bson::Double(n.as_f64().unwrap_or(f64::NAN))
			}
		}
		Value::String(s) => Bson::String(s.clone()),
		Value::Array(items) => Bson::Array(items.iter().map(json_to_bson).collect()),
		Value::Object(map) => Bson::Document(
			map.iter()
				.map(|(key, value)| (key.clone(), json_to_bson(value)))
				.collect(),
		),
	}
}

/// Convert a stored value back into a schema parameter value
pub fn bson_to_json(value: &Bson) -> Value {
	match value {
		Bson::Null | Bson::Undefined => Value::Null,
		Bson::Boolean(b) => Value::Bool(*b),
		Bson::Int32(i) => Value::Number((*i).into()),
		Bson::Int64(i) => Value::Number((*i).into()),
		Bson::Double(f) => Number::from_f64(*f).map_or(Value::Null, Value::Number),
		Bson::String(s) => Value::String(s.clone()),
		Bson::Array(items) => Value::Array(items.iter().map(bson_to_json).collect()),
		Bson::Document(document) => Value::Object(
			document
				.iter()
				.map(|(key, value)| (key.clone(), bson_to_json(value)))
				.collect::<Map<String, Value>>(),
		),
		Bson::ObjectId(oid) => Value::String(oid.to_hex()),
		other => Value::String(other.to_string()),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;
	use serde_json::json;

	fn params(pairs: &[(&str, Value)]) -> FieldParams {
		pairs
			.iter()
			.map(|(key, value)| (key.to_string(), value.clone()))
			.collect()
	}

	#[rstest]
	fn test_get_missing_document() {
		let schema = Schema::new();
		assert_eq!(
			schema.get("Missing"),
			Err(SchemaError::DocumentNotFound("Missing".to_string()))
		);
	}

	#[rstest]
	fn test_equality_ignores_field_order() {
		let a = Schema::new().with_document(
			"Doc",
			DocumentSchema::new()
				.with_field("a", params(&[("db_field", json!("a"))]))
				.with_field("b", params(&[("db_field", json!("b"))])),
		);
		let b = Schema::new().with_document(
			"Doc",
			DocumentSchema::new()
				.with_field("b", params(&[("db_field", json!("b"))]))
				.with_field("a", params(&[("db_field", json!("a"))])),
		);
		assert_eq!(a, b);
	}

	#[rstest]
	#[case("~Embedded", true)]
	#[case("Document", false)]
	fn test_is_embedded(#[case] name: &str, #[case] expected: bool) {
		assert_eq!(is_embedded(name), expected);
	}

	#[rstest]
	fn test_db_field_falls_back_to_name() {
		let with_db_field = params(&[("db_field", json!("stored"))]);
		let without = params(&[("db_field", Value::Null)]);
		assert_eq!(db_field("field", &with_db_field), "stored");
		assert_eq!(db_field("field", &without), "field");
	}

	#[rstest]
	fn test_bson_round_trip() {
		let schema = Schema::new()
			.with_document(
				"Doc",
				DocumentSchema::new()
					.with_parameter("collection", "doc")
					.with_field(
						"name",
						params(&[
							("db_field", json!("name")),
							("required", json!(true)),
							("default", json!(1.5)),
							("choices", json!(["a", "b"])),
						]),
					)
					.with_index(
						"name_unique",
						params(&[("fields", json!([["name", 1]])), ("unique", json!(true))]),
					),
			)
			.with_document("~Emb", DocumentSchema::new());

		let decoded = Schema::from_bson(&schema.to_bson()).unwrap();
		assert_eq!(decoded, schema);
	}
}
