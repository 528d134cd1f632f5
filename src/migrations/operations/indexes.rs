//! Index actions
//!
//! Indexes belong to top-level document types and live on their collection.
//! Index parameters carry the indexed keys under `fields`, as
//! `[key, direction]` pairs; every other parameter is passed to the store as
//! an index option.

use bson::{Bson, Document};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::documents::expect_kind;
use super::{Action, MigrationContext, StepPlan, StoreStep};
use crate::migrations::config::MigrationPolicy;
use crate::migrations::patch::{PatchOp, SchemaPatch};
use crate::migrations::schema::{IndexParams, Schema, is_embedded, json_to_bson};
use crate::migrations::{Result, SchemaError, SchemaResult};

const INDEX_KINDS: [&str; 3] = ["text", "hashed", "2dsphere"];

fn malformed(document_type: &str, index: &str, message: impl Into<String>) -> SchemaError {
	SchemaError::MalformedIndex {
		document_type: document_type.to_string(),
		index: index.to_string(),
		message: message.into(),
	}
}

fn index_direction(document_type: &str, index: &str, value: &Value) -> SchemaResult<Bson> {
	match value {
		Value::Number(n) if matches!(n.as_i64(), Some(1) | Some(-1)) => {
			Ok(Bson::Int32(if n.as_i64() == Some(1) { 1 } else { -1 }))
		}
		Value::String(kind) if INDEX_KINDS.contains(&kind.as_str()) => Ok(Bson::String(kind.clone())),
		other => Err(malformed(
			document_type,
			index,
			format!("unsupported index direction {}", other),
		)),
	}
}

/// Key document and options of an index definition
pub fn index_spec(
	document_type: &str,
	index: &str,
	params: &IndexParams,
) -> SchemaResult<(Document, Document)> {
	let Some(Value::Array(fields)) = params.get("fields") else {
		return Err(malformed(document_type, index, "'fields' must be a list"));
	};
	if fields.is_empty() {
		return Err(malformed(document_type, index, "'fields' is empty"));
	}

	let mut keys = Document::new();
	for entry in fields {
		let pair = entry.as_array().map(Vec::as_slice);
		let Some([Value::String(key), direction]) = pair else {
			return Err(malformed(
				document_type,
				index,
				format!("index key {} is not a [key, direction] pair", entry),
			));
		};
		if keys.contains_key(key) {
			return Err(malformed(document_type, index, format!("key '{}' appears twice", key)));
		}
		keys.insert(key.clone(), index_direction(document_type, index, direction)?);
	}

	let mut options = Document::new();
	for (option, value) in params.iter().filter(|(option, _)| option.as_str() != "fields") {
		if option == "name" {
			return Err(malformed(document_type, index, "the index name is not an option"));
		}
		options.insert(option.clone(), json_to_bson(value));
	}
	Ok((keys, options))
}

fn collection_of(schema: &Schema, document_type: &str) -> SchemaResult<String> {
	schema
		.get(document_type)?
		.collection()
		.map(str::to_string)
		.ok_or_else(|| SchemaError::MalformedDocument {
			document_type: document_type.to_string(),
			message: "no collection to index".to_string(),
		})
}

fn declared<'a>(schema: &'a Schema, document_type: &str, name: &str) -> SchemaResult<&'a IndexParams> {
	schema
		.get(document_type)?
		.indexes
		.get(name)
		.ok_or_else(|| SchemaError::IndexNotFound {
			document_type: document_type.to_string(),
			index: name.to_string(),
		})
}

fn create_step(
	collection: &str,
	document_type: &str,
	name: &str,
	params: &IndexParams,
) -> SchemaResult<StoreStep> {
	let (keys, options) = index_spec(document_type, name, params)?;
	Ok(StoreStep::CreateIndex {
		collection: collection.to_string(),
		name: name.to_string(),
		keys,
		options,
	})
}

fn drop_step(collection: &str, name: &str) -> StoreStep {
	StoreStep::DropIndex {
		collection: collection.to_string(),
		name: name.to_string(),
	}
}

/// Indexes declared on `document_type` in both schemas
fn both_sides<'a>(
	document_type: &str,
	left: &'a Schema,
	right: &'a Schema,
) -> Option<(&'a BTreeMap<String, IndexParams>, &'a BTreeMap<String, IndexParams>)> {
	if is_embedded(document_type) {
		return None;
	}
	Some((
		&left.get(document_type).ok()?.indexes,
		&right.get(document_type).ok()?.indexes,
	))
}

/// Declare a new index on a top-level document type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateIndex {
	pub document_type: String,
	pub name: String,
	pub params: IndexParams,
}

impl CreateIndex {
	pub fn new(document_type: impl Into<String>, name: impl Into<String>, params: IndexParams) -> Self {
		Self {
			document_type: document_type.into(),
			name: name.into(),
			params,
		}
	}

	/// Applies when the type exists on both sides and only `right` declares the index
	pub fn build_object(document_type: &str, name: &str, left: &Schema, right: &Schema) -> Option<Action> {
		let (left, right) = both_sides(document_type, left, right)?;
		if left.contains_key(name) {
			return None;
		}
		let params = right.get(name)?;
		Some(Self::new(document_type, name, params.clone()).into())
	}

	pub fn to_schema_patch(&self, schema: &Schema) -> SchemaResult<SchemaPatch> {
		expect_kind(&self.document_type, false)?;
		if schema.get(&self.document_type)?.indexes.contains_key(&self.name) {
			return Err(SchemaError::IndexExists {
				document_type: self.document_type.clone(),
				index: self.name.clone(),
			});
		}
		index_spec(&self.document_type, &self.name, &self.params)?;
		Ok(SchemaPatch::single(PatchOp::AddIndex {
			document_type: self.document_type.clone(),
			name: self.name.clone(),
			params: self.params.clone(),
		}))
	}

	pub(super) fn plan(
		&self,
		schema: &Schema,
		_policy: MigrationPolicy,
		_context: &MigrationContext,
	) -> Result<StepPlan> {
		let collection = collection_of(schema, &self.document_type)?;
		Ok(StepPlan {
			forward: vec![create_step(&collection, &self.document_type, &self.name, &self.params)?],
			backward: vec![drop_step(&collection, &self.name)],
		})
	}
}

/// Remove an index from a top-level document type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropIndex {
	pub document_type: String,
	pub name: String,
}

impl DropIndex {
	pub fn new(document_type: impl Into<String>, name: impl Into<String>) -> Self {
		Self {
			document_type: document_type.into(),
			name: name.into(),
		}
	}

	/// Applies when the type exists on both sides and only `left` declares the index
	pub fn build_object(document_type: &str, name: &str, left: &Schema, right: &Schema) -> Option<Action> {
		let (left, right) = both_sides(document_type, left, right)?;
		(left.contains_key(name) && !right.contains_key(name))
			.then(|| Action::from(Self::new(document_type, name)))
	}

	pub fn to_schema_patch(&self, schema: &Schema) -> SchemaResult<SchemaPatch> {
		expect_kind(&self.document_type, false)?;
		Ok(SchemaPatch::single(PatchOp::RemoveIndex {
			document_type: self.document_type.clone(),
			name: self.name.clone(),
			params: declared(schema, &self.document_type, &self.name)?.clone(),
		}))
	}

	pub(super) fn plan(
		&self,
		schema: &Schema,
		_policy: MigrationPolicy,
		_context: &MigrationContext,
	) -> Result<StepPlan> {
		let collection = collection_of(schema, &self.document_type)?;
		let old = declared(schema, &self.document_type, &self.name)?;
		Ok(StepPlan {
			forward: vec![drop_step(&collection, &self.name)],
			backward: vec![create_step(&collection, &self.document_type, &self.name, old)?],
		})
	}
}

/// Change the definition of an existing index
///
/// Stores cannot alter an index in place, so both directions drop the index
/// and create it again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlterIndex {
	pub document_type: String,
	pub name: String,
	pub params: IndexParams,
}

impl AlterIndex {
	pub fn new(document_type: impl Into<String>, name: impl Into<String>, params: IndexParams) -> Self {
		Self {
			document_type: document_type.into(),
			name: name.into(),
			params,
		}
	}

	/// Applies when both sides declare the index with different parameters
	pub fn build_object(document_type: &str, name: &str, left: &Schema, right: &Schema) -> Option<Action> {
		let (left, right) = both_sides(document_type, left, right)?;
		let (old, new) = (left.get(name)?, right.get(name)?);
		(old != new).then(|| Action::from(Self::new(document_type, name, new.clone())))
	}

	pub fn to_schema_patch(&self, schema: &Schema) -> SchemaResult<SchemaPatch> {
		expect_kind(&self.document_type, false)?;
		let old = declared(schema, &self.document_type, &self.name)?;
		index_spec(&self.document_type, &self.name, &self.params)?;
		Ok(SchemaPatch::single(PatchOp::AlterIndex {
			document_type: self.document_type.clone(),
			name: self.name.clone(),
			old: old.clone(),
			new: self.params.clone(),
		}))
	}

	pub(super) fn plan(
		&self,
		schema: &Schema,
		_policy: MigrationPolicy,
		_context: &MigrationContext,
	) -> Result<StepPlan> {
		let collection = collection_of(schema, &self.document_type)?;
		let old = declared(schema, &self.document_type, &self.name)?;
		Ok(StepPlan {
			forward: vec![
				drop_step(&collection, &self.name),
				create_step(&collection, &self.document_type, &self.name, &self.params)?,
			],
			backward: vec![
				drop_step(&collection, &self.name),
				create_step(&collection, &self.document_type, &self.name, old)?,
			],
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use bson::doc;
	use rstest::rstest;
	use serde_json::json;

	fn params(fields: Value) -> IndexParams {
		[("fields".to_string(), fields)].into_iter().collect()
	}

	#[rstest]
	fn test_index_spec_splits_keys_and_options() {
		let mut params = params(json!([["name", 1], ["age", -1]]));
		params.insert("unique".to_string(), json!(true));

		let (keys, options) = index_spec("User", "name_age", &params).unwrap();

		assert_eq!(keys, doc! { "name": 1, "age": -1 });
		assert_eq!(options, doc! { "unique": true });
	}

	#[rstest]
	#[case(json!([]))]
	#[case(json!("name"))]
	#[case(json!([["name", 2]]))]
	#[case(json!([["name", "sideways"]]))]
	#[case(json!([["name", 1], ["name", -1]]))]
	fn test_index_spec_rejects(#[case] fields: Value) {
		assert!(matches!(
			index_spec("User", "idx", &params(fields)),
			Err(SchemaError::MalformedIndex { .. })
		));
	}

	#[rstest]
	fn test_text_index_kind() {
		let (keys, _) = index_spec("User", "bio_text", &params(json!([["bio", "text"]]))).unwrap();
		assert_eq!(keys, doc! { "bio": "text" });
	}
}
