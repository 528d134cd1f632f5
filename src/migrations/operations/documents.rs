//! Top-level document type actions
//!
//! Top-level document types own a collection. Creating one touches nothing
//! (the store creates collections on first insert), dropping one drops its
//! collection, and altering its `collection` parameter renames the collection.
//!
//! Several types may share one collection, as inherited document types do
//! (they declare `inherit`). A shared collection is never dropped or renamed
//! on behalf of a single type.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::{Action, DocumentEdit, MigrationContext, StepPlan, StoreStep};
use crate::migrations::autodetector::{SimilarityConfig, detect_document_renames};
use crate::migrations::config::MigrationPolicy;
use crate::migrations::patch::{PatchOp, SchemaPatch};
use crate::migrations::paths::DocumentPath;
use crate::migrations::schema::{DocumentSchema, Schema, is_embedded};
use crate::migrations::{Result, SchemaError, SchemaResult};

pub(super) fn expect_kind(document_type: &str, embedded: bool) -> SchemaResult<()> {
	if is_embedded(document_type) == embedded {
		return Ok(());
	}
	Err(SchemaError::MalformedDocument {
		document_type: document_type.to_string(),
		message: if embedded {
			"not an embedded document type".to_string()
		} else {
			"embedded document types have no collection".to_string()
		},
	})
}

pub(super) fn create_patch(
	document_type: &str,
	parameters: &BTreeMap<String, Value>,
	schema: &Schema,
) -> SchemaResult<SchemaPatch> {
	if schema.contains(document_type) {
		return Err(SchemaError::DocumentExists(document_type.to_string()));
	}
	Ok(SchemaPatch::single(PatchOp::AddDocument {
		document_type: document_type.to_string(),
		document: DocumentSchema {
			parameters: parameters.clone(),
			..Default::default()
		},
	}))
}

pub(super) fn drop_patch(document_type: &str, schema: &Schema) -> SchemaResult<SchemaPatch> {
	Ok(SchemaPatch::single(PatchOp::RemoveDocument {
		document_type: document_type.to_string(),
		document: schema.get(document_type)?.clone(),
	}))
}

pub(super) fn rename_patch(
	document_type: &str,
	new_name: &str,
	schema: &Schema,
) -> SchemaResult<SchemaPatch> {
	schema.get(document_type)?;
	if schema.contains(new_name) {
		return Err(SchemaError::DocumentExists(new_name.to_string()));
	}
	Ok(SchemaPatch::single(PatchOp::RenameDocument {
		from: document_type.to_string(),
		to: new_name.to_string(),
	}))
}

pub(super) fn alter_patch(
	document_type: &str,
	parameters: &BTreeMap<String, Value>,
	schema: &Schema,
) -> SchemaResult<SchemaPatch> {
	Ok(SchemaPatch::single(PatchOp::ChangeParameters {
		document_type: document_type.to_string(),
		old: schema.get(document_type)?.parameters.clone(),
		new: parameters.clone(),
	}))
}

/// Top-level types other than `document_type` stored in `collection`
fn collection_users<'a>(
	schema: &'a Schema,
	collection: &str,
	document_type: &str,
) -> Vec<&'a str> {
	schema
		.iter()
		.filter(|(name, document)| {
			*name != document_type && !is_embedded(name) && document.collection() == Some(collection)
		})
		.map(|(name, _)| name)
		.collect()
}

/// Whether `collection` may be dropped or renamed for `document_type` alone
fn owns_collection(schema: &Schema, collection: &str, document_type: &str) -> bool {
	let users = collection_users(schema, collection, document_type);
	if users.is_empty() {
		return true;
	}
	tracing::warn!(
		document_type,
		collection,
		shared_with = ?users,
		"collection is shared with other document types, leaving it in place"
	);
	false
}

/// Edit removing undeclared keys when a document type stops being dynamic
pub(super) fn dynamic_cleanup(
	left: &DocumentSchema,
	parameters: &BTreeMap<String, Value>,
	paths: impl FnOnce() -> SchemaResult<Vec<DocumentPath>>,
) -> SchemaResult<Option<StoreStep>> {
	let stays_dynamic = parameters
		.get("dynamic")
		.and_then(Value::as_bool)
		.unwrap_or(false);
	if !left.is_dynamic() || stays_dynamic {
		return Ok(None);
	}
	Ok(Some(StoreStep::Edit {
		paths: paths()?,
		edits: vec![DocumentEdit::RetainKeys(left.db_fields().into_iter().collect())],
	}))
}

/// Start tracking a new top-level document type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateDocument {
	pub document_type: String,
	pub parameters: BTreeMap<String, Value>,
}

impl CreateDocument {
	pub fn new(document_type: impl Into<String>, parameters: BTreeMap<String, Value>) -> Self {
		Self {
			document_type: document_type.into(),
			parameters,
		}
	}

	/// Applies when `document_type` is top-level and only `right` has it
	pub fn build_object(document_type: &str, left: &Schema, right: &Schema) -> Option<Action> {
		if is_embedded(document_type) || left.contains(document_type) {
			return None;
		}
		let document = right.get(document_type).ok()?;
		Some(Self::new(document_type, document.parameters.clone()).into())
	}

	pub fn to_schema_patch(&self, schema: &Schema) -> SchemaResult<SchemaPatch> {
		expect_kind(&self.document_type, false)?;
		create_patch(&self.document_type, &self.parameters, schema)
	}

	pub(super) fn plan(
		&self,
		schema: &Schema,
		_policy: MigrationPolicy,
		_context: &MigrationContext,
	) -> Result<StepPlan> {
		let backward = self
			.parameters
			.get("collection")
			.and_then(Value::as_str)
			.filter(|collection| owns_collection(schema, collection, &self.document_type))
			.map(|collection| StoreStep::DropCollection(collection.to_string()))
			.into_iter()
			.collect();
		Ok(StepPlan {
			forward: Vec::new(),
			backward,
		})
	}
}

/// Stop tracking a top-level document type and drop its collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropDocument {
	pub document_type: String,
}

impl DropDocument {
	pub fn new(document_type: impl Into<String>) -> Self {
		Self {
			document_type: document_type.into(),
		}
	}

	/// Applies when `document_type` is top-level and only `left` has it
	pub fn build_object(document_type: &str, left: &Schema, right: &Schema) -> Option<Action> {
		if is_embedded(document_type)
			|| !left.contains(document_type)
			|| right.contains(document_type)
		{
			return None;
		}
		Some(Self::new(document_type).into())
	}

	pub fn to_schema_patch(&self, schema: &Schema) -> SchemaResult<SchemaPatch> {
		expect_kind(&self.document_type, false)?;
		drop_patch(&self.document_type, schema)
	}

	pub(super) fn plan(
		&self,
		schema: &Schema,
		_policy: MigrationPolicy,
		_context: &MigrationContext,
	) -> Result<StepPlan> {
		let forward = schema
			.get(&self.document_type)?
			.collection()
			.filter(|collection| owns_collection(schema, collection, &self.document_type))
			.map(|collection| StoreStep::DropCollection(collection.to_string()))
			.into_iter()
			.collect();
		Ok(StepPlan {
			forward,
			backward: Vec::new(),
		})
	}
}

/// Rename a top-level document type; the collection is untouched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenameDocument {
	pub document_type: String,
	pub new_name: String,
}

impl RenameDocument {
	pub fn new(document_type: impl Into<String>, new_name: impl Into<String>) -> Self {
		Self {
			document_type: document_type.into(),
			new_name: new_name.into(),
		}
	}

	/// Applies when `document_type` only exists in `left` and exactly one
	/// top-level type only in `right` is similar enough to it
	pub fn build_object(
		document_type: &str,
		left: &Schema,
		right: &Schema,
		similarity: &SimilarityConfig,
	) -> Option<Action> {
		if is_embedded(document_type) {
			return None;
		}
		detect_document_renames(left, right, similarity)
			.into_iter()
			.find(|(from, _)| from == document_type)
			.map(|(from, to)| Self::new(from, to).into())
	}

	pub fn to_schema_patch(&self, schema: &Schema) -> SchemaResult<SchemaPatch> {
		expect_kind(&self.document_type, false)?;
		expect_kind(&self.new_name, false)?;
		rename_patch(&self.document_type, &self.new_name, schema)
	}

	pub(super) fn plan(
		&self,
		_schema: &Schema,
		_policy: MigrationPolicy,
		_context: &MigrationContext,
	) -> Result<StepPlan> {
		Ok(StepPlan::schema_only())
	}
}

/// Change document-level parameters of a top-level document type
///
/// A changed `collection` renames the live collection when the old one
/// exists; nothing happens otherwise, in either direction. A direction is
/// skipped when another type still stores its documents in the collection it
/// would rename. Turning `dynamic`
/// off strips undeclared keys from stored documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlterDocument {
	pub document_type: String,
	pub parameters: BTreeMap<String, Value>,
}

impl AlterDocument {
	pub fn new(document_type: impl Into<String>, parameters: BTreeMap<String, Value>) -> Self {
		Self {
			document_type: document_type.into(),
			parameters,
		}
	}

	/// Applies when both schemas have the top-level type with different parameters
	pub fn build_object(document_type: &str, left: &Schema, right: &Schema) -> Option<Action> {
		if is_embedded(document_type) {
			return None;
		}
		let (left, right) = (left.get(document_type).ok()?, right.get(document_type).ok()?);
		(left.parameters != right.parameters)
			.then(|| Action::from(Self::new(document_type, right.parameters.clone())))
	}

	pub fn to_schema_patch(&self, schema: &Schema) -> SchemaResult<SchemaPatch> {
		expect_kind(&self.document_type, false)?;
		alter_patch(&self.document_type, &self.parameters, schema)
	}

	/// New `collection` parameter, if any
	pub fn collection(&self) -> Option<&str> {
		self.parameters.get("collection").and_then(Value::as_str)
	}

	pub(super) fn plan(
		&self,
		schema: &Schema,
		_policy: MigrationPolicy,
		_context: &MigrationContext,
	) -> Result<StepPlan> {
		let left = schema.get(&self.document_type)?;
		let mut plan = StepPlan::default();

		if let (Some(old), Some(new)) = (left.collection(), self.collection())
			&& old != new
		{
			if owns_collection(schema, old, &self.document_type) {
				plan.forward.push(StoreStep::RenameCollection {
					from: old.to_string(),
					to: new.to_string(),
				});
			}
			if owns_collection(schema, new, &self.document_type) {
				plan.backward.push(StoreStep::RenameCollection {
					from: new.to_string(),
					to: old.to_string(),
				});
			}
		}

		let collection = self.collection().or(left.collection());
		if let Some(collection) = collection {
			let root = DocumentPath {
				root_document_type: self.document_type.clone(),
				collection: collection.to_string(),
				steps: Vec::new(),
			};
			if let Some(step) = dynamic_cleanup(left, &self.parameters, || Ok(vec![root]))? {
				plan.forward.push(step);
			}
		}
		Ok(plan)
	}
}
