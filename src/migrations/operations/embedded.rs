//! Embedded document type actions
//!
//! Embedded document types have no collection of their own, so creating,
//! dropping and renaming them only edits the schema. Their data changes
//! through field actions on the documents that embed them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::documents::{alter_patch, create_patch, drop_patch, dynamic_cleanup, expect_kind, rename_patch};
use super::{Action, MigrationContext, StepPlan};
use crate::migrations::autodetector::{SimilarityConfig, detect_document_renames};
use crate::migrations::config::MigrationPolicy;
use crate::migrations::patch::SchemaPatch;
use crate::migrations::schema::{Schema, is_embedded};
use crate::migrations::{Result, SchemaResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateEmbedded {
	pub document_type: String,
	pub parameters: BTreeMap<String, Value>,
}

impl CreateEmbedded {
	pub fn new(document_type: impl Into<String>, parameters: BTreeMap<String, Value>) -> Self {
		Self {
			document_type: document_type.into(),
			parameters,
		}
	}

	pub fn build_object(document_type: &str, left: &Schema, right: &Schema) -> Option<Action> {
		if !is_embedded(document_type) || left.contains(document_type) {
			return None;
		}
		let document = right.get(document_type).ok()?;
		Some(Self::new(document_type, document.parameters.clone()).into())
	}

	pub fn to_schema_patch(&self, schema: &Schema) -> SchemaResult<SchemaPatch> {
		expect_kind(&self.document_type, true)?;
		create_patch(&self.document_type, &self.parameters, schema)
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

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropEmbedded {
	pub document_type: String,
}

impl DropEmbedded {
	pub fn new(document_type: impl Into<String>) -> Self {
		Self {
			document_type: document_type.into(),
		}
	}

	pub fn build_object(document_type: &str, left: &Schema, right: &Schema) -> Option<Action> {
		if !is_embedded(document_type)
			|| !left.contains(document_type)
			|| right.contains(document_type)
		{
			return None;
		}
		Some(Self::new(document_type).into())
	}

	pub fn to_schema_patch(&self, schema: &Schema) -> SchemaResult<SchemaPatch> {
		expect_kind(&self.document_type, true)?;
		drop_patch(&self.document_type, schema)
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

/// Rename an embedded document type in the schema
///
/// Stored documents are never touched in either direction: fields pointing
/// at the type are updated by their own field actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenameEmbedded {
	pub document_type: String,
	pub new_name: String,
}

impl RenameEmbedded {
	pub fn new(document_type: impl Into<String>, new_name: impl Into<String>) -> Self {
		Self {
			document_type: document_type.into(),
			new_name: new_name.into(),
		}
	}

	pub fn build_object(
		document_type: &str,
		left: &Schema,
		right: &Schema,
		similarity: &SimilarityConfig,
	) -> Option<Action> {
		if !is_embedded(document_type) {
			return None;
		}
		detect_document_renames(left, right, similarity)
			.into_iter()
			.find(|(from, _)| from == document_type)
			.map(|(from, to)| Self::new(from, to).into())
	}

	pub fn to_schema_patch(&self, schema: &Schema) -> SchemaResult<SchemaPatch> {
		expect_kind(&self.document_type, true)?;
		expect_kind(&self.new_name, true)?;
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

/// Change parameters of an embedded document type
///
/// Turning `dynamic` off strips undeclared keys wherever the type is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlterEmbedded {
	pub document_type: String,
	pub parameters: BTreeMap<String, Value>,
}

impl AlterEmbedded {
	pub fn new(document_type: impl Into<String>, parameters: BTreeMap<String, Value>) -> Self {
		Self {
			document_type: document_type.into(),
			parameters,
		}
	}

	pub fn build_object(document_type: &str, left: &Schema, right: &Schema) -> Option<Action> {
		if !is_embedded(document_type) {
			return None;
		}
		let (left, right) = (left.get(document_type).ok()?, right.get(document_type).ok()?);
		(left.parameters != right.parameters)
			.then(|| Action::from(Self::new(document_type, right.parameters.clone())))
	}

	pub fn to_schema_patch(&self, schema: &Schema) -> SchemaResult<SchemaPatch> {
		expect_kind(&self.document_type, true)?;
		alter_patch(&self.document_type, &self.parameters, schema)
	}

	pub(super) fn plan(
		&self,
		schema: &Schema,
		_policy: MigrationPolicy,
		context: &MigrationContext,
	) -> Result<StepPlan> {
		let left = schema.get(&self.document_type)?;
		let cleanup = dynamic_cleanup(left, &self.parameters, || {
			context.resolve_paths(schema, &self.document_type)
		})?;
		Ok(StepPlan {
			forward: cleanup.into_iter().collect(),
			backward: Vec::new(),
		})
	}
}
