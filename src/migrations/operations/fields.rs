//! Field actions
//!
//! Field actions apply to every stored location of their document type, so
//! the same action works for top-level and embedded document types.

use bson::Bson;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Action, DocumentEdit, MigrationContext, StepPlan, StoreStep, refill_step};
use crate::migrations::autodetector::{SimilarityConfig, detect_field_renames};
use crate::migrations::config::MigrationPolicy;
use crate::migrations::patch::{PatchOp, SchemaPatch};
use crate::migrations::paths::DocumentPath;
use crate::migrations::schema::{FieldParams, Schema, db_field, json_to_bson};
use crate::migrations::{Result, SchemaError, SchemaResult};

/// Primary keys are always required
fn is_required(params: &FieldParams) -> bool {
	["required", "primary_key"]
		.iter()
		.any(|flag| params.get(*flag).and_then(Value::as_bool).unwrap_or(false))
}

fn type_key(params: &FieldParams) -> Option<&str> {
	params.get("type_key").and_then(Value::as_str)
}

/// Both schemas know `document_type`; returns its fields on each side
fn both_sides<'a>(
	document_type: &str,
	left: &'a Schema,
	right: &'a Schema,
) -> Option<(&'a indexmap::IndexMap<String, FieldParams>, &'a indexmap::IndexMap<String, FieldParams>)> {
	Some((
		&left.get(document_type).ok()?.fields,
		&right.get(document_type).ok()?.fields,
	))
}

/// Add a field; required fields with a default get it written where missing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateField {
	pub document_type: String,
	pub field: String,
	pub params: FieldParams,
}

impl CreateField {
	pub fn new(document_type: impl Into<String>, field: impl Into<String>, params: FieldParams) -> Self {
		Self {
			document_type: document_type.into(),
			field: field.into(),
			params,
		}
	}

	pub fn build_object(document_type: &str, field: &str, left: &Schema, right: &Schema) -> Option<Action> {
		let (left_fields, right_fields) = both_sides(document_type, left, right)?;
		if left_fields.contains_key(field) {
			return None;
		}
		let params = right_fields.get(field)?;
		Some(Self::new(document_type, field, params.clone()).into())
	}

	pub fn to_schema_patch(&self, schema: &Schema) -> SchemaResult<SchemaPatch> {
		let document = schema.get(&self.document_type)?;
		if document.fields.contains_key(&self.field) {
			return Err(SchemaError::FieldExists {
				document_type: self.document_type.clone(),
				field: self.field.clone(),
			});
		}
		Ok(SchemaPatch::single(PatchOp::AddField {
			document_type: self.document_type.clone(),
			field: self.field.clone(),
			params: self.params.clone(),
		}))
	}

	pub(super) fn plan(
		&self,
		schema: &Schema,
		_policy: MigrationPolicy,
		context: &MigrationContext,
	) -> Result<StepPlan> {
		context
			.registry
			.validate_field(&self.document_type, &self.field, &self.params)?;
		let paths = context.resolve_paths(schema, &self.document_type)?;
		let key = db_field(&self.field, &self.params).to_string();
		let default = context
			.registry
			.default_value(&self.document_type, &self.field, &self.params)?;

		let mut plan = StepPlan::default();
		if is_required(&self.params) {
			match default {
				Some(value) => plan.forward.push(StoreStep::Edit {
					paths: paths.clone(),
					edits: vec![DocumentEdit::SetMissing {
						key: key.clone(),
						value,
					}],
				}),
				None => tracing::warn!(
					document_type = %self.document_type,
					field = %self.field,
					"required field created without a default, existing documents lack it"
				),
			}
		}
		plan.backward.push(StoreStep::Edit {
			paths,
			edits: vec![DocumentEdit::Unset(key)],
		});
		Ok(plan)
	}
}

/// Remove a field from every stored location of its document type
///
/// Backward brings the field back only when it is required and has a
/// default, and never overwrites a value a document already holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropField {
	pub document_type: String,
	pub field: String,
}

impl DropField {
	pub fn new(document_type: impl Into<String>, field: impl Into<String>) -> Self {
		Self {
			document_type: document_type.into(),
			field: field.into(),
		}
	}

	pub fn build_object(document_type: &str, field: &str, left: &Schema, right: &Schema) -> Option<Action> {
		let (left_fields, right_fields) = both_sides(document_type, left, right)?;
		(left_fields.contains_key(field) && !right_fields.contains_key(field))
			.then(|| Action::from(Self::new(document_type, field)))
	}

	pub fn to_schema_patch(&self, schema: &Schema) -> SchemaResult<SchemaPatch> {
		Ok(SchemaPatch::single(PatchOp::RemoveField {
			document_type: self.document_type.clone(),
			field: self.field.clone(),
			params: schema.field(&self.document_type, &self.field)?.clone(),
		}))
	}

	pub(super) fn plan(
		&self,
		schema: &Schema,
		policy: MigrationPolicy,
		context: &MigrationContext,
	) -> Result<StepPlan> {
		let params = schema.field(&self.document_type, &self.field)?;
		let paths = context.resolve_paths(schema, &self.document_type)?;
		let key = db_field(&self.field, params).to_string();
		let default = context
			.registry
			.default_value(&self.document_type, &self.field, params)?;

		let backward = refill_step(
			&self.document_type,
			&self.field,
			is_required(params),
			default,
			paths.clone(),
			key.clone(),
			policy,
		);
		Ok(StepPlan {
			forward: vec![StoreStep::Edit {
				paths,
				edits: vec![DocumentEdit::Unset(key)],
			}],
			backward: backward.into_iter().collect(),
		})
	}
}

/// Change a field's parameters
///
/// Stored data follows `db_field` changes (values move to the new key),
/// `type_key` changes (values are converted) and fields becoming required or
/// primary keys (the default is written where missing). Changed `choices`
/// are enforced on stored values: the strict policy refuses values outside
/// them, the relaxed policy replaces them with the default when the default
/// is one of the choices. Other parameters only live in the schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlterField {
	pub document_type: String,
	pub field: String,
	pub params: FieldParams,
}

impl AlterField {
	pub fn new(document_type: impl Into<String>, field: impl Into<String>, params: FieldParams) -> Self {
		Self {
			document_type: document_type.into(),
			field: field.into(),
			params,
		}
	}

	pub fn build_object(document_type: &str, field: &str, left: &Schema, right: &Schema) -> Option<Action> {
		let (left_fields, right_fields) = both_sides(document_type, left, right)?;
		let (old, new) = (left_fields.get(field)?, right_fields.get(field)?);
		(old != new).then(|| Action::from(Self::new(document_type, field, new.clone())))
	}

	pub fn to_schema_patch(&self, schema: &Schema) -> SchemaResult<SchemaPatch> {
		Ok(SchemaPatch::single(PatchOp::AlterField {
			document_type: self.document_type.clone(),
			field: self.field.clone(),
			old: schema.field(&self.document_type, &self.field)?.clone(),
			new: self.params.clone(),
		}))
	}

	pub(super) fn plan(
		&self,
		schema: &Schema,
		policy: MigrationPolicy,
		context: &MigrationContext,
	) -> Result<StepPlan> {
		let registry = &context.registry;
		let old = schema.field(&self.document_type, &self.field)?;
		let new = &self.params;
		registry.validate_field(&self.document_type, &self.field, new)?;

		let old_key = db_field(&self.field, old).to_string();
		let new_key = db_field(&self.field, new).to_string();
		let old_type = type_key(old).unwrap_or_default();
		let new_type = type_key(new).unwrap_or_default();

		let mut forward = Vec::new();
		let mut backward = Vec::new();
		let mut backward_violation = None;

		if old_type != new_type {
			let unsupported = || SchemaError::UnsupportedConversion {
				document_type: self.document_type.clone(),
				field: self.field.clone(),
				from: old_type.to_string(),
				to: new_type.to_string(),
			};
			let to_new = registry.get(new_type)?.converter().ok_or_else(unsupported)?;
			forward.push((1, DocumentEdit::Convert {
				key: new_key.clone(),
				converter: to_new,
			}));
			match (registry.get(old_type)?.converter(), policy) {
				(Some(to_old), _) => backward.push(DocumentEdit::Convert {
					key: new_key.clone(),
					converter: to_old,
				}),
				(None, MigrationPolicy::Strict) => {
					backward_violation = Some(format!(
						"{}.{} cannot be converted back from {} to {}",
						self.document_type, self.field, new_type, old_type
					));
				}
				(None, MigrationPolicy::Relaxed) => tracing::warn!(
					document_type = %self.document_type,
					field = %self.field,
					"values will keep type {} when unapplied",
					new_type
				),
			}
		}
		if old_key != new_key {
			forward.push((0, DocumentEdit::RenameKey {
				from: old_key.clone(),
				to: new_key.clone(),
			}));
			backward.push(DocumentEdit::RenameKey {
				from: new_key.clone(),
				to: old_key.clone(),
			});
		}
		let new_default = registry.default_value(&self.document_type, &self.field, new)?;
		let old_default = registry.default_value(&self.document_type, &self.field, old)?;
		let mut forward_violation = None;
		if is_required(new) {
			match new_default.clone() {
				Some(value) => forward.push((2, DocumentEdit::SetMissing {
					key: new_key.clone(),
					value,
				})),
				None if !is_required(old) => {
					forward_violation = self.missing_default(policy, "applied");
				}
				None => {}
			}
		}
		if is_required(old) {
			match old_default.clone() {
				Some(value) => backward.push(DocumentEdit::SetMissing {
					key: old_key.clone(),
					value,
				}),
				None if !is_required(new) && backward_violation.is_none() => {
					backward_violation = self.missing_default(policy, "unapplied");
				}
				None => {}
			}
		}

		let mut forward_check = None;
		let mut backward_check = None;
		let (old_choices, new_choices) = (choice_values(old), choice_values(new));
		if old_choices != new_choices {
			if let Some(allowed) = new_choices {
				match self.restrict_choices(&new_key, allowed, new_default, policy) {
					ChoicesRule::Replace(edit) => forward.push((3, edit)),
					ChoicesRule::Require(allowed) => forward_check = Some((new_key.clone(), allowed)),
					ChoicesRule::Skip => {}
				}
			}
			if let Some(allowed) = old_choices {
				match self.restrict_choices(&old_key, allowed, old_default, policy) {
					ChoicesRule::Replace(edit) => backward.push(edit),
					ChoicesRule::Require(allowed) => backward_check = Some((old_key.clone(), allowed)),
					ChoicesRule::Skip => {}
				}
			}
		}

		// Rename first, then convert under the new key, fill, then restrict
		forward.sort_by_key(|(order, _)| *order);
		let forward: Vec<DocumentEdit> = forward.into_iter().map(|(_, edit)| edit).collect();

		let mut plan = StepPlan::default();
		let untouched = forward.is_empty()
			&& backward.is_empty()
			&& forward_violation.is_none()
			&& backward_violation.is_none()
			&& forward_check.is_none()
			&& backward_check.is_none();
		if untouched {
			return Ok(plan);
		}
		let paths = context.resolve_paths(schema, &self.document_type)?;
		plan.forward = checked_steps(&paths, forward, forward_check, forward_violation);
		plan.backward = checked_steps(&paths, backward, backward_check, backward_violation);
		Ok(plan)
	}

	/// Violation or warning for a field becoming required without a default
	fn missing_default(&self, policy: MigrationPolicy, direction: &str) -> Option<String> {
		match policy {
			MigrationPolicy::Strict => Some(format!(
				"{}.{} becomes required when {} but has no default to fill it with",
				self.document_type, self.field, direction
			)),
			MigrationPolicy::Relaxed => {
				tracing::warn!(
					document_type = %self.document_type,
					field = %self.field,
					direction,
					"field becomes required without a default, documents lacking it are left alone"
				);
				None
			}
		}
	}

	fn restrict_choices(
		&self,
		key: &str,
		allowed: Vec<Bson>,
		default: Option<Bson>,
		policy: MigrationPolicy,
	) -> ChoicesRule {
		match (policy, default) {
			(MigrationPolicy::Strict, _) => ChoicesRule::Require(allowed),
			(MigrationPolicy::Relaxed, Some(value)) if allowed.contains(&value) => {
				ChoicesRule::Replace(DocumentEdit::ReplaceOutside {
					key: key.to_string(),
					allowed,
					value,
				})
			}
			(MigrationPolicy::Relaxed, _) => {
				tracing::warn!(
					document_type = %self.document_type,
					field = %self.field,
					"no default among the new choices, values outside them are kept"
				);
				ChoicesRule::Skip
			}
		}
	}
}

/// What happens to stored values outside a field's new choices
enum ChoicesRule {
	Replace(DocumentEdit),
	Require(Vec<Bson>),
	Skip,
}

/// Values a field's `choices` allow; `[value, label]` pairs contribute their value
fn choice_values(params: &FieldParams) -> Option<Vec<Bson>> {
	let Some(Value::Array(choices)) = params.get("choices") else {
		return None;
	};
	let values = choices
		.iter()
		.map(|choice| match choice.as_array().map(Vec::as_slice) {
			Some([value, _label]) => json_to_bson(value),
			_ => json_to_bson(choice),
		})
		.collect();
	Some(values)
}

/// One direction of an alteration: the edits, then the choices check
fn checked_steps(
	paths: &[DocumentPath],
	edits: Vec<DocumentEdit>,
	check: Option<(String, Vec<Bson>)>,
	violation: Option<String>,
) -> Vec<StoreStep> {
	if let Some(message) = violation {
		return vec![StoreStep::Violation(message)];
	}
	let mut steps = Vec::new();
	if !edits.is_empty() {
		steps.push(StoreStep::Edit {
			paths: paths.to_vec(),
			edits,
		});
	}
	if let Some((key, allowed)) = check {
		steps.push(StoreStep::RequireValues {
			paths: paths.to_vec(),
			key,
			allowed,
		});
	}
	steps
}

/// Rename a field in the schema
///
/// Stored values move only when the stored key is derived from the field
/// name, i.e. no explicit `db_field` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenameField {
	pub document_type: String,
	pub field: String,
	pub new_name: String,
}

impl RenameField {
	pub fn new(
		document_type: impl Into<String>,
		field: impl Into<String>,
		new_name: impl Into<String>,
	) -> Self {
		Self {
			document_type: document_type.into(),
			field: field.into(),
			new_name: new_name.into(),
		}
	}

	/// Applies when `field` only exists in `left` and exactly one field only
	/// in `right` is similar enough to it
	pub fn build_object(
		document_type: &str,
		field: &str,
		left: &Schema,
		right: &Schema,
		similarity: &SimilarityConfig,
	) -> Option<Action> {
		let (left_fields, right_fields) = both_sides(document_type, left, right)?;
		detect_field_renames(left_fields, right_fields, similarity)
			.into_iter()
			.find(|(from, _)| from == field)
			.map(|(from, to)| Self::new(document_type, from, to).into())
	}

	pub fn to_schema_patch(&self, schema: &Schema) -> SchemaResult<SchemaPatch> {
		schema.field(&self.document_type, &self.field)?;
		Ok(SchemaPatch::single(PatchOp::RenameField {
			document_type: self.document_type.clone(),
			from: self.field.clone(),
			to: self.new_name.clone(),
		}))
	}

	pub(super) fn plan(
		&self,
		schema: &Schema,
		_policy: MigrationPolicy,
		context: &MigrationContext,
	) -> Result<StepPlan> {
		let params = schema.field(&self.document_type, &self.field)?;
		if params.get("db_field").is_some_and(Value::is_string) {
			return Ok(StepPlan::schema_only());
		}
		let paths = context.resolve_paths(schema, &self.document_type)?;
		Ok(StepPlan {
			forward: vec![StoreStep::Edit {
				paths: paths.clone(),
				edits: vec![DocumentEdit::RenameKey {
					from: self.field.clone(),
					to: self.new_name.clone(),
				}],
			}],
			backward: vec![StoreStep::Edit {
				paths,
				edits: vec![DocumentEdit::RenameKey {
					from: self.new_name.clone(),
					to: self.field.clone(),
				}],
			}],
		})
	}
}
