//! Schema patches
//!
//! A [`SchemaPatch`] is an ordered list of structural edits. Every edit that
//! removes or changes something carries the previous value, so a patch can
//! always be inverted without looking at the schema it was built against.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::schema::{DocumentSchema, FieldParams, IndexParams, Schema};
use super::{SchemaError, SchemaResult};

/// A single structural edit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PatchOp {
	AddDocument {
		document_type: String,
		document: DocumentSchema,
	},
	RemoveDocument {
		document_type: String,
		document: DocumentSchema,
	},
	RenameDocument {
		from: String,
		to: String,
	},
	ChangeParameters {
		document_type: String,
		old: BTreeMap<String, Value>,
		new: BTreeMap<String, Value>,
	},
	AddField {
		document_type: String,
		field: String,
		params: FieldParams,
	},
	RemoveField {
		document_type: String,
		field: String,
		params: FieldParams,
	},
	AlterField {
		document_type: String,
		field: String,
		old: FieldParams,
		new: FieldParams,
	},
	RenameField {
		document_type: String,
		from: String,
		to: String,
	},
	AddIndex {
		document_type: String,
		name: String,
		params: IndexParams,
	},
	RemoveIndex {
		document_type: String,
		name: String,
		params: IndexParams,
	},
	AlterIndex {
		document_type: String,
		name: String,
		old: IndexParams,
		new: IndexParams,
	},
}

impl PatchOp {
	/// The edit undoing this one
	pub fn inverse(&self) -> PatchOp {
		match self.clone() {
			PatchOp::AddDocument {
				document_type,
				document,
			} => PatchOp::RemoveDocument {
				document_type,
				document,
			},
			PatchOp::RemoveDocument {
				document_type,
				document,
			} => PatchOp::AddDocument {
				document_type,
				document,
			},
			PatchOp::RenameDocument { from, to } => PatchOp::RenameDocument { from: to, to: from },
			PatchOp::ChangeParameters {
				document_type,
				old,
				new,
			} => PatchOp::ChangeParameters {
				document_type,
				old: new,
				new: old,
			},
			PatchOp::AddField {
				document_type,
				field,
				params,
			} => PatchOp::RemoveField {
				document_type,
				field,
				params,
			},
			PatchOp::RemoveField {
				document_type,
				field,
				params,
			} => PatchOp::AddField {
				document_type,
				field,
				params,
			},
			PatchOp::AlterField {
				document_type,
				field,
				old,
				new,
			} => PatchOp::AlterField {
				document_type,
				field,
				old: new,
				new: old,
			},
			PatchOp::RenameField {
				document_type,
				from,
				to,
			} => PatchOp::RenameField {
				document_type,
				from: to,
				to: from,
			},
			PatchOp::AddIndex {
				document_type,
				name,
				params,
			} => PatchOp::RemoveIndex {
				document_type,
				name,
				params,
			},
			PatchOp::RemoveIndex {
				document_type,
				name,
				params,
			} => PatchOp::AddIndex {
				document_type,
				name,
				params,
			},
			PatchOp::AlterIndex {
				document_type,
				name,
				old,
				new,
			} => PatchOp::AlterIndex {
				document_type,
				name,
				old: new,
				new: old,
			},
		}
	}

	fn apply_to(&self, schema: &mut Schema) -> SchemaResult<()> {
		match self {
			PatchOp::AddDocument {
				document_type,
				document,
			} => {
				if schema.contains(document_type) {
					return Err(SchemaError::DocumentExists(document_type.clone()));
				}
				schema.insert(document_type.clone(), document.clone());
			}
			PatchOp::RemoveDocument { document_type, .. } => {
				schema
					.remove(document_type)
					.ok_or_else(|| SchemaError::DocumentNotFound(document_type.clone()))?;
			}
			PatchOp::RenameDocument { from, to } => {
				if schema.contains(to) {
					return Err(SchemaError::DocumentExists(to.clone()));
				}
				let document = schema
					.remove(from)
					.ok_or_else(|| SchemaError::DocumentNotFound(from.clone()))?;
				schema.insert(to.clone(), document);
			}
			PatchOp::ChangeParameters {
				document_type, new, ..
			} => {
				schema.get_mut(document_type)?.parameters = new.clone();
			}
			PatchOp::AddField {
				document_type,
				field,
				params,
			} => {
				let document = schema.get_mut(document_type)?;
				if document.fields.contains_key(field) {
					return Err(field_exists(document_type, field));
				}
				document.fields.insert(field.clone(), params.clone());
			}
			PatchOp::RemoveField {
				document_type,
				field,
				..
			} => {
				schema
					.get_mut(document_type)?
					.fields
					.shift_remove(field)
					.ok_or_else(|| field_not_found(document_type, field))?;
			}
			PatchOp::AlterField {
				document_type,
				field,
				new,
				..
			} => {
				let params = schema
					.get_mut(document_type)?
					.fields
					.get_mut(field)
					.ok_or_else(|| field_not_found(document_type, field))?;
				*params = new.clone();
			}
			PatchOp::RenameField {
				document_type,
				from,
				to,
			} => {
				let document = schema.get_mut(document_type)?;
				if document.fields.contains_key(to) {
					return Err(field_exists(document_type, to));
				}
				let index = document
					.fields
					.get_index_of(from)
					.ok_or_else(|| field_not_found(document_type, from))?;
				let params = document.fields.shift_remove_index(index).map(|(_, params)| params);
				if let Some(params) = params {
					document.fields.shift_insert(index, to.clone(), params);
				}
			}
			PatchOp::AddIndex {
				document_type,
				name,
				params,
			} => {
				let document = schema.get_mut(document_type)?;
				if document.indexes.contains_key(name) {
					return Err(SchemaError::IndexExists {
						document_type: document_type.clone(),
						index: name.clone(),
					});
				}
				document.indexes.insert(name.clone(), params.clone());
			}
			PatchOp::RemoveIndex {
				document_type,
				name,
				..
			} => {
				schema
					.get_mut(document_type)?
					.indexes
					.remove(name)
					.ok_or_else(|| index_not_found(document_type, name))?;
			}
			PatchOp::AlterIndex {
				document_type,
				name,
				new,
				..
			} => {
				let params = schema
					.get_mut(document_type)?
					.indexes
					.get_mut(name)
					.ok_or_else(|| index_not_found(document_type, name))?;
				*params = new.clone();
			}
		}
		Ok(())
	}
}

fn index_not_found(document_type: &str, index: &str) -> SchemaError {
	SchemaError::IndexNotFound {
		document_type: document_type.to_string(),
		index: index.to_string(),
	}
}

fn field_exists(document_type: &str, field: &str) -> SchemaError {
	SchemaError::FieldExists {
		document_type: document_type.to_string(),
		field: field.to_string(),
	}
}

fn field_not_found(document_type: &str, field: &str) -> SchemaError {
	SchemaError::FieldNotFound {
		document_type: document_type.to_string(),
		field: field.to_string(),
	}
}

/// Ordered list of schema edits
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaPatch {
	ops: Vec<PatchOp>,
}

impl SchemaPatch {
	pub fn new(ops: Vec<PatchOp>) -> Self {
		Self { ops }
	}

	pub fn single(op: PatchOp) -> Self {
		Self { ops: vec![op] }
	}

	pub fn ops(&self) -> &[PatchOp] {
		&self.ops
	}

	pub fn is_empty(&self) -> bool {
		self.ops.is_empty()
	}

	/// Append every edit of `other`
	pub fn extend(&mut self, other: SchemaPatch) {
		self.ops.extend(other.ops);
	}

	/// Apply every edit in order to a copy of `schema`
	///
	/// Fails on the first edit naming a missing document type or field, or
	/// adding one that already exists. The input is left untouched either way.
	pub fn apply(&self, schema: &Schema) -> SchemaResult<Schema> {
		let mut result = schema.clone();
		for op in &self.ops {
			op.apply_to(&mut result)?;
		}
		Ok(result)
	}

	/// The patch undoing this one: inverted edits in reverse order
	pub fn inverse(&self) -> SchemaPatch {
		SchemaPatch {
			ops: self.ops.iter().rev().map(PatchOp::inverse).collect(),
		}
	}
}

impl From<Vec<PatchOp>> for SchemaPatch {
	fn from(ops: Vec<PatchOp>) -> Self {
		Self::new(ops)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::{fixture, rstest};
	use serde_json::json;

	fn params(db_field: &str) -> FieldParams {
		[
			("db_field".to_string(), json!(db_field)),
			("type_key".to_string(), json!("StringField")),
		]
		.into_iter()
		.collect()
	}

	#[fixture]
	fn schema() -> Schema {
		Schema::new().with_document(
			"Doc",
			DocumentSchema::new()
				.with_parameter("collection", "doc")
				.with_field("a", params("a"))
				.with_field("b", params("b")),
		)
	}

	#[rstest]
	fn test_apply_is_all_or_nothing(schema: Schema) {
		let patch = SchemaPatch::new(vec![
			PatchOp::RemoveField {
				document_type: "Doc".to_string(),
				field: "a".to_string(),
				params: params("a"),
			},
			PatchOp::RemoveField {
				document_type: "Doc".to_string(),
				field: "missing".to_string(),
				params: params("missing"),
			},
		]);

		let result = schema.apply_patch(&patch);

		assert_eq!(
			result,
			Err(SchemaError::FieldNotFound {
				document_type: "Doc".to_string(),
				field: "missing".to_string()
			})
		);
		assert!(schema.field("Doc", "a").is_ok());
	}

	#[rstest]
	fn test_add_existing_document_fails(schema: Schema) {
		let patch = SchemaPatch::single(PatchOp::AddDocument {
			document_type: "Doc".to_string(),
			document: DocumentSchema::new(),
		});
		assert_eq!(
			schema.apply_patch(&patch),
			Err(SchemaError::DocumentExists("Doc".to_string()))
		);
	}

	#[rstest]
	fn test_index_ops_and_inverse(schema: Schema) {
		let unique: IndexParams = [
			("fields".to_string(), json!([["a", 1]])),
			("unique".to_string(), json!(true)),
		]
		.into_iter()
		.collect();
		let plain: IndexParams = [("fields".to_string(), json!([["a", -1]]))].into_iter().collect();
		let patch = SchemaPatch::new(vec![
			PatchOp::AddIndex {
				document_type: "Doc".to_string(),
				name: "a_idx".to_string(),
				params: unique.clone(),
			},
			PatchOp::AlterIndex {
				document_type: "Doc".to_string(),
				name: "a_idx".to_string(),
				old: unique,
				new: plain.clone(),
			},
		]);

		let result = schema.apply_patch(&patch).unwrap();

		assert_eq!(result.get("Doc").unwrap().indexes["a_idx"], plain);
		assert_eq!(result.apply_patch(&patch.inverse()).unwrap(), schema);
		assert_eq!(
			schema.apply_patch(&SchemaPatch::single(PatchOp::RemoveIndex {
				document_type: "Doc".to_string(),
				name: "a_idx".to_string(),
				params: plain,
			})),
			Err(SchemaError::IndexNotFound {
				document_type: "Doc".to_string(),
				index: "a_idx".to_string()
			})
		);
	}

	#[rstest]
	fn test_rename_field_keeps_position(schema: Schema) {
		let patch = SchemaPatch::single(PatchOp::RenameField {
			document_type: "Doc".to_string(),
			from: "a".to_string(),
			to: "c".to_string(),
		});

		let result = schema.apply_patch(&patch).unwrap();

		let names: Vec<&String> = result.get("Doc").unwrap().fields.keys().collect();
		assert_eq!(names, vec!["c", "b"]);
	}

	#[rstest]
	fn test_inverse_restores_schema(schema: Schema) {
		let patch = SchemaPatch::new(vec![
			PatchOp::RenameDocument {
				from: "Doc".to_string(),
				to: "Renamed".to_string(),
			},
			PatchOp::ChangeParameters {
				document_type: "Renamed".to_string(),
				old: schema.get("Doc").unwrap().parameters.clone(),
				new: [("collection".to_string(), json!("renamed"))].into_iter().collect(),
			},
			PatchOp::AlterField {
				document_type: "Renamed".to_string(),
				field: "b".to_string(),
				old: params("b"),
				new: params("bb"),
			},
			PatchOp::AddField {
				document_type: "Renamed".to_string(),
				field: "c".to_string(),
				params: params("c"),
			},
		]);

		let forward = schema.apply_patch(&patch).unwrap();
		let backward = forward.apply_patch(&patch.inverse()).unwrap();

		assert_ne!(forward, schema);
		assert_eq!(backward, schema);
	}
}
