//! Schema Patch Property Tests
//!
//! Random action sequences over a fixed schema must undo cleanly through the
//! inverse of their combined patch.

mod fixtures;

use fixtures::*;
use proptest::prelude::*;
use reinhardt_nosql_migrations::migrations::operations::{
	AlterDocument, AlterField, CreateField, DropField, RenameField,
};
use reinhardt_nosql_migrations::migrations::{
	Action, PatchOp, Schema, SchemaError, SchemaPatch,
};
use rstest::*;
use serde_json::json;

const DOC1: &str = "Schema1Doc1";

/// Build an action from a generated choice against the current schema
fn action_for(schema: &Schema, kind: u8, index: usize, name: &str) -> Action {
	let fields: Vec<&String> = schema.get(DOC1).unwrap().fields.keys().collect();
	if fields.is_empty() {
		return CreateField::new(DOC1, format!("x_{}", name), field("StringField", &[])).into();
	}
	let existing = fields[index % fields.len()].clone();
	match kind % 5 {
		0 => DropField::new(DOC1, existing).into(),
		1 => RenameField::new(DOC1, existing, format!("x_{}", name)).into(),
		2 => CreateField::new(DOC1, format!("x_{}", name), field("StringField", &[])).into(),
		3 => AlterField::new(
			DOC1,
			existing,
			field("IntField", &[("required", json!(true)), ("default", json!(0))]),
		)
		.into(),
		_ => AlterDocument::new(DOC1, parameters(&[("collection", json!(name))])).into(),
	}
}

// ============================================================================
// Property-Based Tests: inverse patches
// ============================================================================

proptest! {
	/// Test: combined patch inverse
	///
	/// Category: Property
	/// Verifies that applying a sequence of action patches and then the
	/// inverse of their concatenation yields the starting schema.
	#[test]
	fn prop_inverse_restores_schema(
		choices in prop::collection::vec((0u8..5, 0usize..8, "[a-z]{3,8}"), 1..6)
	) {
		let start = schema1();
		let mut schema = start.clone();
		let mut combined = SchemaPatch::default();

		for (kind, index, name) in &choices {
			let action = action_for(&schema, *kind, *index, name);
			// Generated names can collide with earlier ones
			let Ok(patch) = action.to_schema_patch(&schema) else {
				continue;
			};
			let Ok(next) = schema.apply_patch(&patch) else {
				continue;
			};
			schema = next;
			combined.extend(patch);
		}

		prop_assert_eq!(start.apply_patch(&combined).unwrap(), schema.clone());
		prop_assert_eq!(schema.apply_patch(&combined.inverse()).unwrap(), start);
	}
}

// ============================================================================
// All-or-nothing application
// ============================================================================

#[rstest]
fn test_failed_patch_leaves_schema_untouched() {
	let schema = schema1();
	let patch = SchemaPatch::new(vec![
		PatchOp::RenameField {
			document_type: DOC1.to_string(),
			from: "doc1_str".to_string(),
			to: "doc1_text".to_string(),
		},
		PatchOp::RemoveDocument {
			document_type: "Missing".to_string(),
			document: Default::default(),
		},
	]);

	let result = schema.apply_patch(&patch);

	assert_eq!(
		result,
		Err(SchemaError::DocumentNotFound("Missing".to_string()))
	);
	assert!(schema.field(DOC1, "doc1_str").is_ok());
	assert!(schema.field(DOC1, "doc1_text").is_err());
}

#[rstest]
fn test_schema_survives_bson_encoding() {
	let schema = schema1_with_field(DOC1, "doc1_flag", field("BooleanField", &[]));

	let decoded = Schema::from_bson(&schema.to_bson()).unwrap();

	assert_eq!(decoded, schema);
}
