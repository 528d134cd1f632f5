//! Document Action Tests
//!
//! Document-level and embedded-type actions, plus the preparation errors
//! shared by every action kind.

mod fixtures;

use bson::doc;
use fixtures::*;
use reinhardt_nosql_migrations::migrations::operations::{
	AlterDocument, AlterEmbedded, AlterField, CreateDocument, CreateEmbedded, CreateField,
	DropDocument, DropEmbedded, DropField, RenameDocument, RenameEmbedded, RenameField, StoreStep,
};
use reinhardt_nosql_migrations::migrations::{
	Action, DocumentSchema, MigrationError, MigrationPolicy, Schema, SchemaError,
};
use reinhardt_nosql_migrations::nosql::{DocumentStore, InMemoryStore};
use rstest::*;
use serde_json::json;
use std::sync::Arc;

// ============================================================================
// AlterDocument
// ============================================================================

#[rstest]
#[tokio::test]
async fn test_alter_document_renames_collection() {
	let store = store();
	let action = AlterDocument::new(
		"Schema1Doc2",
		parameters(&[("collection", json!("schema1_doc2_renamed"))]),
	);

	run_forward(action.clone(), store.as_ref(), &schema1(), MigrationPolicy::Strict)
		.await
		.unwrap();
	let dump = store.dump();
	assert!(!dump.contains_key("schema1_doc2"));
	assert_eq!(
		dump["schema1_doc2_renamed"],
		vec![doc! { "_id": 1, "doc2_str": "other" }]
	);

	run_backward(action, store.as_ref(), &schema1(), MigrationPolicy::Strict)
		.await
		.unwrap();
	assert_eq!(store.dump(), fixtures::store().dump());
}

#[rstest]
#[tokio::test]
async fn test_alter_document_missing_collection_is_noop() {
	let store = Arc::new(InMemoryStore::new().with_collection(DOC1_COLLECTION, doc1_documents()));
	let before = store.dump();
	let action = AlterDocument::new(
		"Schema1Doc2",
		parameters(&[("collection", json!("schema1_doc2_renamed"))]),
	);

	run_forward(action.clone(), store.as_ref(), &schema1(), MigrationPolicy::Strict)
		.await
		.unwrap();
	assert_eq!(store.dump(), before);

	run_backward(action, store.as_ref(), &schema1(), MigrationPolicy::Strict)
		.await
		.unwrap();
	assert_eq!(store.dump(), before);
}

#[rstest]
#[tokio::test]
async fn test_alter_document_dynamic_off_strips_undeclared_keys() {
	let store = Arc::new(InMemoryStore::new().with_collection(
		"schema1_doc2",
		vec![doc! { "_id": 1, "doc2_str": "kept", "legacy": true }],
	));
	let mut document = schema1().get("Schema1Doc2").unwrap().clone();
	document.parameters.insert("dynamic".to_string(), json!(true));
	let schema = schema1().with_document("Schema1Doc2", document);

	run_forward(
		AlterDocument::new(
			"Schema1Doc2",
			parameters(&[("collection", json!("schema1_doc2")), ("dynamic", json!(false))]),
		),
		store.as_ref(),
		&schema,
		MigrationPolicy::Strict,
	)
	.await
	.unwrap();

	assert_eq!(
		store.dump()["schema1_doc2"],
		vec![doc! { "_id": 1, "doc2_str": "kept" }]
	);
}

// ============================================================================
// Create / Drop / Rename
// ============================================================================

#[rstest]
#[tokio::test]
async fn test_create_document_backward_drops_collection() {
	let store = store();
	store
		.insert_one("schema1_doc3", doc! { "_id": 1 })
		.await
		.unwrap();
	let mut schema = schema1();
	let action = Action::from(CreateDocument::new(
		"Schema1Doc3",
		parameters(&[("collection", json!("schema1_doc3"))]),
	));
	schema = schema
		.apply_patch(&action.to_schema_patch(&schema).unwrap())
		.unwrap();
	assert!(schema.contains("Schema1Doc3"));

	let before = store.dump();
	run_forward(action.clone(), store.as_ref(), &schema1(), MigrationPolicy::Strict)
		.await
		.unwrap();
	assert_eq!(store.dump(), before);

	run_backward(action, store.as_ref(), &schema1(), MigrationPolicy::Strict)
		.await
		.unwrap();
	assert!(!store.dump().contains_key("schema1_doc3"));
}

#[rstest]
#[tokio::test]
async fn test_create_document_backward_keeps_shared_collection() {
	let store = store();
	let action = CreateDocument::new(
		"Schema1Doc2Child",
		parameters(&[("collection", json!("schema1_doc2")), ("inherit", json!(true))]),
	);

	run_backward(action, store.as_ref(), &schema1(), MigrationPolicy::Strict)
		.await
		.unwrap();

	assert_eq!(store.dump(), fixtures::store().dump());
}

#[rstest]
#[tokio::test]
async fn test_drop_document_drops_collection() {
	let store = store();

	run_forward(
		DropDocument::new("Schema1Doc2"),
		store.as_ref(),
		&schema1(),
		MigrationPolicy::Strict,
	)
	.await
	.unwrap();

	let dump = store.dump();
	assert!(!dump.contains_key("schema1_doc2"));
	assert!(dump.contains_key(DOC1_COLLECTION));
}

/// `schema1` plus `Schema1Doc2Child` stored in `schema1_doc2`
fn schema_with_shared_collection() -> Schema {
	schema1().with_document(
		"Schema1Doc2Child",
		DocumentSchema::new()
			.with_parameter("collection", "schema1_doc2")
			.with_parameter("inherit", true)
			.with_field("doc2_str", field("StringField", &[])),
	)
}

#[rstest]
#[tokio::test]
async fn test_drop_document_keeps_shared_collection() {
	let store = store();

	run_forward(
		DropDocument::new("Schema1Doc2Child"),
		store.as_ref(),
		&schema_with_shared_collection(),
		MigrationPolicy::Strict,
	)
	.await
	.unwrap();

	assert_eq!(store.dump(), fixtures::store().dump());
}

#[rstest]
#[tokio::test]
async fn test_alter_document_keeps_shared_collection_name() {
	let store = store();
	let action = AlterDocument::new(
		"Schema1Doc2Child",
		parameters(&[("collection", json!("schema1_doc2_child")), ("inherit", json!(true))]),
	);

	run_forward(
		action.clone(),
		store.as_ref(),
		&schema_with_shared_collection(),
		MigrationPolicy::Strict,
	)
	.await
	.unwrap();
	assert_eq!(store.dump(), fixtures::store().dump());

	let action = Action::from(action);
	let schema = schema_with_shared_collection();
	let prepared = action
		.prepare(
			store.as_ref(),
			&schema,
			MigrationPolicy::Strict,
			&context(MigrationPolicy::Strict),
		)
		.unwrap();
	assert!(prepared.plan().forward.is_empty());
	assert_eq!(
		prepared.plan().backward,
		vec![StoreStep::RenameCollection {
			from: "schema1_doc2_child".to_string(),
			to: "schema1_doc2".to_string(),
		}]
	);
}

#[rstest]
#[case("~Schema1EmbDoc1", "~Schema1EmbDocRenamed")]
#[case("~Schema1EmbDoc2", "~Schema1Leaf")]
#[tokio::test]
async fn test_rename_embedded_never_touches_store(#[case] from: &str, #[case] to: &str) {
	let store = store();
	let before = store.dump();
	let action = RenameEmbedded::new(from, to);

	run_forward(action.clone(), store.as_ref(), &schema1(), MigrationPolicy::Strict)
		.await
		.unwrap();
	assert_eq!(store.dump(), before);
	run_backward(action, store.as_ref(), &schema1(), MigrationPolicy::Strict)
		.await
		.unwrap();
	assert_eq!(store.dump(), before);
}

#[rstest]
fn test_rename_embedded_patch_round_trip() {
	let schema = schema1();
	let action = Action::from(RenameEmbedded::new("~Schema1EmbDoc2", "~Schema1Leaf"));
	let patch = action.to_schema_patch(&schema).unwrap();

	let renamed = schema.apply_patch(&patch).unwrap();
	assert!(renamed.contains("~Schema1Leaf"));
	assert!(!renamed.contains("~Schema1EmbDoc2"));
	assert_eq!(renamed.apply_patch(&patch.inverse()).unwrap(), schema);
}

#[rstest]
#[tokio::test]
async fn test_rename_document_is_schema_only() {
	let store = store();
	let before = store.dump();

	run_forward(
		RenameDocument::new("Schema1Doc2", "Schema1Other"),
		store.as_ref(),
		&schema1(),
		MigrationPolicy::Strict,
	)
	.await
	.unwrap();

	assert_eq!(store.dump(), before);
}

#[rstest]
#[tokio::test]
async fn test_alter_embedded_dynamic_off_strips_nested_keys() {
	let store = Arc::new(InMemoryStore::new().with_collection(
		DOC1_COLLECTION,
		vec![doc! {
			"_id": 1,
			"doc1_emb_embdoc1_list": [
				{ "embdoc1_emb_embdoc2": { "embdoc2_str": "a", "extra": 1 } },
			],
		}],
	));
	let schema = schema1().with_document(
		"~Schema1EmbDoc2",
		schema1()
			.get("~Schema1EmbDoc2")
			.unwrap()
			.clone()
			.with_parameter("dynamic", true),
	);

	run_forward(
		AlterEmbedded::new("~Schema1EmbDoc2", parameters(&[])),
		store.as_ref(),
		&schema,
		MigrationPolicy::Strict,
	)
	.await
	.unwrap();

	assert_eq!(
		store.dump()[DOC1_COLLECTION],
		vec![doc! {
			"_id": 1,
			"doc1_emb_embdoc1_list": [
				{ "embdoc1_emb_embdoc2": { "embdoc2_str": "a" } },
			],
		}]
	);
}

// ============================================================================
// Preparation errors
// ============================================================================

#[rstest]
#[case::drop_document(DropDocument::new("Missing").into(), "Missing")]
#[case::rename_document(RenameDocument::new("Missing", "Other").into(), "Missing")]
#[case::alter_document(AlterDocument::new("Missing", parameters(&[])).into(), "Missing")]
#[case::drop_embedded(DropEmbedded::new("~Missing").into(), "~Missing")]
#[case::rename_embedded(RenameEmbedded::new("~Missing", "~Other").into(), "~Missing")]
#[case::alter_embedded(AlterEmbedded::new("~Missing", parameters(&[])).into(), "~Missing")]
#[case::create_field(CreateField::new("Missing", "f", field("StringField", &[])).into(), "Missing")]
#[case::drop_field(DropField::new("~Missing", "f").into(), "~Missing")]
#[case::alter_field(AlterField::new("Missing", "f", field("StringField", &[])).into(), "Missing")]
#[case::rename_field(RenameField::new("~Missing", "f", "g").into(), "~Missing")]
fn test_prepare_missing_document_type(#[case] action: Action, #[case] document_type: &str) {
	let store = store();

	let result = action.prepare(
		store.as_ref(),
		&schema1(),
		MigrationPolicy::Strict,
		&context(MigrationPolicy::Strict),
	);

	match result {
		Err(MigrationError::Schema(SchemaError::DocumentNotFound(name))) => {
			assert_eq!(name, document_type)
		}
		other => panic!("expected DocumentNotFound, got {:?}", other),
	}
}

#[rstest]
#[case::create_document(CreateDocument::new("Schema1Doc1", parameters(&[])).into(), "Schema1Doc1")]
#[case::create_embedded(CreateEmbedded::new("~Schema1EmbDoc1", parameters(&[])).into(), "~Schema1EmbDoc1")]
fn test_prepare_create_existing_document_type(
	#[case] action: Action,
	#[case] document_type: &str,
) {
	let store = store();

	let result = action.prepare(
		store.as_ref(),
		&schema1(),
		MigrationPolicy::Strict,
		&context(MigrationPolicy::Strict),
	);

	match result {
		Err(MigrationError::Schema(SchemaError::DocumentExists(name))) => {
			assert_eq!(name, document_type)
		}
		other => panic!("expected DocumentExists, got {:?}", other),
	}
}

#[rstest]
fn test_prepare_missing_field() {
	let store = store();
	let action = Action::from(DropField::new("Schema1Doc1", "missing"));

	let result = action.prepare(
		store.as_ref(),
		&schema1(),
		MigrationPolicy::Strict,
		&context(MigrationPolicy::Strict),
	);

	assert!(matches!(
		result,
		Err(MigrationError::Schema(SchemaError::FieldNotFound { .. }))
	));
}

#[rstest]
fn test_embedded_actions_reject_top_level_names() {
	let schema = Schema::new().with_document(
		"Plain",
		DocumentSchema::new().with_parameter("collection", "plain"),
	);
	let action = Action::from(DropEmbedded::new("Plain"));

	assert!(matches!(
		action.to_schema_patch(&schema),
		Err(SchemaError::MalformedDocument { .. })
	));
}
