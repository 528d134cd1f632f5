//! Shared schemas and store contents for the integration tests

#![allow(dead_code)]

use bson::{Document, doc};
use reinhardt_nosql_migrations::migrations::{
	Action, DocumentSchema, FieldHandlerRegistry, FieldParams, MigrationConfig, MigrationContext,
	MigrationPolicy, Result, Schema,
};
use reinhardt_nosql_migrations::nosql::{DocumentStore, InMemoryStore};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const DOC1_COLLECTION: &str = "schema1_doc1";

/// Field parameters of `type_key` with `overrides` applied
pub fn field(type_key: &str, overrides: &[(&str, Value)]) -> FieldParams {
	FieldHandlerRegistry::with_defaults()
		.build_params(type_key, overrides.iter().map(|(key, value)| (*key, value.clone())))
		.unwrap()
}

pub fn embedded(type_key: &str, target: &str) -> FieldParams {
	field(type_key, &[("target_doctype", json!(target))])
}

pub fn parameters(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
	pairs
		.iter()
		.map(|(key, value)| (key.to_string(), value.clone()))
		.collect()
}

/// Two top-level document types, one of them embedding `~Schema1EmbDoc1`
/// directly and in a list; `~Schema1EmbDoc1` embeds `~Schema1EmbDoc2`
pub fn schema1() -> Schema {
	Schema::new()
		.with_document(
			"Schema1Doc1",
			DocumentSchema::new()
				.with_parameter("collection", DOC1_COLLECTION)
				.with_field("doc1_str", field("StringField", &[]))
				.with_field("doc1_int", field("IntField", &[]))
				.with_field(
					"doc1_emb_embdoc1",
					embedded("EmbeddedDocumentField", "~Schema1EmbDoc1"),
				)
				.with_field(
					"doc1_emb_embdoc1_list",
					embedded("EmbeddedDocumentListField", "~Schema1EmbDoc1"),
				),
		)
		.with_document(
			"Schema1Doc2",
			DocumentSchema::new()
				.with_parameter("collection", "schema1_doc2")
				.with_field("doc2_str", field("StringField", &[])),
		)
		.with_document(
			"~Schema1EmbDoc1",
			DocumentSchema::new()
				.with_field("embdoc1_str", field("StringField", &[]))
				.with_field("embdoc1_int", field("IntField", &[]))
				.with_field(
					"embdoc1_emb_embdoc2",
					embedded("EmbeddedDocumentField", "~Schema1EmbDoc2"),
				),
		)
		.with_document(
			"~Schema1EmbDoc2",
			DocumentSchema::new().with_field("embdoc2_str", field("StringField", &[])),
		)
}

/// `schema1` with one field's parameters replaced
pub fn schema1_with_field(document_type: &str, name: &str, params: FieldParams) -> Schema {
	let mut document = schema1().get(document_type).unwrap().clone();
	document.fields.insert(name.to_string(), params);
	schema1().with_document(document_type, document)
}

pub fn doc1_documents() -> Vec<Document> {
	vec![
		doc! {
			"_id": 1,
			"doc1_str": "first",
			"doc1_int": 1,
			"doc1_emb_embdoc1": {
				"embdoc1_str": "single",
				"embdoc1_int": 10,
				"embdoc1_emb_embdoc2": { "embdoc2_str": "deep" },
			},
			"doc1_emb_embdoc1_list": [
				{ "embdoc1_str": "item0", "embdoc1_emb_embdoc2": { "embdoc2_str": "deep0" } },
				{ "embdoc1_str": "item1" },
			],
		},
		doc! {
			"_id": 2,
			"doc1_int": 2,
		},
	]
}

pub fn store() -> Arc<InMemoryStore> {
	Arc::new(
		InMemoryStore::new()
			.with_collection(DOC1_COLLECTION, doc1_documents())
			.with_collection("schema1_doc2", vec![doc! { "_id": 1, "doc2_str": "other" }]),
	)
}

pub fn context(policy: MigrationPolicy) -> MigrationContext {
	MigrationContext::new(MigrationConfig::default().with_policy(policy))
}

pub async fn run_forward(
	action: impl Into<Action>,
	store: &dyn DocumentStore,
	schema: &Schema,
	policy: MigrationPolicy,
) -> Result<()> {
	let action = action.into();
	action
		.prepare(store, schema, policy, &context(policy))?
		.run_forward()
		.await
}

pub async fn run_backward(
	action: impl Into<Action>,
	store: &dyn DocumentStore,
	schema: &Schema,
	policy: MigrationPolicy,
) -> Result<()> {
	let action = action.into();
	action
		.prepare(store, schema, policy, &context(policy))?
		.run_backward()
		.await
}
