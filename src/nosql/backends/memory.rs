//! In-memory document store
//!
//! Collections are kept in a `BTreeMap`, which makes [`InMemoryStore::dump`]
//! deterministic and directly comparable in tests. Documents keep their
//! insertion order inside a collection.

mod query;

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{Bson, Document, doc};
use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use std::collections::BTreeMap;

use crate::nosql::error::{NoSQLError, Result};
use crate::nosql::traits::DocumentStore;
use crate::nosql::types::{DocumentStream, UpdateResult};

/// Snapshot of every collection held by an [`InMemoryStore`]
pub type StoreDump = BTreeMap<String, Vec<Document>>;

#[derive(Debug, Default)]
struct StoreState {
	collections: StoreDump,
	/// Index descriptions per collection, in creation order
	indexes: BTreeMap<String, Vec<Document>>,
}

impl StoreState {
	fn update(
		&mut self,
		collection: &str,
		filter: &Document,
		update: &Document,
		limit: Option<usize>,
	) -> Result<UpdateResult> {
		let mut result = UpdateResult::default();
		let Some(documents) = self.collections.get_mut(collection) else {
			return Ok(result);
		};
		for document in documents.iter_mut() {
			if limit.is_some_and(|limit| result.matched_count as usize >= limit) {
				break;
			}
			if !query::matches(document, filter)? {
				continue;
			}
			result.matched_count += 1;
			// Updates are all-or-nothing per document
			let mut updated = document.clone();
			if query::apply_update(&mut updated, update)? {
				*document = updated;
				result.modified_count += 1;
			}
		}
		Ok(result)
	}
}

/// Document store held entirely in process memory
///
/// # Example
///
/// ```rust,ignore
/// use reinhardt_nosql_migrations::nosql::backends::InMemoryStore;
/// use bson::doc;
///
/// let store = InMemoryStore::new().with_collection("users", vec![doc! { "name": "Alice" }]);
/// assert_eq!(store.dump()["users"].len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
	state: RwLock<StoreState>,
}

impl InMemoryStore {
	/// Create an empty store
	pub fn new() -> Self {
		Self::default()
	}

	/// Seed a collection, assigning an `_id` to documents that lack one
	pub fn with_collection(self, name: impl Into<String>, documents: Vec<Document>) -> Self {
		{
			let mut state = self.state.write();
			let entry = state.collections.entry(name.into()).or_default();
			for mut document in documents {
				ensure_id(&mut document);
				entry.push(document);
			}
		}
		self
	}

	/// Clone every collection
	pub fn dump(&self) -> StoreDump {
		self.state.read().collections.clone()
	}

	/// Index descriptions of `collection` as `{name, key, ..options}` documents
	pub fn indexes(&self, collection: &str) -> Vec<Document> {
		self.state
			.read()
			.indexes
			.get(collection)
			.cloned()
			.unwrap_or_default()
	}
}

fn ensure_id(document: &mut Document) -> Bson {
	if let Some(id) = document.get("_id") {
		return id.clone();
	}
	let id = Bson::ObjectId(ObjectId::new());
	document.insert("_id", id.clone());
	id
}

fn id_to_string(id: Bson) -> String {
	match id {
		Bson::ObjectId(oid) => oid.to_hex(),
		Bson::String(s) => s,
		other => other.to_string(),
	}
}

fn index_name(index: &Document) -> &str {
	index.get_str("name").unwrap_or_default()
}

#[async_trait]
impl DocumentStore for InMemoryStore {
	async fn list_collection_names(&self) -> Result<Vec<String>> {
		Ok(self.state.read().collections.keys().cloned().collect())
	}

	async fn find_many(&self, collection: &str, filter: Document) -> Result<Vec<Document>> {
		let state = self.state.read();
		let Some(documents) = state.collections.get(collection) else {
			return Ok(Vec::new());
		};
		let mut found = Vec::new();
		for document in documents {
			if query::matches(document, &filter)? {
				found.push(document.clone());
			}
		}
		Ok(found)
	}

	async fn find_stream(&self, collection: &str, filter: Document) -> Result<DocumentStream> {
		let documents = self.find_many(collection, filter).await?;
		Ok(stream::iter(documents.into_iter().map(Ok)).boxed())
	}

	async fn insert_one(&self, collection: &str, mut document: Document) -> Result<String> {
		let id = ensure_id(&mut document);
		self.state
			.write()
			.collections
			.entry(collection.to_string())
			.or_default()
			.push(document);
		Ok(id_to_string(id))
	}

	async fn insert_many(&self, collection: &str, documents: Vec<Document>) -> Result<Vec<String>> {
		let mut state = self.state.write();
		let entry = state.collections.entry(collection.to_string()).or_default();
		let mut ids = Vec::with_capacity(documents.len());
		for mut document in documents {
			ids.push(id_to_string(ensure_id(&mut document)));
			entry.push(document);
		}
		Ok(ids)
	}

	async fn update_one(
		&self,
		collection: &str,
		filter: Document,
		update: Document,
	) -> Result<UpdateResult> {
		self.state
			.write()
			.update(collection, &filter, &update, Some(1))
	}

	async fn update_many(
		&self,
		collection: &str,
		filter: Document,
		update: Document,
	) -> Result<UpdateResult> {
		self.state.write().update(collection, &filter, &update, None)
	}

	async fn delete_many(&self, collection: &str, filter: Document) -> Result<u64> {
		let mut state = self.state.write();
		let Some(documents) = state.collections.get_mut(collection) else {
			return Ok(0);
		};
		let doomed = documents
			.iter()
			.map(|document| query::matches(document, &filter))
			.collect::<Result<Vec<bool>>>()?;
		let mut doomed = doomed.into_iter();
		let before = documents.len();
		documents.retain(|_| !doomed.next().unwrap_or(false));
		Ok((before - documents.len()) as u64)
	}

	async fn rename_collection(&self, from: &str, to: &str) -> Result<()> {
		let mut state = self.state.write();
		if state.collections.contains_key(to) {
			return Err(NoSQLError::InvalidOperation(format!(
				"target collection '{}' already exists",
				to
			)));
		}
		let documents = state
			.collections
			.remove(from)
			.ok_or_else(|| NoSQLError::NotFound(format!("collection '{}'", from)))?;
		state.collections.insert(to.to_string(), documents);
		if let Some(indexes) = state.indexes.remove(from) {
			state.indexes.insert(to.to_string(), indexes);
		}
		Ok(())
	}

	async fn drop_collection(&self, collection: &str) -> Result<()> {
		let mut state = self.state.write();
		state.collections.remove(collection);
		state.indexes.remove(collection);
		Ok(())
	}

	async fn list_index_names(&self, collection: &str) -> Result<Vec<String>> {
		Ok(self
			.indexes(collection)
			.iter()
			.map(|index| index_name(index).to_string())
			.collect())
	}

	async fn create_index(
		&self,
		collection: &str,
		name: &str,
		keys: Document,
		options: Document,
	) -> Result<()> {
		let mut description = doc! { "name": name, "key": keys };
		for (key, value) in options {
			description.insert(key, value);
		}

		let mut state = self.state.write();
		state
			.collections
			.entry(collection.to_string())
			.or_default();
		let indexes = state.indexes.entry(collection.to_string()).or_default();
		match indexes.iter().find(|index| index_name(index) == name) {
			Some(existing) if *existing == description => Ok(()),
			Some(existing) => Err(NoSQLError::InvalidOperation(format!(
				"index '{}' on '{}' already exists with a different definition: {}",
				name, collection, existing
			))),
			None => {
				indexes.push(description);
				Ok(())
			}
		}
	}

	async fn drop_index(&self, collection: &str, name: &str) -> Result<()> {
		let mut state = self.state.write();
		let indexes = state.indexes.entry(collection.to_string()).or_default();
		let before = indexes.len();
		indexes.retain(|index| index_name(index) != name);
		if indexes.len() == before {
			return Err(NoSQLError::NotFound(format!(
				"index '{}' on '{}'",
				name, collection
			)));
		}
		Ok(())
	}
}
