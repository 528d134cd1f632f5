//! Dry-run store wrapper
//!
//! [`DryRunStore`] wraps another store, lets reads through and replaces every
//! mutation with a log line plus an entry in its call history. Migration
//! actions run unchanged on top of it.

use async_trait::async_trait;
use bson::{Bson, Document};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

use crate::nosql::error::Result;
use crate::nosql::traits::DocumentStore;
use crate::nosql::types::{DocumentStream, UpdateResult};

/// A mutating call intercepted by [`DryRunStore`]
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
	InsertOne {
		collection: String,
		document: Document,
	},
	InsertMany {
		collection: String,
		documents: Vec<Document>,
	},
	UpdateOne {
		collection: String,
		filter: Document,
		update: Document,
	},
	UpdateMany {
		collection: String,
		filter: Document,
		update: Document,
	},
	DeleteMany {
		collection: String,
		filter: Document,
	},
	RenameCollection {
		from: String,
		to: String,
	},
	DropCollection {
		collection: String,
	},
	CreateIndex {
		collection: String,
		name: String,
		keys: Document,
		options: Document,
	},
	DropIndex {
		collection: String,
		name: String,
	},
}

impl fmt::Display for StoreCall {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			StoreCall::InsertOne {
				collection,
				document,
			} => write!(f, "db.{}.insert_one({})", collection, document),
			StoreCall::InsertMany {
				collection,
				documents,
			} => write!(f, "db.{}.insert_many(<{} documents>)", collection, documents.len()),
			StoreCall::UpdateOne {
				collection,
				filter,
				update,
			} => write!(f, "db.{}.update_one({}, {})", collection, filter, update),
			StoreCall::UpdateMany {
				collection,
				filter,
				update,
			} => write!(f, "db.{}.update_many({}, {})", collection, filter, update),
			StoreCall::DeleteMany { collection, filter } => {
				write!(f, "db.{}.delete_many({})", collection, filter)
			}
			StoreCall::RenameCollection { from, to } => write!(f, "db.{}.rename({})", from, to),
			StoreCall::DropCollection { collection } => write!(f, "db.{}.drop()", collection),
			StoreCall::CreateIndex {
				collection,
				name,
				keys,
				options,
			} => write!(
				f,
				"db.{}.create_index({}, name={}, {})",
				collection, keys, name, options
			),
			StoreCall::DropIndex { collection, name } => {
				write!(f, "db.{}.drop_index({})", collection, name)
			}
		}
	}
}

/// Store wrapper that reports mutations instead of executing them
pub struct DryRunStore {
	inner: Arc<dyn DocumentStore>,
	calls: Mutex<Vec<StoreCall>>,
}

impl DryRunStore {
	/// Wrap `inner`
	pub fn new(inner: Arc<dyn DocumentStore>) -> Self {
		Self {
			inner,
			calls: Mutex::new(Vec::new()),
		}
	}

	/// Every mutation intercepted so far, in call order
	pub fn calls(&self) -> Vec<StoreCall> {
		self.calls.lock().clone()
	}

	fn record(&self, call: StoreCall) {
		tracing::info!(target: "reinhardt_nosql_migrations::dry_run", "{}", call);
		self.calls.lock().push(call);
	}
}

fn planned_id(document: &Document) -> String {
	match document.get("_id") {
		Some(Bson::ObjectId(oid)) => oid.to_hex(),
		Some(Bson::String(s)) => s.clone(),
		Some(other) => other.to_string(),
		None => String::new(),
	}
}

#[async_trait]
impl DocumentStore for DryRunStore {
	async fn list_collection_names(&self) -> Result<Vec<String>> {
		self.inner.list_collection_names().await
	}

	async fn find_many(&self, collection: &str, filter: Document) -> Result<Vec<Document>> {
		self.inner.find_many(collection, filter).await
	}

	async fn find_stream(&self, collection: &str, filter: Document) -> Result<DocumentStream> {
		self.inner.find_stream(collection, filter).await
	}

	async fn insert_one(&self, collection: &str, document: Document) -> Result<String> {
		let id = planned_id(&document);
		self.record(StoreCall::InsertOne {
			collection: collection.to_string(),
			document,
		});
		Ok(id)
	}

	async fn insert_many(&self, collection: &str, documents: Vec<Document>) -> Result<Vec<String>> {
		let ids = documents.iter().map(planned_id).collect();
		self.record(StoreCall::InsertMany {
			collection: collection.to_string(),
			documents,
		});
		Ok(ids)
	}

	async fn update_one(
		&self,
		collection: &str,
		filter: Document,
		update: Document,
	) -> Result<UpdateResult> {
		let matched = self.inner.find_many(collection, filter.clone()).await?.len().min(1) as u64;
		self.record(StoreCall::UpdateOne {
			collection: collection.to_string(),
			filter,
			update,
		});
		Ok(UpdateResult::new(matched, 0))
	}

	async fn update_many(
		&self,
		collection: &str,
		filter: Document,
		update: Document,
	) -> Result<UpdateResult> {
		let matched = self.inner.find_many(collection, filter.clone()).await?.len() as u64;
		self.record(StoreCall::UpdateMany {
			collection: collection.to_string(),
			filter,
			update,
		});
		Ok(UpdateResult::new(matched, 0))
	}

	async fn delete_many(&self, collection: &str, filter: Document) -> Result<u64> {
		let matched = self.inner.find_many(collection, filter.clone()).await?.len();
		self.record(StoreCall::DeleteMany {
			collection: collection.to_string(),
			filter,
		});
		Ok(matched as u64)
	}

	async fn rename_collection(&self, from: &str, to: &str) -> Result<()> {
		self.record(StoreCall::RenameCollection {
			from: from.to_string(),
			to: to.to_string(),
		});
		Ok(())
	}

	async fn drop_collection(&self, collection: &str) -> Result<()> {
		self.record(StoreCall::DropCollection {
			collection: collection.to_string(),
		});
		Ok(())
	}

	async fn list_index_names(&self, collection: &str) -> Result<Vec<String>> {
		self.inner.list_index_names(collection).await
	}

	async fn create_index(
		&self,
		collection: &str,
		name: &str,
		keys: Document,
		options: Document,
	) -> Result<()> {
		self.record(StoreCall::CreateIndex {
			collection: collection.to_string(),
			name: name.to_string(),
			keys,
			options,
		});
		Ok(())
	}

	async fn drop_index(&self, collection: &str, name: &str) -> Result<()> {
		self.record(StoreCall::DropIndex {
			collection: collection.to_string(),
			name: name.to_string(),
		});
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::nosql::backends::InMemoryStore;
	use bson::doc;
	use rstest::rstest;

	#[rstest]
	#[tokio::test]
	async fn test_mutations_are_recorded_not_executed() {
		let inner = Arc::new(InMemoryStore::new().with_collection("users", vec![doc! { "_id": 1 }]));
		let store = DryRunStore::new(inner.clone());
		let before = inner.dump();

		store.rename_collection("users", "people").await.unwrap();
		let result = store
			.update_one("users", doc! { "_id": 1 }, doc! { "$set": { "x": 1 } })
			.await
			.unwrap();
		store.drop_collection("users").await.unwrap();

		assert_eq!(result.matched_count, 1);
		assert!(store.calls()[1].to_string().starts_with("db.users.update_one("));
		assert_eq!(inner.dump(), before);
		assert_eq!(store.calls().len(), 3);
		assert_eq!(
			store.calls()[0],
			StoreCall::RenameCollection {
				from: "users".to_string(),
				to: "people".to_string()
			}
		);
	}

	#[rstest]
	#[tokio::test]
	async fn test_reads_pass_through() {
		let inner = Arc::new(InMemoryStore::new().with_collection("users", vec![doc! { "a": 1 }]));
		let store = DryRunStore::new(inner);

		assert_eq!(store.find_many("users", doc! {}).await.unwrap().len(), 1);
		assert_eq!(
			store.list_collection_names().await.unwrap(),
			vec!["users".to_string()]
		);
		assert!(store.calls().is_empty());
	}

	#[rstest]
	#[case(
		StoreCall::DropCollection { collection: "users".to_string() },
		"db.users.drop()"
	)]
	#[case(
		StoreCall::DropIndex { collection: "users".to_string(), name: "email".to_string() },
		"db.users.drop_index(email)"
	)]
	fn test_call_display(#[case] call: StoreCall, #[case] expected: &str) {
		assert_eq!(call.to_string(), expected);
	}

	#[rstest]
	#[tokio::test]
	async fn test_index_calls_are_recorded() {
		let inner = Arc::new(InMemoryStore::new());
		let store = DryRunStore::new(inner.clone());

		store
			.create_index("users", "email", doc! { "email": 1 }, doc! { "unique": true })
			.await
			.unwrap();

		assert!(inner.indexes("users").is_empty());
		assert_eq!(
			store.calls(),
			vec![StoreCall::CreateIndex {
				collection: "users".to_string(),
				name: "email".to_string(),
				keys: doc! { "email": 1 },
				options: doc! { "unique": true },
			}]
		);
	}
}
