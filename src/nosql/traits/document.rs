//! Document-oriented store trait
//!
//! This module defines the store handle migration actions talk to. Only the
//! operations the engine needs are exposed: filtered reads, targeted updates,
//! collection-level rename and drop, and named indexes.

use async_trait::async_trait;
use bson::Document;

use super::super::error::Result;
use super::super::types::{DocumentStream, UpdateResult};

/// Trait for document-oriented stores migrations run against
///
/// Filters and updates use the MongoDB query language. Every backend supports
/// at least this subset:
///
/// - filters: equality on dotted key paths, `$exists`, `$ne`, `$in`, `$nin`
///   and a top-level `$or`
/// - updates: `$set`, `$unset` and `$rename`, with dotted key paths where a
///   numeric segment addresses a list item
///
/// # Example
///
/// ```rust,ignore
/// use reinhardt_nosql_migrations::nosql::traits::DocumentStore;
/// use bson::doc;
///
/// async fn drop_nickname(store: &dyn DocumentStore) -> Result<u64> {
///     let result = store
///         .update_many(
///             "users",
///             doc! { "nickname": { "$exists": true } },
///             doc! { "$unset": { "nickname": "" } },
///         )
///         .await?;
///     Ok(result.modified_count)
/// }
/// ```
#[async_trait]
pub trait DocumentStore: Send + Sync {
	/// Lists the names of every collection that currently exists
	async fn list_collection_names(&self) -> Result<Vec<String>>;

	/// Finds every document in `collection` matching `filter`
	///
	/// A missing collection yields an empty vector.
	async fn find_many(&self, collection: &str, filter: Document) -> Result<Vec<Document>>;

	/// Streams the documents in `collection` matching `filter`
	///
	/// Unlike [`find_many`](Self::find_many) the result is never held in
	/// memory as a whole.
	async fn find_stream(&self, collection: &str, filter: Document) -> Result<DocumentStream>;

	/// Inserts a single document and returns its id rendered as a string
	async fn insert_one(&self, collection: &str, document: Document) -> Result<String>;

	/// Inserts several documents and returns their ids
	async fn insert_many(&self, collection: &str, documents: Vec<Document>) -> Result<Vec<String>>;

	/// Applies `update` to the first document matching `filter`
	async fn update_one(
		&self,
		collection: &str,
		filter: Document,
		update: Document,
	) -> Result<UpdateResult>;

	/// Applies `update` to every document matching `filter`
	async fn update_many(
		&self,
		collection: &str,
		filter: Document,
		update: Document,
	) -> Result<UpdateResult>;

	/// Deletes every document matching `filter` and returns how many were removed
	async fn delete_many(&self, collection: &str, filter: Document) -> Result<u64>;

	/// Renames a collection, indexes included
	///
	/// Fails when `from` does not exist or `to` already exists.
	async fn rename_collection(&self, from: &str, to: &str) -> Result<()>;

	/// Drops a collection; dropping a missing collection is not an error
	async fn drop_collection(&self, collection: &str) -> Result<()>;

	/// Names of the indexes declared on `collection`, `_id_` excluded
	///
	/// A missing collection has no indexes.
	async fn list_index_names(&self, collection: &str) -> Result<Vec<String>>;

	/// Creates the index `name` over `keys`
	///
	/// Creating an index that already exists with the same definition is a
	/// no-op; a different definition under the same name is an error.
	async fn create_index(
		&self,
		collection: &str,
		name: &str,
		keys: Document,
		options: Document,
	) -> Result<()>;

	/// Drops the index `name`; fails when it does not exist
	async fn drop_index(&self, collection: &str, name: &str) -> Result<()>;
}
