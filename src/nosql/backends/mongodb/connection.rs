//! MongoDB connection and store implementation
//!
//! # Example
//!
//! ```rust,no_run
//! use reinhardt_nosql_migrations::nosql::backends::mongodb::MongoStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MongoStore::builder()
//!     .url("mongodb://localhost:27017")
//!     .database("myapp")
//!     .build()
//!     .await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use bson::{Bson, Document, doc};
use futures::stream::{StreamExt, TryStreamExt};
use mongodb::options::IndexOptions;
use mongodb::{Client, Database, IndexModel};
use std::sync::Arc;

use crate::nosql::error::{NoSQLError, Result};
use crate::nosql::traits::DocumentStore;
use crate::nosql::types::{DocumentStream, UpdateResult};

/// MongoDB-backed [`DocumentStore`]
#[derive(Clone)]
pub struct MongoStore {
	client: Arc<Client>,
	database_name: String,
}

/// Builder for configuring MongoDB connections
pub struct MongoStoreBuilder {
	url: String,
	database: String,
	max_pool_size: Option<u32>,
	min_pool_size: Option<u32>,
	max_idle_time_secs: Option<u64>,
}

impl Default for MongoStoreBuilder {
	fn default() -> Self {
		Self::new()
	}
}

impl MongoStoreBuilder {
	/// Create a new builder with default settings
	pub fn new() -> Self {
		Self {
			url: "mongodb://localhost:27017".to_string(),
			database: "test".to_string(),
			max_pool_size: None,
			min_pool_size: None,
			max_idle_time_secs: None,
		}
	}

	/// Set the MongoDB connection URL
	pub fn url(mut self, url: impl Into<String>) -> Self {
		self.url = url.into();
		self
	}

	/// Set the database name
	pub fn database(mut self, database: impl Into<String>) -> Self {
		self.database = database.into();
		self
	}

	/// Set the maximum connection pool size
	pub fn max_pool_size(mut self, size: u32) -> Self {
		self.max_pool_size = Some(size);
		self
	}

	/// Set the minimum connection pool size
	pub fn min_pool_size(mut self, size: u32) -> Self {
		self.min_pool_size = Some(size);
		self
	}

	/// Set the maximum idle time for connections in seconds
	pub fn max_idle_time_secs(mut self, secs: u64) -> Self {
		self.max_idle_time_secs = Some(secs);
		self
	}

	/// Build the store
	pub async fn build(self) -> Result<MongoStore> {
		use mongodb::options::ClientOptions;
		use std::time::Duration;

		let mut options = ClientOptions::parse(&self.url)
			.await
			.map_err(|e| NoSQLError::ConnectionError(e.to_string()))?;

		if let Some(max_size) = self.max_pool_size {
			options.max_pool_size = Some(max_size);
		}

		if let Some(min_size) = self.min_pool_size {
			options.min_pool_size = Some(min_size);
		}

		if let Some(idle_time) = self.max_idle_time_secs {
			options.max_idle_time = Some(Duration::from_secs(idle_time));
		}

		let client = Client::with_options(options)
			.map_err(|e| NoSQLError::ConnectionError(e.to_string()))?;

		Ok(MongoStore {
			client: Arc::new(client),
			database_name: self.database,
		})
	}
}

impl MongoStore {
	/// Connect using a connection string; the database defaults to `test`
	pub async fn connect(url: &str) -> Result<Self> {
		let client = Client::with_uri_str(url)
			.await
			.map_err(|e| NoSQLError::ConnectionError(e.to_string()))?;

		Ok(Self {
			client: Arc::new(client),
			database_name: "test".to_string(),
		})
	}

	/// Create a builder for configuring the MongoDB connection
	pub fn builder() -> MongoStoreBuilder {
		MongoStoreBuilder::new()
	}

	/// Set the database name to use
	pub fn with_database(mut self, database_name: &str) -> Self {
		self.database_name = database_name.to_string();
		self
	}

	/// Get the MongoDB database instance
	pub fn database(&self) -> Database {
		self.client.database(&self.database_name)
	}
}

fn id_to_string(id: Bson) -> String {
	match id {
		Bson::ObjectId(oid) => oid.to_hex(),
		Bson::String(s) => s,
		other => other.to_string(),
	}
}

#[async_trait]
impl DocumentStore for MongoStore {
	async fn list_collection_names(&self) -> Result<Vec<String>> {
		Ok(self.database().list_collection_names().await?)
	}

	async fn find_many(&self, collection: &str, filter: Document) -> Result<Vec<Document>> {
		self.find_stream(collection, filter).await?.try_collect().await
	}

	async fn find_stream(&self, collection: &str, filter: Document) -> Result<DocumentStream> {
		let coll = self.database().collection::<Document>(collection);
		let cursor = coll
			.find(filter)
			.await
			.map_err(|e| NoSQLError::ExecutionError(e.to_string()))?;

		Ok(cursor
			.map_err(|e| NoSQLError::ExecutionError(e.to_string()))
			.boxed())
	}

	async fn insert_one(&self, collection: &str, document: Document) -> Result<String> {
		let coll = self.database().collection::<Document>(collection);
		let result = coll
			.insert_one(document)
			.await
			.map_err(|e| NoSQLError::ExecutionError(e.to_string()))?;

		Ok(id_to_string(result.inserted_id))
	}

	async fn insert_many(&self, collection: &str, documents: Vec<Document>) -> Result<Vec<String>> {
		if documents.is_empty() {
			return Ok(Vec::new());
		}
		let coll = self.database().collection::<Document>(collection);
		let result = coll
			.insert_many(documents)
			.await
			.map_err(|e| NoSQLError::ExecutionError(e.to_string()))?;

		let mut ids: Vec<(usize, Bson)> = result.inserted_ids.into_iter().collect();
		ids.sort_by_key(|(index, _)| *index);
		Ok(ids.into_iter().map(|(_, id)| id_to_string(id)).collect())
	}

	async fn update_one(
		&self,
		collection: &str,
		filter: Document,
		update: Document,
	) -> Result<UpdateResult> {
		let coll = self.database().collection::<Document>(collection);
		let result = coll
			.update_one(filter, update)
			.await
			.map_err(|e| NoSQLError::ExecutionError(e.to_string()))?;

		Ok(UpdateResult::new(result.matched_count, result.modified_count))
	}

	async fn update_many(
		&self,
		collection: &str,
		filter: Document,
		update: Document,
	) -> Result<UpdateResult> {
		let coll = self.database().collection::<Document>(collection);
		let result = coll
			.update_many(filter, update)
			.await
			.map_err(|e| NoSQLError::ExecutionError(e.to_string()))?;

		Ok(UpdateResult::new(result.matched_count, result.modified_count))
	}

	async fn delete_many(&self, collection: &str, filter: Document) -> Result<u64> {
		let coll = self.database().collection::<Document>(collection);
		let result = coll
			.delete_many(filter)
			.await
			.map_err(|e| NoSQLError::ExecutionError(e.to_string()))?;

		Ok(result.deleted_count)
	}

	async fn rename_collection(&self, from: &str, to: &str) -> Result<()> {
		let command = doc! {
			"renameCollection": format!("{}.{}", self.database_name, from),
			"to": format!("{}.{}", self.database_name, to),
		};
		self.client
			.database("admin")
			.run_command(command)
			.await
			.map_err(|e| NoSQLError::ExecutionError(e.to_string()))?;
		Ok(())
	}

	async fn drop_collection(&self, collection: &str) -> Result<()> {
		self.database()
			.collection::<Document>(collection)
			.drop()
			.await
			.map_err(|e| NoSQLError::ExecutionError(e.to_string()))
	}

	async fn list_index_names(&self, collection: &str) -> Result<Vec<String>> {
		// Listing indexes of a missing namespace is a server error
		let exists = self
			.list_collection_names()
			.await?
			.iter()
			.any(|name| name == collection);
		if !exists {
			return Ok(Vec::new());
		}
		let names = self
			.database()
			.collection::<Document>(collection)
			.list_index_names()
			.await
			.map_err(|e| NoSQLError::ExecutionError(e.to_string()))?;
		Ok(names.into_iter().filter(|name| name != "_id_").collect())
	}

	async fn create_index(
		&self,
		collection: &str,
		name: &str,
		keys: Document,
		options: Document,
	) -> Result<()> {
		let mut options: IndexOptions = bson::deserialize_from_document(options)
			.map_err(|e| NoSQLError::SerializationError(e.to_string()))?;
		options.name = Some(name.to_string());
		let model = IndexModel::builder().keys(keys).options(options).build();

		self.database()
			.collection::<Document>(collection)
			.create_index(model)
			.await
			.map_err(|e| NoSQLError::ExecutionError(e.to_string()))?;
		Ok(())
	}

	async fn drop_index(&self, collection: &str, name: &str) -> Result<()> {
		self.database()
			.collection::<Document>(collection)
			.drop_index(name)
			.await
			.map_err(|e| NoSQLError::ExecutionError(e.to_string()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	fn test_builder_defaults() {
		let builder = MongoStoreBuilder::new();
		assert_eq!(builder.url, "mongodb://localhost:27017");
		assert_eq!(builder.database, "test");
		assert!(builder.max_pool_size.is_none());
	}

	#[rstest]
	fn test_builder_chain() {
		let builder = MongoStore::builder()
			.url("mongodb://db:27017")
			.database("app")
			.max_pool_size(50)
			.min_pool_size(5)
			.max_idle_time_secs(60);

		assert_eq!(builder.url, "mongodb://db:27017");
		assert_eq!(builder.database, "app");
		assert_eq!(builder.max_pool_size, Some(50));
		assert_eq!(builder.min_pool_size, Some(5));
		assert_eq!(builder.max_idle_time_secs, Some(60));
	}
}
