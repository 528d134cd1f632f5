//! Schema history
//!
//! The history keeps the last applied schema snapshot together with the
//! unit that produced it, and the names of applied units.

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{Bson, Document, doc};
use parking_lot::Mutex;
use std::sync::Arc;

use super::{MigrationError, Result};
use super::schema::Schema;
use crate::nosql::{DocumentStore, NoSQLError};

/// Last applied schema snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaRecord {
	pub schema: Schema,
	/// Unit whose application produced `schema`, `None` when nothing is applied
	pub unit: Option<String>,
}

/// Where the runner persists migration state
#[async_trait]
pub trait SchemaHistory: Send + Sync {
	async fn load_last_schema(&self) -> Result<Option<SchemaRecord>>;

	async fn save_schema(&self, snapshot: &Schema, unit_id: Option<&str>) -> Result<()>;

	/// Applied unit names in application order
	async fn applied_units(&self) -> Result<Vec<String>>;

	async fn record_applied(&self, unit: &str) -> Result<()>;

	async fn record_unapplied(&self, unit: &str) -> Result<()>;
}

#[derive(Debug, Default)]
struct HistoryState {
	schema: Option<SchemaRecord>,
	applied: Vec<String>,
}

/// History kept in process memory
#[derive(Debug, Default)]
pub struct InMemoryHistory {
	state: Mutex<HistoryState>,
}

impl InMemoryHistory {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl SchemaHistory for InMemoryHistory {
	async fn load_last_schema(&self) -> Result<Option<SchemaRecord>> {
		Ok(self.state.lock().schema.clone())
	}

	async fn save_schema(&self, snapshot: &Schema, unit_id: Option<&str>) -> Result<()> {
		self.state.lock().schema = Some(SchemaRecord {
			schema: snapshot.clone(),
			unit: unit_id.map(str::to_string),
		});
		Ok(())
	}

	async fn applied_units(&self) -> Result<Vec<String>> {
		Ok(self.state.lock().applied.clone())
	}

	async fn record_applied(&self, unit: &str) -> Result<()> {
		let mut state = self.state.lock();
		if !state.applied.iter().any(|name| name == unit) {
			state.applied.push(unit.to_string());
		}
		Ok(())
	}

	async fn record_unapplied(&self, unit: &str) -> Result<()> {
		self.state.lock().applied.retain(|name| name != unit);
		Ok(())
	}
}

/// History stored in a collection of the migrated store
///
/// The collection holds one `{type: "schema", value, unit}` record and one
/// `{type: "migrations", value: [names]}` record.
pub struct StoreHistory {
	store: Arc<dyn DocumentStore>,
	collection: String,
}

impl std::fmt::Debug for StoreHistory {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("StoreHistory")
			.field("collection", &self.collection)
			.finish()
	}
}

impl StoreHistory {
	pub fn new(store: Arc<dyn DocumentStore>, collection: impl Into<String>) -> Self {
		Self {
			store,
			collection: collection.into(),
		}
	}

	pub fn collection(&self) -> &str {
		&self.collection
	}

	async fn record(&self, kind: &str) -> Result<Option<Document>> {
		let mut records = self
			.store
			.find_many(&self.collection, doc! { "type": kind })
			.await?;
		Ok(records.pop())
	}

	/// Insert `record`, then remove the records of its type it replaces
	///
	/// A failed insert leaves the previous record in place.
	async fn replace_record(&self, mut record: Document) -> Result<()> {
		let kind = record.get_str("type").unwrap_or_default().to_string();
		let id = ObjectId::new();
		record.insert("_id", id);
		self.store.insert_one(&self.collection, record).await?;
		let removed = self
			.store
			.delete_many(&self.collection, doc! { "type": kind.as_str(), "_id": { "$ne": id } })
			.await?;
		tracing::trace!(kind = %kind, removed, "replaced history record");
		Ok(())
	}

	async fn write_applied(&self, applied: Vec<String>) -> Result<()> {
		self.replace_record(doc! { "type": "migrations", "value": applied })
			.await
	}
}

#[async_trait]
impl SchemaHistory for StoreHistory {
	async fn load_last_schema(&self) -> Result<Option<SchemaRecord>> {
		let Some(record) = self.record("schema").await? else {
			return Ok(None);
		};
		let value = record.get("value").cloned().unwrap_or(Bson::Document(Document::new()));
		Ok(Some(SchemaRecord {
			schema: Schema::from_bson(&value)?,
			unit: record.get_str("unit").ok().map(str::to_string),
		}))
	}

	async fn save_schema(&self, snapshot: &Schema, unit_id: Option<&str>) -> Result<()> {
		let unit = unit_id.map_or(Bson::Null, |unit| Bson::String(unit.to_string()));
		self.replace_record(doc! {
			"type": "schema",
			"value": snapshot.to_bson(),
			"unit": unit,
		})
		.await
	}

	async fn applied_units(&self) -> Result<Vec<String>> {
		let Some(record) = self.record("migrations").await? else {
			return Ok(Vec::new());
		};
		let values = record.get_array("value").map_err(|e| {
			NoSQLError::SerializationError(format!("malformed migrations record: {}", e))
		})?;
		values
			.iter()
			.map(|value| {
				value.as_str().map(str::to_string).ok_or_else(|| {
					MigrationError::from(NoSQLError::SerializationError(format!(
						"migration name is not a string: {}",
						value
					)))
				})
			})
			.collect()
	}

	async fn record_applied(&self, unit: &str) -> Result<()> {
		let mut applied = self.applied_units().await?;
		if applied.iter().any(|name| name == unit) {
			return Ok(());
		}
		applied.push(unit.to_string());
		self.write_applied(applied).await
	}

	async fn record_unapplied(&self, unit: &str) -> Result<()> {
		let mut applied = self.applied_units().await?;
		applied.retain(|name| name != unit);
		self.write_applied(applied).await
	}
}
