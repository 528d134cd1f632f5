//! # Document store migrations
//!
//! Migration engine for schemaless document stores.
//!
//! ## Features
//!
//! - **Schema snapshots**: [`Schema`] describes document types, their fields and
//!   per-document parameters; [`SchemaPatch`] edits it all-or-nothing
//! - **Reversible actions**: [`Action`] mutates live collections and indexes
//!   and emits the matching schema patch
//! - **Embedded documents**: [`PathResolver`] finds every place an embedded
//!   type is stored, through nested documents and lists
//! - **Auto-detection**: [`SchemaAutodetector`] turns two snapshots into an
//!   action list, detecting renames by similarity
//! - **Migration Graph**: [`MigrationGraph`] orders units by dependency
//! - **Runner**: [`Migrator`] applies and unapplies units and records history
//!
//! ## Example
//!
//! ```rust,ignore
//! use reinhardt_nosql_migrations::migrations::{Migrator, MigrationConfig, MigrationGraph};
//! use reinhardt_nosql_migrations::nosql::InMemoryStore;
//! use std::sync::Arc;
//!
//! let store = Arc::new(InMemoryStore::new());
//! let mut migrator = Migrator::new(store, MigrationGraph::new(), MigrationConfig::default());
//! if let Some(unit) = migrator.makemigrations(&target_schema, "0001_initial")? {
//!     migrator.add_unit(unit)?;
//! }
//! migrator.upgrade(None).await?;
//! ```

pub mod autodetector;
pub mod config;
pub mod executor;
pub mod fields;
pub mod graph;
pub mod operations;
pub mod patch;
pub mod paths;
pub mod recorder;
pub mod schema;

pub use autodetector::{SchemaAutodetector, SimilarityConfig};
pub use config::{ConfigError, MigrationConfig, MigrationPolicy};
pub use executor::{ExecutionResult, Migrator};
pub use fields::{Embedding, FieldHandler, FieldHandlerRegistry};
pub use graph::{MigrationGraph, MigrationUnit};
pub use operations::{Action, MigrationContext, PreparedAction};
pub use patch::{PatchOp, SchemaPatch};
pub use paths::{DocumentPath, PathResolver, PathStep};
pub use recorder::{InMemoryHistory, SchemaHistory, SchemaRecord, StoreHistory};
pub use schema::{DocumentSchema, EMBEDDED_DOCUMENT_PREFIX, FieldParams, IndexParams, Schema};

use thiserror::Error;

use crate::nosql::NoSQLError;

/// Schema or data inconsistency
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
	#[error("Document type not found: {0}")]
	DocumentNotFound(String),

	#[error("Field not found: {document_type}.{field}")]
	FieldNotFound { document_type: String, field: String },

	#[error("Document type already exists: {0}")]
	DocumentExists(String),

	#[error("Field already exists: {document_type}.{field}")]
	FieldExists { document_type: String, field: String },

	#[error("Index not found: {document_type}.{index}")]
	IndexNotFound { document_type: String, index: String },

	#[error("Index already exists: {document_type}.{index}")]
	IndexExists { document_type: String, index: String },

	#[error("Malformed index {document_type}.{index}: {message}")]
	MalformedIndex {
		document_type: String,
		index: String,
		message: String,
	},

	#[error("Unknown field type key: {0}")]
	UnknownTypeKey(String),

	#[error("Malformed field {document_type}.{field}: {message}")]
	MalformedField {
		document_type: String,
		field: String,
		message: String,
	},

	#[error("Malformed document type {document_type}: {message}")]
	MalformedDocument {
		document_type: String,
		message: String,
	},

	#[error("Invalid default for {field}: {message}")]
	InvalidDefault { field: String, message: String },

	/// A field type change that stored values cannot follow
	#[error("Cannot convert {document_type}.{field} from {from} to {to}")]
	UnsupportedConversion {
		document_type: String,
		field: String,
		from: String,
		to: String,
	},

	/// Embedded document types reach themselves and no depth bound is configured
	#[error("Recursive embedding while resolving {0}; configure max_embedding_depth")]
	RecursiveEmbedding(String),

	#[error("Schema mismatch: {message}")]
	SchemaMismatch { message: String },
}

/// Migration dependency graph errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
	#[error("Circular dependency detected: {cycle}")]
	CircularDependency { cycle: String },

	#[error("Migration {unit} depends on unknown migration {dependency}")]
	UnknownDependency { unit: String, dependency: String },

	#[error("Duplicate migration: {0}")]
	DuplicateUnit(String),

	#[error("Migration not found: {0}")]
	UnitNotFound(String),
}

#[derive(Debug, Error)]
pub enum MigrationError {
	#[error("Schema error: {0}")]
	Schema(#[from] SchemaError),

	#[error("Graph error: {0}")]
	Graph(#[from] GraphError),

	/// Strict policy refused something relaxed policy would skip
	#[error("Policy violation: {0}")]
	PolicyViolation(String),

	#[error("Store error: {0}")]
	Store(#[from] NoSQLError),

	#[error("Configuration error: {0}")]
	Config(#[from] ConfigError),

	#[error("Migration is not applied: {0}")]
	NotApplied(String),

	/// A guarded update kept missing because the document changed under it
	#[error("Document {id} in {collection} changed concurrently on every attempt")]
	ConcurrentUpdate { collection: String, id: String },

	/// A unit failed; `completed` lists the units this run applied, or
	/// unapplied when downgrading, before it
	#[error("Migration {unit} failed: {source}")]
	UnitFailed {
		unit: String,
		completed: Vec<String>,
		#[source]
		source: Box<MigrationError>,
	},
}

pub type Result<T> = std::result::Result<T, MigrationError>;

/// Result of pure schema computations
pub type SchemaResult<T> = std::result::Result<T, SchemaError>;
