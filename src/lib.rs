//! # Reinhardt NoSQL Migrations
//!
//! Schema migrations for schemaless document stores.
//!
//! Document stores do not enforce a schema, but the applications on top of
//! them do. This crate tracks the schema those applications expect, detects
//! how it changed and rewrites stored documents to match, including
//! documents embedded inside other documents and lists.
//!
//! ## Modules
//!
//! - [`migrations`]: schema model, actions, change detection, dependency
//!   graph and runner
//! - [`nosql`]: the document store abstraction with in-memory, dry-run and
//!   MongoDB backends
//!
//! ## Feature Flags
//!
//! - `mongodb` - MongoDB store backend
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use reinhardt_nosql_migrations::migrations::{MigrationConfig, MigrationGraph, Migrator};
//! use reinhardt_nosql_migrations::nosql::InMemoryStore;
//! use std::sync::Arc;
//!
//! let mut migrator = Migrator::new(
//!     Arc::new(InMemoryStore::new()),
//!     MigrationGraph::new(),
//!     MigrationConfig::default(),
//! );
//! if let Some(unit) = migrator.makemigrations(&target_schema, "0001_initial")? {
//!     migrator.add_unit(unit)?;
//! }
//! migrator.migrate(None).await?;
//! ```

pub mod migrations;
pub mod nosql;
