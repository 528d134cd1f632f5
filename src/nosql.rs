//! Document store boundary
//!
//! Migrations never talk to a database driver directly. They go through the
//! [`DocumentStore`] trait, which has three implementations:
//!
//! - [`InMemoryStore`]: process-local store used by tests and examples
//! - [`DryRunStore`]: wrapper that reports mutations instead of executing them
//! - `MongoStore`: MongoDB driver backend (requires the `mongodb` feature)

pub mod backends;
pub mod error;
pub mod traits;
pub mod types;

pub use backends::{DryRunStore, InMemoryStore, StoreCall};
pub use error::{NoSQLError, Result};
pub use traits::DocumentStore;
pub use types::{DocumentStream, UpdateResult};
