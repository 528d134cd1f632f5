//! Document store backends

pub mod dry_run;
pub mod memory;
#[cfg(feature = "mongodb")]
pub mod mongodb;

pub use dry_run::{DryRunStore, StoreCall};
pub use memory::InMemoryStore;
