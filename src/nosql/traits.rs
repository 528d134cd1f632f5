//! Store traits

pub mod document;

pub use document::DocumentStore;
