//! Result and stream types shared by document store backends

use bson::Document;
use futures::stream::BoxStream;

use super::error::Result;

/// Documents read lazily from a collection
pub type DocumentStream = BoxStream<'static, Result<Document>>;

/// Result of an update operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateResult {
	/// Number of documents matched by the filter
	pub matched_count: u64,
	/// Number of documents actually modified
	pub modified_count: u64,
}

impl UpdateResult {
	pub fn new(matched_count: u64, modified_count: u64) -> Self {
		Self {
			matched_count,
			modified_count,
		}
	}
}
