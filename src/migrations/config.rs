//! Migration run configuration
//!
//! Settings that used to be process-wide flags (dry run, schema-only runs,
//! the enforcement policy) are carried by [`MigrationConfig`] and threaded
//! through the runner and every action preparation. Unknown keys are
//! rejected.
//!
//! # Example
//!
//! ```toml
//! dry_run = false
//! policy = "relaxed"
//! max_embedding_depth = 4
//!
//! [similarity]
//! document_threshold = 0.75
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::autodetector::SimilarityConfig;

/// Enforcement mode for situations backward runs cannot resolve on their own
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPolicy {
	/// Raise a policy violation
	#[default]
	Strict,
	/// Log a warning and skip the step
	Relaxed,
}

#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MigrationConfig {
	/// Report store mutations instead of executing them
	pub dry_run: bool,

	/// Only update the recorded schema, never touch stored documents
	pub schema_only: bool,

	pub policy: MigrationPolicy,

	/// Path length up to which embedding cycles are followed when resolving
	/// paths of self-embedding document types; paths without a cycle are not
	/// limited
	pub max_embedding_depth: Option<usize>,

	/// Rename detection tuning
	pub similarity: SimilarityConfig,

	/// Collection holding the recorded schema and applied migrations
	pub history_collection: String,
}

impl Default for MigrationConfig {
	fn default() -> Self {
		Self {
			dry_run: false,
			schema_only: false,
			policy: MigrationPolicy::Strict,
			max_embedding_depth: None,
			similarity: SimilarityConfig::default(),
			history_collection: "_migrations_data".to_string(),
		}
	}
}

impl MigrationConfig {
	pub fn with_dry_run(mut self, dry_run: bool) -> Self {
		self.dry_run = dry_run;
		self
	}

	pub fn with_schema_only(mut self, schema_only: bool) -> Self {
		self.schema_only = schema_only;
		self
	}

	pub fn with_policy(mut self, policy: MigrationPolicy) -> Self {
		self.policy = policy;
		self
	}

	pub fn with_max_embedding_depth(mut self, depth: usize) -> Self {
		self.max_embedding_depth = Some(depth);
		self
	}

	pub fn with_similarity(mut self, similarity: SimilarityConfig) -> Self {
		self.similarity = similarity;
		self
	}

	pub fn with_history_collection(mut self, collection: impl Into<String>) -> Self {
		self.history_collection = collection.into();
		self
	}

	/// Load configuration from a TOML file.
	///
	/// # Errors
	///
	/// Returns error if file cannot be read or parsed.
	pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::IoError {
			path: path.as_ref().to_path_buf(),
			source: e,
		})?;
		Self::from_toml(&content)
	}

	/// Parse configuration from a TOML string.
	pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
		let config: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
			message: e.to_string(),
		})?;
		config.similarity.validate()?;
		Ok(config)
	}
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("IO error reading {path}: {source}")]
	IoError {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("Failed to parse configuration: {message}")]
	ParseError { message: String },

	#[error("Invalid value: {message}")]
	InvalidValue { message: String },
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	fn test_default_config() {
		let config = MigrationConfig::default();

		assert!(!config.dry_run);
		assert!(!config.schema_only);
		assert_eq!(config.policy, MigrationPolicy::Strict);
		assert_eq!(config.max_embedding_depth, None);
		assert_eq!(config.history_collection, "_migrations_data");
	}

	#[rstest]
	fn test_from_toml_partial() {
		let config = MigrationConfig::from_toml(
			r#"
			policy = "relaxed"
			max_embedding_depth = 4

			[similarity]
			document_threshold = 0.75
			"#,
		)
		.unwrap();

		assert_eq!(config.policy, MigrationPolicy::Relaxed);
		assert_eq!(config.max_embedding_depth, Some(4));
		assert_eq!(config.similarity.document_threshold(), 0.75);
		assert_eq!(config.similarity.field_threshold(), 0.8);
		assert!(!config.dry_run);
	}

	#[rstest]
	#[case("policy = \"lenient\"")]
	#[case("[similarity]\ndocument_threshold = 0.1")]
	#[case("server_version = \"7.0\"")]
	fn test_from_toml_rejects(#[case] content: &str) {
		assert!(MigrationConfig::from_toml(content).is_err());
	}

	#[rstest]
	fn test_builders() {
		let config = MigrationConfig::default()
			.with_dry_run(true)
			.with_schema_only(true)
			.with_policy(MigrationPolicy::Relaxed)
			.with_max_embedding_depth(2)
			.with_history_collection("history");

		assert!(config.dry_run);
		assert!(config.schema_only);
		assert_eq!(config.policy, MigrationPolicy::Relaxed);
		assert_eq!(config.max_embedding_depth, Some(2));
		assert_eq!(config.history_collection, "history");
	}
}
