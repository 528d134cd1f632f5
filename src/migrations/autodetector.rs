//! Schema change detection
//!
//! [`SchemaAutodetector`] compares the last applied schema against a target
//! schema and synthesizes the actions turning one into the other.
//!
//! Types or fields that disappear on one side and appear on the other are
//! rename candidates. A candidate pair is scored and accepted only when its
//! score reaches the configured threshold and it is the only candidate above
//! the threshold for both of its sides. Everything else falls back to
//! drop + create.

use indexmap::IndexMap;
use petgraph::Undirected;
use petgraph::graph::{Graph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strsim::{jaro_winkler, levenshtein};

use super::config::ConfigError;
use super::fields::FieldHandlerRegistry;
use super::operations::{
	Action, AlterDocument, AlterEmbedded, AlterField, AlterIndex, CreateDocument, CreateEmbedded,
	CreateField, CreateIndex, DropDocument, DropEmbedded, DropField, DropIndex, RenameDocument,
	RenameEmbedded, RenameField,
};
use super::schema::{DocumentSchema, FieldParams, Schema, is_embedded};
use super::{SchemaError, SchemaResult};

/// Tuning of rename detection
///
/// Document types are scored by the share of identical field definitions,
/// plus `parameters_bonus` when their document parameters are identical.
/// Fields are scored by parameter agreement blended with a hybrid name
/// similarity:
/// - Jaro-Winkler: prefix similarity ("email" vs "email_address")
/// - Levenshtein: edit distance ("colour" vs "color")
///
/// # Examples
///
/// ```rust,ignore
/// use reinhardt_nosql_migrations::migrations::SimilarityConfig;
///
/// let config = SimilarityConfig::default();
/// assert_eq!(config.document_threshold(), 0.7);
///
/// // Stricter matching
/// let config = SimilarityConfig::new(0.9, 0.95).unwrap();
///
/// assert!(SimilarityConfig::new(0.3, 0.8).is_err());
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
	/// Minimum document type score (0.5 - 1.0)
	document_threshold: f64,
	/// Minimum field score (0.5 - 1.0)
	field_threshold: f64,
	/// Added to a document type score when document parameters match (0.0 - 0.5)
	parameters_bonus: f64,
	/// Weight of Jaro-Winkler in name similarity
	jaro_winkler_weight: f64,
	/// Weight of normalized Levenshtein in name similarity
	levenshtein_weight: f64,
	/// Share of name similarity in a field score, the rest being parameter agreement
	name_weight: f64,
}

impl SimilarityConfig {
	/// Custom thresholds with the default weights
	///
	/// # Errors
	///
	/// Returns an error if a threshold is outside 0.5 - 1.0. Lower thresholds
	/// would treat unrelated types as renames.
	pub fn new(document_threshold: f64, field_threshold: f64) -> Result<Self, ConfigError> {
		Self::with_weights(document_threshold, field_threshold, 0.7, 0.3)
	}

	/// Custom thresholds and name similarity weights
	///
	/// # Errors
	///
	/// Returns an error if a threshold is outside 0.5 - 1.0, a weight is
	/// outside 0.0 - 1.0 or the weights do not sum to 1.0.
	pub fn with_weights(
		document_threshold: f64,
		field_threshold: f64,
		jaro_winkler_weight: f64,
		levenshtein_weight: f64,
	) -> Result<Self, ConfigError> {
		let config = Self {
			document_threshold,
			field_threshold,
			jaro_winkler_weight,
			levenshtein_weight,
			..Self::default()
		};
		config.validate()?;
		Ok(config)
	}

	pub fn with_parameters_bonus(mut self, bonus: f64) -> Result<Self, ConfigError> {
		self.parameters_bonus = bonus;
		self.validate()?;
		Ok(self)
	}

	pub fn with_name_weight(mut self, weight: f64) -> Result<Self, ConfigError> {
		self.name_weight = weight;
		self.validate()?;
		Ok(self)
	}

	pub fn document_threshold(&self) -> f64 {
		self.document_threshold
	}

	pub fn field_threshold(&self) -> f64 {
		self.field_threshold
	}

	pub fn parameters_bonus(&self) -> f64 {
		self.parameters_bonus
	}

	/// Check every value is within its range
	pub fn validate(&self) -> Result<(), ConfigError> {
		let checks = [
			("document_threshold", self.document_threshold, 0.5..=1.0),
			("field_threshold", self.field_threshold, 0.5..=1.0),
			("parameters_bonus", self.parameters_bonus, 0.0..=0.5),
			("jaro_winkler_weight", self.jaro_winkler_weight, 0.0..=1.0),
			("levenshtein_weight", self.levenshtein_weight, 0.0..=1.0),
			("name_weight", self.name_weight, 0.0..=1.0),
		];
		for (name, value, range) in checks {
			if !range.contains(&value) {
				return Err(ConfigError::InvalidValue {
					message: format!(
						"{} must be between {} and {}, got {}",
						name,
						range.start(),
						range.end(),
						value
					),
				});
			}
		}

		// Allow small floating point errors
		let weight_sum = self.jaro_winkler_weight + self.levenshtein_weight;
		if (weight_sum - 1.0).abs() > 0.01 {
			return Err(ConfigError::InvalidValue {
				message: format!(
					"jaro_winkler_weight + levenshtein_weight must sum to 1.0, got {} + {} = {}",
					self.jaro_winkler_weight, self.levenshtein_weight, weight_sum
				),
			});
		}
		Ok(())
	}

	/// Hybrid name similarity in 0.0 - 1.0
	fn name_similarity(&self, from: &str, to: &str) -> f64 {
		let jaro_winkler_sim = jaro_winkler(from, to);

		let lev_distance = levenshtein(from, to);
		let max_len = from.chars().count().max(to.chars().count()) as f64;
		let levenshtein_sim = if max_len > 0.0 {
			1.0 - (lev_distance as f64 / max_len)
		} else {
			1.0
		};

		self.jaro_winkler_weight * jaro_winkler_sim + self.levenshtein_weight * levenshtein_sim
	}
}

impl Default for SimilarityConfig {
	fn default() -> Self {
		Self {
			document_threshold: 0.7,
			field_threshold: 0.8,
			parameters_bonus: 0.1,
			jaro_winkler_weight: 0.7,
			levenshtein_weight: 0.3,
			name_weight: 0.2,
		}
	}
}

/// Field definitions of `document` with references to `own_name` replaced,
/// so self-embedding types compare equal across a rename
fn normalized_fields(own_name: &str, document: &DocumentSchema) -> IndexMap<String, FieldParams> {
	document
		.fields
		.iter()
		.map(|(name, params)| {
			let mut params = params.clone();
			if let Some(target) = params.get_mut("target_doctype")
				&& target.as_str() == Some(own_name)
			{
				*target = Value::String("<self>".to_string());
			}
			(name.clone(), params)
		})
		.collect()
}

/// Score of `to` being `from` under a new name
pub fn document_similarity(
	from_name: &str,
	from: &DocumentSchema,
	to_name: &str,
	to: &DocumentSchema,
	config: &SimilarityConfig,
) -> f64 {
	let from_fields = normalized_fields(from_name, from);
	let to_fields = normalized_fields(to_name, to);

	let union = from_fields
		.keys()
		.chain(to_fields.keys().filter(|name| !from_fields.contains_key(*name)))
		.count();
	let field_score = if union == 0 {
		1.0
	} else {
		let identical = from_fields
			.iter()
			.filter(|(name, params)| to_fields.get(*name) == Some(*params))
			.count();
		identical as f64 / union as f64
	};

	let bonus = if from.parameters == to.parameters {
		config.parameters_bonus
	} else {
		0.0
	};
	(field_score + bonus).min(1.0)
}

/// Score of field `to` being field `from` under a new name
///
/// Fields of different types never match. `db_field` is left out of the
/// parameter comparison.
pub fn field_similarity(
	from_name: &str,
	from: &FieldParams,
	to_name: &str,
	to: &FieldParams,
	config: &SimilarityConfig,
) -> f64 {
	if from.get("type_key") != to.get("type_key") {
		return 0.0;
	}

	let keys: Vec<&String> = from
		.keys()
		.chain(to.keys().filter(|key| !from.contains_key(*key)))
		.filter(|key| key.as_str() != "db_field")
		.collect();
	let parameter_score = if keys.is_empty() {
		1.0
	} else {
		let equal = keys
			.iter()
			.filter(|key| from.get(key.as_str()) == to.get(key.as_str()))
			.count();
		equal as f64 / keys.len() as f64
	};

	(1.0 - config.name_weight) * parameter_score
		+ config.name_weight * config.name_similarity(from_name, to_name)
}

/// Pairs that are the only candidate above `threshold` on both sides
///
/// Candidates form a bipartite graph with an edge per pair scoring at least
/// `threshold`; a pair is accepted when both of its nodes have degree one.
fn unique_matches<F>(removed: &[&str], added: &[&str], threshold: f64, score: F) -> Vec<(String, String)>
where
	F: Fn(&str, &str) -> Option<f64>,
{
	let mut graph = Graph::<&str, f64, Undirected>::new_undirected();
	let removed_nodes: Vec<NodeIndex> = removed.iter().map(|name| graph.add_node(*name)).collect();
	let added_nodes: Vec<NodeIndex> = added.iter().map(|name| graph.add_node(*name)).collect();

	for (i, &from) in removed.iter().enumerate() {
		for (j, &to) in added.iter().enumerate() {
			if let Some(similarity) = score(from, to)
				&& similarity >= threshold
			{
				graph.add_edge(removed_nodes[i], added_nodes[j], similarity);
			}
		}
	}

	let mut matches = Vec::new();
	for edge in graph.edge_references() {
		let (source, target) = (edge.source(), edge.target());
		let unique = graph.edges(source).count() == 1 && graph.edges(target).count() == 1;
		if unique {
			matches.push((graph[source].to_string(), graph[target].to_string()));
		} else {
			tracing::warn!(
				from = graph[source],
				to = graph[target],
				similarity = *edge.weight(),
				"ambiguous rename candidate, falling back to drop and create"
			);
		}
	}
	matches.sort();
	matches
}

/// Document type renames from `left` to `right`, as `(old, new)` pairs
///
/// Top-level types only pair with top-level types and embedded types with
/// embedded types.
pub fn detect_document_renames(
	left: &Schema,
	right: &Schema,
	config: &SimilarityConfig,
) -> Vec<(String, String)> {
	let removed: Vec<&str> = left
		.document_types()
		.filter(|name| !right.contains(name))
		.collect();
	let added: Vec<&str> = right
		.document_types()
		.filter(|name| !left.contains(name))
		.collect();

	unique_matches(&removed, &added, config.document_threshold, |from, to| {
		if is_embedded(from) != is_embedded(to) {
			return None;
		}
		let (from_doc, to_doc) = (left.get(from).ok()?, right.get(to).ok()?);
		Some(document_similarity(from, from_doc, to, to_doc, config))
	})
}

/// Field renames between two versions of one document type, as `(old, new)` pairs
pub fn detect_field_renames(
	left: &IndexMap<String, FieldParams>,
	right: &IndexMap<String, FieldParams>,
	config: &SimilarityConfig,
) -> Vec<(String, String)> {
	let removed: Vec<&str> = left
		.keys()
		.filter(|name| !right.contains_key(*name))
		.map(String::as_str)
		.collect();
	let added: Vec<&str> = right
		.keys()
		.filter(|name| !left.contains_key(*name))
		.map(String::as_str)
		.collect();

	unique_matches(&removed, &added, config.field_threshold, |from, to| {
		Some(field_similarity(from, left.get(from)?, to, right.get(to)?, config))
	})
}

/// Actions collected so far, with the schema they lead to
struct Changes {
	schema: Schema,
	actions: Vec<Action>,
}

impl Changes {
	fn push(&mut self, action: impl Into<Action>) -> SchemaResult<()> {
		let action = action.into();
		let patch = action.to_schema_patch(&self.schema)?;
		self.schema = self.schema.apply_patch(&patch)?;
		self.actions.push(action);
		Ok(())
	}
}

/// Synthesizes the actions between two schema snapshots
///
/// Actions come in this order:
/// 1. document type renames
/// 2. new document types, each followed by its fields and indexes
/// 3. per kept document type: field drops, renames, creates, alters,
///    document parameter changes, then index alters, drops and creates
/// 4. dropped document types
///
/// # Examples
///
/// ```rust,ignore
/// use reinhardt_nosql_migrations::migrations::SchemaAutodetector;
///
/// let actions = SchemaAutodetector::new().detect_changes(&last_applied, &target)?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct SchemaAutodetector {
	similarity: SimilarityConfig,
	registry: FieldHandlerRegistry,
}

impl SchemaAutodetector {
	/// Autodetector with default similarity settings and built-in field types
	pub fn new() -> Self {
		Self {
			similarity: SimilarityConfig::default(),
			registry: FieldHandlerRegistry::with_defaults(),
		}
	}

	pub fn with_config(mut self, similarity: SimilarityConfig) -> Self {
		self.similarity = similarity;
		self
	}

	pub fn with_registry(mut self, registry: FieldHandlerRegistry) -> Self {
		self.registry = registry;
		self
	}

	/// Actions transforming `left` into `right`
	///
	/// Empty when the schemas are equal.
	///
	/// # Errors
	///
	/// Fails when either schema has malformed fields, or with
	/// [`SchemaError::SchemaMismatch`] when replaying the actions on `left`
	/// does not reproduce `right`.
	pub fn detect_changes(&self, left: &Schema, right: &Schema) -> SchemaResult<Vec<Action>> {
		self.registry.validate_schema(left)?;
		self.registry.validate_schema(right)?;

		let mut changes = Changes {
			schema: left.clone(),
			actions: Vec::new(),
		};

		for (from, to) in detect_document_renames(left, right, &self.similarity) {
			if is_embedded(&from) {
				changes.push(RenameEmbedded::new(from, to))?;
			} else {
				changes.push(RenameDocument::new(from, to))?;
			}
		}

		for (document_type, document) in right.iter() {
			if changes.schema.contains(document_type) {
				continue;
			}
			if is_embedded(document_type) {
				changes.push(CreateEmbedded::new(document_type, document.parameters.clone()))?;
			} else {
				changes.push(CreateDocument::new(document_type, document.parameters.clone()))?;
			}
			for (field, params) in &document.fields {
				changes.push(CreateField::new(document_type, field, params.clone()))?;
			}
			for (index, params) in &document.indexes {
				changes.push(CreateIndex::new(document_type, index, params.clone()))?;
			}
		}

		for (document_type, target) in right.iter() {
			self.detect_document_changes(&mut changes, document_type, target)?;
		}

		let dropped: Vec<String> = changes
			.schema
			.document_types()
			.filter(|name| !right.contains(name))
			.map(str::to_string)
			.collect();
		for document_type in dropped {
			if is_embedded(&document_type) {
				changes.push(DropEmbedded::new(document_type))?;
			} else {
				changes.push(DropDocument::new(document_type))?;
			}
		}

		if changes.schema != *right {
			return Err(SchemaError::SchemaMismatch {
				message: "replaying the detected actions does not reproduce the target schema"
					.to_string(),
			});
		}
		tracing::debug!(actions = changes.actions.len(), "detected schema changes");
		Ok(changes.actions)
	}

	/// Field and parameter changes of a document type present on both sides
	fn detect_document_changes(
		&self,
		changes: &mut Changes,
		document_type: &str,
		target: &DocumentSchema,
	) -> SchemaResult<()> {
		let current = changes.schema.get(document_type)?.clone();
		if current == *target {
			return Ok(());
		}

		let renames = detect_field_renames(&current.fields, &target.fields, &self.similarity);
		let renamed_from = |field: &str| renames.iter().any(|(from, _)| from == field);
		let renamed_to = |field: &str| renames.iter().any(|(_, to)| to == field);

		for field in current.fields.keys() {
			if !target.fields.contains_key(field) && !renamed_from(field) {
				changes.push(DropField::new(document_type, field))?;
			}
		}
		for (from, to) in &renames {
			changes.push(RenameField::new(document_type, from, to))?;
		}
		for (field, params) in &target.fields {
			if !current.fields.contains_key(field) && !renamed_to(field) {
				changes.push(CreateField::new(document_type, field, params.clone()))?;
			}
		}

		let current = changes.schema.get(document_type)?.clone();
		for (field, params) in &target.fields {
			if current.fields.get(field).is_some_and(|old| old != params) {
				changes.push(AlterField::new(document_type, field, params.clone()))?;
			}
		}

		if current.parameters != target.parameters {
			if is_embedded(document_type) {
				changes.push(AlterEmbedded::new(document_type, target.parameters.clone()))?;
			} else {
				changes.push(AlterDocument::new(document_type, target.parameters.clone()))?;
			}
		}

		for (index, params) in &target.indexes {
			if current.indexes.get(index).is_some_and(|old| old != params) {
				changes.push(AlterIndex::new(document_type, index, params.clone()))?;
			}
		}
		for index in current.indexes.keys() {
			if !target.indexes.contains_key(index) {
				changes.push(DropIndex::new(document_type, index))?;
			}
		}
		for (index, params) in &target.indexes {
			if !current.indexes.contains_key(index) {
				changes.push(CreateIndex::new(document_type, index, params.clone()))?;
			}
		}
		Ok(())
	}
}
