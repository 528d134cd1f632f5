//! Document path resolution
//!
//! Top-level document types live in their own collection, so their data is
//! "the whole document". Embedded document types live inside other documents,
//! possibly several levels deep and possibly inside lists. [`PathResolver`]
//! finds every such location and [`DocumentPath::visit_mut`] walks it on a
//! stored document.
//!
//! Resolution is a breadth-first work-list walk over a graph of document types
//! whose edges are embedding fields.

use bson::{Bson, Document};
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;

use super::fields::{Embedding, FieldHandlerRegistry};
use super::schema::{Schema, db_field, is_embedded};
use super::{SchemaError, SchemaResult};

/// One hop from a document into an embedded document
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathStep {
	/// Descend into the document stored under this key
	Field(String),
	/// Descend into every document of the list stored under this key
	EachItem(String),
}

/// A location of a document type's data inside one collection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentPath {
	pub root_document_type: String,
	pub collection: String,
	pub steps: Vec<PathStep>,
}

impl DocumentPath {
	/// Whether the path addresses whole top-level documents
	pub fn is_root(&self) -> bool {
		self.steps.is_empty()
	}

	/// Dotted key path, with `$[]` marking list traversal
	///
	/// Empty for root paths.
	pub fn key_path(&self) -> String {
		self.steps
			.iter()
			.map(|step| match step {
				PathStep::Field(key) => key.clone(),
				PathStep::EachItem(key) => format!("{}.$[]", key),
			})
			.collect::<Vec<_>>()
			.join(".")
	}

	/// Call `f` on every document the path reaches inside `document`
	///
	/// Missing keys and values of the wrong shape are skipped. Returns `true`
	/// if any call of `f` reported a change.
	pub fn visit_mut<F>(&self, document: &mut Document, mut f: F) -> bool
	where
		F: FnMut(&mut Document) -> bool,
	{
		let mut level: Vec<&mut Document> = vec![document];
		for step in &self.steps {
			let mut next = Vec::new();
			for current in level {
				match step {
					PathStep::Field(key) => {
						if let Some(Bson::Document(inner)) = current.get_mut(key) {
							next.push(inner);
						}
					}
					PathStep::EachItem(key) => {
						if let Some(Bson::Array(items)) = current.get_mut(key) {
							for item in items.iter_mut() {
								if let Bson::Document(inner) = item {
									next.push(inner);
								}
							}
						}
					}
				}
			}
			level = next;
		}
		let mut changed = false;
		for target in level {
			changed |= f(target);
		}
		changed
	}
}

impl fmt::Display for DocumentPath {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if self.is_root() {
			write!(f, "{}", self.collection)
		} else {
			write!(f, "{}.{}", self.collection, self.key_path())
		}
	}
}

#[derive(Debug, Clone)]
struct EmbeddingEdge {
	key: String,
	embedding: Embedding,
}

/// Finds where a document type's data is stored
///
/// # Example
///
/// ```rust,ignore
/// use reinhardt_nosql_migrations::migrations::{FieldHandlerRegistry, PathResolver};
///
/// let registry = FieldHandlerRegistry::with_defaults();
/// let resolver = PathResolver::new(&schema, &registry, None)?;
/// for path in resolver.resolve("~Address")? {
///     println!("{}", path); // e.g. "user.addresses.$[]"
/// }
/// ```
pub struct PathResolver<'a> {
	schema: &'a Schema,
	graph: DiGraph<String, EmbeddingEdge>,
	nodes: BTreeMap<String, NodeIndex>,
	max_depth: Option<usize>,
}

impl<'a> PathResolver<'a> {
	/// Build the embedding graph of `schema`
	///
	/// `max_depth` bounds how deep a path may get by going around an
	/// embedding cycle: a cycle edge is only followed while the path has fewer
	/// steps than the bound. Paths without cycles always resolve in full.
	/// Without a bound, embedding cycles that lead to the resolved type are
	/// refused.
	pub fn new(
		schema: &'a Schema,
		registry: &FieldHandlerRegistry,
		max_depth: Option<usize>,
	) -> SchemaResult<Self> {
		let mut graph = DiGraph::new();
		let mut nodes = BTreeMap::new();
		for document_type in schema.document_types() {
			nodes.insert(document_type.to_string(), graph.add_node(document_type.to_string()));
		}
		for (document_type, document) in schema.iter() {
			let source = nodes[document_type];
			for (field, params) in &document.fields {
				let handler = registry.handler_for(document_type, field, params)?;
				let Some((target, embedding)) = handler.embedded_target(params) else {
					continue;
				};
				// Dangling targets carry no data we could reach
				if let Some(&target) = nodes.get(target) {
					graph.add_edge(
						source,
						target,
						EmbeddingEdge {
							key: db_field(field, params).to_string(),
							embedding,
						},
					);
				}
			}
		}
		Ok(Self {
			schema,
			graph,
			nodes,
			max_depth,
		})
	}

	/// Every location of `document_type` data, in deterministic order
	pub fn resolve(&self, document_type: &str) -> SchemaResult<Vec<DocumentPath>> {
		let document = self.schema.get(document_type)?;
		if !is_embedded(document_type) {
			let collection =
				document
					.collection()
					.ok_or_else(|| SchemaError::MalformedDocument {
						document_type: document_type.to_string(),
						message: "no collection parameter".to_string(),
					})?;
			return Ok(vec![DocumentPath {
				root_document_type: document_type.to_string(),
				collection: collection.to_string(),
				steps: Vec::new(),
			}]);
		}

		let target = self.nodes[document_type];
		let ancestors = self.ancestors(target);
		let mut paths = Vec::new();

		for (root_type, &root) in &self.nodes {
			if is_embedded(root_type) || !ancestors.contains(&root) {
				continue;
			}
			let Some(collection) = self.schema.get(root_type)?.collection() else {
				continue;
			};

			let mut worklist = VecDeque::from([(root, Vec::<PathStep>::new(), vec![root])]);
			while let Some((node, steps, on_path)) = worklist.pop_front() {
				if node == target && !steps.is_empty() {
					paths.push(DocumentPath {
						root_document_type: root_type.clone(),
						collection: collection.to_string(),
						steps: steps.clone(),
					});
				}
				let mut edges: Vec<_> = self
					.graph
					.edges_directed(node, Direction::Outgoing)
					.filter(|edge| ancestors.contains(&edge.target()))
					.collect();
				edges.sort_by(|a, b| a.weight().key.cmp(&b.weight().key));

				for edge in edges {
					let next = edge.target();
					// Only edges closing an embedding cycle are bounded
					if on_path.contains(&next) {
						match self.max_depth {
							None => {
								return Err(SchemaError::RecursiveEmbedding(document_type.to_string()));
							}
							Some(max) if steps.len() >= max => continue,
							Some(_) => {}
						}
					}
					let mut next_steps = steps.clone();
					next_steps.push(match edge.weight().embedding {
						Embedding::Single => PathStep::Field(edge.weight().key.clone()),
						Embedding::Many => PathStep::EachItem(edge.weight().key.clone()),
					});
					let mut next_on_path = on_path.clone();
					next_on_path.push(next);
					worklist.push_back((next, next_steps, next_on_path));
				}
			}
		}
		Ok(paths)
	}

	/// Nodes from which `target` is reachable, `target` included
	fn ancestors(&self, target: NodeIndex) -> HashSet<NodeIndex> {
		let mut seen = HashSet::from([target]);
		let mut worklist = vec![target];
		while let Some(node) = worklist.pop() {
			for parent in self.graph.neighbors_directed(node, Direction::Incoming) {
				if seen.insert(parent) {
					worklist.push(parent);
				}
			}
		}
		seen
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::migrations::schema::DocumentSchema;
	use bson::doc;
	use rstest::{fixture, rstest};
	use serde_json::json;

	#[fixture]
	fn registry() -> FieldHandlerRegistry {
		FieldHandlerRegistry::with_defaults()
	}

	fn embedded(registry: &FieldHandlerRegistry, type_key: &str, target: &str, key: &str) -> crate::migrations::FieldParams {
		registry
			.build_params(type_key, [("target_doctype", json!(target)), ("db_field", json!(key))])
			.unwrap()
	}

	#[rstest]
	fn test_top_level_resolves_to_collection(registry: FieldHandlerRegistry) {
		let schema = Schema::new().with_document(
			"User",
			DocumentSchema::new().with_parameter("collection", "users"),
		);
		let resolver = PathResolver::new(&schema, &registry, None).unwrap();

		let paths = resolver.resolve("User").unwrap();

		assert_eq!(paths.len(), 1);
		assert!(paths[0].is_root());
		assert_eq!(paths[0].to_string(), "users");
	}

	#[rstest]
	fn test_nested_list_paths(registry: FieldHandlerRegistry) {
		let schema = Schema::new()
			.with_document(
				"User",
				DocumentSchema::new()
					.with_parameter("collection", "users")
					.with_field("addresses", embedded(&registry, "EmbeddedDocumentListField", "~Address", "addresses"))
					.with_field("work", embedded(&registry, "EmbeddedDocumentField", "~Office", "work")),
			)
			.with_document(
				"~Office",
				DocumentSchema::new().with_field("address", embedded(&registry, "EmbeddedDocumentField", "~Address", "addr")),
			)
			.with_document("~Address", DocumentSchema::new());
		let resolver = PathResolver::new(&schema, &registry, None).unwrap();

		let paths: Vec<String> = resolver
			.resolve("~Address")
			.unwrap()
			.iter()
			.map(ToString::to_string)
			.collect();

		assert_eq!(paths, vec!["users.addresses.$[]", "users.work.addr"]);
	}

	#[rstest]
	fn test_self_embedding_requires_depth_bound(registry: FieldHandlerRegistry) {
		let schema = Schema::new()
			.with_document(
				"Doc",
				DocumentSchema::new()
					.with_parameter("collection", "doc")
					.with_field("node", embedded(&registry, "EmbeddedDocumentField", "~Node", "node")),
			)
			.with_document(
				"~Node",
				DocumentSchema::new().with_field("child", embedded(&registry, "EmbeddedDocumentField", "~Node", "child")),
			);

		let unbounded = PathResolver::new(&schema, &registry, None).unwrap();
		assert_eq!(
			unbounded.resolve("~Node"),
			Err(SchemaError::RecursiveEmbedding("~Node".to_string()))
		);

		let bounded = PathResolver::new(&schema, &registry, Some(3)).unwrap();
		let paths: Vec<String> = bounded
			.resolve("~Node")
			.unwrap()
			.iter()
			.map(ToString::to_string)
			.collect();
		assert_eq!(paths, vec!["doc.node", "doc.node.child", "doc.node.child.child"]);
	}

	#[rstest]
	fn test_depth_bound_spares_paths_without_cycles(registry: FieldHandlerRegistry) {
		let schema = Schema::new()
			.with_document(
				"User",
				DocumentSchema::new()
					.with_parameter("collection", "users")
					.with_field("a", embedded(&registry, "EmbeddedDocumentField", "~A", "a")),
			)
			.with_document(
				"~A",
				DocumentSchema::new().with_field("b", embedded(&registry, "EmbeddedDocumentField", "~B", "b")),
			)
			.with_document(
				"~B",
				DocumentSchema::new().with_field("c", embedded(&registry, "EmbeddedDocumentListField", "~C", "c")),
			)
			.with_document("~C", DocumentSchema::new());
		let resolver = PathResolver::new(&schema, &registry, Some(2)).unwrap();

		let paths: Vec<String> = resolver
			.resolve("~C")
			.unwrap()
			.iter()
			.map(ToString::to_string)
			.collect();

		assert_eq!(paths, vec!["users.a.b.c.$[]"]);
	}

	#[rstest]
	fn test_depth_bound_counts_steps_before_the_cycle(registry: FieldHandlerRegistry) {
		let schema = Schema::new()
			.with_document(
				"Doc",
				DocumentSchema::new()
					.with_parameter("collection", "doc")
					.with_field("outer", embedded(&registry, "EmbeddedDocumentField", "~Outer", "outer")),
			)
			.with_document(
				"~Outer",
				DocumentSchema::new().with_field("node", embedded(&registry, "EmbeddedDocumentField", "~Node", "node")),
			)
			.with_document(
				"~Node",
				DocumentSchema::new().with_field("child", embedded(&registry, "EmbeddedDocumentField", "~Node", "child")),
			);
		let resolver = PathResolver::new(&schema, &registry, Some(1)).unwrap();

		let paths: Vec<String> = resolver
			.resolve("~Node")
			.unwrap()
			.iter()
			.map(ToString::to_string)
			.collect();

		assert_eq!(paths, vec!["doc.outer.node"]);
	}

	#[rstest]
	fn test_unreferenced_embedded_has_no_paths(registry: FieldHandlerRegistry) {
		let schema = Schema::new().with_document("~Orphan", DocumentSchema::new());
		let resolver = PathResolver::new(&schema, &registry, None).unwrap();
		assert!(resolver.resolve("~Orphan").unwrap().is_empty());
	}

	#[rstest]
	fn test_visit_mut_covers_every_list_item() {
		let path = DocumentPath {
			root_document_type: "User".to_string(),
			collection: "users".to_string(),
			steps: vec![
				PathStep::EachItem("items".to_string()),
				PathStep::Field("inner".to_string()),
			],
		};
		let mut document = doc! {
			"items": [
				{ "inner": { "x": 1 } },
				{ "inner": { "x": 2 } },
				{ "other": 1 },
				5,
			]
		};

		let changed = path.visit_mut(&mut document, |inner| inner.remove("x").is_some());

		assert!(changed);
		assert_eq!(
			document,
			doc! { "items": [ { "inner": {} }, { "inner": {} }, { "other": 1 }, 5 ] }
		);
	}
}
