//! Migration dependency graph
//!
//! Units depend on other units by name. The graph orders them so every unit
//! comes after all of its dependencies, with ties broken by name so a given
//! set of units always yields the same order.

use petgraph::Direction;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Reversed};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::GraphError;
use super::operations::Action;

/// A named, ordered bundle of actions plus the units it depends on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationUnit {
	pub name: String,
	#[serde(default)]
	pub dependencies: Vec<String>,
	#[serde(default)]
	pub actions: Vec<Action>,
}

impl MigrationUnit {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			dependencies: Vec::new(),
			actions: Vec::new(),
		}
	}

	pub fn with_dependency(mut self, dependency: impl Into<String>) -> Self {
		self.dependencies.push(dependency.into());
		self
	}

	pub fn with_action(mut self, action: impl Into<Action>) -> Self {
		self.actions.push(action.into());
		self
	}

	pub fn with_actions(mut self, actions: impl IntoIterator<Item = Action>) -> Self {
		self.actions.extend(actions);
		self
	}

	/// Actions in forward order
	pub fn forward(&self) -> &[Action] {
		&self.actions
	}

	/// Actions in the order they are unapplied
	pub fn backward(&self) -> impl Iterator<Item = &Action> {
		self.actions.iter().rev()
	}
}

/// Dependency graph of migration units
///
/// # Example
///
/// ```rust,ignore
/// use reinhardt_nosql_migrations::migrations::{MigrationGraph, MigrationUnit};
///
/// let mut graph = MigrationGraph::new();
/// graph.add(MigrationUnit::new("0001_initial"))?;
/// graph.add(MigrationUnit::new("0002_users").with_dependency("0001_initial"))?;
///
/// let names: Vec<&str> = graph
///     .resolve_order(None)?
///     .iter()
///     .map(|unit| unit.name.as_str())
///     .collect();
/// assert_eq!(names, ["0001_initial", "0002_users"]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MigrationGraph {
	units: BTreeMap<String, MigrationUnit>,
}

/// Dependency edges point from a dependency to its dependents
struct Dag<'a> {
	graph: DiGraph<&'a str, ()>,
	nodes: HashMap<&'a str, NodeIndex>,
}

impl MigrationGraph {
	pub fn new() -> Self {
		Self::default()
	}

	/// Add a unit; dependencies are checked when the graph is ordered
	pub fn add(&mut self, unit: MigrationUnit) -> Result<(), GraphError> {
		if self.units.contains_key(&unit.name) {
			return Err(GraphError::DuplicateUnit(unit.name));
		}
		self.units.insert(unit.name.clone(), unit);
		Ok(())
	}

	pub fn get(&self, name: &str) -> Option<&MigrationUnit> {
		self.units.get(name)
	}

	pub fn contains(&self, name: &str) -> bool {
		self.units.contains_key(name)
	}

	pub fn len(&self) -> usize {
		self.units.len()
	}

	pub fn is_empty(&self) -> bool {
		self.units.is_empty()
	}

	/// Units by name
	pub fn iter(&self) -> impl Iterator<Item = &MigrationUnit> {
		self.units.values()
	}

	/// Units nothing depends on, by name
	pub fn heads(&self) -> Vec<&str> {
		let depended_on: BTreeSet<&str> = self
			.units
			.values()
			.flat_map(|unit| unit.dependencies.iter().map(String::as_str))
			.collect();
		self.units
			.keys()
			.map(String::as_str)
			.filter(|name| !depended_on.contains(name))
			.collect()
	}

	/// Units without dependencies, by name
	pub fn roots(&self) -> Vec<&str> {
		self.units
			.values()
			.filter(|unit| unit.dependencies.is_empty())
			.map(|unit| unit.name.as_str())
			.collect()
	}

	/// Check every dependency is known and there is no cycle
	pub fn validate(&self) -> Result<(), GraphError> {
		self.topological_order().map(|_| ())
	}

	/// Upgrade order of `target` and everything it depends on, or of every
	/// unit when `target` is `None`
	///
	/// The whole graph is validated either way, so a cycle or an unknown
	/// dependency anywhere fails the call.
	pub fn resolve_order(&self, target: Option<&str>) -> Result<Vec<&MigrationUnit>, GraphError> {
		let (dag, order) = self.topological_order()?;
		let Some(target) = target else {
			return Ok(self.units_in(order));
		};
		let start = *dag
			.nodes
			.get(target)
			.ok_or_else(|| GraphError::UnitNotFound(target.to_string()))?;

		let reversed = Reversed(&dag.graph);
		let mut dfs = Dfs::new(reversed, start);
		let mut needed = BTreeSet::new();
		while let Some(node) = dfs.next(reversed) {
			needed.insert(dag.graph[node]);
		}
		Ok(self.units_in(order.into_iter().filter(|name| needed.contains(name))))
	}

	/// Unapply order of `target` and every unit depending on it
	///
	/// This is the reverse of the upgrade order restricted to those units.
	pub fn downgrade_order(&self, target: &str) -> Result<Vec<&MigrationUnit>, GraphError> {
		let (dag, order) = self.topological_order()?;
		let start = *dag
			.nodes
			.get(target)
			.ok_or_else(|| GraphError::UnitNotFound(target.to_string()))?;

		let mut dfs = Dfs::new(&dag.graph, start);
		let mut affected = BTreeSet::new();
		while let Some(node) = dfs.next(&dag.graph) {
			affected.insert(dag.graph[node]);
		}
		Ok(self.units_in(
			order
				.into_iter()
				.rev()
				.filter(|name| affected.contains(name)),
		))
	}

	fn units_in<'a>(&'a self, names: impl IntoIterator<Item = &'a str>) -> Vec<&'a MigrationUnit> {
		names
			.into_iter()
			.filter_map(|name| self.units.get(name))
			.collect()
	}

	fn dag(&self) -> Result<Dag<'_>, GraphError> {
		let mut graph = DiGraph::new();
		let nodes: HashMap<&str, NodeIndex> = self
			.units
			.keys()
			.map(|name| (name.as_str(), graph.add_node(name.as_str())))
			.collect();

		for unit in self.units.values() {
			for dependency in &unit.dependencies {
				let from = nodes.get(dependency.as_str()).ok_or_else(|| {
					GraphError::UnknownDependency {
						unit: unit.name.clone(),
						dependency: dependency.clone(),
					}
				})?;
				graph.update_edge(*from, nodes[unit.name.as_str()], ());
			}
		}
		Ok(Dag { graph, nodes })
	}

	/// Kahn's algorithm, always picking the smallest ready name
	fn topological_order(&self) -> Result<(Dag<'_>, Vec<&str>), GraphError> {
		let dag = self.dag()?;
		let mut in_degree: HashMap<NodeIndex, usize> = dag
			.graph
			.node_indices()
			.map(|node| {
				let degree = dag.graph.neighbors_directed(node, Direction::Incoming).count();
				(node, degree)
			})
			.collect();

		let mut ready: BTreeSet<(&str, NodeIndex)> = in_degree
			.iter()
			.filter(|(_, degree)| **degree == 0)
			.map(|(node, _)| (dag.graph[*node], *node))
			.collect();

		let mut order = Vec::with_capacity(self.units.len());
		while let Some((name, node)) = ready.pop_first() {
			order.push(name);
			for dependent in dag.graph.neighbors_directed(node, Direction::Outgoing) {
				if let Some(degree) = in_degree.get_mut(&dependent) {
					*degree -= 1;
					if *degree == 0 {
						ready.insert((dag.graph[dependent], dependent));
					}
				}
			}
		}

		if order.len() < self.units.len() {
			return Err(GraphError::CircularDependency {
				cycle: self.find_cycle(&dag),
			});
		}
		Ok((dag, order))
	}

	fn find_cycle(&self, dag: &Dag<'_>) -> String {
		tarjan_scc(&dag.graph)
			.into_iter()
			.find(|component| {
				component.len() > 1
					|| dag.graph.contains_edge(component[0], component[0])
			})
			.map(|component| {
				let mut names: Vec<String> = component
					.into_iter()
					.map(|node| dag.graph[node].to_string())
					.collect();
				names.sort();
				names.join(", ")
			})
			.unwrap_or_default()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	fn names(units: Vec<&MigrationUnit>) -> Vec<&str> {
		units.into_iter().map(|unit| unit.name.as_str()).collect()
	}

	#[rstest]
	fn test_independent_units_order_by_name() {
		let mut graph = MigrationGraph::new();
		graph.add(MigrationUnit::new("b")).unwrap();
		graph.add(MigrationUnit::new("a")).unwrap();
		graph
			.add(MigrationUnit::new("c").with_dependency("b"))
			.unwrap();

		assert_eq!(names(graph.resolve_order(None).unwrap()), ["a", "b", "c"]);
		assert_eq!(graph.heads(), ["a", "c"]);
		assert_eq!(graph.roots(), ["a", "b"]);
	}

	#[rstest]
	fn test_duplicate_unit() {
		let mut graph = MigrationGraph::new();
		graph.add(MigrationUnit::new("a")).unwrap();
		assert_eq!(
			graph.add(MigrationUnit::new("a")),
			Err(GraphError::DuplicateUnit("a".to_string()))
		);
	}

	#[rstest]
	fn test_self_dependency_is_a_cycle() {
		let mut graph = MigrationGraph::new();
		graph
			.add(MigrationUnit::new("a").with_dependency("a"))
			.unwrap();
		assert_eq!(
			graph.validate(),
			Err(GraphError::CircularDependency {
				cycle: "a".to_string()
			})
		);
	}

	#[rstest]
	fn test_unknown_target() {
		let graph = MigrationGraph::new();
		assert_eq!(
			graph.resolve_order(Some("missing")).err(),
			Some(GraphError::UnitNotFound("missing".to_string()))
		);
	}
}
