//! Migration Graph Tests

use reinhardt_nosql_migrations::migrations::{GraphError, MigrationGraph, MigrationUnit};
use rstest::*;

fn names(units: Vec<&MigrationUnit>) -> Vec<&str> {
	units.into_iter().map(|unit| unit.name.as_str()).collect()
}

/// C depends on B, B depends on A
#[fixture]
fn chain() -> MigrationGraph {
	let mut graph = MigrationGraph::new();
	graph
		.add(MigrationUnit::new("C").with_dependency("B"))
		.unwrap();
	graph.add(MigrationUnit::new("A")).unwrap();
	graph
		.add(MigrationUnit::new("B").with_dependency("A"))
		.unwrap();
	graph
}

// ============================================================================
// Ordering
// ============================================================================

#[rstest]
fn test_resolve_order_of_target(chain: MigrationGraph) {
	assert_eq!(names(chain.resolve_order(Some("C")).unwrap()), ["A", "B", "C"]);
	assert_eq!(names(chain.resolve_order(Some("B")).unwrap()), ["A", "B"]);
	assert_eq!(names(chain.resolve_order(Some("A")).unwrap()), ["A"]);
}

#[rstest]
fn test_resolve_order_single_head_reaches_all(chain: MigrationGraph) {
	assert_eq!(chain.heads(), ["C"]);
	assert_eq!(names(chain.resolve_order(None).unwrap()), ["A", "B", "C"]);
}

#[rstest]
fn test_downgrade_order_is_reverse(chain: MigrationGraph) {
	assert_eq!(names(chain.downgrade_order("A").unwrap()), ["C", "B", "A"]);
	assert_eq!(names(chain.downgrade_order("C").unwrap()), ["C"]);
}

#[rstest]
fn test_branches_and_merge() {
	let mut graph = MigrationGraph::new();
	graph.add(MigrationUnit::new("0001_initial")).unwrap();
	graph
		.add(MigrationUnit::new("0002_users").with_dependency("0001_initial"))
		.unwrap();
	graph
		.add(MigrationUnit::new("0002_orders").with_dependency("0001_initial"))
		.unwrap();

	assert_eq!(graph.heads(), ["0002_orders", "0002_users"]);
	assert_eq!(graph.roots(), ["0001_initial"]);
	assert_eq!(
		names(graph.resolve_order(Some("0002_users")).unwrap()),
		["0001_initial", "0002_users"]
	);

	graph
		.add(
			MigrationUnit::new("0003_merge")
				.with_dependency("0002_users")
				.with_dependency("0002_orders"),
		)
		.unwrap();
	assert_eq!(graph.heads(), ["0003_merge"]);
	assert_eq!(
		names(graph.resolve_order(None).unwrap()),
		["0001_initial", "0002_orders", "0002_users", "0003_merge"]
	);
	assert_eq!(
		names(graph.downgrade_order("0002_users").unwrap()),
		["0003_merge", "0002_users"]
	);
}

#[rstest]
fn test_order_is_deterministic() {
	let build = |order: &[&str]| {
		let mut graph = MigrationGraph::new();
		for name in order {
			graph.add(MigrationUnit::new(*name)).unwrap();
		}
		graph
	};
	let first = build(&["x", "a", "m"]);
	let second = build(&["m", "x", "a"]);

	assert_eq!(
		names(first.resolve_order(None).unwrap()),
		names(second.resolve_order(None).unwrap())
	);
}

// ============================================================================
// Errors
// ============================================================================

#[rstest]
fn test_cycle_is_rejected() {
	let mut graph = MigrationGraph::new();
	graph.add(MigrationUnit::new("root")).unwrap();
	graph
		.add(MigrationUnit::new("A").with_dependency("C").with_dependency("root"))
		.unwrap();
	graph
		.add(MigrationUnit::new("B").with_dependency("A"))
		.unwrap();
	graph
		.add(MigrationUnit::new("C").with_dependency("B"))
		.unwrap();

	let expected = GraphError::CircularDependency {
		cycle: "A, B, C".to_string(),
	};
	assert_eq!(graph.resolve_order(None).err(), Some(expected.clone()));
	assert_eq!(graph.resolve_order(Some("root")).err(), Some(expected.clone()));
	assert_eq!(graph.validate(), Err(expected));
}

#[rstest]
fn test_unknown_dependency() {
	let mut graph = MigrationGraph::new();
	graph
		.add(MigrationUnit::new("0002").with_dependency("0001"))
		.unwrap();

	assert_eq!(
		graph.resolve_order(None).err(),
		Some(GraphError::UnknownDependency {
			unit: "0002".to_string(),
			dependency: "0001".to_string(),
		})
	);
}

#[rstest]
fn test_unknown_target(chain: MigrationGraph) {
	assert_eq!(
		chain.downgrade_order("Z").err(),
		Some(GraphError::UnitNotFound("Z".to_string()))
	);
}

#[rstest]
fn test_unit_backward_reverses_actions() {
	use reinhardt_nosql_migrations::migrations::operations::{DropDocument, RenameDocument};

	let unit = MigrationUnit::new("0001")
		.with_action(RenameDocument::new("A", "B"))
		.with_action(DropDocument::new("C"));

	let backward: Vec<&str> = unit.backward().map(|action| action.kind()).collect();
	assert_eq!(backward, ["DropDocument", "RenameDocument"]);
	assert_eq!(unit.forward().len(), 2);
}
