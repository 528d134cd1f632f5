//! Migration runner
//!
//! [`Migrator`] applies and unapplies units of a [`MigrationGraph`] against a
//! store, one unit at a time. The schema each action is prepared against is
//! rebuilt by replaying the patches of applied units, and after every unit
//! the history records the new snapshot and applied list. A failing unit is
//! left unrecorded; units finished before it stay applied. Its error comes
//! back as [`MigrationError::UnitFailed`], naming the unit and the units the
//! run completed before it.

use std::collections::BTreeSet;
use std::sync::Arc;

use super::autodetector::SchemaAutodetector;
use super::config::MigrationConfig;
use super::fields::FieldHandlerRegistry;
use super::graph::{MigrationGraph, MigrationUnit};
use super::operations::MigrationContext;
use super::recorder::{SchemaHistory, StoreHistory};
use super::schema::Schema;
use super::{MigrationError, Result};
use crate::nosql::{DocumentStore, DryRunStore, StoreCall};

fn unit_failed(unit: &MigrationUnit, completed: &[String], source: MigrationError) -> MigrationError {
	tracing::error!(unit = %unit.name, error = %source, "migration failed");
	MigrationError::UnitFailed {
		unit: unit.name.clone(),
		completed: completed.to_vec(),
		source: Box::new(source),
	}
}

/// Outcome of a runner operation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionResult {
	/// Units applied, in order
	pub applied: Vec<String>,
	/// Units unapplied, in order
	pub unapplied: Vec<String>,
	/// Store mutations that would have run, in dry-run mode
	pub planned_calls: Vec<StoreCall>,
}

/// Runs migration units against a store
pub struct Migrator {
	store: Arc<dyn DocumentStore>,
	graph: MigrationGraph,
	history: Arc<dyn SchemaHistory>,
	context: MigrationContext,
}

impl std::fmt::Debug for Migrator {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Migrator")
			.field("graph", &self.graph)
			.field("context", &self.context)
			.finish()
	}
}

impl Migrator {
	/// Runner keeping its history in `config.history_collection` of `store`
	pub fn new(store: Arc<dyn DocumentStore>, graph: MigrationGraph, config: MigrationConfig) -> Self {
		let history = Arc::new(StoreHistory::new(
			store.clone(),
			config.history_collection.clone(),
		));
		Self {
			store,
			graph,
			history,
			context: MigrationContext::new(config),
		}
	}

	pub fn with_history(mut self, history: Arc<dyn SchemaHistory>) -> Self {
		self.history = history;
		self
	}

	pub fn with_registry(mut self, registry: FieldHandlerRegistry) -> Self {
		self.context = self.context.with_registry(registry);
		self
	}

	pub fn graph(&self) -> &MigrationGraph {
		&self.graph
	}

	pub fn config(&self) -> &MigrationConfig {
		&self.context.config
	}

	pub fn add_unit(&mut self, unit: MigrationUnit) -> Result<()> {
		self.graph.add(unit)?;
		Ok(())
	}

	/// Applied unit names in application order
	pub async fn applied(&self) -> Result<Vec<String>> {
		self.history.applied_units().await
	}

	/// Schema produced by the applied units
	pub async fn current_schema(&self) -> Result<Schema> {
		let applied: BTreeSet<String> = self.applied().await?.into_iter().collect();
		self.replay(|name| applied.contains(name))
	}

	/// Apply `target` and its dependencies, or every unit when `None`
	pub async fn upgrade(&self, target: Option<&str>) -> Result<ExecutionResult> {
		let applied: BTreeSet<String> = self.applied().await?.into_iter().collect();
		let pending: Vec<&MigrationUnit> = self
			.graph
			.resolve_order(target)?
			.into_iter()
			.filter(|unit| !applied.contains(&unit.name))
			.collect();

		let (store, tracer) = self.run_store();
		let mut schema = self.replay(|name| applied.contains(name))?;
		let mut result = ExecutionResult::default();

		for unit in pending {
			tracing::info!(unit = %unit.name, actions = unit.actions.len(), "applying migration");
			schema = self
				.apply_unit(store.as_ref(), unit, schema, tracer.is_none())
				.await
				.map_err(|source| unit_failed(unit, &result.applied, source))?;
			result.applied.push(unit.name.clone());
		}

		if let Some(tracer) = tracer {
			result.planned_calls = tracer.calls();
		}
		Ok(result)
	}

	/// Unapply every unit depending on `target`, leaving `target` applied,
	/// or every applied unit when `None`
	pub async fn downgrade(&self, target: Option<&str>) -> Result<ExecutionResult> {
		let history_order = self.applied().await?;
		let mut applied: BTreeSet<String> = history_order.iter().cloned().collect();

		let to_unapply: Vec<&MigrationUnit> = match target {
			Some(target) => {
				let order = self.graph.downgrade_order(target)?;
				if !applied.contains(target) {
					return Err(MigrationError::NotApplied(target.to_string()));
				}
				order
					.into_iter()
					.filter(|unit| unit.name != target && applied.contains(&unit.name))
					.collect()
			}
			None => {
				let mut order = self.graph.resolve_order(None)?;
				order.reverse();
				order
					.into_iter()
					.filter(|unit| applied.contains(&unit.name))
					.collect()
			}
		};

		let (store, tracer) = self.run_store();
		let mut result = ExecutionResult::default();

		for unit in to_unapply {
			tracing::info!(unit = %unit.name, actions = unit.actions.len(), "unapplying migration");
			applied.remove(&unit.name);
			let last = history_order
				.iter()
				.rev()
				.find(|name| applied.contains(*name))
				.map(String::as_str);
			self.unapply_unit(store.as_ref(), unit, &applied, last, tracer.is_none())
				.await
				.map_err(|source| unit_failed(unit, &result.unapplied, source))?;
			result.unapplied.push(unit.name.clone());
		}

		if let Some(tracer) = tracer {
			result.planned_calls = tracer.calls();
		}
		Ok(result)
	}

	/// Bring the store to `target`, upgrading or downgrading as needed
	///
	/// `None` targets the lexicographically last head.
	pub async fn migrate(&self, target: Option<&str>) -> Result<ExecutionResult> {
		let target = match target {
			Some(target) => target.to_string(),
			None => match self.graph.heads().last() {
				Some(head) => head.to_string(),
				None => return Ok(ExecutionResult::default()),
			},
		};
		if !self.graph.contains(&target) {
			return Err(super::GraphError::UnitNotFound(target).into());
		}

		let applied = self.applied().await?;
		if applied.contains(&target) {
			self.downgrade(Some(&target)).await
		} else {
			self.upgrade(Some(&target)).await
		}
	}

	/// New unit turning the schema of every known unit into `target`
	///
	/// Returns `None` when nothing changed. The unit depends on the current
	/// heads.
	pub fn makemigrations(
		&self,
		target: &Schema,
		name: impl Into<String>,
	) -> Result<Option<MigrationUnit>> {
		let left = self.replay(|_| true)?;
		let actions = SchemaAutodetector::new()
			.with_config(self.context.config.similarity.clone())
			.with_registry(self.context.registry.clone())
			.detect_changes(&left, target)?;
		if actions.is_empty() {
			tracing::info!("no changes detected");
			return Ok(None);
		}

		let mut unit = MigrationUnit::new(name).with_actions(actions);
		unit.dependencies = self.graph.heads().into_iter().map(str::to_string).collect();
		tracing::info!(unit = %unit.name, actions = unit.actions.len(), "created migration");
		Ok(Some(unit))
	}

	/// Run the forward direction of `unit` on top of `schema`
	async fn apply_unit(
		&self,
		store: &dyn DocumentStore,
		unit: &MigrationUnit,
		mut schema: Schema,
		record: bool,
	) -> Result<Schema> {
		for action in unit.forward() {
			action
				.prepare(store, &schema, self.context.config.policy, &self.context)?
				.run_forward()
				.await?;
			schema = schema.apply_patch(&action.to_schema_patch(&schema)?)?;
		}
		if record {
			self.history.record_applied(&unit.name).await?;
			self.history.save_schema(&schema, Some(&unit.name)).await?;
		}
		Ok(schema)
	}

	/// Run the backward direction of `unit`, with `applied` no longer holding it
	async fn unapply_unit(
		&self,
		store: &dyn DocumentStore,
		unit: &MigrationUnit,
		applied: &BTreeSet<String>,
		last: Option<&str>,
		record: bool,
	) -> Result<()> {
		let before = self.replay(|name| applied.contains(name))?;

		// Schema before each action of the unit
		let mut snapshots = Vec::with_capacity(unit.actions.len());
		let mut schema = before.clone();
		for action in unit.forward() {
			let next = schema.apply_patch(&action.to_schema_patch(&schema)?)?;
			snapshots.push(schema);
			schema = next;
		}

		for (action, snapshot) in unit.forward().iter().zip(&snapshots).rev() {
			action
				.prepare(store, snapshot, self.context.config.policy, &self.context)?
				.run_backward()
				.await?;
		}

		if record {
			self.history.record_unapplied(&unit.name).await?;
			self.history.save_schema(&before, last).await?;
		}
		Ok(())
	}

	/// Schema after the selected units, replayed in dependency order
	fn replay(&self, selected: impl Fn(&str) -> bool) -> Result<Schema> {
		let mut schema = Schema::new();
		for unit in self.graph.resolve_order(None)? {
			if !selected(&unit.name) {
				continue;
			}
			for action in unit.forward() {
				schema = schema.apply_patch(&action.to_schema_patch(&schema)?)?;
			}
		}
		Ok(schema)
	}

	/// Store handle for a run, wrapped in a tracer in dry-run mode
	fn run_store(&self) -> (Arc<dyn DocumentStore>, Option<Arc<DryRunStore>>) {
		if !self.context.config.dry_run {
			return (self.store.clone(), None);
		}
		let tracer = Arc::new(DryRunStore::new(self.store.clone()));
		let store: Arc<dyn DocumentStore> = tracer.clone();
		(store, Some(tracer))
	}
}
