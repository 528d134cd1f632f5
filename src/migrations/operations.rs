//! Migration actions
//!
//! An [`Action`] is one reversible change: it edits the [`Schema`] through
//! [`Action::to_schema_patch`] and the stored documents through a
//! [`PreparedAction`].
//!
//! Preparation is the only validation step. [`Action::prepare`] checks the
//! action against the schema it is about to change, resolves where the
//! affected data lives and computes the store steps of both directions.
//! Running a prepared action only executes those steps.
//!
//! # Example
//!
//! ```rust,ignore
//! use reinhardt_nosql_migrations::migrations::operations::{Action, DropField, MigrationContext};
//!
//! let action = Action::from(DropField::new("User", "nickname"));
//! let context = MigrationContext::default();
//! action
//!     .prepare(store.as_ref(), &schema, context.config.policy, &context)?
//!     .run_forward()
//!     .await?;
//! let schema = schema.apply_patch(&action.to_schema_patch(&schema)?)?;
//! ```

pub mod documents;
pub mod embedded;
pub mod fields;
pub mod indexes;
mod steps;

pub use documents::{AlterDocument, CreateDocument, DropDocument, RenameDocument};
pub use embedded::{AlterEmbedded, CreateEmbedded, DropEmbedded, RenameEmbedded};
pub use fields::{AlterField, CreateField, DropField, RenameField};
pub use indexes::{AlterIndex, CreateIndex, DropIndex};
pub use steps::{DocumentEdit, StepPlan, StoreStep};

use bson::Bson;
use serde::{Deserialize, Serialize};

use super::config::{MigrationConfig, MigrationPolicy};
use super::fields::FieldHandlerRegistry;
use super::patch::SchemaPatch;
use super::paths::{DocumentPath, PathResolver};
use super::schema::Schema;
use super::{Result, SchemaResult};
use crate::nosql::DocumentStore;

/// Everything an action needs besides the store and the schema
#[derive(Debug, Clone)]
pub struct MigrationContext {
	pub registry: FieldHandlerRegistry,
	pub config: MigrationConfig,
}

impl Default for MigrationContext {
	fn default() -> Self {
		Self::new(MigrationConfig::default())
	}
}

impl MigrationContext {
	/// Context with the built-in field handlers
	pub fn new(config: MigrationConfig) -> Self {
		Self {
			registry: FieldHandlerRegistry::with_defaults(),
			config,
		}
	}

	pub fn with_registry(mut self, registry: FieldHandlerRegistry) -> Self {
		self.registry = registry;
		self
	}

	/// Every stored location of `document_type` data
	pub fn resolve_paths(
		&self,
		schema: &Schema,
		document_type: &str,
	) -> SchemaResult<Vec<DocumentPath>> {
		PathResolver::new(schema, &self.registry, self.config.max_embedding_depth)?
			.resolve(document_type)
	}
}

/// Backward step for a field that has to come back: refill, refuse or skip
pub(crate) fn refill_step(
	document_type: &str,
	field: &str,
	required: bool,
	default: Option<Bson>,
	paths: Vec<DocumentPath>,
	key: String,
	policy: MigrationPolicy,
) -> Option<StoreStep> {
	if !required {
		return None;
	}
	match (default, policy) {
		(Some(value), _) => Some(StoreStep::Edit {
			paths,
			edits: vec![DocumentEdit::SetMissing { key, value }],
		}),
		(None, MigrationPolicy::Strict) => Some(StoreStep::Violation(format!(
			"{}.{} is required but has no default to restore it with",
			document_type, field
		))),
		(None, MigrationPolicy::Relaxed) => {
			tracing::warn!(
				document_type,
				field,
				"required field has no default, documents will not get it back"
			);
			None
		}
	}
}

/// A single reversible schema and data change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum Action {
	CreateDocument(CreateDocument),
	DropDocument(DropDocument),
	RenameDocument(RenameDocument),
	AlterDocument(AlterDocument),
	CreateEmbedded(CreateEmbedded),
	DropEmbedded(DropEmbedded),
	RenameEmbedded(RenameEmbedded),
	AlterEmbedded(AlterEmbedded),
	CreateField(CreateField),
	DropField(DropField),
	AlterField(AlterField),
	RenameField(RenameField),
	CreateIndex(CreateIndex),
	DropIndex(DropIndex),
	AlterIndex(AlterIndex),
}

macro_rules! dispatch {
	($self:expr, $inner:ident => $body:expr) => {
		match $self {
			Action::CreateDocument($inner) => $body,
			Action::DropDocument($inner) => $body,
			Action::RenameDocument($inner) => $body,
			Action::AlterDocument($inner) => $body,
			Action::CreateEmbedded($inner) => $body,
			Action::DropEmbedded($inner) => $body,
			Action::RenameEmbedded($inner) => $body,
			Action::AlterEmbedded($inner) => $body,
			Action::CreateField($inner) => $body,
			Action::DropField($inner) => $body,
			Action::AlterField($inner) => $body,
			Action::RenameField($inner) => $body,
			Action::CreateIndex($inner) => $body,
			Action::DropIndex($inner) => $body,
			Action::AlterIndex($inner) => $body,
		}
	};
}

impl Action {
	/// Document type the action targets
	pub fn document_type(&self) -> &str {
		dispatch!(self, action => &action.document_type)
	}

	/// Name of the action kind
	pub fn kind(&self) -> &'static str {
		match self {
			Action::CreateDocument(_) => "CreateDocument",
			Action::DropDocument(_) => "DropDocument",
			Action::RenameDocument(_) => "RenameDocument",
			Action::AlterDocument(_) => "AlterDocument",
			Action::CreateEmbedded(_) => "CreateEmbedded",
			Action::DropEmbedded(_) => "DropEmbedded",
			Action::RenameEmbedded(_) => "RenameEmbedded",
			Action::AlterEmbedded(_) => "AlterEmbedded",
			Action::CreateField(_) => "CreateField",
			Action::DropField(_) => "DropField",
			Action::AlterField(_) => "AlterField",
			Action::RenameField(_) => "RenameField",
			Action::CreateIndex(_) => "CreateIndex",
			Action::DropIndex(_) => "DropIndex",
			Action::AlterIndex(_) => "AlterIndex",
		}
	}

	/// Schema edits of the forward direction, computed against `schema`
	///
	/// Fails if `schema` lacks what the action changes. The backward edits are
	/// the inverse of the returned patch.
	pub fn to_schema_patch(&self, schema: &Schema) -> SchemaResult<SchemaPatch> {
		dispatch!(self, action => action.to_schema_patch(schema))
	}

	/// Validate against `schema` and bind to `store`
	///
	/// `schema` is the snapshot before the forward direction, for both
	/// directions. No store access happens here.
	pub fn prepare<'a>(
		&'a self,
		store: &'a dyn DocumentStore,
		schema: &Schema,
		policy: MigrationPolicy,
		context: &MigrationContext,
	) -> Result<PreparedAction<'a>> {
		self.to_schema_patch(schema)?;
		let plan = if context.config.schema_only {
			StepPlan::schema_only()
		} else {
			dispatch!(self, action => action.plan(schema, policy, context))?
		};
		tracing::debug!(
			action = self.kind(),
			document_type = self.document_type(),
			forward_steps = plan.forward.len(),
			backward_steps = plan.backward.len(),
			"prepared action"
		);
		Ok(PreparedAction {
			action: self,
			store,
			plan,
		})
	}
}

macro_rules! impl_from_action {
	($($variant:ident),* $(,)?) => {
		$(
			impl From<$variant> for Action {
				fn from(action: $variant) -> Self {
					Action::$variant(action)
				}
			}
		)*
	};
}

impl_from_action!(
	CreateDocument,
	DropDocument,
	RenameDocument,
	AlterDocument,
	CreateEmbedded,
	DropEmbedded,
	RenameEmbedded,
	AlterEmbedded,
	CreateField,
	DropField,
	AlterField,
	RenameField,
	CreateIndex,
	DropIndex,
	AlterIndex,
);

/// An action bound to a store, ready to run in one direction
pub struct PreparedAction<'a> {
	action: &'a Action,
	store: &'a dyn DocumentStore,
	plan: StepPlan,
}

impl std::fmt::Debug for PreparedAction<'_> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("PreparedAction")
			.field("action", self.action)
			.field("plan", &self.plan)
			.finish()
	}
}

impl<'a> PreparedAction<'a> {
	pub fn action(&self) -> &Action {
		self.action
	}

	pub fn plan(&self) -> &StepPlan {
		&self.plan
	}

	pub async fn run_forward(self) -> Result<()> {
		steps::execute(self.store, &self.plan.forward).await
	}

	pub async fn run_backward(self) -> Result<()> {
		steps::execute(self.store, &self.plan.backward).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	#[case(MigrationPolicy::Strict, true)]
	#[case(MigrationPolicy::Relaxed, false)]
	fn test_refill_without_default(#[case] policy: MigrationPolicy, #[case] violates: bool) {
		let step = refill_step("Doc", "f", true, None, Vec::new(), "f".to_string(), policy);
		assert_eq!(matches!(step, Some(StoreStep::Violation(_))), violates);
		assert_eq!(step.is_none(), !violates);
	}

	#[rstest]
	fn test_refill_not_required_is_noop() {
		let step = refill_step(
			"Doc",
			"f",
			false,
			Some(Bson::Int32(1)),
			Vec::new(),
			"f".to_string(),
			MigrationPolicy::Strict,
		);
		assert!(step.is_none());
	}
}
