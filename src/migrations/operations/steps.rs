//! Store steps of prepared actions
//!
//! A [`StoreStep`] is the unit of store work an action plans. Document edits
//! never replace whole documents. An edit that has an `update_many` form runs
//! as one filtered update per collection when it targets top-level documents;
//! everything else streams the affected collection, edits each document
//! locally and writes back only the keys that changed. Each such write is
//! guarded by the previous values of those keys, so a concurrent write to the
//! same keys makes the update miss instead of being overwritten.

use bson::{Bson, Document, doc};
use futures::TryStreamExt;
use std::collections::{BTreeMap, BTreeSet};

use super::super::fields::Converter;
use super::super::paths::{DocumentPath, PathStep};
use super::super::{MigrationError, Result};
use crate::nosql::DocumentStore;

/// How often a guarded write is retried against a fresh copy
const WRITE_ATTEMPTS: usize = 3;

/// A change applied to every document a path reaches
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentEdit {
	/// Remove the key
	Unset(String),
	/// Set the key only where it is absent
	SetMissing { key: String, value: Bson },
	/// Move the value stored under `from` to `to`
	RenameKey { from: String, to: String },
	/// Convert the stored value in place
	Convert { key: String, converter: Converter },
	/// Remove every key except these and `_id`
	RetainKeys(BTreeSet<String>),
	/// Replace a stored value that is not one of `allowed` with `value`
	ReplaceOutside {
		key: String,
		allowed: Vec<Bson>,
		value: Bson,
	},
}

impl DocumentEdit {
	/// Apply to one document, returning whether it changed
	pub fn apply(&self, document: &mut Document) -> bool {
		match self {
			DocumentEdit::Unset(key) => document.remove(key).is_some(),
			DocumentEdit::SetMissing { key, value } => {
				if document.contains_key(key) {
					return false;
				}
				document.insert(key.clone(), value.clone());
				true
			}
			DocumentEdit::RenameKey { from, to } => match document.remove(from) {
				Some(value) => {
					document.insert(to.clone(), value);
					true
				}
				None => false,
			},
			DocumentEdit::Convert { key, converter } => {
				let Some(value) = document.get(key) else {
					return false;
				};
				match converter.convert(value) {
					Some(converted) if &converted != value => {
						document.insert(key.clone(), converted);
						true
					}
					Some(_) => false,
					None => {
						tracing::warn!(key = %key, value = %value, ?converter, "value cannot be converted, left as is");
						false
					}
				}
			}
			DocumentEdit::RetainKeys(keep) => {
				let extra: Vec<String> = document
					.keys()
					.filter(|key| key.as_str() != "_id" && !keep.contains(key.as_str()))
					.cloned()
					.collect();
				for key in &extra {
					document.remove(key);
				}
				!extra.is_empty()
			}
			DocumentEdit::ReplaceOutside {
				key,
				allowed,
				value,
			} => match document.get(key) {
				Some(current) if !allowed.contains(current) => {
					document.insert(key.clone(), value.clone());
					true
				}
				_ => false,
			},
		}
	}

	/// Filter and update doing this edit on every top-level document at once
	///
	/// `None` for edits that need the stored value to compute the new one.
	pub fn bulk_update(&self) -> Option<(Document, Document)> {
		match self {
			DocumentEdit::Unset(key) => Some((
				doc! { key: { "$exists": true } },
				doc! { "$unset": { key: "" } },
			)),
			DocumentEdit::SetMissing { key, value } => Some((
				doc! { key: { "$exists": false } },
				doc! { "$set": { key: value.clone() } },
			)),
			DocumentEdit::RenameKey { from, to } => Some((
				doc! { from: { "$exists": true } },
				doc! { "$rename": { from: to.clone() } },
			)),
			DocumentEdit::ReplaceOutside {
				key,
				allowed,
				value,
			} => Some((
				doc! { key: { "$exists": true, "$nin": allowed.clone() } },
				doc! { "$set": { key: value.clone() } },
			)),
			DocumentEdit::Convert { .. } | DocumentEdit::RetainKeys(_) => None,
		}
	}
}

/// One store-level step of a prepared action
#[derive(Debug, Clone, PartialEq)]
pub enum StoreStep {
	DropCollection(String),
	/// Rename only if `from` currently exists
	RenameCollection { from: String, to: String },
	Edit {
		paths: Vec<DocumentPath>,
		edits: Vec<DocumentEdit>,
	},
	/// Fail if a value stored under `key` is not one of `allowed`
	RequireValues {
		paths: Vec<DocumentPath>,
		key: String,
		allowed: Vec<Bson>,
	},
	CreateIndex {
		collection: String,
		name: String,
		keys: Document,
		options: Document,
	},
	/// Drop only if the index currently exists
	DropIndex { collection: String, name: String },
	/// Refuse to run this direction
	Violation(String),
}

/// Store steps of both directions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepPlan {
	pub forward: Vec<StoreStep>,
	pub backward: Vec<StoreStep>,
}

impl StepPlan {
	pub fn schema_only() -> Self {
		Self::default()
	}
}

pub(super) async fn execute(store: &dyn DocumentStore, steps: &[StoreStep]) -> Result<()> {
	for step in steps {
		match step {
			StoreStep::Violation(message) => {
				return Err(MigrationError::PolicyViolation(message.clone()));
			}
			StoreStep::DropCollection(collection) => {
				store.drop_collection(collection).await?;
			}
			StoreStep::RenameCollection { from, to } => {
				let names = store.list_collection_names().await?;
				if names.iter().any(|name| name == from) {
					store.rename_collection(from, to).await?;
				} else {
					tracing::debug!(from = %from, to = %to, "collection does not exist, rename skipped");
				}
			}
			StoreStep::Edit { paths, edits } => {
				let touched = apply_edits(store, paths, edits).await?;
				tracing::debug!(touched, "documents updated");
			}
			StoreStep::RequireValues {
				paths,
				key,
				allowed,
			} => {
				let offending = count_outside(store, paths, key, allowed).await?;
				if offending > 0 {
					return Err(MigrationError::PolicyViolation(format!(
						"{} stored values of '{}' are not among the allowed choices",
						offending, key
					)));
				}
			}
			StoreStep::CreateIndex {
				collection,
				name,
				keys,
				options,
			} => {
				store
					.create_index(collection, name, keys.clone(), options.clone())
					.await?;
			}
			StoreStep::DropIndex { collection, name } => {
				let names = store.list_index_names(collection).await?;
				if names.iter().any(|existing| existing == name) {
					store.drop_index(collection, name).await?;
				} else {
					tracing::debug!(collection = %collection, index = %name, "index does not exist, drop skipped");
				}
			}
		}
	}
	Ok(())
}

fn by_collection(paths: &[DocumentPath]) -> BTreeMap<&str, Vec<&DocumentPath>> {
	let mut grouped: BTreeMap<&str, Vec<&DocumentPath>> = BTreeMap::new();
	for path in paths {
		grouped.entry(path.collection.as_str()).or_default().push(path);
	}
	grouped
}

/// Apply `edits` at every path, returning how many documents changed
async fn apply_edits(
	store: &dyn DocumentStore,
	paths: &[DocumentPath],
	edits: &[DocumentEdit],
) -> Result<u64> {
	let bulk: Option<Vec<(Document, Document)>> =
		edits.iter().map(DocumentEdit::bulk_update).collect();

	let mut touched = 0;
	for (collection, paths) in by_collection(paths) {
		let (roots, mut scanned): (Vec<&DocumentPath>, Vec<&DocumentPath>) =
			paths.into_iter().partition(|path| path.is_root());
		// Root paths of one collection all address the same documents
		if let Some(&root) = roots.first() {
			match &bulk {
				Some(updates) => {
					for (filter, update) in updates {
						touched += store
							.update_many(collection, filter.clone(), update.clone())
							.await?
							.modified_count;
					}
				}
				None => scanned.push(root),
			}
		}
		if !scanned.is_empty() {
			touched += rewrite_documents(store, collection, &scanned, edits).await?;
		}
	}
	Ok(touched)
}

/// Filter narrowing a scan to documents holding at least one path's first key
fn scan_filter(paths: &[&DocumentPath]) -> Document {
	let mut branches = Vec::new();
	for path in paths {
		let Some(step) = path.steps.first() else {
			return Document::new();
		};
		let key = match step {
			PathStep::Field(key) | PathStep::EachItem(key) => key,
		};
		branches.push(Bson::Document(doc! { key: { "$exists": true } }));
	}
	doc! { "$or": branches }
}

/// Edited copy of `document`, `None` if the edits change nothing
fn edited(document: &Document, paths: &[&DocumentPath], edits: &[DocumentEdit]) -> Option<Document> {
	let mut copy = document.clone();
	let mut changed = false;
	for path in paths {
		changed |= path.visit_mut(&mut copy, |target| {
			edits
				.iter()
				.fold(false, |changed, edit| edit.apply(target) | changed)
		});
	}
	changed.then_some(copy)
}

async fn rewrite_documents(
	store: &dyn DocumentStore,
	collection: &str,
	paths: &[&DocumentPath],
	edits: &[DocumentEdit],
) -> Result<u64> {
	let mut documents = store.find_stream(collection, scan_filter(paths)).await?;
	let mut touched = 0;
	while let Some(document) = documents.try_next().await? {
		let Some(id) = document.get("_id").cloned() else {
			tracing::warn!(collection, "document without _id cannot be updated");
			continue;
		};
		let mut current = document;
		for attempt in 1..=WRITE_ATTEMPTS {
			let Some(target) = edited(&current, paths, edits) else {
				break;
			};
			let changes = KeyChanges::between(&current, &target);
			let result = store
				.update_one(collection, changes.filter(&id), changes.update())
				.await?;
			if result.matched_count > 0 {
				touched += 1;
				break;
			}
			if attempt == WRITE_ATTEMPTS {
				return Err(MigrationError::ConcurrentUpdate {
					collection: collection.to_string(),
					id: id.to_string(),
				});
			}
			tracing::debug!(collection, id = %id, attempt, "document changed concurrently, retrying");
			match store.find_many(collection, doc! { "_id": id.clone() }).await?.pop() {
				Some(latest) => current = latest,
				None => break,
			}
		}
	}
	Ok(touched)
}

/// Count values under `key` at every path that are not in `allowed`
async fn count_outside(
	store: &dyn DocumentStore,
	paths: &[DocumentPath],
	key: &str,
	allowed: &[Bson],
) -> Result<u64> {
	let mut offending = 0;
	for (collection, paths) in by_collection(paths) {
		let mut documents = store.find_stream(collection, scan_filter(&paths)).await?;
		while let Some(mut document) = documents.try_next().await? {
			for path in &paths {
				path.visit_mut(&mut document, |target| {
					if target.get(key).is_some_and(|value| !allowed.contains(value)) {
						offending += 1;
					}
					false
				});
			}
		}
	}
	Ok(offending)
}

/// Differences between two versions of a document as dotted key paths
///
/// Only the deepest differing keys are listed; list items are addressed by
/// index when both versions hold lists of the same length.
#[derive(Debug, Default, PartialEq)]
struct KeyChanges {
	set: Document,
	unset: Document,
	/// Value each changed key had, or `{"$exists": false}`
	previous: Document,
}

impl KeyChanges {
	fn between(before: &Document, after: &Document) -> Self {
		let mut changes = Self::default();
		changes.compare_documents("", before, after);
		changes
	}

	fn compare_documents(&mut self, prefix: &str, before: &Document, after: &Document) {
		for (key, old) in before {
			let path = join(prefix, key);
			match after.get(key) {
				Some(new) => self.compare_values(path, old, new),
				None => {
					self.unset.insert(path.clone(), "");
					self.previous.insert(path, old.clone());
				}
			}
		}
		for (key, new) in after {
			if !before.contains_key(key) {
				let path = join(prefix, key);
				self.set.insert(path.clone(), new.clone());
				self.previous.insert(path, doc! { "$exists": false });
			}
		}
	}

	fn compare_values(&mut self, path: String, old: &Bson, new: &Bson) {
		match (old, new) {
			(Bson::Document(old), Bson::Document(new)) => self.compare_documents(&path, old, new),
			(Bson::Array(old), Bson::Array(new)) if old.len() == new.len() => {
				for (index, (old, new)) in old.iter().zip(new).enumerate() {
					self.compare_values(format!("{}.{}", path, index), old, new);
				}
			}
			_ if old != new => {
				self.set.insert(path.clone(), new.clone());
				self.previous.insert(path, old.clone());
			}
			_ => {}
		}
	}

	/// `_id` plus the previous value of every changed key
	fn filter(&self, id: &Bson) -> Document {
		let mut filter = doc! { "_id": id.clone() };
		for (path, value) in &self.previous {
			filter.insert(path.clone(), value.clone());
		}
		filter
	}

	fn update(&self) -> Document {
		let mut update = Document::new();
		if !self.set.is_empty() {
			update.insert("$set", self.set.clone());
		}
		if !self.unset.is_empty() {
			update.insert("$unset", self.unset.clone());
		}
		update
	}
}

fn join(prefix: &str, key: &str) -> String {
	if prefix.is_empty() {
		key.to_string()
	} else {
		format!("{}.{}", prefix, key)
	}
}
