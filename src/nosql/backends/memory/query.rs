//! Filter matching and update evaluation for the in-memory store
//!
//! Key paths are dotted. When matching, a non-numeric segment applied to a
//! list fans out over the documents in it, so `{"items.sku": "a"}` matches
//! when any item has that sku. Updates address list items by index only.

use bson::{Bson, Document};

use crate::nosql::error::{NoSQLError, Result};

fn invalid(message: String) -> NoSQLError {
	NoSQLError::InvalidOperation(message)
}

/// Every value reachable under `path`
fn lookup<'a>(document: &'a Document, path: &str) -> Vec<&'a Bson> {
	let mut segments = path.split('.');
	let Some(first) = segments.next() else {
		return Vec::new();
	};
	let mut current: Vec<&Bson> = document.get(first).into_iter().collect();
	for segment in segments {
		current = current
			.into_iter()
			.flat_map(|value| descend(value, segment))
			.collect();
	}
	current
}

fn descend<'a>(value: &'a Bson, segment: &str) -> Vec<&'a Bson> {
	match value {
		Bson::Document(inner) => inner.get(segment).into_iter().collect(),
		Bson::Array(items) => match segment.parse::<usize>() {
			Ok(index) => items.get(index).into_iter().collect(),
			Err(_) => items
				.iter()
				.filter_map(|item| match item {
					Bson::Document(inner) => inner.get(segment),
					_ => None,
				})
				.collect(),
		},
		_ => Vec::new(),
	}
}

/// Whether any value equals `expected`, directly or as a list member
fn contains(values: &[&Bson], expected: &Bson) -> bool {
	if matches!(expected, Bson::Null) && values.is_empty() {
		return true;
	}
	values.iter().any(|value| {
		*value == expected || matches!(value, Bson::Array(items) if items.contains(expected))
	})
}

fn operand_list<'a>(operator: &str, operand: &'a Bson) -> Result<&'a Vec<Bson>> {
	match operand {
		Bson::Array(items) => Ok(items),
		other => Err(invalid(format!("{} expects a list, got {}", operator, other))),
	}
}

fn is_operator_document(condition: &Bson) -> bool {
	matches!(condition, Bson::Document(inner) if inner.keys().next().is_some_and(|key| key.starts_with('$')))
}

fn condition_matches(values: &[&Bson], condition: &Bson) -> Result<bool> {
	let Bson::Document(operators) = condition else {
		return Ok(contains(values, condition));
	};
	if !is_operator_document(condition) {
		return Ok(contains(values, condition));
	}
	for (operator, operand) in operators {
		let matched = match operator.as_str() {
			"$eq" => contains(values, operand),
			"$ne" => !contains(values, operand),
			"$exists" => {
				let wanted = match operand {
					Bson::Boolean(flag) => *flag,
					Bson::Int32(n) => *n != 0,
					Bson::Int64(n) => *n != 0,
					_ => true,
				};
				wanted != values.is_empty()
			}
			"$in" => operand_list(operator, operand)?
				.iter()
				.any(|expected| contains(values, expected)),
			"$nin" => !operand_list(operator, operand)?
				.iter()
				.any(|expected| contains(values, expected)),
			other => return Err(invalid(format!("unsupported query operator {}", other))),
		};
		if !matched {
			return Ok(false);
		}
	}
	Ok(true)
}

/// Whether `document` satisfies `filter`
pub(super) fn matches(document: &Document, filter: &Document) -> Result<bool> {
	for (key, condition) in filter {
		let matched = if key == "$or" {
			let mut any = false;
			for branch in operand_list(key, condition)? {
				let Bson::Document(branch) = branch else {
					return Err(invalid("$or branches must be documents".to_string()));
				};
				if matches(document, branch)? {
					any = true;
					break;
				}
			}
			any
		} else if key.starts_with('$') {
			return Err(invalid(format!("unsupported query operator {}", key)));
		} else {
			condition_matches(&lookup(document, key), condition)?
		};
		if !matched {
			return Ok(false);
		}
	}
	Ok(true)
}

fn set_in_document(document: &mut Document, segments: &[&str], value: Bson, path: &str) -> Result<bool> {
	let Some((head, rest)) = segments.split_first() else {
		return Err(invalid(format!("empty key path in $set of {}", path)));
	};
	if rest.is_empty() {
		if document.get(*head) == Some(&value) {
			return Ok(false);
		}
		document.insert(*head, value);
		return Ok(true);
	}
	if !document.contains_key(*head) {
		document.insert(*head, Document::new());
	}
	match document.get_mut(*head) {
		Some(child) => set_in_value(child, rest, value, path),
		None => Err(invalid(format!("cannot set {}", path))),
	}
}

fn set_in_value(target: &mut Bson, segments: &[&str], value: Bson, path: &str) -> Result<bool> {
	match target {
		Bson::Document(inner) => set_in_document(inner, segments, value, path),
		Bson::Array(items) => {
			let Some((head, rest)) = segments.split_first() else {
				return Err(invalid(format!("empty key path in $set of {}", path)));
			};
			let index: usize = head
				.parse()
				.map_err(|_| invalid(format!("cannot address list item '{}' in {}", head, path)))?;
			if items.len() <= index {
				items.resize(index + 1, Bson::Null);
			}
			let item = &mut items[index];
			if rest.is_empty() {
				if *item == value {
					return Ok(false);
				}
				*item = value;
				return Ok(true);
			}
			if matches!(item, Bson::Null) {
				*item = Bson::Document(Document::new());
			}
			set_in_value(item, rest, value, path)
		}
		other => Err(invalid(format!("cannot create {} inside {}", path, other))),
	}
}

fn unset_in_document(document: &mut Document, segments: &[&str]) -> bool {
	match segments {
		[] => false,
		[last] => document.remove(*last).is_some(),
		[head, rest @ ..] => document
			.get_mut(*head)
			.is_some_and(|child| unset_in_value(child, rest)),
	}
}

fn unset_in_value(target: &mut Bson, segments: &[&str]) -> bool {
	match target {
		Bson::Document(inner) => unset_in_document(inner, segments),
		Bson::Array(items) => {
			let Some((head, rest)) = segments.split_first() else {
				return false;
			};
			let Some(item) = head.parse::<usize>().ok().and_then(|index| items.get_mut(index)) else {
				return false;
			};
			if !rest.is_empty() {
				return unset_in_value(item, rest);
			}
			// List items keep their position
			let changed = !matches!(item, Bson::Null);
			*item = Bson::Null;
			changed
		}
		_ => false,
	}
}

fn segments(path: &str) -> Vec<&str> {
	path.split('.').collect()
}

/// Apply a `$set` / `$unset` / `$rename` update, returning whether anything changed
pub(super) fn apply_update(document: &mut Document, update: &Document) -> Result<bool> {
	if update.is_empty() {
		return Err(invalid("empty update document".to_string()));
	}
	let mut changed = false;
	for (operator, fields) in update {
		let Bson::Document(fields) = fields else {
			return Err(invalid(format!("{} expects a document", operator)));
		};
		for (path, value) in fields {
			changed |= match operator.as_str() {
				"$set" => set_in_document(document, &segments(path), value.clone(), path)?,
				"$unset" => unset_in_document(document, &segments(path)),
				"$rename" => {
					let Bson::String(to) = value else {
						return Err(invalid(format!("$rename target of {} must be a string", path)));
					};
					let moved = lookup(document, path).first().map(|value| (*value).clone());
					match moved {
						Some(moved) => {
							unset_in_document(document, &segments(path));
							set_in_document(document, &segments(to), moved, to)?;
							true
						}
						None => false,
					}
				}
				other => return Err(invalid(format!("unsupported update operator {}", other))),
			};
		}
	}
	Ok(changed)
}

#[cfg(test)]
mod tests {
	use super::*;
	use bson::doc;
	use rstest::rstest;

	#[rstest]
	#[case(doc! { "a": 1 }, true)]
	#[case(doc! { "a": { "$exists": true } }, true)]
	#[case(doc! { "b": { "$exists": false } }, true)]
	#[case(doc! { "a": { "$ne": 1 } }, false)]
	#[case(doc! { "a": { "$in": [2, 1] } }, true)]
	#[case(doc! { "a": { "$nin": [1] } }, false)]
	#[case(doc! { "items.sku": "y" }, true)]
	#[case(doc! { "items.1.sku": "x" }, false)]
	#[case(doc! { "$or": [ { "a": 2 }, { "items.0.sku": "x" } ] }, true)]
	#[case(doc! { "b": null }, true)]
	fn test_matches(#[case] filter: Document, #[case] expected: bool) {
		let document = doc! { "a": 1, "items": [ { "sku": "x" }, { "sku": "y" } ] };
		assert_eq!(matches(&document, &filter).unwrap(), expected);
	}

	#[rstest]
	fn test_unknown_operator_is_rejected() {
		let result = matches(&doc! { "a": 1 }, &doc! { "a": { "$regex": "x" } });
		assert!(matches!(result, Err(NoSQLError::InvalidOperation(_))));
	}

	#[rstest]
	fn test_nested_set_and_unset() {
		let mut document = doc! { "items": [ { "inner": { "x": 1 } }, { "inner": { "x": 2 } } ] };

		let changed = apply_update(
			&mut document,
			&doc! { "$set": { "items.1.inner.y": 3 }, "$unset": { "items.0.inner.x": "" } },
		)
		.unwrap();

		assert!(changed);
		assert_eq!(
			document,
			doc! { "items": [ { "inner": {} }, { "inner": { "x": 2, "y": 3 } } ] }
		);
	}

	#[rstest]
	fn test_rename_and_noop_set() {
		let mut document = doc! { "a": 1 };

		assert!(apply_update(&mut document, &doc! { "$rename": { "a": "b" } }).unwrap());
		assert!(!apply_update(&mut document, &doc! { "$set": { "b": 1 } }).unwrap());
		assert!(!apply_update(&mut document, &doc! { "$rename": { "a": "c" } }).unwrap());
		assert_eq!(document, doc! { "b": 1 });
	}

	#[rstest]
	fn test_set_through_scalar_fails() {
		let mut document = doc! { "a": 5 };
		assert!(apply_update(&mut document, &doc! { "$set": { "a.b": 1 } }).is_err());
	}
}
