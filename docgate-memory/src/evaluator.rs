//! Native query evaluation for in-memory document filtering.
//!
//! This module evaluates compiled native query documents against stored
//! documents, covering the operators the query builder emits (`$eq`, `$ne`,
//! `$lt`, `$lte`, `$gt`, `$gte`, `$in`) plus `$nin`, `$exists` and top-level
//! `$and`/`$or` for raw queries.

use bson::{Bson, Document, datetime::DateTime, oid::ObjectId};
use std::{cmp::Ordering, collections::HashMap};

use docgate_core::error::{GatewayError, GatewayResult};

/// Type-erased, comparable representation of BSON values.
///
/// This enum wraps BSON values and provides comparison operations for
/// filtering and sorting. It normalizes numeric types to f64 for easy comparison.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// Numeric value (all integers and floats normalized to f64)
    Number(f64),
    /// DateTime value
    DateTime(DateTime),
    /// String value
    String(&'a str),
    /// Object id value
    ObjectId(ObjectId),
    /// Binary payload, e.g. a UUID
    Bytes(&'a [u8]),
    /// Array of comparable values
    Array(Vec<Comparable<'a>>),
    /// Map/Object of comparable values
    Map(HashMap<&'a str, Comparable<'a>>),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::ObjectId(value) => Comparable::ObjectId(*value),
            Bson::Binary(binary) => Comparable::Bytes(&binary.bytes),
            Bson::Array(arr) => Comparable::Array(arr.iter().map(Comparable::from).collect::<Vec<_>>()),
            Bson::Document(doc) => Comparable::Map(
                doc.iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect::<HashMap<_, _>>(),
            ),
            _ => Comparable::Null, // Other types are not comparable
        }
    }
}

impl<'a> PartialEq for Comparable<'a> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::Bytes(a), Comparable::Bytes(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl<'a> PartialOrd for Comparable<'a> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.partial_cmp(b),
            (Comparable::Bytes(a), Comparable::Bytes(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Sort key for a possibly missing field; missing fields sort like `Null`.
pub(crate) fn sort_key<'a>(document: &'a Document, field: &str) -> Comparable<'a> {
    lookup(document, field).map(Comparable::from).unwrap_or(Comparable::Null)
}

/// Resolves a field, following dotted paths into embedded documents.
fn lookup<'a>(document: &'a Document, field: &str) -> Option<&'a Bson> {
    if let Some(value) = document.get(field) {
        return Some(value);
    }

    let (head, rest) = field.split_once('.')?;
    match document.get(head)? {
        Bson::Document(inner) => lookup(inner, rest),
        _ => None,
    }
}

pub(crate) struct DocumentEvaluator<'a> {
    document: &'a Document,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self { document }
    }

    /// Returns `true` if the document matches every clause of `filter`. An
    /// empty filter matches everything.
    pub fn evaluate(&self, filter: &Document) -> GatewayResult<bool> {
        for (key, condition) in filter {
            let matched = match key.as_str() {
                "$and" => {
                    let mut all = true;
                    for clause in clauses(key, condition)? {
                        if !self.evaluate(clause)? {
                            all = false;
                            break;
                        }
                    }
                    all
                }
                "$or" => {
                    let mut any = false;
                    for clause in clauses(key, condition)? {
                        if self.evaluate(clause)? {
                            any = true;
                            break;
                        }
                    }
                    any
                }
                operator if operator.starts_with('$') => {
                    return Err(GatewayError::Backend(format!("unsupported query operator `{operator}`")));
                }
                field => self.matches_field(field, condition)?,
            };

            if !matched {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Returns the documents matching `filter`, in order.
    pub fn filter_documents(
        documents: impl IntoIterator<Item = &'a Document>,
        filter: &Document,
    ) -> GatewayResult<Vec<Document>> {
        let mut matched = Vec::new();

        for document in documents {
            if DocumentEvaluator::new(document).evaluate(filter)? {
                matched.push(document.clone());
            }
        }

        Ok(matched)
    }

    fn matches_field(&self, field: &str, condition: &Bson) -> GatewayResult<bool> {
        let actual = lookup(self.document, field);

        match condition {
            Bson::Document(operations) if operations.keys().next().is_some_and(|key| key.starts_with('$')) => {
                for (operator, operand) in operations {
                    if !apply(operator, actual, operand)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            expected => Ok(equals(actual, expected)),
        }
    }
}

fn clauses<'b>(operator: &str, condition: &'b Bson) -> GatewayResult<Vec<&'b Document>> {
    let Bson::Array(items) = condition else {
        return Err(GatewayError::Backend(format!("`{operator}` expects an array of documents")));
    };

    items
        .iter()
        .map(|item| match item {
            Bson::Document(clause) => Ok(clause),
            _ => Err(GatewayError::Backend(format!("`{operator}` expects an array of documents"))),
        })
        .collect()
}

fn apply(operator: &str, actual: Option<&Bson>, operand: &Bson) -> GatewayResult<bool> {
    match operator {
        "$eq" => Ok(equals(actual, operand)),
        "$ne" => Ok(!equals(actual, operand)),
        "$gt" | "$gte" | "$lt" | "$lte" => {
            let Some(actual) = actual else {
                return Ok(false);
            };

            Ok(match Comparable::from(actual).partial_cmp(&Comparable::from(operand)) {
                Some(ordering) => match operator {
                    "$gt" => ordering == Ordering::Greater,
                    "$gte" => ordering != Ordering::Less,
                    "$lt" => ordering == Ordering::Less,
                    _ => ordering != Ordering::Greater,
                },
                None => false,
            })
        }
        "$in" | "$nin" => {
            let Bson::Array(options) = operand else {
                return Err(GatewayError::Backend(format!("`{operator}` expects an array")));
            };
            let found = options.iter().any(|option| equals(actual, option));

            Ok(if operator == "$in" { found } else { !found })
        }
        "$exists" => Ok(actual.is_some() == matches!(operand, Bson::Boolean(true) | Bson::Int32(1) | Bson::Int64(1))),
        other => Err(GatewayError::Backend(format!("unsupported query operator `{other}`"))),
    }
}

/// Equality with document-store semantics: a missing field equals `null`,
/// and an array field equals any of its items.
fn equals(actual: Option<&Bson>, expected: &Bson) -> bool {
    match actual {
        None => matches!(expected, Bson::Null),
        Some(Bson::Array(items)) if !matches!(expected, Bson::Array(_)) => {
            items.iter().any(|item| Comparable::from(item) == Comparable::from(expected))
        }
        Some(value) => Comparable::from(value) == Comparable::from(expected),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn matches(document: Document, filter: Document) -> bool {
        DocumentEvaluator::new(&document).evaluate(&filter).unwrap()
    }

    #[test]
    fn test_direct_equality_and_comparisons() {
        let person = doc! { "name": "Alice", "age": 30, "score": 7.5 };

        assert!(matches(person.clone(), doc! {}));
        assert!(matches(person.clone(), doc! { "name": "Alice", "age": { "$gte": 30_i64 } }));
        assert!(matches(person.clone(), doc! { "score": { "$gt": 7, "$lt": 8 } }));
        assert!(!matches(person.clone(), doc! { "age": { "$lt": 30 } }));
        assert!(!matches(person, doc! { "name": "Bob" }));
    }

    #[test]
    fn test_membership() {
        let tagged = doc! { "tag": "x", "tags": ["a", "b"] };

        assert!(matches(tagged.clone(), doc! { "tag": { "$in": ["x", "y"] } }));
        assert!(matches(tagged.clone(), doc! { "tags": "a" }));
        assert!(matches(tagged.clone(), doc! { "tags": { "$in": ["b"] } }));
        assert!(matches(tagged.clone(), doc! { "tag": { "$nin": ["y"] } }));
        assert!(!matches(tagged, doc! { "tag": { "$in": [] } }));
    }

    #[test]
    fn test_missing_fields() {
        let empty = doc! { "a": 1 };

        assert!(matches(empty.clone(), doc! { "b": { "$ne": 2 } }));
        assert!(matches(empty.clone(), doc! { "b": Bson::Null }));
        assert!(!matches(empty.clone(), doc! { "b": { "$gt": 0 } }));
        assert!(matches(empty, doc! { "b": { "$exists": false } }));
    }

    #[test]
    fn test_object_ids_and_paths() {
        let id = ObjectId::new();
        let document = doc! { "_id": id, "author": { "name": "Alice" } };

        assert!(matches(document.clone(), doc! { "_id": id }));
        assert!(matches(document.clone(), doc! { "author.name": "Alice" }));
        assert!(!matches(document, doc! { "_id": ObjectId::new() }));
    }

    #[test]
    fn test_logical_operators() {
        let document = doc! { "a": 1, "b": 2 };

        assert!(matches(document.clone(), doc! { "$or": [{ "a": 5 }, { "b": 2 }] }));
        assert!(!matches(document.clone(), doc! { "$and": [{ "a": 1 }, { "b": 3 }] }));
    }

    #[test]
    fn test_unsupported_operators_fail() {
        let document = doc! { "a": 1 };

        assert!(DocumentEvaluator::new(&document).evaluate(&doc! { "a": { "$regex": "x" } }).is_err());
        assert!(DocumentEvaluator::new(&document).evaluate(&doc! { "$where": "true" }).is_err());
        assert!(DocumentEvaluator::new(&document).evaluate(&doc! { "$or": 1 }).is_err());
    }
}
