//! Query construction and compilation into native document queries.
//!
//! A [`DocumentQuery`] accumulates predicates, sort keys, a limit window and a
//! target collection, and compiles the predicates into the native query
//! document understood by the storage backends:
//!
//! ```ignore
//! use docgate::query::{DocumentQuery, SortDirection};
//!
//! let mut query = DocumentQuery::new()
//!     .filter("age", ">=", 18)
//!     .filter("tag", "IN", "x")
//!     .sort("name", SortDirection::Desc)
//!     .limit(10, 20)
//!     .from("users");
//!
//! // { "age": { "$gte": 18 }, "tag": { "$in": ["x"] } }
//! let native = query.build(None)?;
//! ```
//!
//! # Native form
//!
//! Equality compiles to a direct `field: value` assignment, every other
//! operator to `field: { $op: value }`. Predicates are combined by implicit
//! conjunction: two predicates on the same field leave only the last one in
//! the compiled document, and `OR` markers are kept for introspection only.
//!
//! The logical `id` field (and the physical identity column) is rewritten to
//! the identity column and its values are converted to the engine's native
//! identity type, see [`IdentityType`].

use bson::{Bson, Document, oid::ObjectId, spec::BinarySubtype};
use indexmap::IndexMap;
use serde::Deserialize;

use crate::error::{GatewayError, GatewayResult};

/// Logical name of the identity field as seen by rows and callers.
pub const IDENTITY_FIELD: &str = "id";

/// Default physical identity column of a document collection.
pub const DEFAULT_IDENTITY_COLUMN: &str = "_id";

/// Native representation of identity values in the storage engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityType {
    /// 12-byte object ids, parsed from their hex representation.
    #[default]
    ObjectId,
    /// UUIDs stored as binary subtype 4.
    Uuid,
    /// Values are passed through unchanged.
    Raw,
}

impl IdentityType {
    /// Converts a single identity value into its native representation.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::QueryCompilation`] if the value cannot be
    /// represented as the native identity type.
    pub fn to_native(&self, value: &Bson) -> GatewayResult<Bson> {
        match self {
            IdentityType::ObjectId => match value {
                Bson::ObjectId(_) => Ok(value.clone()),
                Bson::String(s) => ObjectId::parse_str(s)
                    .map(Bson::ObjectId)
                    .map_err(|_| GatewayError::QueryCompilation(format!("`{s}` is not a valid object id"))),
                other => Err(GatewayError::QueryCompilation(format!("cannot convert {other} into an object id"))),
            },
            IdentityType::Uuid => match value {
                Bson::Binary(binary) if binary.subtype == BinarySubtype::Uuid => Ok(value.clone()),
                Bson::String(s) => bson::Uuid::parse_str(s)
                    .map(Bson::from)
                    .map_err(|e| GatewayError::QueryCompilation(format!("`{s}` is not a valid uuid: {e}"))),
                other => Err(GatewayError::QueryCompilation(format!("cannot convert {other} into a uuid"))),
            },
            IdentityType::Raw => Ok(value.clone()),
        }
    }
}

/// Comparison operators understood by the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
    /// `=`
    Eq,
    /// `<>` or `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Lte,
    /// `>`
    Gt,
    /// `>=`
    Gte,
    /// `in`
    In,
}

impl Constraint {
    /// Parses an operator, ignoring case.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::QueryCompilation`] for unknown operators.
    pub fn parse(operator: &str) -> GatewayResult<Self> {
        match operator.trim().to_lowercase().as_str() {
            "=" => Ok(Constraint::Eq),
            "<>" | "!=" => Ok(Constraint::Ne),
            "<" => Ok(Constraint::Lt),
            "<=" => Ok(Constraint::Lte),
            ">" => Ok(Constraint::Gt),
            ">=" => Ok(Constraint::Gte),
            "in" => Ok(Constraint::In),
            other => Err(GatewayError::QueryCompilation(format!("unknown operator `{other}`"))),
        }
    }

    /// Returns the native operator key.
    pub fn native(&self) -> &'static str {
        match self {
            Constraint::Eq => "$eq",
            Constraint::Ne => "$ne",
            Constraint::Lt => "$lt",
            Constraint::Lte => "$lte",
            Constraint::Gt => "$gt",
            Constraint::Gte => "$gte",
            Constraint::In => "$in",
        }
    }
}

/// Logical connective stored with each predicate after the first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Conjunction {
    #[default]
    And,
    Or,
}

impl From<&str> for Conjunction {
    fn from(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("or") {
            Conjunction::Or
        } else {
            Conjunction::And
        }
    }
}

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    /// Ascending order, stored as `1`.
    #[default]
    Asc,
    /// Descending order, stored as `-1`.
    Desc,
}

impl SortDirection {
    /// Returns the native sort value.
    pub fn native(&self) -> i32 {
        match self {
            SortDirection::Asc => 1,
            SortDirection::Desc => -1,
        }
    }
}

/// Anything other than `desc` (ignoring case) sorts ascending.
impl From<&str> for SortDirection {
    fn from(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("desc") {
            SortDirection::Desc
        } else {
            SortDirection::Asc
        }
    }
}

/// Conversion of one or many field names into a list.
pub trait IntoFieldList {
    fn into_field_list(self) -> Vec<String>;
}

impl IntoFieldList for &str {
    fn into_field_list(self) -> Vec<String> {
        vec![self.to_string()]
    }
}

impl IntoFieldList for String {
    fn into_field_list(self) -> Vec<String> {
        vec![self]
    }
}

impl IntoFieldList for &[&str] {
    fn into_field_list(self) -> Vec<String> {
        self.iter().map(|field| field.to_string()).collect()
    }
}

impl<const N: usize> IntoFieldList for [&str; N] {
    fn into_field_list(self) -> Vec<String> {
        self.iter().map(|field| field.to_string()).collect()
    }
}

impl IntoFieldList for Vec<&str> {
    fn into_field_list(self) -> Vec<String> {
        self.into_iter().map(str::to_string).collect()
    }
}

impl IntoFieldList for Vec<String> {
    fn into_field_list(self) -> Vec<String> {
        self
    }
}

/// A single filter clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    /// The field the clause applies to.
    pub field: String,
    /// The operator, upper-cased. `None` marks a field-only clause that does
    /// not constrain the result.
    pub constraint: Option<String>,
    /// The value to compare against.
    pub value: Option<Bson>,
    /// Connective to the previous clause; always `None` for the first one.
    pub conjunction: Option<Conjunction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PredicateSignature {
    field: String,
    constraint: String,
    value: String,
}

impl PredicateSignature {
    fn of(field: &str, constraint: Option<&str>, value: Option<&Bson>) -> Self {
        Self {
            field: field.to_string(),
            constraint: constraint.unwrap_or_default().to_string(),
            value: value.map(ToString::to_string).unwrap_or_default(),
        }
    }
}

/// Bounded result window. Only produced when the limit is positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryWindow {
    pub limit: u64,
    pub offset: u64,
}

/// Accumulates filter, sort and limit state for a collection and compiles it
/// into a native query document.
#[derive(Debug, Clone)]
pub struct DocumentQuery {
    from: Option<String>,
    predicates: IndexMap<PredicateSignature, Predicate>,
    sort: IndexMap<String, i32>,
    limit: u64,
    offset: u64,
    identity_column: String,
    identity_type: IdentityType,
    raw: Option<Document>,
    compiled: Option<Document>,
}

impl Default for DocumentQuery {
    fn default() -> Self {
        Self {
            from: None,
            predicates: IndexMap::new(),
            sort: IndexMap::new(),
            limit: 0,
            offset: 0,
            identity_column: DEFAULT_IDENTITY_COLUMN.to_string(),
            identity_type: IdentityType::default(),
            raw: None,
            compiled: None,
        }
    }
}

impl DocumentQuery {
    /// Creates an empty query targeting no collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the physical identity column and the native identity type used
    /// when compiling `id` predicates.
    pub fn with_identity(mut self, column: impl Into<String>, identity_type: IdentityType) -> Self {
        self.identity_column = column.into();
        self.identity_type = identity_type;
        self
    }

    /// Adds a constraining clause joined with `AND`.
    ///
    /// Adding a clause with the same field, operator and value twice is a
    /// no-op. Operators are case-insensitive and validated on compilation.
    pub fn filter(self, field: impl Into<String>, constraint: &str, value: impl Into<Bson>) -> Self {
        self.filter_with(field, Some(constraint), Some(value.into()), Conjunction::And)
    }

    /// Adds a field-only clause. It is kept for introspection but does not
    /// constrain the compiled query.
    pub fn filter_field(self, field: impl Into<String>) -> Self {
        self.filter_with(field, None, None, Conjunction::And)
    }

    /// Adds a clause with every part spelled out.
    pub fn filter_with(
        mut self,
        field: impl Into<String>,
        constraint: Option<&str>,
        value: Option<Bson>,
        conjunction: Conjunction,
    ) -> Self {
        let field = field.into();
        if field.is_empty() {
            return self;
        }

        let constraint = constraint.map(|c| c.trim().to_uppercase());
        let value = match constraint {
            Some(_) => Some(value.unwrap_or(Bson::Null)),
            None => None,
        };
        let signature = PredicateSignature::of(&field, constraint.as_deref(), value.as_ref());

        if !self.predicates.contains_key(&signature) {
            let conjunction = if self.predicates.is_empty() { None } else { Some(conjunction) };

            self.predicates.insert(signature, Predicate { field, constraint, value, conjunction });
        }

        self
    }

    /// Sorts by one or many fields. Later calls overwrite the direction of a
    /// field that is already sorted on, keeping its position.
    pub fn sort(mut self, fields: impl IntoFieldList, direction: impl Into<SortDirection>) -> Self {
        let direction = direction.into().native();

        for field in fields.into_field_list() {
            self.sort.insert(field, direction);
        }

        self
    }

    /// Sets the page size and the number of documents to skip. Negative
    /// values are clamped to zero; a zero limit means unbounded.
    pub fn limit(mut self, limit: i64, offset: i64) -> Self {
        self.limit = limit.max(0) as u64;
        self.offset = offset.max(0) as u64;
        self
    }

    /// Sets the target collection.
    pub fn from(mut self, collection: impl Into<String>) -> Self {
        self.set_collection(collection);
        self
    }

    /// Sets the target collection in place.
    pub fn set_collection(&mut self, collection: impl Into<String>) {
        self.from = Some(collection.into());
    }

    /// Compiles the query and caches the result.
    ///
    /// A raw native query bypasses compilation: it is stored and returned
    /// verbatim, and used by backends in place of the predicates until the
    /// query is reset.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::QueryCompilation`] for unknown operators and
    /// malformed identity values.
    pub fn build(&mut self, raw: Option<Document>) -> GatewayResult<Document> {
        if let Some(raw) = raw {
            self.raw = Some(raw.clone());
            self.compiled = Some(raw.clone());
            return Ok(raw);
        }

        let compiled = self.compile()?;
        self.compiled = Some(compiled.clone());

        Ok(compiled)
    }

    /// Returns the native query: the raw override if one was supplied to
    /// [`build`](Self::build), otherwise a fresh compilation.
    pub fn native(&self) -> GatewayResult<Document> {
        match &self.raw {
            Some(raw) => Ok(raw.clone()),
            None => self.compile(),
        }
    }

    /// Compiles the predicates without touching the cache. An empty query
    /// compiles to an empty document which matches everything.
    pub fn compile(&self) -> GatewayResult<Document> {
        let mut query = Document::new();

        for predicate in self.predicates.values() {
            let Some(constraint) = predicate.constraint.as_deref() else {
                continue;
            };
            let constraint = Constraint::parse(constraint)?;
            let (field, value) = self.resolve(predicate)?;

            let value = match (constraint, value) {
                (Constraint::In, Bson::Array(items)) => Bson::Array(items),
                (Constraint::In, scalar) => Bson::Array(vec![scalar]),
                (_, value) => value,
            };

            if constraint == Constraint::Eq {
                query.insert(field, value);
            } else {
                let mut operation = Document::new();
                operation.insert(constraint.native(), value);
                query.insert(field, operation);
            }
        }

        Ok(query)
    }

    fn resolve(&self, predicate: &Predicate) -> GatewayResult<(String, Bson)> {
        let value = predicate.value.clone().unwrap_or(Bson::Null);

        if !self.is_identity(&predicate.field) {
            return Ok((predicate.field.clone(), value));
        }

        let value = match value {
            Bson::Array(items) => Bson::Array(
                items
                    .iter()
                    .map(|item| self.identity_type.to_native(item))
                    .collect::<GatewayResult<Vec<_>>>()?,
            ),
            scalar => self.identity_type.to_native(&scalar)?,
        };

        Ok((self.identity_column.clone(), value))
    }

    fn is_identity(&self, field: &str) -> bool {
        field == IDENTITY_FIELD || field == self.identity_column
    }

    /// Clears predicates, sort, limit window, compiled form and the target
    /// collection. Identity settings are kept.
    pub fn reset(&mut self) {
        self.from = None;
        self.predicates.clear();
        self.sort.clear();
        self.limit = 0;
        self.offset = 0;
        self.raw = None;
        self.compiled = None;
    }

    /// Returns the target collection, if any.
    pub fn collection(&self) -> Option<&str> {
        self.from.as_deref()
    }

    /// Returns the stored clauses in insertion order.
    pub fn predicates(&self) -> impl Iterator<Item = &Predicate> {
        self.predicates.values()
    }

    /// Returns `true` if no clause was added.
    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// Returns the sort mapping, field to `1` or `-1`.
    pub fn sort_fields(&self) -> &IndexMap<String, i32> {
        &self.sort
    }

    /// Returns the sort mapping as a native document, or `None` when unsorted.
    pub fn sort_document(&self) -> Option<Document> {
        if self.sort.is_empty() {
            return None;
        }

        Some(
            self.sort
                .iter()
                .map(|(field, direction)| (field.clone(), Bson::Int32(*direction)))
                .collect(),
        )
    }

    /// Returns the limit window, or `None` when the query is unbounded.
    pub fn window(&self) -> Option<QueryWindow> {
        (self.limit > 0).then_some(QueryWindow { limit: self.limit, offset: self.offset })
    }

    /// Returns the last result of [`build`](Self::build).
    pub fn compiled(&self) -> Option<&Document> {
        self.compiled.as_ref()
    }

    /// Returns the physical identity column.
    pub fn identity_column(&self) -> &str {
        &self.identity_column
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use pretty_assertions::assert_eq;

    const OID: &str = "507f1f77bcf86cd799439011";

    #[test]
    fn test_identical_predicates_are_stored_once() {
        let mut query = DocumentQuery::new()
            .filter("name", "=", "Alice")
            .filter("name", "=", "Alice")
            .filter("age", "in", 3)
            .filter("age", "IN", 3);

        assert_eq!(query.predicates().count(), 2);
        assert_eq!(query.build(None).unwrap(), doc! { "name": "Alice", "age": { "$in": [3] } });
    }

    #[test]
    fn test_empty_query_compiles_to_empty_document() {
        let mut query = DocumentQuery::new();

        assert_eq!(query.build(None).unwrap(), Document::new());
        assert_eq!(query.compiled(), Some(&Document::new()));
    }

    #[test]
    fn test_empty_field_is_ignored() {
        let query = DocumentQuery::new().filter("", "=", 1);

        assert!(query.is_empty());
    }

    #[test]
    fn test_id_is_rewritten_to_native_identity() {
        let mut query = DocumentQuery::new().filter("id", "=", OID);

        assert_eq!(
            query.build(None).unwrap(),
            doc! { "_id": ObjectId::parse_str(OID).unwrap() }
        );
    }

    #[test]
    fn test_id_sequences_are_converted_item_by_item() {
        let other = "507f191e810c19729de860ea";
        let query = DocumentQuery::new().filter("id", "in", vec![OID, other]);

        assert_eq!(
            query.compile().unwrap(),
            doc! { "_id": { "$in": [ObjectId::parse_str(OID).unwrap(), ObjectId::parse_str(other).unwrap()] } }
        );
    }

    #[test]
    fn test_invalid_identity_fails_compilation() {
        let query = DocumentQuery::new().filter("id", "=", "abc");

        assert!(matches!(query.compile(), Err(GatewayError::QueryCompilation(_))));
    }

    #[test]
    fn test_raw_identity_and_custom_column() {
        let query = DocumentQuery::new()
            .with_identity("key", IdentityType::Raw)
            .filter("id", "=", "abc");

        assert_eq!(query.compile().unwrap(), doc! { "key": "abc" });
    }

    #[test]
    fn test_uuid_identity() {
        let uuid = "936da01f-9abd-4d9d-80c7-02af85c822a8";
        let query = DocumentQuery::new()
            .with_identity("_id", IdentityType::Uuid)
            .filter("id", "=", uuid);

        assert_eq!(
            query.compile().unwrap(),
            doc! { "_id": bson::Uuid::parse_str(uuid).unwrap() }
        );
    }

    #[test]
    fn test_comparison_operators() {
        let query = DocumentQuery::new()
            .filter("age", ">=", 18)
            .filter("score", "<", 5)
            .filter("rank", "<=", 2)
            .filter("height", ">", 1.5)
            .filter("status", "<>", "banned")
            .filter("role", "!=", "guest");

        assert_eq!(
            query.compile().unwrap(),
            doc! {
                "age": { "$gte": 18 },
                "score": { "$lt": 5 },
                "rank": { "$lte": 2 },
                "height": { "$gt": 1.5 },
                "status": { "$ne": "banned" },
                "role": { "$ne": "guest" },
            }
        );
    }

    #[test]
    fn test_scalar_membership_is_coerced_to_sequence() {
        let query = DocumentQuery::new().filter("tag", "IN", "x");

        assert_eq!(query.compile().unwrap(), doc! { "tag": { "$in": ["x"] } });
    }

    #[test]
    fn test_unknown_operator_fails_compilation() {
        let query = DocumentQuery::new().filter("name", "LIKE", "A%");

        match query.compile() {
            Err(GatewayError::QueryCompilation(message)) => assert!(message.contains("like")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_last_predicate_wins_per_field() {
        let query = DocumentQuery::new()
            .filter("age", ">", 10)
            .filter("age", "<", 20);

        assert_eq!(query.compile().unwrap(), doc! { "age": { "$lt": 20 } });
    }

    #[test]
    fn test_field_only_predicate_does_not_constrain() {
        let query = DocumentQuery::new().filter_field("name").filter("age", "=", 3);

        assert_eq!(query.predicates().count(), 2);
        assert_eq!(query.compile().unwrap(), doc! { "age": 3 });
    }

    #[test]
    fn test_first_predicate_has_no_conjunction() {
        let query = DocumentQuery::new()
            .filter("a", "=", 1)
            .filter_with("b", Some("="), Some(Bson::Int32(2)), Conjunction::from("or"));

        let conjunctions = query.predicates().map(|p| p.conjunction).collect::<Vec<_>>();
        assert_eq!(conjunctions, vec![None, Some(Conjunction::Or)]);
        assert_eq!(query.predicates().next().unwrap().constraint.as_deref(), Some("="));
    }

    #[test]
    fn test_sort_merges_and_normalizes_direction() {
        let query = DocumentQuery::new()
            .sort(["name", "age"], "DESC")
            .sort("name", "asc")
            .sort(String::from("rank"), "sideways");

        assert_eq!(query.sort_document(), Some(doc! { "name": 1, "age": -1, "rank": 1 }));
    }

    #[test]
    fn test_limit_window() {
        assert_eq!(DocumentQuery::new().limit(0, 20).window(), None);
        assert_eq!(
            DocumentQuery::new().limit(10, 20).window(),
            Some(QueryWindow { limit: 10, offset: 20 })
        );
        assert_eq!(
            DocumentQuery::new().limit(10, -4).window(),
            Some(QueryWindow { limit: 10, offset: 0 })
        );
        assert_eq!(DocumentQuery::new().limit(-1, 5).window(), None);
    }

    #[test]
    fn test_raw_override_is_returned_verbatim() {
        let mut query = DocumentQuery::new().filter("name", "=", "Alice");
        let raw = doc! { "$or": [{ "a": 1 }, { "b": 2 }] };

        assert_eq!(query.build(Some(raw.clone())).unwrap(), raw);
        assert_eq!(query.native().unwrap(), raw);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut query = DocumentQuery::new()
            .filter("name", "=", "Alice")
            .sort("name", "asc")
            .limit(5, 5)
            .from("users");
        query.build(None).unwrap();

        query.reset();

        assert!(query.is_empty());
        assert_eq!(query.collection(), None);
        assert_eq!(query.sort_document(), None);
        assert_eq!(query.window(), None);
        assert_eq!(query.compiled(), None);
        assert_eq!(query.build(None).unwrap(), Document::new());
    }
}
