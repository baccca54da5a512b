//! Collection schemas, field definitions and the process-wide schema registry.
//!
//! Document collections are schemaless; a [`DocumentSchema`] only records what
//! the application declares about a collection: its name, field definitions
//! with their filters, indexes and the behaviors registered on the gateway.
//!
//! Schemas are created lazily through a [`SchemaRegistry`], keyed by the
//! gateway identifier, and live as long as the registry does. Gateways sharing
//! an identifier and a registry share one schema.

use bson::{Bson, Document, oid::ObjectId};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::Deserialize;
use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, OnceLock},
};

use crate::behavior::{Behavior, BehaviorTag};

/// Declared type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    #[default]
    Raw,
    String,
    Int,
    Float,
    Boolean,
    Date,
    ObjectId,
    Array,
    Document,
}

/// Sanitizer applied to the values of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldFilter {
    Raw,
    String,
    Int,
    Float,
    Boolean,
    Date,
    ObjectId,
}

impl From<FieldType> for FieldFilter {
    fn from(field_type: FieldType) -> Self {
        match field_type {
            FieldType::String => FieldFilter::String,
            FieldType::Int => FieldFilter::Int,
            FieldType::Float => FieldFilter::Float,
            FieldType::Boolean => FieldFilter::Boolean,
            FieldType::Date => FieldFilter::Date,
            FieldType::ObjectId => FieldFilter::ObjectId,
            FieldType::Raw | FieldType::Array | FieldType::Document => FieldFilter::Raw,
        }
    }
}

impl FieldFilter {
    /// Converts `value` into the filter's type. Values that cannot be
    /// converted become `Null`; `Null` stays `Null`.
    pub fn sanitize(&self, value: &Bson) -> Bson {
        if matches!(value, Bson::Null) {
            return Bson::Null;
        }

        match self {
            FieldFilter::Raw => value.clone(),
            FieldFilter::String => Bson::String(match value {
                Bson::String(s) => s.clone(),
                Bson::ObjectId(oid) => oid.to_hex(),
                Bson::Int32(i) => i.to_string(),
                Bson::Int64(i) => i.to_string(),
                Bson::Double(f) => f.to_string(),
                Bson::Boolean(b) => b.to_string(),
                other => other.to_string(),
            }),
            FieldFilter::Int => match value {
                Bson::Int32(_) | Bson::Int64(_) => value.clone(),
                Bson::Double(f) => Bson::Int64(f.trunc() as i64),
                Bson::Boolean(b) => Bson::Int32(i32::from(*b)),
                Bson::String(s) => s.trim().parse::<i64>().map(Bson::Int64).unwrap_or(Bson::Null),
                _ => Bson::Null,
            },
            FieldFilter::Float => match value {
                Bson::Double(_) => value.clone(),
                Bson::Int32(i) => Bson::Double(f64::from(*i)),
                Bson::Int64(i) => Bson::Double(*i as f64),
                Bson::String(s) => s.trim().parse::<f64>().map(Bson::Double).unwrap_or(Bson::Null),
                _ => Bson::Null,
            },
            FieldFilter::Boolean => Bson::Boolean(match value {
                Bson::Boolean(b) => *b,
                Bson::Int32(i) => *i != 0,
                Bson::Int64(i) => *i != 0,
                Bson::Double(f) => *f != 0.0,
                Bson::String(s) => matches!(s.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
                _ => false,
            }),
            FieldFilter::Date => match value {
                Bson::DateTime(_) => value.clone(),
                Bson::Int64(millis) => Bson::DateTime(bson::DateTime::from_millis(*millis)),
                Bson::String(s) => s
                    .parse::<DateTime<Utc>>()
                    .map(|dt| Bson::DateTime(bson::DateTime::from_chrono(dt)))
                    .unwrap_or(Bson::Null),
                _ => Bson::Null,
            },
            FieldFilter::ObjectId => match value {
                Bson::ObjectId(_) => value.clone(),
                Bson::String(s) => ObjectId::parse_str(s).map(Bson::ObjectId).unwrap_or(Bson::Null),
                _ => Bson::Null,
            },
        }
    }

    /// Returns `true` if `value` survives sanitizing unchanged.
    pub fn validate(&self, value: &Bson) -> bool {
        &self.sanitize(value) == value
    }
}

/// Definition of a single field.
#[derive(Debug, Clone, Default)]
pub struct SchemaField {
    pub name: String,
    pub field_type: FieldType,
    pub length: Option<u64>,
    pub scope: Option<String>,
    pub default: Option<Bson>,
    pub required: bool,
    pub primary: bool,
    pub unique: bool,
    /// Fields sharing an index with this one.
    pub related: Vec<String>,
    filter: OnceLock<FieldFilter>,
}

impl SchemaField {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self { name: name.into(), field_type, ..Default::default() }
    }

    /// Returns the field's filter. Unless one was set explicitly it is
    /// resolved from the field type on first access.
    pub fn filter(&self) -> FieldFilter {
        *self.filter.get_or_init(|| FieldFilter::from(self.field_type))
    }

    pub fn set_filter(&mut self, filter: FieldFilter) {
        self.filter = OnceLock::from(filter);
    }

    pub fn with_filter(mut self, filter: FieldFilter) -> Self {
        self.set_filter(filter);
        self
    }
}

/// Declared shape of a collection.
#[derive(Clone, Default)]
pub struct DocumentSchema {
    /// Collection name.
    pub name: String,
    pub length: Option<u64>,
    pub description: Option<String>,
    pub fields: IndexMap<String, SchemaField>,
    pub indexes: IndexMap<String, Document>,
    behaviors: IndexMap<BehaviorTag, Arc<dyn Behavior>>,
}

impl fmt::Debug for DocumentSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentSchema")
            .field("name", &self.name)
            .field("length", &self.length)
            .field("description", &self.description)
            .field("fields", &self.fields)
            .field("indexes", &self.indexes)
            .field("behaviors", &self.behaviors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl DocumentSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    /// Returns the field definition for `name`, creating an untyped one when
    /// `create` is set and none exists.
    pub fn field_mut(&mut self, name: &str, create: bool) -> Option<&mut SchemaField> {
        if create && !self.fields.contains_key(name) {
            self.fields.insert(name.to_string(), SchemaField::new(name, FieldType::Raw));
        }

        self.fields.get_mut(name)
    }

    pub fn field(&self, name: &str) -> Option<&SchemaField> {
        self.fields.get(name)
    }

    /// Sanitizes the values of `record` with the filters of the declared
    /// fields. Undeclared fields are left untouched.
    pub fn sanitize(&self, record: &Document) -> Document {
        record
            .iter()
            .map(|(key, value)| {
                let value = match self.fields.get(key) {
                    Some(field) => field.filter().sanitize(value),
                    None => value.clone(),
                };
                (key.clone(), value)
            })
            .collect()
    }

    /// Registers a behavior, replacing a previous one with the same tag.
    pub fn add_behavior(&mut self, behavior: Arc<dyn Behavior>) {
        self.behaviors.insert(behavior.tag(), behavior);
    }

    pub fn behavior(&self, tag: BehaviorTag) -> Option<Arc<dyn Behavior>> {
        self.behaviors.get(&tag).cloned()
    }

    /// Returns the registered behaviors in registration order.
    pub fn behaviors(&self) -> Vec<Arc<dyn Behavior>> {
        self.behaviors.values().cloned().collect()
    }

    pub fn has_behavior(&self, tag: BehaviorTag) -> bool {
        self.behaviors.contains_key(&tag)
    }
}

/// Shared handle on a registered schema.
pub type SharedSchema = Arc<RwLock<DocumentSchema>>;

/// Cache of schemas keyed by gateway identifier.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: RwLock<HashMap<String, SharedSchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the schema registered under `identifier`, creating it with
    /// `init` if there is none. `init` runs at most once per identifier.
    pub fn get_or_create(&self, identifier: &str, init: impl FnOnce() -> DocumentSchema) -> SharedSchema {
        if let Some(schema) = self.schemas.read().get(identifier) {
            return schema.clone();
        }

        self.schemas
            .write()
            .entry(identifier.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(init())))
            .clone()
    }

    pub fn get(&self, identifier: &str) -> Option<SharedSchema> {
        self.schemas.read().get(identifier).cloned()
    }

    pub fn len(&self) -> usize {
        self.schemas.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_filter_defaults_to_field_type() {
        let field = SchemaField::new("age", FieldType::Int);

        assert_eq!(field.filter(), FieldFilter::Int);
        assert_eq!(field.filter().sanitize(&Bson::String(" 42 ".into())), Bson::Int64(42));
    }

    #[test]
    fn test_explicit_filter_wins() {
        let field = SchemaField::new("age", FieldType::Int).with_filter(FieldFilter::String);

        assert_eq!(field.filter().sanitize(&Bson::Int32(7)), Bson::String("7".into()));
    }

    #[test]
    fn test_sanitizers() {
        assert_eq!(FieldFilter::Boolean.sanitize(&Bson::String("on".into())), Bson::Boolean(true));
        assert_eq!(FieldFilter::Float.sanitize(&Bson::Int32(2)), Bson::Double(2.0));
        assert_eq!(FieldFilter::Int.sanitize(&Bson::String("x".into())), Bson::Null);
        assert_eq!(FieldFilter::ObjectId.sanitize(&Bson::String("nope".into())), Bson::Null);
        assert_eq!(
            FieldFilter::Date.sanitize(&Bson::String("2024-01-02T03:04:05Z".into())),
            Bson::DateTime(bson::DateTime::from_millis(1_704_164_645_000))
        );
        assert!(FieldFilter::Raw.validate(&Bson::Int32(1)));
        assert!(!FieldFilter::Int.validate(&Bson::String("1".into())));
    }

    #[test]
    fn test_schema_sanitizes_declared_fields() {
        let mut schema = DocumentSchema::new("users");
        schema.fields.insert("age".into(), SchemaField::new("age", FieldType::Int));
        schema.field_mut("active", true).unwrap().set_filter(FieldFilter::Boolean);

        assert_eq!(
            schema.sanitize(&doc! { "age": "30", "active": 1, "name": "Alice" }),
            doc! { "age": 30_i64, "active": true, "name": "Alice" }
        );
        assert!(schema.field_mut("missing", false).is_none());
    }

    #[test]
    fn test_registry_creates_once() {
        let registry = SchemaRegistry::new();
        let first = registry.get_or_create("com.users", || DocumentSchema::new("users"));
        let second = registry.get_or_create("com.users", || DocumentSchema::new("other"));

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.read().name, "users");
        assert_eq!(registry.len(), 1);
        assert!(registry.get("com.posts").is_none());
    }
}
