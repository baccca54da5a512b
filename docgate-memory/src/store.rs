//! In-memory storage implementation for document gateways.
//!
//! This module provides a simple in-memory backend that stores documents in
//! insertion order per collection, behind an async-safe read-write lock.

use async_trait::async_trait;
use bson::{Bson, Document, oid::ObjectId};
use mea::rwlock::RwLock;
use std::{cmp::Ordering, collections::HashMap, sync::Arc};
use tracing::trace;

use docgate_core::{
    backend::{FetchMode, Found, StoreBackend, StoreBackendBuilder},
    error::{GatewayError, GatewayResult},
    query::{DEFAULT_IDENTITY_COLUMN, DocumentQuery, IDENTITY_FIELD},
};

use crate::evaluator::{DocumentEvaluator, sort_key};

type StoreMap = HashMap<String, Vec<Document>>;

/// Thread-safe in-memory document storage backend.
///
/// Documents are stored per collection in insertion order and identified by
/// their `_id` field. Inserting a document without one assigns a fresh
/// object id, the way a document database does.
///
/// # Thread Safety
///
/// `InMemoryStore` is cloneable and uses an `Arc`-wrapped internal state, allowing
/// it to be safely shared across async tasks. Multiple clones of the same instance
/// share the same underlying data.
///
/// # Performance
///
/// Queries scan all documents in a collection (no indexing).
///
/// # Example
///
/// ```ignore
/// use docgate_memory::InMemoryStore;
/// use docgate::{backend::{FetchMode, StoreBackend}, query::DocumentQuery};
/// use bson::doc;
///
/// let store = InMemoryStore::new();
/// let stored = store.insert("users", doc! { "name": "Alice", "age": 30 }).await?;
///
/// let query = DocumentQuery::new().filter("age", ">", 18).from("users");
/// assert_eq!(store.count(&query).await?, 1);
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    /// The main storage map: collection_name -> documents
    store: Arc<RwLock<StoreMap>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory document store.
    pub fn new() -> Self {
        Self { store: Arc::new(RwLock::new(StoreMap::new())) }
    }

    /// Creates a builder for constructing an `InMemoryStore`.
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }

    /// Returns a copy of every document in `collection`.
    pub async fn documents(&self, collection: &str) -> Vec<Document> {
        self.store.read().await.get(collection).cloned().unwrap_or_default()
    }

    /// Returns the names of the collections holding documents.
    pub async fn collections(&self) -> Vec<String> {
        self.store.read().await.keys().cloned().collect()
    }
}

fn matching_positions(documents: &[Document], filter: &Document) -> GatewayResult<Vec<usize>> {
    let mut positions = Vec::new();

    for (position, document) in documents.iter().enumerate() {
        if DocumentEvaluator::new(document).evaluate(filter)? {
            positions.push(position);
        }
    }

    Ok(positions)
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    async fn find(&self, query: &DocumentQuery, mode: FetchMode) -> GatewayResult<Found> {
        let Some(collection) = query.collection() else {
            return Ok(Found::empty(mode));
        };
        let filter = query.native()?;
        trace!(collection, %filter, ?mode, "find");

        let store = self.store.read().await;
        let Some(documents) = store.get(collection) else {
            return Ok(Found::empty(mode));
        };

        let mut matched = DocumentEvaluator::filter_documents(documents, &filter)?;

        if mode.is_single() {
            return Ok(Found::One(matched.into_iter().next()));
        }

        if !query.sort_fields().is_empty() {
            matched.sort_by(|a, b| {
                for (field, direction) in query.sort_fields() {
                    let ordering = sort_key(a, field)
                        .partial_cmp(&sort_key(b, field))
                        .unwrap_or(Ordering::Equal);
                    let ordering = if *direction < 0 { ordering.reverse() } else { ordering };

                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }

                Ordering::Equal
            });
        }

        let matched = match query.window() {
            Some(window) => matched
                .into_iter()
                .skip(window.offset as usize)
                .take(window.limit as usize)
                .collect(),
            None => matched,
        };

        Ok(Found::Many(matched))
    }

    async fn insert(&self, collection: &str, record: Document) -> GatewayResult<Document> {
        let mut record = record;
        let id = match record.remove(DEFAULT_IDENTITY_COLUMN) {
            Some(Bson::Null) | None => Bson::ObjectId(ObjectId::new()),
            Some(id) => id,
        };
        record.remove(IDENTITY_FIELD);

        let mut stored = Document::new();
        stored.insert(DEFAULT_IDENTITY_COLUMN, id.clone());
        for (key, value) in record {
            stored.insert(key, value);
        }
        trace!(collection, %id, "insert");

        let mut store = self.store.write().await;
        let documents = store.entry(collection.to_string()).or_default();

        if documents.iter().any(|document| document.get(DEFAULT_IDENTITY_COLUMN) == Some(&id)) {
            return Err(GatewayError::DocumentAlreadyExists(id.to_string(), collection.to_string()));
        }

        documents.push(stored.clone());

        Ok(stored)
    }

    async fn update(&self, collection: &str, query: &DocumentQuery, record: Document) -> GatewayResult<u64> {
        let filter = query.native()?;
        trace!(collection, %filter, "update");

        let mut store = self.store.write().await;
        let Some(documents) = store.get_mut(collection) else {
            return Ok(0);
        };

        let positions = matching_positions(documents, &filter)?;
        for position in &positions {
            let document = &mut documents[*position];
            for (key, value) in &record {
                if key.as_str() != DEFAULT_IDENTITY_COLUMN && key.as_str() != IDENTITY_FIELD {
                    document.insert(key.clone(), value.clone());
                }
            }
        }

        Ok(positions.len() as u64)
    }

    async fn delete(&self, collection: &str, query: &DocumentQuery, _record: Document) -> GatewayResult<u64> {
        let filter = query.native()?;
        trace!(collection, %filter, "delete");

        let mut store = self.store.write().await;
        let Some(documents) = store.get_mut(collection) else {
            return Ok(0);
        };

        let positions = matching_positions(documents, &filter)?;
        for position in positions.iter().rev() {
            documents.remove(*position);
        }

        Ok(positions.len() as u64)
    }

    async fn count(&self, query: &DocumentQuery) -> GatewayResult<u64> {
        let Some(collection) = query.collection() else {
            return Ok(0);
        };
        let filter = query.native()?;

        let store = self.store.read().await;
        let Some(documents) = store.get(collection) else {
            return Ok(0);
        };

        Ok(matching_positions(documents, &filter)?.len() as u64)
    }
}

/// Builder for constructing [`InMemoryStore`] instances.
///
/// # Example
///
/// ```ignore
/// use docgate_memory::InMemoryStore;
/// use docgate::backend::StoreBackendBuilder;
///
/// let store = InMemoryStore::builder().build().await.unwrap();
/// ```
#[derive(Default)]
pub struct InMemoryStoreBuilder;

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    /// Builds and returns a new [`InMemoryStore`] instance.
    async fn build(self) -> GatewayResult<Self::Backend> {
        Ok(InMemoryStore::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use pretty_assertions::assert_eq;

    async fn seeded() -> InMemoryStore {
        let store = InMemoryStore::new();
        for (name, age) in [("Alice", 30), ("Bob", 17), ("Carol", 45), ("Dave", 30)] {
            store.insert("users", doc! { "name": name, "age": age }).await.unwrap();
        }
        store
    }

    fn names(found: Found) -> Vec<String> {
        found
            .into_many()
            .iter()
            .map(|document| document.get_str("name").unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_insert_assigns_object_id_first() {
        let store = InMemoryStore::new();
        let stored = store.insert("users", doc! { "name": "Alice" }).await.unwrap();

        assert!(matches!(stored.get("_id"), Some(Bson::ObjectId(_))));
        assert_eq!(stored.keys().next().map(String::as_str), Some("_id"));
        assert_eq!(store.documents("users").await, vec![stored]);
    }

    #[tokio::test]
    async fn test_duplicate_identity_is_rejected() {
        let store = InMemoryStore::new();
        store.insert("users", doc! { "_id": "a" }).await.unwrap();

        let result = store.insert("users", doc! { "_id": "a" }).await;
        assert!(matches!(result, Err(GatewayError::DocumentAlreadyExists(_, _))));
    }

    #[tokio::test]
    async fn test_find_without_collection_is_empty() {
        let store = seeded().await;

        assert_eq!(store.find(&DocumentQuery::new(), FetchMode::Rowset).await.unwrap(), Found::Many(vec![]));
        assert_eq!(store.find(&DocumentQuery::new(), FetchMode::Row).await.unwrap(), Found::One(None));
        assert_eq!(store.count(&DocumentQuery::new()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_find_sorts_and_windows() {
        let store = seeded().await;
        let query = DocumentQuery::new()
            .filter("age", ">=", 18)
            .sort("age", "desc")
            .sort("name", "asc")
            .limit(2, 1)
            .from("users");

        assert_eq!(names(store.find(&query, FetchMode::Rowset).await.unwrap()), vec!["Alice", "Dave"]);
    }

    #[tokio::test]
    async fn test_zero_limit_is_unbounded() {
        let store = seeded().await;
        let query = DocumentQuery::new().limit(0, 2).from("users");

        assert_eq!(store.find(&query, FetchMode::Rowset).await.unwrap().into_many().len(), 4);
    }

    #[tokio::test]
    async fn test_row_mode_returns_first_match() {
        let store = seeded().await;
        let query = DocumentQuery::new().filter("age", "=", 30).from("users");

        let found = store.find(&query, FetchMode::Row).await.unwrap();
        assert_eq!(found.into_one().unwrap().get_str("name").unwrap(), "Alice");
    }

    #[tokio::test]
    async fn test_update_merges_fields_and_keeps_identity() {
        let store = seeded().await;
        let query = DocumentQuery::new().filter("age", "=", 30).from("users");

        let affected = store
            .update("users", &query, doc! { "_id": "ignored", "id": "ignored", "active": true })
            .await
            .unwrap();
        assert_eq!(affected, 2);

        let active = DocumentQuery::new().filter("active", "=", true).from("users");
        assert_eq!(store.count(&active).await.unwrap(), 2);
        assert!(store
            .documents("users")
            .await
            .iter()
            .all(|document| matches!(document.get("_id"), Some(Bson::ObjectId(_)))));
    }

    #[tokio::test]
    async fn test_delete_reports_matched_count() {
        let store = seeded().await;
        let query = DocumentQuery::new().filter("age", "<", 40).from("users");

        assert_eq!(store.delete("users", &query, Document::new()).await.unwrap(), 3);
        assert_eq!(names(Found::Many(store.documents("users").await)), vec!["Carol"]);
        assert_eq!(store.delete("missing", &query, Document::new()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_raw_query_override() {
        let store = seeded().await;
        let mut query = DocumentQuery::new().from("users");
        query
            .build(Some(doc! { "$or": [{ "name": "Bob" }, { "age": { "$gt": 40 } }] }))
            .unwrap();

        assert_eq!(store.count(&query).await.unwrap(), 2);
    }
}
