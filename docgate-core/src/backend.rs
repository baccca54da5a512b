//! Storage adapter abstraction for document gateways.
//!
//! This module defines the capability a gateway needs from a storage engine:
//! executing compiled native queries and reporting affected counts.
//!
//! # Overview
//!
//! The [`StoreBackend`] trait provides a unified async interface over the five
//! storage calls a gateway makes. Queries reach the backend as a
//! [`DocumentQuery`]; backends call [`DocumentQuery::native`] to obtain the
//! native query document and read the target collection, sort mapping and
//! limit window from the query itself.
//!
//! Implementations are required to be thread-safe (`Send + Sync`) and support
//! concurrent access.
//!
//! # Traits
//!
//! - [`StoreBackend`]: The core trait for storage backends
//! - [`StoreBackendBuilder`]: Factory trait for creating backend instances
//!
//! # Examples
//!
//! ```ignore
//! use docgate::backend::{FetchMode, StoreBackend};
//! use docgate::query::DocumentQuery;
//! use bson::doc;
//!
//! let backend = MyBackendImpl::new();
//!
//! let created = backend.insert("users", doc! { "name": "Alice", "age": 30 }).await?;
//! let query = DocumentQuery::new().filter("age", ">=", 18).from("users");
//! let found = backend.find(&query, FetchMode::Rowset).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use async_trait::async_trait;
use bson::Document;
use std::{fmt::Debug, sync::Arc};

use crate::{error::GatewayResult, query::DocumentQuery};

/// Shape of the result expected from a find operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchMode {
    /// A single record wrapped in a row.
    Row,
    /// Many records collected into a rowset.
    #[default]
    Rowset,
    /// A single raw record.
    Document,
    /// Many raw records.
    Documents,
    /// A single record, passed through without column mapping.
    Field,
    /// Many records, passed through without column mapping.
    FieldList,
}

impl FetchMode {
    /// Returns `true` for the modes that fetch at most one record.
    pub fn is_single(&self) -> bool {
        matches!(self, FetchMode::Row | FetchMode::Document | FetchMode::Field)
    }

    /// Returns `true` for the field modes, whose results skip column mapping.
    pub fn is_field(&self) -> bool {
        matches!(self, FetchMode::Field | FetchMode::FieldList)
    }
}

/// Records returned by [`StoreBackend::find`].
#[derive(Debug, Clone, PartialEq)]
pub enum Found {
    /// Result of a single-record fetch.
    One(Option<Document>),
    /// Result of a multi-record fetch.
    Many(Vec<Document>),
}

impl Found {
    /// Returns an empty result of the shape matching `mode`.
    pub fn empty(mode: FetchMode) -> Self {
        if mode.is_single() { Found::One(None) } else { Found::Many(Vec::new()) }
    }

    /// Returns `true` if no record was found.
    pub fn is_empty(&self) -> bool {
        match self {
            Found::One(document) => document.is_none(),
            Found::Many(documents) => documents.is_empty(),
        }
    }

    /// Returns the single record, or the first of many.
    pub fn into_one(self) -> Option<Document> {
        match self {
            Found::One(document) => document,
            Found::Many(documents) => documents.into_iter().next(),
        }
    }

    /// Returns every record.
    pub fn into_many(self) -> Vec<Document> {
        match self {
            Found::One(document) => document.into_iter().collect(),
            Found::Many(documents) => documents,
        }
    }
}

/// Abstract interface for document storage adapters.
///
/// # Thread Safety
///
/// All implementations must be thread-safe and support concurrent access from
/// multiple async tasks.
///
/// # Error Handling
///
/// Driver errors are reported as
/// [`GatewayError::Backend`](crate::error::GatewayError::Backend) and are
/// propagated by the gateway unchanged.
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Executes a query against its target collection.
    ///
    /// A query without a target collection yields an empty result. Single
    /// modes return the first matching record; multi modes apply the sort
    /// mapping and, when the limit is positive, the limit window.
    ///
    /// # Arguments
    ///
    /// * `query` - The query to execute
    /// * `mode` - The shape of the expected result
    async fn find(&self, query: &DocumentQuery, mode: FetchMode) -> GatewayResult<Found>;

    /// Inserts a record and returns it as stored, including the identity
    /// assigned by the engine.
    ///
    /// # Arguments
    ///
    /// * `collection` - The collection to insert into
    /// * `record` - The record, using physical field names
    async fn insert(&self, collection: &str, record: Document) -> GatewayResult<Document>;

    /// Sets the fields of `record` on every record matching `query` and
    /// returns the number of matched records. Identity fields in `record`
    /// are ignored.
    async fn update(&self, collection: &str, query: &DocumentQuery, record: Document) -> GatewayResult<u64>;

    /// Removes every record matching `query` and returns how many matched.
    async fn delete(&self, collection: &str, query: &DocumentQuery, record: Document) -> GatewayResult<u64>;

    /// Counts the records matching `query` in its target collection.
    async fn count(&self, query: &DocumentQuery) -> GatewayResult<u64>;

    /// Performs cleanup when the backend is shutting down.
    ///
    /// The default implementation is a no-op.
    async fn shutdown(self) -> GatewayResult<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

#[async_trait]
impl<B> StoreBackend for &B
where
    B: StoreBackend,
{
    async fn find(&self, query: &DocumentQuery, mode: FetchMode) -> GatewayResult<Found> {
        (*self).find(query, mode).await
    }

    async fn insert(&self, collection: &str, record: Document) -> GatewayResult<Document> {
        (*self).insert(collection, record).await
    }

    async fn update(&self, collection: &str, query: &DocumentQuery, record: Document) -> GatewayResult<u64> {
        (*self).update(collection, query, record).await
    }

    async fn delete(&self, collection: &str, query: &DocumentQuery, record: Document) -> GatewayResult<u64> {
        (*self).delete(collection, query, record).await
    }

    async fn count(&self, query: &DocumentQuery) -> GatewayResult<u64> {
        (*self).count(query).await
    }
}

#[async_trait]
impl<B> StoreBackend for Arc<B>
where
    B: StoreBackend,
{
    async fn find(&self, query: &DocumentQuery, mode: FetchMode) -> GatewayResult<Found> {
        self.as_ref().find(query, mode).await
    }

    async fn insert(&self, collection: &str, record: Document) -> GatewayResult<Document> {
        self.as_ref().insert(collection, record).await
    }

    async fn update(&self, collection: &str, query: &DocumentQuery, record: Document) -> GatewayResult<u64> {
        self.as_ref().update(collection, query, record).await
    }

    async fn delete(&self, collection: &str, query: &DocumentQuery, record: Document) -> GatewayResult<u64> {
        self.as_ref().delete(collection, query, record).await
    }

    async fn count(&self, query: &DocumentQuery) -> GatewayResult<u64> {
        self.as_ref().count(query).await
    }
}

#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend;

    async fn build(self) -> GatewayResult<Self::Backend>;
}
