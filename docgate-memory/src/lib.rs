//! In-memory document storage backend for docgate.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend` trait.
//! It evaluates the native query documents compiled by `DocumentQuery` and is ideal for
//! development and testing.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using an async-aware RwLock
//! - **Native query evaluation** - Comparison, membership and logical operators
//! - **Sorting and windows** - Multi-key sorts, limits and offsets
//! - **Identity assignment** - Object ids for documents inserted without `_id`
//!
//! # Quick Start
//!
//! ```ignore
//! use docgate::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = InMemoryStore::builder().build().await?;
//!     let registry = SchemaRegistry::new();
//!     let users = DocumentGateway::new(backend, GatewayConfig::new("users"), &registry);
//!
//!     let mut row = users.get_row();
//!     row.set("name", "Alice");
//!     row.save().await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docgate_memory;

pub mod evaluator;
pub mod store;

pub use store::{InMemoryStore, InMemoryStoreBuilder};
