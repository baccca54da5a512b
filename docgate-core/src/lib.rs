//! A document-store data-access layer that maps rows and rowsets onto schemaless collections.
//!
//! This crate is the core of the docgate project and provides:
//!
//! - **Query builder** ([`query`]) - Predicates, sort and limit windows compiled into native query documents
//! - **Column mapping** ([`column`]) - Translation between logical and physical field names
//! - **Command chain** ([`command`]) - Named hook points wrapping every CRUD operation
//! - **Document gateway** ([`gateway`]) - CRUD over one collection, producing rows and rowsets
//! - **Rows and rowsets** ([`row`], [`rowset`]) - Records bound to the gateway that produced them
//! - **Schemas and behaviors** ([`schema`], [`behavior`]) - Field definitions, filters and reusable hooks
//! - **Models** ([`model`]) - State-driven item, list and total queries
//! - **Store backend abstraction** ([`backend`]) - The storage adapter capability
//! - **Error handling** ([`error`]) - Error and result types
//!
//! # Example
//!
//! ```ignore
//! use docgate::prelude::*;
//!
//! let registry = SchemaRegistry::new();
//! let posts = DocumentGateway::new(backend, GatewayConfig::new("posts"), &registry);
//! posts.add_behavior(Arc::new(Timestampable::new()));
//!
//! let mut row = posts.get_row();
//! row.set("title", "Hello");
//! row.save().await?;
//!
//! let recent = posts
//!     .find(Some(posts.query().sort("created_on", "desc").limit(10, 0)), FetchMode::Rowset)
//!     .await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docgate_core;

pub mod backend;
pub mod behavior;
pub mod column;
pub mod command;
pub mod error;
pub mod gateway;
pub mod model;
pub mod query;
pub mod row;
pub mod rowset;
pub mod schema;
