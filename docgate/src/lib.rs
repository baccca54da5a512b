//! Main docgate crate providing a unified interface to document gateways.
//!
//! This crate is the primary entry point for users of docgate. It re-exports the
//! core types from `docgate-core` and gives access to the storage backends.
//!
//! # Features
//!
//! - **Gateways** - CRUD over one collection with rows and rowsets bound to their gateway
//! - **Query builder** - Predicates, sorts and windows compiled into native query documents
//! - **Hooks** - Prioritized command handlers around every operation, with the ability to stop it
//! - **Column mapping** - Logical field names translated to physical ones and back
//! - **Schemas and behaviors** - Field filters and reusable hooks such as timestamps
//!
//! # Quick Start
//!
//! ```ignore
//! use docgate::{prelude::*, memory::InMemoryStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = InMemoryStore::builder().build().await?;
//!     let registry = SchemaRegistry::new();
//!
//!     let posts = DocumentGateway::new(
//!         backend,
//!         GatewayConfig::new("posts").map_column("body", "content"),
//!         &registry,
//!     );
//!     posts.add_behavior(Arc::new(Timestampable::new()));
//!
//!     // Create a post
//!     let mut row = posts.get_row();
//!     row.set("title", "Hello");
//!     row.set("body", "First post");
//!     row.save().await?;
//!     assert_eq!(row.status(), Some(RowStatus::Created));
//!
//!     // Query posts
//!     let recent = posts
//!         .find(Some(posts.query().sort("created_on", "desc").limit(10, 0)), FetchMode::Rowset)
//!         .await?
//!         .into_rowset()
//!         .unwrap_or_default();
//!
//!     println!("{} posts", recent.len());
//!     Ok(())
//! }
//! ```
//!
//! # Hooks
//!
//! Handlers receive every named command (`before.insert`, `after.find`, ...) with a
//! mutable context. Returning [`CommandOutcome::Stop`](command::CommandOutcome::Stop)
//! from a `before.*` command cancels the storage call.
//!
//! ```ignore
//! struct ReadOnly;
//!
//! impl CommandHandler for ReadOnly {
//!     fn execute(&self, name: CommandName, _context: &mut CommandContext) -> CommandOutcome {
//!         if name.is_before() && name != CommandName::BeforeFind {
//!             CommandOutcome::Stop
//!         } else {
//!             CommandOutcome::Continue
//!         }
//!     }
//! }
//!
//! posts.enqueue(Arc::new(ReadOnly));
//! ```
//!
//! # Backends
//!
//! - [`memory`] - In-memory storage for development and testing
//! - [`mongodb`] - MongoDB backend (requires `mongodb` feature)

pub mod prelude;

pub use docgate_core::{backend, behavior, column, command, error, gateway, model, query, row, rowset, schema};

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use docgate_memory::{InMemoryStore, InMemoryStoreBuilder};
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docgate_mongodb::{MongoDbOptions, MongoDbStore, MongoDbStoreBuilder};
}
