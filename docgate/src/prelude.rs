//! Convenient re-exports of commonly used types from docgate.
//!
//! ```ignore
//! use docgate::prelude::*;
//! ```
//!
//! This provides access to:
//! - Gateways, rows, rowsets and models
//! - Store backends and builders
//! - Query construction
//! - Command hooks, schemas and behaviors
//! - Error types

pub use docgate_core::{
    backend::{FetchMode, Found, StoreBackend, StoreBackendBuilder},
    behavior::{Behavior, BehaviorTag, Timestampable},
    column::ColumnMap,
    command::{CommandChain, CommandContext, CommandHandler, CommandName, CommandOutcome, Operation, Payload},
    error::{GatewayError, GatewayResult},
    gateway::{DocumentGateway, DocumentRef, DynGateway, GatewayConfig},
    model::{DocumentModel, ModelState},
    query::{Conjunction, Constraint, DocumentQuery, IdentityType, SortDirection},
    row::{Row, RowStatus},
    rowset::{RowKey, Rowset},
    schema::{DocumentSchema, FieldFilter, FieldType, SchemaField, SchemaRegistry},
};
