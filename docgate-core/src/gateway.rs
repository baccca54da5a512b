//! The document gateway: CRUD over one collection, wrapped in hook points.
//!
//! A [`DocumentGateway`] binds a storage backend to one collection. Every
//! operation builds a [`CommandContext`], runs the `before.*` hook, calls the
//! backend, and runs the `after.*` hook. Records cross the gateway through the
//! column map: logical names on the row side, physical names on the storage
//! side.
//!
//! # Example
//!
//! ```ignore
//! use docgate::prelude::*;
//!
//! let registry = SchemaRegistry::new();
//! let users = DocumentGateway::new(
//!     InMemoryStore::new(),
//!     GatewayConfig::new("users"),
//!     &registry,
//! );
//!
//! let mut row = users.get_row();
//! row.set("name", "Alice");
//! let row = users.insert(row).await?;
//! assert_eq!(row.status(), Some(RowStatus::Created));
//!
//! let adults = users
//!     .find(Some(users.query().filter("age", ">=", 18)), FetchMode::Rowset)
//!     .await?;
//! ```

use async_trait::async_trait;
use bson::{Bson, Document};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::Deserialize;
use std::{
    fmt,
    sync::{Arc, Weak},
};
use tracing::debug;

use crate::{
    backend::{FetchMode, Found, StoreBackend},
    behavior::{Behavior, BehaviorTag},
    column::ColumnMap,
    command::{
        CommandChain, CommandContext, CommandHandler, CommandName, CommandOutcome, Operation, Payload, run_handlers,
    },
    error::{GatewayError, GatewayResult},
    query::{DEFAULT_IDENTITY_COLUMN, DocumentQuery, IDENTITY_FIELD, IdentityType},
    row::{Row, RowStatus},
    rowset::Rowset,
    schema::{DocumentSchema, FieldFilter, SchemaRegistry, SharedSchema},
};

/// Configuration of a [`DocumentGateway`].
///
/// ```ignore
/// let config = GatewayConfig::new("posts")
///     .with_identity_column("_id")
///     .map_column("title", "t")
///     .with_filter("views", FieldFilter::Int);
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Key of the gateway's schema in the [`SchemaRegistry`]. Defaults to the
    /// collection name.
    pub identifier: String,
    /// Collection name.
    pub name: String,
    /// Physical identity column.
    pub identity_column: String,
    pub identity_type: IdentityType,
    /// Logical to physical column names.
    pub column_map: IndexMap<String, String>,
    /// Filters attached to the schema's field definitions, by column.
    pub filters: IndexMap<String, FieldFilter>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            identifier: String::new(),
            name: String::new(),
            identity_column: DEFAULT_IDENTITY_COLUMN.to_string(),
            identity_type: IdentityType::default(),
            column_map: IndexMap::new(),
            filters: IndexMap::new(),
        }
    }
}

impl GatewayConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = identifier.into();
        self
    }

    pub fn with_identity_column(mut self, column: impl Into<String>) -> Self {
        self.identity_column = column.into();
        self
    }

    pub fn with_identity_type(mut self, identity_type: IdentityType) -> Self {
        self.identity_type = identity_type;
        self
    }

    pub fn map_column(mut self, logical: impl Into<String>, physical: impl Into<String>) -> Self {
        self.column_map.insert(logical.into(), physical.into());
        self
    }

    pub fn with_filter(mut self, column: impl Into<String>, filter: FieldFilter) -> Self {
        self.filters.insert(column.into(), filter);
        self
    }

    fn identifier(&self) -> &str {
        if self.identifier.is_empty() { &self.name } else { &self.identifier }
    }
}

/// Object-safe view of a gateway, used by rows and rowsets to reach back
/// into the gateway that produced them.
#[async_trait]
pub trait DynGateway: Send + Sync {
    fn name(&self) -> &str;

    fn identity_column(&self) -> &str;

    fn columns(&self) -> &ColumnMap;

    fn query(&self) -> DocumentQuery;

    fn query_from(&self, record: &Document) -> DocumentQuery;

    fn get_row(&self) -> Row;

    fn get_rowset(&self) -> Rowset;

    async fn find(&self, query: Option<DocumentQuery>, mode: FetchMode) -> GatewayResult<Payload>;

    async fn insert(&self, row: Row) -> GatewayResult<Row>;

    async fn update(&self, row: &mut Row) -> GatewayResult<Option<u64>>;

    async fn delete(&self, row: &mut Row) -> GatewayResult<Option<u64>>;

    async fn count(&self, query: Option<DocumentQuery>) -> GatewayResult<u64>;
}

/// Weak reference from a row or rowset to its gateway.
#[derive(Clone, Default)]
pub struct DocumentRef(Option<Weak<dyn DynGateway>>);

impl DocumentRef {
    pub fn new(gateway: Weak<dyn DynGateway>) -> Self {
        Self(Some(gateway))
    }

    /// Returns the gateway if it is still alive.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::DocumentUnavailable`] for detached references
    /// and dropped gateways.
    pub fn resolve(&self) -> GatewayResult<Arc<dyn DynGateway>> {
        match &self.0 {
            Some(gateway) => gateway
                .upgrade()
                .ok_or_else(|| GatewayError::DocumentUnavailable("the gateway was dropped".to_string())),
            None => Err(GatewayError::DocumentUnavailable("not bound to a gateway".to_string())),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.resolve().is_ok()
    }
}

impl fmt::Debug for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.resolve() {
            Ok(gateway) => write!(f, "DocumentRef({})", gateway.name()),
            Err(_) => f.write_str("DocumentRef(<detached>)"),
        }
    }
}

struct BehaviorHandler(Arc<dyn Behavior>);

impl CommandHandler for BehaviorHandler {
    fn execute(&self, name: CommandName, context: &mut CommandContext) -> CommandOutcome {
        self.0.execute(name, context)
    }

    fn priority(&self) -> i32 {
        self.0.priority()
    }
}

/// Gateway to one collection of a storage backend.
pub struct DocumentGateway<B: StoreBackend> {
    backend: B,
    name: String,
    identity_column: String,
    identity_type: IdentityType,
    columns: ColumnMap,
    chain: RwLock<CommandChain>,
    behaviors: RwLock<IndexMap<BehaviorTag, Arc<dyn Behavior>>>,
    schema: SharedSchema,
    this: Weak<Self>,
}

impl<B: StoreBackend> fmt::Debug for DocumentGateway<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentGateway")
            .field("backend", &self.backend)
            .field("name", &self.name)
            .field("identity_column", &self.identity_column)
            .field("columns", &self.columns)
            .field("chain", &*self.chain.read())
            .finish()
    }
}

impl<B: StoreBackend + 'static> DocumentGateway<B> {
    /// Creates a gateway and registers its schema in `registry`.
    ///
    /// # Arguments
    ///
    /// * `backend` - The storage backend holding the collection
    /// * `config` - Collection name, identity and column settings
    /// * `registry` - Schema cache shared by the application's gateways
    pub fn new(backend: B, config: GatewayConfig, registry: &SchemaRegistry) -> Arc<Self> {
        let schema = registry.get_or_create(config.identifier(), || DocumentSchema::new(config.name.clone()));
        {
            let mut schema = schema.write();
            for (column, filter) in &config.filters {
                if let Some(field) = schema.field_mut(column, true) {
                    field.set_filter(*filter);
                }
            }
        }

        let columns = ColumnMap::new(config.column_map.clone(), &config.identity_column);

        Arc::new_cyclic(|this| Self {
            backend,
            name: config.name,
            identity_column: config.identity_column,
            identity_type: config.identity_type,
            columns,
            chain: RwLock::new(CommandChain::new()),
            behaviors: RwLock::new(IndexMap::new()),
            schema,
            this: this.clone(),
        })
    }

    /// Returns the collection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the physical identity column.
    pub fn identity_column(&self) -> &str {
        &self.identity_column
    }

    pub fn columns(&self) -> &ColumnMap {
        &self.columns
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn schema(&self) -> SharedSchema {
        self.schema.clone()
    }

    /// Returns a weak reference to this gateway.
    pub fn document_ref(&self) -> DocumentRef {
        let gateway: Weak<dyn DynGateway> = self.this.clone();
        DocumentRef::new(gateway)
    }

    /// Adds a handler to the gateway's command chain.
    pub fn enqueue(&self, handler: Arc<dyn CommandHandler>) {
        self.chain.write().enqueue(handler);
    }

    /// Registers a behavior on the command chain and in the schema. Returns
    /// `false` if a behavior with the same tag is already registered.
    pub fn add_behavior(&self, behavior: Arc<dyn Behavior>) -> bool {
        let tag = behavior.tag();
        {
            let mut behaviors = self.behaviors.write();
            if behaviors.contains_key(&tag) {
                return false;
            }
            behaviors.insert(tag, behavior.clone());
        }

        self.schema.write().add_behavior(behavior.clone());
        self.enqueue(Arc::new(BehaviorHandler(behavior)));
        debug!(collection = %self.name, behavior = %tag, "behavior added");

        true
    }

    /// Returns the registered behaviors in registration order.
    pub fn behaviors(&self) -> Vec<Arc<dyn Behavior>> {
        self.behaviors.read().values().cloned().collect()
    }

    pub fn has_behavior(&self, tag: BehaviorTag) -> bool {
        self.behaviors.read().contains_key(&tag)
    }

    fn run(&self, name: CommandName, context: &mut CommandContext) -> bool {
        let handlers = self.chain.read().handlers();
        run_handlers(&handlers, name, context)
    }

    /// Returns a fresh query targeting the collection, configured with the
    /// gateway's identity settings.
    pub fn query(&self) -> DocumentQuery {
        DocumentQuery::new()
            .with_identity(self.identity_column.clone(), self.identity_type)
            .from(self.name.clone())
    }

    /// Returns a fresh query with one equality predicate per field of
    /// `record`. Logical names are mapped to physical ones.
    pub fn query_from(&self, record: &Document) -> DocumentQuery {
        record.iter().fold(self.query(), |query, (field, value)| {
            query.filter(self.columns.map_columns(field.as_str(), false), "=", value.clone())
        })
    }

    /// Returns an empty row bound to this gateway.
    pub fn get_row(&self) -> Row {
        Row::new()
            .with_document(self.document_ref())
            .with_identity_column(self.columns.map_columns(self.identity_column.as_str(), true))
    }

    /// Returns an empty rowset bound to this gateway.
    pub fn get_rowset(&self) -> Rowset {
        Rowset::new()
            .with_document(self.document_ref())
            .with_identity_column(self.columns.map_columns(self.identity_column.as_str(), true))
    }

    /// Runs a select.
    ///
    /// Without a query the backend is not called and the result is empty.
    /// Results are mapped to logical names except in the field modes. Row
    /// mode yields a [`Payload::Row`] (new when nothing was found), rowset
    /// mode a [`Payload::Rowset`], the other modes the raw records.
    ///
    /// # Errors
    ///
    /// Propagates compilation and backend errors.
    pub async fn find(&self, query: Option<DocumentQuery>, mode: FetchMode) -> GatewayResult<Payload> {
        let mut context = CommandContext::new(Operation::Select, self.name.clone())
            .with_query(query)
            .with_mode(mode);

        if !self.run(CommandName::BeforeFind, &mut context) {
            debug!(collection = %self.name, "find aborted");
            return Ok(context.data);
        }

        let mode = context.mode.unwrap_or(mode);
        let found = match context.query.as_mut() {
            Some(query) => {
                query.set_collection(self.name.clone());
                debug!(collection = %self.name, ?mode, "find");
                Some(self.backend.find(query, mode).await?)
            }
            None => None,
        };

        let found = match found {
            Some(found) if !mode.is_field() => match found {
                Found::One(document) => Found::One(document.map(|d| self.columns.map_columns(d, true))),
                Found::Many(documents) => Found::Many(self.columns.map_columns(documents, true)),
            },
            Some(found) => found,
            None => Found::empty(mode),
        };

        context.data = match mode {
            FetchMode::Row => {
                let mut row = self.get_row();
                if let Some(document) = found.into_one().filter(|d| !d.is_empty()) {
                    row.set_data(document, false).set_status(RowStatus::Loaded);
                }
                Payload::Row(row)
            }
            FetchMode::Rowset => {
                let mut rowset = self.get_rowset();
                let documents = found.into_many();
                if !documents.is_empty() {
                    rowset.add_data(documents, false);
                }
                Payload::Rowset(rowset)
            }
            FetchMode::Document | FetchMode::Field => Payload::Document(found.into_one()),
            FetchMode::Documents | FetchMode::FieldList => Payload::Documents(found.into_many()),
        };

        self.run(CommandName::AfterFind, &mut context);

        Ok(context.data)
    }

    /// Inserts a row and returns it with the stored data and status
    /// `created`. An aborted insert returns the row as the hooks left it.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::QueryCompilation`] if the row's identity
    /// cannot be converted to the gateway's identity type, and propagates
    /// backend errors.
    pub async fn insert(&self, row: Row) -> GatewayResult<Row> {
        let mut context = CommandContext::new(Operation::Insert, self.name.clone()).with_data(Payload::Row(row));

        if !self.run(CommandName::BeforeInsert, &mut context) {
            debug!(collection = %self.name, "insert aborted");
        } else {
            if let Some(row) = context.data.as_row_mut() {
                let record = self.with_native_identity(self.to_physical(&row.to_document()))?;
                debug!(collection = %self.name, "insert");

                let stored = self.backend.insert(&context.collection, record).await?;
                row.set_data(self.columns.map_columns(stored, true), false)
                    .set_status(RowStatus::Created);
            }

            self.run(CommandName::AfterInsert, &mut context);
        }

        Ok(context.data.into_row().unwrap_or_else(|| self.get_row()))
    }

    /// Updates a stored row, matching it by identity.
    ///
    /// Returns the number of matched records, or `None` when no storage call
    /// was made: the operation was aborted, or the row is new or has no
    /// identity (its status is then `failed`).
    pub async fn update(&self, row: &mut Row) -> GatewayResult<Option<u64>> {
        let mut context = CommandContext::new(Operation::Update, self.name.clone()).with_data(Payload::Row(row.clone()));

        if !self.run(CommandName::BeforeUpdate, &mut context) {
            debug!(collection = %self.name, "update aborted");
        } else {
            if let Some(current) = context.data.as_row_mut() {
                match self.identity_query(current) {
                    Some(query) => {
                        let record = self.strip_identity(self.to_physical(&current.to_document()));
                        debug!(collection = %self.name, "update");

                        let affected = self.backend.update(&context.collection, &query, record.clone()).await?;
                        if affected > 0 {
                            current
                                .set_data(self.columns.map_columns(record, true), false)
                                .set_status(RowStatus::Updated);
                        } else {
                            current.set_status(RowStatus::Failed);
                        }

                        context.affected = Some(affected);
                        context.query = Some(query);
                    }
                    None => {
                        current.set_status(RowStatus::Failed);
                    }
                }
            }

            self.run(CommandName::AfterUpdate, &mut context);
        }

        if let Some(updated) = context.data.into_row() {
            *row = updated;
        }

        Ok(context.affected)
    }

    /// Deletes a stored row, matching it by identity. Returns values as
    /// [`update`](Self::update) does; a deleted row becomes new again.
    pub async fn delete(&self, row: &mut Row) -> GatewayResult<Option<u64>> {
        let mut context = CommandContext::new(Operation::Delete, self.name.clone()).with_data(Payload::Row(row.clone()));

        if !self.run(CommandName::BeforeDelete, &mut context) {
            debug!(collection = %self.name, "delete aborted");
        } else {
            if let Some(current) = context.data.as_row_mut() {
                match self.identity_query(current) {
                    Some(query) => {
                        let record = self.columns.map_columns(current.to_document(), false);
                        debug!(collection = %self.name, "delete");

                        let affected = self.backend.delete(&context.collection, &query, record).await?;
                        current.set_status(if affected > 0 { RowStatus::Deleted } else { RowStatus::Failed });

                        context.affected = Some(affected);
                        context.query = Some(query);
                    }
                    None => {
                        current.set_status(RowStatus::Failed);
                    }
                }
            }

            self.run(CommandName::AfterDelete, &mut context);
        }

        if let Some(deleted) = context.data.into_row() {
            *row = deleted;
        }

        Ok(context.affected)
    }

    /// Counts the records matching `query`, or the whole collection. Runs
    /// no hooks.
    pub async fn count(&self, query: Option<DocumentQuery>) -> GatewayResult<u64> {
        let mut query = query.unwrap_or_else(|| self.query());
        query.set_collection(self.name.clone());

        self.backend.count(&query).await
    }

    fn identity_query(&self, row: &Row) -> Option<DocumentQuery> {
        if row.is_new() {
            return None;
        }

        match row.identity() {
            Some(Bson::Null) | None => None,
            Some(identity) => Some(self.query().filter(self.identity_column.clone(), "=", identity.clone())),
        }
    }

    fn to_physical(&self, record: &Document) -> Document {
        let record = self.schema.read().sanitize(record);
        self.columns.map_columns(record, false)
    }

    /// Converts the record's identity to the native identity type. A missing
    /// identity is generated for uuid gateways and left to the backend
    /// otherwise.
    fn with_native_identity(&self, mut record: Document) -> GatewayResult<Document> {
        match record.get(&self.identity_column).cloned() {
            Some(Bson::Null) | None => {
                if self.identity_type == IdentityType::Uuid {
                    record.insert(self.identity_column.clone(), bson::Uuid::new());
                }
            }
            Some(identity) => {
                record.insert(self.identity_column.clone(), self.identity_type.to_native(&identity)?);
            }
        }

        Ok(record)
    }

    fn strip_identity(&self, mut record: Document) -> Document {
        record.remove(&self.identity_column);
        record.remove(IDENTITY_FIELD);
        record
    }
}

#[async_trait]
impl<B: StoreBackend + 'static> DynGateway for DocumentGateway<B> {
    fn name(&self) -> &str {
        DocumentGateway::name(self)
    }

    fn identity_column(&self) -> &str {
        DocumentGateway::identity_column(self)
    }

    fn columns(&self) -> &ColumnMap {
        DocumentGateway::columns(self)
    }

    fn query(&self) -> DocumentQuery {
        DocumentGateway::query(self)
    }

    fn query_from(&self, record: &Document) -> DocumentQuery {
        DocumentGateway::query_from(self, record)
    }

    fn get_row(&self) -> Row {
        DocumentGateway::get_row(self)
    }

    fn get_rowset(&self) -> Rowset {
        DocumentGateway::get_rowset(self)
    }

    async fn find(&self, query: Option<DocumentQuery>, mode: FetchMode) -> GatewayResult<Payload> {
        DocumentGateway::find(self, query, mode).await
    }

    async fn insert(&self, row: Row) -> GatewayResult<Row> {
        DocumentGateway::insert(self, row).await
    }

    async fn update(&self, row: &mut Row) -> GatewayResult<Option<u64>> {
        DocumentGateway::update(self, row).await
    }

    async fn delete(&self, row: &mut Row) -> GatewayResult<Option<u64>> {
        DocumentGateway::delete(self, row).await
    }

    async fn count(&self, query: Option<DocumentQuery>) -> GatewayResult<u64> {
        DocumentGateway::count(self, query).await
    }
}
