//! State-driven access to a gateway's collection.
//!
//! A [`DocumentModel`] turns a set of request states (limit, offset, sort
//! and unique keys such as `id`) into queries against its gateway, and caches
//! the results until a state changes.

use bson::{Bson, Document};
use indexmap::{IndexMap, IndexSet};

use crate::{
    backend::FetchMode,
    error::GatewayResult,
    gateway::{DocumentRef, DynGateway},
    query::{DocumentQuery, IDENTITY_FIELD, SortDirection},
    row::Row,
    rowset::Rowset,
};

/// Page size used when none is set.
pub const DEFAULT_LIMIT: u64 = 10;

/// Request states of a [`DocumentModel`].
#[derive(Debug, Clone)]
pub struct ModelState {
    limit: u64,
    offset: u64,
    sort: Option<String>,
    direction: SortDirection,
    search: Option<String>,
    values: IndexMap<String, Bson>,
    unique: IndexSet<String>,
}

impl Default for ModelState {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            offset: 0,
            sort: None,
            direction: SortDirection::Asc,
            search: None,
            values: IndexMap::new(),
            unique: IndexSet::from([IDENTITY_FIELD.to_string()]),
        }
    }
}

impl ModelState {
    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn sort(&self) -> Option<(&str, SortDirection)> {
        self.sort.as_deref().map(|field| (field, self.direction))
    }

    pub fn search(&self) -> Option<&str> {
        self.search.as_deref()
    }

    /// Returns the value of a keyed state.
    pub fn get(&self, name: &str) -> Option<&Bson> {
        self.values.get(name)
    }

    /// Declares a keyed state as unique: setting it identifies one record.
    pub fn declare_unique(&mut self, name: impl Into<String>) {
        self.unique.insert(name.into());
    }

    /// Returns `true` if at least one unique state holds a value.
    pub fn is_unique(&self) -> bool {
        self.unique
            .iter()
            .any(|name| self.values.get(name).is_some_and(|value| !matches!(value, Bson::Null)))
    }

    /// Returns the keyed states that hold a value, or only the unique ones.
    pub fn get_data(&self, unique: bool) -> Document {
        self.values
            .iter()
            .filter(|(name, value)| !matches!(value, Bson::Null) && (!unique || self.unique.contains(*name)))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    /// Returns limit and offset as query arguments, saturating at `i64::MAX`.
    pub fn window(&self) -> (i64, i64) {
        (
            i64::try_from(self.limit).unwrap_or(i64::MAX),
            i64::try_from(self.offset).unwrap_or(i64::MAX),
        )
    }

    fn snap_offset(&mut self) {
        if self.limit != 0 {
            self.offset = (self.offset / self.limit) * self.limit;
        }
    }
}

/// Queries a gateway according to a [`ModelState`].
#[derive(Debug, Clone)]
pub struct DocumentModel {
    document: DocumentRef,
    state: ModelState,
    item: Option<Row>,
    list: Option<Rowset>,
    total: Option<u64>,
}

impl DocumentModel {
    pub fn new(document: DocumentRef) -> Self {
        Self { document, state: ModelState::default(), item: None, list: None, total: None }
    }

    pub fn state(&self) -> &ModelState {
        &self.state
    }

    pub fn is_connected(&self) -> bool {
        self.document.is_connected()
    }

    /// Sets the page size. The offset is snapped down to a multiple of it.
    pub fn set_limit(&mut self, limit: u64) -> &mut Self {
        self.state.limit = limit;
        self.changed()
    }

    /// Sets the number of records to skip, snapped down to a multiple of
    /// the limit.
    pub fn set_offset(&mut self, offset: u64) -> &mut Self {
        self.state.offset = offset;
        self.changed()
    }

    pub fn set_sort(&mut self, field: impl Into<String>, direction: impl Into<SortDirection>) -> &mut Self {
        self.state.sort = Some(field.into());
        self.state.direction = direction.into();
        self.changed()
    }

    pub fn set_search(&mut self, search: impl Into<String>) -> &mut Self {
        self.state.search = Some(search.into());
        self.changed()
    }

    /// Sets a keyed state such as `id`. Sequences select any of their items.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Bson>) -> &mut Self {
        self.state.values.insert(name.into(), value.into());
        self.changed()
    }

    /// Declares a unique state, see [`ModelState::declare_unique`].
    pub fn declare_unique(&mut self, name: impl Into<String>) -> &mut Self {
        self.state.declare_unique(name);
        self.changed()
    }

    fn changed(&mut self) -> &mut Self {
        self.state.snap_offset();
        self.item = None;
        self.list = None;
        self.total = None;
        self
    }

    /// Returns the record selected by the unique states. Without unique
    /// states the result is an empty row. `None` when not connected.
    pub async fn get_item(&mut self) -> GatewayResult<Option<Row>> {
        if self.item.is_none() {
            let Ok(gateway) = self.document.resolve() else {
                return Ok(None);
            };

            let query = self.state.is_unique().then(|| self.build_where(gateway.as_ref(), gateway.query()));
            self.item = gateway.find(query, FetchMode::Row).await?.into_row();
        }

        Ok(self.item.clone())
    }

    /// Returns the current page of records. `None` when not connected.
    pub async fn get_list(&mut self) -> GatewayResult<Option<Rowset>> {
        if self.list.is_none() {
            let Ok(gateway) = self.document.resolve() else {
                return Ok(None);
            };

            let (limit, offset) = self.state.window();
            let mut query = self.build_where(gateway.as_ref(), gateway.query()).limit(limit, offset);
            if let Some((field, direction)) = self.state.sort() {
                query = query.sort(field, direction);
            }

            self.list = gateway.find(Some(query), FetchMode::Rowset).await?.into_rowset();
        }

        Ok(self.list.clone())
    }

    /// Returns the number of records matching the unique states. `None` when
    /// not connected.
    pub async fn get_total(&mut self) -> GatewayResult<Option<u64>> {
        if self.total.is_none() {
            let Ok(gateway) = self.document.resolve() else {
                return Ok(None);
            };

            let query = self.build_where(gateway.as_ref(), gateway.query());
            self.total = Some(gateway.count(Some(query)).await?);
        }

        Ok(self.total)
    }

    fn build_where(&self, gateway: &dyn DynGateway, query: DocumentQuery) -> DocumentQuery {
        let states = gateway.columns().map_columns(self.state.get_data(true), false);

        states.into_iter().fold(query, |query, (field, value)| match value {
            Bson::Array(_) => query.filter(field, "IN", value),
            value => query.filter(field, "=", value),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let model = DocumentModel::new(DocumentRef::default());

        assert_eq!(model.state().limit(), DEFAULT_LIMIT);
        assert_eq!(model.state().offset(), 0);
        assert_eq!(model.state().sort(), None);
        assert!(!model.state().is_unique());
        assert!(!model.is_connected());
    }

    #[test]
    fn test_offset_snaps_to_limit() {
        let mut model = DocumentModel::new(DocumentRef::default());
        model.set_offset(25);
        assert_eq!(model.state().offset(), 20);

        model.set_limit(7);
        assert_eq!(model.state().offset(), 14);

        model.set_limit(0).set_offset(5);
        assert_eq!(model.state().offset(), 5);
    }

    #[test]
    fn test_unique_states() {
        let mut model = DocumentModel::new(DocumentRef::default());
        model.set("color", "red").set_sort("name", "desc");
        assert!(!model.state().is_unique());

        model.set("id", "abc");
        assert!(model.state().is_unique());
        assert_eq!(model.state().get_data(true), doc! { "id": "abc" });
        assert_eq!(model.state().get_data(false), doc! { "color": "red", "id": "abc" });
        assert_eq!(model.state().sort(), Some(("name", SortDirection::Desc)));
    }

    #[test]
    fn test_huge_limit_saturates() {
        let mut model = DocumentModel::new(DocumentRef::default());
        model.set_limit(u64::MAX);

        assert_eq!(model.state().window(), (i64::MAX, 0));
        assert_eq!(DocumentQuery::new().limit(i64::MAX, 0).window().map(|w| w.limit), Some(i64::MAX as u64));
    }

    #[tokio::test]
    async fn test_detached_model_returns_nothing() {
        let mut model = DocumentModel::new(DocumentRef::default());

        assert!(model.get_item().await.unwrap().is_none());
        assert!(model.get_list().await.unwrap().is_none());
        assert!(model.get_total().await.unwrap().is_none());
    }
}
