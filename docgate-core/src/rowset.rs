//! Ordered collections of rows keyed by identity.

use bson::{Bson, Document};
use indexmap::IndexMap;
use std::fmt;
use tracing::warn;

use crate::{
    error::GatewayResult,
    gateway::DocumentRef,
    query::IDENTITY_FIELD,
    row::{Row, RowStatus},
};

/// Key of a row inside a rowset.
///
/// Rows are keyed by their identity value; rows without one get a
/// rowset-local handle. The key keeps the kind of the identity, so the
/// string `"1"` and the integer `1` are distinct keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RowKey {
    /// String identities and object ids, the latter in hex form.
    Identity(String),
    /// Integer identities.
    Number(i64),
    /// Any other identity, by its BSON rendering.
    Other(String),
    Handle(u64),
}

impl RowKey {
    /// Normalizes an identity value into a key.
    pub fn of(value: &Bson) -> Self {
        match value {
            Bson::String(s) => RowKey::Identity(s.clone()),
            Bson::ObjectId(oid) => RowKey::Identity(oid.to_hex()),
            Bson::Int32(i) => RowKey::Number(i64::from(*i)),
            Bson::Int64(i) => RowKey::Number(*i),
            other => RowKey::Other(other.to_string()),
        }
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowKey::Identity(key) | RowKey::Other(key) => f.write_str(key),
            RowKey::Number(number) => write!(f, "{number}"),
            RowKey::Handle(handle) => write!(f, "#{handle}"),
        }
    }
}

/// Ordered set of rows sharing a gateway and an identity field.
#[derive(Debug, Clone)]
pub struct Rowset {
    rows: IndexMap<RowKey, Row>,
    identity_column: String,
    document: DocumentRef,
    next_handle: u64,
}

impl Default for Rowset {
    fn default() -> Self {
        Self {
            rows: IndexMap::new(),
            identity_column: IDENTITY_FIELD.to_string(),
            document: DocumentRef::default(),
            next_handle: 0,
        }
    }
}

impl Rowset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(mut self, document: DocumentRef) -> Self {
        self.document = document;
        self
    }

    pub fn with_identity_column(mut self, column: impl Into<String>) -> Self {
        self.identity_column = column.into();
        self
    }

    pub fn identity_column(&self) -> &str {
        &self.identity_column
    }

    /// Wraps every record in a row and inserts it. Records marked `new` are
    /// treated as unsaved with all fields modified; the others as loaded.
    pub fn add_data(&mut self, data: Vec<Document>, new: bool) -> &mut Self {
        for record in data {
            let mut row = self.empty_row();
            row.set_data(record, new);
            if !new {
                row.set_status(RowStatus::Loaded);
            }
            self.insert(row);
        }

        self
    }

    /// Inserts a row, replacing a row with the same identity. Returns the
    /// key the row is stored under.
    pub fn insert(&mut self, row: Row) -> RowKey {
        let key = match row.get(&self.identity_column) {
            Some(value) if !matches!(value, Bson::Null) => RowKey::of(value),
            _ => {
                warn!(identity_column = %self.identity_column, "row without identity added to rowset");
                self.next_handle += 1;
                RowKey::Handle(self.next_handle)
            }
        };

        self.rows.insert(key.clone(), row);
        key
    }

    /// Removes the row stored under `key`.
    pub fn extract(&mut self, key: &RowKey) -> Option<Row> {
        self.rows.shift_remove(key)
    }

    /// Returns the row whose identity matches `value`.
    pub fn find(&self, value: &Bson) -> Option<&Row> {
        self.rows.get(&RowKey::of(value))
    }

    pub fn get(&self, key: &RowKey) -> Option<&Row> {
        self.rows.get(key)
    }

    pub fn get_mut(&mut self, key: &RowKey) -> Option<&mut Row> {
        self.rows.get_mut(key)
    }

    /// Returns the rows matching every entry of `needle`. An array value
    /// matches any of its items.
    pub fn find_by(&self, needle: &Document) -> Rowset {
        let rows = self
            .rows
            .iter()
            .filter(|(_, row)| {
                needle.iter().all(|(field, expected)| {
                    let actual = row.get(field).unwrap_or(&Bson::Null);
                    match expected {
                        Bson::Array(options) => options.contains(actual),
                        value => value == actual,
                    }
                })
            })
            .map(|(key, row)| (key.clone(), row.clone()))
            .collect();

        Rowset {
            rows,
            identity_column: self.identity_column.clone(),
            document: self.document.clone(),
            next_handle: self.next_handle,
        }
    }

    /// Returns an empty row bound to the same gateway, or `None` when the
    /// rowset is not connected.
    pub fn get_row(&self) -> Option<Row> {
        self.is_connected().then(|| self.empty_row())
    }

    fn empty_row(&self) -> Row {
        Row::new()
            .with_document(self.document.clone())
            .with_identity_column(self.identity_column.clone())
    }

    pub fn is_connected(&self) -> bool {
        self.document.is_connected()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn first(&self) -> Option<&Row> {
        self.rows.first().map(|(_, row)| row)
    }

    pub fn keys(&self) -> impl Iterator<Item = &RowKey> {
        self.rows.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Row> {
        self.rows.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Row> {
        self.rows.values_mut()
    }

    /// Returns the data of every row.
    pub fn to_documents(&self) -> Vec<Document> {
        self.rows.values().map(Row::to_document).collect()
    }

    /// Saves every row. Returns `true` if all saves succeeded.
    pub async fn save(&mut self) -> GatewayResult<bool> {
        let mut result = true;
        for row in self.rows.values_mut() {
            result &= row.save().await?;
        }

        Ok(result)
    }

    /// Deletes every row. Returns `true` if all deletes succeeded.
    pub async fn delete(&mut self) -> GatewayResult<bool> {
        let mut result = true;
        for row in self.rows.values_mut() {
            result &= row.delete().await?;
        }

        Ok(result)
    }
}

impl IntoIterator for Rowset {
    type Item = Row;
    type IntoIter = indexmap::map::IntoValues<RowKey, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{doc, oid::ObjectId};
    use pretty_assertions::assert_eq;

    fn sample() -> Rowset {
        let mut rowset = Rowset::new();
        rowset.add_data(
            vec![
                doc! { "id": "a", "color": "red", "size": 1 },
                doc! { "id": "b", "color": "blue", "size": 2 },
                doc! { "id": "c", "color": "red", "size": 3 },
            ],
            false,
        );
        rowset
    }

    #[test]
    fn test_rows_are_keyed_by_identity() {
        let rowset = sample();

        assert_eq!(rowset.len(), 3);
        assert_eq!(rowset.find(&Bson::String("b".into())).unwrap().get("size"), Some(&Bson::Int32(2)));
        assert!(rowset.iter().all(|row| !row.is_new()));
        assert_eq!(rowset.keys().map(ToString::to_string).collect::<Vec<_>>(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_object_id_identity_uses_hex_key() {
        let oid = ObjectId::new();
        let mut rowset = Rowset::new();
        rowset.add_data(vec![doc! { "id": oid }], false);

        assert!(rowset.get(&RowKey::Identity(oid.to_hex())).is_some());
        assert!(rowset.find(&Bson::ObjectId(oid)).is_some());
    }

    #[test]
    fn test_rows_without_identity_get_handles() {
        let mut rowset = Rowset::new();
        rowset.add_data(vec![doc! { "title": "x" }, doc! { "title": "y" }], true);

        assert_eq!(rowset.keys().cloned().collect::<Vec<_>>(), vec![RowKey::Handle(1), RowKey::Handle(2)]);
        assert!(rowset.first().unwrap().is_new());
    }

    #[test]
    fn test_find_by_needle() {
        let rowset = sample();

        let red = rowset.find_by(&doc! { "color": "red" });
        assert_eq!(red.to_documents().len(), 2);

        let some = rowset.find_by(&doc! { "size": [1, 2], "color": "blue" });
        assert_eq!(some.to_documents(), vec![doc! { "id": "b", "color": "blue", "size": 2 }]);
    }

    #[test]
    fn test_extract_and_replace() {
        let mut rowset = sample();
        rowset.insert(Row::from_document(doc! { "id": "a", "color": "green" }));

        assert_eq!(rowset.len(), 3);
        assert_eq!(
            rowset.find(&Bson::String("a".into())).unwrap().get("color"),
            Some(&Bson::String("green".into()))
        );
        assert!(rowset.extract(&RowKey::Identity("b".into())).is_some());
        assert_eq!(rowset.into_iter().count(), 2);
    }

    #[test]
    fn test_identity_kinds_do_not_collide() {
        let mut rowset = Rowset::new();
        rowset.add_data(vec![doc! { "id": "1", "kind": "text" }, doc! { "id": 1, "kind": "int" }], false);

        assert_eq!(rowset.len(), 2);
        assert_eq!(rowset.find(&Bson::String("1".into())).unwrap().get("kind"), Some(&Bson::String("text".into())));
        assert_eq!(rowset.find(&Bson::Int64(1)).unwrap().get("kind"), Some(&Bson::String("int".into())));
        assert_eq!(rowset.keys().cloned().collect::<Vec<_>>(), vec![RowKey::Identity("1".into()), RowKey::Number(1)]);
    }

    #[test]
    fn test_detached_rowset_has_no_row_factory() {
        assert!(Rowset::new().get_row().is_none());
    }
}
