//! Translation between logical column names and physical document fields.

use bson::Document;
use indexmap::IndexMap;

use crate::query::IDENTITY_FIELD;

/// Bidirectional mapping from logical column names to physical field names.
///
/// The map always contains the implicit entry `id -> identity column`, added
/// after the configured entries so it wins over a conflicting configuration.
/// Names without an entry pass through unchanged in both directions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnMap {
    forward: IndexMap<String, String>,
    reverse: IndexMap<String, String>,
}

impl ColumnMap {
    /// Builds a map from configured entries plus the implicit identity entry.
    pub fn new<I, K, V>(entries: I, identity_column: &str) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut forward: IndexMap<String, String> = entries
            .into_iter()
            .map(|(logical, physical)| (logical.into(), physical.into()))
            .collect();
        forward.insert(IDENTITY_FIELD.to_string(), identity_column.to_string());

        let reverse = forward
            .iter()
            .map(|(logical, physical)| (physical.clone(), logical.clone()))
            .collect();

        Self { forward, reverse }
    }

    /// Maps a single name or a whole record, see [`MapColumns`].
    pub fn map_columns<T: MapColumns>(&self, data: T, reverse: bool) -> T::Output {
        data.map_with(self, reverse)
    }

    /// Maps one name; `reverse` goes from physical to logical.
    pub fn map_name<'a>(&'a self, name: &'a str, reverse: bool) -> &'a str {
        let table = if reverse { &self.reverse } else { &self.forward };

        table.get(name).map(String::as_str).unwrap_or(name)
    }

    /// Returns the logical to physical entries.
    pub fn entries(&self) -> &IndexMap<String, String> {
        &self.forward
    }
}

/// Data that can be passed through a [`ColumnMap`].
pub trait MapColumns {
    type Output;

    fn map_with(self, map: &ColumnMap, reverse: bool) -> Self::Output;
}

impl MapColumns for &str {
    type Output = String;

    fn map_with(self, map: &ColumnMap, reverse: bool) -> String {
        map.map_name(self, reverse).to_string()
    }
}

impl MapColumns for String {
    type Output = String;

    fn map_with(self, map: &ColumnMap, reverse: bool) -> String {
        map.map_name(&self, reverse).to_string()
    }
}

/// Keys are renamed, values and key order are kept.
impl MapColumns for Document {
    type Output = Document;

    fn map_with(self, map: &ColumnMap, reverse: bool) -> Document {
        self.into_iter()
            .map(|(key, value)| (map.map_name(&key, reverse).to_string(), value))
            .collect()
    }
}

impl MapColumns for &Document {
    type Output = Document;

    fn map_with(self, map: &ColumnMap, reverse: bool) -> Document {
        self.clone().map_with(map, reverse)
    }
}

impl MapColumns for Vec<Document> {
    type Output = Vec<Document>;

    fn map_with(self, map: &ColumnMap, reverse: bool) -> Vec<Document> {
        self.into_iter().map(|document| document.map_with(map, reverse)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_implicit_identity_entry() {
        let map = ColumnMap::new(Vec::<(String, String)>::new(), "_id");

        assert_eq!(map.map_columns("id", false), "_id");
        assert_eq!(map.map_columns("_id", true), "id");
        assert_eq!(map.map_columns("name", false), "name");
    }

    #[test]
    fn test_record_round_trip() {
        let map = ColumnMap::new([("title", "t"), ("body", "b")], "_id");
        let record = doc! { "id": 1, "title": "x", "body": "y", "other": true };

        let physical = map.map_columns(&record, false);
        assert_eq!(physical, doc! { "_id": 1, "t": "x", "b": "y", "other": true });
        assert_eq!(map.map_columns(physical, true), record);
    }

    #[test]
    fn test_identity_entry_overrides_configuration() {
        let map = ColumnMap::new([("id", "key")], "_id");

        assert_eq!(map.map_columns(String::from("id"), false), "_id");
        assert_eq!(map.entries().len(), 1);
    }

    #[test]
    fn test_sequences_are_mapped_per_record() {
        let map = ColumnMap::new([("title", "t")], "_id");

        assert_eq!(
            map.map_columns(vec![doc! { "_id": 1, "t": "a" }, doc! { "_id": 2 }], true),
            vec![doc! { "id": 1, "title": "a" }, doc! { "id": 2 }]
        );
    }
}
