//! Single records bound to a document gateway.
//!
//! A [`Row`] holds the logical fields of one record, tracks which fields were
//! modified since it was last synchronized and remembers whether it exists in
//! storage. Rows handed out by a gateway keep a weak reference to it, so they
//! can save, delete and reload themselves:
//!
//! ```ignore
//! let mut row = gateway.get_row();
//! row.set("title", "Hello");
//! row.save().await?; // insert
//!
//! row.set("title", "Hello, world");
//! row.save().await?; // update
//! row.delete().await?;
//! ```

use bson::{Bson, Document, de::deserialize_from_bson, ser::serialize_to_bson};
use indexmap::IndexSet;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::{fmt, sync::Arc};

use crate::{
    backend::FetchMode,
    error::{GatewayError, GatewayResult},
    gateway::{DocumentRef, DynGateway},
    query::IDENTITY_FIELD,
};

/// Outcome of the last storage operation on a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowStatus {
    Created,
    Loaded,
    Updated,
    Deleted,
    Failed,
}

impl fmt::Display for RowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RowStatus::Created => "created",
            RowStatus::Loaded => "loaded",
            RowStatus::Updated => "updated",
            RowStatus::Deleted => "deleted",
            RowStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A single record.
#[derive(Debug, Clone)]
pub struct Row {
    data: Document,
    modified: IndexSet<String>,
    new: bool,
    status: Option<RowStatus>,
    status_message: Option<String>,
    identity_column: String,
    document: DocumentRef,
}

impl Default for Row {
    fn default() -> Self {
        Self {
            data: Document::new(),
            modified: IndexSet::new(),
            new: true,
            status: None,
            status_message: None,
            identity_column: IDENTITY_FIELD.to_string(),
            document: DocumentRef::default(),
        }
    }
}

impl Row {
    /// Creates an empty, new row that is not bound to any gateway.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new row holding `data`; every field counts as modified.
    pub fn from_document(data: Document) -> Self {
        let mut row = Self::new();
        row.set_data(data, true);
        row
    }

    /// Creates a new row from any serializable value.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidDocument`] if `value` does not
    /// serialize to a document.
    pub fn from_serializable<T: Serialize>(value: &T) -> GatewayResult<Self> {
        match serialize_to_bson(value)? {
            Bson::Document(data) => Ok(Self::from_document(data)),
            other => Err(GatewayError::InvalidDocument(format!("expected a document, got {other}"))),
        }
    }

    /// Creates a new row from a JSON object.
    pub fn from_json(value: Value) -> GatewayResult<Self> {
        Ok(Self::from_document(serde_json::from_value(value)?))
    }

    pub fn with_document(mut self, document: DocumentRef) -> Self {
        self.document = document;
        self
    }

    pub fn with_identity_column(mut self, column: impl Into<String>) -> Self {
        self.identity_column = column.into();
        self
    }

    /// Returns `true` if the row does not exist in storage.
    pub fn is_new(&self) -> bool {
        self.new
    }

    /// Returns a copy of every field.
    pub fn to_document(&self) -> Document {
        self.data.clone()
    }

    /// Converts the row into a JSON object.
    pub fn to_json(&self) -> GatewayResult<Value> {
        Ok(serde_json::to_value(&self.data)?)
    }

    /// Deserializes the row into `T`.
    pub fn deserialize<T: DeserializeOwned>(&self) -> GatewayResult<T> {
        Ok(deserialize_from_bson(Bson::Document(self.data.clone()))?)
    }

    /// Merges `data` into the row. When `modified` is set the fields are
    /// marked as modified, otherwise their modified mark is left alone.
    pub fn set_data(&mut self, data: Document, modified: bool) -> &mut Self {
        for (key, value) in data {
            if modified {
                self.modified.insert(key.clone());
            }
            self.data.insert(key, value);
        }

        self
    }

    /// Returns every field, or only the modified ones.
    pub fn get_data(&self, only_modified: bool) -> Document {
        if !only_modified {
            return self.data.clone();
        }

        self.data
            .iter()
            .filter(|(key, _)| self.modified.contains(key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    pub fn get(&self, field: &str) -> Option<&Bson> {
        self.data.get(field)
    }

    /// Sets a field, marking it as modified if its value changed.
    pub fn set(&mut self, field: &str, value: impl Into<Bson>) -> &mut Self {
        let value = value.into();

        if self.data.get(field) != Some(&value) {
            self.modified.insert(field.to_string());
            self.data.insert(field, value);
        }

        self
    }

    /// Removes a field.
    pub fn unset(&mut self, field: &str) -> Option<Bson> {
        self.modified.shift_remove(field);
        self.data.remove(field)
    }

    pub fn is_modified(&self, field: &str) -> bool {
        self.modified.contains(field)
    }

    pub fn modified_fields(&self) -> impl Iterator<Item = &str> {
        self.modified.iter().map(String::as_str)
    }

    /// Returns the logical name of the identity field.
    pub fn identity_column(&self) -> &str {
        &self.identity_column
    }

    /// Returns the value of the identity field.
    pub fn identity(&self) -> Option<&Bson> {
        self.data.get(&self.identity_column)
    }

    /// Records the outcome of a storage operation.
    ///
    /// `Created`, `Loaded` and `Updated` mark the row as stored and clear the
    /// modified marks; `Deleted` marks it as new again; `Failed` changes
    /// nothing else.
    pub fn set_status(&mut self, status: RowStatus) -> &mut Self {
        match status {
            RowStatus::Created | RowStatus::Loaded | RowStatus::Updated => {
                self.new = false;
                self.modified.clear();
            }
            RowStatus::Deleted => self.new = true,
            RowStatus::Failed => {}
        }
        self.status = Some(status);

        self
    }

    pub fn status(&self) -> Option<RowStatus> {
        self.status
    }

    pub fn set_status_message(&mut self, message: impl Into<String>) -> &mut Self {
        self.status_message = Some(message.into());
        self
    }

    pub fn status_message(&self) -> Option<&str> {
        self.status_message.as_deref()
    }

    /// Returns the gateway the row is bound to.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::DocumentUnavailable`] if the row is detached
    /// or its gateway was dropped.
    pub fn document(&self) -> GatewayResult<Arc<dyn DynGateway>> {
        self.document.resolve()
    }

    /// Returns `true` if the row is bound to a live gateway.
    pub fn is_connected(&self) -> bool {
        self.document.is_connected()
    }

    /// Clears data, modified marks and status, and marks the row as new.
    /// Returns whether the row is connected.
    pub fn reset(&mut self) -> bool {
        self.data = Document::new();
        self.modified.clear();
        self.new = true;
        self.status = None;
        self.status_message = None;

        self.is_connected()
    }

    /// Inserts the row if it is new, updates it otherwise.
    ///
    /// Returns `false` if the row is not connected, the operation was
    /// aborted by a hook or nothing was updated.
    pub async fn save(&mut self) -> GatewayResult<bool> {
        let Ok(gateway) = self.document() else {
            return Ok(false);
        };

        if self.new {
            *self = gateway.insert(self.clone()).await?;
            Ok(!self.new)
        } else {
            Ok(gateway.update(self).await?.is_some_and(|affected| affected > 0))
        }
    }

    /// Deletes a stored row. Returns `false` if the row is new, not connected
    /// or nothing was deleted.
    pub async fn delete(&mut self) -> GatewayResult<bool> {
        if self.new {
            return Ok(false);
        }
        let Ok(gateway) = self.document() else {
            return Ok(false);
        };

        Ok(gateway.delete(self).await?.is_some_and(|affected| affected > 0))
    }

    /// Loads a new row from storage, using its modified fields as the
    /// lookup. Returns `true` if a record was found.
    pub async fn load(&mut self) -> GatewayResult<bool> {
        if !self.new {
            return Ok(false);
        }
        let Ok(gateway) = self.document() else {
            return Ok(false);
        };

        let query = gateway.query_from(&self.get_data(true));
        let found = gateway.find(Some(query), FetchMode::Row).await?;

        match found.into_row() {
            Some(row) if !row.is_new() => {
                self.set_data(row.to_document(), false);
                self.set_status(RowStatus::Loaded);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Counts the stored records matching the row's modified fields.
    /// A detached row counts zero.
    pub async fn count(&self) -> GatewayResult<u64> {
        let Ok(gateway) = self.document() else {
            return Ok(0);
        };

        gateway.count(Some(gateway.query_from(&self.get_data(true)))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Post {
        title: String,
        views: i32,
    }

    #[test]
    fn test_new_row_tracks_modifications() {
        let mut row = Row::from_document(doc! { "title": "x" });
        row.set("views", 3).set_data(doc! { "author": "a" }, false);

        assert!(row.is_new());
        assert_eq!(row.get_data(true), doc! { "title": "x", "views": 3 });
        assert_eq!(row.get_data(false), doc! { "title": "x", "views": 3, "author": "a" });
    }

    #[test]
    fn test_setting_same_value_is_not_a_modification() {
        let mut row = Row::new();
        row.set_data(doc! { "title": "x" }, false);
        row.set("title", "x");

        assert!(!row.is_modified("title"));
        row.set("title", "y");
        assert!(row.is_modified("title"));
    }

    #[test]
    fn test_status_transitions() {
        let mut row = Row::from_document(doc! { "id": 1 });

        row.set_status(RowStatus::Failed);
        assert!(row.is_new());
        assert!(row.is_modified("id"));

        row.set_status(RowStatus::Created);
        assert!(!row.is_new());
        assert_eq!(row.modified_fields().count(), 0);

        row.set_status(RowStatus::Deleted);
        assert!(row.is_new());
        assert_eq!(row.status().map(|s| s.to_string()), Some("deleted".to_string()));
    }

    #[test]
    fn test_identity() {
        let row = Row::from_document(doc! { "key": 7, "id": 1 }).with_identity_column("key");

        assert_eq!(row.identity(), Some(&Bson::Int32(7)));
        assert_eq!(row.identity_column(), "key");
    }

    #[test]
    fn test_serde_conversions() {
        let post = Post { title: "Hello".into(), views: 2 };
        let row = Row::from_serializable(&post).unwrap();

        assert_eq!(row.deserialize::<Post>().unwrap(), post);
        assert_eq!(row.to_json().unwrap(), serde_json::json!({ "title": "Hello", "views": 2 }));
        assert_eq!(
            Row::from_json(serde_json::json!({ "title": "Hi" })).unwrap().to_document(),
            doc! { "title": "Hi" }
        );
        assert!(matches!(Row::from_serializable(&3), Err(GatewayError::InvalidDocument(_))));
    }

    #[tokio::test]
    async fn test_detached_row_is_not_connected() {
        let mut row = Row::from_document(doc! { "title": "x" });

        assert!(!row.is_connected());
        assert!(matches!(row.document(), Err(GatewayError::DocumentUnavailable(_))));
        assert!(!row.save().await.unwrap());
        assert!(!row.load().await.unwrap());
        assert_eq!(row.count().await.unwrap(), 0);
        assert!(!row.reset());
        assert!(row.to_document().is_empty());
    }
}
