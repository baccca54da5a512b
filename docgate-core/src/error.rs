//! Error types and result types for gateway operations.
//!
//! Use [`GatewayResult<T>`] as the return type for fallible operations. Storage
//! backends map their driver errors into [`GatewayError::Backend`]; the gateway
//! itself passes those through untouched.

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors raised by the query builder, the gateway and
/// the storage backends.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// A query could not be compiled into its native form, e.g. because of an
    /// unknown operator or an identity value of the wrong shape.
    #[error("Query compilation error: {0}")]
    QueryCompilation(String),
    /// A row, rowset or model lost the gateway it was bound to.
    #[error("Document unavailable: {0}")]
    DocumentUnavailable(String),
    /// A storage backend was handed a connection it cannot use.
    #[error("Invalid connection: {0}")]
    InvalidConnection(String),
    /// Serialization/deserialization error when converting between BSON, JSON and Rust types.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Error during backend initialization or connection setup.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// A document with the given identity already exists in the collection.
    /// The first argument is the identity, the second is the collection name.
    #[error("Document {0} already exists in collection {1}")]
    DocumentAlreadyExists(String, String),
    /// The record handed to the backend is not a document or is malformed.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// An error occurred in the underlying storage backend.
    #[error("Backend error: {0}")]
    Backend(String),
}

/// A specialized `Result` type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

impl From<BsonError> for GatewayError {
    fn from(err: BsonError) -> Self {
        GatewayError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for GatewayError {
    fn from(err: SerdeJsonError) -> Self {
        GatewayError::Serialization(err.to_string())
    }
}
