//! MongoDB backend for docgate.
//!
//! This crate implements the `StoreBackend` trait over the official MongoDB
//! driver. Native query documents compiled by `DocumentQuery` are passed to the
//! server as they are, so every operator MongoDB understands works in raw queries.
//!
//! Enable it through the `mongodb` feature of the facade crate:
//!
//! ```toml
//! [dependencies]
//! docgate = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Connection
//!
//! A connection string is passed to the builder directly, or composed from
//! [`MongoDbOptions`]. Only `mongodb://` and `mongodb+srv://` strings are accepted.
//!
//! ```ignore
//! use docgate::{backend::StoreBackendBuilder, mongodb::{MongoDbOptions, MongoDbStoreBuilder}};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = MongoDbOptions { database: "blog".into(), ..Default::default() };
//!     let store = MongoDbStoreBuilder::from_options(&options).build().await?;
//!
//!     store.shutdown().await?;
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docgate_mongodb;

pub mod store;

pub use store::{MongoDbOptions, MongoDbStore, MongoDbStoreBuilder};
