//! Store driver abstraction used by the connection pool.
//!
//! This module defines the traits a document store must implement so that schemas and
//! documents can be persisted through it. A driver opens connections; each connection
//! exposes one database, which hands out collection handles.
//!
//! # Traits
//!
//! - [`StoreDriver`]: Opens a connection from a [`ConnectionConfig`]
//! - [`StoreConnection`]: An open client connection
//! - [`DatabaseHandle`]: The database a connection is bound to
//! - [`CollectionHandle`]: Writes, reads and indexes one collection
//! - [`StoreDriverBuilder`]: Factory trait for creating driver instances
//!
//! # Examples
//!
//! ```ignore
//! use docnorm::backend::StoreDriver;
//! use docnorm::config::ConnectionConfig;
//! use bson::doc;
//!
//! let config: ConnectionConfig = "memory://localhost/test".parse()?;
//! let instance = driver.connect(&config).await?;
//!
//! let id = instance
//!     .database
//!     .collection("users")
//!     .insert(doc! { "name": "Alice" }, true)
//!     .await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use async_trait::async_trait;
use bson::{Bson, Document as BsonDocument};
use std::{fmt::Debug, sync::Arc};

use crate::{
    config::{ConnectionConfig, Credentials},
    error::NormResult,
    schema::{CappedLimit, IndexSpec},
};

/// Opens connections to a document store.
///
/// Implementations must be thread-safe: the pool calls [`connect`](StoreDriver::connect)
/// from any thread that asks for a handle it has not cached yet.
#[async_trait]
pub trait StoreDriver: Send + Sync + Debug {
    /// Opens a new connection and selects the configured database.
    ///
    /// Authentication is not performed here; the pool calls
    /// [`DatabaseHandle::authenticate`] when the configuration carries credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached or the configuration is not
    /// usable by this driver.
    async fn connect(&self, config: &ConnectionConfig) -> NormResult<ConnectionInstance>;
}

/// An open client connection.
#[async_trait]
pub trait StoreConnection: Send + Sync + Debug {
    /// Closes the connection. Handles obtained from it must not be used afterwards.
    async fn shutdown(&self) -> NormResult<()> {
        Ok(())
    }
}

/// The database selected on a connection.
#[async_trait]
pub trait DatabaseHandle: Send + Sync + Debug {
    fn name(&self) -> &str;

    /// Authenticates the connection against this database.
    ///
    /// # Errors
    ///
    /// Returns an error when the store refuses the credentials.
    async fn authenticate(&self, credentials: &Credentials) -> NormResult<()>;

    /// Returns a handle to the named collection. Collections are created lazily on
    /// first write.
    fn collection(&self, name: &str) -> Box<dyn CollectionHandle>;

    /// Creates the named collection, capped when `capped` is given. Creating a
    /// collection that already exists is not an error.
    async fn create_collection(&self, name: &str, capped: Option<CappedLimit>) -> NormResult<()>;
}

/// Operations on one collection.
///
/// Writes take a `safe` flag: when true the call waits for the store to acknowledge
/// the write and reports its failure; when false the write is issued without
/// acknowledgement and only the primary key is returned.
#[async_trait]
pub trait CollectionHandle: Send + Sync + Debug {
    fn name(&self) -> &str;

    /// Inserts `record`, or replaces the record with the same `_id`.
    ///
    /// Returns the primary key, generated by the store if `record` has none.
    async fn upsert(&self, record: BsonDocument, safe: bool) -> NormResult<Bson>;

    /// Inserts `record` as a new record.
    ///
    /// Returns the primary key, generated by the store if `record` has none.
    async fn insert(&self, record: BsonDocument, safe: bool) -> NormResult<Bson>;

    /// Reads the record whose `_id` equals `id`.
    async fn find_one(&self, id: &Bson) -> NormResult<Option<BsonDocument>>;

    async fn create_index(&self, index: &IndexSpec) -> NormResult<()>;
}

/// A connection paired with the database selected on it.
#[derive(Debug, Clone)]
pub struct ConnectionInstance {
    pub connection: Arc<dyn StoreConnection>,
    pub database: Arc<dyn DatabaseHandle>,
}

impl ConnectionInstance {
    pub fn new(connection: Arc<dyn StoreConnection>, database: Arc<dyn DatabaseHandle>) -> Self {
        Self { connection, database }
    }
}

/// Factory trait for creating driver instances.
#[async_trait]
pub trait StoreDriverBuilder {
    type Driver: StoreDriver;

    /// Builds the driver.
    ///
    /// # Errors
    ///
    /// Returns an error if the builder is misconfigured.
    async fn build(self) -> NormResult<Self::Driver>;
}
