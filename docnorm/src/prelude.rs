//! Convenient re-exports of commonly used types from docnorm.
//!
//! ```ignore
//! use docnorm::prelude::*;
//! ```
//!
//! This provides access to:
//! - Schema definition, fields and field kinds
//! - Documents and save options
//! - The registry and the connection pool
//! - Store driver traits and error types

pub use docnorm_core::{
    backend::{CollectionHandle, ConnectionInstance, DatabaseHandle, StoreConnection, StoreDriver, StoreDriverBuilder},
    config::{ConnectionConfig, Credentials},
    document::{Document, SaveOptions},
    error::{NormError, NormResult},
    field::{CLASS_KEY, Field, FieldDefault, ID_KEY},
    kind::{Boolean, DateTime, Embed, FieldKind, Float, Generic, Integer, IpAddress, List, Text},
    pool::{ConnectionPool, ExecutionIdentity},
    registry::Registry,
    schema::{CappedLimit, CollectionRule, IndexSpec, Meta, Schema, SchemaDef, SortDirection},
};
