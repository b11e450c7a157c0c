//! Typed, inheritable document schemas mapped onto a document store.
//!
//! This crate is the core of the docnorm project and provides:
//!
//! - **Field descriptors** ([`field`]) - Typed get/set/delete of one value in a document
//! - **Field kinds** ([`kind`]) - The coercion step of each field type
//! - **Schemas** ([`schema`]) - Definitions merged across an inheritance chain at build time
//! - **Registry** ([`registry`]) - Lookup of schemas by name, identifier and collection
//! - **Documents** ([`document`]) - Instances of a schema, with validation and persistence
//! - **Connection pool** ([`pool`]) - One store connection per (process, thread)
//! - **Configuration** ([`config`]) - Connection settings parsed from a URL
//! - **Store drivers** ([`backend`]) - Traits for implementing different document stores
//! - **Error handling** ([`error`]) - Error and result types
//!
//! # Example
//!
//! ```ignore
//! use docnorm::{document::Document, field::Field, schema::Schema};
//!
//! let user = Schema::define("User")
//!     .module("app")
//!     .field("name", Field::text().required())
//!     .field("logins", Field::integer().default(0))
//!     .build()?;
//!
//! let mut alice = Document::new(&user);
//! alice.set("name", "Alice")?;
//! assert_eq!(alice.get("logins")?, Some(0i64.into()));
//! ```

pub mod backend;
pub mod config;
pub mod document;
pub mod error;
pub mod field;
pub mod kind;
pub mod pool;
pub mod registry;
pub mod schema;
