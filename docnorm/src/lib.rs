//! Main docnorm crate: typed, inheritable document schemas mapped onto a document store.
//!
//! This crate is the primary entry point for users of docnorm. It re-exports the core
//! types from the sub-crates and gives access to the available store drivers.
//!
//! # Features
//!
//! - **Declarative schemas** - Fields with storage keys, defaults, validators and
//!   coercion, merged along an inheritance chain when the schema is built
//! - **Polymorphic records** - Every record carries its schema's identifier, so a
//!   record written by a derived schema is read back as that schema
//! - **Per-thread connections** - A process-wide pool keeps one connection for each
//!   (process, thread) pair
//! - **Multiple drivers** - In-memory and MongoDB stores behind one trait
//!
//! # Quick Start
//!
//! ```ignore
//! use docnorm::{prelude::*, memory::InMemoryDriver};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> NormResult<()> {
//!     ConnectionPool::initialize("memory://localhost/app", Arc::new(InMemoryDriver::new()))?;
//!
//!     let account = Schema::define("Account")
//!         .module("app")
//!         .meta(Meta::new().index(IndexSpec::new().asc("email").unique()))
//!         .field("email", Field::text().required())
//!         .field("logins", Field::integer().default(0))
//!         .build()?;
//!
//!     let mut alice = Document::new(&account);
//!     alice.set("email", "alice@example.com")?;
//!
//!     let id = alice.save(SaveOptions::new()).await?;
//!     println!("saved {alice} as {id}");
//!
//!     Ok(())
//! }
//! ```
//!
//! # Inheritance
//!
//! A schema extending another one shares its collection and inherits its fields and
//! metadata. Marking a schema `inheritable(false)` makes it a fresh root: its
//! descendants keep only what it declares itself and get their own collection.
//!
//! ```ignore
//! use docnorm::prelude::*;
//!
//! let credential = Schema::define("Credential")
//!     .meta(Meta::new().embedded())
//!     .build()?;
//!
//! let password = Schema::define("PasswordCredential")
//!     .extends(&credential)
//!     .field("__password", Field::text().key("p"))
//!     .field("difficulty", Field::float().key("d").default(0.5))
//!     .build()?;
//!
//! let user = Schema::define("User")
//!     .field("identity", Field::text().required())
//!     .field("credentials", Field::list(Embed::new(&password)))
//!     .build()?;
//!
//! assert_eq!(user.collection(), Some("users"));
//! assert_eq!(password.collection(), None);
//! ```
//!
//! # Loading
//!
//! Records are read back through the registry, which picks the concrete schema from
//! the record's discriminator.
//!
//! ```ignore
//! use docnorm::prelude::*;
//!
//! let pool = ConnectionPool::shared()?;
//! if let Some(doc) = base.load(&pool, Registry::global(), id).await? {
//!     println!("{} {}", doc.schema().identifier(), doc);
//! }
//! ```
//!
//! # Drivers
//!
//! - [`memory`] - In-memory store for development and testing
//! - [`mongodb`] - MongoDB store (requires `mongodb` feature)

pub mod prelude;

pub use docnorm_core::{backend, config, document, error, field, kind, pool, registry, schema};

// Re-export BSON types for convenience
pub use bson;

/// In-memory store driver.
pub mod memory {
    pub use docnorm_memory::{InMemoryDriver, InMemoryDriverBuilder};
}

/// MongoDB store driver.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docnorm_mongodb::{MongoDbDriver, MongoDbDriverBuilder};
}
