//! In-memory store driver for docnorm.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreDriver`
//! trait. It uses async-aware read-write locks for concurrent access and is meant for
//! development and testing.
//!
//! # Features
//!
//! - **Thread-safe access** - Every connection shares one async-aware RwLock'd state
//! - **Write concerns** - Unacknowledged writes swallow failures like a real store
//! - **Unique and capped collections** - Unique indexes are enforced, capped
//!   collections evict their oldest records
//! - **Fault injection** - Refused credentials, unreachable stores and rejected writes
//!
//! # Quick Start
//!
//! ```ignore
//! use docnorm::{document::{Document, SaveOptions}, field::Field, pool::ConnectionPool, schema::Schema};
//! use docnorm_memory::InMemoryDriver;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let driver = InMemoryDriver::new();
//!     let pool = ConnectionPool::from_url("memory://localhost/app", Arc::new(driver.clone()))?;
//!
//!     let user = Schema::define("User").field("name", Field::text()).build()?;
//!     let mut alice = Document::new(&user);
//!     alice.set("name", "Alice")?;
//!     alice.save_to(&pool, SaveOptions::new()).await?;
//!
//!     assert_eq!(driver.records("app", "users").await.len(), 1);
//!     Ok(())
//! }
//! ```

pub mod store;

pub use store::{InMemoryDriver, InMemoryDriverBuilder};
