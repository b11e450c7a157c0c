//! MongoDB store driver for docnorm.
//!
//! This crate provides a MongoDB-based implementation of the `StoreDriver` trait,
//! persisting documents through the official async driver.
//!
//! To use this driver, include the `mongodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! docnorm = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Features
//!
//! - **Connection URL mapping** - Hosts, pool size, read preference, timeouts and
//!   credentials are taken from the docnorm connection URL
//! - **Write concerns** - Safe saves are acknowledged, unsafe saves are fire-and-forget
//! - **Indexes and capped collections** - Created from schema metadata
//! - **Key sanitization** - Dots and dollar signs in storage keys are escaped
//!
//! # Example
//!
//! ```ignore
//! use docnorm::{backend::StoreDriverBuilder, mongodb::MongoDbDriver, pool::ConnectionPool};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let driver = MongoDbDriver::builder().app_name("wiki").build().await?;
//!     ConnectionPool::initialize("mongodb://localhost/wiki", Arc::new(driver))?;
//!
//!     Ok(())
//! }
//! ```

pub mod store;
mod sanitizer;

pub use store::{MongoDbDriver, MongoDbDriverBuilder};
