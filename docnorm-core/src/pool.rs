//! Connection pool caching one store handle per execution identity.
//!
//! Each (process, thread) pair gets its own [`ConnectionInstance`], opened on first
//! request and reused afterwards. Cached lookups only take the read side of the
//! pool's lock; the write side is held just long enough to insert a freshly opened
//! connection, never while connecting.
//!
//! One pool per process can be installed as the shared pool with
//! [`ConnectionPool::initialize`]; [`Document::save`](crate::document::Document::save)
//! goes through it.

use mea::rwlock::RwLock;
use once_cell::sync::OnceCell;
use std::{
    collections::HashMap,
    fmt,
    sync::Arc,
    thread::{self, ThreadId},
};

use crate::{
    backend::{ConnectionInstance, StoreDriver},
    config::ConnectionConfig,
    error::{NormError, NormResult},
};

static SHARED: OnceCell<Arc<ConnectionPool>> = OnceCell::new();

/// Key under which a pool caches a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExecutionIdentity {
    pub process: u32,
    pub thread: ThreadId,
}

impl ExecutionIdentity {
    /// Identity of the calling thread.
    pub fn current() -> Self {
        Self {
            process: std::process::id(),
            thread: thread::current().id(),
        }
    }
}

/// Process-scoped cache of store connections.
pub struct ConnectionPool {
    config: ConnectionConfig,
    driver: Arc<dyn StoreDriver>,
    entries: RwLock<HashMap<ExecutionIdentity, ConnectionInstance>>,
}

impl ConnectionPool {
    /// Creates a pool that opens connections through `driver`. Nothing is connected
    /// until the first handle is requested.
    pub fn new(config: ConnectionConfig, driver: Arc<dyn StoreDriver>) -> Self {
        Self {
            config,
            driver,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a pool from a connection URL.
    ///
    /// # Errors
    ///
    /// Returns [`NormError::Connection`] if the URL cannot be parsed.
    pub fn from_url(url: &str, driver: Arc<dyn StoreDriver>) -> NormResult<Self> {
        Ok(Self::new(ConnectionConfig::parse(url)?, driver))
    }

    /// Creates the process-wide shared pool.
    ///
    /// # Errors
    ///
    /// Returns [`NormError::Connection`] if the URL is invalid or a shared pool was
    /// already initialized.
    pub fn initialize(url: &str, driver: Arc<dyn StoreDriver>) -> NormResult<Arc<Self>> {
        Self::install(Self::from_url(url, driver)?)
    }

    /// Installs `pool` as the process-wide shared pool.
    ///
    /// # Errors
    ///
    /// Returns [`NormError::Connection`] if a shared pool is already installed.
    pub fn install(pool: ConnectionPool) -> NormResult<Arc<Self>> {
        let pool = Arc::new(pool);

        SHARED
            .set(Arc::clone(&pool))
            .map_err(|_| NormError::connection("a shared connection pool is already initialized"))?;

        tracing::info!(url = %pool.config, "initialized shared connection pool");

        Ok(pool)
    }

    /// Returns the process-wide shared pool.
    ///
    /// # Errors
    ///
    /// Returns [`NormError::Connection`] if no shared pool was initialized.
    pub fn shared() -> NormResult<Arc<Self>> {
        SHARED
            .get()
            .cloned()
            .ok_or_else(|| NormError::connection("an existing shared connection pool is not available"))
    }

    /// Identity of the calling thread, as used by [`handle`](Self::handle).
    pub fn identity() -> ExecutionIdentity {
        ExecutionIdentity::current()
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Returns the connection of the calling thread, opening it if needed or if
    /// `reconnect` is set.
    ///
    /// # Errors
    ///
    /// Returns [`NormError::Connection`] when connecting or authenticating fails.
    pub async fn handle(&self, reconnect: bool) -> NormResult<ConnectionInstance> {
        self.handle_for(Self::identity(), reconnect).await
    }

    /// Returns the connection cached for `identity`, opening it if needed or if
    /// `reconnect` is set.
    ///
    /// # Errors
    ///
    /// Returns [`NormError::Connection`] when connecting or authenticating fails.
    pub async fn handle_for(&self, identity: ExecutionIdentity, reconnect: bool) -> NormResult<ConnectionInstance> {
        if !reconnect {
            if let Some(instance) = self.entries.read().await.get(&identity) {
                tracing::debug!(?identity, "reusing pooled connection");
                return Ok(instance.clone());
            }
        }

        let instance = self.connect().await?;

        let mut entries = self.entries.write().await;
        if reconnect {
            if let Some(previous) = entries.insert(identity, instance.clone()) {
                drop(entries);
                shutdown(&previous).await;
            }
            return Ok(instance);
        }

        // Another task on this thread may have connected while we were connecting.
        if let Some(existing) = entries.get(&identity) {
            let existing = existing.clone();
            drop(entries);
            shutdown(&instance).await;
            return Ok(existing);
        }

        entries.insert(identity, instance.clone());

        Ok(instance)
    }

    async fn connect(&self) -> NormResult<ConnectionInstance> {
        tracing::info!(url = %self.config, "connecting to document store");

        let wrap = |err: NormError| match err {
            err @ NormError::Connection { .. } => err,
            other => NormError::connection_caused_by(format!("could not connect to {}", self.config), other),
        };

        let instance = self.driver.connect(&self.config).await.map_err(wrap)?;

        if let Some(credentials) = &self.config.credentials {
            if let Err(err) = instance.database.authenticate(credentials).await {
                shutdown(&instance).await;
                return Err(NormError::connection_caused_by(
                    format!("could not authenticate {} against {}", credentials.username, instance.database.name()),
                    err,
                ));
            }
        }

        Ok(instance)
    }

    /// Number of cached connections.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Closes and forgets every cached connection.
    pub async fn shutdown(&self) -> NormResult<()> {
        let entries = std::mem::take(&mut *self.entries.write().await);

        for instance in entries.values() {
            instance.connection.shutdown().await?;
        }

        Ok(())
    }
}

async fn shutdown(instance: &ConnectionInstance) {
    if let Err(err) = instance.connection.shutdown().await {
        tracing::warn!(error = %err, "failed to close replaced connection");
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.config)
            .field("driver", &self.driver)
            .finish_non_exhaustive()
    }
}
