//! In-memory store driver.
//!
//! Records are kept as BSON documents in HashMaps behind async-safe read-write
//! locks, grouped by database and collection and keyed by their primary key.

use async_trait::async_trait;
use bson::{Bson, Document, oid::ObjectId};
use mea::rwlock::RwLock;
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use docnorm_core::{
    backend::{CollectionHandle, ConnectionInstance, DatabaseHandle, StoreConnection, StoreDriver, StoreDriverBuilder},
    config::{ConnectionConfig, Credentials},
    error::{NormError, NormResult},
    field::ID_KEY,
    schema::{CappedLimit, IndexSpec},
};

#[derive(Debug, Default)]
struct StoredCollection {
    records: HashMap<String, Document>,
    /// Primary keys in insertion order, for capped eviction.
    order: VecDeque<String>,
    indexes: Vec<IndexSpec>,
    capped: Option<CappedLimit>,
}

impl StoredCollection {
    fn violates_unique(&self, key: &str, record: &Document) -> Option<String> {
        self.indexes.iter().filter(|index| index.unique).find_map(|index| {
            let values = |doc: &Document| {
                index
                    .keys
                    .iter()
                    .map(|(field, _)| doc.get(field).cloned().unwrap_or(Bson::Null))
                    .collect::<Vec<_>>()
            };
            let incoming = values(record);

            self.records
                .iter()
                .filter(|(existing, _)| existing.as_str() != key)
                .any(|(_, other)| values(other) == incoming)
                .then(|| index.name())
        })
    }

    fn store(&mut self, key: String, record: Document) {
        if self.records.insert(key.clone(), record).is_none() {
            self.order.push_back(key);
        }

        if let Some(limit) = self.capped.and_then(|capped| capped.count) {
            while self.order.len() as u64 > limit {
                if let Some(oldest) = self.order.pop_front() {
                    self.records.remove(&oldest);
                }
            }
        }
    }
}

type DatabaseMap = HashMap<String, StoredCollection>;

#[derive(Debug, Default)]
struct SharedState {
    databases: RwLock<HashMap<String, DatabaseMap>>,
    users: HashMap<String, String>,
    rejected: RwLock<HashSet<String>>,
    unreachable: AtomicBool,
    connections: AtomicUsize,
    writes: AtomicUsize,
}

/// Thread-safe in-memory store driver.
///
/// `InMemoryDriver` is cloneable and uses an `Arc`-wrapped internal state: every
/// connection it opens, from any thread, sees the same data.
///
/// # Example
///
/// ```ignore
/// use docnorm_memory::InMemoryDriver;
/// use docnorm::pool::ConnectionPool;
/// use std::sync::Arc;
///
/// let driver = InMemoryDriver::new();
/// let pool = ConnectionPool::from_url("memory://localhost/app", Arc::new(driver.clone()))?;
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryDriver {
    state: Arc<SharedState>,
}

impl InMemoryDriver {
    /// Creates a driver with no users and no data.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> InMemoryDriverBuilder {
        InMemoryDriverBuilder::default()
    }

    /// Makes subsequent connection attempts fail.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Makes the store refuse every write to `collection`.
    pub async fn reject_writes(&self, collection: &str) {
        self.state.rejected.write().await.insert(collection.to_string());
    }

    /// Number of connections opened so far.
    pub fn connection_count(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Number of writes the store accepted.
    pub fn write_count(&self) -> usize {
        self.state.writes.load(Ordering::SeqCst)
    }

    /// Records of a collection in insertion order.
    pub async fn records(&self, database: &str, collection: &str) -> Vec<Document> {
        let databases = self.state.databases.read().await;

        databases
            .get(database)
            .and_then(|collections| collections.get(collection))
            .map(|stored| {
                stored
                    .order
                    .iter()
                    .filter_map(|key| stored.records.get(key).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Indexes created on a collection.
    pub async fn indexes(&self, database: &str, collection: &str) -> Vec<IndexSpec> {
        let databases = self.state.databases.read().await;

        databases
            .get(database)
            .and_then(|collections| collections.get(collection))
            .map(|stored| stored.indexes.clone())
            .unwrap_or_default()
    }

    /// Whether a collection exists, and its capped limit if any.
    pub async fn collection_info(&self, database: &str, collection: &str) -> Option<Option<CappedLimit>> {
        let databases = self.state.databases.read().await;

        databases
            .get(database)
            .and_then(|collections| collections.get(collection))
            .map(|stored| stored.capped)
    }
}

#[async_trait]
impl StoreDriver for InMemoryDriver {
    async fn connect(&self, config: &ConnectionConfig) -> NormResult<ConnectionInstance> {
        if self.state.unreachable.load(Ordering::SeqCst) {
            return Err(NormError::Driver(format!(
                "no store reachable at {}",
                config.addresses().collect::<Vec<_>>().join(",")
            )));
        }

        self.state.connections.fetch_add(1, Ordering::SeqCst);

        Ok(ConnectionInstance::new(
            Arc::new(InMemoryConnection),
            Arc::new(InMemoryDatabase {
                name: config.database.clone(),
                state: Arc::clone(&self.state),
            }),
        ))
    }
}

#[derive(Debug)]
struct InMemoryConnection;

#[async_trait]
impl StoreConnection for InMemoryConnection {
    async fn shutdown(&self) -> NormResult<()> {
        tracing::debug!("closed in-memory connection");
        Ok(())
    }
}

#[derive(Debug)]
struct InMemoryDatabase {
    name: String,
    state: Arc<SharedState>,
}

#[async_trait]
impl DatabaseHandle for InMemoryDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    async fn authenticate(&self, credentials: &Credentials) -> NormResult<()> {
        match self.state.users.get(&credentials.username) {
            Some(password) if *password == credentials.password => Ok(()),
            _ => Err(NormError::Driver(format!(
                "authentication failed for {} on {}",
                credentials.username, self.name
            ))),
        }
    }

    fn collection(&self, name: &str) -> Box<dyn CollectionHandle> {
        Box::new(InMemoryCollection {
            database: self.name.clone(),
            name: name.to_string(),
            state: Arc::clone(&self.state),
        })
    }

    async fn create_collection(&self, name: &str, capped: Option<CappedLimit>) -> NormResult<()> {
        let mut databases = self.state.databases.write().await;
        let stored = databases
            .entry(self.name.clone())
            .or_default()
            .entry(name.to_string())
            .or_default();

        if stored.capped.is_none() {
            stored.capped = capped;
        }

        Ok(())
    }
}

#[derive(Debug)]
struct InMemoryCollection {
    database: String,
    name: String,
    state: Arc<SharedState>,
}

impl InMemoryCollection {
    async fn write(&self, mut record: Document, safe: bool, replace: bool) -> NormResult<Bson> {
        let id = match record.get(ID_KEY) {
            Some(id) if *id != Bson::Null => id.clone(),
            _ => {
                let id = Bson::ObjectId(ObjectId::new());
                record.insert(ID_KEY, id.clone());
                id
            }
        };

        match self.apply(&id, record, replace).await {
            Ok(()) => {
                self.state.writes.fetch_add(1, Ordering::SeqCst);
                Ok(id)
            }
            Err(err) if !safe => {
                tracing::warn!(collection = %self.name, error = %err, "unacknowledged write failed");
                Ok(id)
            }
            Err(err) => Err(err),
        }
    }

    async fn apply(&self, id: &Bson, record: Document, replace: bool) -> NormResult<()> {
        if self.state.rejected.read().await.contains(&self.name) {
            return Err(NormError::Driver(format!("collection {} refuses writes", self.name)));
        }

        let key = id.to_string();
        let mut databases = self.state.databases.write().await;
        let stored = databases
            .entry(self.database.clone())
            .or_default()
            .entry(self.name.clone())
            .or_default();

        if !replace && stored.records.contains_key(&key) {
            return Err(NormError::Driver(format!(
                "duplicate key {key} in collection {}",
                self.name
            )));
        }
        if let Some(index) = stored.violates_unique(&key, &record) {
            return Err(NormError::Driver(format!(
                "duplicate key for unique index {index} in collection {}",
                self.name
            )));
        }

        stored.store(key, record);

        Ok(())
    }
}

#[async_trait]
impl CollectionHandle for InMemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn upsert(&self, record: Document, safe: bool) -> NormResult<Bson> {
        self.write(record, safe, true).await
    }

    async fn insert(&self, record: Document, safe: bool) -> NormResult<Bson> {
        self.write(record, safe, false).await
    }

    async fn find_one(&self, id: &Bson) -> NormResult<Option<Document>> {
        let databases = self.state.databases.read().await;

        Ok(databases
            .get(&self.database)
            .and_then(|collections| collections.get(&self.name))
            .and_then(|stored| stored.records.get(&id.to_string()))
            .cloned())
    }

    async fn create_index(&self, index: &IndexSpec) -> NormResult<()> {
        let mut databases = self.state.databases.write().await;
        let stored = databases
            .entry(self.database.clone())
            .or_default()
            .entry(self.name.clone())
            .or_default();

        if !stored.indexes.iter().any(|existing| existing.name() == index.name()) {
            stored.indexes.push(index.clone());
        }

        Ok(())
    }
}

/// Builder for constructing [`InMemoryDriver`] instances.
///
/// # Example
///
/// ```ignore
/// use docnorm_memory::InMemoryDriver;
/// use docnorm::backend::StoreDriverBuilder;
///
/// let driver = InMemoryDriver::builder().user("admin", "secret").build().await?;
/// ```
#[derive(Default)]
pub struct InMemoryDriverBuilder {
    users: HashMap<String, String>,
    unreachable: bool,
}

impl InMemoryDriverBuilder {
    /// Adds a user accepted by `authenticate`.
    pub fn user(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.users.insert(username.into(), password.into());
        self
    }

    /// Starts the driver unreachable.
    pub fn unreachable(mut self, unreachable: bool) -> Self {
        self.unreachable = unreachable;
        self
    }
}

#[async_trait]
impl StoreDriverBuilder for InMemoryDriverBuilder {
    type Driver = InMemoryDriver;

    async fn build(self) -> NormResult<Self::Driver> {
        Ok(InMemoryDriver {
            state: Arc::new(SharedState {
                users: self.users,
                unreachable: AtomicBool::new(self.unreachable),
                ..SharedState::default()
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    async fn database(driver: &InMemoryDriver) -> Arc<dyn DatabaseHandle> {
        let config = ConnectionConfig::parse("memory://localhost/app").unwrap();
        driver.connect(&config).await.unwrap().database
    }

    #[tokio::test]
    async fn test_insert_assigns_an_object_id() {
        let driver = InMemoryDriver::new();
        let users = database(&driver).await.collection("users");

        let id = users.insert(doc! { "name": "Ann" }, true).await.unwrap();

        assert!(matches!(id, Bson::ObjectId(_)));
        let stored = users.find_one(&id).await.unwrap().unwrap();
        assert_eq!(stored.get_str("name").unwrap(), "Ann");
        assert_eq!(driver.write_count(), 1);
    }

    #[tokio::test]
    async fn test_insert_refuses_existing_key_but_upsert_replaces() {
        let driver = InMemoryDriver::new();
        let users = database(&driver).await.collection("users");

        users.insert(doc! { "_id": 1, "v": 1 }, true).await.unwrap();
        assert!(users.insert(doc! { "_id": 1, "v": 2 }, true).await.is_err());

        users.upsert(doc! { "_id": 1, "v": 3 }, true).await.unwrap();
        let records = driver.records("app", "users").await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get_i32("v").unwrap(), 3);
    }

    #[tokio::test]
    async fn test_unsafe_write_failures_are_swallowed() {
        let driver = InMemoryDriver::new();
        driver.reject_writes("logs").await;
        let logs = database(&driver).await.collection("logs");

        assert!(logs.insert(doc! { "m": "x" }, true).await.is_err());
        let id = logs.insert(doc! { "m": "y" }, false).await.unwrap();

        assert!(logs.find_one(&id).await.unwrap().is_none());
        assert_eq!(driver.write_count(), 0);
    }

    #[tokio::test]
    async fn test_unique_index_is_enforced() {
        let driver = InMemoryDriver::new();
        let users = database(&driver).await.collection("users");

        users.create_index(&IndexSpec::new().asc("email").unique()).await.unwrap();
        users.create_index(&IndexSpec::new().asc("email").unique()).await.unwrap();
        assert_eq!(driver.indexes("app", "users").await.len(), 1);

        users.insert(doc! { "_id": 1, "email": "a@x" }, true).await.unwrap();
        users.upsert(doc! { "_id": 1, "email": "a@x", "n": 2 }, true).await.unwrap();
        assert!(users.insert(doc! { "_id": 2, "email": "a@x" }, true).await.is_err());
    }

    #[tokio::test]
    async fn test_capped_collection_evicts_oldest() {
        let driver = InMemoryDriver::new();
        let db = database(&driver).await;
        db.create_collection("events", Some(CappedLimit { size: 4096, count: Some(2) }))
            .await
            .unwrap();
        let events = db.collection("events");

        for n in 1..=3 {
            events.insert(doc! { "_id": n }, true).await.unwrap();
        }

        let ids = driver
            .records("app", "events")
            .await
            .iter()
            .map(|record| record.get_i32("_id").unwrap())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(
            driver.collection_info("app", "events").await,
            Some(Some(CappedLimit { size: 4096, count: Some(2) }))
        );
    }

    #[tokio::test]
    async fn test_authentication_and_reachability() {
        let driver = InMemoryDriver::builder().user("bob", "right").build().await.unwrap();
        let db = database(&driver).await;

        let good = Credentials {
            username: "bob".into(),
            password: "right".into(),
        };
        let bad = Credentials {
            username: "bob".into(),
            password: "wrong".into(),
        };
        db.authenticate(&good).await.unwrap();
        assert!(db.authenticate(&bad).await.is_err());

        driver.set_unreachable(true);
        let config = ConnectionConfig::parse("memory://localhost/app").unwrap();
        assert!(driver.connect(&config).await.is_err());
        assert_eq!(driver.connection_count(), 1);
    }
}
