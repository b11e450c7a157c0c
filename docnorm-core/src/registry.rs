//! Registry mapping schema names, identifiers and collections back to schemas.
//!
//! Every built schema is registered under its type name and its qualified
//! identifier; flat schemas with a collection are also registered under the
//! collection name. Stored records carry the identifier in their discriminator, so
//! the registry can pick the concrete schema when a record is read back.

use bson::{Bson, Document as BsonDocument};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::{collections::HashMap, sync::Arc};

use crate::{
    document::Document,
    error::{NormError, NormResult},
    field::CLASS_KEY,
    schema::Schema,
};

static GLOBAL: Lazy<Registry> = Lazy::new(Registry::new);

/// Which index of the registry a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistryKey<'a> {
    Name(&'a str),
    Identifier(&'a str),
    Collection(&'a str),
}

impl<'a> RegistryKey<'a> {
    /// Which index the key belongs to: `name`, `identifier` or `collection`.
    pub fn kind(&self) -> &'static str {
        match self {
            RegistryKey::Name(_) => "name",
            RegistryKey::Identifier(_) => "identifier",
            RegistryKey::Collection(_) => "collection",
        }
    }

    pub fn key(&self) -> &'a str {
        match *self {
            RegistryKey::Name(key) | RegistryKey::Identifier(key) | RegistryKey::Collection(key) => key,
        }
    }
}

#[derive(Debug, Default)]
struct RegistryIndex {
    by_name: HashMap<String, Arc<Schema>>,
    by_identifier: HashMap<String, Arc<Schema>>,
    by_collection: HashMap<String, Arc<Schema>>,
    order: Vec<Arc<Schema>>,
}

impl RegistryIndex {
    fn table<'s, 'k>(&'s self, key: RegistryKey<'k>) -> (&'s HashMap<String, Arc<Schema>>, &'k str) {
        match key {
            RegistryKey::Name(key) => (&self.by_name, key),
            RegistryKey::Identifier(key) => (&self.by_identifier, key),
            RegistryKey::Collection(key) => (&self.by_collection, key),
        }
    }

    fn table_mut(&mut self, key: RegistryKey<'_>) -> &mut HashMap<String, Arc<Schema>> {
        match key {
            RegistryKey::Name(_) => &mut self.by_name,
            RegistryKey::Identifier(_) => &mut self.by_identifier,
            RegistryKey::Collection(_) => &mut self.by_collection,
        }
    }

    fn lookup(&self, key: RegistryKey<'_>) -> Option<&Arc<Schema>> {
        let (table, key) = self.table(key);
        table.get(key)
    }

    fn check(&self, key: RegistryKey<'_>, schema: &Arc<Schema>) -> NormResult<()> {
        match self.lookup(key) {
            Some(existing) if !Arc::ptr_eq(existing, schema) => Err(NormError::RegistrationConflict {
                kind: key.kind(),
                key: key.key().to_string(),
                existing: existing.identifier().to_string(),
                incoming: schema.identifier().to_string(),
            }),
            _ => Ok(()),
        }
    }
}

/// Table of schemas with lookup by name, identifier and collection.
#[derive(Debug, Default)]
pub struct Registry {
    index: RwLock<RegistryIndex>,
}

impl Registry {
    /// Creates an empty registry, independent of the process-wide one.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry that [`SchemaDef::build`](crate::schema::SchemaDef::build)
    /// registers into.
    pub fn global() -> &'static Registry {
        &GLOBAL
    }

    /// Registers `schema` under its name, its identifier and, for flat schemas with
    /// a collection, the collection name.
    ///
    /// Either every key is bound or none is. Registering the same schema again is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns [`NormError::RegistrationConflict`] if a different schema already holds
    /// one of the keys.
    pub fn register(&self, schema: &Arc<Schema>) -> NormResult<()> {
        let mut keys = vec![
            RegistryKey::Name(schema.name()),
            RegistryKey::Identifier(schema.identifier()),
        ];
        if let (true, Some(collection)) = (schema.is_flat(), schema.collection()) {
            keys.push(RegistryKey::Collection(collection));
        }

        let mut index = self.index.write();

        for key in &keys {
            index.check(*key, schema)?;
        }

        if index.lookup(RegistryKey::Identifier(schema.identifier())).is_none() {
            index.order.push(Arc::clone(schema));
        }
        for key in keys {
            index.table_mut(key).insert(key.key().to_string(), Arc::clone(schema));
        }

        tracing::debug!(schema = schema.identifier(), collection = ?schema.collection(), "registered schema");

        Ok(())
    }

    /// Binds a single key to `schema`.
    ///
    /// # Errors
    ///
    /// Returns [`NormError::RegistrationConflict`] if a different schema holds the key.
    pub fn register_key(&self, key: RegistryKey<'_>, schema: &Arc<Schema>) -> NormResult<()> {
        let mut index = self.index.write();

        index.check(key, schema)?;

        index.table_mut(key).insert(key.key().to_string(), Arc::clone(schema));

        Ok(())
    }

    /// Resolves `key` by trying identifiers, then names, then collections.
    pub fn resolve(&self, key: &str) -> Option<Arc<Schema>> {
        let index = self.index.read();

        [
            RegistryKey::Identifier(key),
            RegistryKey::Name(key),
            RegistryKey::Collection(key),
        ]
        .into_iter()
        .find_map(|key| index.lookup(key).cloned())
    }

    pub fn resolve_key(&self, key: RegistryKey<'_>) -> Option<Arc<Schema>> {
        self.index.read().lookup(key).cloned()
    }

    pub fn resolve_name(&self, name: &str) -> Option<Arc<Schema>> {
        self.resolve_key(RegistryKey::Name(name))
    }

    pub fn resolve_identifier(&self, identifier: &str) -> Option<Arc<Schema>> {
        self.resolve_key(RegistryKey::Identifier(identifier))
    }

    pub fn resolve_collection(&self, collection: &str) -> Option<Arc<Schema>> {
        self.resolve_key(RegistryKey::Collection(collection))
    }

    /// Registered schemas in registration order.
    pub fn schemas(&self) -> Vec<Arc<Schema>> {
        self.index.read().order.clone()
    }

    /// Rebuilds a document from a stored record.
    ///
    /// The schema is picked from the record's discriminator (an identifier, a name,
    /// or a dotted inheritance path whose last segment is the identifier), falling
    /// back to the schema registered for `collection`.
    ///
    /// # Errors
    ///
    /// Returns [`NormError::Schema`] when no registered schema matches.
    pub fn resolve_record(&self, raw: BsonDocument, collection: Option<&str>) -> NormResult<Document> {
        let by_discriminator = match raw.get(CLASS_KEY) {
            Some(Bson::String(tag)) => self.resolve_discriminator(tag),
            _ => None,
        };

        let schema = by_discriminator
            .or_else(|| collection.and_then(|name| self.resolve_collection(name)))
            .ok_or_else(|| {
                NormError::schema(
                    raw.get_str(CLASS_KEY).unwrap_or("<untagged>"),
                    format!("no registered schema for record in {}", collection.unwrap_or("<unknown collection>")),
                )
            })?;

        Ok(Document::from_raw(&schema, raw))
    }

    fn resolve_discriminator(&self, tag: &str) -> Option<Arc<Schema>> {
        self.resolve_identifier(tag)
            .or_else(|| self.resolve_name(tag))
            .or_else(|| {
                let index = self.index.read();
                index
                    .order
                    .iter()
                    .filter(|schema| tag.ends_with(schema.identifier()))
                    .find(|schema| schema.path() == tag)
                    .cloned()
            })
    }
}
