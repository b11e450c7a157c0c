//! Schema definitions and the builder that freezes them.
//!
//! A schema is declared with [`Schema::define`], which returns a [`SchemaDef`]
//! collecting bases, metadata and fields. Building the definition runs the merge
//! exactly once: inherited fields and metadata are combined along the base chain,
//! the collection name is resolved, storage keys are assigned, and the frozen
//! [`Schema`] is registered in a [`Registry`].
//!
//! # Inheritance
//!
//! - Fields of bases come first, in base order, followed by the schema's own fields
//!   in declaration order. Redeclaring an inherited field name replaces the
//!   inherited entry in place.
//! - Metadata of bases is merged base-to-derived; `index` lists are concatenated.
//! - A base declaring `inheritable(false)` starts a fresh schema root: nothing
//!   declared above it reaches its descendants, and the descendants get their own
//!   collection.
//!
//! # Example
//!
//! ```ignore
//! use docnorm::{field::Field, schema::{Meta, Schema, IndexSpec}};
//!
//! let account = Schema::define("Account")
//!     .module("app.models")
//!     .meta(Meta::new().index(IndexSpec::new().asc("email").unique()))
//!     .field("email", Field::text().required())
//!     .build()?;
//!
//! let admin = Schema::define("Admin")
//!     .module("app.models")
//!     .extends(&account)
//!     .field("level", Field::integer().default(1))
//!     .build()?;
//!
//! assert_eq!(admin.collection(), Some("accounts"));
//! ```

use bson::Bson;
use heck::ToSnakeCase;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, fmt, sync::Arc};

use crate::{
    document::Document,
    error::{NormError, NormResult},
    field::{CLASS_KEY, Field, ID_KEY},
    pool::ConnectionPool,
    registry::Registry,
};

const ROOT_NAME: &str = "Document";
const ROOT_MODULE: &str = "docnorm";

/// Direction of a sort or index key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    /// The numeric form document stores use in key specifications.
    pub fn as_i32(self) -> i32 {
        match self {
            SortDirection::Asc => 1,
            SortDirection::Desc => -1,
        }
    }
}

/// An index to maintain on a schema's collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub keys: Vec<(String, SortDirection)>,
    pub unique: bool,
}

impl IndexSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn asc(mut self, key: impl Into<String>) -> Self {
        self.keys.push((key.into(), SortDirection::Asc));
        self
    }

    pub fn desc(mut self, key: impl Into<String>) -> Self {
        self.keys.push((key.into(), SortDirection::Desc));
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Index name following the `key_direction` convention of document stores.
    pub fn name(&self) -> String {
        self.keys
            .iter()
            .map(|(key, direction)| format!("{key}_{}", direction.as_i32()))
            .collect::<Vec<_>>()
            .join("_")
    }
}

/// Size limits of a capped collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CappedLimit {
    /// Maximum size in bytes.
    pub size: u64,
    /// Maximum number of records, if bounded.
    pub count: Option<u64>,
}

/// How a schema's collection name is chosen when it is not inherited.
#[derive(Clone)]
pub enum CollectionRule {
    /// An explicit collection name.
    Named(String),
    /// No collection: the schema is only ever embedded in other documents.
    Embedded,
    /// Computed from the schema's type name.
    Derived(Arc<dyn Fn(&str) -> String + Send + Sync>),
}

impl CollectionRule {
    /// The default rule: snake_case the type name and pluralize it.
    pub fn pluralized() -> Self {
        CollectionRule::Derived(Arc::new(|name| {
            pluralizer::pluralize(&name.to_snake_case(), 2, false)
        }))
    }

    fn resolve(&self, type_name: &str) -> Option<String> {
        match self {
            CollectionRule::Named(name) => Some(name.clone()),
            CollectionRule::Embedded => None,
            CollectionRule::Derived(derive) => Some(derive(type_name)),
        }
    }
}

impl fmt::Debug for CollectionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionRule::Named(name) => f.debug_tuple("Named").field(name).finish(),
            CollectionRule::Embedded => f.write_str("Embedded"),
            CollectionRule::Derived(_) => f.write_str("Derived(..)"),
        }
    }
}

/// A metadata bunch. Unset entries inherit from bases; `index` entries accumulate.
#[derive(Debug, Clone, Default)]
pub struct Meta {
    collection: Option<CollectionRule>,
    index: Vec<IndexSpec>,
    order: Option<Vec<(String, SortDirection)>>,
    inheritable: Option<bool>,
    capped: Option<CappedLimit>,
    safe: Option<bool>,
    identifier: Option<String>,
}

impl Meta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist into the named collection.
    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.collection = Some(CollectionRule::Named(name.into()));
        self
    }

    /// Never persist on its own; only embed.
    pub fn embedded(mut self) -> Self {
        self.collection = Some(CollectionRule::Embedded);
        self
    }

    /// Derive the collection name from the type name.
    pub fn collection_with<F>(mut self, derive: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.collection = Some(CollectionRule::Derived(Arc::new(derive)));
        self
    }

    pub fn index(mut self, index: IndexSpec) -> Self {
        self.index.push(index);
        self
    }

    pub fn order(mut self, order: Vec<(String, SortDirection)>) -> Self {
        self.order = Some(order);
        self
    }

    pub fn inheritable(mut self, inheritable: bool) -> Self {
        self.inheritable = Some(inheritable);
        self
    }

    pub fn capped(mut self, limit: CappedLimit) -> Self {
        self.capped = Some(limit);
        self
    }

    pub fn safe(mut self, safe: bool) -> Self {
        self.safe = Some(safe);
        self
    }

    /// Name of the primary-key field.
    pub fn identifier(mut self, field: impl Into<String>) -> Self {
        self.identifier = Some(field.into());
        self
    }

    fn root() -> Self {
        Self {
            collection: Some(CollectionRule::pluralized()),
            index: Vec::new(),
            order: Some(Vec::new()),
            inheritable: Some(true),
            capped: None,
            safe: Some(true),
            identifier: Some(ID_KEY.to_string()),
        }
    }

    /// Layers `other` on top of `self`, appending its index list.
    fn merge(&mut self, other: &Meta) {
        if let Some(collection) = &other.collection {
            self.collection = Some(collection.clone());
        }
        self.index.extend(other.index.iter().cloned());
        if let Some(order) = &other.order {
            self.order = Some(order.clone());
        }
        if let Some(inheritable) = other.inheritable {
            self.inheritable = Some(inheritable);
        }
        if let Some(capped) = other.capped {
            self.capped = Some(capped);
        }
        if let Some(safe) = other.safe {
            self.safe = Some(safe);
        }
        if let Some(identifier) = &other.identifier {
            self.identifier = Some(identifier.clone());
        }
    }

    /// What a non-inheritable schema passes on: everything except its collection
    /// choice and the inheritable flag itself.
    fn detached(&self) -> Self {
        Self {
            collection: None,
            inheritable: None,
            ..self.clone()
        }
    }
}

/// A frozen schema: ordered fields, merged metadata and registry identity.
pub struct Schema {
    name: String,
    module: String,
    identifier: String,
    collection: Option<String>,
    meta: Meta,
    own_meta: Meta,
    fields: Vec<Field>,
    own_fields: Vec<String>,
    ancestors: Vec<String>,
    flat: bool,
    root: bool,
}

static ROOT: Lazy<Arc<Schema>> = Lazy::new(|| {
    Arc::new(Schema {
        name: ROOT_NAME.to_string(),
        module: ROOT_MODULE.to_string(),
        identifier: format!("{ROOT_MODULE}.{ROOT_NAME}"),
        collection: None,
        meta: Meta::root(),
        own_meta: Meta::root(),
        fields: Vec::new(),
        own_fields: Vec::new(),
        ancestors: Vec::new(),
        flat: true,
        root: true,
    })
});

impl Schema {
    /// Starts the definition of a schema named `name`.
    pub fn define(name: impl Into<String>) -> SchemaDef {
        SchemaDef::new(name)
    }

    /// The root schema every definition implicitly extends. It is never registered.
    pub fn root() -> Arc<Schema> {
        Arc::clone(&ROOT)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    /// Qualified identifier stored in the discriminator of persisted records.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Resolved collection name, `None` for embed-only schemas.
    pub fn collection(&self) -> Option<&str> {
        self.collection.as_deref()
    }

    pub fn is_root(&self) -> bool {
        self.root
    }

    /// True when no user-defined schema sits between this one and the root.
    pub fn is_flat(&self) -> bool {
        self.flat
    }

    /// Identifiers of the inherited schemas that share this schema's collection,
    /// base-most first.
    pub fn ancestors(&self) -> &[String] {
        &self.ancestors
    }

    /// Dotted inheritance path, e.g. `app.Account.Admin`.
    pub fn path(&self) -> String {
        self.ancestors
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(self.identifier.as_str()))
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Fields in their frozen order.
    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(Field::name)
    }

    /// Looks up a field by attribute name.
    ///
    /// # Errors
    ///
    /// Returns [`NormError::UnknownField`] when the schema declares no such field.
    pub fn field(&self, name: &str) -> NormResult<&Field> {
        self.fields
            .iter()
            .find(|field| field.name() == name)
            .ok_or_else(|| NormError::UnknownField(name.to_string()))
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|field| field.name() == name)
    }

    /// Index specifications, inherited entries first.
    pub fn indexes(&self) -> &[IndexSpec] {
        &self.meta.index
    }

    /// Default sort order.
    pub fn order(&self) -> &[(String, SortDirection)] {
        self.meta.order.as_deref().unwrap_or_default()
    }

    pub fn inheritable(&self) -> bool {
        self.meta.inheritable.unwrap_or(true)
    }

    pub fn capped(&self) -> Option<CappedLimit> {
        self.meta.capped
    }

    /// Whether writes are acknowledged unless `save` says otherwise.
    pub fn safe(&self) -> bool {
        self.meta.safe.unwrap_or(true)
    }

    /// Name of the primary-key field.
    pub fn identifier_field(&self) -> &str {
        self.meta.identifier.as_deref().unwrap_or(ID_KEY)
    }

    /// An empty instance of this schema.
    pub fn instance(self: &Arc<Self>) -> Document {
        Document::new(self)
    }

    /// Creates the collection (capped when configured) and every declared index,
    /// plus a unique index for each unique field.
    ///
    /// # Errors
    ///
    /// Returns [`NormError::Schema`] for embed-only schemas, and wraps store
    /// failures in [`NormError::Operation`].
    pub async fn ensure_collection(&self, pool: &ConnectionPool) -> NormResult<()> {
        let name = self
            .collection()
            .ok_or_else(|| NormError::schema(&self.identifier, "embed-only schemas have no collection"))?;
        let database = pool.handle(false).await?.database;

        let operation = |source: NormError| NormError::Operation {
            collection: name.to_string(),
            source: Box::new(source),
        };

        database
            .create_collection(name, self.capped())
            .await
            .map_err(operation)?;

        let collection = database.collection(name);
        let unique_fields = self
            .fields
            .iter()
            .filter(|field| field.is_unique())
            .map(|field| IndexSpec::new().asc(field.storage_key()).unique());

        for index in self.indexes().iter().cloned().chain(unique_fields) {
            tracing::debug!(collection = name, index = %index.name(), "ensuring index");
            collection.create_index(&index).await.map_err(operation)?;
        }

        Ok(())
    }

    /// Loads the record with primary key `id` from this schema's collection.
    ///
    /// The concrete schema is picked through `registry` from the record's
    /// discriminator, so a record written by a derived schema comes back as that
    /// schema.
    ///
    /// # Errors
    ///
    /// Returns [`NormError::Schema`] for embed-only schemas and wraps store failures
    /// in [`NormError::Operation`].
    pub async fn load(
        self: &Arc<Self>,
        pool: &ConnectionPool,
        registry: &Registry,
        id: impl Into<Bson>,
    ) -> NormResult<Option<Document>> {
        let name = self
            .collection()
            .ok_or_else(|| NormError::schema(&self.identifier, "embed-only schemas have no collection"))?;
        let record = pool
            .handle(false)
            .await?
            .database
            .collection(name)
            .find_one(&id.into())
            .await
            .map_err(|source| NormError::Operation {
                collection: name.to_string(),
                source: Box::new(source),
            })?;

        match record {
            Some(raw) if raw.contains_key(CLASS_KEY) => registry.resolve_record(raw, Some(name)).map(Some),
            Some(raw) => Ok(Some(Document::from_raw(self, raw))),
            None => Ok(None),
        }
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("identifier", &self.identifier)
            .field("collection", &self.collection)
            .field("fields", &self.fields)
            .field("flat", &self.flat)
            .finish_non_exhaustive()
    }
}

/// Declaration of a schema, consumed by [`SchemaDef::build`].
pub struct SchemaDef {
    name: String,
    module: String,
    identifier: Option<String>,
    bases: Vec<Arc<Schema>>,
    meta: Meta,
    fields: Vec<(String, Field)>,
}

impl SchemaDef {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module: String::new(),
            identifier: None,
            bases: Vec::new(),
            meta: Meta::new(),
            fields: Vec::new(),
        }
    }

    /// Module path used to derive the qualified identifier (`module.Name`).
    pub fn module(mut self, module: impl Into<String>) -> Self {
        self.module = module.into();
        self
    }

    /// Overrides the qualified identifier.
    pub fn identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    /// Adds a base schema. Bases are merged in the order they are added.
    pub fn extends(mut self, base: &Arc<Schema>) -> Self {
        self.bases.push(Arc::clone(base));
        self
    }

    /// Layers metadata on the definition; repeated calls merge.
    pub fn meta(mut self, meta: Meta) -> Self {
        self.meta.merge(&meta);
        self
    }

    /// Declares a field. Declaration order is the frozen order.
    pub fn field(mut self, name: impl Into<String>, field: Field) -> Self {
        self.fields.push((name.into(), field));
        self
    }

    /// Builds the schema and registers it in the process-wide registry.
    pub fn build(self) -> NormResult<Arc<Schema>> {
        self.build_in(Registry::global())
    }

    /// Builds the schema and registers it in `registry`.
    ///
    /// # Errors
    ///
    /// Returns [`NormError::Schema`] for inconsistent declarations (duplicate storage
    /// keys, reserved keys, several primary fields) and
    /// [`NormError::RegistrationConflict`] when a registry key is already taken.
    pub fn build_in(self, registry: &Registry) -> NormResult<Arc<Schema>> {
        let schema = Arc::new(SchemaBuilder::new(&self.name).build(self)?);

        if !schema.is_root() && schema.identifier != ROOT.identifier {
            registry.register(&schema)?;
        }

        Ok(schema)
    }
}

/// Running state of one schema merge.
struct SchemaBuilder {
    schema: String,
    fields: Vec<Field>,
    meta: Meta,
    /// Identifiers of the inherited schemas, base-most first.
    ancestors: Vec<String>,
    /// Collection of the nearest inherited schema, once one was merged.
    inherited_collection: Option<Option<String>>,
    flat: bool,
}

impl SchemaBuilder {
    fn new(schema: &str) -> Self {
        Self {
            schema: schema.to_string(),
            fields: Vec::new(),
            meta: Meta::new(),
            ancestors: Vec::new(),
            inherited_collection: None,
            flat: true,
        }
    }

    fn build(mut self, def: SchemaDef) -> NormResult<Schema> {
        let bases = if def.bases.is_empty() {
            vec![Schema::root()]
        } else {
            def.bases
        };

        for base in &bases {
            self.inherit(base)?;
        }

        self.meta.merge(&def.meta);

        let collection = match &def.meta.collection {
            Some(rule) => rule.resolve(&def.name),
            None => match self.inherited_collection.take() {
                Some(collection) => collection,
                None => self
                    .meta
                    .collection
                    .clone()
                    .unwrap_or_else(CollectionRule::pluralized)
                    .resolve(&def.name),
            },
        };

        let mut own_fields = Vec::with_capacity(def.fields.len());
        for (name, field) in &def.fields {
            let key = self.storage_key(name, field)?;
            self.place(field.bind(name, key))?;
            own_fields.push(name.clone());
        }

        let primary = self
            .fields
            .iter()
            .filter(|field| field.is_primary())
            .map(Field::name)
            .collect::<Vec<_>>();
        match primary.as_slice() {
            [] => {}
            [name] if def.meta.identifier.is_none() => self.meta.identifier = Some(name.to_string()),
            [_] => {}
            _ => {
                return Err(NormError::schema(
                    &self.schema,
                    format!("several primary fields: {}", primary.join(", ")),
                ));
            }
        }

        let identifier = def.identifier.unwrap_or_else(|| {
            if def.module.is_empty() {
                def.name.clone()
            } else {
                format!("{}.{}", def.module, def.name)
            }
        });

        tracing::debug!(
            schema = %identifier,
            collection = ?collection,
            fields = self.fields.len(),
            flat = self.flat,
            "built schema"
        );

        Ok(Schema {
            name: def.name,
            module: def.module,
            identifier,
            collection,
            own_meta: def.meta,
            meta: self.meta,
            fields: self.fields,
            own_fields,
            ancestors: self.ancestors,
            flat: self.flat,
            root: false,
        })
    }

    fn inherit(&mut self, base: &Arc<Schema>) -> NormResult<()> {
        if base.inheritable() {
            for field in &base.fields {
                self.place(field.clone())?;
            }
            self.meta.merge(&base.meta);

            if !base.root {
                self.flat = false;
                for identifier in base.ancestors.iter().chain(std::iter::once(&base.identifier)) {
                    if !self.ancestors.contains(identifier) {
                        self.ancestors.push(identifier.clone());
                    }
                }
                self.inherited_collection = Some(base.collection.clone());
            }

            return Ok(());
        }

        // A non-inheritable base is a fresh root for its descendants.
        for name in &base.own_fields {
            self.place(base.field(name)?.clone())?;
        }
        self.meta = Meta::root();
        self.meta.merge(&base.own_meta.detached());
        self.ancestors.clear();
        self.inherited_collection = None;
        self.flat = true;

        Ok(())
    }

    fn storage_key(&self, name: &str, field: &Field) -> NormResult<String> {
        let key = match (field.explicit_key(), field.is_primary()) {
            (Some(key), true) if key != ID_KEY => {
                return Err(NormError::schema(
                    &self.schema,
                    format!("primary field {name} must be stored under {ID_KEY}, not {key}"),
                ));
            }
            (Some(key), _) => key.to_string(),
            (None, true) => ID_KEY.to_string(),
            (None, false) => name.trim_start_matches('_').to_snake_case(),
        };

        if key.is_empty() {
            return Err(NormError::schema(&self.schema, format!("field {name:?} has an empty storage key")));
        }
        if key == CLASS_KEY {
            return Err(NormError::schema(&self.schema, format!("{CLASS_KEY} is reserved for the discriminator")));
        }

        Ok(key)
    }

    /// Appends `field`, or replaces an earlier field of the same name in place.
    fn place(&mut self, field: Field) -> NormResult<()> {
        let taken = self
            .fields
            .iter()
            .filter(|existing| existing.name() != field.name())
            .map(Field::storage_key)
            .collect::<HashSet<_>>();

        if taken.contains(field.storage_key()) {
            return Err(NormError::schema(
                &self.schema,
                format!("storage key {} of field {} is already used", field.storage_key(), field.name()),
            ));
        }

        match self.fields.iter_mut().find(|existing| existing.name() == field.name()) {
            Some(existing) => *existing = field,
            None => self.fields.push(field),
        }

        Ok(())
    }
}
