//! Document instances: raw data owned by one schema, and their persistence.
//!
//! A [`Document`] holds the raw mapping that is written to the store. Typed access
//! goes through the schema's [`Field`](crate::field::Field) descriptors, either
//! directly or through the name-based helpers [`Document::get`], [`Document::set`]
//! and [`Document::delete`].
//!
//! # Example
//!
//! ```ignore
//! use docnorm::document::{Document, SaveOptions};
//!
//! let mut user = Document::construct(&user_schema, vec!["alice".into()], vec![])?;
//! user.set("email", "alice@example.com")?;
//!
//! let id = user.save(SaveOptions::new()).await?;
//! assert_eq!(user.primary_key(), Some(&id));
//! ```

use bson::{Bson, Document as BsonDocument, ser::serialize_to_bson};
use serde_json::Value;
use std::{
    collections::HashSet,
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

use crate::{
    error::{NormError, NormResult},
    field::{CLASS_KEY, ID_KEY},
    pool::ConnectionPool,
    schema::Schema,
};

/// Options of [`Document::save`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOptions {
    /// Wait for the store to acknowledge the write. `None` uses the schema default.
    pub safe: Option<bool>,
    /// Allow creating a new record.
    pub insert: bool,
    /// Allow replacing an existing record.
    pub update: bool,
    /// Validate the document before writing.
    pub validate: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            safe: None,
            insert: true,
            update: true,
            validate: true,
        }
    }
}

impl SaveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn safe(mut self, safe: bool) -> Self {
        self.safe = Some(safe);
        self
    }

    pub fn insert(mut self, insert: bool) -> Self {
        self.insert = insert;
        self
    }

    pub fn update(mut self, update: bool) -> Self {
        self.update = update;
        self
    }

    pub fn validate(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }
}

/// What a save has to do once the document passed its checks.
enum SavePlan {
    /// Nothing changed since the last save.
    Unchanged(Bson),
    Write { collection: String, safe: bool },
}

/// An instance of a schema.
#[derive(Clone)]
pub struct Document {
    schema: Arc<Schema>,
    data: BsonDocument,
    dirty: bool,
}

impl Document {
    /// An empty instance: every field reads as its default.
    pub fn new(schema: &Arc<Schema>) -> Self {
        Self {
            schema: Arc::clone(schema),
            data: BsonDocument::new(),
            dirty: false,
        }
    }

    /// Builds an instance from positional values, consumed in field order, and
    /// keyword values.
    ///
    /// # Errors
    ///
    /// Returns [`NormError::DuplicateArgument`] when a field is given both ways,
    /// [`NormError::InvalidArgument`] when there are more positional values than
    /// fields, and any error raised by the fields' `set`.
    pub fn construct(
        schema: &Arc<Schema>,
        positional: Vec<Bson>,
        keyword: Vec<(String, Bson)>,
    ) -> NormResult<Self> {
        let field_count = schema.fields().count();
        if positional.len() > field_count {
            return Err(NormError::InvalidArgument(format!(
                "{} takes at most {field_count} positional values, {} given",
                schema.name(),
                positional.len()
            )));
        }

        let positional_names = schema
            .field_names()
            .take(positional.len())
            .map(str::to_string)
            .collect::<Vec<_>>();
        let given = positional_names.iter().map(String::as_str).collect::<HashSet<_>>();
        if let Some((name, _)) = keyword.iter().find(|(name, _)| given.contains(name.as_str())) {
            return Err(NormError::DuplicateArgument(name.clone()));
        }

        let mut document = Self::new(schema);
        for (name, value) in positional_names.iter().zip(positional) {
            document.set(name, value)?;
        }
        for (name, value) in keyword {
            document.set(&name, value)?;
        }

        Ok(document)
    }

    /// Builds an instance from a JSON object keyed by attribute name.
    ///
    /// # Errors
    ///
    /// Returns [`NormError::Serialization`] for malformed JSON,
    /// [`NormError::InvalidArgument`] when the JSON is not an object, and any error
    /// raised by [`construct`](Self::construct).
    pub fn from_json(schema: &Arc<Schema>, json: &str) -> NormResult<Self> {
        let value: Value = serde_json::from_str(json)?;

        match serialize_to_bson(&value)? {
            Bson::Document(fields) => Self::construct(schema, Vec::new(), fields.into_iter().collect()),
            other => Err(NormError::InvalidArgument(format!(
                "{} expects a JSON object, got {other}",
                schema.name()
            ))),
        }
    }

    /// Wraps a stored record. The discriminator key, if present, is dropped.
    pub fn from_raw(schema: &Arc<Schema>, mut raw: BsonDocument) -> Self {
        raw.remove(CLASS_KEY);

        Self {
            schema: Arc::clone(schema),
            data: raw,
            dirty: false,
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// The raw mapping, keyed by storage key.
    pub fn raw(&self) -> &BsonDocument {
        &self.data
    }

    /// Mutable access to the raw mapping. Marks the document as modified.
    pub(crate) fn raw_mut(&mut self) -> &mut BsonDocument {
        self.dirty = true;
        &mut self.data
    }

    /// Reads a field by attribute name.
    ///
    /// # Errors
    ///
    /// Returns [`NormError::UnknownField`] for undeclared names, otherwise whatever
    /// [`Field::get`](crate::field::Field::get) returns.
    pub fn get(&self, name: &str) -> NormResult<Option<Bson>> {
        self.schema.field(name)?.get(self)
    }

    /// Writes a field by attribute name.
    ///
    /// # Errors
    ///
    /// Returns [`NormError::UnknownField`] for undeclared names, otherwise whatever
    /// [`Field::set`](crate::field::Field::set) returns.
    pub fn set(&mut self, name: &str, value: impl Into<Bson>) -> NormResult<()> {
        let schema = Arc::clone(&self.schema);
        schema.field(name)?.set(self, value)
    }

    /// Unsets a field by attribute name.
    ///
    /// # Errors
    ///
    /// Returns [`NormError::UnknownField`] for undeclared names and
    /// [`NormError::Validation`] for required fields.
    pub fn delete(&mut self, name: &str) -> NormResult<()> {
        let schema = Arc::clone(&self.schema);
        schema.field(name)?.delete(self)
    }

    /// Whether the schema declares a field named `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.schema.has_field(name)
    }

    /// Number of keys stored in the raw mapping.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Field names in schema order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.schema.field_names()
    }

    /// The stored primary key, if any.
    pub fn primary_key(&self) -> Option<&Bson> {
        self.data.get(ID_KEY).filter(|id| **id != Bson::Null)
    }

    /// Whether the document changed since it was loaded or last saved.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Checks every field in schema order and reports the first failure.
    ///
    /// # Errors
    ///
    /// Returns [`NormError::Validation`] naming the offending field, or
    /// [`NormError::Coercion`] when a stored value has the wrong type.
    pub fn validate(&self) -> NormResult<()> {
        self.schema.fields().try_for_each(|field| field.validate(self))
    }

    /// The record as persisted: the raw mapping plus the discriminator.
    pub fn to_raw(&self) -> BsonDocument {
        let mut raw = self.data.clone();
        raw.insert(CLASS_KEY, self.schema.identifier());
        raw
    }

    /// The persisted record rendered as relaxed extended JSON.
    pub fn to_json(&self) -> Value {
        Bson::Document(self.to_raw()).into_relaxed_extjson()
    }

    /// Reads an embedded field as a document of its schema.
    ///
    /// # Errors
    ///
    /// Returns [`NormError::UnknownField`] for undeclared names and
    /// [`NormError::InvalidArgument`] when the field does not embed a schema.
    pub fn embedded(&self, name: &str) -> NormResult<Option<Document>> {
        let field = self.schema.field(name)?;
        let schema = field
            .kind()
            .embedded_schema()
            .ok_or_else(|| NormError::InvalidArgument(format!("field {name} does not embed a document")))?;

        match field.get(self)? {
            Some(Bson::Document(raw)) => Ok(Some(Document::from_raw(schema, raw))),
            _ => Ok(None),
        }
    }

    /// Saves through the process-wide shared pool.
    ///
    /// Returns the primary key of the written record.
    ///
    /// # Errors
    ///
    /// See [`save_to`](Self::save_to); additionally returns [`NormError::Connection`]
    /// when no shared pool was initialized.
    pub async fn save(&mut self, options: SaveOptions) -> NormResult<Bson> {
        match self.plan(&options)? {
            SavePlan::Unchanged(id) => Ok(id),
            SavePlan::Write { collection, safe } => {
                let pool = ConnectionPool::shared()?;
                self.write(&pool, &collection, safe, options.update).await
            }
        }
    }

    /// Saves through `pool`.
    ///
    /// With `update` allowed the record is upserted by primary key, otherwise it is
    /// inserted. A document with a primary key and no changes since its last save is
    /// not written again. On success the primary key is stored on the document and it
    /// is marked clean.
    ///
    /// # Errors
    ///
    /// - [`NormError::InvalidArgument`] if neither `insert` nor `update` is allowed,
    ///   or `insert` is not allowed and the document has no primary key
    /// - [`NormError::Validation`] if validation is requested and fails
    /// - [`NormError::Schema`] for embed-only schemas
    /// - [`NormError::Connection`] if the pool cannot provide a connection
    /// - [`NormError::Operation`] if the store rejects the write
    pub async fn save_to(&mut self, pool: &ConnectionPool, options: SaveOptions) -> NormResult<Bson> {
        match self.plan(&options)? {
            SavePlan::Unchanged(id) => Ok(id),
            SavePlan::Write { collection, safe } => self.write(pool, &collection, safe, options.update).await,
        }
    }

    fn plan(&self, options: &SaveOptions) -> NormResult<SavePlan> {
        if !options.insert && !options.update {
            return Err(NormError::InvalidArgument(
                "save needs at least one of insert or update".into(),
            ));
        }
        if !options.insert && self.primary_key().is_none() {
            return Err(NormError::InvalidArgument(
                "cannot update a document without a primary key".into(),
            ));
        }

        if options.validate {
            self.validate()?;
        }

        let safe = options.safe.unwrap_or_else(|| self.schema.safe());

        if let (true, false, Some(id)) = (options.update, self.dirty, self.primary_key()) {
            tracing::debug!(schema = self.schema.identifier(), id = %id, "skipping save of unmodified document");
            return Ok(SavePlan::Unchanged(id.clone()));
        }

        let collection = self
            .schema
            .collection()
            .ok_or_else(|| NormError::schema(self.schema.identifier(), "embed-only documents cannot be saved"))?;

        Ok(SavePlan::Write {
            collection: collection.to_string(),
            safe,
        })
    }

    async fn write(&mut self, pool: &ConnectionPool, collection: &str, safe: bool, update: bool) -> NormResult<Bson> {
        let handle = pool.handle(false).await?.database.collection(collection);
        let record = self.to_raw();

        let written = if update {
            handle.upsert(record, safe).await
        } else {
            handle.insert(record, safe).await
        };

        let id = written.map_err(|err| {
            tracing::error!(collection, error = %err, "unable to save document");
            NormError::Operation {
                collection: collection.to_string(),
                source: Box::new(err),
            }
        })?;

        self.data.insert(ID_KEY, id.clone());
        self.dirty = false;

        Ok(id)
    }
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        match (self.primary_key(), other.primary_key()) {
            (Some(left), Some(right)) => {
                self.schema.collection() == other.schema.collection()
                    && self.schema.identifier_field() == other.schema.identifier_field()
                    && left == right
            }
            _ => std::ptr::eq(self, other),
        }
    }
}

impl Eq for Document {}

impl Hash for Document {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self.primary_key() {
            Some(id) => id.to_string().hash(state),
            None => std::ptr::hash(self, state),
        }
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.schema.name())?;
        for (i, field) in self.schema.fields().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match field.get(self) {
                Ok(Some(value)) => write!(f, "{}={value}", field.name())?,
                Ok(None) => write!(f, "{}=null", field.name())?,
                Err(_) => write!(f, "{}=<missing>", field.name())?,
            }
        }
        f.write_str(")")
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl From<Document> for Bson {
    fn from(document: Document) -> Self {
        Bson::Document(document.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{field::Field, registry::Registry, schema::Meta};
    use bson::doc;
    use std::collections::hash_map::DefaultHasher;

    fn people(registry: &Registry) -> Arc<Schema> {
        Schema::define("Person")
            .module("tests")
            .field("name", Field::text().required())
            .field("age", Field::integer().default(0))
            .field("nick", Field::text())
            .build_in(registry)
            .unwrap()
    }

    fn hash_of(document: &Document) -> u64 {
        let mut hasher = DefaultHasher::new();
        document.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_construct_positional_then_keyword() {
        let registry = Registry::new();
        let schema = people(&registry);

        let doc = Document::construct(
            &schema,
            vec!["Ann".into(), 31.into()],
            vec![("nick".into(), "annie".into())],
        )
        .unwrap();

        assert_eq!(doc.get("name").unwrap(), Some(Bson::String("Ann".into())));
        assert_eq!(doc.get("age").unwrap(), Some(Bson::Int64(31)));
        assert_eq!(doc.get("nick").unwrap(), Some(Bson::String("annie".into())));
        assert!(doc.is_dirty());
    }

    #[test]
    fn test_construct_rejects_duplicates_and_extras() {
        let registry = Registry::new();
        let schema = people(&registry);

        let err = Document::construct(&schema, vec!["Ann".into()], vec![("name".into(), "Bo".into())]).unwrap_err();
        assert!(matches!(err, NormError::DuplicateArgument(ref name) if name == "name"));

        let err = Document::construct(&schema, vec![Bson::Null; 4], vec![]).unwrap_err();
        assert!(matches!(err, NormError::InvalidArgument(_)));

        let err = Document::construct(&schema, vec![], vec![("unknown".into(), 1.into())]).unwrap_err();
        assert!(matches!(err, NormError::UnknownField(_)));
    }

    #[test]
    fn test_empty_construction_reads_defaults() {
        let registry = Registry::new();
        let schema = people(&registry);
        let doc = Document::construct(&schema, vec![], vec![]).unwrap();

        assert!(doc.is_empty());
        assert!(!doc.is_dirty());
        assert_eq!(doc.get("age").unwrap(), Some(Bson::Int64(0)));
        assert!(doc.contains("nick"));
        assert!(!doc.contains("other"));
        assert_eq!(doc.field_names().collect::<Vec<_>>(), vec!["name", "age", "nick"]);
    }

    #[test]
    fn test_validate_reports_first_failing_field() {
        let registry = Registry::new();
        let schema = people(&registry);
        let doc = Document::new(&schema);

        let err = doc.validate().unwrap_err();
        assert!(matches!(err, NormError::Validation { ref field, .. } if field == "name"));
    }

    #[test]
    fn test_validate_checks_embedded_documents() {
        let registry = Registry::new();
        let address = Schema::define("Address")
            .meta(Meta::new().embedded())
            .field("city", Field::text().required())
            .build_in(&registry)
            .unwrap();
        let customer = Schema::define("Customer")
            .field("address", Field::embed(&address))
            .build_in(&registry)
            .unwrap();

        let mut doc = Document::new(&customer);
        doc.set("address", Document::new(&address)).unwrap();
        let err = doc.validate().unwrap_err();
        assert!(matches!(err, NormError::Validation { ref field, .. } if field == "address.city"));

        let mut inner = Document::new(&address);
        inner.set("city", "Oslo").unwrap();
        doc.set("address", inner).unwrap();
        doc.validate().unwrap();

        let hydrated = doc.embedded("address").unwrap().unwrap();
        assert_eq!(hydrated.get("city").unwrap(), Some(Bson::String("Oslo".into())));
        assert!(doc.embedded("missing").is_err());
    }

    #[test]
    fn test_raw_layout_carries_discriminator() {
        let registry = Registry::new();
        let schema = people(&registry);
        let mut doc = Document::new(&schema);
        doc.set("name", "Ann").unwrap();

        let raw = doc.to_raw();
        assert_eq!(raw.get_str(CLASS_KEY).unwrap(), "tests.Person");
        assert_eq!(doc.to_json()["name"], "Ann");

        let back = Document::from_raw(&schema, raw);
        assert_eq!(back.raw(), doc.raw());
        assert!(!back.is_dirty());
    }

    #[test]
    fn test_from_json_sets_fields_by_name() {
        let registry = Registry::new();
        let schema = people(&registry);

        let doc = Document::from_json(&schema, r#"{"name": "Ann", "age": "41"}"#).unwrap();
        assert_eq!(doc.get("age").unwrap(), Some(Bson::Int64(41)));
        assert!(doc.is_dirty());

        let err = Document::from_json(&schema, "{not json").unwrap_err();
        assert!(matches!(err, NormError::Serialization(_)));

        let err = Document::from_json(&schema, "[1, 2]").unwrap_err();
        assert!(matches!(err, NormError::InvalidArgument(_)));

        let err = Document::from_json(&schema, r#"{"other": 1}"#).unwrap_err();
        assert!(matches!(err, NormError::UnknownField(_)));
    }

    #[test]
    fn test_equality_and_hash_follow_primary_key() {
        let registry = Registry::new();
        let schema = people(&registry);

        let a = Document::from_raw(&schema, doc! { "_id": 1, "name": "a" });
        let b = Document::from_raw(&schema, doc! { "_id": 1, "name": "b" });
        let c = Document::from_raw(&schema, doc! { "_id": 2, "name": "a" });
        let unsaved = Document::from_raw(&schema, doc! { "name": "a" });
        let unsaved_twin = unsaved.clone();

        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        assert_ne!(a, c);
        assert_eq!(unsaved, unsaved);
        assert_ne!(unsaved, unsaved_twin);
    }

    #[test]
    fn test_display_lists_fields_in_order() {
        let registry = Registry::new();
        let schema = people(&registry);
        let mut doc = Document::new(&schema);
        doc.set("name", "Ann").unwrap();

        let rendered = doc.to_string();
        assert!(rendered.starts_with("Person(name="), "{rendered}");
        assert!(rendered.contains("Ann"));
        assert!(rendered.ends_with(", nick=null)"), "{rendered}");
        assert_eq!(rendered, format!("{doc:?}"));
    }

    #[tokio::test]
    async fn test_invalid_save_arguments_fail_before_the_store() {
        let registry = Registry::new();
        let schema = people(&registry);
        let mut doc = Document::new(&schema);

        let err = doc
            .save(SaveOptions::new().insert(false).update(false))
            .await
            .unwrap_err();
        assert!(matches!(err, NormError::InvalidArgument(_)));
        assert!(err.is_validation());

        let err = doc.save(SaveOptions::new().insert(false)).await.unwrap_err();
        assert!(matches!(err, NormError::InvalidArgument(_)));
    }
}
