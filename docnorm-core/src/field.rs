//! Field descriptors: typed get/set/delete of one named value in a document.
//!
//! A [`Field`] is declared on a schema under an attribute name and bound to a
//! storage key when the schema is built. All access to a document's raw data goes
//! through the descriptor, which applies defaults, required-ness, the optional
//! validator and transform, and the coercion of its [`FieldKind`].
//!
//! # Example
//!
//! ```ignore
//! use docnorm::field::Field;
//!
//! let age = Field::integer().key("a").default(0).validator(|v| v.as_i64().unwrap_or(0) >= 0);
//! let email = Field::text().required().unique();
//! ```

use bson::Bson;
use std::{fmt, sync::Arc};

use crate::{
    document::Document,
    error::{NormError, NormResult},
    kind::{Boolean, DateTime, Embed, FieldKind, FieldKindRef, Float, Generic, Integer, IpAddress, List, Text},
    schema::Schema,
};

/// Storage key reserved for the primary key of every persisted record.
pub const ID_KEY: &str = "_id";

/// Storage key reserved for the discriminator of every persisted record.
pub const CLASS_KEY: &str = "_cls";

type Factory = Arc<dyn Fn() -> Bson + Send + Sync>;
type Derived = Arc<dyn Fn(&Document) -> Bson + Send + Sync>;
type Transform = Arc<dyn Fn(Bson) -> Bson + Send + Sync>;
type Validator = Arc<dyn Fn(&Bson) -> bool + Send + Sync>;

/// The value a field reads as when nothing is stored under its key.
#[derive(Clone)]
pub enum FieldDefault {
    /// A literal value. Setting the field to this value removes its key.
    Value(Bson),
    /// A zero-argument producer, invoked on every read of an unset field.
    Factory(Factory),
    /// A producer receiving the owning document.
    Derived(Derived),
}

impl FieldDefault {
    fn produce(&self, document: &Document) -> Bson {
        match self {
            FieldDefault::Value(value) => value.clone(),
            FieldDefault::Factory(factory) => factory(),
            FieldDefault::Derived(derived) => derived(document),
        }
    }
}

impl fmt::Debug for FieldDefault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldDefault::Value(value) => f.debug_tuple("Value").field(value).finish(),
            FieldDefault::Factory(_) => f.write_str("Factory(..)"),
            FieldDefault::Derived(_) => f.write_str("Derived(..)"),
        }
    }
}

/// Descriptor for one typed attribute of a schema.
#[derive(Clone)]
pub struct Field {
    name: String,
    key: Option<String>,
    kind: FieldKindRef,
    required: bool,
    unique: bool,
    primary: bool,
    default: Option<FieldDefault>,
    transform: Option<Transform>,
    validator: Option<Validator>,
}

impl Field {
    /// Creates an optional field of the given kind with no default.
    pub fn new(kind: impl FieldKind + 'static) -> Self {
        Self {
            name: String::new(),
            key: None,
            kind: Arc::new(kind),
            required: false,
            unique: false,
            primary: false,
            default: None,
            transform: None,
            validator: None,
        }
    }

    pub fn generic() -> Self {
        Self::new(Generic)
    }

    pub fn text() -> Self {
        Self::new(Text)
    }

    pub fn integer() -> Self {
        Self::new(Integer)
    }

    pub fn float() -> Self {
        Self::new(Float)
    }

    pub fn boolean() -> Self {
        Self::new(Boolean)
    }

    pub fn datetime() -> Self {
        Self::new(DateTime)
    }

    pub fn ip_address() -> Self {
        Self::new(IpAddress)
    }

    /// An array field whose members are coerced by `element`.
    pub fn list(element: impl FieldKind + 'static) -> Self {
        Self::new(List::new(element))
    }

    /// A nested document of `schema`, stored inline.
    pub fn embed(schema: &Arc<Schema>) -> Self {
        Self::new(Embed::new(schema))
    }

    /// Stores the field under an explicit key instead of its normalized name.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Marks the field as the primary key; it is stored under [`ID_KEY`].
    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    pub fn default(mut self, value: impl Into<Bson>) -> Self {
        self.default = Some(FieldDefault::Value(value.into()));
        self
    }

    pub fn default_with<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Bson + Send + Sync + 'static,
    {
        self.default = Some(FieldDefault::Factory(Arc::new(factory)));
        self
    }

    pub fn default_from<F>(mut self, derived: F) -> Self
    where
        F: Fn(&Document) -> Bson + Send + Sync + 'static,
    {
        self.default = Some(FieldDefault::Derived(Arc::new(derived)));
        self
    }

    /// Applied to every value on `set`, before the kind encodes it.
    pub fn transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(Bson) -> Bson + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(transform));
        self
    }

    /// Predicate on the decoded value, checked on `set` (after `transform`) and on
    /// validation, so both see the same representation.
    pub fn validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Bson) -> bool + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Attribute name the field was declared under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Storage key inside the document's raw data.
    ///
    /// Always set on fields obtained from a built [`Schema`].
    pub fn storage_key(&self) -> &str {
        self.key.as_deref().unwrap_or(&self.name)
    }

    pub(crate) fn explicit_key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn kind(&self) -> &dyn FieldKind {
        self.kind.as_ref()
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    pub fn is_primary(&self) -> bool {
        self.primary
    }

    pub fn default_value(&self) -> Option<&FieldDefault> {
        self.default.as_ref()
    }

    /// Binds the declaration to its attribute name and resolved storage key.
    pub(crate) fn bind(&self, name: &str, key: String) -> Self {
        Self {
            name: name.to_string(),
            key: Some(key),
            ..self.clone()
        }
    }

    /// Reads the field from `document`.
    ///
    /// Returns the decoded stored value, else the decoded default, else `None` for
    /// optional fields. A stored or produced `null` counts as unset.
    ///
    /// # Errors
    ///
    /// Returns [`NormError::MissingData`] for a required field with nothing stored and
    /// no default, or [`NormError::Coercion`] when the stored value cannot be decoded.
    pub fn get(&self, document: &Document) -> NormResult<Option<Bson>> {
        match document.raw().get(self.storage_key()) {
            Some(stored) if *stored != Bson::Null => self.kind.decode(&self.name, stored).map(Some),
            _ => match self.default.as_ref().map(|default| default.produce(document)) {
                Some(produced) if produced != Bson::Null => self.kind.decode(&self.name, &produced).map(Some),
                _ if !self.required => Ok(None),
                _ => Err(NormError::MissingData(self.name.clone())),
            },
        }
    }

    fn same_stored_form(&self, left: &Bson, right: &Bson) -> bool {
        left == right
            || matches!(
                (self.kind.encode(&self.name, left.clone()), self.kind.encode(&self.name, right.clone())),
                (Ok(a), Ok(b)) if a == b
            )
    }

    /// Writes `value` into `document`.
    ///
    /// A value equal to the literal default, or `null` on an optional field, removes
    /// the storage key instead of storing it.
    ///
    /// # Errors
    ///
    /// Returns [`NormError::Validation`] when a required field is set to `null` or the
    /// validator rejects the value, and [`NormError::Coercion`] when the kind cannot
    /// encode it.
    pub fn set(&self, document: &mut Document, value: impl Into<Bson>) -> NormResult<()> {
        let value = value.into();

        if let Some(FieldDefault::Value(default)) = &self.default {
            if self.same_stored_form(default, &value) {
                document.raw_mut().remove(self.storage_key());
                return Ok(());
            }
        }

        if value == Bson::Null {
            if self.required {
                return Err(NormError::validation(&self.name, "required field cannot be set to null"));
            }

            document.raw_mut().remove(self.storage_key());
            return Ok(());
        }

        let value = match &self.transform {
            Some(transform) => transform(value),
            None => value,
        };
        let stored = self.kind.encode(&self.name, value)?;

        if let Some(validator) = &self.validator {
            let decoded = self.kind.decode(&self.name, &stored)?;
            if !validator(&decoded) {
                return Err(NormError::validation(&self.name, format!("value {decoded} rejected by validator")));
            }
        }

        document
            .raw_mut()
            .insert(self.storage_key().to_string(), stored);

        Ok(())
    }

    /// Removes the field's value from `document`.
    ///
    /// # Errors
    ///
    /// Returns [`NormError::Validation`] for required fields, which cannot be unset.
    pub fn delete(&self, document: &mut Document) -> NormResult<()> {
        if self.required {
            return Err(NormError::validation(&self.name, "required field cannot be deleted"));
        }

        document.raw_mut().remove(self.storage_key());

        Ok(())
    }

    /// Checks the current value of the field in `document` against its constraints.
    pub(crate) fn validate(&self, document: &Document) -> NormResult<()> {
        let value = match self.get(document) {
            Ok(Some(value)) => value,
            Ok(None) => return Ok(()),
            Err(NormError::MissingData(_)) => {
                return Err(NormError::validation(&self.name, "required field is missing"));
            }
            Err(err) => return Err(err),
        };

        if let Some(stored) = document.raw().get(self.storage_key()) {
            self.kind.check(&self.name, stored)?;
        }

        match &self.validator {
            Some(validator) if !validator(&value) => Err(NormError::validation(
                &self.name,
                format!("value {value} rejected by validator"),
            )),
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("key", &self.key)
            .field("kind", &self.kind.name())
            .field("required", &self.required)
            .field("unique", &self.unique)
            .field("primary", &self.primary)
            .field("default", &self.default)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{registry::Registry, schema::Schema};

    fn schema(fields: Vec<(&str, Field)>) -> Arc<Schema> {
        let registry = Registry::new();
        fields
            .into_iter()
            .fold(Schema::define("Sample").module("tests"), |def, (name, field)| def.field(name, field))
            .build_in(&registry)
            .unwrap()
    }

    #[test]
    fn test_get_falls_back_to_default_then_absence() {
        let schema = schema(vec![
            ("count", Field::integer().default(5)),
            ("label", Field::text()),
        ]);
        let doc = Document::new(&schema);

        assert_eq!(schema.field("count").unwrap().get(&doc).unwrap(), Some(Bson::Int64(5)));
        assert_eq!(schema.field("label").unwrap().get(&doc).unwrap(), None);
    }

    #[test]
    fn test_get_required_without_default_is_missing_data() {
        let schema = schema(vec![("name", Field::text().required())]);
        let doc = Document::new(&schema);

        let err = schema.field("name").unwrap().get(&doc).unwrap_err();
        assert!(matches!(err, NormError::MissingData(ref field) if field == "name"));
    }

    #[test]
    fn test_default_producers() {
        let schema = schema(vec![
            ("stamp", Field::integer().default_with(|| Bson::Int64(99))),
            ("echo", Field::text().default_from(|doc| Bson::String(doc.schema().name().to_string()))),
        ]);
        let doc = Document::new(&schema);

        assert_eq!(doc.get("stamp").unwrap(), Some(Bson::Int64(99)));
        assert_eq!(doc.get("echo").unwrap(), Some(Bson::String("Sample".into())));
    }

    #[test]
    fn test_setting_the_default_removes_the_key() {
        let schema = schema(vec![("count", Field::integer().key("c").default(5))]);
        let mut doc = Document::new(&schema);

        doc.set("count", 7).unwrap();
        assert_eq!(doc.raw().get("c"), Some(&Bson::Int64(7)));

        doc.set("count", 5).unwrap();
        assert!(!doc.raw().contains_key("c"));
        assert_eq!(doc.get("count").unwrap(), Some(Bson::Int64(5)));
    }

    #[test]
    fn test_set_rejects_null_on_required_and_validator_failures() {
        let schema = schema(vec![
            ("name", Field::text().required()),
            ("age", Field::integer().validator(|v| v.as_i64().is_some_and(|n| n >= 0))),
        ]);
        let mut doc = Document::new(&schema);

        let err = doc.set("name", Bson::Null).unwrap_err();
        assert!(matches!(err, NormError::Validation { ref field, .. } if field == "name"));

        let err = doc.set("age", -1).unwrap_err();
        assert!(matches!(err, NormError::Validation { ref field, .. } if field == "age"));
        assert!(doc.raw().is_empty());

        // Validators see the decoded value, whatever form the caller supplied.
        doc.set("age", 5).unwrap();
        doc.set("age", "6").unwrap();
        assert_eq!(doc.get("age").unwrap(), Some(Bson::Int64(6)));
    }

    #[test]
    fn test_transform_runs_before_encoding() {
        let schema = schema(vec![(
            "email",
            Field::text().transform(|v| match v {
                Bson::String(s) => Bson::String(s.to_lowercase()),
                other => other,
            }),
        )]);
        let mut doc = Document::new(&schema);

        doc.set("email", "Alice@Example.COM").unwrap();
        assert_eq!(doc.raw().get_str("email").unwrap(), "alice@example.com");
    }

    #[test]
    fn test_delete() {
        let schema = schema(vec![
            ("name", Field::text().required()),
            ("nick", Field::text()),
        ]);
        let mut doc = Document::new(&schema);
        doc.set("name", "x").unwrap();
        doc.set("nick", "y").unwrap();

        assert!(doc.delete("name").is_err());
        doc.delete("nick").unwrap();
        assert!(!doc.raw().contains_key("nick"));
        assert_eq!(doc.raw().get_str("name").unwrap(), "x");
    }

    #[test]
    fn test_stored_value_is_decoded_on_read() {
        let schema = schema(vec![("count", Field::integer())]);
        let mut raw = bson::Document::new();
        raw.insert("count", "12");
        let doc = Document::from_raw(&schema, raw);

        assert_eq!(doc.get("count").unwrap(), Some(Bson::Int64(12)));
    }
}
