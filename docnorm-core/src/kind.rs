//! Field kinds: the coercion step of a field descriptor.
//!
//! A kind converts between the representation kept in a document's raw data
//! (`encode` on write) and the logical value handed back to callers (`decode` on
//! read). Everything else about a field (defaults, required-ness, validators)
//! lives in [`Field`](crate::field::Field), so each kind only describes its
//! conversion.
//!
//! Kinds in this module:
//!
//! - [`Generic`] - stores values as given
//! - [`Text`], [`Integer`], [`Float`], [`Boolean`] - scalar coercions
//! - [`DateTime`] - BSON datetimes from RFC 3339 strings or millisecond timestamps
//! - [`IpAddress`] - canonical text form of an IPv4/IPv6 address
//! - [`List`] - arrays whose members are coerced by an element kind
//! - [`Embed`] - nested documents of another schema

use bson::{Bson, DateTime as BsonDateTime, spec::BinarySubtype};
use std::{
    fmt::{self, Debug},
    net::IpAddr,
    sync::Arc,
};

use crate::{
    document::Document,
    error::{NormError, NormResult},
    schema::Schema,
};

/// The conversion contract of a field.
///
/// `decode(encode(v))` must equal `encode(v)` for every value the kind accepts, so
/// a value read back from storage compares equal to the value that was written.
pub trait FieldKind: Send + Sync + Debug {
    /// Short name used in error messages and debug output.
    fn name(&self) -> &'static str;

    /// Converts a stored value into the logical value returned by reads.
    ///
    /// # Errors
    ///
    /// Returns [`NormError::Coercion`] when the stored value cannot be interpreted.
    fn decode(&self, field: &str, stored: &Bson) -> NormResult<Bson>;

    /// Converts a value supplied by the caller into its stored representation.
    ///
    /// # Errors
    ///
    /// Returns [`NormError::Coercion`] when the value is not acceptable for this kind.
    fn encode(&self, field: &str, value: Bson) -> NormResult<Bson>;

    /// Checks a stored value during document validation.
    ///
    /// The default only requires the value to decode; compound kinds also validate
    /// their members.
    fn check(&self, field: &str, stored: &Bson) -> NormResult<()> {
        self.decode(field, stored).map(|_| ())
    }

    /// The schema of values held by this kind, for kinds that nest documents.
    fn embedded_schema(&self) -> Option<&Arc<Schema>> {
        None
    }
}

/// Shared handle to a field kind.
pub type FieldKindRef = Arc<dyn FieldKind>;

fn unexpected(field: &str, kind: &str, value: &Bson) -> NormError {
    NormError::coercion(
        field,
        format!("{kind} field cannot hold a value of type {:?}", value.element_type()),
    )
}

/// Stores values exactly as given.
#[derive(Debug, Clone, Copy, Default)]
pub struct Generic;

impl FieldKind for Generic {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn decode(&self, _field: &str, stored: &Bson) -> NormResult<Bson> {
        Ok(stored.clone())
    }

    fn encode(&self, _field: &str, value: Bson) -> NormResult<Bson> {
        Ok(value)
    }
}

/// UTF-8 text. Scalars are rendered as text, binary payloads are decoded as UTF-8.
#[derive(Debug, Clone, Copy, Default)]
pub struct Text;

impl Text {
    fn coerce(&self, field: &str, value: &Bson) -> NormResult<Bson> {
        match value {
            Bson::String(s) => Ok(Bson::String(s.clone())),
            Bson::Int32(i) => Ok(Bson::String(i.to_string())),
            Bson::Int64(i) => Ok(Bson::String(i.to_string())),
            Bson::Double(f) => Ok(Bson::String(f.to_string())),
            Bson::Boolean(b) => Ok(Bson::String(b.to_string())),
            Bson::Binary(binary) if binary.subtype == BinarySubtype::Generic => {
                String::from_utf8(binary.bytes.clone())
                    .map(Bson::String)
                    .map_err(|e| NormError::coercion(field, e.to_string()))
            }
            other => Err(unexpected(field, self.name(), other)),
        }
    }
}

impl FieldKind for Text {
    fn name(&self) -> &'static str {
        "text"
    }

    fn decode(&self, field: &str, stored: &Bson) -> NormResult<Bson> {
        self.coerce(field, stored)
    }

    fn encode(&self, field: &str, value: Bson) -> NormResult<Bson> {
        self.coerce(field, &value)
    }
}

/// 64-bit signed integers. Accepts integral numbers and numeric strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct Integer;

impl Integer {
    fn coerce(&self, field: &str, value: &Bson) -> NormResult<Bson> {
        match value {
            Bson::Int32(i) => Ok(Bson::Int64(i64::from(*i))),
            Bson::Int64(i) => Ok(Bson::Int64(*i)),
            Bson::Double(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                Ok(Bson::Int64(*f as i64))
            }
            Bson::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Bson::Int64)
                .map_err(|e| NormError::coercion(field, format!("{s:?} is not an integer: {e}"))),
            other => Err(unexpected(field, self.name(), other)),
        }
    }
}

impl FieldKind for Integer {
    fn name(&self) -> &'static str {
        "integer"
    }

    fn decode(&self, field: &str, stored: &Bson) -> NormResult<Bson> {
        self.coerce(field, stored)
    }

    fn encode(&self, field: &str, value: Bson) -> NormResult<Bson> {
        self.coerce(field, &value)
    }
}

/// Double precision floats. Accepts any number and numeric strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct Float;

impl Float {
    fn coerce(&self, field: &str, value: &Bson) -> NormResult<Bson> {
        match value {
            Bson::Double(f) => Ok(Bson::Double(*f)),
            Bson::Int32(i) => Ok(Bson::Double(f64::from(*i))),
            Bson::Int64(i) => Ok(Bson::Double(*i as f64)),
            Bson::String(s) => s
                .trim()
                .parse::<f64>()
                .map(Bson::Double)
                .map_err(|e| NormError::coercion(field, format!("{s:?} is not a number: {e}"))),
            other => Err(unexpected(field, self.name(), other)),
        }
    }
}

impl FieldKind for Float {
    fn name(&self) -> &'static str {
        "float"
    }

    fn decode(&self, field: &str, stored: &Bson) -> NormResult<Bson> {
        self.coerce(field, stored)
    }

    fn encode(&self, field: &str, value: Bson) -> NormResult<Bson> {
        self.coerce(field, &value)
    }
}

/// Parses the textual boolean forms accepted in field values and connection URLs.
pub(crate) fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "y" | "t" | "1" => Some(true),
        "false" | "no" | "off" | "n" | "f" | "0" => Some(false),
        _ => None,
    }
}

/// Booleans. Accepts `0`/`1` and the usual textual forms (`yes`, `off`, ...).
#[derive(Debug, Clone, Copy, Default)]
pub struct Boolean;

impl Boolean {
    fn coerce(&self, field: &str, value: &Bson) -> NormResult<Bson> {
        match value {
            Bson::Boolean(b) => Ok(Bson::Boolean(*b)),
            Bson::Int32(0) | Bson::Int64(0) => Ok(Bson::Boolean(false)),
            Bson::Int32(1) | Bson::Int64(1) => Ok(Bson::Boolean(true)),
            Bson::String(s) => parse_flag(s)
                .map(Bson::Boolean)
                .ok_or_else(|| NormError::coercion(field, format!("{s:?} is not a boolean"))),
            other => Err(unexpected(field, self.name(), other)),
        }
    }
}

impl FieldKind for Boolean {
    fn name(&self) -> &'static str {
        "boolean"
    }

    fn decode(&self, field: &str, stored: &Bson) -> NormResult<Bson> {
        self.coerce(field, stored)
    }

    fn encode(&self, field: &str, value: Bson) -> NormResult<Bson> {
        self.coerce(field, &value)
    }
}

/// UTC datetimes with millisecond precision.
///
/// Accepts BSON datetimes, RFC 3339 strings and millisecond timestamps.
#[derive(Debug, Clone, Copy, Default)]
pub struct DateTime;

impl DateTime {
    fn coerce(&self, field: &str, value: &Bson) -> NormResult<Bson> {
        match value {
            Bson::DateTime(dt) => Ok(Bson::DateTime(*dt)),
            Bson::Int64(millis) => Ok(Bson::DateTime(BsonDateTime::from_millis(*millis))),
            Bson::String(s) => chrono::DateTime::parse_from_rfc3339(s.trim())
                .map(|dt| Bson::DateTime(BsonDateTime::from_chrono(dt.with_timezone(&chrono::Utc))))
                .map_err(|e| NormError::coercion(field, format!("{s:?} is not an RFC 3339 datetime: {e}"))),
            other => Err(unexpected(field, self.name(), other)),
        }
    }
}

impl FieldKind for DateTime {
    fn name(&self) -> &'static str {
        "datetime"
    }

    fn decode(&self, field: &str, stored: &Bson) -> NormResult<Bson> {
        self.coerce(field, stored)
    }

    fn encode(&self, field: &str, value: Bson) -> NormResult<Bson> {
        self.coerce(field, &value)
    }
}

/// IPv4 or IPv6 address kept in its canonical text form.
#[derive(Debug, Clone, Copy, Default)]
pub struct IpAddress;

impl IpAddress {
    fn coerce(&self, field: &str, value: &Bson) -> NormResult<Bson> {
        match value {
            Bson::String(s) => s
                .trim()
                .parse::<IpAddr>()
                .map(|ip| Bson::String(ip.to_string()))
                .map_err(|e| NormError::coercion(field, format!("{s:?} is not an IP address: {e}"))),
            other => Err(unexpected(field, self.name(), other)),
        }
    }
}

impl FieldKind for IpAddress {
    fn name(&self) -> &'static str {
        "ip_address"
    }

    fn decode(&self, field: &str, stored: &Bson) -> NormResult<Bson> {
        self.coerce(field, stored)
    }

    fn encode(&self, field: &str, value: Bson) -> NormResult<Bson> {
        self.coerce(field, &value)
    }
}

type ElementTransform = Arc<dyn Fn(Bson) -> Bson + Send + Sync>;

/// Arrays whose members are coerced, one by one, by the declared element kind.
#[derive(Clone)]
pub struct List {
    element: FieldKindRef,
    transform: Option<ElementTransform>,
}

impl List {
    pub fn new(element: impl FieldKind + 'static) -> Self {
        Self {
            element: Arc::new(element),
            transform: None,
        }
    }

    /// Applied to every member on encode, before the element kind sees it.
    pub fn transform<F>(mut self, transform: F) -> Self
    where
        F: Fn(Bson) -> Bson + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(transform));
        self
    }

    /// The declared kind of every member.
    pub fn element(&self) -> &dyn FieldKind {
        self.element.as_ref()
    }

    fn members<'a>(&self, field: &str, value: &'a Bson) -> NormResult<&'a Vec<Bson>> {
        value
            .as_array()
            .ok_or_else(|| unexpected(field, self.name(), value))
    }
}

impl FieldKind for List {
    fn name(&self) -> &'static str {
        "list"
    }

    fn decode(&self, field: &str, stored: &Bson) -> NormResult<Bson> {
        Ok(Bson::Array(
            self.members(field, stored)?
                .iter()
                .enumerate()
                .map(|(i, member)| self.element.decode(&format!("{field}[{i}]"), member))
                .collect::<NormResult<Vec<Bson>>>()?,
        ))
    }

    fn encode(&self, field: &str, value: Bson) -> NormResult<Bson> {
        match value {
            Bson::Array(members) => Ok(Bson::Array(
                members
                    .into_iter()
                    .enumerate()
                    .map(|(i, member)| {
                        let member = match &self.transform {
                            Some(transform) => transform(member),
                            None => member,
                        };
                        self.element.encode(&format!("{field}[{i}]"), member)
                    })
                    .collect::<NormResult<Vec<Bson>>>()?,
            )),
            other => Err(unexpected(field, self.name(), &other)),
        }
    }

    fn check(&self, field: &str, stored: &Bson) -> NormResult<()> {
        self.members(field, stored)?
            .iter()
            .enumerate()
            .try_for_each(|(i, member)| self.element.check(&format!("{field}[{i}]"), member))
    }
}

impl fmt::Debug for List {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("List")
            .field("element", &self.element)
            .field("transform", &self.transform.is_some())
            .finish()
    }
}

/// A nested document of another schema, stored inline as its raw mapping.
#[derive(Debug, Clone)]
pub struct Embed {
    schema: Arc<Schema>,
}

impl Embed {
    pub fn new(schema: &Arc<Schema>) -> Self {
        Self {
            schema: Arc::clone(schema),
        }
    }

    /// The schema of the nested document.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }
}

impl FieldKind for Embed {
    fn name(&self) -> &'static str {
        "embed"
    }

    fn embedded_schema(&self) -> Option<&Arc<Schema>> {
        Some(&self.schema)
    }

    fn decode(&self, field: &str, stored: &Bson) -> NormResult<Bson> {
        match stored {
            Bson::Document(raw) => Ok(Bson::Document(raw.clone())),
            other => Err(unexpected(field, self.name(), other)),
        }
    }

    fn encode(&self, field: &str, value: Bson) -> NormResult<Bson> {
        match value {
            Bson::Document(raw) => Ok(Bson::Document(raw)),
            other => Err(unexpected(field, self.name(), &other)),
        }
    }

    fn check(&self, field: &str, stored: &Bson) -> NormResult<()> {
        let raw = stored
            .as_document()
            .ok_or_else(|| unexpected(field, self.name(), stored))?;

        Document::from_raw(&self.schema, raw.clone())
            .validate()
            .map_err(|err| match err {
                NormError::Validation { field: inner, reason } => {
                    NormError::validation(format!("{field}.{inner}"), reason)
                }
                other => other,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_accepts_numeric_strings() {
        assert_eq!(Integer.encode("n", Bson::String(" 42 ".into())).unwrap(), Bson::Int64(42));
        assert_eq!(Integer.decode("n", &Bson::Int32(7)).unwrap(), Bson::Int64(7));
        assert_eq!(Integer.decode("n", &Bson::Double(3.0)).unwrap(), Bson::Int64(3));
    }

    #[test]
    fn test_integer_rejects_garbage() {
        let err = Integer.encode("n", Bson::String("forty".into())).unwrap_err();
        assert!(matches!(err, NormError::Coercion { ref field, .. } if field == "n"));

        assert!(Integer.decode("n", &Bson::Double(1.5)).is_err());
        assert!(Integer.decode("n", &Bson::Boolean(true)).is_err());
    }

    #[test]
    fn test_scalar_round_trips() {
        let cases: Vec<(&dyn FieldKind, Bson)> = vec![
            (&Integer, Bson::Int64(-12)),
            (&Float, Bson::Double(0.25)),
            (&Text, Bson::String("héllo".into())),
            (&Boolean, Bson::Boolean(true)),
            (&DateTime, Bson::DateTime(BsonDateTime::from_millis(1_700_000_000_123))),
            (&IpAddress, Bson::String("::1".into())),
        ];

        for (kind, value) in cases {
            let stored = kind.encode("f", value.clone()).unwrap();
            assert_eq!(kind.decode("f", &stored).unwrap(), value, "{} round trip", kind.name());
        }
    }

    #[test]
    fn test_text_decodes_binary_as_utf8() {
        let stored = Bson::Binary(bson::Binary {
            subtype: BinarySubtype::Generic,
            bytes: b"bytes".to_vec(),
        });
        assert_eq!(Text.decode("t", &stored).unwrap(), Bson::String("bytes".into()));

        let invalid = Bson::Binary(bson::Binary {
            subtype: BinarySubtype::Generic,
            bytes: vec![0xff, 0xfe],
        });
        assert!(Text.decode("t", &invalid).is_err());
    }

    #[test]
    fn test_boolean_words() {
        assert_eq!(Boolean.encode("b", Bson::String("Yes".into())).unwrap(), Bson::Boolean(true));
        assert_eq!(Boolean.encode("b", Bson::Int32(0)).unwrap(), Bson::Boolean(false));
        assert!(Boolean.encode("b", Bson::String("maybe".into())).is_err());
    }

    #[test]
    fn test_datetime_from_rfc3339() {
        let stored = DateTime
            .encode("ts", Bson::String("2024-05-01T12:00:00+02:00".into()))
            .unwrap();
        let expected = BsonDateTime::parse_rfc3339_str("2024-05-01T10:00:00Z").unwrap();
        assert_eq!(stored, Bson::DateTime(expected));
    }

    #[test]
    fn test_ip_address_is_canonicalized() {
        assert_eq!(
            IpAddress.encode("ip", Bson::String("0:0:0:0:0:0:0:1".into())).unwrap(),
            Bson::String("::1".into())
        );
        assert!(IpAddress.encode("ip", Bson::String("300.1.1.1".into())).is_err());
    }

    #[test]
    fn test_list_coerces_members_with_element_kind() {
        let list = List::new(Integer);
        let stored = list
            .encode("scores", Bson::Array(vec![Bson::String("1".into()), Bson::Int32(2)]))
            .unwrap();
        assert_eq!(stored, Bson::Array(vec![Bson::Int64(1), Bson::Int64(2)]));

        let err = list
            .encode("scores", Bson::Array(vec![Bson::String("x".into())]))
            .unwrap_err();
        assert!(matches!(err, NormError::Coercion { ref field, .. } if field == "scores[0]"));

        assert!(list.encode("scores", Bson::Int32(1)).is_err());
    }

    #[test]
    fn test_list_transforms_each_member() {
        let tags = List::new(Text).transform(|member| match member {
            Bson::String(s) => Bson::String(s.to_lowercase()),
            other => other,
        });

        let stored = tags
            .encode("tags", Bson::Array(vec!["Rust".into(), "ODM".into()]))
            .unwrap();
        assert_eq!(stored, Bson::Array(vec!["rust".into(), "odm".into()]));
        assert!(format!("{tags:?}").contains("transform: true"));
    }
}
