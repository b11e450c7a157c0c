//! Error types and result types for schema and persistence operations.
//!
//! Every fallible operation in this crate returns [`NormResult<T>`]. Failures coming
//! from a store driver are wrapped so the original cause stays reachable through
//! [`std::error::Error::source`].

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Boxed cause carried by errors that wrap a driver failure.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Represents all possible errors raised while defining schemas, accessing fields,
/// or persisting documents.
#[derive(Error, Debug)]
pub enum NormError {
    /// A required field was read but has neither a stored value nor a default.
    #[error("Field {0} has no value and no default")]
    MissingData(String),
    /// A value was rejected for a field: a required field left empty, a validator
    /// refusing the value, or an attempt to unset a required field.
    #[error("Validation failed for field {field}: {reason}")]
    Validation { field: String, reason: String },
    /// An argument combination that can never succeed was passed to an operation.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// A constructor received the same field both positionally and by keyword.
    #[error("Field {0} was given both positionally and by keyword")]
    DuplicateArgument(String),
    /// Two different schema types claimed the same registry key.
    #[error("Registry {kind} {key} is already bound to {existing}, cannot bind it to {incoming}")]
    RegistrationConflict {
        /// Index the key lives in: `name`, `identifier` or `collection`.
        kind: &'static str,
        key: String,
        existing: String,
        incoming: String,
    },
    /// The schema definition itself is inconsistent.
    #[error("Invalid schema {schema}: {reason}")]
    Schema { schema: String, reason: String },
    /// A stored or supplied value could not be converted by the field's kind.
    #[error("Cannot coerce value of field {field}: {reason}")]
    Coercion { field: String, reason: String },
    /// Dictionary-style access used a name the schema does not declare.
    #[error("Unknown field: {0}")]
    UnknownField(String),
    /// The store could not be reached, was misconfigured, or refused the credentials.
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<BoxError>,
    },
    /// The store accepted the connection but rejected the write.
    #[error("Unable to save document to collection {collection}")]
    Operation {
        collection: String,
        #[source]
        source: BoxError,
    },
    /// Raw failure reported by a store driver, before it is classified.
    #[error("Driver error: {0}")]
    Driver(String),
    /// Serialization/deserialization error when converting between BSON and JSON.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// A specialized `Result` type for schema and persistence operations.
pub type NormResult<T> = Result<T, NormError>;

impl NormError {
    pub(crate) fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        NormError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn coercion(field: impl Into<String>, reason: impl Into<String>) -> Self {
        NormError::Coercion {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn schema(schema: impl Into<String>, reason: impl Into<String>) -> Self {
        NormError::Schema {
            schema: schema.into(),
            reason: reason.into(),
        }
    }

    /// Builds a connection error without an underlying cause.
    pub fn connection(message: impl Into<String>) -> Self {
        NormError::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Builds a connection error wrapping the driver failure that caused it.
    pub fn connection_caused_by(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        NormError::Connection {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Returns true for the validation class: rejected values and impossible arguments.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            NormError::Validation { .. } | NormError::InvalidArgument(_)
        )
    }
}

impl From<BsonError> for NormError {
    fn from(err: BsonError) -> Self {
        NormError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for NormError {
    fn from(err: SerdeJsonError) -> Self {
        NormError::Serialization(err.to_string())
    }
}
