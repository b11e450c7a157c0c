//! Key sanitization for MongoDB compatibility.
//!
//! MongoDB reserves dots and dollar signs in field names for query syntax. Storage
//! keys of a schema may contain either, so keys are escaped on the way in and
//! restored on the way out. Values are never touched.

use bson::{Bson, Document};

/// Escapes and restores document keys and collection names.
///
/// Replaced characters:
/// - Dots (`.`) - used for nested field access in queries
/// - Dollar signs (`$`) - used for operators in queries
/// - Null bytes (`\0`) - field name terminators
pub(crate) struct KeySanitizer;

impl KeySanitizer {
    const REPLACEMENTS: [(&'static str, &'static str); 3] = [
        (".", "__dot__"),
        ("$", "__dollar__"),
        ("\0", "__null__"),
    ];

    pub(crate) fn sanitize_document(document: &Document) -> Document {
        document
            .iter()
            .map(|(k, v)| (Self::sanitize_string(k), Self::map_nested(v, Self::sanitize_document)))
            .collect()
    }

    pub(crate) fn restore_document(document: &Document) -> Document {
        document
            .iter()
            .map(|(k, v)| (Self::restore_string(k), Self::map_nested(v, Self::restore_document)))
            .collect()
    }

    /// Applies `rewrite` to every document nested in `value`, through arrays.
    fn map_nested(value: &Bson, rewrite: fn(&Document) -> Document) -> Bson {
        match value {
            Bson::Document(doc) => Bson::Document(rewrite(doc)),
            Bson::Array(arr) => Bson::Array(
                arr
                    .iter()
                    .map(|v| Self::map_nested(v, rewrite))
                    .collect(),
            ),
            _ => value.clone(),
        }
    }

    pub(crate) fn sanitize_string(input: &str) -> String {
        let mut sanitized = input.to_string();
        for (target, replacement) in Self::REPLACEMENTS.iter() {
            sanitized = sanitized.replace(*target, *replacement);
        }
        sanitized
    }

    pub(crate) fn restore_string(input: &str) -> String {
        let mut restored = input.to_string();
        for (target, replacement) in Self::REPLACEMENTS.iter().rev() {
            restored = restored.replace(*replacement, *target);
        }
        restored
    }
}
