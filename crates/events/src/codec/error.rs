use thiserror::Error;

use crate::contract::FieldKind;

/// A payload that does not conform to its schema.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SchemaViolation {
    /// A required field is absent or null.
    #[error("required field `{0}` is missing")]
    MissingField(String),

    /// The payload is not an object.
    #[error("payload must be an object")]
    NotAnObject,

    /// A field holds a value of the wrong semantic type.
    #[error("field `{field}` must be {expected}")]
    WrongType {
        /// The offending field.
        field: String,

        /// The kind the schema declares.
        expected: FieldKind,
    },
}

/// Errors that can occur while encoding or decoding payloads.
#[derive(Debug, Error)]
pub enum Error {
    /// The bytes are not a valid payload.
    #[error("failed to decode payload: {0}")]
    Decoding(#[source] serde_json::Error),

    /// The payload could not be serialized.
    #[error("failed to encode payload: {0}")]
    Encoding(#[source] serde_json::Error),

    /// A decoded payload does not match the schema.
    #[error("decoded payload does not match schema: {0}")]
    Mismatch(#[source] SchemaViolation),

    /// An outbound payload does not match the schema.
    #[error(transparent)]
    SchemaViolation(SchemaViolation),
}

impl Error {
    /// Whether the error was raised while decoding inbound bytes.
    #[must_use]
    pub const fn is_decoding(&self) -> bool {
        matches!(self, Self::Decoding(_) | Self::Mismatch(_))
    }
}
