use std::borrow::Cow;
use std::fmt::{self, Debug};

use serde::Serialize;
use serde::de::DeserializeOwned;

/// The semantic type of a payload field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// A boolean.
    Boolean,

    /// A whole number.
    Integer,

    /// Any number, whole or fractional.
    Number,

    /// A UTF-8 string.
    String,
}

impl FieldKind {
    /// Whether the given JSON value is of this kind.
    #[must_use]
    pub fn matches(self, value: &serde_json::Value) -> bool {
        match self {
            Self::Boolean => value.is_boolean(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::String => value.is_string(),
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Boolean => "a boolean",
            Self::Integer => "an integer",
            Self::Number => "a number",
            Self::String => "a string",
        })
    }
}

/// A named, typed field of a payload schema.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Field {
    /// The field name as it appears on the wire.
    pub name: Cow<'static, str>,

    /// The semantic type of the field.
    pub kind: FieldKind,

    /// Whether the field must be present and non-null.
    pub required: bool,
}

/// The ordered set of typed fields making up an event payload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    /// Creates an empty schema.
    #[must_use]
    pub const fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Adds a required field.
    #[must_use]
    pub fn required(mut self, name: impl Into<Cow<'static, str>>, kind: FieldKind) -> Self {
        self.fields.push(Field {
            name: name.into(),
            kind,
            required: true,
        });
        self
    }

    /// Adds an optional field.
    #[must_use]
    pub fn optional(mut self, name: impl Into<Cow<'static, str>>, kind: FieldKind) -> Self {
        self.fields.push(Field {
            name: name.into(),
            kind,
            required: false,
        });
        self
    }

    /// The fields in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }
}

/// A contract binds one subject to one payload type and its schema.
///
/// Publishers and listeners are generic over a contract, so sending or
/// receiving the wrong payload type does not compile.
pub trait EventContract: Send + Sync + 'static {
    /// The subject events of this contract are published on.
    const SUBJECT: &'static str;

    /// The decoded payload.
    type Data: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// The wire schema of the payload.
    fn schema() -> Schema;
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_field_kinds() {
        assert!(FieldKind::Integer.matches(&json!(20)));
        assert!(!FieldKind::Integer.matches(&json!(20.5)));
        assert!(FieldKind::Number.matches(&json!(20)));
        assert!(FieldKind::Number.matches(&json!(20.5)));
        assert!(FieldKind::String.matches(&json!("concert")));
        assert!(!FieldKind::String.matches(&json!(20)));
        assert!(FieldKind::Boolean.matches(&json!(true)));
    }

    #[test]
    fn test_schema_keeps_declaration_order() {
        let schema = Schema::new()
            .required("id", FieldKind::String)
            .required("title", FieldKind::String)
            .optional("price", FieldKind::Number);

        let names: Vec<_> = schema.fields().iter().map(|f| f.name.as_ref()).collect();
        assert_eq!(names, ["id", "title", "price"]);
        assert!(!schema.fields()[2].required);
    }
}
