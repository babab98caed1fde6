use serde::{Deserialize, Serialize};
use ticketing_events::{EventContract, FieldKind, Schema};

use crate::subjects::Subjects;

/// Payload of [`ProductCreated`].
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ProductCreatedData {
    /// Product id.
    pub id: String,

    /// Display title.
    pub title: String,

    /// Price in the listing currency.
    pub price: f64,
}

/// A product was listed.
#[derive(Clone, Copy, Debug)]
pub struct ProductCreated;

impl EventContract for ProductCreated {
    const SUBJECT: &'static str = Subjects::ProductCreated.as_str();

    type Data = ProductCreatedData;

    fn schema() -> Schema {
        Schema::new()
            .required("id", FieldKind::String)
            .required("title", FieldKind::String)
            .required("price", FieldKind::Number)
    }
}

/// Payload of [`ProductUpdated`].
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ProductUpdatedData {
    /// Product id.
    pub id: String,

    /// Display title.
    pub title: String,

    /// Price in the listing currency.
    pub price: f64,

    /// Monotonic revision of the product, bumped on every update.
    pub version: u64,
}

/// A product's details changed.
#[derive(Clone, Copy, Debug)]
pub struct ProductUpdated;

impl EventContract for ProductUpdated {
    const SUBJECT: &'static str = Subjects::ProductUpdated.as_str();

    type Data = ProductUpdatedData;

    fn schema() -> Schema {
        Schema::new()
            .required("id", FieldKind::String)
            .required("title", FieldKind::String)
            .required("price", FieldKind::Number)
            .required("version", FieldKind::Integer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;
    use ticketing_events::SchemaViolation;
    use ticketing_events::codec::{self, Error};

    #[test]
    fn test_product_created_wire_format() {
        let data = ProductCreatedData {
            id: "123".to_string(),
            title: "concert".to_string(),
            price: 20.0,
        };

        let bytes = codec::encode::<ProductCreated>(&data).unwrap();

        assert_eq!(
            serde_json::from_slice::<serde_json::Value>(&bytes).unwrap(),
            serde_json::json!({ "id": "123", "title": "concert", "price": 20.0 })
        );
        assert_eq!(codec::decode::<ProductCreated>(&bytes).unwrap(), data);
    }

    #[test]
    fn test_product_created_rejects_string_price() {
        let result =
            codec::decode::<ProductCreated>(br#"{"id":"123","title":"concert","price":"$20"}"#);

        assert_matches!(
            result,
            Err(Error::Mismatch(SchemaViolation::WrongType { field, .. })) if field == "price"
        );
    }
}
