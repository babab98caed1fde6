mod error;

pub use error::{Error, SchemaViolation};

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::contract::{EventContract, Schema};

/// Checks a JSON value against a schema.
///
/// Fields the schema does not mention are ignored.
///
/// # Errors
///
/// Returns the first violation found, in schema field order.
pub fn validate(schema: &Schema, value: &Value) -> Result<(), SchemaViolation> {
    let Value::Object(object) = value else {
        return Err(SchemaViolation::NotAnObject);
    };

    for field in schema.fields() {
        match object.get(field.name.as_ref()) {
            None | Some(Value::Null) if field.required => {
                return Err(SchemaViolation::MissingField(field.name.to_string()));
            }
            None | Some(Value::Null) => {}
            Some(value) if !field.kind.matches(value) => {
                return Err(SchemaViolation::WrongType {
                    field: field.name.to_string(),
                    expected: field.kind,
                });
            }
            Some(_) => {}
        }
    }

    Ok(())
}

/// Encodes a payload after validating it against `schema`.
///
/// # Errors
///
/// Returns `Error::SchemaViolation` if the payload does not conform, or
/// `Error::Encoding` if it cannot be serialized.
pub fn encode_with<T>(schema: &Schema, data: &T) -> Result<Bytes, Error>
where
    T: Serialize,
{
    let value = serde_json::to_value(data).map_err(Error::Encoding)?;
    validate(schema, &value).map_err(Error::SchemaViolation)?;

    // Serialize the typed value so field order follows the struct declaration.
    let bytes = serde_json::to_vec(data).map_err(Error::Encoding)?;

    Ok(Bytes::from(bytes))
}

/// Decodes bytes against `schema`.
///
/// Unknown fields are ignored so newer publishers can add fields.
///
/// # Errors
///
/// Returns `Error::Decoding` on malformed bytes and `Error::Mismatch` if the
/// payload does not conform to the schema.
pub fn decode_with<T>(schema: &Schema, bytes: &[u8]) -> Result<T, Error>
where
    T: DeserializeOwned,
{
    let value: Value = serde_json::from_slice(bytes).map_err(Error::Decoding)?;
    validate(schema, &value).map_err(Error::Mismatch)?;

    serde_json::from_value(value).map_err(Error::Decoding)
}

/// Encodes the payload of contract `C`.
///
/// # Errors
///
/// See [`encode_with`].
pub fn encode<C>(data: &C::Data) -> Result<Bytes, Error>
where
    C: EventContract,
{
    encode_with(&C::schema(), data)
}

/// Decodes a payload of contract `C`.
///
/// # Errors
///
/// See [`decode_with`].
pub fn decode<C>(bytes: &[u8]) -> Result<C::Data, Error>
where
    C: EventContract,
{
    decode_with(&C::schema(), bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::contract::FieldKind;

    use assert_matches::assert_matches;
    use serde::Deserialize;

    #[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
    struct TicketData {
        id: String,
        title: String,
        price: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seats: Option<u32>,
    }

    struct TicketCreated;

    impl EventContract for TicketCreated {
        const SUBJECT: &'static str = "ticket:created";

        type Data = TicketData;

        fn schema() -> Schema {
            Schema::new()
                .required("id", FieldKind::String)
                .required("title", FieldKind::String)
                .required("price", FieldKind::Number)
                .optional("seats", FieldKind::Integer)
        }
    }

    fn concert() -> TicketData {
        TicketData {
            id: "123".to_string(),
            title: "concert".to_string(),
            price: 20.0,
            seats: None,
        }
    }

    #[test]
    fn test_round_trip() {
        for data in [
            concert(),
            TicketData {
                seats: Some(40),
                price: 12.5,
                ..concert()
            },
        ] {
            let bytes = encode::<TicketCreated>(&data).unwrap();
            assert_eq!(decode::<TicketCreated>(&bytes).unwrap(), data);
        }
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let first = encode::<TicketCreated>(&concert()).unwrap();
        let second = encode::<TicketCreated>(&concert()).unwrap();

        assert_eq!(first, second);
        assert_eq!(
            first,
            Bytes::from_static(br#"{"id":"123","title":"concert","price":20.0}"#)
        );
    }

    #[test]
    fn test_decode_accepts_integer_price() {
        let data = decode::<TicketCreated>(br#"{"id":"123","title":"concert","price":20}"#)
            .unwrap();

        assert_eq!(data, concert());
    }

    #[test]
    fn test_decode_ignores_unknown_fields() {
        let data = decode::<TicketCreated>(
            br#"{"id":"123","title":"concert","price":20,"venue":"arena","version":2}"#,
        )
        .unwrap();

        assert_eq!(data, concert());
    }

    #[test]
    fn test_decode_malformed_bytes() {
        let error = decode::<TicketCreated>(b"{not json").unwrap_err();

        assert!(error.is_decoding());
        assert_matches!(error, Error::Decoding(_));
    }

    #[test]
    fn test_decode_missing_field() {
        assert_matches!(
            decode::<TicketCreated>(br#"{"id":"123","price":20}"#),
            Err(Error::Mismatch(SchemaViolation::MissingField(field))) if field == "title"
        );
    }

    #[test]
    fn test_decode_wrong_type() {
        assert_matches!(
            decode::<TicketCreated>(br#"{"id":"123","title":"concert","price":"$20"}"#),
            Err(Error::Mismatch(SchemaViolation::WrongType { field, expected: FieldKind::Number }))
                if field == "price"
        );
    }

    #[test]
    fn test_decode_non_object() {
        assert_matches!(
            decode::<TicketCreated>(b"[1, 2, 3]"),
            Err(Error::Mismatch(SchemaViolation::NotAnObject))
        );
    }

    #[test]
    fn test_encode_rejects_payload_violating_schema() {
        #[derive(Serialize)]
        struct Partial {
            id: &'static str,
        }

        let schema = TicketCreated::schema();

        assert_matches!(
            encode_with(&schema, &Partial { id: "123" }),
            Err(Error::SchemaViolation(SchemaViolation::MissingField(field))) if field == "title"
        );
        assert_matches!(
            encode_with(&schema, &42),
            Err(Error::SchemaViolation(SchemaViolation::NotAnObject))
        );
    }

    #[test]
    fn test_encode_rejects_non_finite_number() {
        let data = TicketData {
            price: f64::NAN,
            ..concert()
        };

        // NaN serializes to null, which the schema treats as missing.
        assert_matches!(
            encode::<TicketCreated>(&data),
            Err(Error::SchemaViolation(SchemaViolation::MissingField(field))) if field == "price"
        );
    }
}
