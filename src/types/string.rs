use bytes::Bytes;

use crate::error::{PgWireError, Result};

use super::{Codec, Format, Oid, Parameter, Value, ValueKind};

/// Character types decoded as `String`. Text and binary forms are both UTF-8.
const CHARACTER_TYPES: [Oid; 5] = [Oid::Text, Oid::Varchar, Oid::Bpchar, Oid::Name, Oid::Unknown];

/// Codec between character columns and [`Value::Text`].
#[derive(Debug, Default, Clone, Copy)]
pub struct StringCodec;

impl Codec for StringCodec {
    fn kind(&self) -> ValueKind {
        ValueKind::Text
    }

    fn can_decode(&self, format: Format, oid: Oid, target: ValueKind) -> bool {
        // Binary "char" is one raw byte, not UTF-8.
        target == ValueKind::Text
            && (CHARACTER_TYPES.contains(&oid) || (oid == Oid::Char && format == Format::Text))
    }

    fn decode(&self, buf: &Bytes, _format: Format, _target: ValueKind) -> Result<Value> {
        std::str::from_utf8(buf)
            .map(|s| Value::Text(s.to_string()))
            .map_err(|e| PgWireError::decode(Oid::Text, format!("invalid utf-8: {e}")))
    }

    fn can_encode(&self, value: &Value) -> bool {
        matches!(value, Value::Text(_))
    }

    fn encode(&self, value: Value) -> Result<Parameter> {
        match value {
            Value::Text(s) => Ok(Parameter::ready(
                Format::Text,
                Oid::Varchar,
                Bytes::from(s.into_bytes()),
            )),
            other => Err(PgWireError::Encode(format!(
                "string codec cannot encode {other:?}"
            ))),
        }
    }

    fn encode_null(&self) -> Parameter {
        Parameter::null(Format::Text, Oid::Varchar)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_character_types_in_either_format() {
        for format in [Format::Text, Format::Binary] {
            assert!(StringCodec.can_decode(format, Oid::Text, ValueKind::Text));
            assert!(StringCodec.can_decode(format, Oid::Varchar, ValueKind::Text));
        }
        assert!(!StringCodec.can_decode(Format::Text, Oid::Bytea, ValueKind::Text));
        assert!(!StringCodec.can_decode(Format::Text, Oid::Text, ValueKind::Blob));
    }

    #[test]
    fn internal_char_is_text_format_only() {
        assert!(StringCodec.can_decode(Format::Text, Oid::Char, ValueKind::Text));
        assert!(!StringCodec.can_decode(Format::Binary, Oid::Char, ValueKind::Text));
    }

    #[test]
    fn rejects_invalid_utf8() {
        let err = StringCodec
            .decode(&Bytes::from_static(&[0xff, 0xfe]), Format::Text, ValueKind::Text)
            .unwrap_err();
        assert!(err.is_decode());
    }

    #[tokio::test]
    async fn encodes_as_varchar() {
        let p = StringCodec.encode(Value::from("read committed")).unwrap();
        assert_eq!(p.oid(), Oid::Varchar);
        assert_eq!(
            p.into_bytes().await.unwrap().as_deref(),
            Some(&b"read committed"[..])
        );
    }
}
