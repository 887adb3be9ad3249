//! Type codec framework.
//!
//! A [`Codec`] converts between one wire representation (a [`Format`] plus a
//! server type [`Oid`]) and one kind of application [`Value`]. Codecs are
//! collected in an ordered [`Codecs`] registry; dispatch asks each codec in
//! turn and the first match wins, so registration order is priority.
//!
//! Encoding produces a [`Parameter`]: format and type metadata plus a deferred
//! byte producer, or no producer at all for SQL NULL.

use std::fmt;
use std::future::Future;

use bytes::Bytes;
use futures_util::future::BoxFuture;

use crate::error::{PgWireError, Result};

pub mod bytea;
mod registry;
mod string;

pub use bytea::{Blob, BlobCodec, ByteaBlob};
pub use registry::Codecs;
pub use string::StringCodec;

/// Wire format of a parameter or column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Text,
    Binary,
}

impl Format {
    pub fn code(self) -> i16 {
        match self {
            Format::Text => 0,
            Format::Binary => 1,
        }
    }
}

impl TryFrom<i16> for Format {
    type Error = PgWireError;

    fn try_from(code: i16) -> Result<Format> {
        match code {
            0 => Ok(Format::Text),
            1 => Ok(Format::Binary),
            other => Err(PgWireError::Protocol(format!("unknown format code: {other}"))),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Format::Text => "text",
            Format::Binary => "binary",
        })
    }
}

/// Server type identifier (`pg_type.oid`) of the built-in types the client knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Oid {
    Bool,
    Bytea,
    Char,
    Name,
    Int8,
    Int2,
    Int4,
    Text,
    Unknown,
    Bpchar,
    Varchar,
    Other(u32),
}

impl Oid {
    pub fn as_u32(self) -> u32 {
        match self {
            Oid::Bool => 16,
            Oid::Bytea => 17,
            Oid::Char => 18,
            Oid::Name => 19,
            Oid::Int8 => 20,
            Oid::Int2 => 21,
            Oid::Int4 => 23,
            Oid::Text => 25,
            Oid::Unknown => 705,
            Oid::Bpchar => 1042,
            Oid::Varchar => 1043,
            Oid::Other(oid) => oid,
        }
    }
}

impl From<u32> for Oid {
    fn from(oid: u32) -> Oid {
        match oid {
            16 => Oid::Bool,
            17 => Oid::Bytea,
            18 => Oid::Char,
            19 => Oid::Name,
            20 => Oid::Int8,
            21 => Oid::Int2,
            23 => Oid::Int4,
            25 => Oid::Text,
            705 => Oid::Unknown,
            1042 => Oid::Bpchar,
            1043 => Oid::Varchar,
            other => Oid::Other(other),
        }
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Oid::Bool => "bool",
            Oid::Bytea => "bytea",
            Oid::Char => "char",
            Oid::Name => "name",
            Oid::Int8 => "int8",
            Oid::Int2 => "int2",
            Oid::Int4 => "int4",
            Oid::Text => "text",
            Oid::Unknown => "unknown",
            Oid::Bpchar => "bpchar",
            Oid::Varchar => "varchar",
            Oid::Other(oid) => return write!(f, "oid {oid}"),
        };
        f.write_str(name)
    }
}

/// Kind of application value a caller asks a codec to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Text,
    Blob,
}

/// An application-level value produced by decoding or consumed by encoding.
pub enum Value {
    Text(String),
    Blob(Box<dyn Blob>),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Text(_) => ValueKind::Text,
            Value::Blob(_) => ValueKind::Blob,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => f.debug_tuple("Text").field(s).finish(),
            Value::Blob(_) => f.write_str("Blob(..)"),
        }
    }
}

impl From<String> for Value {
    fn from(s: String) -> Value {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Value {
        Value::Text(s.to_string())
    }
}

/// Typed extraction from a decoded [`Value`].
pub trait FromValue: Sized {
    const KIND: ValueKind;

    fn from_value(value: Value) -> Result<Self>;
}

impl FromValue for String {
    const KIND: ValueKind = ValueKind::Text;

    fn from_value(value: Value) -> Result<String> {
        match value {
            Value::Text(s) => Ok(s),
            other => Err(PgWireError::Internal(format!(
                "expected text value, got {other:?}"
            ))),
        }
    }
}

impl FromValue for Box<dyn Blob> {
    const KIND: ValueKind = ValueKind::Blob;

    fn from_value(value: Value) -> Result<Box<dyn Blob>> {
        match value {
            Value::Blob(b) => Ok(b),
            other => Err(PgWireError::Internal(format!(
                "expected blob value, got {other:?}"
            ))),
        }
    }
}

/// Deferred producer of an encoded parameter's bytes.
pub type ParameterValue = BoxFuture<'static, Result<Bytes>>;

/// An encoded value ready for transmission.
///
/// A NULL parameter carries only its format and type.
pub struct Parameter {
    format: Format,
    oid: Oid,
    value: Option<ParameterValue>,
}

impl Parameter {
    /// Parameter whose bytes are produced when [`Parameter::into_bytes`] is awaited.
    pub fn new<F>(format: Format, oid: Oid, value: F) -> Parameter
    where
        F: Future<Output = Result<Bytes>> + Send + 'static,
    {
        Parameter {
            format,
            oid,
            value: Some(Box::pin(value)),
        }
    }

    /// Parameter whose bytes are already available.
    pub fn ready(format: Format, oid: Oid, bytes: Bytes) -> Parameter {
        Parameter::new(format, oid, std::future::ready(Ok(bytes)))
    }

    pub fn null(format: Format, oid: Oid) -> Parameter {
        Parameter {
            format,
            oid,
            value: None,
        }
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn oid(&self) -> Oid {
        self.oid
    }

    pub fn is_null(&self) -> bool {
        self.value.is_none()
    }

    /// Run the producer. `None` is SQL NULL.
    pub async fn into_bytes(self) -> Result<Option<Bytes>> {
        match self.value {
            Some(producer) => producer.await.map(Some),
            None => Ok(None),
        }
    }
}

impl fmt::Debug for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parameter")
            .field("format", &self.format)
            .field("oid", &self.oid)
            .field("null", &self.is_null())
            .finish()
    }
}

/// Bidirectional converter between wire bytes and one kind of [`Value`].
pub trait Codec: Send + Sync + fmt::Debug {
    /// The value kind this codec produces and consumes.
    fn kind(&self) -> ValueKind;

    fn can_decode(&self, format: Format, oid: Oid, target: ValueKind) -> bool;

    /// Decode a non-NULL column buffer.
    ///
    /// Implementations must not keep `buf` past the call unless the returned
    /// value documents that it does.
    fn decode(&self, buf: &Bytes, format: Format, target: ValueKind) -> Result<Value>;

    fn can_encode(&self, value: &Value) -> bool;

    fn encode(&self, value: Value) -> Result<Parameter>;

    /// NULL in this codec's canonical format and type.
    fn encode_null(&self) -> Parameter;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oid_round_trips_known_and_unknown_values() {
        for oid in [17u32, 25, 705, 1043, 99999] {
            assert_eq!(Oid::from(oid).as_u32(), oid);
        }
        assert_eq!(Oid::from(17), Oid::Bytea);
        assert_eq!(Oid::Other(99999).to_string(), "oid 99999");
        assert_eq!(Oid::Bytea.to_string(), "bytea");
    }

    #[test]
    fn format_codes() {
        assert_eq!(Format::try_from(0).unwrap(), Format::Text);
        assert_eq!(Format::try_from(1).unwrap(), Format::Binary);
        assert!(Format::try_from(2).is_err());
        assert_eq!(Format::Binary.code(), 1);
    }

    #[tokio::test]
    async fn null_parameter_has_no_payload() {
        let p = Parameter::null(Format::Text, Oid::Bytea);
        assert!(p.is_null());
        assert_eq!(p.into_bytes().await.unwrap(), None);
    }

    #[tokio::test]
    async fn ready_parameter_yields_bytes() {
        let p = Parameter::ready(Format::Text, Oid::Varchar, Bytes::from_static(b"x"));
        assert!(!p.is_null());
        assert_eq!(p.into_bytes().await.unwrap().as_deref(), Some(&b"x"[..]));
    }
}
