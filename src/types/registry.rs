use std::fmt;

use bytes::Bytes;

use crate::buffer::SharedAllocator;
use crate::error::{PgWireError, Result};

use super::{BlobCodec, Codec, Format, FromValue, Oid, Parameter, StringCodec, Value, ValueKind};

/// Ordered codec registry.
///
/// Dispatch walks the codecs in registration order and uses the first one that
/// accepts the request, so specific codecs must be registered before generic ones.
pub struct Codecs {
    codecs: Vec<Box<dyn Codec>>,
}

impl Codecs {
    /// The built-in codecs, allocating through the transport's allocator.
    pub fn new(allocator: SharedAllocator) -> Codecs {
        Codecs::with_codecs(vec![
            Box::new(BlobCodec::new(allocator)),
            Box::new(StringCodec),
        ])
    }

    pub fn with_codecs(codecs: Vec<Box<dyn Codec>>) -> Codecs {
        Codecs { codecs }
    }

    /// Register `codec` ahead of every existing codec.
    pub fn prepend(&mut self, codec: Box<dyn Codec>) {
        self.codecs.insert(0, codec);
    }

    /// Decode a column value. `None` (SQL NULL) decodes to `None` without
    /// consulting any codec.
    pub fn decode(
        &self,
        buf: Option<&Bytes>,
        oid: Oid,
        format: Format,
        target: ValueKind,
    ) -> Result<Option<Value>> {
        let Some(buf) = buf else {
            return Ok(None);
        };

        let codec = self
            .codecs
            .iter()
            .find(|c| c.can_decode(format, oid, target))
            .ok_or_else(|| {
                PgWireError::decode(
                    oid,
                    format!("no codec decodes {format} {oid} as {target:?}"),
                )
            })?;

        codec.decode(buf, format, target).map(Some)
    }

    /// Decode a column value into `T`.
    pub fn decode_as<T: FromValue>(
        &self,
        buf: Option<&Bytes>,
        oid: Oid,
        format: Format,
    ) -> Result<Option<T>> {
        self.decode(buf, oid, format, T::KIND)?
            .map(T::from_value)
            .transpose()
    }

    pub fn encode(&self, value: Value) -> Result<Parameter> {
        match self.codecs.iter().find(|c| c.can_encode(&value)) {
            Some(codec) => codec.encode(value),
            None => Err(PgWireError::Encode(format!("no codec encodes {value:?}"))),
        }
    }

    /// NULL for the canonical encoder of `kind`.
    pub fn encode_null(&self, kind: ValueKind) -> Result<Parameter> {
        self.codecs
            .iter()
            .find(|c| c.kind() == kind)
            .map(|c| c.encode_null())
            .ok_or_else(|| PgWireError::Encode(format!("no codec encodes {kind:?}")))
    }
}

impl fmt::Debug for Codecs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.codecs.iter()).finish()
    }
}
