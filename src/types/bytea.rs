//! BYTEA large-object codec.
//!
//! Decoding does not copy: [`ByteaBlob`] keeps a handle on the column buffer
//! and only parses the `\x<hex>` literal when its stream is read. The handle is
//! held until [`Blob::discard`] runs (or the blob is dropped).
//!
//! Encoding gathers the source blob's chunks into a [`CompositeBuf`] without
//! copying, hex-encodes it in [`HEX_CHUNK_SIZE`] steps, and discards the source
//! once the hex buffer is complete, whether or not encoding succeeded. A
//! parameter that is dropped unproduced, or whose production is cancelled,
//! still discards its source: on the current tokio runtime when there is one,
//! otherwise by polling the discard once in place.

use bytes::{Buf, Bytes};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use futures_util::stream::{self, BoxStream, StreamExt};
use tracing::{trace, warn};

use crate::buffer::{BufferAllocator, CompositeBuf, SharedAllocator};
use crate::error::{PgWireError, Result};

use super::{Codec, Format, Oid, Parameter, Value, ValueKind};

/// Source bytes hex-encoded per step.
pub const HEX_CHUNK_SIZE: usize = 1024;

const HEX_PREFIX: &[u8] = b"\\x";

/// A streamable binary value.
///
/// Consumers must call [`Blob::discard`] once they are done so that any
/// buffer the blob holds is released; discarding twice is a no-op.
pub trait Blob: Send {
    /// Lazily produce the blob's bytes as a sequence of chunks.
    fn stream(&mut self) -> BoxStream<'_, Result<Bytes>>;

    /// Release the resources backing this blob.
    fn discard(&mut self) -> BoxFuture<'_, ()>;
}

/// A blob decoded from a TEXT-format BYTEA column.
#[derive(Debug)]
pub struct ByteaBlob {
    buf: Option<Bytes>,
}

impl ByteaBlob {
    fn retain(buf: &Bytes) -> ByteaBlob {
        ByteaBlob {
            buf: Some(buf.clone()),
        }
    }

    /// `true` once the column buffer has been released.
    pub fn is_discarded(&self) -> bool {
        self.buf.is_none()
    }
}

impl Blob for ByteaBlob {
    fn stream(&mut self) -> BoxStream<'_, Result<Bytes>> {
        let buf = self.buf.clone();
        stream::once(async move {
            match buf {
                Some(buf) => parse_hex_literal(&buf),
                None => Err(PgWireError::Internal("blob read after discard".into())),
            }
        })
        .boxed()
    }

    fn discard(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if let Some(buf) = self.buf.take() {
                trace!(len = buf.len(), "released bytea buffer");
            }
        })
    }
}

/// Decode a `\x`-prefixed hex literal into raw bytes.
///
/// The whole buffer must match: a missing prefix, an odd number of digits or
/// any non-hex character is rejected rather than truncated.
pub fn parse_hex_literal(buf: &[u8]) -> Result<Bytes> {
    let digits = buf
        .strip_prefix(HEX_PREFIX)
        .ok_or_else(|| malformed("missing \\x prefix"))?;
    hex::decode(digits)
        .map(Bytes::from)
        .map_err(|e| malformed(&e.to_string()))
}

fn malformed(reason: &str) -> PgWireError {
    PgWireError::decode(Oid::Bytea, format!("malformed BYTEA literal: {reason}"))
}

/// Render `src` as a `\x<hex>` literal, [`HEX_CHUNK_SIZE`] source bytes at a time.
pub fn to_hex_format<B: Buf>(mut src: B, allocator: &dyn BufferAllocator) -> Result<Bytes> {
    let mut out = allocator.buffer(HEX_PREFIX.len() + src.remaining() * 2);
    out.extend_from_slice(HEX_PREFIX);

    let mut scratch = [0u8; HEX_CHUNK_SIZE * 2];
    while src.has_remaining() {
        let n = src.chunk().len().min(HEX_CHUNK_SIZE);
        let dst = &mut scratch[..n * 2];
        hex::encode_to_slice(&src.chunk()[..n], dst)
            .map_err(|e| PgWireError::Internal(format!("hex encode: {e}")))?;
        out.extend_from_slice(dst);
        src.advance(n);
    }

    Ok(out.freeze())
}

async fn accumulate(blob: &mut dyn Blob, mut acc: CompositeBuf) -> Result<CompositeBuf> {
    let mut chunks = blob.stream();
    while let Some(chunk) = chunks.next().await {
        acc.add_component(chunk?);
    }
    Ok(acc)
}

/// Owns an encode source until it has been discarded exactly once.
struct DiscardOnDrop(Option<Box<dyn Blob>>);

impl DiscardOnDrop {
    async fn discard(mut self) {
        if let Some(mut blob) = self.0.take() {
            blob.discard().await;
        }
    }
}

impl Drop for DiscardOnDrop {
    fn drop(&mut self) {
        let Some(mut blob) = self.0.take() else {
            return;
        };
        trace!("bytea parameter dropped before encoding finished");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { blob.discard().await });
            }
            Err(_) => {
                if blob.discard().now_or_never().is_none() {
                    warn!("bytea source discard did not complete outside a runtime");
                }
            }
        }
    }
}

/// Codec between TEXT-format `bytea` columns and [`Blob`] values.
#[derive(Debug, Clone)]
pub struct BlobCodec {
    allocator: SharedAllocator,
}

impl BlobCodec {
    pub fn new(allocator: SharedAllocator) -> BlobCodec {
        BlobCodec { allocator }
    }
}

impl Codec for BlobCodec {
    fn kind(&self) -> ValueKind {
        ValueKind::Blob
    }

    fn can_decode(&self, format: Format, oid: Oid, target: ValueKind) -> bool {
        format == Format::Text && oid == Oid::Bytea && target == ValueKind::Blob
    }

    fn decode(&self, buf: &Bytes, _format: Format, _target: ValueKind) -> Result<Value> {
        Ok(Value::Blob(Box::new(ByteaBlob::retain(buf))))
    }

    fn can_encode(&self, value: &Value) -> bool {
        matches!(value, Value::Blob(_))
    }

    fn encode(&self, value: Value) -> Result<Parameter> {
        let blob = match value {
            Value::Blob(blob) => blob,
            other => {
                return Err(PgWireError::Encode(format!(
                    "bytea codec cannot encode {other:?}"
                )));
            }
        };
        let allocator = self.allocator.clone();

        let mut source = DiscardOnDrop(Some(blob));

        Ok(Parameter::new(Format::Text, Oid::Bytea, async move {
            let hex = match source.0.as_deref_mut() {
                Some(blob) => match accumulate(blob, allocator.composite()).await {
                    Ok(acc) => to_hex_format(acc, allocator.as_ref()),
                    Err(e) => Err(e),
                },
                None => Err(PgWireError::Internal("bytea source already discarded".into())),
            };
            source.discard().await;
            hex
        }))
    }

    fn encode_null(&self) -> Parameter {
        Parameter::null(Format::Text, Oid::Bytea)
    }
}
