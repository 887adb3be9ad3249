use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{PgWireError, Result};

/// Protocol version 3.0.
pub const PROTOCOL_VERSION: i32 = 196608;

const SSL_REQUEST_CODE: i32 = 80877103;

/// Upper bound on a single backend message; larger lengths are treated as corruption.
const MAX_BACKEND_MESSAGE: usize = 1 << 30;

#[derive(Debug, Clone)]
pub struct BackendMessage {
    pub tag: u8,
    pub payload: Bytes, // payload excludes the 4-byte length field
}

pub async fn read_backend_message<R: AsyncRead + Unpin>(rd: &mut R) -> Result<BackendMessage> {
    let mut hdr = [0u8; 5];
    rd.read_exact(&mut hdr).await?;
    let tag = hdr[0];
    let len = i32::from_be_bytes([hdr[1], hdr[2], hdr[3], hdr[4]]);
    if len < 4 || len as usize > MAX_BACKEND_MESSAGE {
        return Err(PgWireError::Protocol(format!(
            "invalid backend message length: {len}"
        )));
    }
    let mut buf = BytesMut::zeroed(len as usize - 4);
    rd.read_exact(&mut buf).await?;
    Ok(BackendMessage {
        tag,
        payload: buf.freeze(),
    })
}

/// Messages the client sends after the startup packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrontendMessage {
    /// `PasswordMessage`: clear-text or MD5 digest, zero-terminated.
    Password(Bytes),
    /// `SASLInitialResponse`: mechanism name plus client-first-message.
    SaslInitialResponse { mechanism: String, data: Bytes },
    /// `SASLResponse`: client-final-message (or later responses).
    SaslResponse(Bytes),
    /// `Query`: simple query protocol.
    Query(String),
    /// `Terminate`.
    Terminate,
}

impl FrontendMessage {
    /// Encode into `buf` as `tag | i32 length | payload`.
    pub fn encode(&self, buf: &mut BytesMut) {
        let tag = match self {
            // PasswordMessage, SASLInitialResponse and SASLResponse share the 'p' tag.
            FrontendMessage::Password(_)
            | FrontendMessage::SaslInitialResponse { .. }
            | FrontendMessage::SaslResponse(_) => b'p',
            FrontendMessage::Query(_) => b'Q',
            FrontendMessage::Terminate => b'X',
        };

        let start = buf.len();
        buf.put_u8(tag);
        buf.put_i32(0); // length placeholder

        match self {
            FrontendMessage::Password(p) | FrontendMessage::SaslResponse(p) => {
                buf.extend_from_slice(p)
            }
            FrontendMessage::SaslInitialResponse { mechanism, data } => {
                buf.extend_from_slice(mechanism.as_bytes());
                buf.put_u8(0);
                buf.put_i32(data.len() as i32);
                buf.extend_from_slice(data);
            }
            FrontendMessage::Query(sql) => {
                buf.extend_from_slice(sql.as_bytes());
                buf.put_u8(0);
            }
            FrontendMessage::Terminate => {}
        }

        let len = (buf.len() - start - 1) as i32;
        buf[start + 1..start + 5].copy_from_slice(&len.to_be_bytes());
    }
}

pub async fn write_frontend_message<W: AsyncWrite + Unpin>(
    wr: &mut W,
    msg: &FrontendMessage,
) -> Result<()> {
    let mut buf = BytesMut::with_capacity(64);
    msg.encode(&mut buf);
    wr.write_all(&buf).await?;
    wr.flush().await?;
    Ok(())
}

pub async fn write_ssl_request<W: AsyncWrite + Unpin>(wr: &mut W) -> Result<()> {
    let mut buf = [0u8; 8];
    buf[0..4].copy_from_slice(&(8i32).to_be_bytes());
    buf[4..8].copy_from_slice(&SSL_REQUEST_CODE.to_be_bytes());
    wr.write_all(&buf).await?;
    wr.flush().await?;
    Ok(())
}

/// Encode the untagged startup packet.
pub fn encode_startup_message(protocol_version: i32, params: &[(&str, &str)]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(256);
    buf.put_i32(0); // length placeholder
    buf.put_i32(protocol_version);

    for (k, v) in params {
        buf.extend_from_slice(k.as_bytes());
        buf.put_u8(0);
        buf.extend_from_slice(v.as_bytes());
        buf.put_u8(0);
    }
    buf.put_u8(0); // terminator

    let len = buf.len() as i32;
    buf[0..4].copy_from_slice(&len.to_be_bytes());
    buf
}

pub async fn write_startup_message<W: AsyncWrite + Unpin>(
    wr: &mut W,
    protocol_version: i32,
    params: &[(&str, &str)],
) -> Result<()> {
    let buf = encode_startup_message(protocol_version, params);
    wr.write_all(&buf).await?;
    wr.flush().await?;
    Ok(())
}

pub async fn write_query<W: AsyncWrite + Unpin>(wr: &mut W, sql: &str) -> Result<()> {
    write_frontend_message(wr, &FrontendMessage::Query(sql.to_string())).await
}
