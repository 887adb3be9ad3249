//! Byte transport under a connection.
//!
//! A [`Connector`] opens a [`Transport`] to `host:port`; the connection layer
//! only needs the stream halves, a buffer allocator and an orderly close.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tracing::debug;

use crate::buffer::{HeapAllocator, SharedAllocator};
use crate::config::TlsConfig;
use crate::error::{PgWireError, Result};
use crate::protocol::FrontendMessage;
use crate::protocol::framing::write_frontend_message;

/// A connected, possibly encrypted byte stream.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {
    /// Allocator codecs on this connection draw output buffers from.
    fn allocator(&self) -> SharedAllocator;

    /// Send `Terminate` and shut the stream down.
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;
}

/// Opens transports.
pub trait Connector: Send + Sync {
    type Transport: Transport;

    fn connect(
        &self,
        host: &str,
        port: u16,
    ) -> impl Future<Output = Result<Self::Transport>> + Send;
}

pub(crate) trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

/// Plain or TLS stream behind one type.
pub(crate) type BoxedStream = Box<dyn AsyncStream>;

/// TCP, upgraded to TLS per [`TlsConfig`].
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    tls: TlsConfig,
}

impl TcpConnector {
    pub fn new(tls: TlsConfig) -> TcpConnector {
        TcpConnector { tls }
    }
}

impl Connector for TcpConnector {
    type Transport = TcpTransport;

    async fn connect(&self, host: &str, port: u16) -> Result<TcpTransport> {
        let transport_err = |message: String| PgWireError::Transport {
            host: host.to_string(),
            port,
            message,
        };

        let tcp = TcpStream::connect((host, port))
            .await
            .map_err(|e| transport_err(e.to_string()))?;
        tcp.set_nodelay(true)
            .map_err(|e| transport_err(e.to_string()))?;
        debug!(host, port, "tcp connected");

        let stream = crate::tls::establish(tcp, &self.tls, host).await?;
        Ok(TcpTransport {
            stream,
            allocator: Arc::new(HeapAllocator),
        })
    }
}

pub struct TcpTransport {
    stream: BoxedStream,
    allocator: SharedAllocator,
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("allocator", &self.allocator)
            .finish_non_exhaustive()
    }
}

impl Transport for TcpTransport {
    fn allocator(&self) -> SharedAllocator {
        Arc::clone(&self.allocator)
    }

    async fn close(&mut self) -> Result<()> {
        write_frontend_message(&mut self.stream, &FrontendMessage::Terminate).await?;
        self.stream.shutdown().await?;
        Ok(())
    }
}

impl AsyncRead for TcpTransport {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for TcpTransport {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}
