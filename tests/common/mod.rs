//! Scripted PostgreSQL server over an in-memory duplex pipe.
#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use bytes::{BufMut, BytesMut};
use pgwire_client::buffer::{HeapAllocator, SharedAllocator};
use pgwire_client::{Connector, PgWireError, Result, Transport};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf, duplex};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Shared record of what the client side did to its transport.
pub type EventLog = Arc<Mutex<Vec<&'static str>>>;

pub struct MockTransport {
    stream: DuplexStream,
    log: EventLog,
}

impl Transport for MockTransport {
    fn allocator(&self) -> SharedAllocator {
        Arc::new(HeapAllocator)
    }

    async fn close(&mut self) -> Result<()> {
        self.log.lock().unwrap().push("close");
        self.stream.shutdown().await?;
        Ok(())
    }
}

impl AsyncRead for MockTransport {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for MockTransport {
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

/// Hands out one pre-connected transport.
pub struct MockConnector {
    client: Mutex<Option<DuplexStream>>,
    pub log: EventLog,
    pub connected_to: Mutex<Option<(String, u16)>>,
}

impl MockConnector {
    pub fn pair() -> (MockConnector, MockServer) {
        let (client, server) = duplex(64 * 1024);
        (
            MockConnector {
                client: Mutex::new(Some(client)),
                log: Arc::default(),
                connected_to: Mutex::new(None),
            },
            MockServer { stream: server },
        )
    }

    pub fn events(&self) -> Vec<&'static str> {
        self.log.lock().unwrap().clone()
    }
}

impl Connector for MockConnector {
    type Transport = MockTransport;

    async fn connect(&self, host: &str, port: u16) -> Result<MockTransport> {
        *self.connected_to.lock().unwrap() = Some((host.to_string(), port));
        let stream = self
            .client
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| PgWireError::Io("mock transport already used".into()))?;
        self.log.lock().unwrap().push("connect");
        Ok(MockTransport {
            stream,
            log: Arc::clone(&self.log),
        })
    }
}

/// Never completes a connect.
pub struct HangingConnector;

impl Connector for HangingConnector {
    type Transport = MockTransport;

    async fn connect(&self, _host: &str, _port: u16) -> Result<MockTransport> {
        std::future::pending().await
    }
}

/// Server end of the pipe.
pub struct MockServer {
    stream: DuplexStream,
}

impl MockServer {
    /// Read the untagged startup packet and return its parameters.
    pub async fn read_startup(&mut self) -> HashMap<String, String> {
        let len = self.stream.read_i32().await.unwrap() as usize;
        let mut body = vec![0u8; len - 4];
        self.stream.read_exact(&mut body).await.unwrap();
        assert_eq!(&body[..4], &196608i32.to_be_bytes());

        let mut params = HashMap::new();
        let mut fields = body[4..].split(|b| *b == 0).map(|s| String::from_utf8_lossy(s).into_owned());
        while let (Some(k), Some(v)) = (fields.next(), fields.next()) {
            if k.is_empty() {
                break;
            }
            params.insert(k, v);
        }
        params
    }

    pub async fn read_message(&mut self) -> (u8, Vec<u8>) {
        let tag = self.stream.read_u8().await.unwrap();
        let len = self.stream.read_i32().await.unwrap() as usize;
        let mut body = vec![0u8; len - 4];
        self.stream.read_exact(&mut body).await.unwrap();
        (tag, body)
    }

    /// Read a `Query` and return its SQL.
    pub async fn expect_query(&mut self) -> String {
        let (tag, body) = self.read_message().await;
        assert_eq!(tag, b'Q');
        String::from_utf8(body[..body.len() - 1].to_vec()).unwrap()
    }

    /// Read a `PasswordMessage` and return its payload without the NUL.
    pub async fn expect_password(&mut self) -> String {
        let (tag, body) = self.read_message().await;
        assert_eq!(tag, b'p');
        String::from_utf8(body[..body.len() - 1].to_vec()).unwrap()
    }

    pub async fn send(&mut self, tag: u8, payload: &[u8]) {
        let mut b = BytesMut::with_capacity(payload.len() + 5);
        b.put_u8(tag);
        b.put_i32(payload.len() as i32 + 4);
        b.extend_from_slice(payload);
        self.stream.write_all(&b).await.unwrap();
    }

    pub async fn auth(&mut self, code: i32, rest: &[u8]) {
        let mut p = code.to_be_bytes().to_vec();
        p.extend_from_slice(rest);
        self.send(b'R', &p).await;
    }

    pub async fn error(&mut self, severity: &str, code: &str, message: &str) {
        let p = format!("S{severity}\0C{code}\0M{message}\0\0");
        self.send(b'E', p.as_bytes()).await;
    }

    /// `AuthenticationOk` through `ReadyForQuery`.
    pub async fn finish_startup(&mut self) {
        self.auth(0, b"").await;
        self.send(b'S', b"server_version\x0016.4\0").await;
        self.send(b'S', b"client_encoding\0UTF8\0").await;
        self.send(b'K', &[0, 0, 0x30, 0x39, 0, 0, 0, 42]).await;
        self.ready().await;
    }

    pub async fn ready(&mut self) {
        self.send(b'Z', b"I").await;
    }

    /// One text column named `name` with a single row holding `value`.
    pub async fn single_value(&mut self, name: &str, value: Option<&str>) {
        let mut t = BytesMut::new();
        t.put_i16(1);
        t.extend_from_slice(name.as_bytes());
        t.put_u8(0);
        t.put_u32(0);
        t.put_i16(0);
        t.put_u32(25);
        t.put_i16(-1);
        t.put_i32(-1);
        t.put_i16(0);
        self.send(b'T', &t).await;

        let mut d = BytesMut::new();
        d.put_i16(1);
        match value {
            Some(v) => {
                d.put_i32(v.len() as i32);
                d.extend_from_slice(v.as_bytes());
            }
            None => d.put_i32(-1),
        }
        self.send(b'D', &d).await;
        self.send(b'C', b"SHOW\0").await;
        self.ready().await;
    }

    /// Answer a `SHOW` that produced no rows.
    pub async fn no_rows(&mut self) {
        self.send(b'C', b"SHOW\0").await;
        self.ready().await;
    }

    pub async fn command_complete(&mut self, tag: &str) {
        self.send(b'C', format!("{tag}\0").as_bytes()).await;
        self.ready().await;
    }

    /// Bytes until the client closes its end.
    pub async fn read_to_end(&mut self) -> Vec<u8> {
        let mut rest = Vec::new();
        let _ = self.stream.read_to_end(&mut rest).await;
        rest
    }
}
