#![warn(
    clippy::all,
    clippy::cargo,
    clippy::perf,
    clippy::style,
    clippy::correctness,
    clippy::suspicious
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::multiple_crate_versions
)]

pub mod auth;
pub mod buffer;
pub mod client;
pub mod config;
pub mod error;
pub mod isolation;
pub mod protocol;
mod tls;
pub mod transport;
pub mod types;

pub use client::{ConnectionFactory, ExchangeState, PgConnection, Row};
pub use config::{ConnectionConfig, SslMode, TlsConfig};
pub use error::{PgWireError, Result, ServerError, SqlStateClass};
pub use isolation::IsolationLevel;
pub use transport::{Connector, TcpConnector, TcpTransport, Transport};
pub use types::{Blob, BlobCodec, Codecs, Format, Oid, Parameter, Value};
