//! Connection establishment.
//!
//! # Overview
//!
//! [`ConnectionFactory::create`] turns a [`ConnectionConfig`](crate::ConnectionConfig)
//! into a ready [`PgConnection`]:
//!
//! ```text
//!  connect (timeout)        startup exchange           initialization
//! ┌────────────────┐     ┌──────────────────────┐     ┌──────────────────────────┐
//! │ TCP [+ TLS]    │────►│ StartupMessage        │────►│ SHOW TRANSACTION         │
//! │ Connector      │     │ auth challenge/reply  │     │   ISOLATION LEVEL        │
//! └────────────────┘     │ ParameterStatus, Key  │     │ SET SCHEMA '<schema>'    │
//!                        │ ReadyForQuery         │     └──────────────────────────┘
//!                        └──────────────────────┘
//! ```
//!
//! Any failure after the transport is open closes it before the error is
//! returned; a half-initialized connection is never handed out.
//!
//! # Example
//!
//! ```ignore
//! use pgwire_client::{ConnectionConfig, ConnectionFactory};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConnectionConfig::new("localhost", "app", "secret", "appdb")
//!         .with_schema("billing");
//!
//!     let mut conn = ConnectionFactory::new(config).create().await?;
//!     println!("isolation level: {}", conn.isolation_level());
//!
//!     for row in conn.simple_query("SELECT 'hello'").await? {
//!         let s: Option<String> = row.get(0)?;
//!         println!("{s:?}");
//!     }
//!
//!     conn.close().await?;
//!     Ok(())
//! }
//! ```

mod connection;
mod factory;
mod query;
pub mod startup;

pub use connection::{
    DefaultPortalNameSupplier, IndefiniteStatementCache, PgConnection, PortalNameSupplier,
    StatementCache,
};
pub use factory::ConnectionFactory;
pub use query::{QueryResult, Row};
pub use startup::{BackendKey, ExchangeState, StartupExchange, StartupMessage, StartupOutcome};
