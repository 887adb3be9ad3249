use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::error::Result;
use crate::isolation::IsolationLevel;
use crate::transport::Transport;
use crate::types::Codecs;

use super::query::{QueryResult, Row, simple_query};
use super::startup::{BackendKey, StartupOutcome};

/// Server-side prepared statement names, keyed by SQL text.
pub trait StatementCache: Send + fmt::Debug {
    fn get(&self, sql: &str) -> Option<&str>;

    /// Remember `sql` and return the statement name to prepare it under.
    fn put(&mut self, sql: &str) -> String;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Never evicts.
#[derive(Debug, Default)]
pub struct IndefiniteStatementCache {
    names: HashMap<String, String>,
    next: u64,
}

impl StatementCache for IndefiniteStatementCache {
    fn get(&self, sql: &str) -> Option<&str> {
        self.names.get(sql).map(String::as_str)
    }

    fn put(&mut self, sql: &str) -> String {
        if let Some(name) = self.names.get(sql) {
            return name.clone();
        }
        let name = format!("S_{}", self.next);
        self.next += 1;
        self.names.insert(sql.to_string(), name.clone());
        name
    }

    fn len(&self) -> usize {
        self.names.len()
    }
}

/// Supplies unique portal names for extended-protocol executions.
pub trait PortalNameSupplier: Send + Sync + fmt::Debug {
    fn next_name(&self) -> String;
}

/// `B_0`, `B_1`, ...
#[derive(Debug, Default)]
pub struct DefaultPortalNameSupplier {
    counter: AtomicU64,
}

impl PortalNameSupplier for DefaultPortalNameSupplier {
    fn next_name(&self) -> String {
        format!("B_{}", self.counter.fetch_add(1, Ordering::Relaxed))
    }
}

/// An authenticated, initialized connection.
pub struct PgConnection<T: Transport> {
    transport: T,
    codecs: Arc<Codecs>,
    statements: Box<dyn StatementCache>,
    portal_names: Arc<dyn PortalNameSupplier>,
    isolation_level: IsolationLevel,
    force_binary: bool,
    parameters: HashMap<String, String>,
    backend_key: Option<BackendKey>,
}

impl<T: Transport> PgConnection<T> {
    pub(crate) fn new(
        transport: T,
        codecs: Arc<Codecs>,
        statements: Box<dyn StatementCache>,
        portal_names: Arc<dyn PortalNameSupplier>,
        isolation_level: IsolationLevel,
        force_binary: bool,
        startup: StartupOutcome,
    ) -> Self {
        Self {
            transport,
            codecs,
            statements,
            portal_names,
            isolation_level,
            force_binary,
            parameters: startup.parameters,
            backend_key: startup.backend_key,
        }
    }

    pub fn codecs(&self) -> &Arc<Codecs> {
        &self.codecs
    }

    /// Isolation level observed when the connection was created.
    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn force_binary(&self) -> bool {
        self.force_binary
    }

    /// A run-time parameter from `ParameterStatus`, e.g. `server_version`.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    pub fn process_id(&self) -> Option<i32> {
        self.backend_key.map(|k| k.process_id)
    }

    pub fn secret_key(&self) -> Option<i32> {
        self.backend_key.map(|k| k.secret_key)
    }

    pub fn statement_cache(&mut self) -> &mut dyn StatementCache {
        self.statements.as_mut()
    }

    pub fn next_portal_name(&self) -> String {
        self.portal_names.next_name()
    }

    /// Run `sql` and collect its rows.
    pub async fn simple_query(&mut self, sql: &str) -> Result<Vec<Row>> {
        Ok(self.query(sql).await?.rows)
    }

    /// Run `sql` and return the last command tag.
    pub async fn execute(&mut self, sql: &str) -> Result<String> {
        let mut result = self.query(sql).await?;
        Ok(result.tags.pop().unwrap_or_default())
    }

    async fn query(&mut self, sql: &str) -> Result<QueryResult> {
        simple_query(&mut self.transport, &self.codecs, sql).await
    }

    /// Send `Terminate` and close the transport.
    pub async fn close(mut self) -> Result<()> {
        debug!(process_id = ?self.process_id(), "closing connection");
        self.transport.close().await
    }
}

impl<T: Transport> fmt::Debug for PgConnection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgConnection")
            .field("isolation_level", &self.isolation_level)
            .field("force_binary", &self.force_binary)
            .field("backend_key", &self.backend_key)
            .field("statements", &self.statements.len())
            .finish_non_exhaustive()
    }
}
