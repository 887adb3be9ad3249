use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::auth::Credentials;
use crate::config::ConnectionConfig;
use crate::error::{PgWireError, Result};
use crate::isolation::IsolationLevel;
use crate::protocol::AuthenticationMessage;
use crate::transport::{Connector, TcpConnector, Transport};
use crate::types::Codecs;

use super::connection::{
    DefaultPortalNameSupplier, IndefiniteStatementCache, PgConnection, PortalNameSupplier,
};
use super::query::simple_query;
use super::startup::{StartupExchange, StartupMessage, StartupOutcome};

const ISOLATION_LEVEL_PROBE: &str = "SHOW TRANSACTION ISOLATION LEVEL";

/// What initialization learned before the connection handle is built.
struct Session {
    startup: StartupOutcome,
    codecs: Arc<Codecs>,
    isolation_level: IsolationLevel,
}

/// Creates authenticated, initialized connections, one attempt per call.
pub struct ConnectionFactory<C: Connector = TcpConnector> {
    connector: C,
    config: Arc<ConnectionConfig>,
    portal_names: Arc<dyn PortalNameSupplier>,
}

impl ConnectionFactory<TcpConnector> {
    pub fn new(config: ConnectionConfig) -> Self {
        let connector = TcpConnector::new(config.tls.clone());
        Self::with_connector(connector, config)
    }
}

impl<C: Connector> ConnectionFactory<C> {
    pub fn with_connector(connector: C, config: ConnectionConfig) -> Self {
        Self {
            connector,
            config: Arc::new(config),
            portal_names: Arc::new(DefaultPortalNameSupplier::default()),
        }
    }

    /// Share `supplier` between every connection this factory creates.
    pub fn with_portal_name_supplier(mut self, supplier: Arc<dyn PortalNameSupplier>) -> Self {
        self.portal_names = supplier;
        self
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Connect, authenticate and initialize a connection.
    ///
    /// Any failure after the transport is open closes it before the error is
    /// returned. Failures after authentication are wrapped in
    /// [`PgWireError::Connect`].
    pub async fn create(&self) -> Result<PgConnection<C::Transport>> {
        let mut transport = self.connect().await?;
        match self.initialize(&mut transport).await {
            Ok(session) => Ok(self.finish(transport, session)),
            Err(e) => Err(close_with(transport, e).await),
        }
    }

    /// [`create`](Self::create), abandoned with [`PgWireError::Cancelled`]
    /// once `stop` turns `true`. A transport that was already open is closed
    /// before `Cancelled` is returned.
    pub async fn create_until(
        &self,
        mut stop: watch::Receiver<bool>,
    ) -> Result<PgConnection<C::Transport>> {
        if *stop.borrow() {
            return Err(PgWireError::Cancelled);
        }

        let mut transport = tokio::select! {
            res = self.connect() => res?,
            _ = stopped(&mut stop) => {
                debug!(host = %self.config.host, "connection attempt cancelled while connecting");
                return Err(PgWireError::Cancelled);
            }
        };

        let initialized = tokio::select! {
            res = self.initialize(&mut transport) => Some(res),
            _ = stopped(&mut stop) => None,
        };

        match initialized {
            Some(Ok(session)) => Ok(self.finish(transport, session)),
            Some(Err(e)) => Err(close_with(transport, e).await),
            None => {
                debug!(host = %self.config.host, "connection attempt cancelled");
                Err(close_with(transport, PgWireError::Cancelled).await)
            }
        }
    }

    /// Startup exchange, isolation probe and schema, all on the open transport.
    async fn initialize(&self, transport: &mut C::Transport) -> Result<Session> {
        let startup = self.startup(transport).await?;
        let codecs = Arc::new(Codecs::new(transport.allocator()));

        let isolation_level = probe_isolation_level(transport, &codecs)
            .await
            .map_err(|e| self.connect_error(e))?;

        if let Some(schema) = &self.config.schema {
            let sql = format!("SET SCHEMA '{}'", schema.replace('\'', "''"));
            simple_query(transport, &codecs, &sql)
                .await
                .map_err(|e| self.connect_error(e))?;
        }

        Ok(Session {
            startup,
            codecs,
            isolation_level,
        })
    }

    fn finish(&self, transport: C::Transport, session: Session) -> PgConnection<C::Transport> {
        let cfg = &self.config;
        debug!(
            host = %cfg.host,
            port = cfg.port,
            isolation_level = %session.isolation_level,
            "connection ready"
        );
        PgConnection::new(
            transport,
            session.codecs,
            Box::new(IndefiniteStatementCache::default()),
            Arc::clone(&self.portal_names),
            session.isolation_level,
            cfg.force_binary,
            session.startup,
        )
    }

    async fn connect(&self) -> Result<C::Transport> {
        let cfg = &self.config;
        debug!(host = %cfg.host, port = cfg.port, "connecting");

        match tokio::time::timeout(cfg.connect_timeout, self.connector.connect(&cfg.host, cfg.port))
            .await
        {
            Ok(Ok(transport)) => Ok(transport),
            Ok(Err(e @ PgWireError::Transport { .. })) | Ok(Err(e @ PgWireError::Tls(_))) => Err(e),
            Ok(Err(e)) => Err(PgWireError::Transport {
                host: cfg.host.clone(),
                port: cfg.port,
                message: e.to_string(),
            }),
            Err(_) => Err(PgWireError::Transport {
                host: cfg.host.clone(),
                port: cfg.port,
                message: format!("connect timed out after {:?}", cfg.connect_timeout),
            }),
        }
    }

    async fn startup(&self, transport: &mut C::Transport) -> Result<StartupOutcome> {
        let credentials = Credentials::new(&self.config.user, &self.config.password);
        let exchange =
            StartupExchange::new(move |m: &AuthenticationMessage| credentials.handler_for(m));
        exchange
            .run(transport, &StartupMessage::from_config(&self.config))
            .await
    }

    fn connect_error(&self, source: PgWireError) -> PgWireError {
        PgWireError::Connect {
            host: self.config.host.clone(),
            port: self.config.port,
            source: Box::new(source),
        }
    }
}

/// Run the probe and decode its single text column. Missing, NULL or
/// unrecognized values fall back to `READ COMMITTED`.
async fn probe_isolation_level<T: Transport>(
    transport: &mut T,
    codecs: &Arc<Codecs>,
) -> Result<IsolationLevel> {
    let result = simple_query(transport, codecs, ISOLATION_LEVEL_PROBE).await?;

    let Some(row) = result.rows.first() else {
        debug!("isolation level probe returned no rows, assuming READ COMMITTED");
        return Ok(IsolationLevel::default());
    };

    let value = match row.get::<String>(0) {
        Ok(Some(value)) => value,
        Ok(None) => {
            debug!("isolation level probe returned NULL, assuming READ COMMITTED");
            return Ok(IsolationLevel::default());
        }
        Err(e) => {
            warn!(error = %e, "cannot decode isolation level, assuming READ COMMITTED");
            return Ok(IsolationLevel::default());
        }
    };

    Ok(value.parse().unwrap_or_else(|e| {
        warn!(error = %e, "unrecognized isolation level, assuming READ COMMITTED");
        IsolationLevel::default()
    }))
}

/// Close `transport`, then hand back `err`.
async fn close_with<T: Transport>(mut transport: T, err: PgWireError) -> PgWireError {
    debug!(error = %err, "closing transport after failed connection setup");
    if let Err(close_err) = transport.close().await {
        debug!(error = %close_err, "close after failure also failed");
    }
    err
}

async fn stopped(stop: &mut watch::Receiver<bool>) {
    if stop.wait_for(|s| *s).await.is_err() {
        // Sender gone without stopping: never cancel.
        std::future::pending::<()>().await;
    }
}
