use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SslMode {
    Disable,
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub mode: SslMode,
    pub ca_pem_path: Option<PathBuf>,
    pub sni_hostname: Option<String>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            mode: SslMode::Disable,
            ca_pem_path: None,
            sni_hostname: None,
        }
    }
}

/// Everything needed to open one connection. Read-only once handed to a
/// [`ConnectionFactory`](crate::ConnectionFactory).
#[derive(Clone)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,

    pub user: String,
    pub password: String,
    pub database: String,

    /// Reported to the server as `application_name`.
    pub application_name: String,

    /// Issued as `SET SCHEMA` right after connecting.
    pub schema: Option<String>,

    /// Session settings sent in the startup packet as `-c key=value`.
    pub options: HashMap<String, String>,

    /// Bound on establishing the transport (TCP connect plus TLS negotiation).
    pub connect_timeout: Duration,

    /// Prefer binary result format where the connection layer has a choice.
    pub force_binary: bool,

    pub tls: TlsConfig,
}

impl ConnectionConfig {
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            password: password.into(),
            database: database.into(),
            ..Self::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_force_binary(mut self, force_binary: bool) -> Self {
        self.force_binary = force_binary;
        self
    }

    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 5432,
            user: "postgres".into(),
            password: "postgres".into(),
            database: "postgres".into(),
            application_name: "pgwire-client".into(),
            schema: None,
            options: HashMap::new(),
            connect_timeout: Duration::from_secs(10),
            force_binary: false,
            tls: TlsConfig::default(),
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("application_name", &self.application_name)
            .field("schema", &self.schema)
            .field("options", &self.options)
            .field("connect_timeout", &self.connect_timeout)
            .field("force_binary", &self.force_binary)
            .field("tls", &self.tls)
            .finish()
    }
}
