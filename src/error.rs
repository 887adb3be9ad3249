//! Error types for pgwire-client.
//!
//! All errors in this crate are represented by [`PgWireError`], which covers:
//! - I/O and transport errors (socket failures, connect timeouts)
//! - Protocol errors (malformed messages, unexpected responses)
//! - Server errors (PostgreSQL `ErrorResponse`, classified by SQLSTATE)
//! - Authentication errors (wrong password, unsupported method)
//! - Decode errors raised by codecs
//! - TLS errors (handshake failure, certificate issues)

use std::fmt;

use thiserror::Error;

use crate::protocol::messages::ErrorFields;
use crate::types::Oid;

/// Error type for all pgwire-client operations.
#[derive(Debug, Error, Clone)]
pub enum PgWireError {
    /// I/O error on an established transport.
    ///
    /// Note: `std::io::Error` is not `Clone`, so we store the message.
    #[error("io error: {0}")]
    Io(String),

    /// The transport could not be established (refused, unresolvable, timed out).
    #[error("cannot reach {host}:{port}: {message}")]
    Transport {
        host: String,
        port: u16,
        message: String,
    },

    /// Protocol error - malformed message or unexpected response.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Server error - PostgreSQL returned an `ErrorResponse`.
    #[error("server error: {0}")]
    Server(ServerError),

    /// Authentication error - wrong credentials or failed verification.
    #[error("authentication error: {0}")]
    Auth(String),

    /// No authentication handler supports the server's challenge.
    #[error("unsupported authentication method: {0}")]
    UnsupportedAuthentication(String),

    /// A codec rejected the wire representation of a value.
    #[error("decode error ({oid}): {message}")]
    Decode { oid: Oid, message: String },

    /// No codec can encode the given value.
    #[error("encode error: {0}")]
    Encode(String),

    /// Post-authentication session setup failed; the transport has been closed.
    #[error("cannot connect to {host}:{port}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: Box<PgWireError>,
    },

    /// TLS error - handshake failure, certificate validation, etc.
    #[error("tls error: {0}")]
    Tls(String),

    /// The connection attempt was cancelled by the caller.
    #[error("connection attempt cancelled")]
    Cancelled,

    /// Internal error - bug in the library.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PgWireError {
    /// Returns `true` if this is an I/O error.
    #[inline]
    pub fn is_io(&self) -> bool {
        matches!(self, PgWireError::Io(_))
    }

    /// Returns `true` if this is a server error, looking through [`PgWireError::Connect`].
    pub fn is_server(&self) -> bool {
        self.server_error().is_some()
    }

    /// Returns `true` if this is an authentication error.
    #[inline]
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            PgWireError::Auth(_) | PgWireError::UnsupportedAuthentication(_)
        )
    }

    /// Returns `true` if a codec rejected a value.
    #[inline]
    pub fn is_decode(&self) -> bool {
        matches!(self, PgWireError::Decode { .. })
    }

    /// Returns `true` if this error is likely transient and retryable.
    ///
    /// Transient errors include I/O and transport errors. Non-transient
    /// errors (auth, server, protocol) typically require configuration changes.
    pub fn is_transient(&self) -> bool {
        match self {
            PgWireError::Io(_) | PgWireError::Transport { .. } => true,
            PgWireError::Connect { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// The server-reported error, if this error carries one.
    pub fn server_error(&self) -> Option<&ServerError> {
        match self {
            PgWireError::Server(e) => Some(e),
            PgWireError::Connect { source, .. } => source.server_error(),
            _ => None,
        }
    }

    /// Map an `ErrorResponse` payload into an error.
    ///
    /// This is the one place server errors enter the crate; every protocol
    /// step that can observe an `E` message goes through here.
    pub fn from_error_response(payload: &[u8]) -> PgWireError {
        PgWireError::Server(ServerError::from(ErrorFields::parse(payload)))
    }

    pub(crate) fn decode(oid: Oid, message: impl Into<String>) -> PgWireError {
        PgWireError::Decode {
            oid,
            message: message.into(),
        }
    }
}

// Manual From impl since io::Error isn't Clone
impl From<std::io::Error> for PgWireError {
    fn from(err: std::io::Error) -> Self {
        PgWireError::Io(err.to_string())
    }
}

/// Result type alias for pgwire-client operations.
pub type Result<T> = std::result::Result<T, PgWireError>;

/// A structured PostgreSQL `ErrorResponse`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    pub severity: String,
    /// SQLSTATE code, e.g. `28P01`.
    pub code: String,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
}

impl ServerError {
    /// Category of the error derived from the SQLSTATE class (first two characters).
    pub fn class(&self) -> SqlStateClass {
        SqlStateClass::from_code(&self.code)
    }
}

impl From<ErrorFields> for ServerError {
    fn from(f: ErrorFields) -> Self {
        ServerError {
            severity: f.severity.unwrap_or_else(|| "ERROR".into()),
            code: f.code.unwrap_or_else(|| "XX000".into()),
            message: f.message.unwrap_or_else(|| "unknown server error".into()),
            detail: f.detail,
            hint: f.hint,
        }
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (SQLSTATE {})", self.message, self.code)?;
        if let Some(detail) = &self.detail {
            write!(f, ": {detail}")?;
        }
        Ok(())
    }
}

/// SQLSTATE classes the client distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlStateClass {
    /// `22` - data exception
    DataException,
    /// `23` - integrity constraint violation
    IntegrityConstraint,
    /// `28` - invalid authorization specification
    InvalidAuthorization,
    /// `3D` - invalid catalog name (unknown database)
    InvalidCatalog,
    /// `40` - transaction rollback
    TransactionRollback,
    /// `42` - syntax error or access rule violation
    SyntaxOrAccess,
    Other,
}

impl SqlStateClass {
    pub fn from_code(code: &str) -> SqlStateClass {
        match code.get(..2) {
            Some("22") => SqlStateClass::DataException,
            Some("23") => SqlStateClass::IntegrityConstraint,
            Some("28") => SqlStateClass::InvalidAuthorization,
            Some("3D") => SqlStateClass::InvalidCatalog,
            Some("40") => SqlStateClass::TransactionRollback,
            Some("42") => SqlStateClass::SyntaxOrAccess,
            _ => SqlStateClass::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error_payload(code: &str, message: &str) -> Vec<u8> {
        let mut p = Vec::new();
        p.extend_from_slice(b"SFATAL\0");
        p.push(b'C');
        p.extend_from_slice(code.as_bytes());
        p.push(0);
        p.push(b'M');
        p.extend_from_slice(message.as_bytes());
        p.push(0);
        p.push(0);
        p
    }

    #[test]
    fn error_response_maps_to_server_error() {
        let err = PgWireError::from_error_response(&error_payload(
            "28P01",
            "password authentication failed for user \"u\"",
        ));
        let server = err.server_error().unwrap();
        assert_eq!(server.code, "28P01");
        assert_eq!(server.severity, "FATAL");
        assert_eq!(server.class(), SqlStateClass::InvalidAuthorization);
        assert!(err.to_string().contains("SQLSTATE 28P01"));
    }

    #[test]
    fn connect_wrapper_exposes_inner_server_error() {
        let inner = PgWireError::from_error_response(&error_payload("3F000", "no schema"));
        let err = PgWireError::Connect {
            host: "db".into(),
            port: 5432,
            source: Box::new(inner),
        };
        assert!(err.is_server());
        assert_eq!(err.to_string(), "cannot connect to db:5432");
        assert_eq!(err.server_error().unwrap().code, "3F000");
    }

    #[test]
    fn sqlstate_classes() {
        assert_eq!(
            SqlStateClass::from_code("42P01"),
            SqlStateClass::SyntaxOrAccess
        );
        assert_eq!(
            SqlStateClass::from_code("3D000"),
            SqlStateClass::InvalidCatalog
        );
        assert_eq!(SqlStateClass::from_code("X"), SqlStateClass::Other);
    }

    #[test]
    fn transport_errors_are_transient() {
        let err = PgWireError::Transport {
            host: "db".into(),
            port: 5432,
            message: "connection refused".into(),
        };
        assert!(err.is_transient());
        assert!(!PgWireError::Protocol("x".into()).is_transient());
        assert!(PgWireError::UnsupportedAuthentication("gss".into()).is_auth());
    }
}
