//! Authentication mechanisms for PostgreSQL connections.
//!
//! Each mechanism is an [`AuthenticationHandler`]: it consumes one server
//! challenge at a time and produces the client's reply. Handlers are chosen by
//! [`Credentials::handler_for`] from the first challenge of the exchange, in a
//! fixed priority order:
//!
//! 1. [`PasswordAuthenticationHandler`]: clear-text and (feature `md5`) MD5 passwords
//! 2. [`SaslAuthenticationHandler`] (feature `scram`): SCRAM-SHA-256
//!
//! # Feature Flags
//!
//! - `scram`: Enables SCRAM-SHA-256 authentication support. Adds dependencies on
//!   `sha2`, `hmac`, `rand`, and `base64`.
//! - `md5`: Enables MD5 password authentication. Adds a dependency on `md5`.
//!
//! # Unsupported Methods
//!
//! The following authentication methods are not supported and fail the
//! exchange with [`PgWireError::UnsupportedAuthentication`]:
//! - GSSAPI / Kerberos
//! - SSPI (Windows)
//! - SCRAM-SHA-256-PLUS (channel binding)

use std::fmt;

use crate::error::{PgWireError, Result};
use crate::protocol::{AuthenticationMessage, FrontendMessage};

mod password;
#[cfg(feature = "scram")]
pub mod scram;

pub use password::PasswordAuthenticationHandler;
#[cfg(feature = "scram")]
pub use scram::SaslAuthenticationHandler;

/// One server authentication mechanism's side of the exchange.
pub trait AuthenticationHandler: Send + fmt::Debug {
    /// Short mechanism name for logs, e.g. `password` or `SCRAM-SHA-256`.
    fn mechanism(&self) -> &'static str;

    /// Handle one challenge. `Ok(None)` means the server expects no reply.
    fn handle(&mut self, message: &AuthenticationMessage) -> Result<Option<FrontendMessage>>;

    /// Whether the mechanism has finished its side, so `AuthenticationOk` may
    /// be accepted. Mechanisms that authenticate the server return `false`
    /// until its proof has been verified.
    fn is_complete(&self) -> bool;
}

/// User name and password the handlers are instantiated with.
#[derive(Clone)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Credentials {
        Credentials {
            user: user.into(),
            password: password.into(),
        }
    }

    /// Instantiate the first handler that supports `message`.
    pub fn handler_for(
        &self,
        message: &AuthenticationMessage,
    ) -> Result<Box<dyn AuthenticationHandler>> {
        if PasswordAuthenticationHandler::supports(message) {
            return Ok(Box::new(PasswordAuthenticationHandler::new(
                &self.user,
                &self.password,
            )));
        }

        #[cfg(feature = "scram")]
        if SaslAuthenticationHandler::supports(message) {
            return Ok(Box::new(SaslAuthenticationHandler::new(
                &self.user,
                &self.password,
            )));
        }

        Err(PgWireError::UnsupportedAuthentication(describe(message)))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

fn describe(message: &AuthenticationMessage) -> String {
    match message {
        AuthenticationMessage::Sasl { mechanisms } => {
            format!("SASL mechanisms {mechanisms:?}")
        }
        AuthenticationMessage::Unsupported { code } => format!("auth request code {code}"),
        other => format!("{other:?}"),
    }
}
