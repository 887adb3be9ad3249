use bytes::Bytes;

use crate::error::{PgWireError, Result};
use crate::protocol::{AuthenticationMessage, FrontendMessage};

use super::AuthenticationHandler;

/// Answers `AuthenticationCleartextPassword` and `AuthenticationMD5Password`.
#[derive(Clone)]
pub struct PasswordAuthenticationHandler {
    #[cfg_attr(not(feature = "md5"), allow(dead_code))]
    user: String,
    password: String,
}

impl PasswordAuthenticationHandler {
    pub fn new(user: &str, password: &str) -> Self {
        Self {
            user: user.to_string(),
            password: password.to_string(),
        }
    }

    pub fn supports(message: &AuthenticationMessage) -> bool {
        match message {
            AuthenticationMessage::CleartextPassword => true,
            #[cfg(feature = "md5")]
            AuthenticationMessage::Md5Password { .. } => true,
            _ => false,
        }
    }
}

impl std::fmt::Debug for PasswordAuthenticationHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordAuthenticationHandler")
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

impl AuthenticationHandler for PasswordAuthenticationHandler {
    fn mechanism(&self) -> &'static str {
        "password"
    }

    fn is_complete(&self) -> bool {
        true
    }

    fn handle(&mut self, message: &AuthenticationMessage) -> Result<Option<FrontendMessage>> {
        match message {
            AuthenticationMessage::CleartextPassword => {
                let mut p = Vec::from(self.password.as_bytes());
                p.push(0);
                Ok(Some(FrontendMessage::Password(Bytes::from(p))))
            }
            #[cfg(feature = "md5")]
            AuthenticationMessage::Md5Password { salt } => {
                let mut p = postgres_md5(&self.password, &self.user, salt).into_bytes();
                p.push(0);
                Ok(Some(FrontendMessage::Password(Bytes::from(p))))
            }
            other => Err(PgWireError::Protocol(format!(
                "unexpected {other:?} during password authentication"
            ))),
        }
    }
}

/// `"md5" || hex(md5(hex(md5(password || user)) || salt))`
#[cfg(feature = "md5")]
fn postgres_md5(password: &str, user: &str, salt: &[u8; 4]) -> String {
    fn md5_hex(bytes: &[u8]) -> String {
        format!("{:x}", md5::compute(bytes))
    }
    let inner = md5_hex(format!("{password}{user}").as_bytes());
    let mut outer = Vec::with_capacity(inner.len() + 4);
    outer.extend_from_slice(inner.as_bytes());
    outer.extend_from_slice(salt);
    format!("md5{}", md5_hex(&outer))
}
