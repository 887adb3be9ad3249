//! SCRAM-SHA-256 over SASL (RFC 5802, RFC 7677).
//!
//! The handler walks three server challenges:
//!
//! ```text
//! AuthenticationSASL          -> SASLInitialResponse  (client-first)
//! AuthenticationSASLContinue  -> SASLResponse         (client-final, with proof)
//! AuthenticationSASLFinal     -> (nothing, server signature verified locally)
//! ```
//!
//! Channel binding is not offered (`n,,` / `biws`).

use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use bytes::Bytes;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::trace;

use crate::error::{PgWireError, Result};
use crate::protocol::{AuthenticationMessage, FrontendMessage};

use super::AuthenticationHandler;

type HmacSha256 = Hmac<Sha256>;

pub const SCRAM_SHA_256: &str = "SCRAM-SHA-256";

/// Where the handler is in the SCRAM conversation.
enum ScramState {
    Initial,
    ClientFirstSent {
        nonce: String,
        client_first_bare: String,
    },
    ClientFinalSent {
        auth_message: String,
        salted_password: Vec<u8>,
    },
    Verified,
}

impl ScramState {
    fn name(&self) -> &'static str {
        match self {
            ScramState::Initial => "initial",
            ScramState::ClientFirstSent { .. } => "client-first-sent",
            ScramState::ClientFinalSent { .. } => "client-final-sent",
            ScramState::Verified => "verified",
        }
    }
}

/// Client side of a SCRAM-SHA-256 exchange.
pub struct SaslAuthenticationHandler {
    user: String,
    password: String,
    nonce: Option<String>,
    state: ScramState,
}

impl SaslAuthenticationHandler {
    pub fn new(user: &str, password: &str) -> Self {
        Self {
            user: user.to_string(),
            password: password.to_string(),
            nonce: None,
            state: ScramState::Initial,
        }
    }

    /// Fixed client nonce instead of a random one.
    #[cfg(test)]
    pub(crate) fn with_nonce(user: &str, password: &str, nonce: &str) -> Self {
        Self {
            nonce: Some(nonce.to_string()),
            ..Self::new(user, password)
        }
    }

    /// True for an `AuthenticationSASL` offering SCRAM-SHA-256.
    pub fn supports(message: &AuthenticationMessage) -> bool {
        matches!(
            message,
            AuthenticationMessage::Sasl { mechanisms }
                if mechanisms.iter().any(|m| m == SCRAM_SHA_256)
        )
    }

    fn client_first(&mut self) -> FrontendMessage {
        let nonce = self.nonce.take().unwrap_or_else(|| {
            let mut raw = [0u8; 18];
            rand::rng().fill_bytes(&mut raw);
            B64.encode(raw)
        });
        let client_first_bare = format!("n={},r={nonce}", sasl_escape_username(&self.user));
        let data = Bytes::from(format!("n,,{client_first_bare}"));

        self.state = ScramState::ClientFirstSent {
            nonce,
            client_first_bare,
        };
        FrontendMessage::SaslInitialResponse {
            mechanism: SCRAM_SHA_256.to_string(),
            data,
        }
    }

    fn client_final(
        &self,
        nonce: &str,
        client_first_bare: &str,
        server_first: &str,
    ) -> Result<(String, String, Vec<u8>)> {
        let (rnonce, salt_b64, iters) = parse_server_first(server_first)?;

        if !rnonce.starts_with(nonce) {
            return Err(PgWireError::Auth(
                "SCRAM nonce mismatch: server nonce doesn't include client nonce".into(),
            ));
        }

        let salt = B64
            .decode(salt_b64.as_bytes())
            .map_err(|e| PgWireError::Auth(format!("SCRAM invalid salt base64: {e}")))?;

        let client_final_wo_proof = format!("c=biws,r={rnonce}");
        let auth_message = format!("{client_first_bare},{server_first},{client_final_wo_proof}");

        let salted_password = hi_sha256(self.password.as_bytes(), &salt, iters);
        let client_key = hmac_sha256(&salted_password, b"Client Key");
        let stored_key = Sha256::digest(&client_key);
        let client_sig = hmac_sha256(stored_key.as_slice(), auth_message.as_bytes());
        let proof = xor_bytes(&client_key, &client_sig);

        let client_final = format!("{client_final_wo_proof},p={}", B64.encode(proof));
        Ok((client_final, auth_message, salted_password))
    }
}

impl std::fmt::Debug for SaslAuthenticationHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaslAuthenticationHandler")
            .field("user", &self.user)
            .field("state", &self.state.name())
            .finish_non_exhaustive()
    }
}

impl AuthenticationHandler for SaslAuthenticationHandler {
    fn mechanism(&self) -> &'static str {
        SCRAM_SHA_256
    }

    fn is_complete(&self) -> bool {
        matches!(self.state, ScramState::Verified)
    }

    fn handle(&mut self, message: &AuthenticationMessage) -> Result<Option<FrontendMessage>> {
        trace!(state = self.state.name(), "scram challenge");
        match (message, &self.state) {
            (AuthenticationMessage::Sasl { .. }, ScramState::Initial) => {
                Ok(Some(self.client_first()))
            }
            (
                AuthenticationMessage::SaslContinue { data },
                ScramState::ClientFirstSent {
                    nonce,
                    client_first_bare,
                },
            ) => {
                let server_first = std::str::from_utf8(data)
                    .map_err(|e| PgWireError::Auth(format!("SCRAM server-first not utf-8: {e}")))?;
                let (client_final, auth_message, salted_password) =
                    self.client_final(nonce, client_first_bare, server_first)?;

                self.state = ScramState::ClientFinalSent {
                    auth_message,
                    salted_password,
                };
                Ok(Some(FrontendMessage::SaslResponse(Bytes::from(client_final))))
            }
            (
                AuthenticationMessage::SaslFinal { data },
                ScramState::ClientFinalSent {
                    auth_message,
                    salted_password,
                },
            ) => {
                let server_final = std::str::from_utf8(data)
                    .map_err(|e| PgWireError::Auth(format!("SCRAM server-final not utf-8: {e}")))?;
                verify_server_final(server_final, salted_password, auth_message)?;
                self.state = ScramState::Verified;
                Ok(None)
            }
            (other, state) => Err(PgWireError::Protocol(format!(
                "unexpected {other:?} in SCRAM state {}",
                state.name()
            ))),
        }
    }
}

/// Returns `(nonce, salt_b64, iterations)` from a server-first-message.
fn parse_server_first(server_first: &str) -> Result<(String, String, u32)> {
    let mut r = None;
    let mut s = None;
    let mut i = None;

    for part in server_first.split(',') {
        if let Some(v) = part.strip_prefix("r=") {
            r = Some(v.to_string());
        } else if let Some(v) = part.strip_prefix("s=") {
            s = Some(v.to_string());
        } else if let Some(v) = part.strip_prefix("i=") {
            i = v.parse::<u32>().ok().filter(|n| *n > 0);
        }
    }

    Ok((
        r.ok_or_else(|| PgWireError::Auth("SCRAM server-first missing nonce (r=)".into()))?,
        s.ok_or_else(|| PgWireError::Auth("SCRAM server-first missing salt (s=)".into()))?,
        i.ok_or_else(|| {
            PgWireError::Auth("SCRAM server-first missing or invalid iteration count (i=)".into())
        })?,
    ))
}

fn verify_server_final(server_final: &str, salted_password: &[u8], auth_message: &str) -> Result<()> {
    if let Some(err) = server_final.split(',').find_map(|p| p.strip_prefix("e=")) {
        return Err(PgWireError::Auth(format!("SCRAM server error: {err}")));
    }

    let v = server_final
        .split(',')
        .find_map(|p| p.strip_prefix("v="))
        .ok_or_else(|| PgWireError::Auth("SCRAM server-final missing signature (v=)".into()))?;

    let server_sig = B64
        .decode(v.trim().as_bytes())
        .map_err(|e| PgWireError::Auth(format!("SCRAM invalid server signature base64: {e}")))?;

    if !constant_time_eq(&server_sig, &server_signature(salted_password, auth_message)) {
        return Err(PgWireError::Auth(
            "SCRAM server signature mismatch: server may not know the password".into(),
        ));
    }
    Ok(())
}

fn server_signature(salted_password: &[u8], auth_message: &str) -> Vec<u8> {
    let server_key = hmac_sha256(salted_password, b"Server Key");
    hmac_sha256(&server_key, auth_message.as_bytes())
}

/// `n=` attribute escaping: `=` to `=3D`, `,` to `=2C`.
fn sasl_escape_username(u: &str) -> String {
    u.replace('=', "=3D").replace(',', "=2C")
}

/// Hi() from RFC 5802, i.e. PBKDF2-HMAC-SHA256 with one output block.
fn hi_sha256(password: &[u8], salt: &[u8], iters: u32) -> Vec<u8> {
    let mut s1 = Vec::with_capacity(salt.len() + 4);
    s1.extend_from_slice(salt);
    s1.extend_from_slice(&1u32.to_be_bytes());

    let mut u = hmac_sha256(password, &s1);
    let mut out = u.clone();
    for _ in 1..iters {
        u = hmac_sha256(password, &u);
        for (o, ui) in out.iter_mut().zip(u.iter()) {
            *o ^= *ui;
        }
    }
    out
}

fn hmac_sha256(key: &[u8], msg: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(msg);
    mac.finalize().into_bytes().to_vec()
}

fn xor_bytes(a: &[u8], b: &[u8]) -> Vec<u8> {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(x, y)| x ^ y).collect()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// What a server holding `password` would answer to `client_final`.
/// Used by tests that play the server side of the exchange.
#[cfg(test)]
pub(crate) fn server_final_for(
    password: &str,
    salt: &[u8],
    iters: u32,
    client_first: &str,
    server_first: &str,
    client_final: &str,
) -> String {
    let client_first_bare = client_first.trim_start_matches("n,,");
    let without_proof = client_final
        .rsplit_once(",p=")
        .map(|(head, _)| head)
        .unwrap_or(client_final);
    let auth_message = format!("{client_first_bare},{server_first},{without_proof}");
    let salted = hi_sha256(password.as_bytes(), salt, iters);
    format!("v={}", B64.encode(server_signature(&salted, &auth_message)))
}
