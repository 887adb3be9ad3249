use std::collections::HashMap;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, trace};

use crate::auth::AuthenticationHandler;
use crate::config::ConnectionConfig;
use crate::error::{PgWireError, Result};
use crate::protocol::framing::{
    PROTOCOL_VERSION, read_backend_message, write_frontend_message, write_startup_message,
};
use crate::protocol::messages::{parse_backend_key_data, parse_parameter_status};
use crate::protocol::{AuthenticationMessage, BackendMessage, FrontendMessage};

/// States of the startup/authentication exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Init,
    StartupSent,
    AuthChallengeReceived,
    AuthResponseSent,
    Authenticated,
    Ready,
    Failed,
}

/// Process id and secret key from `BackendKeyData`, needed to cancel queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendKey {
    pub process_id: i32,
    pub secret_key: i32,
}

/// Contents of the startup packet.
#[derive(Debug, Clone)]
pub struct StartupMessage {
    pub user: String,
    pub database: String,
    pub application_name: String,
    /// Rendered into the `options` parameter as `-c key=value`.
    pub options: Vec<(String, String)>,
}

impl StartupMessage {
    pub fn from_config(cfg: &ConnectionConfig) -> StartupMessage {
        let mut options: Vec<_> = cfg
            .options
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        options.sort();

        StartupMessage {
            user: cfg.user.clone(),
            database: cfg.database.clone(),
            application_name: cfg.application_name.clone(),
            options,
        }
    }

    fn rendered_options(&self) -> Option<String> {
        if self.options.is_empty() {
            return None;
        }
        let parts: Vec<String> = self
            .options
            .iter()
            .map(|(k, v)| format!("-c {k}={}", escape_option_value(v)))
            .collect();
        Some(parts.join(" "))
    }

    pub async fn write<W: AsyncWrite + Unpin>(&self, wr: &mut W) -> Result<()> {
        let options = self.rendered_options();
        let mut params = vec![
            ("user", self.user.as_str()),
            ("database", self.database.as_str()),
            ("application_name", self.application_name.as_str()),
            ("client_encoding", "UTF8"),
        ];
        if let Some(options) = options.as_deref() {
            params.push(("options", options));
        }
        write_startup_message(wr, PROTOCOL_VERSION, &params).await
    }
}

/// Spaces and backslashes in `options` values are backslash-escaped.
fn escape_option_value(v: &str) -> String {
    let mut out = String::with_capacity(v.len());
    for c in v.chars() {
        if c == ' ' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// What the server told us during startup.
#[derive(Debug, Default)]
pub struct StartupOutcome {
    pub parameters: HashMap<String, String>,
    pub backend_key: Option<BackendKey>,
    /// Mechanism of the handler that answered, `None` for trust authentication.
    pub mechanism: Option<&'static str>,
    /// Messages the exchange does not consume itself (notices and the like),
    /// in arrival order.
    pub passthrough: Vec<BackendMessage>,
}

/// What the driver should do after feeding one backend message.
#[derive(Debug, PartialEq, Eq)]
pub enum Step {
    /// Write this message and keep reading.
    Send(FrontendMessage),
    /// Keep reading.
    Wait,
    /// `ReadyForQuery` seen; the connection is usable.
    Done,
}

/// Startup and authentication state machine.
///
/// The handler for the exchange is instantiated lazily from the first
/// authentication challenge through `select`, and then drives every later
/// challenge. [`on_message`](Self::on_message) is I/O free; [`run`](Self::run)
/// drives it over a stream.
pub struct StartupExchange<F> {
    select: F,
    handler: Option<Box<dyn AuthenticationHandler>>,
    state: ExchangeState,
    transitions: Vec<ExchangeState>,
    outcome: StartupOutcome,
}

impl<F> StartupExchange<F>
where
    F: FnMut(&AuthenticationMessage) -> Result<Box<dyn AuthenticationHandler>>,
{
    pub fn new(select: F) -> Self {
        Self {
            select,
            handler: None,
            state: ExchangeState::Init,
            transitions: vec![ExchangeState::Init],
            outcome: StartupOutcome::default(),
        }
    }

    pub fn state(&self) -> ExchangeState {
        self.state
    }

    /// Every state entered so far, starting with `Init`.
    pub fn transitions(&self) -> &[ExchangeState] {
        &self.transitions
    }

    fn transition(&mut self, to: ExchangeState) {
        trace!(from = ?self.state, to = ?to, "startup transition");
        self.state = to;
        self.transitions.push(to);
    }

    /// Record that the startup packet went out.
    pub fn startup_sent(&mut self) -> Result<()> {
        if self.state != ExchangeState::Init {
            return Err(PgWireError::Internal(format!(
                "startup sent in state {:?}",
                self.state
            )));
        }
        self.transition(ExchangeState::StartupSent);
        Ok(())
    }

    /// Feed one backend message. Any error moves the exchange to `Failed`.
    pub fn on_message(&mut self, msg: BackendMessage) -> Result<Step> {
        match self.step(msg) {
            Ok(step) => Ok(step),
            Err(e) => {
                if self.state != ExchangeState::Failed {
                    self.transition(ExchangeState::Failed);
                }
                Err(e)
            }
        }
    }

    fn step(&mut self, msg: BackendMessage) -> Result<Step> {
        match self.state {
            ExchangeState::Init | ExchangeState::Ready | ExchangeState::Failed => {
                return Err(PgWireError::Internal(format!(
                    "backend message {:?} in state {:?}",
                    char::from(msg.tag),
                    self.state
                )));
            }
            _ => {}
        }

        match msg.tag {
            b'E' => Err(PgWireError::from_error_response(&msg.payload)),
            b'R' => self.on_authentication(AuthenticationMessage::parse(&msg.payload)?),
            b'S' => {
                let (name, value) = parse_parameter_status(msg.payload)?;
                trace!(%name, %value, "parameter status");
                self.outcome.parameters.insert(name, value);
                Ok(Step::Wait)
            }
            b'K' => {
                let (process_id, secret_key) = parse_backend_key_data(&msg.payload)?;
                self.outcome.backend_key = Some(BackendKey {
                    process_id,
                    secret_key,
                });
                Ok(Step::Wait)
            }
            b'Z' => {
                if self.state != ExchangeState::Authenticated {
                    return Err(PgWireError::Protocol(format!(
                        "ReadyForQuery in state {:?}",
                        self.state
                    )));
                }
                self.transition(ExchangeState::Ready);
                Ok(Step::Done)
            }
            _ => {
                self.outcome.passthrough.push(msg);
                Ok(Step::Wait)
            }
        }
    }

    fn on_authentication(&mut self, auth: AuthenticationMessage) -> Result<Step> {
        if self.state == ExchangeState::Authenticated {
            return Err(PgWireError::Protocol(
                "authentication request after AuthenticationOk".into(),
            ));
        }

        if auth.is_ok() {
            if let Some(handler) = self.handler.as_ref().filter(|h| !h.is_complete()) {
                return Err(PgWireError::Auth(format!(
                    "AuthenticationOk before {} exchange completed",
                    handler.mechanism()
                )));
            }
            self.transition(ExchangeState::Authenticated);
            return Ok(Step::Wait);
        }

        self.transition(ExchangeState::AuthChallengeReceived);

        if self.handler.is_none() {
            let handler = (self.select)(&auth)?;
            debug!(mechanism = handler.mechanism(), "authenticating");
            self.outcome.mechanism = Some(handler.mechanism());
            self.handler = Some(handler);
        }
        let Some(handler) = self.handler.as_mut() else {
            return Err(PgWireError::Internal("no authentication handler".into()));
        };

        match handler.handle(&auth)? {
            Some(reply) => {
                self.transition(ExchangeState::AuthResponseSent);
                Ok(Step::Send(reply))
            }
            None => Ok(Step::Wait),
        }
    }

    /// Send `startup` and run the exchange to `ReadyForQuery`.
    pub async fn run<S>(mut self, stream: &mut S, startup: &StartupMessage) -> Result<StartupOutcome>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if let Err(e) = startup.write(stream).await {
            self.transition(ExchangeState::Failed);
            return Err(e);
        }
        self.startup_sent()?;

        loop {
            let msg = match read_backend_message(stream).await {
                Ok(msg) => msg,
                Err(e) => {
                    self.transition(ExchangeState::Failed);
                    return Err(e);
                }
            };

            match self.on_message(msg)? {
                Step::Send(reply) => {
                    if let Err(e) = write_frontend_message(stream, &reply).await {
                        self.transition(ExchangeState::Failed);
                        return Err(e);
                    }
                }
                Step::Wait => {}
                Step::Done => return Ok(self.outcome),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::{BufMut, Bytes, BytesMut};

    use super::*;
    use crate::auth::Credentials;

    fn auth(code: i32, rest: &[u8]) -> BackendMessage {
        let mut b = BytesMut::new();
        b.put_i32(code);
        b.extend_from_slice(rest);
        BackendMessage {
            tag: b'R',
            payload: b.freeze(),
        }
    }

    fn msg(tag: u8, payload: &'static [u8]) -> BackendMessage {
        BackendMessage {
            tag,
            payload: Bytes::from_static(payload),
        }
    }

    fn exchange(
        creds: Credentials,
    ) -> StartupExchange<impl FnMut(&AuthenticationMessage) -> Result<Box<dyn AuthenticationHandler>>>
    {
        let mut ex = StartupExchange::new(move |m: &AuthenticationMessage| creds.handler_for(m));
        ex.startup_sent().unwrap();
        ex
    }

    use ExchangeState::*;

    // ==================== Password ====================

    #[test]
    fn cleartext_exchange_reaches_ready() {
        let mut ex = exchange(Credentials::new("u", "p"));

        let step = ex.on_message(auth(3, b"")).unwrap();
        assert_eq!(
            step,
            Step::Send(FrontendMessage::Password(Bytes::from_static(b"p\0")))
        );
        assert_eq!(ex.on_message(auth(0, b"")).unwrap(), Step::Wait);
        assert_eq!(
            ex.on_message(msg(b'S', b"server_version\x0016.2\0")).unwrap(),
            Step::Wait
        );
        assert_eq!(
            ex.on_message(msg(b'K', &[0, 0, 0, 7, 0, 0, 0, 9])).unwrap(),
            Step::Wait
        );
        assert_eq!(ex.on_message(msg(b'Z', b"I")).unwrap(), Step::Done);

        assert_eq!(
            ex.transitions(),
            &[
                Init,
                StartupSent,
                AuthChallengeReceived,
                AuthResponseSent,
                Authenticated,
                Ready
            ]
        );
        assert_eq!(ex.outcome.mechanism, Some("password"));
        assert_eq!(ex.outcome.parameters["server_version"], "16.2");
        assert_eq!(
            ex.outcome.backend_key,
            Some(BackendKey {
                process_id: 7,
                secret_key: 9
            })
        );
    }

    #[test]
    fn trust_authentication_skips_challenge_states() {
        let mut ex = exchange(Credentials::new("u", "p"));
        ex.on_message(auth(0, b"")).unwrap();
        ex.on_message(msg(b'Z', b"I")).unwrap();
        assert_eq!(ex.transitions(), &[Init, StartupSent, Authenticated, Ready]);
        assert_eq!(ex.outcome.mechanism, None);
    }

    #[test]
    fn handler_is_selected_once() {
        let mut calls = 0;
        let creds = Credentials::new("u", "p");
        let mut ex = StartupExchange::new(|m: &AuthenticationMessage| {
            calls += 1;
            creds.handler_for(m)
        });
        ex.startup_sent().unwrap();
        ex.on_message(auth(3, b"")).unwrap();
        ex.on_message(auth(3, b"")).unwrap();
        drop(ex);
        assert_eq!(calls, 1);
    }

    // ==================== SCRAM ====================

    #[cfg(feature = "scram")]
    #[test]
    fn scram_exchange_loops_per_round() {
        use crate::auth::SaslAuthenticationHandler;
        use crate::auth::scram::server_final_for;
        use base64::Engine as _;

        let salt = b"saltsaltsaltsalt";
        let mut ex = StartupExchange::new(|_: &AuthenticationMessage| {
            Ok(Box::new(SaslAuthenticationHandler::with_nonce("u", "p", "cn"))
                as Box<dyn AuthenticationHandler>)
        });
        ex.startup_sent().unwrap();

        let client_first = match ex.on_message(auth(10, b"SCRAM-SHA-256\0\0")).unwrap() {
            Step::Send(FrontendMessage::SaslInitialResponse { data, .. }) => {
                String::from_utf8(data.to_vec()).unwrap()
            }
            other => panic!("unexpected {other:?}"),
        };

        let server_first = format!(
            "r=cnSRV,s={},i=64",
            base64::engine::general_purpose::STANDARD.encode(salt)
        );
        let client_final = match ex.on_message(auth(11, server_first.as_bytes())).unwrap() {
            Step::Send(FrontendMessage::SaslResponse(data)) => {
                String::from_utf8(data.to_vec()).unwrap()
            }
            other => panic!("unexpected {other:?}"),
        };

        let server_final =
            server_final_for("p", salt, 64, &client_first, &server_first, &client_final);
        assert_eq!(
            ex.on_message(auth(12, server_final.as_bytes())).unwrap(),
            Step::Wait
        );
        ex.on_message(auth(0, b"")).unwrap();
        ex.on_message(msg(b'Z', b"I")).unwrap();

        assert_eq!(
            ex.transitions(),
            &[
                Init,
                StartupSent,
                AuthChallengeReceived,
                AuthResponseSent,
                AuthChallengeReceived,
                AuthResponseSent,
                AuthChallengeReceived,
                Authenticated,
                Ready
            ]
        );
        assert_eq!(ex.outcome.mechanism, Some("SCRAM-SHA-256"));
    }

    #[cfg(feature = "scram")]
    #[test]
    fn scram_ok_without_server_final_is_rejected() {
        use crate::auth::SaslAuthenticationHandler;
        use base64::Engine as _;

        let mut ex = StartupExchange::new(|_: &AuthenticationMessage| {
            Ok(Box::new(SaslAuthenticationHandler::with_nonce("u", "p", "cn"))
                as Box<dyn AuthenticationHandler>)
        });
        ex.startup_sent().unwrap();
        ex.on_message(auth(10, b"SCRAM-SHA-256\0\0")).unwrap();

        let server_first = format!(
            "r=cnSRV,s={},i=64",
            base64::engine::general_purpose::STANDARD.encode(b"saltsaltsaltsalt")
        );
        ex.on_message(auth(11, server_first.as_bytes())).unwrap();

        // Server skips AuthenticationSASLFinal and claims success.
        let err = ex.on_message(auth(0, b"")).unwrap_err();
        assert!(matches!(err, PgWireError::Auth(_)), "{err:?}");
        assert!(err.is_auth());
        assert_eq!(ex.state(), Failed);
        assert!(!ex.transitions().contains(&Authenticated));
    }

    // ==================== Failures ====================

    #[test]
    fn error_response_fails_exchange() {
        let mut ex = exchange(Credentials::new("u", "p"));
        ex.on_message(auth(3, b"")).unwrap();
        let err = ex
            .on_message(msg(
                b'E',
                b"SFATAL\0C28P01\0Mpassword authentication failed for user \"u\"\0\0",
            ))
            .unwrap_err();
        assert!(err.is_server());
        assert_eq!(err.server_error().map(|e| e.code.as_str()), Some("28P01"));
        assert_eq!(ex.state(), Failed);
    }

    #[test]
    fn unsupported_challenge_fails_exchange() {
        let mut ex = exchange(Credentials::new("u", "p"));
        let err = ex.on_message(auth(7, b"")).unwrap_err();
        assert!(matches!(err, PgWireError::UnsupportedAuthentication(_)));
        assert_eq!(ex.state(), Failed);
    }

    #[test]
    fn ready_before_authentication_is_protocol_error() {
        let mut ex = exchange(Credentials::new("u", "p"));
        let err = ex.on_message(msg(b'Z', b"I")).unwrap_err();
        assert!(matches!(err, PgWireError::Protocol(_)));
    }

    #[test]
    fn notices_pass_through_in_order() {
        let mut ex = exchange(Credentials::new("u", "p"));
        ex.on_message(msg(b'N', b"first")).unwrap();
        ex.on_message(auth(0, b"")).unwrap();
        ex.on_message(msg(b'N', b"second")).unwrap();
        let tags: Vec<_> = ex
            .outcome
            .passthrough
            .iter()
            .map(|m| m.payload.clone())
            .collect();
        assert_eq!(
            tags,
            vec![Bytes::from_static(b"first"), Bytes::from_static(b"second")]
        );
    }

    #[test]
    fn messages_after_ready_are_rejected() {
        let mut ex = exchange(Credentials::new("u", "p"));
        ex.on_message(auth(0, b"")).unwrap();
        ex.on_message(msg(b'Z', b"I")).unwrap();
        assert!(ex.on_message(msg(b'Z', b"I")).is_err());
    }

    // ==================== Startup packet ====================

    #[test]
    fn options_render_as_dash_c_pairs() {
        let cfg = ConnectionConfig::new("h", "u", "p", "d")
            .with_option("statement_timeout", "6000")
            .with_option("search_path", "a b");
        let startup = StartupMessage::from_config(&cfg);
        assert_eq!(
            startup.rendered_options().as_deref(),
            Some("-c search_path=a\\ b -c statement_timeout=6000")
        );
    }

    #[tokio::test]
    async fn startup_packet_carries_params() {
        let cfg = ConnectionConfig::new("h", "u", "p", "d").with_application_name("app");
        let mut out = Vec::new();
        StartupMessage::from_config(&cfg)
            .write(&mut out)
            .await
            .unwrap();
        let body = &out[8..];
        let s = String::from_utf8_lossy(body);
        assert!(s.contains("user\0u\0"));
        assert!(s.contains("database\0d\0"));
        assert!(s.contains("application_name\0app\0"));
        assert!(s.contains("client_encoding\0UTF8\0"));
        assert!(!s.contains("options"));
    }
}
