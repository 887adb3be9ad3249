mod common;

use std::sync::{Arc, Mutex};

use common::{MockConnector, MockServer, init_tracing};
use pgwire_client::auth::{AuthenticationHandler, Credentials};
use pgwire_client::client::{StartupExchange, StartupMessage, StartupOutcome};
use pgwire_client::protocol::AuthenticationMessage;
use pgwire_client::{ConnectionConfig, Connector, PgWireError, Result, SqlStateClass};

/// Runs the exchange against `script`, recording which mechanisms were chosen.
async fn run_exchange<F, Fut>(
    config: ConnectionConfig,
    script: F,
) -> (Result<StartupOutcome>, Vec<&'static str>)
where
    F: FnOnce(MockServer) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    init_tracing();
    let (connector, server) = MockConnector::pair();
    let server = tokio::spawn(script(server));
    let mut transport = connector.connect("db", 5432).await.unwrap();

    let chosen = Arc::new(Mutex::new(Vec::new()));
    let creds = Credentials::new(&config.user, &config.password);
    let record = Arc::clone(&chosen);
    let exchange = StartupExchange::new(move |m: &AuthenticationMessage| {
        let handler: Box<dyn AuthenticationHandler> = creds.handler_for(m)?;
        record.lock().unwrap().push(handler.mechanism());
        Ok(handler)
    });

    let res = exchange
        .run(&mut transport, &StartupMessage::from_config(&config))
        .await;
    drop(transport);
    server.await.unwrap();
    let chosen = chosen.lock().unwrap().clone();
    (res, chosen)
}

fn config() -> ConnectionConfig {
    ConnectionConfig::new("db", "u", "p", "d")
}

// ==================== Password ====================

#[tokio::test]
async fn cleartext_uses_password_handler_only() {
    let (res, chosen) = run_exchange(config(), |mut srv| async move {
        let params = srv.read_startup().await;
        assert_eq!(params["user"], "u");
        assert_eq!(params["database"], "d");
        assert_eq!(params["client_encoding"], "UTF8");
        srv.auth(3, b"").await;
        assert_eq!(srv.expect_password().await, "p");
        srv.finish_startup().await;
    })
    .await;

    let outcome = res.unwrap();
    assert_eq!(chosen, vec!["password"]);
    assert_eq!(outcome.mechanism, Some("password"));
    assert_eq!(outcome.parameters["server_version"], "16.4");
    let key = outcome.backend_key.unwrap();
    assert_eq!((key.process_id, key.secret_key), (12345, 42));
}

#[cfg(feature = "md5")]
#[tokio::test]
async fn md5_password_is_salted_digest() {
    let salt = [0x01, 0x02, 0x03, 0x04];
    // md5(md5("p" + "u") + salt)
    let expected = "md5facdc455923b0a58efea84a6d9ee0e76";

    let (res, chosen) = run_exchange(config(), move |mut srv| async move {
        srv.read_startup().await;
        srv.auth(5, &salt).await;
        assert_eq!(srv.expect_password().await, expected);
        srv.finish_startup().await;
    })
    .await;

    res.unwrap();
    assert_eq!(chosen, vec!["password"]);
}

#[tokio::test]
async fn options_are_sent_as_dash_c_pairs() {
    let cfg = config()
        .with_option("statement_timeout", "6000")
        .with_application_name("billing");
    let (res, _) = run_exchange(cfg, |mut srv| async move {
        let params = srv.read_startup().await;
        assert_eq!(params["options"], "-c statement_timeout=6000");
        assert_eq!(params["application_name"], "billing");
        srv.finish_startup().await;
    })
    .await;
    res.unwrap();
}

// ==================== Failures ====================

#[tokio::test]
async fn bad_password_maps_server_error() {
    let (res, _) = run_exchange(config(), |mut srv| async move {
        srv.read_startup().await;
        srv.auth(3, b"").await;
        srv.expect_password().await;
        srv.error("FATAL", "28P01", "password authentication failed for user \"u\"")
            .await;
    })
    .await;

    let err = res.unwrap_err();
    let server = err.server_error().unwrap();
    assert_eq!(server.code, "28P01");
    assert_eq!(server.class(), SqlStateClass::InvalidAuthorization);
    assert!(!err.is_transient());
}

#[tokio::test]
async fn unsupported_method_fails_without_reply() {
    let (res, chosen) = run_exchange(config(), |mut srv| async move {
        srv.read_startup().await;
        // AuthenticationGSS
        srv.auth(7, b"").await;
        assert!(srv.read_to_end().await.is_empty());
    })
    .await;

    assert!(matches!(
        res.unwrap_err(),
        PgWireError::UnsupportedAuthentication(_)
    ));
    assert!(chosen.is_empty());
}

#[tokio::test]
async fn notices_are_passed_through() {
    let (res, _) = run_exchange(config(), |mut srv| async move {
        srv.read_startup().await;
        srv.send(b'N', b"SWARNING\0Mcollation mismatch\0\0").await;
        srv.finish_startup().await;
    })
    .await;

    let outcome = res.unwrap();
    assert_eq!(outcome.passthrough.len(), 1);
    assert_eq!(outcome.passthrough[0].tag, b'N');
    assert_eq!(outcome.mechanism, None);
}

#[tokio::test]
async fn connection_dropped_mid_exchange_is_io_error() {
    let (res, _) = run_exchange(config(), |mut srv| async move {
        srv.read_startup().await;
        srv.auth(3, b"").await;
        drop(srv);
    })
    .await;

    assert!(res.unwrap_err().is_io());
}
