use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::config::{SslMode, TlsConfig};
use crate::error::{PgWireError, Result};
use crate::protocol::framing::write_ssl_request;
use crate::transport::BoxedStream;

pub(super) async fn maybe_upgrade(
    mut tcp: TcpStream,
    tls: &TlsConfig,
    host: &str,
) -> Result<BoxedStream> {
    if tls.mode == SslMode::Disable {
        return Ok(Box::new(tcp));
    }

    write_ssl_request(&mut tcp).await?;
    let mut resp = [0u8; 1];
    tcp.read_exact(&mut resp).await?;

    if resp[0] != b'S' {
        if tls.mode == SslMode::Prefer {
            debug!(host, "server declined TLS, continuing in plain text");
            return Ok(Box::new(tcp));
        }
        return Err(PgWireError::Tls(
            "server does not support TLS (SSLRequest rejected)".into(),
        ));
    }

    let verify = matches!(tls.mode, SslMode::VerifyCa | SslMode::VerifyFull);
    let connector = TlsConnector::from(Arc::new(client_config(tls, verify)?));

    let sni = tls.sni_hostname.clone().unwrap_or_else(|| host.to_string());
    let server_name = ServerName::try_from(sni)
        .map_err(|e| PgWireError::Tls(format!("invalid SNI hostname: {e}")))?;

    let stream = connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| PgWireError::Tls(format!("tls handshake failed: {e}")))?;
    debug!(host, mode = ?tls.mode, "tls established");
    Ok(Box::new(stream))
}

fn client_config(tls: &TlsConfig, verify: bool) -> Result<ClientConfig> {
    let mut roots = RootCertStore::empty();
    match &tls.ca_pem_path {
        Some(path) => {
            let f = File::open(path).map_err(|e| PgWireError::Tls(format!("open CA pem: {e}")))?;
            let certs = rustls_pemfile::certs(&mut BufReader::new(f))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| PgWireError::Tls(format!("parse CA pem: {e}")))?;
            roots.add_parsable_certificates(certs);
        }
        None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    }

    let mut cfg = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    // `require` / `prefer`: encrypted, server identity not checked.
    if !verify {
        cfg.dangerous()
            .set_certificate_verifier(Arc::new(AcceptAnyServerCert {
                provider: Arc::new(rustls::crypto::ring::default_provider()),
            }));
    }
    Ok(cfg)
}

/// Skips chain and name checks but still verifies handshake signatures.
#[derive(Debug)]
struct AcceptAnyServerCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
