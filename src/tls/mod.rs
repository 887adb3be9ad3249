//! Optional TLS upgrade, negotiated with `SSLRequest` before the startup packet.

use tokio::net::TcpStream;

use crate::config::TlsConfig;
use crate::error::Result;
use crate::transport::BoxedStream;

#[cfg(feature = "tls-rustls")]
mod rustls;

/// Apply `tls` to a fresh TCP stream.
pub(crate) async fn establish(tcp: TcpStream, tls: &TlsConfig, host: &str) -> Result<BoxedStream> {
    #[cfg(feature = "tls-rustls")]
    {
        rustls::maybe_upgrade(tcp, tls, host).await
    }

    #[cfg(not(feature = "tls-rustls"))]
    {
        use crate::config::SslMode;
        use crate::error::PgWireError;

        let _ = host;
        if !matches!(tls.mode, SslMode::Disable) {
            return Err(PgWireError::Tls("tls-rustls feature disabled".into()));
        }
        Ok(Box::new(tcp))
    }
}
