/// PGHOST=127.0.0.1 PGSCHEMA=public cargo run --example connect --features demos
use pgwire_client::{ConnectionConfig, ConnectionFactory, SslMode, TlsConfig};

fn env(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn ssl_mode(s: &str) -> anyhow::Result<SslMode> {
    Ok(match s {
        "disable" => SslMode::Disable,
        "prefer" => SslMode::Prefer,
        "require" => SslMode::Require,
        "verify-ca" => SslMode::VerifyCa,
        "verify-full" => SslMode::VerifyFull,
        other => anyhow::bail!("unknown PGSSLMODE {other:?}"),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,pgwire_client=debug".into()),
        )
        .init();

    let mut cfg = ConnectionConfig::new(
        env("PGHOST", "127.0.0.1"),
        env("PGUSER", "postgres"),
        env("PGPASSWORD", "postgres"),
        env("PGDATABASE", "postgres"),
    )
    .with_port(env("PGPORT", "5432").parse()?)
    .with_application_name("pgwire-client-demo")
    .with_tls(TlsConfig {
        mode: ssl_mode(&env("PGSSLMODE", "disable"))?,
        ca_pem_path: std::env::var("PGSSLROOTCERT").ok().map(Into::into),
        sni_hostname: None,
    });
    if let Ok(schema) = std::env::var("PGSCHEMA") {
        cfg = cfg.with_schema(schema);
    }

    let factory = ConnectionFactory::new(cfg);
    let mut conn = factory.create().await?;

    println!(
        "connected: server_version={} isolation={} pid={:?}",
        conn.parameter("server_version").unwrap_or("?"),
        conn.isolation_level(),
        conn.process_id(),
    );

    let rows = conn
        .simple_query("SELECT current_schema(), '\\x00ff'::bytea")
        .await?;
    for row in &rows {
        let schema: Option<String> = row.get(0)?;
        let raw = row.raw(1).map(|b| String::from_utf8_lossy(b).into_owned());
        println!("current_schema={schema:?} bytea={raw:?}");
    }

    conn.close().await?;
    Ok(())
}
