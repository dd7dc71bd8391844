use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use bearer_gate::observability::init_observability;
use bearer_gate::{Gate, build_router, config, run_http};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "bearer-gate")]
#[command(about = "JWT bearer authentication gate for a Keycloak realm", long_about = None)]
#[command(version)]
struct Args {
    /// Realm URL, e.g. https://keycloak.example/realms/demo
    #[arg(short, long)]
    authority: Option<String>,

    /// Audience required in the token `aud` claim
    #[arg(long)]
    audience: Option<String>,

    /// Refuse to fetch discovery metadata and keys over plain HTTP
    #[arg(long)]
    require_https_metadata: bool,

    /// Clock skew tolerance in seconds
    #[arg(long)]
    clock_skew: Option<u64>,

    /// HTTP bind host
    #[arg(long)]
    http_host: Option<IpAddr>,

    /// HTTP bind port
    #[arg(long)]
    http_port: Option<u16>,

    /// Configuration file path
    #[arg(short, long, env = "GATE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable JSON logging output
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Precedence: CLI > env > file > defaults
    let mut builder = if let Some(ref path) = args.config {
        config::load_config_from_path(path)?
    } else {
        config::load_config()?
    };

    if let Some(ref authority) = args.authority {
        let url = Url::parse(authority).map_err(|e| anyhow::anyhow!("Invalid authority: {e}"))?;
        builder = builder.authority(url);
    }

    if let Some(audience) = args.audience {
        builder = builder.audience(audience);
    }

    if args.require_https_metadata {
        builder = builder.require_https(true);
    }

    if let Some(secs) = args.clock_skew {
        builder = builder.clock_skew(Duration::from_secs(secs));
    }

    if let Some(host) = args.http_host {
        builder = builder.http_host(host);
    }

    if let Some(port) = args.http_port {
        builder = builder.http_port(port);
    }

    if args.verbose {
        builder = builder.log_level("debug".to_string());
    }

    if args.json_logs {
        builder = builder.json_logs(true);
    }

    let config = builder.build()?;

    init_observability(&config.telemetry)?;

    tracing::info!("Starting bearer gate");
    tracing::info!("Authority: {}", config.auth.authority);
    tracing::info!("Audience: {}", config.auth.audience);
    tracing::info!("Require HTTPS metadata: {}", config.auth.require_https);
    tracing::info!("Clock skew: {:?}", config.auth.clock_skew);
    tracing::info!("JWKS refresh interval: {:?}", config.auth.jwks_refresh_interval);

    let shutdown = CancellationToken::new();
    let gate = Gate::new(&config.auth, shutdown.clone())?;
    let refresh = gate.spawn_refresh(shutdown.clone());

    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown signal received"),
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                return;
            }
        }
        signal.cancel();
    });

    let router = build_router(&gate, config.server.request_timeout);
    let result = run_http(router, &config.server, &config.auth, shutdown.clone()).await;

    shutdown.cancel();
    if let Err(e) = refresh.await {
        tracing::warn!(error = %e, "Key refresh task ended abnormally");
    }

    result.map_err(Into::into)
}
