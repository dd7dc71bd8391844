//! Gate assembly and HTTP server

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::get;
use axum::{Router, middleware};
use tokio_util::sync::CancellationToken;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::auth::{
    AuthConfig, AuthenticationStage, AuthorizationPolicy, AuthorizationStage, Authenticated,
    JwksRefreshTask, JwtValidator, KeySource, MetadataClient, SigningKeyStore,
};
use crate::config::ServerConfig;
use crate::pipeline::{Pipeline, run_pipeline};
use crate::{Error, Result, handlers};

/// Token validation gate: key store and the stage pipeline
#[derive(Debug, Clone)]
pub struct Gate {
    keys: Arc<SigningKeyStore>,
    pipeline: Arc<Pipeline>,
    refresh_interval: Duration,
}

impl Gate {
    /// Gate backed by the identity provider described in `config`.
    pub fn new(config: &AuthConfig, shutdown: CancellationToken) -> Result<Self> {
        let source = Arc::new(MetadataClient::new(config, shutdown)?);
        Ok(Self::with_source(config, source, Authenticated))
    }

    /// Gate over an arbitrary key source and authorization policy.
    pub fn with_source(
        config: &AuthConfig,
        source: Arc<dyn KeySource>,
        policy: impl AuthorizationPolicy + 'static,
    ) -> Self {
        let keys = Arc::new(SigningKeyStore::new(source, config));
        let validator = Arc::new(JwtValidator::new(config, Arc::clone(&keys)));

        let pipeline = Pipeline::builder()
            .stage(AuthenticationStage::new(validator))
            .stage(AuthorizationStage::new(policy))
            .build();

        Self {
            keys,
            pipeline: Arc::new(pipeline),
            refresh_interval: config.jwks_refresh_interval,
        }
    }

    #[must_use]
    pub const fn keys(&self) -> &Arc<SigningKeyStore> {
        &self.keys
    }

    #[must_use]
    pub const fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Start the background key refresh loop.
    pub fn spawn_refresh(&self, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        JwksRefreshTask::new(Arc::clone(&self.keys), self.refresh_interval).spawn(shutdown)
    }
}

/// Public routes plus the protected API behind the gate pipeline
pub fn build_router(gate: &Gate, request_timeout: Duration) -> Router {
    let protected = Router::new()
        .route("/api/me", get(handlers::get_me))
        .layer(middleware::from_fn_with_state(
            Arc::clone(gate.pipeline()),
            run_pipeline,
        ));

    #[allow(unused_mut)]
    let mut public = Router::new().route("/health", get(handlers::health));

    #[cfg(feature = "metrics")]
    {
        public = public.route("/metrics", get(handlers::metrics));
    }

    public
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
}

/// Serve `router` until `shutdown` fires
pub async fn run_http(
    router: Router,
    server: &ServerConfig,
    auth: &AuthConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr = SocketAddr::new(server.host, server.port);

    emit_security_warnings(server.host, auth);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Transport(format!("Failed to bind to {addr}: {e}")))?;

    tracing::info!("HTTP server listening on {addr}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| Error::Transport(format!("HTTP server error: {e}")))?;

    tracing::info!("HTTP server shutdown complete");
    Ok(())
}

fn emit_security_warnings(host: IpAddr, auth: &AuthConfig) {
    let is_all_interfaces =
        host == IpAddr::V4(Ipv4Addr::UNSPECIFIED) || host == IpAddr::V6(Ipv6Addr::UNSPECIFIED);

    if is_all_interfaces {
        tracing::warn!(
            "HTTP server binding to all interfaces. \
             This exposes the gate to all network interfaces."
        );
    } else if !host.is_loopback() {
        tracing::warn!(
            "HTTP server binding to non-loopback address ({host}). \
             Ensure network security policies are in place."
        );
    }

    if !auth.require_https {
        if auth.authority.scheme() == "https" {
            tracing::warn!(
                "require_https_metadata is disabled. \
                 Enable it in production so key material is only fetched over TLS."
            );
        } else {
            tracing::warn!(
                authority = %auth.authority,
                "SECURITY WARNING: identity provider metadata is fetched over plain HTTP. \
                 Signing keys can be tampered with in transit."
            );
        }
    }
}
