//! Environment variable loading for configuration

use std::env;
use std::net::IpAddr;
use std::time::Duration;

use url::Url;

use super::builder::ConfigBuilder;
use crate::Result;

/// Environment variable names
mod vars {
    pub const AUTH_AUTHORITY: &str = "AUTH_AUTHORITY";
    pub const AUTH_AUDIENCE: &str = "AUTH_AUDIENCE";
    pub const AUTH_REQUIRE_HTTPS_METADATA: &str = "AUTH_REQUIRE_HTTPS_METADATA";
    pub const AUTH_JWKS_URI: &str = "AUTH_JWKS_URI";
    pub const AUTH_CLOCK_SKEW_SECS: &str = "AUTH_CLOCK_SKEW_SECS";
    pub const GATE_HTTP_HOST: &str = "GATE_HTTP_HOST";
    pub const GATE_HTTP_PORT: &str = "GATE_HTTP_PORT";
    pub const RUST_LOG: &str = "RUST_LOG";
    pub const GATE_JSON_LOGS: &str = "GATE_JSON_LOGS";
}

/// Load configuration from environment variables
pub fn load_from_env(mut builder: ConfigBuilder) -> Result<ConfigBuilder> {
    if let Ok(url_str) = env::var(vars::AUTH_AUTHORITY) {
        let url = Url::parse(&url_str).map_err(|e| {
            crate::Error::Config(format!("Invalid {}: {}", vars::AUTH_AUTHORITY, e))
        })?;
        builder = builder.authority(url);
    }

    if let Ok(audience) = env::var(vars::AUTH_AUDIENCE) {
        builder = builder.audience(audience);
    }

    if let Ok(val) = env::var(vars::AUTH_REQUIRE_HTTPS_METADATA) {
        builder = builder.require_https(parse_bool(&val));
    }

    if let Ok(url_str) = env::var(vars::AUTH_JWKS_URI) {
        let url = Url::parse(&url_str).map_err(|e| {
            crate::Error::Config(format!("Invalid {}: {}", vars::AUTH_JWKS_URI, e))
        })?;
        builder = builder.jwks_uri(url);
    }

    if let Ok(skew_str) = env::var(vars::AUTH_CLOCK_SKEW_SECS)
        && let Ok(secs) = skew_str.parse::<u64>()
    {
        builder = builder.clock_skew(Duration::from_secs(secs));
    }

    if let Ok(host_str) = env::var(vars::GATE_HTTP_HOST)
        && let Ok(host) = host_str.parse::<IpAddr>()
    {
        builder = builder.http_host(host);
    }

    if let Ok(port_str) = env::var(vars::GATE_HTTP_PORT)
        && let Ok(port) = port_str.parse::<u16>()
    {
        builder = builder.http_port(port);
    }

    if let Ok(level) = env::var(vars::RUST_LOG) {
        builder = builder.log_level(level);
    }

    if let Ok(val) = env::var(vars::GATE_JSON_LOGS) {
        builder = builder.json_logs(parse_bool(&val));
    }

    Ok(builder)
}

fn parse_bool(s: &str) -> bool {
    matches!(s.to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}
