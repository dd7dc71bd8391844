//! TOML configuration file loading

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use super::builder::ConfigBuilder;
use crate::Result;

/// Configuration file locations checked in order
const CONFIG_PATHS: &[&str] = &[
    "./bearer-gate.toml",
    "~/.config/bearer-gate/config.toml",
    "/etc/bearer-gate/config.toml",
];

/// Find the first existing configuration file
pub fn find_config_file() -> Option<PathBuf> {
    CONFIG_PATHS.iter().find_map(|path_str| {
        let path = match path_str.strip_prefix('~') {
            Some(rest) => PathBuf::from(format!("{}{rest}", std::env::var("HOME").ok()?)),
            None => PathBuf::from(path_str),
        };
        path.exists().then_some(path)
    })
}

/// Load configuration from a TOML file
pub fn load_from_file(path: &Path, builder: ConfigBuilder) -> Result<ConfigBuilder> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        crate::Error::Config(format!(
            "Failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;

    let file_config: FileConfig = toml::from_str(&content).map_err(|e| {
        crate::Error::Config(format!(
            "Failed to parse config file {}: {}",
            path.display(),
            e
        ))
    })?;

    apply_file_config(builder, file_config)
}

fn parse_url(value: &str, key: &str) -> Result<Url> {
    Url::parse(value).map_err(|e| crate::Error::Config(format!("Invalid {key}: {e}")))
}

fn apply_file_config(mut builder: ConfigBuilder, config: FileConfig) -> Result<ConfigBuilder> {
    if let Some(auth) = config.authentication {
        if let Some(authority) = auth.authority {
            builder = builder.authority(parse_url(&authority, "authentication.authority")?);
        }

        if let Some(audience) = auth.audience {
            builder = builder.audience(audience);
        }

        if let Some(require) = auth.require_https_metadata {
            builder = builder.require_https(require);
        }

        if let Some(uri) = auth.jwks_uri {
            builder = builder.jwks_uri(parse_url(&uri, "authentication.jwks_uri")?);
        }

        if let Some(secs) = auth.clock_skew_secs {
            builder = builder.clock_skew(Duration::from_secs(secs));
        }

        if let Some(secs) = auth.jwks_cache_ttl_secs {
            builder = builder.jwks_cache_ttl(Duration::from_secs(secs));
        }

        if let Some(secs) = auth.jwks_max_stale_secs {
            builder = builder.jwks_max_stale(Duration::from_secs(secs));
        }

        if let Some(secs) = auth.jwks_refresh_interval_secs {
            builder = builder.jwks_refresh_interval(Duration::from_secs(secs));
        }

        if let Some(secs) = auth.key_refresh_cooldown_secs {
            builder = builder.key_refresh_cooldown(Duration::from_secs(secs));
        }

        if let Some(secs) = auth.http_timeout_secs {
            builder = builder.http_timeout(Duration::from_secs(secs));
        }

        if let Some(ms) = auth.key_refresh_wait_ms {
            builder = builder.key_refresh_wait(Duration::from_millis(ms));
        }

        if let Some(retry) = auth.retry {
            if let Some(attempts) = retry.max_attempts {
                builder = builder.retry_attempts(attempts);
            }

            let defaults = crate::auth::RetryPolicy::default();
            if retry.initial_backoff_ms.is_some() || retry.max_backoff_ms.is_some() {
                builder = builder.retry_backoff(
                    retry
                        .initial_backoff_ms
                        .map_or(defaults.initial_backoff, Duration::from_millis),
                    retry
                        .max_backoff_ms
                        .map_or(defaults.max_backoff, Duration::from_millis),
                );
            }
        }
    }

    if let Some(server) = config.server {
        if let Some(host_str) = server.http_host
            && let Ok(host) = host_str.parse::<IpAddr>()
        {
            builder = builder.http_host(host);
        }

        if let Some(port) = server.http_port {
            builder = builder.http_port(port);
        }

        if let Some(secs) = server.request_timeout_secs {
            builder = builder.request_timeout(Duration::from_secs(secs));
        }
    }

    if let Some(obs) = config.observability {
        if let Some(level) = obs.log_level {
            builder = builder.log_level(level);
        }

        if let Some(json) = obs.json_logs {
            builder = builder.json_logs(json);
        }
    }

    Ok(builder)
}

/// Root configuration file structure
#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    authentication: Option<AuthenticationSection>,
    server: Option<ServerSection>,
    observability: Option<ObservabilitySection>,
}

#[derive(Debug, Deserialize)]
struct AuthenticationSection {
    authority: Option<String>,
    audience: Option<String>,
    require_https_metadata: Option<bool>,
    jwks_uri: Option<String>,
    clock_skew_secs: Option<u64>,
    jwks_cache_ttl_secs: Option<u64>,
    jwks_max_stale_secs: Option<u64>,
    jwks_refresh_interval_secs: Option<u64>,
    key_refresh_cooldown_secs: Option<u64>,
    http_timeout_secs: Option<u64>,
    key_refresh_wait_ms: Option<u64>,
    retry: Option<RetrySection>,
}

#[derive(Debug, Deserialize)]
struct RetrySection {
    max_attempts: Option<u32>,
    initial_backoff_ms: Option<u64>,
    max_backoff_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ServerSection {
    http_host: Option<String>,
    http_port: Option<u16>,
    request_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ObservabilitySection {
    log_level: Option<String>,
    json_logs: Option<bool>,
}
