//! Configuration builder

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use url::Url;

use crate::Error;
use crate::auth::{
    AuthConfig, DEFAULT_CLOCK_SKEW, DEFAULT_HTTP_TIMEOUT, DEFAULT_JWKS_CACHE_TTL,
    DEFAULT_JWKS_MAX_STALE, DEFAULT_JWKS_REFRESH_INTERVAL, DEFAULT_KEY_REFRESH_WAIT, RetryPolicy,
};

/// Gate configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub auth: AuthConfig,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
}

impl Config {
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }
}

/// HTTP listener configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
    /// Upper bound for handling a single request
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 8080,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, Default)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub json_logs: bool,
}

/// Configuration builder with fluent API
#[derive(Debug)]
pub struct ConfigBuilder {
    authority: Option<Url>,
    audience: Option<String>,
    require_https: bool,
    jwks_uri: Option<Url>,
    clock_skew: Duration,
    jwks_cache_ttl: Duration,
    jwks_max_stale: Duration,
    jwks_refresh_interval: Duration,
    key_refresh_cooldown: Duration,
    http_timeout: Duration,
    key_refresh_wait: Duration,
    retry: RetryPolicy,
    server: ServerConfig,
    telemetry: TelemetryConfig,
}

impl ConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            authority: None,
            audience: None,
            require_https: false,
            jwks_uri: None,
            clock_skew: DEFAULT_CLOCK_SKEW,
            jwks_cache_ttl: DEFAULT_JWKS_CACHE_TTL,
            jwks_max_stale: DEFAULT_JWKS_MAX_STALE,
            jwks_refresh_interval: DEFAULT_JWKS_REFRESH_INTERVAL,
            key_refresh_cooldown: Duration::ZERO,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            key_refresh_wait: DEFAULT_KEY_REFRESH_WAIT,
            retry: RetryPolicy::default(),
            server: ServerConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }

    #[must_use]
    pub fn authority(mut self, url: Url) -> Self {
        self.authority = Some(url);
        self
    }

    #[must_use]
    pub fn audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    #[must_use]
    pub const fn require_https(mut self, require: bool) -> Self {
        self.require_https = require;
        self
    }

    #[must_use]
    pub fn jwks_uri(mut self, uri: Url) -> Self {
        self.jwks_uri = Some(uri);
        self
    }

    #[must_use]
    pub const fn clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew = skew;
        self
    }

    #[must_use]
    pub const fn jwks_cache_ttl(mut self, ttl: Duration) -> Self {
        self.jwks_cache_ttl = ttl;
        self
    }

    #[must_use]
    pub const fn jwks_max_stale(mut self, max_stale: Duration) -> Self {
        self.jwks_max_stale = max_stale;
        self
    }

    #[must_use]
    pub const fn jwks_refresh_interval(mut self, interval: Duration) -> Self {
        self.jwks_refresh_interval = interval;
        self
    }

    #[must_use]
    pub const fn key_refresh_cooldown(mut self, cooldown: Duration) -> Self {
        self.key_refresh_cooldown = cooldown;
        self
    }

    #[must_use]
    pub const fn http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn key_refresh_wait(mut self, wait: Duration) -> Self {
        self.key_refresh_wait = wait;
        self
    }

    #[must_use]
    pub const fn retry_attempts(mut self, attempts: u32) -> Self {
        self.retry.max_attempts = attempts;
        self
    }

    #[must_use]
    pub const fn retry_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.retry.initial_backoff = initial;
        self.retry.max_backoff = max;
        self
    }

    #[must_use]
    pub const fn http_host(mut self, host: IpAddr) -> Self {
        self.server.host = host;
        self
    }

    #[must_use]
    pub const fn http_port(mut self, port: u16) -> Self {
        self.server.port = port;
        self
    }

    #[must_use]
    pub const fn request_timeout(mut self, timeout: Duration) -> Self {
        self.server.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn log_level(mut self, level: String) -> Self {
        self.telemetry.log_level = level;
        self
    }

    #[must_use]
    pub const fn json_logs(mut self, enabled: bool) -> Self {
        self.telemetry.json_logs = enabled;
        self
    }

    /// Build the configuration
    pub fn build(self) -> crate::Result<Config> {
        let authority = self
            .authority
            .ok_or_else(|| Error::Config("authentication.authority is required".into()))?;
        let audience = self
            .audience
            .ok_or_else(|| Error::Config("authentication.audience is required".into()))?;

        let mut auth = AuthConfig::new(authority, audience)
            .with_require_https(self.require_https)
            .with_clock_skew(self.clock_skew)
            .with_retry(self.retry);
        auth.jwks_uri = self.jwks_uri;
        auth.jwks_cache_ttl = self.jwks_cache_ttl;
        auth.jwks_max_stale = self.jwks_max_stale;
        auth.jwks_refresh_interval = self.jwks_refresh_interval;
        auth.key_refresh_cooldown = self.key_refresh_cooldown;
        auth.http_timeout = self.http_timeout;
        auth.key_refresh_wait = self.key_refresh_wait;
        auth.validate()?;

        // A request waiting on the identity provider must still be answered
        // with 401 before the request timeout turns it into a 408
        if auth.key_refresh_wait >= self.server.request_timeout {
            return Err(Error::Config(format!(
                "key refresh wait ({:?}) must be shorter than the request timeout ({:?})",
                auth.key_refresh_wait, self.server.request_timeout
            )));
        }

        let log_level = if self.telemetry.log_level.is_empty() {
            "info".to_string()
        } else {
            self.telemetry.log_level
        };

        Ok(Config {
            auth,
            server: self.server,
            telemetry: TelemetryConfig {
                log_level,
                json_logs: self.telemetry.json_logs,
            },
        })
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
