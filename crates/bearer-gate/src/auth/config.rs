//! Authentication configuration types

use std::time::Duration;

use url::Url;

use crate::{Error, Result};

/// Upper bound accepted for `clock_skew`.
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(300);

pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(60);
pub const DEFAULT_JWKS_CACHE_TTL: Duration = Duration::from_secs(3600);
pub const DEFAULT_JWKS_MAX_STALE: Duration = Duration::from_secs(600);
pub const DEFAULT_JWKS_REFRESH_INTERVAL: Duration = Duration::from_secs(300);
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);
/// Default bound on how long a request waits for a key refresh
pub const DEFAULT_KEY_REFRESH_WAIT: Duration = Duration::from_secs(5);

/// Retry policy for metadata and JWKS fetches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per refresh (first try included)
    pub max_attempts: u32,
    /// Delay before the second attempt, doubled afterwards
    pub initial_backoff: Duration,
    /// Ceiling for the doubled delay
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Backoff to wait after the given (1-based) failed attempt.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Token validation configuration.
///
/// Built once at startup and shared read-only for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Realm URL; expected `iss` and base for OIDC discovery
    pub authority: Url,
    /// Audience that must appear in the `aud` claim
    pub audience: String,
    /// Reject metadata endpoints that are not served over HTTPS
    pub require_https: bool,
    /// JWKS URI (skips OIDC discovery when set)
    pub jwks_uri: Option<Url>,
    /// Clock skew tolerance for exp/nbf/iat validation
    pub clock_skew: Duration,
    /// How long a fetched key set is considered fresh
    pub jwks_cache_ttl: Duration,
    /// How long past its TTL a key set may still serve while refreshes fail
    pub jwks_max_stale: Duration,
    /// JWKS refresh interval for background refresh
    pub jwks_refresh_interval: Duration,
    /// Minimum spacing between refreshes triggered by unknown key ids
    pub key_refresh_cooldown: Duration,
    /// Timeout for a single discovery or JWKS request
    pub http_timeout: Duration,
    /// How long a request waits for a key refresh before it is rejected as
    /// provider unreachable. The refresh itself keeps running.
    pub key_refresh_wait: Duration,
    pub retry: RetryPolicy,
}

impl AuthConfig {
    #[must_use]
    pub fn new(authority: Url, audience: impl Into<String>) -> Self {
        Self {
            authority,
            audience: audience.into(),
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
        }
    }

    #[must_use]
    pub const fn with_require_https(mut self, require: bool) -> Self {
        self.require_https = require;
        self
    }

    #[must_use]
    pub fn with_jwks_uri(mut self, uri: Url) -> Self {
        self.jwks_uri = Some(uri);
        self
    }

    #[must_use]
    pub const fn with_clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew = skew;
        self
    }

    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Issuer as it appears in tokens (no trailing slash).
    #[must_use]
    pub fn issuer(&self) -> &str {
        self.authority.as_str().trim_end_matches('/')
    }

    /// `{authority}/.well-known/openid-configuration`
    pub fn discovery_url(&self) -> Result<Url> {
        let mut base = self.authority.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.join(".well-known/openid-configuration")
            .map_err(|e| Error::Config(format!("Invalid discovery URL: {e}")))
    }

    /// Check invariants that cannot be expressed in the type.
    pub fn validate(&self) -> Result<()> {
        if self.audience.trim().is_empty() {
            return Err(Error::Config("audience must not be empty".into()));
        }

        if !matches!(self.authority.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "authority must be an http(s) URL, got {}",
                self.authority
            )));
        }

        if self.require_https {
            if self.authority.scheme() != "https" {
                return Err(Error::Config(
                    "require_https is set but authority is not HTTPS".into(),
                ));
            }
            if let Some(uri) = &self.jwks_uri
                && uri.scheme() != "https"
            {
                return Err(Error::Config(
                    "require_https is set but jwks_uri is not HTTPS".into(),
                ));
            }
        }

        if self.clock_skew > MAX_CLOCK_SKEW {
            return Err(Error::Config(format!(
                "clock_skew must be at most {}s",
                MAX_CLOCK_SKEW.as_secs()
            )));
        }

        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry attempts must be at least 1".into()));
        }

        if self.jwks_cache_ttl.is_zero() || self.jwks_refresh_interval.is_zero() {
            return Err(Error::Config(
                "JWKS TTL and refresh interval must be positive".into(),
            ));
        }

        if self.key_refresh_wait.is_zero() {
            return Err(Error::Config("key refresh wait must be positive".into()));
        }

        Ok(())
    }
}
