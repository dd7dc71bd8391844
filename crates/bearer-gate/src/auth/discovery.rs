//! Identity provider metadata retrieval
//!
//! Resolves the JWKS endpoint through OIDC discovery and fetches key sets with
//! bounded retry. Every outbound call has a per-request timeout and is aborted
//! when the shutdown token fires.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::config::{AuthConfig, RetryPolicy};
use super::error::{AuthError, Result};
use super::jwks::JwkSet;

/// Subset of `/.well-known/openid-configuration` the gate relies on
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub jwks_uri: Url,
}

/// HTTP client for the identity provider's discovery and JWKS endpoints
pub struct MetadataClient {
    client: reqwest::Client,
    discovery_url: Url,
    expected_issuer: String,
    jwks_uri: OnceCell<Url>,
    require_https: bool,
    retry: RetryPolicy,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for MetadataClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataClient")
            .field("discovery_url", &self.discovery_url)
            .field("jwks_uri", &self.jwks_uri.get())
            .field("require_https", &self.require_https)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl MetadataClient {
    pub fn new(config: &AuthConfig, shutdown: CancellationToken) -> crate::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| crate::Error::Config(format!("Failed to create HTTP client: {e}")))?;

        let jwks_uri = OnceCell::new_with(config.jwks_uri.clone());

        Ok(Self {
            client,
            discovery_url: config.discovery_url()?,
            expected_issuer: config.issuer().to_owned(),
            jwks_uri,
            require_https: config.require_https,
            retry: config.retry,
            shutdown,
        })
    }

    /// Fetch the current key set, discovering the JWKS endpoint on first use.
    pub async fn fetch_key_set(&self) -> Result<JwkSet> {
        let jwks_uri = self
            .jwks_uri
            .get_or_try_init(|| async {
                let metadata = self.discover().await?;
                Ok::<_, AuthError>(metadata.jwks_uri)
            })
            .await?;

        self.ensure_transport(jwks_uri)?;
        self.get_json_with_retry(jwks_uri).await
    }

    /// Run OIDC discovery against the authority.
    pub async fn discover(&self) -> Result<ProviderMetadata> {
        tracing::info!(discovery_url = %self.discovery_url, "Discovering identity provider metadata");

        self.ensure_transport(&self.discovery_url)?;
        let metadata: ProviderMetadata = self.get_json_with_retry(&self.discovery_url).await?;

        if metadata.issuer.trim_end_matches('/') != self.expected_issuer {
            tracing::warn!(
                advertised = %metadata.issuer,
                configured = %self.expected_issuer,
                "Discovery document advertises a different issuer"
            );
        }

        tracing::info!(jwks_uri = %metadata.jwks_uri, "Identity provider metadata discovered");
        Ok(metadata)
    }

    fn ensure_transport(&self, url: &Url) -> Result<()> {
        if self.require_https && url.scheme() != "https" {
            tracing::error!(url = %url, "Refusing to fetch metadata over plain HTTP");
            return Err(AuthError::ProviderUnreachable(format!(
                "HTTPS required for {url}"
            )));
        }
        Ok(())
    }

    async fn get_json_with_retry<T: DeserializeOwned>(&self, url: &Url) -> Result<T> {
        let mut last_error = String::new();

        for attempt in 1..=self.retry.max_attempts {
            let outcome = tokio::select! {
                outcome = self.get_json::<T>(url) => outcome,
                () = self.shutdown.cancelled() => {
                    return Err(AuthError::ProviderUnreachable("shutting down".into()));
                }
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::warn!(
                        url = %url,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        error = %e,
                        "Metadata fetch failed"
                    );
                    last_error = e.to_string();
                }
            }

            if attempt < self.retry.max_attempts {
                let delay = self.retry.backoff(attempt);
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = self.shutdown.cancelled() => {
                        return Err(AuthError::ProviderUnreachable("shutting down".into()));
                    }
                }
            }
        }

        Err(AuthError::ProviderUnreachable(last_error))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &Url) -> reqwest::Result<T> {
        self.client
            .get(url.clone())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }
}
