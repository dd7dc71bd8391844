//! JWT parsing and validation

use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, TokenData, Validation, decode_header};

use super::bearer::extract_bearer;
use super::claims::{AuthenticatedPrincipal, JwtClaims};
use super::config::AuthConfig;
use super::error::{AuthError, Result};
use super::jwks::SigningKeyStore;

/// JWT validator
pub struct JwtValidator {
    issuer: String,
    audience: String,
    clock_skew: Duration,
    keys: Arc<SigningKeyStore>,
}

impl std::fmt::Debug for JwtValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtValidator")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("clock_skew", &self.clock_skew)
            .finish_non_exhaustive()
    }
}

impl JwtValidator {
    #[must_use]
    pub fn new(config: &AuthConfig, keys: Arc<SigningKeyStore>) -> Self {
        Self {
            issuer: config.issuer().to_owned(),
            audience: config.audience.clone(),
            clock_skew: config.clock_skew,
            keys,
        }
    }

    #[must_use]
    pub fn keys(&self) -> &Arc<SigningKeyStore> {
        &self.keys
    }

    /// Authenticate the request carrying `headers`.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<AuthenticatedPrincipal> {
        let token = extract_bearer(headers)?;
        let claims = self.validate(token).await?;
        Ok(AuthenticatedPrincipal::from_claims(&claims, &self.audience))
    }

    /// Verify signature, issuer, audience and lifetime of a compact JWT.
    pub async fn validate(&self, token: &str) -> Result<JwtClaims> {
        let header = decode_header(token).map_err(|_| AuthError::MalformedToken)?;

        // Shared-secret algorithms are never accepted from an external issuer
        if matches!(
            header.alg,
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
        ) {
            return Err(AuthError::BadSignature);
        }

        let candidates = self.keys.resolve(header.kid.as_deref(), header.alg).await?;

        let mut validation = Validation::new(header.alg);
        let with_slash = format!("{}/", self.issuer);
        validation.set_issuer(&[self.issuer.as_str(), with_slash.as_str()]);
        validation.set_audience(&[self.audience.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        // Lifetime is checked below, after the signature
        validation.validate_exp = false;
        validation.validate_nbf = false;

        let token_data = verify_with_any(token, &candidates, &validation)?;

        let now = i64::try_from(jsonwebtoken::get_current_timestamp()).unwrap_or(i64::MAX);
        validate_lifetime(&token_data.claims, now, self.clock_skew)?;

        Ok(token_data.claims)
    }
}

/// Decode with the first candidate whose signature verifies.
///
/// jsonwebtoken checks the signature before any claim, so an error other
/// than `InvalidSignature` comes from a key that did verify and is final.
fn verify_with_any(
    token: &str,
    candidates: &[DecodingKey],
    validation: &Validation,
) -> Result<TokenData<JwtClaims>> {
    for key in candidates {
        match jsonwebtoken::decode::<JwtClaims>(token, key, validation) {
            Err(e) if matches!(e.kind(), ErrorKind::InvalidSignature) => {}
            outcome => return outcome.map_err(AuthError::from),
        }
    }
    Err(AuthError::BadSignature)
}

/// Check `exp`, `nbf` and `iat` against `now` (unix seconds).
///
/// The token is live while `exp + skew > now`; `nbf` and `iat`, when present,
/// must not lie beyond `now + skew`.
pub fn validate_lifetime(claims: &JwtClaims, now: i64, skew: Duration) -> Result<()> {
    let skew = i64::try_from(skew.as_secs()).unwrap_or(i64::MAX);

    if claims.exp.saturating_add(skew) <= now {
        return Err(AuthError::TokenExpired);
    }

    let horizon = now.saturating_add(skew);
    if claims.nbf.is_some_and(|nbf| nbf > horizon) || claims.iat.is_some_and(|iat| iat > horizon)
    {
        return Err(AuthError::TokenNotYetValid);
    }

    Ok(())
}
