//! Bearer token authentication
//!
//! Validates Keycloak-issued JWTs against the realm's published signing keys.
//!
//! # Features
//!
//! - OIDC discovery of the JWKS endpoint from the realm authority
//! - RS256/384/512, PS256/384/512, ES256/384 and EdDSA signatures via `jsonwebtoken`
//! - Key set held in an atomically swapped snapshot; concurrent refreshes
//!   collapse into one fetch and a stale set keeps serving during outages
//! - Issuer, audience and lifetime checks with bounded clock skew
//! - Authentication and authorization as ordered pipeline stages
//!
//! Rejections are reported to clients as a bare 401/403. The precise
//! [`AuthError`] kind only reaches logs and metrics.

mod bearer;
mod claims;
mod config;
mod discovery;
mod error;
pub(crate) mod jwks;
mod jwt;
mod middleware;
mod policy;

pub use bearer::extract_bearer;
pub use claims::{AuthenticatedPrincipal, JwtClaims, OneOrMany, RoleSet};
pub use config::{
    AuthConfig, DEFAULT_CLOCK_SKEW, DEFAULT_HTTP_TIMEOUT, DEFAULT_JWKS_CACHE_TTL,
    DEFAULT_JWKS_MAX_STALE, DEFAULT_JWKS_REFRESH_INTERVAL, DEFAULT_KEY_REFRESH_WAIT,
    MAX_CLOCK_SKEW, RetryPolicy,
};
pub use discovery::{MetadataClient, ProviderMetadata};
pub use error::{AuthError, Result};
pub use jwks::{Jwk, JwkSet, JwksRefreshTask, KeySnapshot, KeySource, SigningKeyStore};
pub use jwt::{JwtValidator, validate_lifetime};
pub use middleware::{AuthenticationStage, AuthorizationStage};
pub use policy::{Authenticated, AuthorizationPolicy};
