//! Authentication and authorization pipeline stages

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{FromRequestParts, Request};
use axum::http::request::Parts;
use axum::response::IntoResponse;

use super::claims::AuthenticatedPrincipal;
use super::error::AuthError;
use super::jwt::JwtValidator;
use super::policy::AuthorizationPolicy;
use crate::pipeline::{Flow, Stage};

/// Validates the bearer token and attaches the principal to the request
#[derive(Debug, Clone)]
pub struct AuthenticationStage {
    validator: Arc<JwtValidator>,
}

impl AuthenticationStage {
    #[must_use]
    pub const fn new(validator: Arc<JwtValidator>) -> Self {
        Self { validator }
    }
}

#[async_trait]
impl Stage for AuthenticationStage {
    fn name(&self) -> &'static str {
        "authentication"
    }

    async fn process(&self, request: &mut Request) -> Flow {
        match self.validator.authenticate(request.headers()).await {
            Ok(principal) => {
                tracing::debug!(subject = %principal.subject, "Request authenticated");
                #[cfg(feature = "metrics")]
                crate::observability::record_authentication("success");

                request.extensions_mut().insert(principal);
                Flow::Continue
            }
            Err(e) => {
                // Only the kind is logged; token contents never are
                match &e {
                    AuthError::MissingToken => {
                        tracing::debug!(kind = e.kind(), "Authentication failed");
                    }
                    AuthError::ProviderUnreachable(reason) => {
                        tracing::error!(kind = e.kind(), reason = %reason, "Authentication failed");
                    }
                    _ => tracing::warn!(kind = e.kind(), "Authentication failed"),
                }
                #[cfg(feature = "metrics")]
                crate::observability::record_authentication(e.kind());

                Flow::Respond(e.into_response())
            }
        }
    }
}

/// Applies an [`AuthorizationPolicy`] to the authenticated principal
#[derive(Debug, Clone)]
pub struct AuthorizationStage {
    policy: Arc<dyn AuthorizationPolicy>,
}

impl AuthorizationStage {
    #[must_use]
    pub fn new(policy: impl AuthorizationPolicy + 'static) -> Self {
        Self {
            policy: Arc::new(policy),
        }
    }
}

#[async_trait]
impl Stage for AuthorizationStage {
    fn name(&self) -> &'static str {
        "authorization"
    }

    async fn process(&self, request: &mut Request) -> Flow {
        let Some(principal) = request.extensions().get::<AuthenticatedPrincipal>() else {
            tracing::warn!("Authorization stage reached without an authenticated principal");
            return Flow::Respond(AuthError::MissingToken.into_response());
        };

        if self.policy.allows(principal) {
            Flow::Continue
        } else {
            tracing::warn!(
                subject = %principal.subject,
                policy = self.policy.name(),
                "Authorization denied"
            );
            #[cfg(feature = "metrics")]
            crate::observability::record_authentication(AuthError::Forbidden.kind());

            Flow::Respond(AuthError::Forbidden.into_response())
        }
    }
}

impl<S: Send + Sync> FromRequestParts<S> for AuthenticatedPrincipal {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Self>()
            .cloned()
            .ok_or(AuthError::MissingToken)
    }
}
