//! Authentication error types

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Request-time rejection reasons.
///
/// The variant is only ever reported through logs and metrics. Callers see a
/// uniform 401 (or 403 for [`AuthError::Forbidden`]) so that a forger cannot
/// learn which check failed.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("authentication required")]
    MissingToken,

    #[error("malformed token")]
    MalformedToken,

    #[error("key not found: {0}")]
    UnknownKey(String),

    #[error("invalid signature")]
    BadSignature,

    #[error("invalid issuer")]
    IssuerMismatch,

    #[error("invalid audience")]
    AudienceMismatch,

    #[error("token expired")]
    TokenExpired,

    #[error("token not yet valid")]
    TokenNotYetValid,

    #[error("identity provider unreachable: {0}")]
    ProviderUnreachable(String),

    #[error("insufficient permissions")]
    Forbidden,
}

impl AuthError {
    /// Stable label used in diagnostics and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::MissingToken => "missing_token",
            Self::MalformedToken => "malformed_token",
            Self::UnknownKey(_) => "unknown_key",
            Self::BadSignature => "bad_signature",
            Self::IssuerMismatch => "issuer_mismatch",
            Self::AudienceMismatch => "audience_mismatch",
            Self::TokenExpired => "token_expired",
            Self::TokenNotYetValid => "token_not_yet_valid",
            Self::ProviderUnreachable(_) => "provider_unreachable",
            Self::Forbidden => "forbidden",
        }
    }

    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Forbidden => StatusCode::FORBIDDEN,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match err.kind() {
            ErrorKind::ExpiredSignature => Self::TokenExpired,
            ErrorKind::ImmatureSignature => Self::TokenNotYetValid,
            ErrorKind::InvalidIssuer => Self::IssuerMismatch,
            ErrorKind::InvalidAudience => Self::AudienceMismatch,
            ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => Self::BadSignature,
            ErrorKind::MissingRequiredClaim(claim) => match claim.as_str() {
                "iss" => Self::IssuerMismatch,
                "aud" => Self::AudienceMismatch,
                _ => Self::MalformedToken,
            },
            _ => Self::MalformedToken,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = if status == StatusCode::FORBIDDEN {
            ErrorBody { error: "forbidden" }
        } else {
            ErrorBody {
                error: "unauthorized",
            }
        };

        let mut response = (status, Json(body)).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
