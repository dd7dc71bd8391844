//! HTTP handlers

use axum::Json;
use axum::response::IntoResponse;
use serde::Serialize;

use crate::auth::AuthenticatedPrincipal;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Identity echoed back to an authenticated caller
#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub subject: String,
    pub issuer: String,
    pub audience: Vec<String>,
    pub expires_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
}

impl From<AuthenticatedPrincipal> for MeResponse {
    fn from(principal: AuthenticatedPrincipal) -> Self {
        Self {
            subject: principal.subject,
            issuer: principal.issuer,
            audience: principal.audience,
            expires_at: principal.expires_at,
            username: principal.username,
            email: principal.email,
            roles: principal.roles,
            scopes: principal.scopes,
        }
    }
}

pub async fn get_me(principal: AuthenticatedPrincipal) -> Json<MeResponse> {
    Json(principal.into())
}

#[cfg(feature = "metrics")]
pub async fn metrics() -> impl IntoResponse {
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        crate::observability::render_metrics(),
    )
}
