//! `Authorization: Bearer` extraction

use axum::http::{HeaderMap, header};

use super::error::{AuthError, Result};

const SCHEME: &str = "Bearer";

/// Pull the raw token out of the `Authorization` header.
///
/// The scheme name is matched case-insensitively (RFC 7235). A missing header,
/// a different scheme, or an empty credential all count as no token.
pub fn extract_bearer(headers: &HeaderMap) -> Result<&str> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or(AuthError::MissingToken)?
        .to_str()
        .map_err(|_| AuthError::MissingToken)?;

    let (scheme, token) = value.split_once(' ').ok_or(AuthError::MissingToken)?;
    if !scheme.eq_ignore_ascii_case(SCHEME) {
        return Err(AuthError::MissingToken);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::MissingToken);
    }

    Ok(token)
}
