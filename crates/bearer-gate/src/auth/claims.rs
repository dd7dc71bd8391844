//! JWT claims types

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Audience can be a single string or array of strings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn contains(&self, value: &str) -> bool {
        match self {
            Self::One(s) => s == value,
            Self::Many(v) => v.iter().any(|s| s == value),
        }
    }

    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Self::One(s) => vec![s.clone()],
            Self::Many(v) => v.clone(),
        }
    }
}

/// Keycloak role container (`realm_access`, `resource_access.<client>`)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoleSet {
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Claims carried by an access token.
///
/// `exp`, `iss` and `sub` are required; everything else is optional so that
/// tokens from other realms or clients still parse.
#[derive(Debug, Clone, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub iss: String,
    #[serde(default)]
    pub aud: Option<OneOrMany>,
    pub exp: i64,
    #[serde(default)]
    pub nbf: Option<i64>,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub jti: Option<String>,
    #[serde(default)]
    pub azp: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub realm_access: Option<RoleSet>,
    #[serde(default)]
    pub resource_access: HashMap<String, RoleSet>,
}

impl JwtClaims {
    /// Realm roles plus the client roles granted for `client`.
    pub fn roles_for(&self, client: &str) -> Vec<String> {
        let mut roles: Vec<String> = self
            .realm_access
            .iter()
            .flat_map(|access| access.roles.iter().cloned())
            .collect();

        if let Some(access) = self.resource_access.get(client) {
            for role in &access.roles {
                if !roles.contains(role) {
                    roles.push(role.clone());
                }
            }
        }

        roles
    }
}

/// Identity attached to a request once its token has been accepted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthenticatedPrincipal {
    /// Subject (from JWT sub claim)
    pub subject: String,
    pub issuer: String,
    pub audience: Vec<String>,
    /// Expiry as unix seconds
    pub expires_at: i64,
    pub issued_at: Option<i64>,
    /// Authorized party (client that requested the token)
    pub authorized_party: Option<String>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub scopes: Vec<String>,
    pub roles: Vec<String>,
}

impl AuthenticatedPrincipal {
    /// Build the principal; client roles are taken for `audience`.
    pub fn from_claims(claims: &JwtClaims, audience: &str) -> Self {
        Self {
            subject: claims.sub.clone(),
            issuer: claims.iss.clone(),
            audience: claims
                .aud
                .as_ref()
                .map(OneOrMany::to_vec)
                .unwrap_or_default(),
            expires_at: claims.exp,
            issued_at: claims.iat,
            authorized_party: claims.azp.clone(),
            username: claims.preferred_username.clone(),
            email: claims.email.clone(),
            name: claims.name.clone(),
            scopes: claims
                .scope
                .as_deref()
                .map(|s| s.split_whitespace().map(str::to_owned).collect())
                .unwrap_or_default(),
            roles: claims.roles_for(audience),
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_or_many_one() {
        let aud = OneOrMany::One("api".to_string());
        assert!(aud.contains("api"));
        assert!(!aud.contains("other"));
        assert_eq!(aud.to_vec(), vec!["api"]);
    }

    #[test]
    fn test_one_or_many_many() {
        let aud = OneOrMany::Many(vec!["api".to_string(), "account".to_string()]);
        assert!(aud.contains("api"));
        assert!(aud.contains("account"));
        assert!(!aud.contains("other"));
        assert_eq!(aud.to_vec(), vec!["api", "account"]);
    }

    #[test]
    fn test_deserialize_minimal_claims() {
        let json = r#"{
            "sub": "user123",
            "iss": "https://idp.example/realms/demo",
            "exp": 1700000000
        }"#;
        let claims: JwtClaims = serde_json::from_str(json).unwrap();
        assert_eq!(claims.sub, "user123");
        assert!(claims.aud.is_none());
        assert!(claims.realm_access.is_none());
        assert!(claims.resource_access.is_empty());
    }

    #[test]
    fn test_deserialize_requires_exp() {
        let json = r#"{"sub": "user123", "iss": "https://idp.example/realms/demo"}"#;
        assert!(serde_json::from_str::<JwtClaims>(json).is_err());
    }

    #[test]
    fn test_deserialize_keycloak_access_token() {
        let json = r#"{
            "exp": 1700000300,
            "iat": 1700000000,
            "jti": "6f1c2f0e",
            "iss": "https://idp.example/realms/demo",
            "aud": ["my-api", "account"],
            "sub": "f3a8c2d4-1b2c-4d5e-8f90-123456789abc",
            "typ": "Bearer",
            "azp": "web-frontend",
            "realm_access": {"roles": ["offline_access", "user"]},
            "resource_access": {
                "my-api": {"roles": ["reader", "user"]},
                "account": {"roles": ["manage-account"]}
            },
            "scope": "openid profile email",
            "preferred_username": "alice",
            "email": "alice@example.com",
            "name": "Alice Liddell"
        }"#;
        let claims: JwtClaims = serde_json::from_str(json).unwrap();
        let principal = AuthenticatedPrincipal::from_claims(&claims, "my-api");

        assert_eq!(principal.subject, "f3a8c2d4-1b2c-4d5e-8f90-123456789abc");
        assert_eq!(principal.audience, vec!["my-api", "account"]);
        assert_eq!(principal.authorized_party.as_deref(), Some("web-frontend"));
        assert_eq!(principal.username.as_deref(), Some("alice"));
        assert_eq!(principal.scopes, vec!["openid", "profile", "email"]);
        assert_eq!(principal.roles, vec!["offline_access", "user", "reader"]);
        assert!(principal.has_role("reader"));
        assert!(!principal.has_role("manage-account"));
        assert!(principal.has_scope("email"));
    }

    #[test]
    fn test_principal_without_optional_claims() {
        let json = r#"{
            "sub": "service-account-batch",
            "iss": "https://idp.example/realms/demo",
            "aud": "my-api",
            "exp": 1700000000
        }"#;
        let claims: JwtClaims = serde_json::from_str(json).unwrap();
        let principal = AuthenticatedPrincipal::from_claims(&claims, "my-api");

        assert_eq!(principal.audience, vec!["my-api"]);
        assert!(principal.scopes.is_empty());
        assert!(principal.roles.is_empty());
        assert!(principal.issued_at.is_none());
    }
}
