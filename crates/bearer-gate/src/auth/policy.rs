//! Authorization policies

use super::claims::AuthenticatedPrincipal;

/// Decides whether an authenticated principal may proceed.
///
/// A denial surfaces as 403. Policies run after authentication succeeded and
/// must not perform I/O.
pub trait AuthorizationPolicy: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    fn allows(&self, principal: &AuthenticatedPrincipal) -> bool;
}

/// Any authenticated principal is allowed
#[derive(Debug, Clone, Copy, Default)]
pub struct Authenticated;

impl AuthorizationPolicy for Authenticated {
    fn name(&self) -> &'static str {
        "authenticated"
    }

    fn allows(&self, _principal: &AuthenticatedPrincipal) -> bool {
        true
    }
}
