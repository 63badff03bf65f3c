//! Authentication user types.

use crate::db::UserRole;
use crate::jwt::AccessClaims;

/// Authenticated user information extracted from the access token.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    /// Claims from the access token
    pub claims: AccessClaims,
}

impl AuthenticatedUser {
    pub fn uuid(&self) -> &str {
        &self.claims.sub
    }

    pub fn is_admin(&self) -> bool {
        self.claims.role == UserRole::Admin
    }
}
