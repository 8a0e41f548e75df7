use axum::{extract::FromRequestParts, http::request::Parts};

use crate::error::GatewayError;
use crate::security::{AuthContext, AuthError};

pub const ADMIN_ROLE: &str = "admin";

/// Caller holding the admin role. Requires the auth middleware to have run.
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthContext);

impl<S: Send + Sync> FromRequestParts<S> for AdminUser {
    type Rejection = GatewayError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ctx = parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or(GatewayError::Unauthorized(AuthError::MissingHeader))?;
        if !ctx.has_role(ADMIN_ROLE) {
            tracing::warn!(user_id = %ctx.user_id, "Admin action denied");
            return Err(GatewayError::Forbidden("admin role required".to_string()));
        }
        Ok(AdminUser(ctx))
    }
}
