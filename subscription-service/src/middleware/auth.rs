//! Caller context middleware.
//!
//! Extracts caller identity from request headers set by the edge gateway
//! after it has authenticated the user. This service trusts the headers;
//! it performs authorization, not authentication.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;
use uuid::Uuid;

/// Caller context extracted from request headers.
#[derive(Debug, Clone, Copy)]
pub struct AuthContext {
    /// Authenticated user making the request.
    pub user_id: Uuid,
    /// Whether the gateway marked this caller as an administrator.
    pub is_admin: bool,
}

impl AuthContext {
    /// Reject unless the caller is an administrator.
    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.is_admin {
            Ok(())
        } else {
            Err(AppError::Forbidden(anyhow::anyhow!(
                "administrator access required"
            )))
        }
    }

    /// Reject unless the caller is `subject` or an administrator.
    pub fn authorize_subject(&self, subject: Uuid) -> Result<(), AppError> {
        if self.is_admin || self.user_id == subject {
            Ok(())
        } else {
            Err(AppError::Forbidden(anyhow::anyhow!(
                "caller may not act on behalf of another user"
            )))
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                AppError::Unauthorized(anyhow::anyhow!("Missing x-user-id header"))
            })?;
        let user_id = Uuid::parse_str(user_id).map_err(|_| {
            AppError::Unauthorized(anyhow::anyhow!("x-user-id header is not a UUID"))
        })?;

        let is_admin = parts
            .headers
            .get("x-is-admin")
            .and_then(|v| v.to_str().ok())
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        Ok(Self { user_id, is_admin })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_passes_all_checks() {
        let ctx = AuthContext {
            user_id: Uuid::new_v4(),
            is_admin: true,
        };
        ctx.require_admin().unwrap();
        ctx.authorize_subject(Uuid::new_v4()).unwrap();
    }

    #[test]
    fn user_may_only_act_on_self() {
        let user_id = Uuid::new_v4();
        let ctx = AuthContext {
            user_id,
            is_admin: false,
        };

        ctx.authorize_subject(user_id).unwrap();
        assert!(matches!(
            ctx.require_admin().unwrap_err(),
            AppError::Forbidden(_)
        ));
        assert!(matches!(
            ctx.authorize_subject(Uuid::new_v4()).unwrap_err(),
            AppError::Forbidden(_)
        ));
    }
}
