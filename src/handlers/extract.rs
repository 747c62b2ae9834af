use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::utils::error::AppError;

pub const USER_ID_HEADER: &str = "X-User-Id";

/// Caller identity, taken from `X-User-Id` as set by the upstream auth proxy.
#[derive(Debug, Clone, Copy)]
pub struct CurrentUser(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::AuthError(format!("Missing {} header", USER_ID_HEADER)))?;

        Uuid::parse_str(raw.trim())
            .map(CurrentUser)
            .map_err(|_| AppError::AuthError(format!("Malformed {} header", USER_ID_HEADER)))
    }
}
