//! Bearer-token extractor for handlers that need an authenticated identity.

use std::sync::Arc;

use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use libris_authz::jwt::JwtKeys;

use crate::error::AppError;

/// Identity resolved from `Authorization: Bearer <token>`.
///
/// Any router state exposing `Arc<JwtKeys>` through [`FromRef`] can use it:
///
/// ```ignore
/// async fn rate(user: AuthUser, Path(id): Path<String>) -> AppResult<Json<BookView>> {
///     tracing::info!(user_id = %user.user_id, book_id = %id, "rating book");
///     // ...
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: String,
}

impl<S> FromRequestParts<S> for AuthUser
where
    Arc<JwtKeys>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::unauthorized("Missing Authorization header"))?;

        let token = header.strip_prefix("Bearer ").ok_or_else(|| {
            AppError::unauthorized("Invalid Authorization format. Expected: Bearer <token>")
        })?;

        let keys = Arc::<JwtKeys>::from_ref(state);
        let claims = keys.validate(token.trim()).map_err(|e| {
            tracing::debug!(error = %e, "bearer token rejected");
            AppError::unauthorized("Invalid or expired token")
        })?;

        Ok(AuthUser {
            user_id: claims.sub,
        })
    }
}
