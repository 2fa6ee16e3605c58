use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use tracing::warn;
use uuid::Uuid;

use crate::errors::ApiError;
use crate::state::AppState;

/// Resolves the `Authorization: Token <key>` header to the owning user id.
/// `Bearer <key>` is accepted as well.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub Uuid);

fn token_from_header(value: &str) -> Option<&str> {
    let (scheme, key) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("token") && !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let key = key.trim();
    (!key.is_empty() && !key.contains(' ')).then_some(key)
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| {
                ApiError::Unauthorized("Authentication credentials were not provided.".into())
            })?;

        let key = token_from_header(header)
            .ok_or_else(|| ApiError::Unauthorized("Invalid token header.".into()))?;

        match state.users.find_token(key).await? {
            Some(token) => Ok(AuthUser(token.user_id)),
            None => {
                warn!("unknown token presented");
                Err(ApiError::Unauthorized("Invalid token.".into()))
            }
        }
    }
}
