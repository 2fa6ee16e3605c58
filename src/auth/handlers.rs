use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use tracing::{info, instrument};

use crate::{
    auth::{
        dto::{LoginRequest, LoginResponse, PublicUser, SignupRequest},
        extractors::AuthUser,
        services,
    },
    errors::ApiError,
    extract::JsonBody,
    profiles::dto::ProfileView,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/signup/", post(signup))
        .route("/login/", post(login))
        .route("/logout/", post(logout))
}

#[instrument(skip(state, payload))]
pub async fn signup(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<SignupRequest>,
) -> Result<(StatusCode, Json<PublicUser>), ApiError> {
    let user = services::signup(&state, payload).await?;
    Ok((StatusCode::CREATED, Json(PublicUser::from(&user))))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let (token, user) = services::login(&state, payload).await?;
    let profile = state
        .profiles
        .find_profile(user.id)
        .await?
        .map(ProfileView::from);
    Ok(Json(LoginResponse {
        token: token.key,
        user: PublicUser::from(&user),
        profile,
    }))
}

#[instrument(skip(state))]
pub async fn logout(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<StatusCode, ApiError> {
    let removed = state.users.delete_token(user_id).await?;
    info!(user_id = %user_id, removed, "user logged out");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::repo_types::User;
    use time::OffsetDateTime;

    #[test]
    fn public_user_omits_credentials() {
        let user = User {
            id: uuid::Uuid::new_v4(),
            email: "test@example.com".into(),
            name: "Test".into(),
            first_name: String::new(),
            last_name: String::new(),
            username: "test".into(),
            password_hash: "$argon2id$secret".into(),
            created_at: OffsetDateTime::now_utc(),
        };
        let json = serde_json::to_value(PublicUser::from(&user)).unwrap();
        assert_eq!(json["email"], "test@example.com");
        assert_eq!(json["name"], "Test");
        assert!(json.get("password_hash").is_none());
        assert!(json.get("username").is_none());
    }
}
