use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::Redirect,
    routing::{get, post},
    Json, Router,
};
use tracing::{error, instrument};
use uuid::Uuid;

use crate::{
    auth::extractors::AuthUser,
    errors::ApiError,
    extract::{JsonBody, PathParam, QueryParams},
    profiles::{
        dto::{ProfileCreateRequest, ProfileFilter, ProfileUpdateRequest, ProfileView},
        services,
    },
    state::AppState,
};

const IMAGE_BODY_LIMIT: usize = 10 * 1024 * 1024;

pub fn profile_routes() -> Router<AppState> {
    Router::new()
        .route("/profile/", get(list_profiles).post(create_profile))
        .route(
            "/profile/:user_id/",
            get(get_profile)
                .put(put_profile)
                .patch(patch_profile)
                .delete(delete_profile),
        )
        .route(
            "/profile/:user_id/image/",
            post(upload_profile_image)
                .get(profile_image_redirect)
                .layer(DefaultBodyLimit::max(IMAGE_BODY_LIMIT)),
        )
        .route("/get-user-profile/", get(get_user_profile))
}

#[instrument(skip(state))]
pub async fn get_user_profile(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<ProfileView>, ApiError> {
    let view = services::retrieve(&state, user_id).await?;
    Ok(Json(view))
}

#[instrument(skip(state))]
pub async fn list_profiles(
    State(state): State<AppState>,
    AuthUser(_caller): AuthUser,
    QueryParams(filter): QueryParams<ProfileFilter>,
) -> Result<Json<Vec<ProfileView>>, ApiError> {
    Ok(Json(services::list(&state, filter).await?))
}

#[instrument(skip(state, payload))]
pub async fn create_profile(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<ProfileCreateRequest>,
) -> Result<(StatusCode, Json<ProfileView>), ApiError> {
    let view = services::create(&state, payload).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

#[instrument(skip(state))]
pub async fn get_profile(
    State(state): State<AppState>,
    AuthUser(_caller): AuthUser,
    PathParam(user_id): PathParam<Uuid>,
) -> Result<Json<ProfileView>, ApiError> {
    Ok(Json(services::retrieve(&state, user_id).await?))
}

#[instrument(skip(state, payload))]
pub async fn put_profile(
    State(state): State<AppState>,
    AuthUser(_caller): AuthUser,
    PathParam(user_id): PathParam<Uuid>,
    JsonBody(payload): JsonBody<ProfileUpdateRequest>,
) -> Result<Json<ProfileView>, ApiError> {
    Ok(Json(services::update(&state, user_id, payload, false).await?))
}

#[instrument(skip(state, payload))]
pub async fn patch_profile(
    State(state): State<AppState>,
    AuthUser(_caller): AuthUser,
    PathParam(user_id): PathParam<Uuid>,
    JsonBody(payload): JsonBody<ProfileUpdateRequest>,
) -> Result<Json<ProfileView>, ApiError> {
    Ok(Json(services::update(&state, user_id, payload, true).await?))
}

#[instrument(skip(state))]
pub async fn delete_profile(
    State(state): State<AppState>,
    AuthUser(_caller): AuthUser,
    PathParam(user_id): PathParam<Uuid>,
) -> Result<StatusCode, ApiError> {
    services::delete(&state, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /profile/:user_id/image/ (multipart, field `profile_image`)
#[instrument(skip(state, mp))]
pub async fn upload_profile_image(
    State(state): State<AppState>,
    AuthUser(_caller): AuthUser,
    PathParam(user_id): PathParam<Uuid>,
    mut mp: Multipart,
) -> Result<Json<ProfileView>, ApiError> {
    while let Some(field) = mp.next_field().await.map_err(|e| {
        error!(error = %e, "multipart read failed");
        ApiError::BadRequest("malformed multipart body".into())
    })? {
        if field.name() != Some("profile_image") {
            continue;
        }
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let body = field
            .bytes()
            .await
            .map_err(|_| ApiError::BadRequest("malformed multipart body".into()))?;
        let view = services::upload_image(&state, user_id, &content_type, body).await?;
        return Ok(Json(view));
    }
    Err(ApiError::field("profile_image", "No file was submitted."))
}

/// 307 to a short-lived URL of the stored image.
#[instrument(skip(state))]
pub async fn profile_image_redirect(
    State(state): State<AppState>,
    AuthUser(_caller): AuthUser,
    PathParam(user_id): PathParam<Uuid>,
) -> Result<Redirect, ApiError> {
    let url = services::image_url(&state, user_id).await?;
    Ok(Redirect::temporary(&url))
}
