use bytes::Bytes;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::auth::repo_types::{NewUser, UserChanges};
use crate::auth::services::{generate_unique_username, unusable_password, validate_new_email};
use crate::errors::{ApiError, ValidationErrors, REQUIRED};
use crate::profiles::dto::{
    NestedUserUpdate, ProfileCreateRequest, ProfileFilter, ProfileUpdateRequest, ProfileView,
};
use crate::profiles::repo_types::{ProfileFields, UpdateOutcome};
use crate::state::AppState;
use crate::storage::{ext_from_mime, profile_image_key};

pub const IMAGE_URL_TTL_SECS: u64 = 10 * 60;

impl From<NestedUserUpdate> for UserChanges {
    fn from(u: NestedUserUpdate) -> Self {
        Self {
            name: u.name,
            first_name: u.first_name,
            last_name: u.last_name,
        }
    }
}

pub async fn list(state: &AppState, filter: ProfileFilter) -> Result<Vec<ProfileView>, ApiError> {
    let rows = state.profiles.list_profiles(filter.user_id).await?;
    Ok(rows.into_iter().map(ProfileView::from).collect())
}

pub async fn retrieve(state: &AppState, user_id: Uuid) -> Result<ProfileView, ApiError> {
    state
        .profiles
        .find_profile(user_id)
        .await?
        .map(ProfileView::from)
        .ok_or(ApiError::NotFound)
}

/// Creates a user without a usable password and its profile in one write.
#[instrument(skip(state, payload))]
pub async fn create(
    state: &AppState,
    payload: ProfileCreateRequest,
) -> Result<ProfileView, ApiError> {
    let mut errors = ValidationErrors::new();
    let Some(nested) = payload.user else {
        errors.add("user", REQUIRED);
        return Err(ApiError::Validation(errors));
    };

    let mut user_errors = ValidationErrors::new();
    let email = validate_new_email(
        state.users.as_ref(),
        nested.email.as_deref(),
        state.config.unique_email,
        "email",
        &mut user_errors,
    )
    .await?;
    errors.nest("user", user_errors);
    errors.into_result()?;
    let Some(email) = email else {
        return Err(anyhow::anyhow!("validated profile payload is missing the email").into());
    };

    let name = nested.name.unwrap_or_default().trim().to_string();
    let username =
        generate_unique_username(state.users.as_ref(), &[name.as_str(), email.as_str(), "user"])
            .await?;

    let mut fields = ProfileFields::default();
    payload.changes.apply(&mut fields);

    let record = state
        .profiles
        .create_profile_with_user(
            &NewUser {
                email,
                name,
                username,
                password_hash: unusable_password(),
            },
            &fields,
        )
        .await?;
    info!(user_id = %record.profile.user_id, profile_id = %record.profile.id, "profile created");
    Ok(record.into())
}

/// Applies a profile update and copies whitelisted nested user fields onto
/// the owning user, both in one transaction. `partial` is false for PUT,
/// which requires the nested `user` object.
#[instrument(skip(state, payload))]
pub async fn update(
    state: &AppState,
    user_id: Uuid,
    payload: ProfileUpdateRequest,
    partial: bool,
) -> Result<ProfileView, ApiError> {
    if !partial && payload.user.is_none() {
        return Err(ApiError::field("user", REQUIRED));
    }
    let user_changes = payload
        .user
        .map(UserChanges::from)
        .filter(|c| !c.is_empty());

    let outcome = state
        .profiles
        .update_profile(user_id, &payload.changes, user_changes.as_ref())
        .await?;

    match outcome {
        UpdateOutcome::Updated(record) => {
            info!(
                user_id = %user_id,
                synced_user = user_changes.is_some(),
                "profile updated"
            );
            Ok(record.into())
        }
        UpdateOutcome::ProfileMissing => Err(ApiError::NotFound),
        UpdateOutcome::UserMissing => {
            warn!(user_id = %user_id, "profile owner vanished during update; nothing written");
            Err(ApiError::UserNotFound)
        }
    }
}

#[instrument(skip(state))]
pub async fn delete(state: &AppState, user_id: Uuid) -> Result<(), ApiError> {
    let existing = state.profiles.find_profile(user_id).await?;
    if !state.profiles.delete_profile(user_id).await? {
        return Err(ApiError::NotFound);
    }
    if let Some(key) = existing.and_then(|r| r.profile.fields.profile_image) {
        if let Err(e) = state.storage.delete_object(&key).await {
            warn!(error = %e, key = %key, "failed to delete profile image");
        }
    }
    info!(user_id = %user_id, "profile deleted");
    Ok(())
}

/// Stores a new profile image and drops the previous one.
#[instrument(skip(state, body))]
pub async fn upload_image(
    state: &AppState,
    user_id: Uuid,
    content_type: &str,
    body: Bytes,
) -> Result<ProfileView, ApiError> {
    let ext = ext_from_mime(content_type)
        .ok_or_else(|| ApiError::BadRequest(format!("unsupported image type: {content_type}")))?;
    if body.is_empty() {
        return Err(ApiError::BadRequest("empty image".into()));
    }
    let previous = state
        .profiles
        .find_profile(user_id)
        .await?
        .ok_or(ApiError::NotFound)?
        .profile
        .fields
        .profile_image;

    let key = profile_image_key(user_id, ext);
    state.storage.put_object(&key, body, content_type).await?;

    let Some(record) = state.profiles.set_profile_image(user_id, Some(&key)).await? else {
        // profile deleted between lookup and write
        if let Err(e) = state.storage.delete_object(&key).await {
            warn!(error = %e, key = %key, "failed to delete orphaned image");
        }
        return Err(ApiError::NotFound);
    };

    if let Some(old) = previous {
        if let Err(e) = state.storage.delete_object(&old).await {
            warn!(error = %e, key = %old, "failed to delete replaced image");
        }
    }
    info!(user_id = %user_id, key = %key, "profile image stored");
    Ok(record.into())
}

pub async fn image_url(state: &AppState, user_id: Uuid) -> Result<String, ApiError> {
    let key = state
        .profiles
        .find_profile(user_id)
        .await?
        .and_then(|r| r.profile.fields.profile_image)
        .ok_or(ApiError::NotFound)?;
    let url = state.storage.presign_get(&key, IMAGE_URL_TTL_SECS).await?;
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::dto::SignupRequest;
    use crate::auth::services::signup;
    use crate::profiles::dto::NestedUserCreate;
    use crate::profiles::repo_types::ProfileChanges;

    async fn signed_up(state: &AppState, email: &str) -> Uuid {
        signup(
            state,
            SignupRequest {
                email: Some(email.into()),
                name: Some("Original Name".into()),
                password: Some("pa55word!".into()),
            },
        )
        .await
        .unwrap()
        .id
    }

    #[tokio::test]
    async fn profile_only_update_leaves_user_untouched() {
        let (state, store) = AppState::fake();
        let user_id = signed_up(&state, "a@example.com").await;

        let view = update(
            &state,
            user_id,
            ProfileUpdateRequest {
                user: None,
                changes: ProfileChanges {
                    city: Some(Some("Porto".into())),
                    ..Default::default()
                },
            },
            true,
        )
        .await
        .unwrap();
        assert_eq!(view.fields.city.as_deref(), Some("Porto"));

        let user = store.user(user_id).await.unwrap();
        assert_eq!(user.name, "Original Name");
        assert_eq!(user.first_name, "");
        assert_eq!(user.last_name, "");
    }

    #[tokio::test]
    async fn nested_user_name_is_synced_with_profile_fields() {
        let (state, store) = AppState::fake();
        let user_id = signed_up(&state, "b@example.com").await;

        let view = update(
            &state,
            user_id,
            ProfileUpdateRequest {
                user: Some(NestedUserUpdate {
                    name: Some("X".into()),
                    first_name: None,
                    last_name: Some("Y".into()),
                }),
                changes: ProfileChanges {
                    bio: Some(Some("about me".into())),
                    ..Default::default()
                },
            },
            false,
        )
        .await
        .unwrap();
        assert_eq!(view.user.name, "X");
        assert_eq!(view.fields.bio.as_deref(), Some("about me"));

        let user = store.user(user_id).await.unwrap();
        assert_eq!(user.name, "X");
        assert_eq!(user.first_name, "");
        assert_eq!(user.last_name, "Y");
        assert_eq!(user.email, "b@example.com");

        let stored = retrieve(&state, user_id).await.unwrap();
        assert_eq!(stored.fields.bio.as_deref(), Some("about me"));
    }

    #[tokio::test]
    async fn put_requires_nested_user() {
        let (state, _) = AppState::fake();
        let user_id = signed_up(&state, "c@example.com").await;
        let err = update(&state, user_id, ProfileUpdateRequest::default(), false)
            .await
            .unwrap_err();
        match err {
            ApiError::Validation(errors) => assert!(errors.get("user").is_some()),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn vanished_owner_surfaces_error_and_writes_nothing() {
        let (state, store) = AppState::fake();
        let user_id = signed_up(&state, "d@example.com").await;
        store.forget_user(user_id).await;

        let err = update(
            &state,
            user_id,
            ProfileUpdateRequest {
                user: Some(NestedUserUpdate {
                    name: Some("Ghost".into()),
                    ..Default::default()
                }),
                changes: ProfileChanges {
                    bio: Some(Some("should not persist".into())),
                    ..Default::default()
                },
            },
            true,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::UserNotFound));
        assert!(store.user(user_id).await.is_none());
    }

    #[tokio::test]
    async fn missing_profile_is_not_found() {
        let (state, _) = AppState::fake();
        let err = retrieve(&state, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound));

        let err = update(&state, Uuid::new_v4(), ProfileUpdateRequest::default(), true)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound));
    }

    #[tokio::test]
    async fn nested_create_builds_user_and_profile() {
        let (state, store) = AppState::fake();
        let view = create(
            &state,
            ProfileCreateRequest {
                user: Some(NestedUserCreate {
                    email: Some("New@Example.com".into()),
                    name: Some("New Person".into()),
                }),
                changes: ProfileChanges {
                    country: Some(Some("PT".into())),
                    ..Default::default()
                },
            },
        )
        .await
        .unwrap();
        assert_eq!(view.user.email, "new@example.com");
        assert_eq!(view.fields.country.as_deref(), Some("PT"));

        let user = store.user(view.user.id).await.unwrap();
        assert_eq!(user.username, "new_person");
        assert!(user.password_hash.starts_with('!'));
    }

    #[tokio::test]
    async fn nested_create_reports_duplicate_email_under_user() {
        let (state, _) = AppState::fake();
        signed_up(&state, "taken@example.com").await;
        let err = create(
            &state,
            ProfileCreateRequest {
                user: Some(NestedUserCreate {
                    email: Some("TAKEN@example.com".into()),
                    name: None,
                }),
                changes: ProfileChanges::default(),
            },
        )
        .await
        .unwrap_err();
        let ApiError::Validation(errors) = err else {
            panic!("expected validation error");
        };
        let json = serde_json::to_value(&errors).unwrap();
        assert_eq!(
            json["user"]["email"][0],
            "A user is already registered with this e-mail address."
        );
    }

    #[tokio::test]
    async fn image_upload_replaces_previous_object() {
        let (state, _) = AppState::fake();
        let user_id = signed_up(&state, "e@example.com").await;

        let first = upload_image(&state, user_id, "image/png", Bytes::from_static(b"one"))
            .await
            .unwrap();
        let first_key = first.fields.profile_image.unwrap();
        let second = upload_image(&state, user_id, "image/jpeg", Bytes::from_static(b"two"))
            .await
            .unwrap();
        let second_key = second.fields.profile_image.unwrap();
        assert!(second_key.ends_with(".jpg"));

        assert!(state.storage.presign_get(&first_key, 60).await.is_err());
        let url = image_url(&state, user_id).await.unwrap();
        assert!(url.contains(&second_key));
    }

    #[tokio::test]
    async fn image_upload_rejects_unknown_type() {
        let (state, _) = AppState::fake();
        let user_id = signed_up(&state, "f@example.com").await;
        let err = upload_image(&state, user_id, "text/plain", Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn delete_keeps_user() {
        let (state, store) = AppState::fake();
        let user_id = signed_up(&state, "g@example.com").await;
        delete(&state, user_id).await.unwrap();
        assert!(matches!(retrieve(&state, user_id).await, Err(ApiError::NotFound)));
        assert!(store.user(user_id).await.is_some());
        assert!(matches!(delete(&state, user_id).await, Err(ApiError::NotFound)));
    }
}
