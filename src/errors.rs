use std::collections::BTreeMap;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;

pub const REQUIRED: &str = "This field is required.";
pub const BLANK: &str = "This field may not be blank.";
pub const INVALID_EMAIL: &str = "Enter a valid email address.";

/// Field name to messages, nested for nested payload objects.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<String, FieldError>);

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldError {
    Messages(Vec<String>),
    Nested(ValidationErrors),
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        let entry = self
            .0
            .entry(field.to_string())
            .or_insert_with(|| FieldError::Messages(Vec::new()));
        match entry {
            FieldError::Messages(list) => list.push(message.into()),
            // a nested object already failed; keep its detail
            FieldError::Nested(_) => {}
        }
    }

    pub fn nest(&mut self, field: &str, inner: ValidationErrors) {
        if !inner.is_empty() {
            self.0.insert(field.to_string(), FieldError::Nested(inner));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[cfg(test)]
    pub fn get(&self, field: &str) -> Option<&FieldError> {
        self.0.get(field)
    }

    /// `Ok(())` when nothing was recorded.
    pub fn into_result(self) -> Result<(), ApiError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(ApiError::Validation(self))
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("validation failed")]
    Validation(ValidationErrors),
    #[error("Unable to log in with provided credentials.")]
    InvalidCredentials,
    #[error("{0}")]
    Unauthorized(String),
    #[error("Not found.")]
    NotFound,
    #[error("User not found.")]
    UserNotFound,
    #[error("{0}")]
    BadRequest(String),
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn field(field: &str, message: impl Into<String>) -> Self {
        let mut errors = ValidationErrors::new();
        errors.add(field, message);
        Self::Validation(errors)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Validation(errors) => (StatusCode::BAD_REQUEST, Json(errors)).into_response(),
            Self::InvalidCredentials => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "non_field_errors": [self.to_string()] })),
            )
                .into_response(),
            Self::Unauthorized(_) => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "detail": self.to_string() })),
            )
                .into_response(),
            Self::NotFound | Self::UserNotFound => (
                StatusCode::NOT_FOUND,
                Json(json!({ "detail": self.to_string() })),
            )
                .into_response(),
            Self::BadRequest(_) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "detail": self.to_string() })),
            )
                .into_response(),
            Self::Internal(e) => {
                tracing::error!(error = %e, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "detail": "Internal server error." })),
                )
                    .into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_of(err: ApiError) -> (StatusCode, serde_json::Value) {
        let resp = err.into_response();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn validation_errors_render_field_map() {
        let mut errors = ValidationErrors::new();
        errors.add("email", INVALID_EMAIL);
        errors.add("password", REQUIRED);
        let (status, json) = body_of(ApiError::Validation(errors)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["email"][0], INVALID_EMAIL);
        assert_eq!(json["password"][0], REQUIRED);
    }

    #[tokio::test]
    async fn nested_errors_render_as_objects() {
        let mut inner = ValidationErrors::new();
        inner.add("email", BLANK);
        let mut outer = ValidationErrors::new();
        outer.nest("user", inner);
        let (_, json) = body_of(ApiError::Validation(outer)).await;
        assert_eq!(json["user"]["email"][0], BLANK);
    }

    #[test]
    fn empty_nested_errors_are_dropped() {
        let mut outer = ValidationErrors::new();
        outer.nest("user", ValidationErrors::new());
        assert!(outer.into_result().is_ok());
    }

    #[tokio::test]
    async fn credentials_error_uses_non_field_errors() {
        let (status, json) = body_of(ApiError::InvalidCredentials).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            json["non_field_errors"][0],
            "Unable to log in with provided credentials."
        );
    }

    #[tokio::test]
    async fn not_found_variants_map_to_404() {
        let (status, json) = body_of(ApiError::NotFound).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["detail"], "Not found.");

        let (status, json) = body_of(ApiError::UserNotFound).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["detail"], "User not found.");
    }

    #[tokio::test]
    async fn internal_hides_the_cause() {
        let (status, json) = body_of(ApiError::Internal(anyhow::anyhow!("db down"))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["detail"], "Internal server error.");
    }
}
