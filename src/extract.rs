use axum::{
    async_trait,
    extract::{
        rejection::JsonRejection, FromRequest, FromRequestParts, Path, Query, Request,
    },
    http::request::Parts,
};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::errors::{ApiError, ValidationErrors};

/// JSON request body whose decoding failures surface as `ApiError`.
///
/// Every request type decoded through it has only optional fields, so each
/// top-level key can be checked on its own to find the ones at fault.
#[derive(Debug)]
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let axum::Json(value) = axum::Json::<Value>::from_request(req, state)
            .await
            .map_err(|rejection| {
                warn!(error = %rejection.body_text(), "unreadable request body");
                ApiError::BadRequest(body_message(&rejection))
            })?;
        decode(value).map(JsonBody)
    }
}

fn body_message(rejection: &JsonRejection) -> String {
    match rejection {
        JsonRejection::MissingJsonContentType(_) => {
            "Unsupported media type; expected application/json.".into()
        }
        JsonRejection::JsonSyntaxError(_) => "JSON parse error.".into(),
        other => other.body_text(),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, ApiError> {
    let map = match value {
        Value::Object(map) => map,
        other => {
            return Err(ApiError::field(
                "non_field_errors",
                format!("Invalid data. Expected a dictionary, but got {}.", kind(&other)),
            ))
        }
    };

    let err = match serde_json::from_value::<T>(Value::Object(map.clone())) {
        Ok(decoded) => return Ok(decoded),
        Err(err) => err,
    };

    let mut errors = ValidationErrors::new();
    for (key, field) in map {
        let single: Map<String, Value> = Map::from_iter([(key.clone(), field)]);
        if let Err(e) = serde_json::from_value::<T>(Value::Object(single)) {
            errors.add(&key, e.to_string());
        }
    }
    if errors.is_empty() {
        errors.add("non_field_errors", err.to_string());
    }
    debug!(?errors, "request body failed to decode");
    Err(ApiError::Validation(errors))
}

/// Path parameters; a segment that does not parse names no resource.
#[derive(Debug)]
pub struct PathParam<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for PathParam<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = Path::<T>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| {
                debug!(error = %rejection.body_text(), "unparseable path parameter");
                ApiError::NotFound
            })?;
        Ok(PathParam(value))
    }
}

/// Query string parameters.
#[derive(Debug)]
pub struct QueryParams<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for QueryParams<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
        Ok(QueryParams(value))
    }
}
