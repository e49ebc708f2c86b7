use axum::{
    Json, async_trait,
    extract::{FromRequest, Request, rejection::JsonRejection},
    http::StatusCode,
};
use serde::Serialize;
use tracing::{debug, error};

use crate::{store::StoreError, web::auth::AuthError, web::uploads::UploadError};

/// Canonical JSON payload for error responses.
#[derive(Debug, Serialize, Clone)]
pub struct ApiMessage {
    pub message: String,
}

impl ApiMessage {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Error half of every JSON handler.
pub type ApiRejection = (StatusCode, Json<ApiMessage>);

/// Helper for controllers that need to return `(StatusCode, Json<ApiMessage>)`.
pub fn json_error(status: StatusCode, message: impl Into<String>) -> ApiRejection {
    (status, Json(ApiMessage::new(message)))
}

/// `Json` extractor whose rejections use the same `{ "message": ... }` body
/// as every other handler error.
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiRejection;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(json_rejection(rejection)),
        }
    }
}

fn json_rejection(rejection: JsonRejection) -> ApiRejection {
    debug!(%rejection, "rejected request body");
    let status = match rejection {
        JsonRejection::MissingJsonContentType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        _ => StatusCode::BAD_REQUEST,
    };
    json_error(status, rejection.body_text())
}

fn internal_error() -> ApiRejection {
    json_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal server error. Please try again later.",
    )
}

impl From<StoreError> for ApiRejection {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(username) => json_error(
                StatusCode::CONFLICT,
                format!("Username `{username}` is already registered."),
            ),
            other => {
                error!(err = ?other, "credential store failure");
                internal_error()
            }
        }
    }
}

impl From<AuthError> for ApiRejection {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::NotFound => json_error(StatusCode::NOT_FOUND, "User not found."),
            AuthError::InvalidCredentials => {
                json_error(StatusCode::UNAUTHORIZED, "Invalid username or password.")
            }
            AuthError::Conflict(username) => json_error(
                StatusCode::CONFLICT,
                format!("Username `{username}` is already registered."),
            ),
            AuthError::Invalid(message) => json_error(StatusCode::BAD_REQUEST, message),
            AuthError::Hash(detail) => {
                error!(%detail, "password hashing failed");
                internal_error()
            }
            AuthError::Store(err) => err.into(),
        }
    }
}

impl From<UploadError> for ApiRejection {
    fn from(err: UploadError) -> Self {
        let status = match &err {
            UploadError::UnsupportedType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            UploadError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            UploadError::MissingFile | UploadError::TooManyFiles | UploadError::Malformed(_) => {
                StatusCode::BAD_REQUEST
            }
            UploadError::Io(_) => {
                error!(?err, "failed to persist upload");
                return internal_error();
            }
        };
        json_error(status, err.to_string())
    }
}
