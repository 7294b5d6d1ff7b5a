//! API error type

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use leaflet_storage_core::{Denied, StorageError};
use serde_json::json;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Login required")]
    LoginRequired { login_url: String },

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("The resource has been modified since you loaded it")]
    PreconditionFailed,

    #[error("{0}")]
    UnsupportedFormat(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn denied(denied: Denied, login_url: &str) -> Self {
        match denied {
            Denied::LoginRequired => ApiError::LoginRequired {
                login_url: login_url.to_string(),
            },
            Denied::Forbidden => {
                ApiError::Forbidden("You are not allowed to edit this map.".to_string())
            }
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::LoginRequired { .. } | ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            ApiError::UnsupportedFormat(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "not_found",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::LoginRequired { .. } => "login_required",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Conflict(_) => "conflict",
            ApiError::PreconditionFailed => "precondition_failed",
            ApiError::UnsupportedFormat(_) => "unsupported_format",
            ApiError::Internal(_) => "internal",
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::MapNotFound(_)
            | StorageError::DataLayerNotFound(_)
            | StorageError::UserNotFound(_)
            | StorageError::FeatureNotFound(_) => ApiError::NotFound(e.to_string()),
            StorageError::Io(ref io) if io.kind() == std::io::ErrorKind::NotFound => {
                ApiError::NotFound("File not found".to_string())
            }
            StorageError::InvalidVersion(_) => ApiError::NotFound(e.to_string()),
            StorageError::InvalidGeoJson(_)
            | StorageError::InvalidData { .. }
            | StorageError::Serialization(_)
            | StorageError::Invalid(_) => ApiError::BadRequest(e.to_string()),
            StorageError::UnsupportedFormat(_) => ApiError::UnsupportedFormat(e.to_string()),
            StorageError::BadSignature => ApiError::Forbidden(e.to_string()),
            StorageError::Io(_) | StorageError::Database(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("Request failed: {}", self);
        }
        let body = match &self {
            ApiError::LoginRequired { login_url } => json!({
                "error": self.to_string(),
                "code": self.code(),
                "login_required": login_url,
            }),
            _ => json!({
                "error": self.to_string(),
                "code": self.code(),
            }),
        };
        (status, Json(body)).into_response()
    }
}
